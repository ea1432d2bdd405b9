//! Output templates stored per command address, with built-ins as fallback.
//!
//! A template named `n` stored at address `a` is visible from `a` and every
//! command below it, unless a deeper address stores its own `n`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::info;

use crate::address::{is_identifier, CommandAddress};
use crate::config::{BuiltinTemplate, Defaults, TemplateConfig};
use crate::error::{Error, IoContext, Result};
use crate::store::{list_names, read_json, write_json};

pub const TEMPLATES_DIR: &str = "templates";
const TEMPLATE_EXT: &str = ".json";

/// `name@command-address`; the root address is written as nothing after `@`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateAddress {
    pub name: String,
    pub command: CommandAddress,
}

impl TemplateAddress {
    /// # Errors
    ///
    /// Fails when `name` is not an identifier.
    pub fn new(name: &str, command: CommandAddress) -> Result<Self> {
        if !is_identifier(name) {
            return Err(Error::InvalidTemplateAddress(format!("{name}@{command}")));
        }
        Ok(Self {
            name: name.to_string(),
            command,
        })
    }
}

impl fmt::Display for TemplateAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.command)
    }
}

impl FromStr for TemplateAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((name, command)) = s.split_once('@') else {
            return Err(Error::InvalidTemplateAddress(s.to_string()));
        };
        let command = command
            .parse()
            .map_err(|_| Error::InvalidTemplateAddress(s.to_string()))?;
        Self::new(name, command)
    }
}

#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
    builtins: &'static [BuiltinTemplate],
}

impl TemplateStore {
    #[must_use]
    pub fn new(root: &Path, defaults: &Defaults) -> Self {
        Self {
            dir: root.join(TEMPLATES_DIR),
            builtins: defaults.templates,
        }
    }

    fn dir_for(&self, command: &CommandAddress) -> PathBuf {
        if command.is_root() {
            self.dir.clone()
        } else {
            self.dir.join(command.to_relative_path())
        }
    }

    #[must_use]
    pub fn path(&self, address: &TemplateAddress) -> PathBuf {
        self.dir_for(&address.command)
            .join(format!("{}{TEMPLATE_EXT}", address.name))
    }

    #[must_use]
    pub fn is_stored(&self, address: &TemplateAddress) -> bool {
        self.path(address).is_file()
    }

    #[must_use]
    pub fn builtin(&self, address: &TemplateAddress) -> Option<&BuiltinTemplate> {
        let command = address.command.to_string();
        self.builtins
            .iter()
            .find(|b| b.name == address.name && b.command == command)
    }

    fn resolves(&self, address: &TemplateAddress) -> bool {
        self.is_stored(address) || self.builtin(address).is_some()
    }

    /// Names stored at exactly `command`, plus built-ins scoped there.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be read.
    pub fn templates_for_command(&self, command: &CommandAddress) -> Result<BTreeSet<String>> {
        let stored = list_names(&self.dir_for(command), |entry, name| {
            let is_file = entry.file_type().at(&entry.path())?.is_file();
            Ok(is_file
                && name
                    .strip_suffix(TEMPLATE_EXT)
                    .is_some_and(is_identifier))
        })?;
        let key = command.to_string();
        let mut names: BTreeSet<String> = stored
            .into_iter()
            .filter_map(|n| n.strip_suffix(TEMPLATE_EXT).map(str::to_string))
            .collect();
        names.extend(
            self.builtins
                .iter()
                .filter(|b| b.command == key)
                .map(|b| b.name.to_string()),
        );
        Ok(names)
    }

    /// Every template visible from `command`, keyed by name, each mapped to
    /// the deepest address that defines it.
    ///
    /// # Errors
    ///
    /// Fails when a template directory cannot be read.
    pub fn effective_templates(
        &self,
        command: &CommandAddress,
    ) -> Result<BTreeMap<String, TemplateAddress>> {
        let mut visible: BTreeMap<String, TemplateAddress> = BTreeMap::new();
        for scope in command.ancestors() {
            for name in self.templates_for_command(&scope)? {
                let candidate = TemplateAddress {
                    name: name.clone(),
                    command: scope.clone(),
                };
                match visible.get(&name) {
                    Some(existing)
                        if existing.command.to_string().len()
                            >= candidate.command.to_string().len() => {}
                    _ => {
                        visible.insert(name, candidate);
                    }
                }
            }
        }
        Ok(visible)
    }

    /// The nearest address, walking from `command` to the root, at which
    /// `name` is stored or built in.
    #[must_use]
    pub fn effective_address(&self, command: &CommandAddress, name: &str) -> Option<TemplateAddress> {
        if !is_identifier(name) {
            return None;
        }
        command
            .ancestors()
            .map(|scope| TemplateAddress {
                name: name.to_string(),
                command: scope,
            })
            .find(|candidate| self.resolves(candidate))
    }

    /// # Errors
    ///
    /// [`Error::TemplateNotFound`] when neither stored nor built in at that
    /// exact address; [`Error::Parse`] for a corrupt file.
    pub fn load(&self, address: &TemplateAddress) -> Result<TemplateConfig> {
        if self.is_stored(address) {
            return read_json(&self.path(address));
        }
        self.builtin(address)
            .map(BuiltinTemplate::to_config)
            .ok_or_else(|| Error::TemplateNotFound {
                name: address.name.clone(),
                command: address.command.clone(),
            })
    }

    /// Resolve `name` from `command` and load it.
    ///
    /// # Errors
    ///
    /// [`Error::TemplateNotFound`] when no ancestor provides it.
    pub fn resolve(
        &self,
        command: &CommandAddress,
        name: &str,
    ) -> Result<(TemplateAddress, TemplateConfig)> {
        let address = self
            .effective_address(command, name)
            .ok_or_else(|| Error::TemplateNotFound {
                name: name.to_string(),
                command: command.clone(),
            })?;
        let config = self.load(&address)?;
        Ok((address, config))
    }

    /// # Errors
    ///
    /// Fails when the write fails.
    pub fn store(&self, address: &TemplateAddress, config: &TemplateConfig) -> Result<()> {
        write_json(&self.path(address), config)?;
        info!("stored template '{address}'");
        Ok(())
    }

    /// Remove a stored template. Built-ins cannot be removed.
    ///
    /// # Errors
    ///
    /// [`Error::TemplateNotFound`] when nothing is stored there.
    pub fn delete(&self, address: &TemplateAddress) -> Result<()> {
        let path = self.path(address);
        if !path.is_file() {
            return Err(Error::TemplateNotFound {
                name: address.name.clone(),
                command: address.command.clone(),
            });
        }
        fs::remove_file(&path).at(&path)?;
        info!("deleted template '{address}'");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULTS;
    use tempfile::TempDir;

    fn setup() -> (TempDir, TemplateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::new(dir.path(), &DEFAULTS);
        (dir, store)
    }

    fn ta(s: &str) -> TemplateAddress {
        s.parse().unwrap()
    }

    fn addr(s: &str) -> CommandAddress {
        s.parse().unwrap()
    }

    fn template(text: &str) -> TemplateConfig {
        TemplateConfig {
            description: String::new(),
            parameters: BTreeMap::new(),
            template: text.to_string(),
        }
    }

    // ==================== TemplateAddress tests ====================

    #[test]
    fn test_template_address_parse_and_display() {
        let root = ta("default@");
        assert!(root.command.is_root());
        assert_eq!(root.to_string(), "default@");
        let deep = ta("table@users/list");
        assert_eq!(deep.command, addr("users/list"));
        assert_eq!(deep.to_string(), "table@users/list");
    }

    #[test]
    fn test_template_address_invalid() {
        assert!("nameonly".parse::<TemplateAddress>().is_err());
        assert!("9x@".parse::<TemplateAddress>().is_err());
        assert!("x@bad path".parse::<TemplateAddress>().is_err());
    }

    // ==================== resolution tests ====================

    #[test]
    fn test_builtin_fallback() {
        let (_dir, store) = setup();
        let found = store.effective_address(&addr("a/b"), "default").unwrap();
        assert_eq!(found, ta("default@"));
        assert_eq!(store.load(&found).unwrap().template, "{body}\n");
        assert!(store.effective_address(&addr("a"), "missing").is_none());
    }

    #[test]
    fn test_stored_overrides_builtin_at_same_address() {
        let (_dir, store) = setup();
        store.store(&ta("default@"), &template("custom")).unwrap();
        assert_eq!(store.load(&ta("default@")).unwrap().template, "custom");
    }

    #[test]
    fn test_nearest_ancestor_wins() {
        let (_dir, store) = setup();
        store.store(&ta("def@"), &template("root")).unwrap();
        store.store(&ta("def@xyz"), &template("xyz")).unwrap();

        assert_eq!(store.effective_address(&addr("xyz/abc"), "def"), Some(ta("def@xyz")));
        assert_eq!(store.effective_address(&addr("xyz"), "def"), Some(ta("def@xyz")));
        assert_eq!(store.effective_address(&addr("other"), "def"), Some(ta("def@")));
        let (_, cfg) = store.resolve(&addr("xyz/abc"), "def").unwrap();
        assert_eq!(cfg.template, "xyz");
    }

    #[test]
    fn test_effective_templates_keeps_deepest() {
        let (_dir, store) = setup();
        store.store(&ta("def@"), &template("root")).unwrap();
        store.store(&ta("def@xyz"), &template("xyz")).unwrap();
        store.store(&ta("only@xyz/abc"), &template("abc")).unwrap();

        let visible = store.effective_templates(&addr("xyz/abc")).unwrap();
        assert_eq!(visible["def"], ta("def@xyz"));
        assert_eq!(visible["only"], ta("only@xyz/abc"));
        assert_eq!(visible["default"], ta("default@"));
        assert_eq!(visible["verbose"], ta("verbose@"));

        let names = store.templates_for_command(&addr("xyz")).unwrap();
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["def"]);
    }

    #[test]
    fn test_resolve_missing() {
        let (_dir, store) = setup();
        let err = store.resolve(&addr("a"), "nope").unwrap_err();
        assert!(matches!(err, Error::TemplateNotFound { name, .. } if name == "nope"));
    }

    // ==================== delete tests ====================

    #[test]
    fn test_delete_stored_restores_builtin() {
        let (_dir, store) = setup();
        store.store(&ta("default@"), &template("mine")).unwrap();
        store.delete(&ta("default@")).unwrap();
        assert_eq!(store.load(&ta("default@")).unwrap().template, "{body}\n");
        assert!(matches!(
            store.delete(&ta("default@")),
            Err(Error::TemplateNotFound { .. })
        ));
    }

    #[test]
    fn test_store_round_trip_idempotent() {
        let (_dir, store) = setup();
        let mut cfg = template("{status}");
        cfg.parameters.insert("width".to_string(), "40".to_string());
        store.store(&ta("t@a"), &cfg).unwrap();
        let before = fs::read_to_string(store.path(&ta("t@a"))).unwrap();
        let loaded = store.load(&ta("t@a")).unwrap();
        assert_eq!(loaded, cfg);
        store.store(&ta("t@a"), &loaded).unwrap();
        assert_eq!(fs::read_to_string(store.path(&ta("t@a"))).unwrap(), before);
    }
}
