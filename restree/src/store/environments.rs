//! Named environments stored flat under `<root>/environments/<name>`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::address::{is_valid_name, validate_name};
use crate::config::EnvironmentConfig;
use crate::environment::{Environment, EMPTY_ENVIRONMENT};
use crate::error::{Error, IoContext, Result};
use crate::store::{list_names, read_json, write_json};

pub const ENVIRONMENTS_DIR: &str = "environments";

#[derive(Debug, Clone)]
pub struct EnvironmentStore {
    dir: PathBuf,
}

impl EnvironmentStore {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            dir: root.join(ENVIRONMENTS_DIR),
        }
    }

    #[must_use]
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        name != EMPTY_ENVIRONMENT && is_valid_name(name) && self.path(name).is_file()
    }

    /// Stored environment names, sorted.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be read.
    pub fn list(&self) -> Result<Vec<String>> {
        list_names(&self.dir, |entry, name| {
            let is_file = entry.file_type().at(&entry.path())?.is_file();
            Ok(is_file && is_valid_name(name) && name != EMPTY_ENVIRONMENT)
        })
    }

    fn load_config(&self, name: &str) -> Result<Option<EnvironmentConfig>> {
        if !self.exists(name) {
            return Ok(None);
        }
        read_json(&self.path(name)).map(Some)
    }

    /// Fully merged config of `name` and its ancestors.
    ///
    /// `guard` holds the names already visited on this resolution; meeting
    /// one again is a cycle.
    ///
    /// # Errors
    ///
    /// [`Error::EnvironmentCycle`] or [`Error::EnvironmentNotFound`].
    pub fn merged_config(
        &self,
        name: Option<&str>,
        guard: &mut Vec<String>,
    ) -> Result<EnvironmentConfig> {
        let Some(name) = name else {
            return Ok(EnvironmentConfig::default());
        };
        if guard.iter().any(|seen| seen == name) {
            let mut path = guard.clone();
            path.push(name.to_string());
            return Err(Error::EnvironmentCycle { path });
        }
        guard.push(name.to_string());
        if name == EMPTY_ENVIRONMENT {
            return Ok(EnvironmentConfig::default());
        }

        let Some(local) = self.load_config(name)? else {
            return Err(Error::EnvironmentNotFound {
                name: name.to_string(),
                path: guard.clone(),
            });
        };
        match local.parent.as_deref() {
            None => Ok(local),
            Some(parent) => {
                let inherited = self.merged_config(Some(parent), guard)?;
                Ok(local.merged_over(&inherited))
            }
        }
    }

    /// The runtime environment for `name`; `_empty` always resolves.
    ///
    /// # Errors
    ///
    /// Fails when the stored chain is broken or cyclic.
    pub fn environment(&self, name: &str) -> Result<Option<Environment>> {
        if name == EMPTY_ENVIRONMENT {
            return Ok(Some(Environment::empty()));
        }
        let Some(local) = self.load_config(name)? else {
            return Ok(None);
        };
        let mut guard = vec![name.to_string()];
        let inherited = self.merged_config(local.parent.as_deref(), &mut guard)?;
        Ok(Some(Environment::loaded(name, local, inherited)))
    }

    /// Like [`Self::environment`] but a missing name is an error.
    ///
    /// # Errors
    ///
    /// [`Error::EnvironmentNotFound`] or a chain failure.
    pub fn require(&self, name: &str) -> Result<Environment> {
        self.environment(name)?
            .ok_or_else(|| Error::EnvironmentNotFound {
                name: name.to_string(),
                path: vec![name.to_string()],
            })
    }

    /// Names of stored environments whose parent is `name`.
    ///
    /// # Errors
    ///
    /// Fails when a stored environment cannot be read.
    pub fn children_of(&self, name: &str) -> Result<Vec<String>> {
        let mut children = Vec::new();
        for candidate in self.list()? {
            if let Some(cfg) = self.load_config(&candidate)? {
                if cfg.parent.as_deref() == Some(name) {
                    children.push(candidate);
                }
            }
        }
        Ok(children)
    }

    /// Point `env` at `parent`, resolving the new chain first.
    ///
    /// # Errors
    ///
    /// Fails when the new chain is broken or would contain `env` itself.
    pub fn reparent(&self, env: &mut Environment, parent: Option<&str>) -> Result<()> {
        let mut guard = vec![env.name().to_string()];
        let inherited = self.merged_config(parent, &mut guard)?;
        env.set_parent(parent.map(str::to_string), inherited);
        Ok(())
    }

    /// Persist `env`, following through on a rename.
    ///
    /// # Errors
    ///
    /// Fails on a reserved or taken name, a broken or cyclic parent chain,
    /// or I/O.
    pub fn store_environment(&self, env: &mut Environment) -> Result<()> {
        let name = env.name().to_string();
        if name == EMPTY_ENVIRONMENT {
            return Err(Error::ReservedEnvironment(name));
        }
        validate_name(&name)?;
        let change = env.change();
        let is_new_name = change.renamed_from.is_some() || !env.is_stored();
        if is_new_name && self.exists(&name) {
            return Err(Error::EnvironmentExists(name));
        }

        let mut guard = Vec::new();
        if let Some(old) = &change.renamed_from {
            guard.push(old.clone());
        }
        guard.push(name.clone());
        self.merged_config(env.parent(), &mut guard)?;

        write_json(&self.path(&name), &env.local_config())?;
        debug!("stored environment '{name}'");

        if let Some(old) = &change.renamed_from {
            if env.is_stored() {
                let old_path = self.path(old);
                if old_path.is_file() {
                    fs::remove_file(&old_path).at(&old_path)?;
                }
                for child in self.children_of(old)? {
                    self.set_stored_parent(&child, Some(name.clone()))?;
                }
                info!("renamed environment '{old}' to '{name}'");
            }
        }
        env.mark_saved();
        Ok(())
    }

    /// Remove a stored environment.
    ///
    /// Refuses while other environments inherit from it, unless `force`, in
    /// which case they are moved to its own parent.
    ///
    /// # Errors
    ///
    /// [`Error::EnvironmentNotFound`], [`Error::EnvironmentInUse`],
    /// [`Error::ReservedEnvironment`] or I/O.
    pub fn delete_environment(&self, name: &str, force: bool) -> Result<()> {
        if name == EMPTY_ENVIRONMENT {
            return Err(Error::ReservedEnvironment(name.to_string()));
        }
        let Some(cfg) = self.load_config(name)? else {
            return Err(Error::EnvironmentNotFound {
                name: name.to_string(),
                path: vec![name.to_string()],
            });
        };
        let children = self.children_of(name)?;
        if !children.is_empty() && !force {
            return Err(Error::EnvironmentInUse {
                name: name.to_string(),
                children,
            });
        }
        for child in &children {
            self.set_stored_parent(child, cfg.parent.clone())?;
        }
        let path = self.path(name);
        fs::remove_file(&path).at(&path)?;
        info!("deleted environment '{name}'");
        Ok(())
    }

    fn set_stored_parent(&self, name: &str, parent: Option<String>) -> Result<()> {
        let path = self.path(name);
        let mut cfg: EnvironmentConfig = read_json(&path)?;
        cfg.parent = parent;
        write_json(&path, &cfg)
    }
}
