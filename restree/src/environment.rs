//! Runtime environments: a local config layered over its resolved parent.

use std::collections::BTreeMap;

use crate::address::validate_name;
use crate::config::{merge_headers, merge_variables, EnvironmentConfig};
use crate::error::{Error, Result};

/// Name of the built-in environment with no variables, headers or parent.
pub const EMPTY_ENVIRONMENT: &str = "_empty";

/// A value together with the one it had when last loaded or saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracked<T> {
    original: T,
    current: T,
}

impl<T: Clone + PartialEq> Tracked<T> {
    pub fn new(value: T) -> Self {
        Self {
            original: value.clone(),
            current: value,
        }
    }

    pub fn original(&self) -> &T {
        &self.original
    }

    pub fn current(&self) -> &T {
        &self.current
    }

    pub fn set(&mut self, value: T) {
        self.current = value;
    }

    pub fn is_changed(&self) -> bool {
        self.original != self.current
    }

    /// Accept the current value as the new baseline.
    pub fn commit(&mut self) {
        self.original = self.current.clone();
    }
}

/// Identity of an environment at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub name: String,
    pub parent: Option<String>,
}

/// What a store has to do beyond writing the local config.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvironmentChange {
    /// Previous name, when the environment was renamed.
    pub renamed_from: Option<String>,
    pub reparented: bool,
}

impl EnvironmentChange {
    #[must_use]
    pub fn between(original: &Snapshot, current: &Snapshot) -> Self {
        Self {
            renamed_from: (original.name != current.name).then(|| original.name.clone()),
            reparented: original.parent != current.parent,
        }
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.renamed_from.is_none() && !self.reparented
    }
}

#[derive(Debug, Clone)]
pub struct Environment {
    name: Tracked<String>,
    parent: Tracked<Option<String>>,
    local: EnvironmentConfig,
    inherited: EnvironmentConfig,
    stored: bool,
    variables: BTreeMap<String, String>,
    headers: BTreeMap<String, Vec<String>>,
}

impl Environment {
    /// An environment read from the store. `inherited` is the fully merged
    /// config of `local.parent`.
    pub(crate) fn loaded(name: &str, local: EnvironmentConfig, inherited: EnvironmentConfig) -> Self {
        let mut env = Self::build(name, local, inherited);
        env.stored = true;
        env
    }

    /// A fresh environment that exists only in memory until stored.
    ///
    /// # Errors
    ///
    /// Fails when `name` is not a valid name or is reserved.
    pub fn create(name: &str) -> Result<Self> {
        if name == EMPTY_ENVIRONMENT {
            return Err(Error::ReservedEnvironment(name.to_string()));
        }
        validate_name(name)?;
        Ok(Self::build(name, EnvironmentConfig::default(), EnvironmentConfig::default()))
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::build(
            EMPTY_ENVIRONMENT,
            EnvironmentConfig::default(),
            EnvironmentConfig::default(),
        )
    }

    /// An unsaved child of `parent`, inheriting its resolved values.
    #[must_use]
    pub fn transient(name: &str, parent: &Environment) -> Self {
        let inherited = EnvironmentConfig {
            parent: parent.parent().map(str::to_string),
            variables: parent.variables.clone(),
            headers: parent.headers.clone(),
            request_timeout: parent.request_timeout(),
        };
        let local = EnvironmentConfig {
            parent: Some(parent.name().to_string()),
            ..EnvironmentConfig::default()
        };
        Self::build(name, local, inherited)
    }

    fn build(name: &str, mut local: EnvironmentConfig, inherited: EnvironmentConfig) -> Self {
        let parent = local.parent.take();
        let mut env = Self {
            name: Tracked::new(name.to_string()),
            parent: Tracked::new(parent),
            local,
            inherited,
            stored: false,
            variables: BTreeMap::new(),
            headers: BTreeMap::new(),
        };
        env.recompute();
        env
    }

    fn recompute(&mut self) {
        self.variables = merge_variables(&self.inherited.variables, &self.local.variables);
        self.headers = merge_headers(&self.inherited.headers, &self.local.headers);
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.name.current()
    }

    #[must_use]
    pub fn parent(&self) -> Option<&str> {
        self.parent.current().as_deref()
    }

    #[must_use]
    pub fn is_stored(&self) -> bool {
        self.stored
    }

    #[must_use]
    pub fn is_empty_environment(&self) -> bool {
        self.name() == EMPTY_ENVIRONMENT
    }

    /// Effective variables: inherited, overridden by local.
    #[must_use]
    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    /// Effective headers: local values first, then inherited ones.
    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, Vec<String>> {
        &self.headers
    }

    /// Milliseconds; local if set, else inherited.
    #[must_use]
    pub fn request_timeout(&self) -> Option<u64> {
        self.local.request_timeout.or(self.inherited.request_timeout)
    }

    /// Local values only, with the current parent link, as they are stored.
    #[must_use]
    pub fn local_config(&self) -> EnvironmentConfig {
        EnvironmentConfig {
            parent: self.parent.current().clone(),
            ..self.local.clone()
        }
    }

    pub fn set_variable(&mut self, name: &str, value: &str) {
        self.local
            .variables
            .insert(name.to_string(), value.to_string());
        self.recompute();
    }

    /// Returns true when a local value was removed.
    pub fn remove_variable(&mut self, name: &str) -> bool {
        let removed = self.local.variables.remove(name).is_some();
        self.recompute();
        removed
    }

    pub fn set_header(&mut self, name: &str, values: Vec<String>) {
        self.local.headers.insert(name.to_string(), values);
        self.recompute();
    }

    pub fn add_header_value(&mut self, name: &str, value: &str) {
        self.local
            .headers
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
        self.recompute();
    }

    pub fn remove_header(&mut self, name: &str) -> bool {
        let removed = self.local.headers.remove(name).is_some();
        self.recompute();
        removed
    }

    pub fn set_request_timeout(&mut self, millis: Option<u64>) {
        self.local.request_timeout = millis;
    }

    /// # Errors
    ///
    /// Fails when `name` is invalid or reserved.
    pub fn rename(&mut self, name: &str) -> Result<()> {
        if name == EMPTY_ENVIRONMENT {
            return Err(Error::ReservedEnvironment(name.to_string()));
        }
        validate_name(name)?;
        self.name.set(name.to_string());
        Ok(())
    }

    /// Point at a new parent whose resolved config is `inherited`.
    pub(crate) fn set_parent(&mut self, parent: Option<String>, inherited: EnvironmentConfig) {
        self.parent.set(parent);
        self.inherited = inherited;
        self.recompute();
    }

    #[must_use]
    pub fn original_name(&self) -> &str {
        self.name.original()
    }

    #[must_use]
    pub fn change(&self) -> EnvironmentChange {
        EnvironmentChange::between(
            &Snapshot {
                name: self.name.original().clone(),
                parent: self.parent.original().clone(),
            },
            &Snapshot {
                name: self.name.current().clone(),
                parent: self.parent.current().clone(),
            },
        )
    }

    pub(crate) fn mark_saved(&mut self) {
        self.name.commit();
        self.parent.commit();
        self.stored = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)], headers: &[(&str, &[&str])]) -> EnvironmentConfig {
        EnvironmentConfig {
            parent: None,
            variables: pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            headers: headers
                .iter()
                .map(|(k, vs)| {
                    (
                        (*k).to_string(),
                        vs.iter().map(|v| (*v).to_string()).collect(),
                    )
                })
                .collect(),
            request_timeout: None,
        }
    }

    // ==================== EnvironmentChange tests ====================

    #[test]
    fn test_change_between() {
        let a = Snapshot {
            name: "dev".to_string(),
            parent: None,
        };
        let b = Snapshot {
            name: "develop".to_string(),
            parent: Some("base".to_string()),
        };
        let change = EnvironmentChange::between(&a, &b);
        assert_eq!(change.renamed_from.as_deref(), Some("dev"));
        assert!(change.reparented);
        assert!(EnvironmentChange::between(&a, &a).is_noop());
    }

    #[test]
    fn test_tracked_commit() {
        let mut t = Tracked::new(1);
        t.set(2);
        assert!(t.is_changed());
        assert_eq!(*t.original(), 1);
        t.commit();
        assert!(!t.is_changed());
        assert_eq!(*t.original(), 2);
    }

    // ==================== derived values tests ====================

    #[test]
    fn test_mutation_recomputes_derived_values() {
        let inherited = config(&[("host", "base"), ("port", "80")], &[("Accept", &["*/*"])]);
        let mut local = config(&[], &[]);
        local.parent = Some("base".to_string());
        let mut env = Environment::loaded("dev", local, inherited);
        assert_eq!(env.variable("host"), Some("base"));

        env.set_variable("host", "dev.local");
        assert_eq!(env.variable("host"), Some("dev.local"));
        assert_eq!(env.variable("port"), Some("80"));

        env.add_header_value("Accept", "application/json");
        assert_eq!(
            env.headers()["Accept"],
            vec!["application/json".to_string(), "*/*".to_string()]
        );

        assert!(env.remove_variable("host"));
        assert_eq!(env.variable("host"), Some("base"));
        assert!(!env.remove_variable("port"));
    }

    #[test]
    fn test_local_config_excludes_inherited() {
        let inherited = config(&[("a", "1")], &[]);
        let mut local = config(&[("b", "2")], &[]);
        local.parent = Some("p".to_string());
        let env = Environment::loaded("c", local, inherited);
        let stored = env.local_config();
        assert_eq!(stored.parent.as_deref(), Some("p"));
        assert!(!stored.variables.contains_key("a"));
        assert_eq!(stored.variables["b"], "2");
    }

    #[test]
    fn test_transient_links_to_parent() {
        let mut parent = Environment::create("base").unwrap();
        parent.set_variable("host", "h");
        parent.set_request_timeout(Some(500));
        let child = Environment::transient("scratch", &parent);
        assert_eq!(child.parent(), Some("base"));
        assert_eq!(child.variable("host"), Some("h"));
        assert_eq!(child.request_timeout(), Some(500));
        assert!(!child.is_stored());
        assert!(child.local_config().variables.is_empty());
    }

    #[test]
    fn test_rename_validation() {
        let mut env = Environment::create("dev").unwrap();
        assert!(matches!(
            env.rename(EMPTY_ENVIRONMENT),
            Err(Error::ReservedEnvironment(_))
        ));
        assert!(env.rename("bad name").is_err());
        env.rename("prod").unwrap();
        assert_eq!(env.change().renamed_from.as_deref(), Some("dev"));
        env.mark_saved();
        assert!(env.change().is_noop());
        assert_eq!(env.original_name(), "prod");
    }

    #[test]
    fn test_empty_environment() {
        let env = Environment::empty();
        assert!(env.is_empty_environment());
        assert!(env.variables().is_empty());
        assert!(Environment::create(EMPTY_ENVIRONMENT).is_err());
    }
}
