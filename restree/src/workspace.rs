//! A configuration root: application settings plus the three stores.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::{ApplicationConfig, Defaults, DEFAULTS};
use crate::environment::Environment;
use crate::error::Result;
use crate::store::{read_json, write_json, CommandStore, EnvironmentStore, TemplateStore};

pub const APPLICATION_CONFIG_FILE: &str = "application-config.json";

/// Environment variable naming the configuration root.
pub const ROOT_ENV_VAR: &str = "RESTREE_HOME";

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    defaults: Defaults,
    config: ApplicationConfig,
    commands: CommandStore,
    environments: EnvironmentStore,
    templates: TemplateStore,
}

impl Workspace {
    /// Open `root` with the built-in defaults.
    ///
    /// # Errors
    ///
    /// Fails when `application-config.json` exists but cannot be read.
    pub fn open(root: &Path) -> Result<Self> {
        Self::open_with(root, DEFAULTS)
    }

    /// # Errors
    ///
    /// Fails when `application-config.json` exists but cannot be read.
    pub fn open_with(root: &Path, defaults: Defaults) -> Result<Self> {
        let path = root.join(APPLICATION_CONFIG_FILE);
        let config = if path.is_file() {
            read_json(&path)?
        } else {
            debug!("no {} under {}, using defaults", APPLICATION_CONFIG_FILE, root.display());
            ApplicationConfig::from_defaults(&defaults)
        };
        Ok(Self {
            root: root.to_path_buf(),
            defaults,
            config,
            commands: CommandStore::new(root),
            environments: EnvironmentStore::new(root),
            templates: TemplateStore::new(root, &defaults),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn defaults(&self) -> &Defaults {
        &self.defaults
    }

    #[must_use]
    pub fn config(&self) -> &ApplicationConfig {
        &self.config
    }

    #[must_use]
    pub fn commands(&self) -> &CommandStore {
        &self.commands
    }

    #[must_use]
    pub fn environments(&self) -> &EnvironmentStore {
        &self.environments
    }

    #[must_use]
    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    /// Persist new application settings.
    ///
    /// # Errors
    ///
    /// Fails when the write fails.
    pub fn set_config(&mut self, config: ApplicationConfig) -> Result<()> {
        write_json(&self.root.join(APPLICATION_CONFIG_FILE), &config)?;
        self.config = config;
        Ok(())
    }

    /// `name` if given, else the configured environment.
    ///
    /// # Errors
    ///
    /// Fails when the environment or one of its ancestors is missing, or the
    /// chain is cyclic.
    pub fn active_environment(&self, name: Option<&str>) -> Result<Environment> {
        let name = name.unwrap_or(&self.config.environment);
        self.environments.require(name)
    }
}
