//! Startup shared by the `restree` and `restree-config` binaries.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use restree::workspace::ROOT_ENV_VAR;

pub const APP_NAME: &str = "restree";

/// `explicit` if given, else `$RESTREE_HOME`, else `<config dir>/restree`.
///
/// # Errors
///
/// Fails when none of them is available.
pub fn resolve_root(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    if let Some(dir) = std::env::var_os(ROOT_ENV_VAR) {
        return Ok(PathBuf::from(dir));
    }
    dirs::config_dir()
        .map(|dir| dir.join(APP_NAME))
        .with_context(|| format!("No configuration directory found; pass --root-dir or set {ROOT_ENV_VAR}"))
}

/// Log to stderr. `RUST_LOG` wins; otherwise `debug` when verbose, else `warn`.
pub fn init_tracing(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

#[must_use]
pub fn user_agent() -> String {
    format!("{}/{}", APP_NAME, env!("CARGO_PKG_VERSION"))
}
