//! Filesystem persistence for commands, environments and templates.
//!
//! Every single-file write goes to a temporary file in the target directory
//! and is renamed into place, so readers never see a half-written document.
//! Multi-file operations have no rollback: if one fails, re-run it.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::{Error, IoContext, Result};

pub mod commands;
pub mod environments;
pub mod templates;

pub use commands::CommandStore;
pub use environments::EnvironmentStore;
pub use templates::{TemplateAddress, TemplateStore};

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).at(path)?;
    serde_json::from_str(&text).map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).at(dir)?;
    let mut text = serde_json::to_string_pretty(value).map_err(|source| Error::Encode {
        what: path.display().to_string(),
        source,
    })?;
    text.push('\n');

    let mut staged = NamedTempFile::new_in(dir).at(dir)?;
    staged.write_all(text.as_bytes()).at(staged.path())?;
    staged.persist(path).map_err(|e| Error::Io {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// Names of the entries in `dir` for which `keep` returns true, sorted.
/// A missing directory has no entries.
pub(crate) fn list_names<F>(dir: &Path, mut keep: F) -> Result<Vec<String>>
where
    F: FnMut(&fs::DirEntry, &str) -> Result<bool>,
{
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).at(dir)? {
        let entry = entry.at(dir)?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if keep(&entry, name)? {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}
