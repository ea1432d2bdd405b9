//! The command tree on disk: `<root>/commands/<address-path>/command.json`.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::{Builder, TempDir};
use tracing::{debug, info};

use crate::address::{is_valid_name, CommandAddress};
use crate::config::{CommandConfig, CommandConfigTree};
use crate::error::{Error, IoContext, Result};
use crate::store::{list_names, read_json, write_json};

pub const COMMANDS_DIR: &str = "commands";
pub const COMMAND_FILE: &str = "command.json";

const REPLACED_ENTRY: &str = "old";

#[derive(Debug, Clone)]
pub struct CommandStore {
    base: PathBuf,
}

impl CommandStore {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            base: root.join(COMMANDS_DIR),
        }
    }

    fn dir(&self, address: &CommandAddress) -> PathBuf {
        if address.is_root() {
            self.base.clone()
        } else {
            self.base.join(address.to_relative_path())
        }
    }

    /// Location of the config file for `address`, whether or not it exists.
    #[must_use]
    pub fn path(&self, address: &CommandAddress) -> PathBuf {
        self.dir(address).join(COMMAND_FILE)
    }

    /// The config path, only if it exists and deserializes.
    ///
    /// A descriptor that fails to parse is treated as absent.
    #[must_use]
    pub fn validated_path(&self, address: &CommandAddress) -> Option<PathBuf> {
        let path = self.path(address);
        if !path.is_file() {
            return None;
        }
        match read_json::<CommandConfig>(&path) {
            Ok(_) => Some(path),
            Err(err) => {
                debug!("ignoring unreadable command '{}': {err}", address.label());
                None
            }
        }
    }

    #[must_use]
    pub fn exists(&self, address: &CommandAddress) -> bool {
        self.validated_path(address).is_some()
    }

    /// Immediate children that are valid names and resolvable commands.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be read.
    pub fn children(&self, address: &CommandAddress) -> Result<Vec<CommandAddress>> {
        let names = list_names(&self.dir(address), |entry, name| {
            let is_dir = entry.file_type().at(&entry.path())?.is_dir();
            Ok(is_dir && is_valid_name(name))
        })?;
        let mut children = Vec::new();
        for name in names {
            let child = address.child(&name)?;
            if self.exists(&child) {
                children.push(child);
            }
        }
        children.sort();
        Ok(children)
    }

    /// # Errors
    ///
    /// [`Error::CommandNotFound`] when nothing is stored, [`Error::Parse`]
    /// when the stored file is corrupt.
    pub fn load(&self, address: &CommandAddress) -> Result<CommandConfig> {
        let path = self.path(address);
        if !path.is_file() {
            return Err(Error::CommandNotFound(address.clone()));
        }
        read_json(&path)
    }

    /// Write a single node. The parent must already exist.
    ///
    /// # Errors
    ///
    /// Fails when the parent is missing or the write fails.
    pub fn store(&self, address: &CommandAddress, config: &CommandConfig) -> Result<()> {
        self.require_parent(address)?;
        debug!("storing command '{}'", address.label());
        write_json(&self.path(address), config)
    }

    /// Replace everything at `address` with `tree`.
    ///
    /// The tree is written to a staging directory beside the target and then
    /// swapped in with renames.
    ///
    /// # Errors
    ///
    /// Fails when the parent is missing, a child name is invalid, or I/O fails.
    pub fn store_tree(&self, address: &CommandAddress, tree: &CommandConfigTree) -> Result<()> {
        self.require_parent(address)?;
        let target = self.dir(address);
        let holder = target.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(holder).at(holder)?;

        let staging = Builder::new()
            .prefix(".staging-")
            .tempdir_in(holder)
            .at(holder)?;
        write_tree(staging.path(), tree)?;

        if target.exists() {
            let replaced = Builder::new()
                .prefix(".replaced-")
                .tempdir_in(holder)
                .at(holder)?;
            let old = replaced.path().join(REPLACED_ENTRY);
            fs::rename(&target, &old).at(&target)?;
            swap_in(&staging.keep(), &target, replaced)?;
        } else {
            let staged = staging.keep();
            fs::rename(&staged, &target).at(&target)?;
        }
        info!("stored command tree at '{}'", address.label());
        Ok(())
    }

    /// Read the subtree rooted at `address`.
    ///
    /// The root may have no config of its own; it then exports as a parent.
    ///
    /// # Errors
    ///
    /// Fails when `address` (other than the root) does not exist.
    pub fn export_tree(&self, address: &CommandAddress) -> Result<CommandConfigTree> {
        let config = if address.is_root() && !self.path(address).is_file() {
            CommandConfig::parent("")
        } else {
            self.load(address)?
        };
        let mut tree = CommandConfigTree::leaf(config);
        for child in self.children(address)? {
            let name = child.name().unwrap_or_default().to_string();
            tree.children.insert(name, self.export_tree(&child)?);
        }
        Ok(tree)
    }

    /// Remove a command.
    ///
    /// Refuses when children exist unless `recursive`. The root's directory
    /// is never removed; only its own config file (and, recursively, its
    /// children) go away.
    ///
    /// # Errors
    ///
    /// [`Error::CommandHasChildren`], [`Error::CommandNotFound`] or I/O.
    pub fn delete(&self, address: &CommandAddress, recursive: bool) -> Result<()> {
        let children = self.children(address)?;
        if !children.is_empty() && !recursive {
            return Err(Error::CommandHasChildren {
                address: address.clone(),
                children: children.iter().map(ToString::to_string).collect(),
            });
        }

        if address.is_root() {
            for child in &children {
                let dir = self.dir(child);
                fs::remove_dir_all(&dir).at(&dir)?;
            }
            let path = self.path(address);
            if path.is_file() {
                fs::remove_file(&path).at(&path)?;
            }
            info!("cleared root command");
            return Ok(());
        }

        if !self.path(address).is_file() {
            return Err(Error::CommandNotFound(address.clone()));
        }
        let dir = self.dir(address);
        fs::remove_dir_all(&dir).at(&dir)?;
        info!("deleted command '{}'", address.label());
        Ok(())
    }

    /// Move a subtree with a single directory rename.
    ///
    /// # Errors
    ///
    /// Fails when the source is missing, the destination exists, either is
    /// the root, or the destination lies inside the source.
    pub fn move_command(&self, from: &CommandAddress, to: &CommandAddress) -> Result<()> {
        if from.is_root() || to.is_root() {
            return Err(Error::RootCommand { action: "move" });
        }
        if to.starts_with(from) {
            return Err(Error::MoveIntoSubtree {
                from: from.clone(),
                to: to.clone(),
            });
        }
        if !self.exists(from) {
            return Err(Error::CommandNotFound(from.clone()));
        }
        let dest = self.dir(to);
        if dest.exists() {
            return Err(Error::CommandExists(to.clone()));
        }
        self.require_parent(to)?;
        let src = self.dir(from);
        fs::rename(&src, &dest).at(&src)?;
        info!("moved command '{}' to '{}'", from.label(), to.label());
        Ok(())
    }

    fn require_parent(&self, address: &CommandAddress) -> Result<()> {
        match address.parent() {
            Some(parent) if !parent.is_root() && !self.exists(&parent) => {
                Err(Error::CommandNotFound(parent))
            }
            _ => Ok(()),
        }
    }
}

fn write_tree(dir: &Path, tree: &CommandConfigTree) -> Result<()> {
    write_json(&dir.join(COMMAND_FILE), &tree.config)?;
    for (name, child) in &tree.children {
        if !is_valid_name(name) {
            return Err(Error::InvalidName(name.clone()));
        }
        write_tree(&dir.join(name), child)?;
    }
    Ok(())
}

/// Rename `staged` onto `target`, whose previous content sits in
/// `replaced`. On failure the previous content goes back to `target`; if
/// even that fails, `replaced` is kept on disk and named in the error.
fn swap_in(staged: &Path, target: &Path, replaced: TempDir) -> Result<()> {
    let Err(source) = fs::rename(staged, target) else {
        return Ok(());
    };
    if let Err(e) = fs::remove_dir_all(staged) {
        debug!("leaving staged tree {}: {e}", staged.display());
    }
    let old = replaced.path().join(REPLACED_ENTRY);
    if let Err(restore) = fs::rename(&old, target) {
        let kept = replaced.keep().join(REPLACED_ENTRY);
        return Err(Error::TreeRestore {
            target: target.to_path_buf(),
            kept,
            source: restore,
        });
    }
    Err(Error::Io {
        path: target.to_path_buf(),
        source,
    })
}
