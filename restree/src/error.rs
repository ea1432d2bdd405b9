//! Error handling for restree.

use std::io;
use std::path::{Path, PathBuf};

use crate::address::CommandAddress;

/// The error type for every restree operation.
///
/// Usage errors come from the command-line parser and are carried unchanged;
/// every other variant is an execution error naming the offending address,
/// name or path.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad or missing command-line arguments, as reported by clap.
    #[error(transparent)]
    Usage(#[from] clap::Error),

    #[error("invalid name '{0}': expected one or more of A-Z, a-z, 0-9, '_' or '-'")]
    InvalidName(String),

    #[error("invalid template address '{0}': expected <name>@<command>")]
    InvalidTemplateAddress(String),

    #[error("no such command: '{}'", .0.label())]
    CommandNotFound(CommandAddress),

    #[error("command '{}' already exists", .0.label())]
    CommandExists(CommandAddress),

    #[error("command '{}' has children ({}); delete recursively to remove them", .address.label(), .children.join(", "))]
    CommandHasChildren {
        address: CommandAddress,
        children: Vec<String>,
    },

    #[error("cannot {action} the root command")]
    RootCommand { action: &'static str },

    #[error("cannot move '{}' into its own subtree '{}'", .from.label(), .to.label())]
    MoveIntoSubtree {
        from: CommandAddress,
        to: CommandAddress,
    },

    #[error("no such environment: '{name}'{}", traversal_suffix(.path))]
    EnvironmentNotFound { name: String, path: Vec<String> },

    #[error("environment inheritance cycle: {}", .path.join(" -> "))]
    EnvironmentCycle { path: Vec<String> },

    #[error("environment '{0}' already exists")]
    EnvironmentExists(String),

    #[error("environment '{name}' is the parent of {}; force the delete to reparent them", .children.join(", "))]
    EnvironmentInUse { name: String, children: Vec<String> },

    #[error("environment name '{0}' is reserved")]
    ReservedEnvironment(String),

    #[error("no template '{name}' visible from command '{}'", .command.label())]
    TemplateNotFound {
        name: String,
        command: CommandAddress,
    },

    /// A parameter list that cannot be turned into a command-line shape.
    #[error("invalid parameter configuration: {0}")]
    Parameter(String),

    #[error("alias chain exceeds the maximum depth of {limit}: {}", .chain.join(" -> "))]
    AliasDepthExceeded { limit: usize, chain: Vec<String> },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to initialise the HTTP client")]
    Client(#[source] reqwest::Error),

    #[error("HTTP request to {uri} failed")]
    Http {
        uri: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("I/O error on {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The previous subtree could not be put back after a failed swap.
    #[error("failed to restore {}; the previous tree was kept at {}", .target.display(), .kept.display())]
    TreeRestore {
        target: PathBuf,
        kept: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("response body is unavailable after an earlier read failure: {0}")]
    BodyUnavailable(String),

    #[error("failed to parse {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {what}")]
    Encode {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read command tree document")]
    Yaml(#[from] serde_yaml::Error),
}

fn traversal_suffix(path: &[String]) -> String {
    if path.len() > 1 {
        format!(" (while resolving {})", path.join(" -> "))
    } else {
        String::new()
    }
}

/// A Result type alias for restree operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Attach the offending path to a raw I/O failure.
pub(crate) trait IoContext<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
