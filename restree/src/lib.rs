//! restree: a command line whose commands are stored as a tree of JSON
//! files. Each node is a parent, an alias of another command or an HTTP
//! request template; environments supply variables and headers through
//! single-parent inheritance, and output templates are scoped to subtrees.

pub mod address;
pub mod categorizer;
pub mod cli;
pub mod command;
pub mod config;
pub mod environment;
pub mod error;
pub mod render;
pub mod request;
pub mod response;
pub mod store;
pub mod transport;
pub mod workspace;

pub use address::CommandAddress;
pub use command::{Command, Dispatcher, Invocation};
pub use config::{
    ApplicationConfig, BodyConfig, CommandConfig, CommandConfigTree, CommandKind, Defaults,
    EnvironmentConfig, ParameterConfig, ParameterListConfig, ParameterStyle, RestConfig,
    TemplateConfig, DEFAULTS,
};
pub use environment::{Environment, EMPTY_ENVIRONMENT};
pub use error::{Error, Result};
pub use store::{CommandStore, EnvironmentStore, TemplateAddress, TemplateStore};
pub use transport::{HttpTransport, Transport};
pub use workspace::Workspace;

// Re-export for binaries that need the HTTP types.
pub use reqwest;

// =====================
// Public API
// =====================

/// How a response is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Rendered through an output template.
    #[default]
    Template,
    /// Status, headers and body as a JSON document.
    Json,
    /// Body bytes, unchanged.
    Raw,
    /// Nothing; only the exit status reports the outcome.
    Quiet,
}
