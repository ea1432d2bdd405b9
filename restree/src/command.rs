//! Stored commands and the dispatcher that walks them.
//!
//! A parent hands its trailing arguments to the named child, an alias
//! re-enters the dispatcher at its target, and an http command renders and
//! sends a request.

use std::ffi::OsString;
use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::ArgMatches;
use tracing::debug;

use crate::address::CommandAddress;
use crate::cli::{self, OutputOptions};
use crate::config::{CommandConfig, CommandKind, RestConfig, TemplateConfig};
use crate::error::{Error, IoContext, Result};
use crate::render::{PlaceholderRenderer, Renderer};
use crate::request::{RequestContext, RequestTemplate};
use crate::response::{Composite, IsSuccess, RenderOutput, RequestLine, ResponseHandler};
use crate::transport::Transport;
use crate::workspace::Workspace;
use crate::OutputFormat;

pub const PROGRAM_NAME: &str = "restree";

/// Help section printed under a command's usage.
pub const DESCRIPTION_SECTION: &str = "description";

/// A stored command bound to its address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    address: CommandAddress,
    config: CommandConfig,
}

impl Command {
    #[must_use]
    pub fn new(address: CommandAddress, config: CommandConfig) -> Self {
        Self { address, config }
    }

    #[must_use]
    pub fn address(&self) -> &CommandAddress {
        &self.address
    }

    #[must_use]
    pub fn config(&self) -> &CommandConfig {
        &self.config
    }

    #[must_use]
    pub fn synopsis(&self) -> &str {
        &self.config.synopsis
    }

    #[must_use]
    pub fn help_section(&self, section: &str) -> &str {
        self.config.help_section(section)
    }

    /// Program name followed by the address segments, e.g. `restree users get`.
    #[must_use]
    pub fn display_path(&self) -> String {
        std::iter::once(PROGRAM_NAME)
            .chain(self.address.segments().iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The command-line shape for this command's variant.
    #[must_use]
    pub fn shape(&self) -> clap::Command {
        let name = self.address.name().unwrap_or(PROGRAM_NAME);
        let shape = match &self.config.kind {
            CommandKind::Parent => cli::parent_shape(name, &self.config.synopsis),
            CommandKind::Alias { .. } => cli::alias_shape(name),
            CommandKind::Http { rest_config } => {
                cli::parameter_shape(name, &self.config.synopsis, &rest_config.parameters)
            }
        };
        shape.bin_name(self.display_path())
    }
}

/// State carried from the top-level parse through every dispatch.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub options: OutputOptions,
    /// Environment chosen on the command line, overriding the configured one.
    pub environment: Option<String>,
    /// Aliases entered so far, outermost first.
    pub alias_chain: Vec<CommandAddress>,
}

pub struct Dispatcher<'w> {
    workspace: &'w Workspace,
    transport: &'w dyn Transport,
    renderer: Arc<dyn Renderer>,
}

impl<'w> Dispatcher<'w> {
    #[must_use]
    pub fn new(workspace: &'w Workspace, transport: &'w dyn Transport) -> Self {
        Self {
            workspace,
            transport,
            renderer: Arc::new(PlaceholderRenderer),
        }
    }

    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Parse `args` (without the binary name) and run the addressed command.
    ///
    /// Returns whether the command succeeded; for http commands that is
    /// whether the status was 2xx.
    ///
    /// # Errors
    ///
    /// [`Error::Usage`] for bad arguments at any level; otherwise the first
    /// failure while resolving, rendering, sending or writing.
    pub fn run<I, T>(&self, args: I, out: &mut dyn Write) -> Result<bool>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = cli::root_shape().try_get_matches_from(args)?;
        self.run_matches(&matches, out)
    }

    /// Run from matches already parsed against [`cli::root_shape`].
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::run`].
    pub fn run_matches(&self, matches: &ArgMatches, out: &mut dyn Write) -> Result<bool> {
        let mut inv = Invocation {
            options: OutputOptions::from_matches(matches),
            environment: matches.get_one::<String>(cli::ARG_ENV).cloned(),
            alias_chain: Vec::new(),
        };
        let root = self.resolve(&CommandAddress::root())?;
        self.descend(&root, matches, &mut inv, out)
    }

    /// Load the command at `address`. The root always resolves; without a
    /// stored config it is a bare parent.
    ///
    /// # Errors
    ///
    /// [`Error::CommandNotFound`] when nothing is stored there.
    pub fn resolve(&self, address: &CommandAddress) -> Result<Command> {
        let commands = self.workspace.commands();
        if address.is_root() && !commands.exists(address) {
            return Ok(Command::new(address.clone(), CommandConfig::parent("")));
        }
        Ok(Command::new(address.clone(), commands.load(address)?))
    }

    /// Parse `args` against the shape of the command at `address` and run it.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::run`].
    pub fn dispatch(
        &self,
        address: &CommandAddress,
        args: Vec<String>,
        inv: &mut Invocation,
        out: &mut dyn Write,
    ) -> Result<bool> {
        let cmd = self.resolve(address)?;
        debug!("dispatching {} command '{}'", cmd.config().type_name(), address.label());
        let matches = cmd.shape().try_get_matches_from(args)?;
        match &cmd.config().kind {
            CommandKind::Parent => self.descend(&cmd, &matches, inv, out),
            CommandKind::Alias { alias_config } => {
                self.run_alias(&cmd, alias_config, &matches, inv, out)
            }
            CommandKind::Http { rest_config } => {
                self.run_http(&cmd, rest_config, &matches, inv, out)
            }
        }
    }

    fn descend(
        &self,
        cmd: &Command,
        matches: &ArgMatches,
        inv: &mut Invocation,
        out: &mut dyn Write,
    ) -> Result<bool> {
        match cli::split_command(matches) {
            (Some(name), rest) if !matches.get_flag(cli::ARG_HELP) => {
                let child = cmd.address().child(&name)?;
                self.dispatch(&child, rest, inv, out)
            }
            _ => {
                self.write_help(cmd, out)?;
                Ok(true)
            }
        }
    }

    fn run_alias(
        &self,
        cmd: &Command,
        tokens: &[String],
        matches: &ArgMatches,
        inv: &mut Invocation,
        out: &mut dyn Write,
    ) -> Result<bool> {
        let limit = self.workspace.config().max_alias_depth;
        if inv.alias_chain.len() >= limit {
            let chain = inv
                .alias_chain
                .iter()
                .chain(std::iter::once(cmd.address()))
                .map(CommandAddress::label)
                .collect();
            return Err(Error::AliasDepthExceeded { limit, chain });
        }

        let mut argv = tokens.to_vec();
        argv.extend(cli::trailing_args(matches));
        let meta = cli::alias_meta_shape().try_get_matches_from(argv)?;
        let options = OutputOptions::from_matches(&meta).inherit_from(&inv.options);
        let (target, rest) = cli::split_command(&meta);
        let target: CommandAddress = target.unwrap_or_default().parse()?;
        debug!("alias '{}' -> '{}'", cmd.address().label(), target.label());

        let caller = std::mem::replace(&mut inv.options, options);
        inv.alias_chain.push(cmd.address().clone());
        let result = self.dispatch(&target, rest, inv, out);
        inv.alias_chain.pop();
        inv.options = caller;
        result
    }

    fn run_http(
        &self,
        cmd: &Command,
        rest: &RestConfig,
        matches: &ArgMatches,
        inv: &Invocation,
        out: &mut dyn Write,
    ) -> Result<bool> {
        let app = self.workspace.config();
        let bindings = cli::bind_variables(&rest.parameters, matches);
        let environment = self
            .workspace
            .active_environment(inv.environment.as_deref())?;

        let format = inv.options.format();
        let (template, params) = if format == OutputFormat::Template {
            let name = inv
                .options
                .template
                .as_deref()
                .unwrap_or(app.default_template.as_str());
            let (address, config) = self.workspace.templates().resolve(cmd.address(), name)?;
            debug!("output template '{address}'");
            let mut params = config.parameters.clone();
            params.extend(inv.options.param_map());
            (config, params)
        } else {
            (TemplateConfig::default(), inv.options.param_map())
        };

        let request_template = RequestTemplate::from_config(
            rest,
            &environment,
            Duration::from_millis(app.request_timeout),
        );
        let ctx = RequestContext::new(&environment, &bindings);
        let request = request_template.render(self.renderer.as_ref(), &ctx)?;
        let line = RequestLine {
            method: request.method.to_string(),
            uri: request.uri.clone(),
        };

        let mut response = self.transport.execute(request)?;
        let handler = Composite::new(IsSuccess).before(RenderOutput::new(
            format,
            Arc::clone(&self.renderer),
            template,
            params,
            environment.variables().clone(),
            line,
            app.output_width,
            &mut *out,
        ));
        handler.handle(&mut response)
    }

    /// Usage and options for `cmd`, its stored children with their synopses,
    /// then its description.
    ///
    /// # Errors
    ///
    /// Fails when a child cannot be loaded or `out` cannot be written.
    pub fn write_help(&self, cmd: &Command, out: &mut dyn Write) -> Result<()> {
        let mut shape = if cmd.address().is_root() {
            cli::root_shape()
        } else {
            cmd.shape()
        };
        let mut text = shape.render_help().to_string();

        let commands = self.workspace.commands();
        let mut entries = Vec::new();
        for child in commands.children(cmd.address())? {
            let config = commands.load(&child)?;
            let name = child.name().unwrap_or_default().to_string();
            entries.push((name, config.synopsis));
        }
        if !entries.is_empty() {
            let width = entries.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
            text.push_str("\nCommands:\n");
            for (name, synopsis) in &entries {
                let _ = writeln!(text, "  {name:<width$}  {synopsis}");
            }
        }

        text.push_str("\nDescription:\n  ");
        text.push_str(cmd.help_section(DESCRIPTION_SECTION));
        text.push('\n');

        out.write_all(text.as_bytes()).at(Path::new("<output>"))
    }
}
