use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::debug;

use restree::command::DESCRIPTION_SECTION;
use restree::{
    BodyConfig, CommandAddress, CommandConfig, CommandConfigTree, CommandStore, Environment,
    ParameterConfig, ParameterListConfig, ParameterStyle, RestConfig, TemplateAddress,
    TemplateConfig, Workspace,
};

/// Manage the commands, environments and output templates used by restree.
#[derive(Parser, Debug)]
#[command(name = "restree-config", version, about)]
struct Cli {
    /// Configuration directory
    #[arg(long, global = true)]
    root_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stored commands
    Command {
        #[command(subcommand)]
        action: CommandAction,
    },

    /// Environments
    Env {
        #[command(subcommand)]
        action: EnvAction,
    },

    /// Output templates
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },
}

#[derive(Subcommand, Debug)]
enum CommandAction {
    /// List the commands under an address
    List {
        /// Command address, e.g. users/get; empty for the root
        #[arg(default_value = "")]
        address: String,

        /// Descend into every subtree
        #[arg(short, long)]
        recursive: bool,
    },

    /// Print a command's stored configuration
    Show { address: String },

    /// Create or replace an http command, or a parent with --parent
    Set(SetCommand),

    /// Create or replace an alias for another command
    Alias {
        address: String,

        /// One-line summary shown in help listings
        #[arg(long, default_value = "")]
        synopsis: String,

        /// Output options, target address and arguments, as typed after `restree`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        tokens: Vec<String>,
    },

    /// Delete a command
    Rm {
        address: String,

        /// Also delete its children
        #[arg(short, long)]
        recursive: bool,
    },

    /// Move a command and its subtree
    Mv { from: String, to: String },

    /// Replace a subtree from a YAML or JSON document ('-' reads stdin)
    Import { address: String, file: PathBuf },

    /// Print a subtree as JSON, or YAML with --yaml
    Export {
        #[arg(default_value = "")]
        address: String,

        #[arg(long)]
        yaml: bool,
    },
}

#[derive(Args, Debug)]
struct SetCommand {
    address: String,

    /// One-line summary shown in help listings
    #[arg(long, default_value = "")]
    synopsis: String,

    /// Longer text shown under the command's help
    #[arg(long)]
    description: Option<String>,

    /// Store a parent instead of an http command
    #[arg(long, conflicts_with_all = ["method", "uri"])]
    parent: bool,

    /// HTTP method
    #[arg(long, required_unless_present = "parent")]
    method: Option<String>,

    /// URI template, e.g. {base}/users/{id}
    #[arg(long, required_unless_present = "parent")]
    uri: Option<String>,

    /// Query parameter as key=value templates (repeatable)
    #[arg(long = "query", value_parser = parse_pair)]
    query: Vec<(String, String)>,

    /// Header as name=value template (repeatable)
    #[arg(long = "header", value_parser = parse_pair)]
    headers: Vec<(String, String)>,

    /// Parameter as variable:style[:name,...], e.g. limit:option:-l,--limit
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<ParameterConfig>,

    /// Literal body
    #[arg(long, conflicts_with_all = ["body_file", "body_var"])]
    body: Option<String>,

    /// Body read from this file when sending
    #[arg(long, conflicts_with = "body_var")]
    body_file: Option<String>,

    /// Body taken from this variable
    #[arg(long)]
    body_var: Option<String>,

    /// Render the body as a template before sending
    #[arg(long)]
    body_template: bool,
}

#[derive(Subcommand, Debug)]
enum EnvAction {
    /// List stored environments
    List,

    /// Print an environment's effective and local values
    Show { name: String },

    /// Set a variable, creating the environment if needed
    Set {
        name: String,
        key: String,
        value: String,
    },

    /// Remove a local variable
    Unset { name: String, key: String },

    /// Set a header's values; with no values the header is removed
    Header {
        name: String,
        header: String,
        values: Vec<String>,

        /// Append to the existing values instead of replacing them
        #[arg(long)]
        add: bool,
    },

    /// Set or clear the parent environment
    Parent { name: String, parent: Option<String> },

    /// Set or clear the request timeout in milliseconds
    Timeout { name: String, millis: Option<u64> },

    /// Rename an environment; children follow
    Rename { name: String, new_name: String },

    /// Delete an environment
    Rm {
        name: String,

        /// Move children to this environment's parent instead of refusing
        #[arg(short, long)]
        force: bool,
    },

    /// Make an environment the default for restree
    Use { name: String },
}

#[derive(Subcommand, Debug)]
enum TemplateAction {
    /// List the templates visible from a command address
    List {
        #[arg(default_value = "")]
        address: String,
    },

    /// Print a template, e.g. `verbose@users`
    Show { address: String },

    /// Create or replace a template
    Set {
        address: String,
        template: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Default parameter as key=value (repeatable)
        #[arg(long = "param", value_parser = parse_pair)]
        params: Vec<(String, String)>,
    },

    /// Delete a stored template
    Rm { address: String },
}

fn main() {
    if let Err(err) = real_main() {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

fn real_main() -> Result<()> {
    let cli = Cli::parse();
    restree_cli::init_tracing(cli.verbose);

    let root = restree_cli::resolve_root(cli.root_dir.as_deref())?;
    debug!("configuration root {}", root.display());
    let mut workspace = Workspace::open(&root)
        .with_context(|| format!("Failed to open configuration at {}", root.display()))?;

    match cli.command {
        Commands::Command { action } => run_command(&workspace, action),
        Commands::Env { action } => run_env(&mut workspace, action),
        Commands::Template { action } => run_template(&workspace, action),
    }
}

// =====================
// Commands
// =====================

fn run_command(workspace: &Workspace, action: CommandAction) -> Result<()> {
    let store = workspace.commands();
    match action {
        CommandAction::List { address, recursive } => {
            list_commands(store, &parse_address(&address)?, recursive)
        }
        CommandAction::Show { address } => {
            let config = store.load(&parse_address(&address)?)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        CommandAction::Set(args) => {
            let address = parse_address(&args.address)?;
            store.store(&address, &command_config(args)?)?;
            println!("Stored '{address}'");
            Ok(())
        }
        CommandAction::Alias {
            address,
            synopsis,
            tokens,
        } => {
            let address = parse_address(&address)?;
            store.store(&address, &CommandConfig::alias(&synopsis, tokens))?;
            println!("Stored alias '{address}'");
            Ok(())
        }
        CommandAction::Rm { address, recursive } => {
            let address = parse_address(&address)?;
            store.delete(&address, recursive)?;
            println!("Deleted '{}'", address.label());
            Ok(())
        }
        CommandAction::Mv { from, to } => {
            store.move_command(&parse_address(&from)?, &parse_address(&to)?)?;
            println!("Moved '{from}' to '{to}'");
            Ok(())
        }
        CommandAction::Import { address, file } => {
            let tree = read_tree(&file)?;
            store.store_tree(&parse_address(&address)?, &tree)?;
            println!("Imported {} into '{address}'", file.display());
            Ok(())
        }
        CommandAction::Export { address, yaml } => {
            let tree = store.export_tree(&parse_address(&address)?)?;
            if yaml {
                print!("{}", serde_yaml::to_string(&tree)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&tree)?);
            }
            Ok(())
        }
    }
}

fn list_commands(store: &CommandStore, address: &CommandAddress, recursive: bool) -> Result<()> {
    for child in store.children(address)? {
        let config = store.load(&child)?;
        println!("{:<32} {:<6} {}", child.to_string(), config.type_name(), config.synopsis);
        if recursive {
            list_commands(store, &child, true)?;
        }
    }
    Ok(())
}

fn command_config(args: SetCommand) -> Result<CommandConfig> {
    let mut config = if args.parent {
        CommandConfig::parent(&args.synopsis)
    } else {
        let (Some(method), Some(uri)) = (args.method, args.uri) else {
            bail!("--method and --uri are required for an http command");
        };
        let mut rest = RestConfig::new(&method, &uri);
        rest.query = args.query.into_iter().collect();
        for (name, value) in args.headers {
            rest.headers.entry(name).or_default().push(value);
        }
        rest.parameters = ParameterListConfig::new(args.params)?;
        let template = args.body_template;
        rest.body = match (args.body, args.body_file, args.body_var) {
            (Some(content), _, _) => Some(BodyConfig::Text { content, template }),
            (_, Some(path), _) => Some(BodyConfig::File { path, template }),
            (_, _, Some(name)) => Some(BodyConfig::Variable { name, template }),
            _ => None,
        };
        CommandConfig::http(&args.synopsis, rest)
    };
    if let Some(text) = &args.description {
        config = config.with_description(DESCRIPTION_SECTION, text);
    }
    Ok(config)
}

fn read_tree(file: &Path) -> Result<CommandConfigTree> {
    let text = if file == Path::new("-") {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        text
    } else {
        fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?
    };
    let is_json = file.extension().is_some_and(|ext| ext == "json");
    let tree = if is_json {
        serde_json::from_str(&text).context("Invalid command tree JSON")?
    } else {
        CommandConfigTree::from_yaml(&text)?
    };
    Ok(tree)
}

// =====================
// Environments
// =====================

fn run_env(workspace: &mut Workspace, action: EnvAction) -> Result<()> {
    let store = workspace.environments().clone();
    match action {
        EnvAction::List => {
            let current = &workspace.config().environment;
            for name in store.list()? {
                let marker = if &name == current { "*" } else { " " };
                println!("{marker} {name}");
            }
            Ok(())
        }
        EnvAction::Show { name } => {
            let env = store.require(&name)?;
            let document = serde_json::json!({
                "name": env.name(),
                "parent": env.parent(),
                "variables": env.variables(),
                "headers": env.headers(),
                "requestTimeout": env.request_timeout(),
                "local": env.local_config(),
            });
            println!("{}", serde_json::to_string_pretty(&document)?);
            Ok(())
        }
        EnvAction::Set { name, key, value } => {
            let mut env = load_or_create(&store, &name)?;
            env.set_variable(&key, &value);
            store.store_environment(&mut env)?;
            Ok(())
        }
        EnvAction::Unset { name, key } => {
            let mut env = store.require(&name)?;
            if !env.remove_variable(&key) {
                bail!("Environment '{name}' has no local variable '{key}'");
            }
            store.store_environment(&mut env)?;
            Ok(())
        }
        EnvAction::Header {
            name,
            header,
            values,
            add,
        } => {
            let mut env = load_or_create(&store, &name)?;
            if values.is_empty() {
                env.remove_header(&header);
            } else if add {
                for value in &values {
                    env.add_header_value(&header, value);
                }
            } else {
                env.set_header(&header, values);
            }
            store.store_environment(&mut env)?;
            Ok(())
        }
        EnvAction::Parent { name, parent } => {
            let mut env = load_or_create(&store, &name)?;
            store.reparent(&mut env, parent.as_deref())?;
            store.store_environment(&mut env)?;
            Ok(())
        }
        EnvAction::Timeout { name, millis } => {
            let mut env = load_or_create(&store, &name)?;
            env.set_request_timeout(millis);
            store.store_environment(&mut env)?;
            Ok(())
        }
        EnvAction::Rename { name, new_name } => {
            let mut env = store.require(&name)?;
            env.rename(&new_name)?;
            store.store_environment(&mut env)?;
            if workspace.config().environment == name {
                let mut config = workspace.config().clone();
                config.environment = new_name.clone();
                workspace.set_config(config)?;
            }
            println!("Renamed '{name}' to '{new_name}'");
            Ok(())
        }
        EnvAction::Rm { name, force } => {
            store.delete_environment(&name, force)?;
            println!("Deleted '{name}'");
            Ok(())
        }
        EnvAction::Use { name } => {
            store.require(&name)?;
            let mut config = workspace.config().clone();
            config.environment = name;
            workspace.set_config(config)?;
            Ok(())
        }
    }
}

fn load_or_create(store: &restree::EnvironmentStore, name: &str) -> Result<Environment> {
    match store.environment(name)? {
        Some(env) => Ok(env),
        None => Ok(Environment::create(name)?),
    }
}

// =====================
// Templates
// =====================

fn run_template(workspace: &Workspace, action: TemplateAction) -> Result<()> {
    let store = workspace.templates();
    match action {
        TemplateAction::List { address } => {
            for (name, at) in store.effective_templates(&parse_address(&address)?)? {
                let origin = if store.is_stored(&at) { "" } else { " (built in)" };
                println!("{name:<20} {at}{origin}");
            }
            Ok(())
        }
        TemplateAction::Show { address } => {
            let config = store.load(&parse_template_address(&address)?)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        TemplateAction::Set {
            address,
            template,
            description,
            params,
        } => {
            let at = parse_template_address(&address)?;
            let config = TemplateConfig {
                description,
                parameters: params.into_iter().collect(),
                template,
            };
            store.store(&at, &config)?;
            println!("Stored template '{at}'");
            Ok(())
        }
        TemplateAction::Rm { address } => {
            let at = parse_template_address(&address)?;
            store.delete(&at)?;
            println!("Deleted template '{at}'");
            Ok(())
        }
    }
}

// =====================
// Argument parsing helpers
// =====================

fn parse_address(s: &str) -> Result<CommandAddress> {
    s.parse()
        .with_context(|| format!("Invalid command address '{s}'"))
}

fn parse_template_address(s: &str) -> Result<TemplateAddress> {
    s.parse()
        .with_context(|| format!("Invalid template address '{s}'"))
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got '{s}'")),
    }
}

fn parse_param(s: &str) -> Result<ParameterConfig, String> {
    let mut parts = s.splitn(3, ':');
    let variable = parts.next().unwrap_or_default();
    let Some(style) = parts.next() else {
        return Err(format!("expected variable:style[:names], got '{s}'"));
    };
    let style = ParameterStyle::from_str(style, false)?;
    let names: Vec<&str> = parts
        .next()
        .map(|names| names.split(',').filter(|n| !n.is_empty()).collect())
        .unwrap_or_default();
    Ok(if style.is_option() {
        ParameterConfig::option(variable, style, &names)
    } else {
        ParameterConfig::positional(variable, style)
    })
}
