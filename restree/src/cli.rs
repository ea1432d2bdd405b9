//! Command-line shapes for each command variant, built at runtime from
//! stored configuration, and binding of parsed values to variables.

use std::collections::BTreeMap;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};

use crate::config::ParameterListConfig;
use crate::render::Value;
use crate::request::Bindings;
use crate::OutputFormat;

pub const ARG_ARGS: &str = "args";
pub const ARG_HELP: &str = "help";
pub const ARG_FORMAT: &str = "format";
pub const ARG_TEMPLATE: &str = "template";
pub const ARG_OUTPUT_PARAM: &str = "output-param";
pub const ARG_ENV: &str = "env";
pub const ARG_ROOT_DIR: &str = "root-dir";
pub const ARG_VERBOSE: &str = "verbose";

/// FIXME: Memory leak for 'static lifetime requirement
///
/// Clap's builder API takes `'static` strings for command and argument ids.
/// Shapes are built from configuration read at runtime, once per invocation
/// level, so the leaked strings are few and live until the process exits.
fn leak_str<S: Into<String>>(s: S) -> &'static str {
    Box::leak(s.into().into_boxed_str())
}

/// Shape of an http command: exactly its declared parameters.
#[must_use]
pub fn parameter_shape(name: &str, about: &str, params: &ParameterListConfig) -> Command {
    let mut cmd = Command::new(leak_str(name)).no_binary_name(true);
    if !about.is_empty() {
        cmd = cmd.about(leak_str(about));
    }

    let mut pos_index: usize = 1;
    for p in params.iter() {
        let mut a = Arg::new(leak_str(p.variable.clone()));
        if let Some(help) = &p.description {
            a = a.help(leak_str(help.clone()));
        }

        if p.style.is_option() {
            let mut longs = p.names.iter().filter_map(|n| n.strip_prefix("--"));
            let mut shorts = p
                .names
                .iter()
                .filter(|n| !n.starts_with("--"))
                .filter_map(|n| n.chars().nth(1));
            if let Some(l) = longs.next() {
                a = a.long(leak_str(l));
            }
            for l in longs {
                a = a.visible_alias(leak_str(l));
            }
            if let Some(s) = shorts.next() {
                a = a.short(s);
            }
            for s in shorts {
                a = a.visible_short_alias(s);
            }
            a = a.num_args(1);
            a = if p.style.is_repeatable() {
                a.action(ArgAction::Append)
            } else {
                a.action(ArgAction::Set)
            };
        } else {
            a = a.index(pos_index).required(p.style.is_required());
            pos_index += 1;
            a = if p.style.is_repeatable() {
                a.num_args(1..).action(ArgAction::Append)
            } else {
                a.num_args(1)
            };
        }
        cmd = cmd.arg(a);
    }
    cmd
}

fn help_flag() -> Arg {
    Arg::new(ARG_HELP)
        .short('h')
        .long("help")
        .help("Print help")
        .action(ArgAction::SetTrue)
}

/// One positional collecting everything from the first value on. After the
/// first value the parser stops recognising flags.
fn trailing_arg() -> Arg {
    Arg::new(ARG_ARGS).num_args(1..).trailing_var_arg(true)
}

/// Shape of a parent: an optional sub-command name and raw trailing args.
///
/// Help is handled by the caller so it can list stored children.
#[must_use]
pub fn parent_shape(name: &str, about: &str) -> Command {
    let mut cmd = Command::new(leak_str(name))
        .no_binary_name(true)
        .disable_help_flag(true)
        .arg(help_flag())
        .arg(trailing_arg().index(1).value_name("COMMAND"));
    if !about.is_empty() {
        cmd = cmd.about(leak_str(about));
    }
    cmd
}

/// Shape of an alias: every argument, verbatim.
#[must_use]
pub fn alias_shape(name: &str) -> Command {
    Command::new(leak_str(name))
        .no_binary_name(true)
        .disable_help_flag(true)
        .arg(trailing_arg().index(1).allow_hyphen_values(true))
}

fn output_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new(ARG_FORMAT)
            .long("format")
            .short('f')
            .help("Output format")
            .num_args(1)
            .value_parser(value_parser!(OutputFormat)),
    )
    .arg(
        Arg::new(ARG_TEMPLATE)
            .long("template")
            .short('t')
            .help("Output template name")
            .num_args(1),
    )
    .arg(
        Arg::new(ARG_OUTPUT_PARAM)
            .long("output-param")
            .short('o')
            .help("Output template parameter as key=value (repeatable)")
            .num_args(1)
            .action(ArgAction::Append)
            .value_parser(parse_output_param),
    )
}

/// What a stored alias expands to: output options, a target address and
/// the arguments handed to it.
#[must_use]
pub fn alias_meta_shape() -> Command {
    output_args(Command::new("alias").no_binary_name(true).disable_help_flag(true))
        .arg(trailing_arg().index(1).required(true).value_name("COMMAND"))
}

/// Top-level shape: global options followed by the root parent shape.
#[must_use]
pub fn root_shape() -> Command {
    output_args(
        parent_shape("restree", "Run configured HTTP commands")
            .version(env!("CARGO_PKG_VERSION")),
    )
    .arg(
        Arg::new(ARG_ENV)
            .long("env")
            .short('e')
            .help("Environment to use for this invocation")
            .num_args(1),
    )
    .arg(
        Arg::new(ARG_ROOT_DIR)
            .long("root-dir")
            .help("Configuration directory")
            .num_args(1),
    )
    .arg(
        Arg::new(ARG_VERBOSE)
            .long("verbose")
            .short('v')
            .help("Verbose output")
            .action(ArgAction::SetTrue),
    )
}

fn parse_output_param(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got '{s}'")),
    }
}

/// Raw trailing arguments, verbatim.
#[must_use]
pub fn trailing_args(matches: &ArgMatches) -> Vec<String> {
    matches
        .get_many::<String>(ARG_ARGS)
        .map(|vals| vals.cloned().collect())
        .unwrap_or_default()
}

/// The sub-command name (first trailing value) and the arguments after it.
#[must_use]
pub fn split_command(matches: &ArgMatches) -> (Option<String>, Vec<String>) {
    let mut args = trailing_args(matches);
    if args.is_empty() {
        return (None, args);
    }
    let name = args.remove(0);
    (Some(name), args)
}

/// Bind parsed values: repeatable parameters to lists, others to text.
/// Parameters not given stay unbound.
#[must_use]
pub fn bind_variables(params: &ParameterListConfig, leaf: &ArgMatches) -> Bindings {
    let mut bindings = Bindings::new(params);
    for p in params.iter() {
        if p.style.is_repeatable() {
            if let Some(vals) = leaf.get_many::<String>(&p.variable) {
                bindings.bind(&p.variable, Value::List(vals.cloned().collect()));
            }
        } else if let Some(val) = leaf.get_one::<String>(&p.variable) {
            bindings.bind(&p.variable, Value::Text(val.clone()));
        }
    }
    bindings
}

/// Output settings carried through a dispatch, possibly rewritten by aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputOptions {
    pub format: Option<OutputFormat>,
    pub template: Option<String>,
    pub params: Vec<(String, String)>,
}

impl OutputOptions {
    #[must_use]
    pub fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            format: matches.get_one::<OutputFormat>(ARG_FORMAT).copied(),
            template: matches.get_one::<String>(ARG_TEMPLATE).cloned(),
            params: matches
                .get_many::<(String, String)>(ARG_OUTPUT_PARAM)
                .map(|vals| vals.cloned().collect())
                .unwrap_or_default(),
        }
    }

    /// Merge an alias's own options (`self`) with its caller's.
    ///
    /// Format and template come from the caller only when the alias set
    /// neither. Parameters are the caller's followed by the alias's, keeping
    /// the last occurrence of each key.
    #[must_use]
    pub fn inherit_from(self, caller: &OutputOptions) -> Self {
        let (format, template) = if self.format.is_none() && self.template.is_none() {
            (caller.format, caller.template.clone())
        } else {
            (self.format, self.template)
        };
        let mut params: Vec<(String, String)> = Vec::new();
        for (k, v) in caller.params.iter().chain(self.params.iter()) {
            params.retain(|(seen, _)| seen != k);
            params.push((k.clone(), v.clone()));
        }
        Self {
            format,
            template,
            params,
        }
    }

    #[must_use]
    pub fn format(&self) -> OutputFormat {
        self.format.unwrap_or_default()
    }

    /// Parameters as a map; later entries win.
    #[must_use]
    pub fn param_map(&self) -> BTreeMap<String, String> {
        self.params.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ParameterConfig, ParameterStyle};
    use clap::error::ErrorKind;

    fn params() -> ParameterListConfig {
        ParameterListConfig::new(vec![
            ParameterConfig::option("limit", ParameterStyle::SingleOption, &["-l", "--limit", "--max"]),
            ParameterConfig::option("tag", ParameterStyle::MultiOption, &["--tag"]),
            ParameterConfig::positional("id", ParameterStyle::RequiredPositional),
            ParameterConfig::positional("extra", ParameterStyle::OptionalMultiPositional),
        ])
        .unwrap()
    }

    fn opts(format: Option<OutputFormat>, template: Option<&str>, params: &[(&str, &str)]) -> OutputOptions {
        OutputOptions {
            format,
            template: template.map(str::to_string),
            params: params
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    // ==================== leak_str tests ====================

    #[test]
    fn test_leak_str_from_string() {
        let s: &'static str = leak_str(String::from("owned"));
        assert_eq!(s, "owned");
    }

    // ==================== parameter shape tests ====================

    #[test]
    fn test_parameter_shape_binds_all_styles() {
        let list = params();
        let m = parameter_shape("get", "Get an item", &list)
            .try_get_matches_from(["42", "--max", "5", "--tag", "a", "--tag", "b", "x", "y"])
            .unwrap();
        let b = bind_variables(&list, &m);
        assert_eq!(b.get("id"), Some(&Value::Text("42".to_string())));
        assert_eq!(b.get("limit"), Some(&Value::Text("5".to_string())));
        assert_eq!(
            b.get("tag"),
            Some(&Value::List(vec!["a".to_string(), "b".to_string()]))
        );
        assert_eq!(
            b.get("extra"),
            Some(&Value::List(vec!["x".to_string(), "y".to_string()]))
        );
    }

    #[test]
    fn test_parameter_shape_absent_stays_unbound() {
        let list = params();
        let m = parameter_shape("get", "", &list)
            .try_get_matches_from(["-l", "1", "9"])
            .unwrap();
        let b = bind_variables(&list, &m);
        assert!(b.is_declared("tag"));
        assert!(b.get("tag").is_none());
        assert!(b.get("extra").is_none());
        assert_eq!(b.get("limit"), Some(&Value::from("1")));
    }

    #[test]
    fn test_parameter_shape_missing_required() {
        let err = parameter_shape("get", "", &params())
            .try_get_matches_from(["--limit", "1"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_parameter_shape_help() {
        let err = parameter_shape("get", "", &params())
            .try_get_matches_from(["--help"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    }

    // ==================== parent and alias shape tests ====================

    #[test]
    fn test_parent_shape_splits_command_and_trailing() {
        let m = parent_shape("users", "")
            .try_get_matches_from(["get", "--help", "42", "--limit", "3", "-h"])
            .unwrap();
        let (name, rest) = split_command(&m);
        assert_eq!(name.as_deref(), Some("get"));
        assert_eq!(rest, vec!["--help", "42", "--limit", "3", "-h"]);
        assert!(!m.get_flag(ARG_HELP));
    }

    #[test]
    fn test_parent_shape_unknown_leading_flag() {
        let err = parent_shape("users", "")
            .try_get_matches_from(["--bogus"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_parent_shape_help_and_empty() {
        let m = parent_shape("users", "").try_get_matches_from(["-h"]).unwrap();
        assert!(m.get_flag(ARG_HELP));
        let m = parent_shape("users", "")
            .try_get_matches_from(Vec::<String>::new())
            .unwrap();
        assert_eq!(split_command(&m), (None, Vec::new()));
    }

    #[test]
    fn test_alias_shape_keeps_everything() {
        let m = alias_shape("short")
            .try_get_matches_from(["--format", "json", "-h", "x"])
            .unwrap();
        assert_eq!(trailing_args(&m), vec!["--format", "json", "-h", "x"]);
    }

    #[test]
    fn test_alias_meta_shape() {
        let m = alias_meta_shape()
            .try_get_matches_from([
                "-f", "raw", "-o", "a=1", "-o", "b=x=y", "users/get", "7", "--tag", "t",
            ])
            .unwrap();
        let options = OutputOptions::from_matches(&m);
        assert_eq!(options.format, Some(OutputFormat::Raw));
        assert_eq!(
            options.params,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "x=y".to_string())
            ]
        );
        let (target, rest) = split_command(&m);
        assert_eq!(target.as_deref(), Some("users/get"));
        assert_eq!(rest, vec!["7", "--tag", "t"]);
    }

    #[test]
    fn test_alias_meta_shape_requires_target() {
        let err = alias_meta_shape()
            .try_get_matches_from(["-f", "json"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_alias_meta_shape_rejects_bad_param() {
        let err = alias_meta_shape()
            .try_get_matches_from(["-o", "novalue", "x"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn test_root_shape_globals() {
        let m = root_shape()
            .try_get_matches_from(["--env", "dev", "-v", "--root-dir", "/tmp/r", "users", "get", "-v"])
            .unwrap();
        assert_eq!(m.get_one::<String>(ARG_ENV).unwrap(), "dev");
        assert!(m.get_flag(ARG_VERBOSE));
        assert_eq!(m.get_one::<String>(ARG_ROOT_DIR).unwrap(), "/tmp/r");
        assert_eq!(trailing_args(&m), vec!["users", "get", "-v"]);
    }

    // ==================== OutputOptions tests ====================

    #[test]
    fn test_inherit_when_alias_sets_neither() {
        let caller = opts(Some(OutputFormat::Json), Some("verbose"), &[]);
        let merged = opts(None, None, &[]).inherit_from(&caller);
        assert_eq!(merged.format, Some(OutputFormat::Json));
        assert_eq!(merged.template.as_deref(), Some("verbose"));
    }

    #[test]
    fn test_alias_format_blocks_caller_template() {
        let caller = opts(Some(OutputFormat::Json), Some("verbose"), &[]);
        let merged = opts(Some(OutputFormat::Raw), None, &[]).inherit_from(&caller);
        assert_eq!(merged.format, Some(OutputFormat::Raw));
        assert_eq!(merged.template, None);
    }

    #[test]
    fn test_params_dedup_keeps_last() {
        let caller = opts(None, None, &[("a", "0"), ("b", "2")]);
        let merged = opts(None, None, &[("a", "1"), ("c", "3")]).inherit_from(&caller);
        assert_eq!(
            merged.params,
            vec![
                ("b".to_string(), "2".to_string()),
                ("a".to_string(), "1".to_string()),
                ("c".to_string(), "3".to_string()),
            ]
        );
        assert_eq!(merged.param_map()["a"], "1");
        assert_eq!(merged.format(), OutputFormat::Template);
    }
}
