//! Persisted configuration model: command nodes, parameters, environments,
//! output templates and the application settings.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::address::is_identifier;
use crate::error::{Error, Result};

/// Help text used when a command stores no description for a section.
pub const DEFAULT_DESCRIPTION: &str = "No description available.";

// =====================
// Command nodes
// =====================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    #[serde(flatten)]
    pub kind: CommandKind,
    #[serde(default)]
    pub synopsis: String,
    /// Help section name -> text.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub descriptions: BTreeMap<String, String>,
}

/// Variant payloads; the `type` tag selects which one is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CommandKind {
    Parent,
    Alias {
        #[serde(rename = "aliasConfig")]
        alias_config: Vec<String>,
    },
    Http {
        #[serde(rename = "restConfig")]
        rest_config: RestConfig,
    },
}

impl CommandConfig {
    #[must_use]
    pub fn parent(synopsis: &str) -> Self {
        Self {
            kind: CommandKind::Parent,
            synopsis: synopsis.to_string(),
            descriptions: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn alias(synopsis: &str, tokens: Vec<String>) -> Self {
        Self {
            kind: CommandKind::Alias {
                alias_config: tokens,
            },
            synopsis: synopsis.to_string(),
            descriptions: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn http(synopsis: &str, rest_config: RestConfig) -> Self {
        Self {
            kind: CommandKind::Http { rest_config },
            synopsis: synopsis.to_string(),
            descriptions: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, section: &str, text: &str) -> Self {
        self.descriptions
            .insert(section.to_string(), text.to_string());
        self
    }

    /// Stored text for a help section, or [`DEFAULT_DESCRIPTION`].
    #[must_use]
    pub fn help_section(&self, section: &str) -> &str {
        self.descriptions
            .get(section)
            .map_or(DEFAULT_DESCRIPTION, String::as_str)
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            CommandKind::Parent => "parent",
            CommandKind::Alias { .. } => "alias",
            CommandKind::Http { .. } => "http",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestConfig {
    pub method: String,
    /// Base URI template, e.g. `https://{host}/users/{id}`.
    pub uri: String,
    /// Query key template -> value template.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, String>,
    /// Header name -> ordered value templates.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "ParameterListConfig::is_empty")]
    pub parameters: ParameterListConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<BodyConfig>,
}

impl RestConfig {
    #[must_use]
    pub fn new(method: &str, uri: &str) -> Self {
        Self {
            method: method.to_string(),
            uri: uri.to_string(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            parameters: ParameterListConfig::default(),
            body: None,
        }
    }
}

/// Where a request body comes from. `template` renders it before sending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BodyConfig {
    Text {
        content: String,
        #[serde(default)]
        template: bool,
    },
    File {
        path: String,
        #[serde(default)]
        template: bool,
    },
    /// Body is the current string value of a declared variable.
    Variable {
        name: String,
        #[serde(default)]
        template: bool,
    },
}

/// A node of a command subtree, used for bulk import and export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfigTree {
    pub config: CommandConfig,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, CommandConfigTree>,
}

impl CommandConfigTree {
    #[must_use]
    pub fn leaf(config: CommandConfig) -> Self {
        Self {
            config,
            children: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_child(mut self, name: &str, child: CommandConfigTree) -> Self {
        self.children.insert(name.to_string(), child);
        self
    }

    /// Parse an import document. JSON is accepted too, being valid YAML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Yaml`] when the document does not describe a tree.
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }
}

// =====================
// Parameters
// =====================

/// The command-line shape a parameter takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ParameterStyle {
    #[serde(rename = "option")]
    #[value(name = "option")]
    SingleOption,
    MultiOption,
    RequiredPositional,
    OptionalPositional,
    OptionalMultiPositional,
    RequiredMultiPositional,
}

impl ParameterStyle {
    #[must_use]
    pub fn is_option(self) -> bool {
        matches!(self, Self::SingleOption | Self::MultiOption)
    }

    #[must_use]
    pub fn is_repeatable(self) -> bool {
        matches!(
            self,
            Self::MultiOption | Self::OptionalMultiPositional | Self::RequiredMultiPositional
        )
    }

    #[must_use]
    pub fn is_required(self) -> bool {
        matches!(
            self,
            Self::RequiredPositional | Self::RequiredMultiPositional
        )
    }
}

/// Binds one command-line argument shape to a template variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterConfig {
    pub variable: String,
    pub style: ParameterStyle,
    /// Option spellings such as `-l` and `--limit`; empty for positionals.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParameterConfig {
    #[must_use]
    pub fn positional(variable: &str, style: ParameterStyle) -> Self {
        Self {
            variable: variable.to_string(),
            style,
            names: Vec::new(),
            description: None,
        }
    }

    #[must_use]
    pub fn option(variable: &str, style: ParameterStyle, names: &[&str]) -> Self {
        Self {
            variable: variable.to_string(),
            style,
            names: names.iter().map(|n| (*n).to_string()).collect(),
            description: None,
        }
    }

    #[must_use]
    pub fn described(mut self, text: &str) -> Self {
        self.description = Some(text.to_string());
        self
    }
}

/// An ordered, validated list of parameters.
///
/// Construction (including deserialization) rejects duplicate variables and
/// shapes that no parser could honor.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<ParameterConfig>", into = "Vec<ParameterConfig>")]
pub struct ParameterListConfig {
    parameters: Vec<ParameterConfig>,
}

impl ParameterListConfig {
    /// # Errors
    ///
    /// Returns [`Error::Parameter`] describing the first violation found.
    pub fn new(parameters: Vec<ParameterConfig>) -> Result<Self> {
        let mut variables = HashSet::new();
        let mut option_names = HashSet::new();
        let mut seen_optional_positional = false;
        let mut seen_multi_positional = false;

        for p in &parameters {
            if !is_identifier(&p.variable) || p.variable == "help" {
                return Err(Error::Parameter(format!(
                    "'{}' is not a usable variable name",
                    p.variable
                )));
            }
            if !variables.insert(p.variable.as_str()) {
                return Err(Error::Parameter(format!(
                    "variable '{}' is bound more than once",
                    p.variable
                )));
            }
            if p.style.is_option() {
                if p.names.is_empty() {
                    return Err(Error::Parameter(format!(
                        "option for '{}' declares no names",
                        p.variable
                    )));
                }
                for name in &p.names {
                    validate_option_name(name)?;
                    if !option_names.insert(name.as_str()) {
                        return Err(Error::Parameter(format!(
                            "option name '{name}' is used more than once"
                        )));
                    }
                }
                continue;
            }

            if !p.names.is_empty() {
                return Err(Error::Parameter(format!(
                    "positional '{}' cannot declare option names",
                    p.variable
                )));
            }
            if seen_multi_positional {
                return Err(Error::Parameter(format!(
                    "positional '{}' follows a repeatable positional",
                    p.variable
                )));
            }
            if p.style.is_required() && seen_optional_positional {
                return Err(Error::Parameter(format!(
                    "required positional '{}' follows an optional one",
                    p.variable
                )));
            }
            if !p.style.is_required() {
                seen_optional_positional = true;
            }
            if p.style.is_repeatable() {
                seen_multi_positional = true;
            }
        }
        Ok(Self { parameters })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterConfig> {
        self.parameters.iter()
    }

    #[must_use]
    pub fn get(&self, variable: &str) -> Option<&ParameterConfig> {
        self.parameters.iter().find(|p| p.variable == variable)
    }

    #[must_use]
    pub fn declares(&self, variable: &str) -> bool {
        self.get(variable).is_some()
    }
}

impl TryFrom<Vec<ParameterConfig>> for ParameterListConfig {
    type Error = Error;

    fn try_from(parameters: Vec<ParameterConfig>) -> Result<Self> {
        Self::new(parameters)
    }
}

impl From<ParameterListConfig> for Vec<ParameterConfig> {
    fn from(list: ParameterListConfig) -> Self {
        list.parameters
    }
}

fn validate_option_name(name: &str) -> Result<()> {
    let valid = match name.strip_prefix("--") {
        Some(long) => {
            long.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
                && long
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
                && long != "help"
        }
        None => {
            let mut chars = name.chars();
            chars.next() == Some('-')
                && chars.next().is_some_and(|c| c.is_ascii_alphanumeric() && c != 'h')
                && chars.next().is_none()
        }
    };
    if valid {
        Ok(())
    } else {
        Err(Error::Parameter(format!("'{name}' is not a usable option name")))
    }
}

// =====================
// Environments and templates
// =====================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,
    /// Milliseconds.
    #[serde(default)]
    pub request_timeout: Option<u64>,
}

impl EnvironmentConfig {
    /// Layer `self` over an already resolved `parent`.
    ///
    /// Variables: local wins per key. Headers: local values first, then the
    /// parent's values for the same key. The result keeps `self.parent`.
    #[must_use]
    pub fn merged_over(&self, parent: &EnvironmentConfig) -> EnvironmentConfig {
        EnvironmentConfig {
            parent: self.parent.clone(),
            variables: merge_variables(&parent.variables, &self.variables),
            headers: merge_headers(&parent.headers, &self.headers),
            request_timeout: self.request_timeout.or(parent.request_timeout),
        }
    }
}

pub(crate) fn merge_variables(
    parent: &BTreeMap<String, String>,
    local: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut out = parent.clone();
    out.extend(local.iter().map(|(k, v)| (k.clone(), v.clone())));
    out
}

pub(crate) fn merge_headers(
    parent: &BTreeMap<String, Vec<String>>,
    local: &BTreeMap<String, Vec<String>>,
) -> BTreeMap<String, Vec<String>> {
    let mut out = parent.clone();
    for (name, values) in local {
        let mut merged = values.clone();
        if let Some(inherited) = parent.get(name) {
            merged.extend(inherited.iter().cloned());
        }
        out.insert(name.clone(), merged);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TemplateConfig {
    #[serde(default)]
    pub description: String,
    /// Named parameter defaults, overridable with `--output-param`.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    pub template: String,
}

// =====================
// Application settings and built-in defaults
// =====================

/// A template compiled into the binary.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinTemplate {
    pub name: &'static str,
    /// Command address string the template is scoped to.
    pub command: &'static str,
    pub description: &'static str,
    pub template: &'static str,
}

impl BuiltinTemplate {
    #[must_use]
    pub fn to_config(&self) -> TemplateConfig {
        TemplateConfig {
            description: self.description.to_string(),
            parameters: BTreeMap::new(),
            template: self.template.to_string(),
        }
    }
}

/// Static, versioned defaults handed to the stores at startup.
#[derive(Debug, Clone, Copy)]
pub struct Defaults {
    pub version: u32,
    pub output_width: usize,
    pub request_timeout_ms: u64,
    pub body_memory_threshold: usize,
    pub max_alias_depth: usize,
    pub default_template: &'static str,
    pub templates: &'static [BuiltinTemplate],
}

const BUILTIN_TEMPLATES: &[BuiltinTemplate] = &[
    BuiltinTemplate {
        name: "default",
        command: "",
        description: "Response body only",
        template: "{body}\n",
    },
    BuiltinTemplate {
        name: "verbose",
        command: "",
        description: "Request line, status, headers and body",
        template: "{method} {uri}\n{status} {reason}\n{headers}\n\n{body}\n",
    },
];

pub const DEFAULTS: Defaults = Defaults {
    version: 1,
    output_width: 80,
    request_timeout_ms: 30_000,
    body_memory_threshold: 64 * 1024,
    max_alias_depth: 16,
    default_template: "default",
    templates: BUILTIN_TEMPLATES,
};

/// Contents of `application-config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationConfig {
    pub environment: String,
    pub output_width: usize,
    pub styles_enabled: bool,
    pub default_template: String,
    /// Milliseconds.
    pub request_timeout: u64,
    pub max_alias_depth: usize,
}

impl ApplicationConfig {
    #[must_use]
    pub fn from_defaults(defaults: &Defaults) -> Self {
        Self {
            environment: crate::environment::EMPTY_ENVIRONMENT.to_string(),
            output_width: defaults.output_width,
            styles_enabled: true,
            default_template: defaults.default_template.to_string(),
            request_timeout: defaults.request_timeout_ms,
            max_alias_depth: defaults.max_alias_depth,
        }
    }
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self::from_defaults(&DEFAULTS)
    }
}
