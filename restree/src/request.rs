//! Request templating: turning bound variables and an environment into a
//! concrete HTTP request.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use reqwest::Method;
use url::form_urlencoded::byte_serialize;
use uuid::Uuid;

use crate::config::{BodyConfig, ParameterListConfig, RestConfig};
use crate::environment::Environment;
use crate::error::{Error, IoContext, Result};
use crate::render::{Model, Renderer, Value};

/// Values bound from the command line to declared variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    declared: BTreeSet<String>,
    values: BTreeMap<String, Value>,
}

impl Bindings {
    #[must_use]
    pub fn new(parameters: &ParameterListConfig) -> Self {
        Self {
            declared: parameters.iter().map(|p| p.variable.clone()).collect(),
            values: BTreeMap::new(),
        }
    }

    pub fn bind(&mut self, variable: &str, value: Value) {
        self.values.insert(variable.to_string(), value);
    }

    #[must_use]
    pub fn is_declared(&self, variable: &str) -> bool {
        self.declared.contains(variable)
    }

    #[must_use]
    pub fn get(&self, variable: &str) -> Option<&Value> {
        self.values.get(variable)
    }
}

/// Variable model for request templates.
///
/// Lookup order: bound command-line value, then environment variable, then
/// built-ins (`uuid`).
pub struct RequestContext<'a> {
    environment: &'a Environment,
    bindings: &'a Bindings,
    builtins: BTreeMap<&'static str, String>,
}

impl<'a> RequestContext<'a> {
    #[must_use]
    pub fn new(environment: &'a Environment, bindings: &'a Bindings) -> Self {
        let builtins = BTreeMap::from([("uuid", Uuid::new_v4().to_string())]);
        Self {
            environment,
            bindings,
            builtins,
        }
    }

    #[must_use]
    pub fn environment(&self) -> &Environment {
        self.environment
    }

    /// Declared, not given on the command line, and not supplied by the
    /// environment.
    #[must_use]
    pub fn is_unbound(&self, variable: &str) -> bool {
        self.bindings.is_declared(variable)
            && self.bindings.get(variable).is_none()
            && self.environment.variable(variable).is_none()
    }
}

impl Model for RequestContext<'_> {
    fn lookup(&self, name: &str) -> Result<Option<Value>> {
        if let Some(v) = self.bindings.get(name) {
            return Ok(Some(v.clone()));
        }
        if let Some(v) = self.environment.variable(name) {
            return Ok(Some(Value::from(v)));
        }
        Ok(self.builtins.get(name).map(|v| Value::from(v.as_str())))
    }
}

/// A request body that can be opened any number of times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodySource {
    Empty,
    Text(String),
    File(PathBuf),
}

impl BodySource {
    /// A fresh reader over the whole body.
    ///
    /// # Errors
    ///
    /// Fails when a file body cannot be opened.
    pub fn open(&self) -> Result<Box<dyn Read + Send>> {
        Ok(match self {
            BodySource::Empty => Box::new(std::io::empty()),
            BodySource::Text(s) => Box::new(Cursor::new(s.clone().into_bytes())),
            BodySource::File(path) => Box::new(File::open(path).at(path)?),
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, BodySource::Empty)
    }
}

/// A fully rendered request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: BodySource,
    pub timeout: Duration,
    pub expect_continue: bool,
}

/// Unrendered request parts, combining a command's config with the active
/// environment's headers.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    pub method: String,
    pub uri: String,
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: Option<BodyConfig>,
    pub timeout: Duration,
    pub expect_continue: bool,
}

impl RequestTemplate {
    /// Headers are the environment's, followed per name by the command's.
    /// The timeout is the environment's when set, else `default_timeout`.
    /// Streamed file bodies ask the server for `100-continue` first.
    #[must_use]
    pub fn from_config(rest: &RestConfig, environment: &Environment, default_timeout: Duration) -> Self {
        let mut headers = environment.headers().clone();
        for (name, values) in &rest.headers {
            headers
                .entry(name.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
        let timeout = environment
            .request_timeout()
            .map_or(default_timeout, Duration::from_millis);
        Self {
            method: rest.method.clone(),
            uri: rest.uri.clone(),
            query: rest.query.clone(),
            headers,
            body: rest.body.clone(),
            timeout,
            expect_continue: matches!(
                rest.body,
                Some(BodyConfig::File {
                    template: false,
                    ..
                })
            ),
        }
    }

    /// # Errors
    ///
    /// Fails on an unknown method or when a body file cannot be read.
    pub fn render(&self, renderer: &dyn Renderer, ctx: &RequestContext<'_>) -> Result<Request> {
        let method = Method::from_str(&self.method.to_uppercase())
            .map_err(|_| Error::InvalidRequest(format!("unsupported HTTP method: {}", self.method)))?;

        let base = renderer.render(&self.uri, ctx)?;
        let mut pairs = Vec::new();
        for (key, value) in &self.query {
            let Some(keys) = expand(key, renderer, ctx)? else {
                continue;
            };
            let Some(values) = expand(value, renderer, ctx)? else {
                continue;
            };
            let key = keys.join(",");
            pairs.extend(values.into_iter().map(|v| (key.clone(), v)));
        }
        let uri = append_query(&base, &pairs);

        let mut headers = BTreeMap::new();
        for (name, templates) in &self.headers {
            let mut values = Vec::new();
            for t in templates {
                if let Some(expanded) = expand(t, renderer, ctx)? {
                    values.extend(expanded);
                }
            }
            if !values.is_empty() {
                headers.insert(name.clone(), values);
            }
        }

        let body = match &self.body {
            None => BodySource::Empty,
            Some(config) => body_source(config, renderer, ctx)?,
        };

        Ok(Request {
            method,
            uri,
            headers,
            body,
            timeout: self.timeout,
            expect_continue: self.expect_continue,
        })
    }
}

/// Render one template under the drop rule: `None` when it is a single
/// reference to an unbound variable, one entry per item when it is a single
/// reference to a list, else the rendered text.
fn expand(template: &str, renderer: &dyn Renderer, ctx: &RequestContext<'_>) -> Result<Option<Vec<String>>> {
    if let Some(name) = renderer.single_reference(template) {
        if ctx.is_unbound(name) {
            return Ok(None);
        }
        if let Some(Value::List(items)) = ctx.lookup(name)? {
            return Ok(Some(items));
        }
    }
    Ok(Some(vec![renderer.render(template, ctx)?]))
}

fn body_source(config: &BodyConfig, renderer: &dyn Renderer, ctx: &RequestContext<'_>) -> Result<BodySource> {
    match config {
        BodyConfig::Text { content, template } => Ok(BodySource::Text(if *template {
            renderer.render(content, ctx)?
        } else {
            content.clone()
        })),
        BodyConfig::File { path, template } => {
            let path = PathBuf::from(renderer.render(path, ctx)?);
            if *template {
                let text = read_text(&path)?;
                Ok(BodySource::Text(renderer.render(&text, ctx)?))
            } else {
                Ok(BodySource::File(path))
            }
        }
        BodyConfig::Variable { name, template } => match ctx.lookup(name)? {
            None => Ok(BodySource::Empty),
            Some(value) => {
                let text = value.as_text();
                Ok(BodySource::Text(if *template {
                    renderer.render(&text, ctx)?
                } else {
                    text.into_owned()
                }))
            }
        },
    }
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).at(path)
}

/// Append url-encoded pairs, choosing `?` or `&` from what the URI already has.
#[must_use]
pub fn append_query(uri: &str, pairs: &[(String, String)]) -> String {
    if pairs.is_empty() {
        return uri.to_string();
    }
    let encoded = pairs
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                byte_serialize(k.as_bytes()).collect::<String>(),
                byte_serialize(v.as_bytes()).collect::<String>()
            )
        })
        .collect::<Vec<_>>()
        .join("&");
    let separator = if !uri.contains('?') {
        "?"
    } else if uri.ends_with('?') || uri.ends_with('&') {
        ""
    } else {
        "&"
    };
    format!("{uri}{separator}{encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ParameterConfig, ParameterStyle};
    use crate::render::PlaceholderRenderer;

    fn params() -> ParameterListConfig {
        ParameterListConfig::new(vec![
            ParameterConfig::option("limit", ParameterStyle::SingleOption, &["--limit"]),
            ParameterConfig::option("tag", ParameterStyle::MultiOption, &["--tag"]),
            ParameterConfig::option("payload", ParameterStyle::SingleOption, &["--payload"]),
            ParameterConfig::positional("id", ParameterStyle::RequiredPositional),
        ])
        .unwrap()
    }

    fn rest() -> RestConfig {
        let mut rest = RestConfig::new("get", "https://{host}/items/{id}");
        rest.parameters = params();
        rest.query.insert("limit".to_string(), "{limit}".to_string());
        rest.query.insert("tag".to_string(), "{tag}".to_string());
        rest
    }

    fn env() -> Environment {
        let mut env = Environment::create("test").unwrap();
        env.set_variable("host", "api.test");
        env
    }

    // ==================== query tests ====================

    #[test]
    fn test_unbound_query_values_dropped() {
        let env = env();
        let mut bindings = Bindings::new(&params());
        bindings.bind("id", Value::from("7"));
        let ctx = RequestContext::new(&env, &bindings);
        let template = RequestTemplate::from_config(&rest(), &env, Duration::from_secs(5));
        let req = template.render(&PlaceholderRenderer, &ctx).unwrap();
        assert_eq!(req.uri, "https://api.test/items/7");
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_list_query_value_expands_to_pairs() {
        let env = env();
        let mut bindings = Bindings::new(&params());
        bindings.bind("id", Value::from("7"));
        bindings.bind("limit", Value::from("10"));
        bindings.bind("tag", Value::List(vec!["a b".to_string(), "c&d".to_string()]));
        let ctx = RequestContext::new(&env, &bindings);
        let template = RequestTemplate::from_config(&rest(), &env, Duration::from_secs(5));
        let req = template.render(&PlaceholderRenderer, &ctx).unwrap();
        assert_eq!(
            req.uri,
            "https://api.test/items/7?limit=10&tag=a+b&tag=c%26d"
        );
    }

    #[test]
    fn test_environment_satisfies_declared_variable() {
        let mut env = env();
        env.set_variable("limit", "99");
        let mut bindings = Bindings::new(&params());
        bindings.bind("id", Value::from("1"));
        let ctx = RequestContext::new(&env, &bindings);
        assert!(!ctx.is_unbound("limit"));
        assert!(ctx.is_unbound("tag"));
        let req = RequestTemplate::from_config(&rest(), &env, Duration::from_secs(1))
            .render(&PlaceholderRenderer, &ctx)
            .unwrap();
        assert_eq!(req.uri, "https://api.test/items/1?limit=99");
    }

    #[test]
    fn test_append_query_separator() {
        let pairs = vec![("a".to_string(), "1".to_string())];
        assert_eq!(append_query("http://h/p", &pairs), "http://h/p?a=1");
        assert_eq!(append_query("http://h/p?", &pairs), "http://h/p?a=1");
        assert_eq!(append_query("http://h/p?x=1", &pairs), "http://h/p?x=1&a=1");
        assert_eq!(append_query("http://h/p?x=1&", &pairs), "http://h/p?x=1&a=1");
        assert_eq!(append_query("http://h/p", &[]), "http://h/p");
    }

    // ==================== header tests ====================

    #[test]
    fn test_headers_merge_environment_then_command_and_drop_empty() {
        let mut env = env();
        env.add_header_value("Accept", "application/json");
        let mut rest = rest();
        rest.headers
            .insert("Accept".to_string(), vec!["text/plain".to_string()]);
        rest.headers
            .insert("X-Limit".to_string(), vec!["{limit}".to_string()]);
        rest.headers
            .insert("X-Trace".to_string(), vec!["{uuid}".to_string()]);

        let mut bindings = Bindings::new(&params());
        bindings.bind("id", Value::from("1"));
        let ctx = RequestContext::new(&env, &bindings);
        let req = RequestTemplate::from_config(&rest, &env, Duration::from_secs(1))
            .render(&PlaceholderRenderer, &ctx)
            .unwrap();

        assert_eq!(
            req.headers["Accept"],
            vec!["application/json".to_string(), "text/plain".to_string()]
        );
        assert!(!req.headers.contains_key("X-Limit"));
        assert_eq!(req.headers["X-Trace"][0].len(), 36);
    }

    #[test]
    fn test_environment_timeout_overrides_default() {
        let mut env = env();
        env.set_request_timeout(Some(250));
        let template = RequestTemplate::from_config(&rest(), &env, Duration::from_secs(30));
        assert_eq!(template.timeout, Duration::from_millis(250));
    }

    // ==================== body tests ====================

    #[test]
    fn test_variable_body_absent_when_unbound() {
        let env = env();
        let mut rest = rest();
        rest.body = Some(BodyConfig::Variable {
            name: "payload".to_string(),
            template: false,
        });
        let mut bindings = Bindings::new(&params());
        bindings.bind("id", Value::from("1"));
        let ctx = RequestContext::new(&env, &bindings);
        let template = RequestTemplate::from_config(&rest, &env, Duration::from_secs(1));
        assert!(template.render(&PlaceholderRenderer, &ctx).unwrap().body.is_empty());

        bindings.bind("payload", Value::from("{\"a\":1}"));
        let ctx = RequestContext::new(&env, &bindings);
        let req = template.render(&PlaceholderRenderer, &ctx).unwrap();
        assert_eq!(req.body, BodySource::Text("{\"a\":1}".to_string()));
    }

    #[test]
    fn test_text_body_rendered_only_when_templated() {
        let env = env();
        let bindings = Bindings::new(&params());
        let ctx = RequestContext::new(&env, &bindings);
        let plain = BodyConfig::Text {
            content: "host={host}".to_string(),
            template: false,
        };
        let rendered = BodyConfig::Text {
            content: "host={host}".to_string(),
            template: true,
        };
        assert_eq!(
            body_source(&plain, &PlaceholderRenderer, &ctx).unwrap(),
            BodySource::Text("host={host}".to_string())
        );
        assert_eq!(
            body_source(&rendered, &PlaceholderRenderer, &ctx).unwrap(),
            BodySource::Text("host=api.test".to_string())
        );
    }

    #[test]
    fn test_file_body_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("body.txt");
        fs::write(&path, "payload").unwrap();
        let body = BodySource::File(path);
        for _ in 0..2 {
            let mut text = String::new();
            body.open().unwrap().read_to_string(&mut text).unwrap();
            assert_eq!(text, "payload");
        }
    }

    #[test]
    fn test_unknown_method_rejected() {
        let env = env();
        let bindings = Bindings::default();
        let ctx = RequestContext::new(&env, &bindings);
        let mut rest = RestConfig::new("FETCH ME", "http://x");
        rest.parameters = ParameterListConfig::default();
        let err = RequestTemplate::from_config(&rest, &env, Duration::from_secs(1))
            .render(&PlaceholderRenderer, &ctx)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }
}
