//! Template rendering.
//!
//! The engine only needs two things from a template language: render a
//! string against a variable model, and tell whether a string is nothing but
//! one variable reference. [`PlaceholderRenderer`] provides both for `{name}`
//! placeholders.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Result;

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-zA-Z_][a-zA-Z0-9_.\-]*)\}").expect("valid regex"));

/// A variable value: repeatable parameters bind lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    List(Vec<String>),
}

impl Value {
    /// Text form; list items are joined with `,`.
    #[must_use]
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Value::Text(s) => Cow::Borrowed(s),
            Value::List(items) => Cow::Owned(items.join(",")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// Variables a template is rendered against.
pub trait Model {
    /// # Errors
    ///
    /// Lookups may need I/O (for example re-reading a response body).
    fn lookup(&self, name: &str) -> Result<Option<Value>>;
}

impl Model for HashMap<String, String> {
    fn lookup(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.get(name).map(|v| Value::Text(v.clone())))
    }
}

impl Model for BTreeMap<String, String> {
    fn lookup(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.get(name).map(|v| Value::Text(v.clone())))
    }
}

pub trait Renderer {
    /// # Errors
    ///
    /// Propagates model lookup failures.
    fn render(&self, template: &str, model: &dyn Model) -> Result<String>;

    /// The variable name when `template` is exactly one reference.
    fn single_reference<'t>(&self, template: &'t str) -> Option<&'t str>;
}

/// `{name}` substitution. Unknown names render as nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderRenderer;

impl Renderer for PlaceholderRenderer {
    fn render(&self, template: &str, model: &dyn Model) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for caps in PLACEHOLDER_RE.captures_iter(template) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            out.push_str(&template[last..whole.start()]);
            if let Some(value) = model.lookup(name.as_str())? {
                out.push_str(&value.as_text());
            }
            last = whole.end();
        }
        out.push_str(&template[last..]);
        Ok(out)
    }

    fn single_reference<'t>(&self, template: &'t str) -> Option<&'t str> {
        let caps = PLACEHOLDER_RE.captures(template)?;
        let m = caps.get(0)?;
        if m.start() != 0 || m.end() != template.len() {
            return None;
        }
        caps.get(1).map(|name| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Lists;

    impl Model for Lists {
        fn lookup(&self, name: &str) -> Result<Option<Value>> {
            Ok(match name {
                "tags" => Some(Value::List(vec!["a".to_string(), "b".to_string()])),
                "header.Content-Type" => Some(Value::from("text/plain")),
                _ => None,
            })
        }
    }

    // ==================== map model tests ====================

    #[test]
    fn test_render_map_single_var() {
        let mut vars = HashMap::new();
        vars.insert("name".to_string(), "John".to_string());
        assert_eq!(PlaceholderRenderer.render("Hello {name}!", &vars).unwrap(), "Hello John!");
    }

    #[test]
    fn test_render_map_missing_var() {
        let vars: HashMap<String, String> = HashMap::new();
        assert_eq!(PlaceholderRenderer.render("Hello {name}!", &vars).unwrap(), "Hello !");
    }

    #[test]
    fn test_render_map_url_path() {
        let mut vars = HashMap::new();
        vars.insert("org".to_string(), "acme".to_string());
        vars.insert("id".to_string(), "123".to_string());
        assert_eq!(
            PlaceholderRenderer.render("/orgs/{org}/users/{id}", &vars).unwrap(),
            "/orgs/acme/users/123"
        );
    }

    #[test]
    fn test_render_map_json_braces_untouched() {
        let mut vars = HashMap::new();
        vars.insert("v".to_string(), "42".to_string());
        assert_eq!(
            PlaceholderRenderer.render(r#"{"value": {v}}"#, &vars).unwrap(),
            r#"{"value": 42}"#
        );
    }

    // ==================== PlaceholderRenderer tests ====================

    #[test]
    fn test_render_lists_join_with_comma() {
        let out = PlaceholderRenderer.render("tags={tags};", &Lists).unwrap();
        assert_eq!(out, "tags=a,b;");
    }

    #[test]
    fn test_render_dotted_and_dashed_names() {
        let out = PlaceholderRenderer
            .render("type: {header.Content-Type}", &Lists)
            .unwrap();
        assert_eq!(out, "type: text/plain");
    }

    #[test]
    fn test_render_repeated_and_missing() {
        let mut vars = BTreeMap::new();
        vars.insert("x".to_string(), "A".to_string());
        let out = PlaceholderRenderer.render("{x}{x}{y}{x}", &vars).unwrap();
        assert_eq!(out, "AAA");
    }

    #[test]
    fn test_single_reference() {
        let r = PlaceholderRenderer;
        assert_eq!(r.single_reference("{id}"), Some("id"));
        assert_eq!(r.single_reference("x{id}"), None);
        assert_eq!(r.single_reference("{a}{b}"), None);
        assert_eq!(r.single_reference("id"), None);
        assert_eq!(r.single_reference(""), None);
    }
}
