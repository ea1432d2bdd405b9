//! Path-like identifiers for nodes in the command namespace.

use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

static SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));
static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

/// Returns true when `name` can be used as a single address segment.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    SEGMENT_RE.is_match(name)
}

/// Returns true for identifier-like names (template and variable names).
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER_RE.is_match(name)
}

pub(crate) fn validate_name(name: &str) -> Result<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}

/// An immutable address in the command tree.
///
/// The string form joins segments with `/`; the root is the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CommandAddress {
    segments: Vec<String>,
}

impl CommandAddress {
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Build an address from already split segments.
    ///
    /// # Errors
    ///
    /// Fails when any segment is not a valid name.
    pub fn from_segments<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        for seg in &segments {
            validate_name(seg)?;
        }
        Ok(Self { segments })
    }

    /// # Errors
    ///
    /// Fails when `name` is not a valid segment.
    pub fn child(&self, name: &str) -> Result<Self> {
        validate_name(name)?;
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Ok(Self { segments })
    }

    /// The enclosing address, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.segments.split_last()?;
        Some(Self {
            segments: rest.to_vec(),
        })
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// True when `self` equals `other` or lies below it.
    #[must_use]
    pub fn starts_with(&self, other: &Self) -> bool {
        self.segments.starts_with(&other.segments)
    }

    /// This address followed by each ancestor, ending with the root.
    pub fn ancestors(&self) -> impl Iterator<Item = CommandAddress> + '_ {
        (0..=self.segments.len()).rev().map(|n| Self {
            segments: self.segments[..n].to_vec(),
        })
    }

    /// Relative filesystem path of this address; the root maps to `.`.
    #[must_use]
    pub fn to_relative_path(&self) -> PathBuf {
        if self.is_root() {
            return PathBuf::from(".");
        }
        self.segments.iter().collect()
    }

    /// Human readable form used in messages.
    #[must_use]
    pub fn label(&self) -> String {
        if self.is_root() {
            "<root>".to_string()
        } else {
            self.to_string()
        }
    }
}

impl fmt::Display for CommandAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl FromStr for CommandAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(Self::root());
        }
        Self::from_segments(s.split('/'))
    }
}

impl Ord for CommandAddress {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

impl PartialOrd for CommandAddress {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
