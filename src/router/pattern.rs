//! Route pattern compilation and matching.
//!
//! A pattern is a literal path with `<name>` placeholders, e.g. `/users/<id>` or
//! `/<name>:<age>`. Each placeholder matches one or more characters other than
//! `/`. Literal text is escaped, so `.`, `+`, `(` and friends match themselves.
//!
//! Incoming paths are percent-decoded before matching and may carry one extra
//! trailing slash.

use std::collections::HashMap;

use regex::Regex;
use thiserror::Error;

/// Variables bound by a successful match, keyed by placeholder name.
pub type RouteParams = HashMap<String, String>;

/// Errors raised while compiling a route pattern.
///
/// These are programmer errors and surface at registration time.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("invalid placeholder name <{name}> in pattern {pattern:?}")]
    InvalidName { pattern: String, name: String },

    #[error("placeholder <{name}> appears more than once in pattern {pattern:?}")]
    DuplicateName { pattern: String, name: String },

    #[error("pattern {pattern:?} did not compile: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A compiled route pattern.
///
/// # Examples
///
/// ```
/// use netjin::router::Pattern;
///
/// let pattern = Pattern::compile("/<name>:<age>").unwrap();
/// let params = pattern.matches("/openai:12").unwrap();
/// assert_eq!(params["name"], "openai");
/// assert_eq!(params["age"], "12");
///
/// assert!(pattern.matches("/openai").is_none());
/// ```
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
    names: Vec<String>,
}

impl Pattern {
    /// Compiles `pattern` into an anchored matcher.
    ///
    /// # Errors
    ///
    /// - [`PatternError::InvalidName`]: a placeholder name starts with a digit.
    /// - [`PatternError::DuplicateName`]: the same placeholder is used twice.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let mut expr = String::with_capacity(pattern.len() * 2 + 8);
        let mut names: Vec<String> = Vec::new();
        let mut rest = pattern;

        expr.push('^');
        while let Some(open) = rest.find('<') {
            let after = &rest[open + 1..];
            let placeholder = after
                .find('>')
                .map(|close| &after[..close])
                .filter(|name| is_placeholder(name));

            let Some(name) = placeholder else {
                // Not a placeholder: keep the `<` as a literal and move on.
                expr.push_str(&regex::escape(&rest[..=open]));
                rest = after;
                continue;
            };

            if name.starts_with(|c: char| c.is_ascii_digit()) {
                return Err(PatternError::InvalidName {
                    pattern: pattern.to_owned(),
                    name: name.to_owned(),
                });
            }
            if names.iter().any(|n| n == name) {
                return Err(PatternError::DuplicateName {
                    pattern: pattern.to_owned(),
                    name: name.to_owned(),
                });
            }

            expr.push_str(&regex::escape(&rest[..open]));
            expr.push_str(&format!("(?P<{name}>[^/]+)"));
            names.push(name.to_owned());
            rest = &after[name.len() + 1..];
        }
        expr.push_str(&regex::escape(rest));
        expr.push_str("/?$");

        let regex = Regex::new(&expr).map_err(|source| PatternError::Regex {
            pattern: pattern.to_owned(),
            source,
        })?;

        Ok(Self {
            source: pattern.to_owned(),
            regex,
            names,
        })
    }

    /// Returns the pattern text this matcher was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns the placeholder names in order of appearance.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Matches a raw request path, percent-decoding it first.
    ///
    /// Returns the bound variables (empty for a pattern without placeholders),
    /// or `None` when the path does not match.
    pub fn matches(&self, path: &str) -> Option<RouteParams> {
        self.matches_decoded(&percent_decode(path))
    }

    /// Matches a path that has already been percent-decoded.
    pub fn matches_decoded(&self, path: &str) -> Option<RouteParams> {
        let caps = self.regex.captures(path)?;
        Some(
            self.names
                .iter()
                .filter_map(|name| Some((name.clone(), caps.name(name)?.as_str().to_owned())))
                .collect(),
        )
    }
}

/// Percent-decodes a path. Invalid UTF-8 sequences are replaced, not rejected.
pub fn percent_decode(path: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(path.as_bytes())).into_owned()
}

fn is_placeholder(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}
