//! Template rendering collaborator.
//!
//! The server only needs `render(name, context) -> String`. Applications can
//! plug in any engine through [`TemplateRenderer`]; [`FileTemplates`] is the
//! built-in implementation used when `template_dirs` are configured.

use std::io;
use std::path::{Component, Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

/// Errors produced while rendering a template.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template not found: {0}")]
    NotFound(String),

    #[error("failed to read template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("template rendering failed: {0}")]
    Render(String),
}

/// Turns a template name plus a JSON context into a document.
pub trait TemplateRenderer: Send + Sync + 'static {
    /// Renders `name` with `context`.
    ///
    /// # Errors
    ///
    /// [`TemplateError::NotFound`] when no template called `name` exists.
    fn render(&self, name: &str, context: &Value) -> Result<String, TemplateError>;
}

/// Renders `.html` files from an ordered list of directories.
///
/// Placeholders have the form `{{ key }}` and are replaced by the top-level
/// value of the context object under `key`. Unknown keys render as nothing.
///
/// # Examples
///
/// ```no_run
/// use netjin::template::{FileTemplates, TemplateRenderer};
/// use serde_json::json;
///
/// let templates = FileTemplates::new(["templates"]);
/// // templates/index.html: "<h1>{{ title }}</h1>"
/// let html = templates.render("index", &json!({ "title": "Home" })).unwrap();
/// assert_eq!(html, "<h1>Home</h1>");
/// ```
#[derive(Debug, Clone)]
pub struct FileTemplates {
    roots: Vec<PathBuf>,
}

impl FileTemplates {
    /// Creates a renderer that searches `roots` in order.
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the configured template directories.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn locate(&self, name: &str) -> Option<PathBuf> {
        let lower = name.to_ascii_lowercase();
        let file = if lower.ends_with(".html") || lower.ends_with(".htm") {
            name.to_owned()
        } else {
            format!("{name}.html")
        };

        let relative = Path::new(&file);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }

        self.roots
            .iter()
            .map(|root| root.join(relative))
            .find(|candidate| candidate.is_file())
    }
}

impl TemplateRenderer for FileTemplates {
    fn render(&self, name: &str, context: &Value) -> Result<String, TemplateError> {
        let path = self
            .locate(name)
            .ok_or_else(|| TemplateError::NotFound(name.to_owned()))?;
        let source =
            std::fs::read_to_string(&path).map_err(|source| TemplateError::Io { path, source })?;
        Ok(substitute(&source, context))
    }
}

/// Replaces every `{{ key }}` in `source` with the matching context value.
pub(crate) fn substitute(source: &str, context: &Value) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        out.push_str(&rest[..start]);
        let key = rest[start + 2..start + 2 + len].trim();
        match context.get(key) {
            Some(Value::String(s)) => out.push_str(s),
            Some(Value::Null) | None => {}
            Some(other) => out.push_str(&other.to_string()),
        }
        rest = &rest[start + 2 + len + 2..];
    }

    out.push_str(rest);
    out
}
