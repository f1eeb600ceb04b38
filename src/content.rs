//! Staged asset content
//!
//! Content moves through the pipeline as `raw → compiled → minified →
//! gzipped`, each stage lazily derived from the previous one. A stage that
//! has not been computed is `None`, which is distinct from empty content.
//!
//! Three shapes exist: text, raw bytes (images and other binaries, which
//! pass through the transform stages unchanged), and compiled templates,
//! which render per-request when routed.

use std::fmt;
use std::sync::Arc;

use crate::router::RouteContext;

/// A template render function produced by a template-compiling compiler.
pub type TemplateFn = Arc<dyn Fn(&RouteContext) -> String + Send + Sync>;

/// A single stage's content value.
#[derive(Clone)]
pub enum Content {
    Text(String),
    Binary(Vec<u8>),
    Template(TemplateFn),
}

impl Content {
    /// Text view of this content, if it is textual.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Byte view for serving: text and binary yield bytes, templates none.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Content::Text(text) => Some(text.as_bytes()),
            Content::Binary(bytes) => Some(bytes),
            Content::Template(_) => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Content::Text(_))
    }

    pub fn is_template(&self) -> bool {
        matches!(self, Content::Template(_))
    }

    /// Value equality; templates only compare equal to themselves.
    pub fn same_as(&self, other: &Content) -> bool {
        match (self, other) {
            (Content::Text(a), Content::Text(b)) => a == b,
            (Content::Binary(a), Content::Binary(b)) => a == b,
            (Content::Template(a), Content::Template(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
            Content::Binary(bytes) => f.debug_tuple("Binary").field(&bytes.len()).finish(),
            Content::Template(_) => f.write_str("Template"),
        }
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}

impl From<Vec<u8>> for Content {
    fn from(bytes: Vec<u8>) -> Self {
        Content::Binary(bytes)
    }
}
