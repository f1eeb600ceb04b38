//! Compiler registry
//!
//! Compilers are resolved per file type. A registry entry is either `Skip`
//! (the type needs no compilation), `Named` (a known compiler that has not
//! been loaded yet, resolved lazily on first use), or `Loaded` (a concrete
//! handle). Types with no entry at all resolve by their own name, so a
//! `.md` asset looks for a compiler called "md" unless told otherwise.
//!
//! The historical duck-typed probing (`.compile` / `.renderSync` /
//! `.markdown.toHTML` / bare callable) is modeled as a closed capability
//! enum selected at registration time.

use std::sync::Arc;

use crate::content::{Content, TemplateFn};
use crate::error::{HopperError, HopperResult};

/// Options forwarded to a compiler invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompileOptions {
    /// Template name, derived from the asset's `views/` path segment.
    pub name: Option<String>,
    /// Suppress the compiler's default scope wrapping (BARE/NOWRAP marker).
    pub bare: bool,
}

/// A template compiler: source text in, render function out.
pub trait TemplateCompiler: Send + Sync {
    fn compile(&self, source: &str, options: &CompileOptions) -> HopperResult<TemplateFn>;
}

/// The closed set of compiler calling conventions.
#[derive(Clone)]
pub enum CompilerHandle {
    /// Plain text-to-text transform (transpilers, bare callables).
    TextTransform(Arc<dyn Fn(&str, &CompileOptions) -> HopperResult<String> + Send + Sync>),
    /// Compiles source into a per-request render function.
    TemplateCompile(Arc<dyn TemplateCompiler>),
    /// Stylesheet renderer (`renderSync`-shaped, compressed output).
    CssRender(Arc<dyn Fn(&str) -> HopperResult<String> + Send + Sync>),
    /// Markdown-to-HTML renderer.
    MarkdownRender(Arc<dyn Fn(&str) -> String + Send + Sync>),
}

impl CompilerHandle {
    /// Invoke this compiler over textual content.
    pub fn invoke(&self, source: &str, options: &CompileOptions) -> HopperResult<Content> {
        match self {
            CompilerHandle::TextTransform(f) => f(source, options).map(Content::Text),
            CompilerHandle::TemplateCompile(t) => {
                t.compile(source, options).map(Content::Template)
            }
            CompilerHandle::CssRender(f) => f(source).map(Content::Text),
            CompilerHandle::MarkdownRender(f) => Ok(Content::Text(f(source))),
        }
    }
}

/// Registry entry for one file type.
#[derive(Clone)]
pub enum CompilerEntry {
    /// The type does not need compilation.
    Skip,
    /// A known compiler, resolved by name on first use.
    Named(String),
    /// A concrete compiler handle.
    Loaded(CompilerHandle),
}

/// Resolve a compiler by name from the builtin table.
///
/// Real compiler integrations are injected by the host through
/// `Environment::set_compiler`; only markdown ships builtin.
pub fn resolve(name: &str) -> HopperResult<CompilerHandle> {
    match name {
        "markdown" | "md" => Ok(CompilerHandle::MarkdownRender(Arc::new(markdown_to_html))),
        _ => Err(HopperError::UnknownCompiler {
            name: name.to_string(),
        }),
    }
}

/// Minimal markdown renderer: ATX headings, unordered lists, paragraphs,
/// and inline emphasis/code spans.
pub fn markdown_to_html(source: &str) -> String {
    let mut html = Vec::new();
    let mut paragraph: Vec<String> = Vec::new();
    let mut list: Vec<String> = Vec::new();

    fn flush_paragraph(html: &mut Vec<String>, paragraph: &mut Vec<String>) {
        if !paragraph.is_empty() {
            html.push(format!("<p>{}</p>", paragraph.join(" ")));
            paragraph.clear();
        }
    }

    fn flush_list(html: &mut Vec<String>, list: &mut Vec<String>) {
        if !list.is_empty() {
            let items: String = list.iter().map(|i| format!("<li>{i}</li>")).collect();
            html.push(format!("<ul>{items}</ul>"));
            list.clear();
        }
    }

    for line in source.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            flush_paragraph(&mut html, &mut paragraph);
            flush_list(&mut html, &mut list);
        } else if let Some(rest) = trimmed.strip_prefix('#') {
            flush_paragraph(&mut html, &mut paragraph);
            flush_list(&mut html, &mut list);
            let level = 1 + rest.len() - rest.trim_start_matches('#').len();
            let level = level.min(6);
            let text = rest.trim_start_matches('#').trim();
            html.push(format!("<h{level}>{}</h{level}>", render_inline(text)));
        } else if let Some(item) = trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* ")) {
            flush_paragraph(&mut html, &mut paragraph);
            list.push(render_inline(item.trim()));
        } else {
            flush_list(&mut html, &mut list);
            paragraph.push(render_inline(trimmed));
        }
    }
    flush_paragraph(&mut html, &mut paragraph);
    flush_list(&mut html, &mut list);
    html.join("\n")
}

/// Inline spans: `code`, **strong**, *em*.
fn render_inline(text: &str) -> String {
    let mut out = replace_pairs(text, "`", "<code>", "</code>");
    out = replace_pairs(&out, "**", "<strong>", "</strong>");
    out = replace_pairs(&out, "*", "<em>", "</em>");
    out
}

fn replace_pairs(text: &str, marker: &str, open: &str, close: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        match rest.find(marker) {
            Some(start) => {
                let after = &rest[start + marker.len()..];
                match after.find(marker) {
                    Some(end) => {
                        out.push_str(&rest[..start]);
                        out.push_str(open);
                        out.push_str(&after[..end]);
                        out.push_str(close);
                        rest = &after[end + marker.len()..];
                    }
                    None => {
                        // Unbalanced marker, leave the remainder untouched.
                        out.push_str(rest);
                        return out;
                    }
                }
            }
            None => {
                out.push_str(rest);
                return out;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_renders_heading() {
        assert_eq!(markdown_to_html("# hi"), "<h1>hi</h1>");
        assert_eq!(markdown_to_html("### deep"), "<h3>deep</h3>");
    }

    #[test]
    fn markdown_renders_paragraphs_and_lists() {
        let html = markdown_to_html("First line\nsecond line\n\n- one\n- two");
        assert_eq!(
            html,
            "<p>First line second line</p>\n<ul><li>one</li><li>two</li></ul>"
        );
    }

    #[test]
    fn markdown_renders_inline_spans() {
        assert_eq!(
            markdown_to_html("use `x` and **y** or *z*"),
            "<p>use <code>x</code> and <strong>y</strong> or <em>z</em></p>"
        );
    }

    #[test]
    fn resolve_knows_markdown_only() {
        assert!(resolve("markdown").is_ok());
        assert!(matches!(
            resolve("coffee-script"),
            Err(HopperError::UnknownCompiler { .. })
        ));
    }

    #[test]
    fn text_transform_invokes() {
        let handle = CompilerHandle::TextTransform(Arc::new(|source, _| {
            Ok(source.to_uppercase())
        }));
        let out = handle.invoke("abc", &CompileOptions::default()).unwrap();
        assert_eq!(out.as_text(), Some("ABC"));
    }
}
