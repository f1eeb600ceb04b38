//! Minifier registry
//!
//! Minifiers are keyed by *target language* (js/css/html), not by raw file
//! type, so a `.coffee` asset minifies with the js minifier. Entries follow
//! the same lazy-resolution convention as compilers. The builtin minifiers
//! are conservative whitespace/comment strippers standing in for the real
//! integrations, which hosts inject through `Environment::set_minifier`.

use std::sync::Arc;

use crate::error::{HopperError, HopperResult};

/// A minifier: text in, smaller text out.
pub trait Minifier: Send + Sync {
    fn minify(&self, source: &str) -> HopperResult<String>;
}

/// Shared minifier handle.
pub type MinifierHandle = Arc<dyn Minifier>;

/// Registry entry for one target language.
#[derive(Clone)]
pub enum MinifierEntry {
    /// The language is not minified.
    Skip,
    /// A known minifier, resolved by name on first use.
    Named(String),
    /// A concrete minifier handle.
    Loaded(MinifierHandle),
}

/// Resolve a minifier by name from the builtin table.
pub fn resolve(name: &str) -> HopperResult<MinifierHandle> {
    match name {
        "jsmin" => Ok(Arc::new(JsMinifier)),
        "cssmin" => Ok(Arc::new(CssMinifier)),
        _ => Err(HopperError::UnknownMinifier {
            name: name.to_string(),
        }),
    }
}

/// Conservative JavaScript minifier: strips comments and blank lines,
/// trims indentation. Never renames or restructures.
pub struct JsMinifier;

impl Minifier for JsMinifier {
    fn minify(&self, source: &str) -> HopperResult<String> {
        let stripped = strip_block_comments(source);
        let lines: Vec<&str> = stripped
            .lines()
            .map(|line| {
                // Whole-line comments only; a // inside the line may sit in
                // a string or a URL, so it stays.
                let trimmed = line.trim();
                if trimmed.starts_with("//") {
                    ""
                } else {
                    trimmed
                }
            })
            .filter(|line| !line.is_empty())
            .collect();
        Ok(lines.join("\n"))
    }
}

/// Conservative CSS minifier: strips comments, collapses whitespace, and
/// removes spaces around punctuation.
pub struct CssMinifier;

impl Minifier for CssMinifier {
    fn minify(&self, source: &str) -> HopperResult<String> {
        let stripped = strip_block_comments(source);
        let mut out = String::with_capacity(stripped.len());
        let mut last_space = false;
        for ch in stripped.chars() {
            if ch.is_whitespace() {
                if !last_space && !out.is_empty() {
                    out.push(' ');
                }
                last_space = true;
            } else {
                if matches!(ch, '{' | '}' | ':' | ';' | ',') && out.ends_with(' ') {
                    out.pop();
                }
                out.push(ch);
                last_space = false;
            }
        }
        let out = out
            .replace("{ ", "{")
            .replace("} ", "}")
            .replace(": ", ":")
            .replace("; ", ";")
            .replace(", ", ",")
            .replace(";}", "}");
        Ok(out.trim().to_string())
    }
}

fn strip_block_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start..].find("*/") {
            Some(end) => rest = &rest[start + end + 2..],
            None => return out, // unterminated comment swallows the tail
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_minifier_drops_comments_and_blank_lines() {
        let source = "// header\nvar a = 1;\n\n  /* block\n     comment */\n  var b = 2;\n";
        let out = JsMinifier.minify(source).unwrap();
        assert_eq!(out, "var a = 1;\nvar b = 2;");
    }

    #[test]
    fn js_minifier_keeps_inline_slashes() {
        let source = "var url = 'http://example.com';";
        let out = JsMinifier.minify(source).unwrap();
        assert_eq!(out, "var url = 'http://example.com';");
    }

    #[test]
    fn css_minifier_collapses_whitespace() {
        let source = "body {\n  color: red;\n  margin: 0;\n}\n";
        let out = CssMinifier.minify(source).unwrap();
        assert_eq!(out, "body{color:red;margin:0}");
    }

    #[test]
    fn css_minifier_strips_comments() {
        let source = "/* reset */ p { padding : 0 ; }";
        let out = CssMinifier.minify(source).unwrap();
        assert_eq!(out, "p{padding:0}");
    }

    #[test]
    fn resolve_knows_builtins() {
        assert!(resolve("jsmin").is_ok());
        assert!(resolve("cssmin").is_ok());
        assert!(matches!(
            resolve("uglify"),
            Err(HopperError::UnknownMinifier { .. })
        ));
    }
}
