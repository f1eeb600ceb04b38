//! Static mime-type lookup
//!
//! Maps lowercased file extensions to mime types and decides whether an
//! asset's bytes should be handled as text. Binary content (icons, images)
//! passes through the compile/minify/cull stages untouched.

/// Look up the mime type for a lowercased file extension.
pub fn lookup(extension: &str) -> Option<&'static str> {
    let mime = match extension {
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "md" | "markdown" => "text/html",
        "ltl" => "text/html",
        "js" | "coffee" | "ts" => "text/javascript",
        "css" | "scss" | "less" | "styl" => "text/css",
        "json" => "application/json",
        "xml" => "text/xml",
        "svg" => "image/svg+xml",
        "gif" => "image/gif",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        _ => return None,
    };
    Some(mime)
}

/// Whether content with the given extension should be decoded to text.
///
/// Unknown extensions default to text, matching the file reader's historical
/// behavior of stringifying anything without a known binary mime type.
pub fn is_textual(extension: &str) -> bool {
    match lookup(extension) {
        Some(mime) => {
            mime.starts_with("text/")
                || mime == "application/json"
                || mime == "image/svg+xml"
        }
        None => true,
    }
}
