//! Router port - abstraction over an HTTP server's routing table
//!
//! The pipeline never owns a server; it registers handlers with whatever
//! router the host provides. A router that can serve precompressed bodies
//! advertises it through `supports_zip`, and handlers fall back to plain
//! body writes otherwise.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A registered route handler.
pub type RouteHandler = Arc<dyn Fn(&Request, &mut Response) + Send + Sync>;

/// Abstract router interface (Express-style `get(path, handler)`).
pub trait Router: Send + Sync {
    /// Register a GET handler for a URL.
    fn get(&self, url: &str, handler: RouteHandler);

    /// Whether responses may carry precompressed gzip bodies.
    fn supports_zip(&self) -> bool {
        false
    }
}

/// Shared router handle.
pub type RouterHandle = Arc<dyn Router>;

/// An incoming request, reduced to what handlers need.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub url: String,
    pub query: HashMap<String, String>,
    /// Whether the client sent `Accept-Encoding: gzip`.
    pub accepts_gzip: bool,
}

impl Request {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: HashMap::new(),
            accepts_gzip: false,
        }
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_gzip(mut self) -> Self {
        self.accepts_gzip = true;
        self
    }
}

/// An outgoing response being assembled by a handler.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status: u16,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    supports_zip: bool,
}

impl Response {
    pub fn new(supports_zip: bool) -> Self {
        Self {
            status: 0,
            headers: Vec::new(),
            body: Vec::new(),
            supports_zip,
        }
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Write a plain body.
    pub fn end(&mut self, body: &[u8]) {
        self.body = body.to_vec();
    }

    /// Write a body, preferring the precompressed variant when this router
    /// supports it and the client accepts gzip.
    pub fn zip(&mut self, request: &Request, body: &[u8], precompressed: Option<&[u8]>) {
        match precompressed {
            Some(zipped) if self.supports_zip && request.accepts_gzip => {
                self.set_header("content-encoding", "gzip");
                self.body = zipped.to_vec();
            }
            _ => self.end(body),
        }
    }
}

/// Context handed to template content when a routed asset renders.
#[derive(Debug, Clone, Default)]
pub struct RouteContext {
    pub url: String,
    pub query: HashMap<String, String>,
    /// Token bumped on watch events so clients can bust caches.
    pub cache_bust: Option<String>,
    /// JSON context from the asset's AUTOROUTE marker, if any.
    pub data: Option<serde_json::Value>,
}

/// In-memory router for tests: records registrations and dispatches
/// synthetic requests to the registered handlers.
#[derive(Clone, Default)]
pub struct MemoryRouter {
    routes: Arc<Mutex<Vec<(String, RouteHandler)>>>,
    zip: bool,
}

impl MemoryRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A router that advertises precompressed-body support.
    pub fn with_zip() -> Self {
        Self {
            routes: Arc::default(),
            zip: true,
        }
    }

    /// URLs registered so far, in registration order.
    pub fn urls(&self) -> Vec<String> {
        self.routes
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    /// Run the handler registered for a URL against a synthetic request.
    pub fn dispatch(&self, url: &str, request: Request) -> Option<Response> {
        let handler = {
            let routes = self.routes.lock().unwrap();
            routes
                .iter()
                .rev()
                .find(|(registered, _)| registered == url)
                .map(|(_, handler)| handler.clone())
        }?;
        let mut response = Response::new(self.zip);
        handler(&request, &mut response);
        Some(response)
    }
}

impl Router for MemoryRouter {
    fn get(&self, url: &str, handler: RouteHandler) {
        self.routes
            .lock()
            .unwrap()
            .push((url.to_string(), handler));
    }

    fn supports_zip(&self) -> bool {
        self.zip
    }
}
