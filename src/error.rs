//! Error types for Hopper
//!
//! Uses `thiserror` for library errors. Pipeline stages follow a
//! continue-on-error policy: failures are reported through the pluggable
//! [`Logger`](crate::logger::Logger) and the stage no-ops, while the
//! lower-level helpers return `HopperResult` for callers that want a typed
//! error channel.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Hopper operations
pub type HopperResult<T> = Result<T, HopperError>;

/// Main error type for Hopper operations
#[derive(Error, Debug)]
pub enum HopperError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No compiler could be resolved for a registry name
    #[error("could not load compiler '{name}'")]
    UnknownCompiler { name: String },

    /// No minifier could be resolved for a registry name
    #[error("could not load minifier '{name}'")]
    UnknownMinifier { name: String },

    /// Minification of one asset failed
    #[error("failed to minify \"{location}\": {message}")]
    MinifyFailed { location: String, message: String },

    /// A route was requested before a router was configured
    #[error("cannot route until a router has been configured")]
    NoRouter,

    /// Invalid JSON in an AUTOROUTE context marker
    #[error("invalid AUTOROUTE context in {location}: {source}")]
    InvalidRouteContext {
        location: String,
        source: serde_json::Error,
    },

    /// Dependency relaxation did not converge within the iteration cap
    #[error("dependency ordering did not converge after {passes} passes (cycle suspected)")]
    DependencyCycle { passes: usize },

    /// A filter name had no registered producer
    #[error("no filter registered under '{name}'")]
    UnknownFilter { name: String },

    /// Installing a filesystem watch failed
    #[error("could not watch {path}: {message}")]
    WatchFailed { path: PathBuf, message: String },
}
