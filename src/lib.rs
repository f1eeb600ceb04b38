//! Hopper - asset loading and build pipeline
//!
//! Hopper recursively discovers files, wraps each in an in-memory Asset,
//! and applies a chain of transforms (compile, cull, wrap, minify, concat,
//! gzip) whose results can be routed over HTTP or written to disk, with
//! filesystem watching and incremental re-processing of whatever changed.
//!
//! The core is the Load/Asset dependency graph and its readiness protocol:
//! a counting [`Waiter`] tracks in-flight work across the tree, a
//! location-keyed [`Cache`] deduplicates assets between Loads, every
//! pipeline call records itself for replay, and a watched change re-runs
//! the recorded calls scoped to the affected assets.
//!
//! ```no_run
//! use hopper::Environment;
//!
//! let env = Environment::new("/srv/app");
//! env.load("scripts")
//!     .compile()
//!     .minify()
//!     .gzip()
//!     .concat(Some("/srv/app/all.js"))
//!     .then(|load| {
//!         for asset in load.assets() {
//!             println!("built {}", asset.location());
//!         }
//!     });
//! ```

pub mod asset;
pub mod cache;
pub mod compilers;
pub mod content;
pub mod dot_cache;
pub mod env;
pub mod error;
pub mod file;
pub mod filter;
pub mod load;
pub mod logger;
pub mod mime;
pub mod minifiers;
pub mod router;
pub mod shrinker;
pub mod waiter;
pub mod watch;

// Re-exports for convenience
pub use asset::{Asset, AssetKind, ContentMode, ContentScope};
pub use cache::Cache;
pub use compilers::{CompileOptions, CompilerHandle, TemplateCompiler};
pub use content::{Content, TemplateFn};
pub use env::Environment;
pub use error::{HopperError, HopperResult};
pub use filter::{Filter, FilterOutput};
pub use load::{IgnoreRule, Load, Source};
pub use logger::{Logger, MemoryLogger, TracingLogger};
pub use minifiers::{Minifier, MinifierHandle};
pub use router::{MemoryRouter, Request, Response, RouteContext, RouteHandler, Router};
pub use waiter::Waiter;
pub use watch::WatchEvent;
