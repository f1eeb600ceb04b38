//! Logger port - abstraction over failure reporting
//!
//! Every recoverable pipeline failure is reported here rather than
//! propagated, so a host application can route Hopper's complaints into its
//! own logging without the pipeline aborting sibling work.

use std::sync::Arc;

/// Abstract logger interface
///
/// Implementations:
/// - `TracingLogger` - emits `tracing` events (default)
/// - test doubles that collect messages for assertions
pub trait Logger: Send + Sync {
    /// Report a failure
    fn error(&self, message: &str);

    /// Report a recoverable anomaly
    fn warn(&self, message: &str) {
        self.error(message);
    }
}

/// Shared logger handle
pub type LoggerHandle = Arc<dyn Logger>;

/// Default logger backed by the `tracing` ecosystem
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn error(&self, message: &str) {
        tracing::error!(target: "hopper", "{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "hopper", "{message}");
    }
}

/// In-memory logger that records every message
///
/// Uses `Arc<Mutex<>>` internally so it can be cloned and shared with the
/// Environment while the test keeps a handle for assertions.
#[derive(Clone, Default)]
pub struct MemoryLogger {
    messages: Arc<std::sync::Mutex<Vec<String>>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every message logged so far
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    /// True if any recorded message contains the needle
    pub fn contains(&self, needle: &str) -> bool {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.contains(needle))
    }
}

impl Logger for MemoryLogger {
    fn error(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}
