//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Collaborators injected into the bus at construction. The bus never reaches for a global
// logger or error handler; it only talks to these traits.
//
// | Component        | Description                                                      |
// |------------------|------------------------------------------------------------------|
// | LogSink          | Accepts structured log calls (level, message, JSON context)      |
// | TracingLogSink   | Default sink forwarding to `tracing`                             |
// | ErrorReporter    | Accepts an error code, the error and its context                 |
// | ErrorHandler     | Default reporter fanning out to registered listeners             |
//--------------------------------------------------------------------------------------------------

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use super::event_types::{ErrorCode, EventError};

/// Severity of a structured log call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Receives the bus's own diagnostics.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, context: &Value);
}

/// Forwards structured log calls to `tracing`, with the JSON context rendered
/// as a `context` field.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, level: LogLevel, message: &str, context: &Value) {
        match level {
            LogLevel::Trace => trace!(context = %context, "{}", message),
            LogLevel::Debug => debug!(context = %context, "{}", message),
            LogLevel::Info => info!(context = %context, "{}", message),
            LogLevel::Warn => warn!(context = %context, "{}", message),
            LogLevel::Error => error!(context = %context, "{}", message),
        }
    }
}

/// Receives handler failures caught at the dispatch boundary.
#[cfg_attr(test, mockall::automock)]
pub trait ErrorReporter: Send + Sync {
    fn report(&self, code: ErrorCode, error: &EventError, context: &Value);
}

/// Listener notified by [`ErrorHandler`] for every reported error.
pub type ErrorListener = Arc<dyn Fn(ErrorCode, &EventError, &Value) + Send + Sync>;

/// Identity of a registered error listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(ListenerId, ErrorListener)>,
}

/// Default [`ErrorReporter`]: notifies every registered listener in
/// registration order, or logs the error through `tracing` when nobody listens.
#[derive(Default)]
pub struct ErrorHandler {
    listeners: RwLock<Listeners>,
}

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("listeners", &self.listeners.read().entries.len())
            .finish()
    }
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(ErrorCode, &EventError, &Value) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write();
        listeners.next_id += 1;
        let id = ListenerId(listeners.next_id);
        listeners.entries.push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.entries.len();
        listeners.entries.retain(|(entry_id, _)| *entry_id != id);
        listeners.entries.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().entries.len()
    }
}

impl ErrorReporter for ErrorHandler {
    fn report(&self, code: ErrorCode, error: &EventError, context: &Value) {
        // Listeners may register or remove listeners, so call them unlocked
        let listeners: Vec<ErrorListener> = self
            .listeners
            .read()
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        if listeners.is_empty() {
            error!(code = %code, context = %context, "{}", error);
            return;
        }

        for listener in listeners {
            listener(code, error, context);
        }
    }
}
