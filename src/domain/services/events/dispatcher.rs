//--------------------------------------------------------------------------------------------------
// STRUCTS & TRAITS
//--------------------------------------------------------------------------------------------------
// | Name                    | Description                                       | Key Methods       |
// |-------------------------|---------------------------------------------------|------------------|
// | EventDispatcher         | Invokes handlers for one envelope, isolating      | dispatch          |
// |                         | failures from each other                          |                   |
//--------------------------------------------------------------------------------------------------

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::json;
use tracing::error;

use crate::domain::models::event::Envelope;

use super::event_types::EventError;
use super::handlers::EventHandler;
use super::reporting::{ErrorReporter, LogLevel, LogSink};

/// Delivers envelopes to handlers.
///
/// A handler that returns an error or panics is caught at this boundary: the
/// failure is logged with the event type and id, forwarded to the error
/// reporter, and delivery moves on to the next handler. A log sink or reporter
/// that panics while doing so is caught as well.
pub struct EventDispatcher {
    log: Arc<dyn LogSink>,
    reporter: Arc<dyn ErrorReporter>,
}

// Manually implement Debug for EventDispatcher to handle the non-Debug trait objects
impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher").finish_non_exhaustive()
    }
}

impl EventDispatcher {
    pub fn new(log: Arc<dyn LogSink>, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self { log, reporter }
    }

    /// Invokes every handler in order with `envelope`.
    ///
    /// # Returns
    /// The number of handlers that failed
    pub fn dispatch(&self, envelope: &Envelope, handlers: &[Arc<dyn EventHandler>]) -> usize {
        let mut failures = 0;

        for handler in handlers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle_event(envelope)));

            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => EventError::HandlerFailed {
                    handler: handler.name().to_string(),
                    reason: e.to_string(),
                },
                Err(payload) => EventError::HandlerPanicked {
                    handler: handler.name().to_string(),
                    message: panic_message(payload.as_ref()),
                },
            };

            failures += 1;
            self.report_failure(envelope, handler.name(), &error);
        }

        failures
    }

    fn report_failure(&self, envelope: &Envelope, handler: &str, error: &EventError) {
        let context = json!({
            "eventType": envelope.event_type().as_str(),
            "eventId": envelope.id.to_string(),
            "sequence": envelope.sequence,
            "handler": handler,
            "error": error.to_string(),
        });

        // Collaborators run under their own unwind guard so the batch keeps going
        let logged = panic::catch_unwind(AssertUnwindSafe(|| {
            self.log.log(LogLevel::Error, "Error in event handler", &context)
        }));
        let reported = panic::catch_unwind(AssertUnwindSafe(|| {
            self.reporter.report(error.code(), error, &context)
        }));

        for (collaborator, outcome) in [("log sink", logged), ("error reporter", reported)] {
            if let Err(payload) = outcome {
                error!(
                    context = %context,
                    "{} panicked while reporting a handler failure: {}",
                    collaborator,
                    panic_message(payload.as_ref())
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
