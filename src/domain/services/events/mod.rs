//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module implements the in-process event bus that decouples gameplay producers
// (movement, combat, world state) from consumers (audio, UI, analytics). Publishing is
// buffered; the game loop drains and dispatches once per frame.
//
// | Component                | Description                                                |
// |--------------------------|-----------------------------------------------------------|
// | EventBus                 | Facade: publish, subscribe, process_events, flush, metrics |
// | RingBuffer               | Fixed-capacity FIFO with drop-oldest overflow              |
// | Aggregator               | Merges same-key bursts inside a time window                |
// | EnvelopePool             | Recycles envelope storage between publishes                |
// | SubscriptionRegistry     | Event type -> handlers in registration order               |
// | EventDispatcher          | Delivers one envelope, isolating handler failures          |
// | MetricsCollector         | Running counters behind MetricsSnapshot                    |
// | LogSink / ErrorReporter  | Injected logging and error reporting collaborators         |
//--------------------------------------------------------------------------------------------------

mod aggregation;
mod clock;
mod dispatcher;
mod event_bus;
mod event_types;
mod handlers;
mod metrics;
mod pool;
mod registry;
mod reporting;
mod ring_buffer;

#[cfg(test)]
mod tests;

// Re-exports
pub use aggregation::{AggregatedEvent, AggregationRule, Aggregator, KeyFn, MergeFn, Offer};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::EventDispatcher;
pub use event_bus::{EventBus, EventBusBuilder, WeakEventBus};
pub use event_types::{ErrorCode, EventError, EventResult};
pub use handlers::{EventHandler, EventLogger, TypedHandler};
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use pool::{EnvelopePool, PoolStats};
pub use registry::{Subscription, SubscriptionId, SubscriptionRegistry};
pub use reporting::{ErrorHandler, ErrorListener, ErrorReporter, ListenerId, LogLevel, LogSink, TracingLogSink};
pub use ring_buffer::RingBuffer;
