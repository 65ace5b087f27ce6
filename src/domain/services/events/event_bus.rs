//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module implements the central event bus of the game. Producers (movement, combat,
// world state) publish during a frame; the game loop drains the bus once per frame and the
// bus delivers every drained event to the handlers registered for its type.
//
// | Component       | Description                                                        |
// |-----------------|--------------------------------------------------------------------|
// | EventBus        | Facade over the ring buffer, aggregator, pool, registry, metrics   |
// | EventBusBuilder | Injects configuration, aggregation rules and collaborators         |
// | WeakEventBus    | Non-owning handle for handlers that publish back into the bus      |
//
//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name          | Description                                   | Key Methods                   |
// |---------------|-----------------------------------------------|-------------------------------|
// | EventBus      | Central event publishing component            | publish, subscribe,           |
// |               |                                               | process_events, flush,        |
// |               |                                               | get_metrics                   |
//
//--------------------------------------------------------------------------------------------------

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde_json::json;
use uuid::Uuid;

use crate::config::{BusConfig, DEFAULT_BUFFER_SIZE};
use crate::domain::models::event::{Envelope, EventPayload, EventType, GameEvent};

use super::aggregation::{AggregatedEvent, AggregationRule, Aggregator, Offer};
use super::clock::{Clock, SystemClock};
use super::dispatcher::EventDispatcher;
use super::event_types::{EventError, EventResult};
use super::handlers::{EventHandler, TypedHandler};
use super::metrics::{MetricsCollector, MetricsSnapshot};
use super::pool::EnvelopePool;
use super::registry::{Subscription, SubscriptionRegistry};
use super::reporting::{ErrorHandler, ErrorReporter, LogLevel, LogSink, TracingLogSink};
use super::ring_buffer::RingBuffer;

/// Mutable state guarded by one lock. Never held while a handler runs.
struct BusState {
    buffer: RingBuffer<Box<Envelope>>,
    aggregator: Option<Aggregator>,
    pool: Option<EnvelopePool>,
    metrics: MetricsCollector,
    /// Whether an overflow was already logged since the last drain
    overflow_logged: bool,
}

struct Shared {
    config: BusConfig,
    state: Mutex<BusState>,
    registry: Arc<RwLock<SubscriptionRegistry>>,
    dispatcher: EventDispatcher,
    log: Arc<dyn LogSink>,
    clock: Arc<dyn Clock>,
    sequence: AtomicU64,
    dispatching: AtomicBool,
}

/// Central event bus for publishing and subscribing to game events.
///
/// Publishing only buffers; nothing is delivered until the owner calls
/// [`EventBus::process_events`], normally once per frame. The buffer has a fixed
/// capacity and drops the oldest event when a publish would exceed it.
///
/// `EventBus` is a cheap handle: clones share the same buffer, registry and
/// metrics.
///
/// # Examples
///
/// ```
/// use dungeon_bus::{EventBus, EventType, Envelope, EventResult, DamageDealt, DamageType};
///
/// let bus = EventBus::default();
/// let subscription = bus.subscribe(EventType::DamageDealt, |event: &Envelope| -> EventResult<()> {
///     println!("hit: {:?}", event.event);
///     Ok(())
/// });
///
/// bus.publish(DamageDealt {
///     attacker_id: Some(1),
///     target_id: 2,
///     damage: 4,
///     damage_type: DamageType::Physical,
///     position: None,
/// });
/// assert_eq!(bus.process_events(), 1);
/// subscription.unsubscribe();
/// ```
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<Shared>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("EventBus")
            .field("config", &self.shared.config)
            .field("buffered", &state.buffer.len())
            .field("registry", &*self.shared.registry.read())
            .finish()
    }
}

/// Configures and builds an [`EventBus`].
pub struct EventBusBuilder {
    config: BusConfig,
    rules: Vec<AggregationRule>,
    log: Option<Arc<dyn LogSink>>,
    reporter: Option<Arc<dyn ErrorReporter>>,
    clock: Option<Arc<dyn Clock>>,
}

impl EventBusBuilder {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            rules: Vec::new(),
            log: None,
            reporter: None,
            clock: None,
        }
    }

    /// Adds an aggregation rule. Without any rule, an aggregating bus uses
    /// [`AggregationRule::damage_by_target`].
    pub fn aggregation_rule(mut self, rule: AggregationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn log_sink(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validates the configuration and builds the bus.
    pub fn build(self) -> EventResult<EventBus> {
        self.config.validate()?;
        let capacity = NonZeroUsize::new(self.config.buffer_size).ok_or_else(|| {
            EventError::InvalidConfig("buffer_size must be greater than zero".to_string())
        })?;
        Ok(self.assemble(capacity))
    }

    fn assemble(self, capacity: NonZeroUsize) -> EventBus {
        let log: Arc<dyn LogSink> = match self.log {
            Some(log) => log,
            None => Arc::new(TracingLogSink),
        };
        let reporter: Arc<dyn ErrorReporter> = match self.reporter {
            Some(reporter) => reporter,
            None => Arc::new(ErrorHandler::new()),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let config = self.config;

        let aggregator = config.enable_aggregation.then(|| {
            let rules = if self.rules.is_empty() {
                vec![AggregationRule::damage_by_target()]
            } else {
                self.rules
            };
            Aggregator::new(rules, config.aggregation_window_ms)
        });
        let pool = config
            .enable_pooling
            .then(|| EnvelopePool::new(config.max_pool_size));

        log.log(
            LogLevel::Info,
            "Created new EventBus",
            &json!({
                "bufferSize": capacity.get(),
                "aggregation": config.enable_aggregation,
                "pooling": config.enable_pooling,
            }),
        );

        EventBus {
            shared: Arc::new(Shared {
                state: Mutex::new(BusState {
                    buffer: RingBuffer::new(capacity),
                    aggregator,
                    pool,
                    metrics: MetricsCollector::new(config.rate_window_ms),
                    overflow_logged: false,
                }),
                registry: Arc::new(RwLock::new(SubscriptionRegistry::new())),
                dispatcher: EventDispatcher::new(Arc::clone(&log), reporter),
                log,
                clock,
                sequence: AtomicU64::new(1),
                dispatching: AtomicBool::new(false),
                config,
            }),
        }
    }
}

/// Resets the dispatching flag when a dispatch pass ends, however it ends.
struct DispatchGuard<'a>(&'a AtomicBool);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// What the first overflow since the last drain evicted, logged once the
/// state lock is released.
struct Overflow {
    event_type: EventType,
    event_id: Uuid,
}

impl EventBus {
    /// Creates a bus with the default collaborators.
    pub fn new(config: BusConfig) -> EventResult<Self> {
        EventBusBuilder::new(config).build()
    }

    pub fn builder(config: BusConfig) -> EventBusBuilder {
        EventBusBuilder::new(config)
    }

    /// Publishes an event.
    ///
    /// The event is routed through aggregation (when enabled for its type) and
    /// then buffered until the next [`process_events`](Self::process_events).
    /// Overflow never fails the call: the oldest buffered event is dropped.
    pub fn publish(&self, event: impl Into<GameEvent>) {
        let event = event.into();
        let now = self.shared.clock.now_ms();

        let overflow = {
            let mut state = self.shared.state.lock();
            state.metrics.record_published();

            let offer = match state.aggregator.as_mut() {
                Some(aggregator) => aggregator.offer(event, now),
                None => Offer::Bypass(event),
            };

            match offer {
                Offer::Bypass(event) => {
                    let envelope = self.envelope(event, now);
                    self.enqueue(&mut state, envelope)
                }
                Offer::Held { released: Some(aggregate) } => {
                    let envelope = self.aggregate_envelope(aggregate);
                    self.enqueue(&mut state, envelope)
                }
                Offer::Held { released: None } => None,
            }
        };

        if let Some(overflow) = overflow {
            self.log_overflow(overflow);
        }
    }

    /// Drains the buffer and delivers every drained event, oldest first, to
    /// the handlers registered for its type in registration order.
    ///
    /// Aggregates whose window has elapsed are released into the buffer
    /// first. Events published by handlers during this call are buffered for
    /// the next call. A re-entrant call from inside a handler does nothing.
    ///
    /// # Returns
    /// The number of events dispatched
    pub fn process_events(&self) -> usize {
        if self.shared.dispatching.swap(true, Ordering::SeqCst) {
            self.shared.log.log(
                LogLevel::Warn,
                "process_events called while a dispatch pass is running; ignoring",
                &json!({}),
            );
            return 0;
        }
        let _guard = DispatchGuard(&self.shared.dispatching);

        let now = self.shared.clock.now_ms();
        let (batch, overflow) = {
            let mut state = self.shared.state.lock();
            let mut overflow = None;

            let due = state
                .aggregator
                .as_mut()
                .map(|aggregator| aggregator.take_due(now))
                .unwrap_or_default();
            for aggregate in due {
                let envelope = self.aggregate_envelope(aggregate);
                overflow = self.enqueue(&mut state, envelope).or(overflow);
            }

            state.overflow_logged = false;
            (state.buffer.drain_all(), overflow)
        };

        if let Some(overflow) = overflow {
            self.log_overflow(overflow);
        }

        let mut failures = 0u64;
        for envelope in &batch {
            // Snapshot so handlers may subscribe or unsubscribe while we deliver
            let handlers = self.shared.registry.read().handlers_for(envelope.event_type());
            failures += self.shared.dispatcher.dispatch(envelope, &handlers) as u64;
        }

        let dispatched = batch.len();
        {
            let mut state = self.shared.state.lock();
            let finished = self.shared.clock.now_ms();
            state.metrics.record_processed(dispatched as u64, finished);
            state.metrics.record_handler_failures(failures);
            if let Some(pool) = state.pool.as_mut() {
                for shell in batch {
                    pool.release(shell);
                }
            }
        }

        if dispatched > 0 {
            self.shared.log.log(
                LogLevel::Trace,
                "Processed events",
                &json!({ "count": dispatched, "handlerFailures": failures }),
            );
        }
        dispatched
    }

    /// Discards every buffered event and pending aggregate without delivering
    /// any of them.
    pub fn flush(&self) {
        let (buffered, pending) = {
            let mut state = self.shared.state.lock();
            let shells = state.buffer.clear();
            let buffered = shells.len() as u64;
            let pending = state
                .aggregator
                .as_mut()
                .map_or(0, |aggregator| aggregator.clear());

            if let Some(pool) = state.pool.as_mut() {
                for shell in shells {
                    pool.release(shell);
                }
            }
            state.metrics.record_flushed(buffered + pending);
            state.overflow_logged = false;
            (buffered, pending)
        };

        self.shared.log.log(
            LogLevel::Debug,
            "Flushed event bus",
            &json!({ "bufferedEvents": buffered, "aggregatedEvents": pending }),
        );
    }

    /// Registers `handler` for `event_type`.
    ///
    /// Handlers for the same type run in registration order. The returned
    /// [`Subscription`] removes exactly this registration.
    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> Subscription
    where
        F: Fn(&Envelope) -> EventResult<()> + Send + Sync + 'static,
    {
        self.subscribe_handler(event_type, Arc::new(handler))
    }

    /// Registers a handler that receives the narrowed payload `P`.
    pub fn on<P, F>(&self, handler: F) -> Subscription
    where
        P: EventPayload,
        F: Fn(&Envelope, &P) -> EventResult<()> + Send + Sync + 'static,
    {
        self.subscribe_handler(P::EVENT_TYPE, Arc::new(TypedHandler::<P, F>::new(handler)))
    }

    /// Registers a shared handler for one event type.
    pub fn subscribe_handler(&self, event_type: EventType, handler: Arc<dyn EventHandler>) -> Subscription {
        let name = handler.name().to_string();
        let id = self.shared.registry.write().subscribe(event_type, handler);
        self.shared.log.log(
            LogLevel::Debug,
            "Registered handler",
            &json!({ "eventType": event_type.as_str(), "handler": name, "subscription": id.get() }),
        );
        Subscription::new(id, event_type, &self.shared.registry)
    }

    /// Registers `handler` for every type listed by its `event_types()`.
    pub fn register_handler(&self, handler: Arc<dyn EventHandler>) -> Vec<Subscription> {
        handler
            .event_types()
            .into_iter()
            .map(|event_type| self.subscribe_handler(event_type, Arc::clone(&handler)))
            .collect()
    }

    /// Returns a snapshot of the bus counters.
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let active_handlers = self.shared.registry.read().active_handlers();
        let state = self.shared.state.lock();

        MetricsSnapshot {
            total_events_processed: state.metrics.total_events_processed(),
            active_handlers,
            buffer_usage: state.buffer.usage(),
            dropped_events: state.buffer.dropped(),
            events_per_second: state.metrics.events_per_second(),
            total_events_published: state.metrics.total_events_published(),
            buffered_events: state.buffer.len(),
            buffer_capacity: state.buffer.capacity(),
            pending_aggregates: state.aggregator.as_ref().map_or(0, Aggregator::pending_len),
            events_aggregated: state.aggregator.as_ref().map_or(0, Aggregator::absorbed),
            handler_failures: state.metrics.handler_failures(),
            flushed_events: state.metrics.flushed_events(),
            pool_available: state.pool.as_ref().map_or(0, EnvelopePool::available),
        }
    }

    /// Zeroes every cumulative counter, including dropped events. Meant for
    /// test isolation.
    pub fn reset_metrics(&self) {
        let mut state = self.shared.state.lock();
        state.metrics.reset();
        state.buffer.reset_dropped();
        if let Some(aggregator) = state.aggregator.as_mut() {
            aggregator.reset_absorbed();
        }
    }

    /// Returns a handle that does not keep the bus alive.
    pub fn downgrade(&self) -> WeakEventBus {
        WeakEventBus {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.shared.config
    }

    /// Ring buffer capacity.
    pub fn capacity(&self) -> usize {
        self.shared.config.buffer_size
    }

    /// Number of events waiting for the next dispatch pass.
    pub fn pending_events(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }

    pub fn handler_count(&self, event_type: EventType) -> usize {
        self.shared.registry.read().handler_count(event_type)
    }

    /// Removes every subscription.
    pub fn clear_subscriptions(&self) {
        self.shared.registry.write().clear();
    }

    fn envelope(&self, event: GameEvent, timestamp_ms: i64) -> Envelope {
        Envelope {
            id: Uuid::new_v4(),
            sequence: self.shared.sequence.fetch_add(1, Ordering::SeqCst),
            timestamp_ms,
            event,
        }
    }

    fn aggregate_envelope(&self, aggregate: AggregatedEvent) -> Envelope {
        self.envelope(aggregate.event, aggregate.timestamp_ms)
    }

    /// Buffers `envelope`, returning what was evicted if this is the first
    /// overflow since the last drain.
    fn enqueue(&self, state: &mut BusState, envelope: Envelope) -> Option<Overflow> {
        let shell = match state.pool.as_mut() {
            Some(pool) => pool.acquire(envelope),
            None => Box::new(envelope),
        };

        let evicted = state.buffer.enqueue(shell)?;
        let overflow = (!state.overflow_logged).then(|| Overflow {
            event_type: evicted.event_type(),
            event_id: evicted.id,
        });
        state.overflow_logged = true;

        if let Some(pool) = state.pool.as_mut() {
            pool.release(evicted);
        }
        overflow
    }

    fn log_overflow(&self, overflow: Overflow) {
        self.shared.log.log(
            LogLevel::Warn,
            "Event buffer full, dropping oldest events",
            &json!({
                "capacity": self.shared.config.buffer_size,
                "droppedEventType": overflow.event_type.as_str(),
                "droppedEventId": overflow.event_id.to_string(),
            }),
        );
    }
}

impl Default for EventBus {
    /// A bus with the default configuration and collaborators.
    fn default() -> Self {
        let capacity = NonZeroUsize::new(DEFAULT_BUFFER_SIZE).unwrap_or(NonZeroUsize::MIN);
        EventBusBuilder::new(BusConfig::default()).assemble(capacity)
    }
}

/// Non-owning handle to an [`EventBus`].
///
/// Handlers that publish follow-up events should capture this instead of an
/// `EventBus` clone, which would keep the bus alive through its own registry.
#[derive(Clone)]
pub struct WeakEventBus {
    shared: Weak<Shared>,
}

impl fmt::Debug for WeakEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakEventBus")
            .field("alive", &(self.shared.strong_count() > 0))
            .finish()
    }
}

impl WeakEventBus {
    pub fn upgrade(&self) -> Option<EventBus> {
        self.shared.upgrade().map(|shared| EventBus { shared })
    }

    /// Publishes through the bus if it is still alive.
    pub fn publish(&self, event: impl Into<GameEvent>) -> EventResult<()> {
        match self.upgrade() {
            Some(bus) => {
                bus.publish(event);
                Ok(())
            }
            None => Err(EventError::PublishError("event bus has been dropped".to_string())),
        }
    }
}
