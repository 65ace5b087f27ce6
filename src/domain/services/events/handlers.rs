//--------------------------------------------------------------------------------------------------
// STRUCTS & TRAITS
//--------------------------------------------------------------------------------------------------
// | Name                    | Description                                       | Key Methods       |
// |-------------------------|---------------------------------------------------|------------------|
// | EventHandler            | Trait for event handling                          | handle_event      |
// | TypedHandler            | Adapter narrowing an envelope to one payload type | handle_event      |
// | EventLogger             | Bounded in-memory history of handled events       | get_history       |
//--------------------------------------------------------------------------------------------------

use std::collections::VecDeque;
use std::marker::PhantomData;

use parking_lot::RwLock;

use crate::domain::models::event::{Envelope, EventPayload, EventType};

use super::event_types::EventResult;

/// Event handler trait for processing events
///
/// Any `Fn(&Envelope) -> EventResult<()>` closure is a handler. Implement the
/// trait directly for handlers that carry state or listen to several types.
pub trait EventHandler: Send + Sync {
    /// Processes an event
    fn handle_event(&self, event: &Envelope) -> EventResult<()>;

    /// Returns the types of events this handler processes, used by
    /// `EventBus::register_handler`
    fn event_types(&self) -> Vec<EventType> {
        Vec::new()
    }

    /// Name used in logs and error reports
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> EventHandler for F
where
    F: Fn(&Envelope) -> EventResult<()> + Send + Sync,
{
    fn handle_event(&self, event: &Envelope) -> EventResult<()> {
        self(event)
    }
}

/// Wraps a closure taking the narrowed payload `P`.
pub struct TypedHandler<P, F> {
    handler: F,
    _payload: PhantomData<fn(&P)>,
}

impl<P, F> TypedHandler<P, F>
where
    P: EventPayload,
    F: Fn(&Envelope, &P) -> EventResult<()> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _payload: PhantomData,
        }
    }
}

impl<P, F> EventHandler for TypedHandler<P, F>
where
    P: EventPayload,
    F: Fn(&Envelope, &P) -> EventResult<()> + Send + Sync,
{
    fn handle_event(&self, event: &Envelope) -> EventResult<()> {
        match P::narrow(&event.event) {
            Some(payload) => (self.handler)(event, payload),
            // Registered under P::EVENT_TYPE only, so nothing else reaches us
            None => Ok(()),
        }
    }

    fn event_types(&self) -> Vec<EventType> {
        vec![P::EVENT_TYPE]
    }

    fn name(&self) -> &str {
        std::any::type_name::<F>()
    }
}

/// A simple in-memory event logger for debug tooling
pub struct EventLogger {
    /// Maximum number of events to keep in history
    max_history: usize,
    /// Event history, oldest first
    history: RwLock<VecDeque<Envelope>>,
}

impl EventLogger {
    /// Creates a new event logger
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history,
            history: RwLock::new(VecDeque::with_capacity(max_history)),
        }
    }

    /// Returns the event history
    pub fn get_history(&self) -> Vec<Envelope> {
        self.history.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.history.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.read().is_empty()
    }

    pub fn clear(&self) {
        self.history.write().clear();
    }
}

impl EventHandler for EventLogger {
    fn handle_event(&self, event: &Envelope) -> EventResult<()> {
        if self.max_history == 0 {
            return Ok(());
        }

        let mut history = self.history.write();

        // Remove oldest event if at capacity
        if history.len() >= self.max_history {
            history.pop_front();
        }

        history.push_back(event.clone());
        Ok(())
    }

    fn event_types(&self) -> Vec<EventType> {
        EventType::ALL.to_vec()
    }

    fn name(&self) -> &str {
        "EventLogger"
    }
}
