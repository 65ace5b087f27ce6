//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name                 | Description                                   | Key Methods              |
// |----------------------|-----------------------------------------------|--------------------------|
// | SubscriptionId       | Identity of one registration                  |                          |
// | SubscriptionRegistry | Event type -> handlers in registration order  | subscribe, unsubscribe   |
// | Subscription         | Disposer returned to the subscriber           | unsubscribe              |
//--------------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::debug;

use crate::domain::models::event::EventType;

use super::handlers::EventHandler;

/// Identity of a single registration. Registering the same handler twice
/// yields two distinct ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

struct Registration {
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
}

/// Maps each event type to its handlers, kept in registration order.
#[derive(Default)]
pub struct SubscriptionRegistry {
    by_type: HashMap<EventType, Vec<Registration>>,
    next_id: u64,
    active: usize,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("event_types", &self.by_type.len())
            .field("active", &self.active)
            .finish()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handler` to the list for `event_type`.
    pub fn subscribe(&mut self, event_type: EventType, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.by_type
            .entry(event_type)
            .or_default()
            .push(Registration { id, handler });
        self.active += 1;
        id
    }

    /// Removes exactly the registration `id`. Returns `false` if it was
    /// already gone.
    pub fn unsubscribe(&mut self, event_type: EventType, id: SubscriptionId) -> bool {
        let Some(registrations) = self.by_type.get_mut(&event_type) else {
            return false;
        };
        let Some(index) = registrations.iter().position(|r| r.id == id) else {
            return false;
        };

        registrations.remove(index);
        if registrations.is_empty() {
            self.by_type.remove(&event_type);
        }
        self.active -= 1;
        true
    }

    /// Snapshot of the handlers currently registered for `event_type`.
    pub fn handlers_for(&self, event_type: EventType) -> Vec<Arc<dyn EventHandler>> {
        self.by_type
            .get(&event_type)
            .map(|registrations| registrations.iter().map(|r| Arc::clone(&r.handler)).collect())
            .unwrap_or_default()
    }

    pub fn handler_count(&self, event_type: EventType) -> usize {
        self.by_type.get(&event_type).map_or(0, Vec::len)
    }

    /// Live registrations across every event type.
    pub fn active_handlers(&self) -> usize {
        self.active
    }

    pub fn clear(&mut self) {
        self.by_type.clear();
        self.active = 0;
    }
}

/// Disposer for one registration.
///
/// Dropping a `Subscription` does not unsubscribe; call [`Subscription::unsubscribe`].
/// The disposer only holds a weak reference, so it never keeps a bus alive.
#[derive(Clone)]
pub struct Subscription {
    id: SubscriptionId,
    event_type: EventType,
    registry: Weak<RwLock<SubscriptionRegistry>>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("event_type", &self.event_type)
            .finish()
    }
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        event_type: EventType,
        registry: &Arc<RwLock<SubscriptionRegistry>>,
    ) -> Self {
        Self {
            id,
            event_type,
            registry: Arc::downgrade(registry),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Removes this registration. Safe to call any number of times; only the
    /// first call on a live registration returns `true`.
    pub fn unsubscribe(&self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let removed = registry.write().unsubscribe(self.event_type, self.id);
        if removed {
            debug!("Unsubscribed handler {} from {}", self.id.0, self.event_type);
        }
        removed
    }

    /// Whether this registration is still live.
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| {
                registry
                    .read()
                    .by_type
                    .get(&self.event_type)
                    .is_some_and(|regs| regs.iter().any(|r| r.id == self.id))
            })
    }
}
