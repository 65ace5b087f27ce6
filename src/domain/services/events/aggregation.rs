//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Pre-enqueue stage that merges bursts of same-key events into one event.
//
// | Component        | Description                                                            |
// |------------------|------------------------------------------------------------------------|
// | AggregationRule  | Which event type aggregates, how it is keyed and how events merge      |
// | Aggregator       | Pending aggregates keyed by (type, key), each with a deadline          |
// | Offer            | Outcome of offering an event to the aggregator                         |
// | AggregatedEvent  | A merged event released once its window elapsed                        |
//
// A pending aggregate opens on the first event of its key, absorbs every matching event
// that arrives before `first_seen + window`, and is released when the window has elapsed.
//--------------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::fmt;

use tracing::trace;

use crate::domain::models::event::{EventType, GameEvent};

/// Extracts the aggregation key of an event, `None` to bypass aggregation.
pub type KeyFn = fn(&GameEvent) -> Option<u64>;

/// Folds `incoming` into the pending aggregate `acc`.
pub type MergeFn = fn(acc: &mut GameEvent, incoming: &GameEvent);

/// Aggregation policy for one event type.
#[derive(Clone, Copy)]
pub struct AggregationRule {
    pub event_type: EventType,
    pub key: KeyFn,
    pub merge: MergeFn,
}

impl fmt::Debug for AggregationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregationRule")
            .field("event_type", &self.event_type)
            .finish_non_exhaustive()
    }
}

impl AggregationRule {
    pub fn new(event_type: EventType, key: KeyFn, merge: MergeFn) -> Self {
        Self { event_type, key, merge }
    }

    /// Damage hits on the same target: damage is summed, every other field
    /// takes the value of the latest hit.
    pub fn damage_by_target() -> Self {
        Self::new(EventType::DamageDealt, damage_key, merge_damage)
    }

    /// Steps of the same entity: keeps where the entity started and where it
    /// ended up.
    pub fn movement_by_entity() -> Self {
        Self::new(EventType::EntityMoved, movement_key, merge_movement)
    }
}

fn damage_key(event: &GameEvent) -> Option<u64> {
    match event {
        GameEvent::DamageDealt(hit) => Some(u64::from(hit.target_id)),
        _ => None,
    }
}

fn merge_damage(acc: &mut GameEvent, incoming: &GameEvent) {
    if let (GameEvent::DamageDealt(acc), GameEvent::DamageDealt(hit)) = (acc, incoming) {
        acc.damage = acc.damage.saturating_add(hit.damage);
        acc.attacker_id = hit.attacker_id;
        acc.damage_type = hit.damage_type;
        acc.position = hit.position.or(acc.position);
    }
}

fn movement_key(event: &GameEvent) -> Option<u64> {
    match event {
        GameEvent::EntityMoved(step) => Some(u64::from(step.entity_id)),
        _ => None,
    }
}

fn merge_movement(acc: &mut GameEvent, incoming: &GameEvent) {
    if let (GameEvent::EntityMoved(acc), GameEvent::EntityMoved(step)) = (acc, incoming) {
        acc.new_position = step.new_position;
    }
}

/// A merged event whose window has elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedEvent {
    pub event: GameEvent,
    /// Time of the first event folded into this aggregate
    pub first_seen_ms: i64,
    /// Time of the latest event folded into this aggregate
    pub timestamp_ms: i64,
    /// Number of published events this aggregate stands for
    pub merged_count: u32,
}

/// Result of [`Aggregator::offer`].
#[derive(Debug, PartialEq, Eq)]
pub enum Offer {
    /// The event type is not aggregated; enqueue the event as is.
    Bypass(GameEvent),
    /// The event was absorbed. If an expired aggregate for the same key had to
    /// make room, it is returned and must be enqueued now.
    Held { released: Option<AggregatedEvent> },
}

#[derive(Debug)]
struct PendingAggregate {
    aggregate: AggregatedEvent,
    deadline_ms: i64,
    /// Opening order, to release aggregates with equal deadlines stably
    order: u64,
}

/// Holds at most one pending aggregate per `(event type, key)`.
#[derive(Debug)]
pub struct Aggregator {
    rules: HashMap<EventType, AggregationRule>,
    window_ms: i64,
    pending: HashMap<(EventType, u64), PendingAggregate>,
    next_order: u64,
    /// Events folded into an already open aggregate
    absorbed: u64,
}

impl Aggregator {
    /// Creates an aggregator. A later rule for the same event type replaces an
    /// earlier one.
    pub fn new(rules: impl IntoIterator<Item = AggregationRule>, window_ms: u64) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| (rule.event_type, rule))
            .collect();
        Self {
            rules,
            window_ms: i64::try_from(window_ms).unwrap_or(i64::MAX),
            pending: HashMap::new(),
            next_order: 0,
            absorbed: 0,
        }
    }

    pub fn is_aggregated(&self, event_type: EventType) -> bool {
        self.rules.contains_key(&event_type)
    }

    /// Offers a freshly published event.
    pub fn offer(&mut self, event: GameEvent, now_ms: i64) -> Offer {
        let event_type = event.event_type();
        let Some(rule) = self.rules.get(&event_type).copied() else {
            return Offer::Bypass(event);
        };
        let Some(key) = (rule.key)(&event) else {
            return Offer::Bypass(event);
        };

        let mut released = None;
        if let Some(pending) = self.pending.get_mut(&(event_type, key)) {
            if now_ms < pending.deadline_ms {
                (rule.merge)(&mut pending.aggregate.event, &event);
                pending.aggregate.timestamp_ms = now_ms;
                pending.aggregate.merged_count += 1;
                self.absorbed += 1;
                trace!(
                    "Merged {} into aggregate for key {} ({} events)",
                    event_type, key, pending.aggregate.merged_count
                );
                return Offer::Held { released: None };
            }
            released = self
                .pending
                .remove(&(event_type, key))
                .map(|expired| expired.aggregate);
        }

        let order = self.next_order;
        self.next_order += 1;
        self.pending.insert(
            (event_type, key),
            PendingAggregate {
                aggregate: AggregatedEvent {
                    event,
                    first_seen_ms: now_ms,
                    timestamp_ms: now_ms,
                    merged_count: 1,
                },
                deadline_ms: now_ms.saturating_add(self.window_ms),
                order,
            },
        );
        Offer::Held { released }
    }

    /// Removes and returns every aggregate whose window has elapsed, in
    /// deadline order.
    pub fn take_due(&mut self, now_ms: i64) -> Vec<AggregatedEvent> {
        let due_keys: Vec<_> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline_ms <= now_ms)
            .map(|(key, _)| *key)
            .collect();

        let mut due: Vec<PendingAggregate> = due_keys
            .into_iter()
            .filter_map(|key| self.pending.remove(&key))
            .collect();
        due.sort_by_key(|pending| (pending.deadline_ms, pending.order));
        due.into_iter().map(|pending| pending.aggregate).collect()
    }

    /// Discards every pending aggregate, returning how many events they stood for.
    pub fn clear(&mut self) -> u64 {
        self.pending
            .drain()
            .map(|(_, pending)| u64::from(pending.aggregate.merged_count))
            .sum()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn absorbed(&self) -> u64 {
        self.absorbed
    }

    pub fn reset_absorbed(&mut self) {
        self.absorbed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::event::{DamageDealt, DamageType, EntityMoved, MenuOpened, Position};

    fn hit(target_id: u32, damage: u32) -> GameEvent {
        DamageDealt {
            attacker_id: Some(1),
            target_id,
            damage,
            damage_type: DamageType::Physical,
            position: None,
        }
        .into()
    }

    fn damage_of(event: &GameEvent) -> u32 {
        match event {
            GameEvent::DamageDealt(hit) => hit.damage,
            other => panic!("expected DamageDealt, got {:?}", other),
        }
    }

    #[test]
    fn test_unconfigured_type_bypasses() {
        let mut agg = Aggregator::new([AggregationRule::damage_by_target()], 100);
        let event: GameEvent = MenuOpened { menu: "inventory".into() }.into();

        assert_eq!(agg.offer(event.clone(), 0), Offer::Bypass(event));
        assert_eq!(agg.pending_len(), 0);
    }

    #[test]
    fn test_is_aggregated_follows_rules() {
        let agg = Aggregator::new(
            [AggregationRule::damage_by_target(), AggregationRule::movement_by_entity()],
            100,
        );
        assert!(agg.is_aggregated(EventType::DamageDealt));
        assert!(agg.is_aggregated(EventType::EntityMoved));
        assert!(!agg.is_aggregated(EventType::MenuOpened));

        let empty = Aggregator::new(Vec::new(), 100);
        assert!(EventType::ALL.iter().all(|t| !empty.is_aggregated(*t)));
    }

    #[test]
    fn test_merges_within_window() {
        let mut agg = Aggregator::new([AggregationRule::damage_by_target()], 100);

        assert_eq!(agg.offer(hit(5, 5), 0), Offer::Held { released: None });
        assert_eq!(agg.offer(hit(5, 3), 40), Offer::Held { released: None });
        assert_eq!(agg.pending_len(), 1);
        assert_eq!(agg.absorbed(), 1);

        assert!(agg.take_due(99).is_empty());
        let due = agg.take_due(100);
        assert_eq!(due.len(), 1);
        assert_eq!(damage_of(&due[0].event), 8);
        assert_eq!(due[0].merged_count, 2);
        assert_eq!(due[0].first_seen_ms, 0);
        assert_eq!(due[0].timestamp_ms, 40);
        assert_eq!(agg.pending_len(), 0);
    }

    #[test]
    fn test_keys_are_independent() {
        let mut agg = Aggregator::new([AggregationRule::damage_by_target()], 100);
        agg.offer(hit(1, 2), 0);
        agg.offer(hit(2, 7), 10);
        agg.offer(hit(1, 4), 20);

        let due = agg.take_due(200);
        let damages: Vec<u32> = due.iter().map(|a| damage_of(&a.event)).collect();
        assert_eq!(damages, vec![6, 7]);
    }

    #[test]
    fn test_late_offer_releases_expired_aggregate() {
        let mut agg = Aggregator::new([AggregationRule::damage_by_target()], 100);
        agg.offer(hit(5, 5), 0);

        let Offer::Held { released: Some(expired) } = agg.offer(hit(5, 9), 150) else {
            panic!("expected the expired aggregate to be released");
        };
        assert_eq!(damage_of(&expired.event), 5);
        assert_eq!(agg.pending_len(), 1);

        let due = agg.take_due(250);
        assert_eq!(damage_of(&due[0].event), 9);
    }

    #[test]
    fn test_damage_merge_takes_latest_fields() {
        let mut agg = Aggregator::new([AggregationRule::damage_by_target()], 100);
        agg.offer(hit(3, 1), 0);
        agg.offer(
            DamageDealt {
                attacker_id: Some(42),
                target_id: 3,
                damage: 2,
                damage_type: DamageType::Fire,
                position: Some(Position::new(4, 4)),
            }
            .into(),
            10,
        );

        let due = agg.take_due(100);
        let GameEvent::DamageDealt(merged) = &due[0].event else {
            panic!("expected DamageDealt");
        };
        assert_eq!(merged.damage, 3);
        assert_eq!(merged.attacker_id, Some(42));
        assert_eq!(merged.damage_type, DamageType::Fire);
        assert_eq!(merged.position, Some(Position::new(4, 4)));
    }

    #[test]
    fn test_movement_keeps_origin_and_destination() {
        let mut agg = Aggregator::new([AggregationRule::movement_by_entity()], 50);
        let step = |from: (i32, i32), to: (i32, i32)| -> GameEvent {
            EntityMoved {
                entity_id: 1,
                old_position: Position::new(from.0, from.1),
                new_position: Position::new(to.0, to.1),
            }
            .into()
        };
        agg.offer(step((0, 0), (1, 0)), 0);
        agg.offer(step((1, 0), (2, 0)), 10);
        agg.offer(step((2, 0), (2, 1)), 20);

        let due = agg.take_due(50);
        assert_eq!(due[0].event, step((0, 0), (2, 1)));
        assert_eq!(due[0].merged_count, 3);
    }

    #[test]
    fn test_clear_discards_pending() {
        let mut agg = Aggregator::new([AggregationRule::damage_by_target()], 100);
        agg.offer(hit(1, 1), 0);
        agg.offer(hit(1, 1), 1);
        agg.offer(hit(2, 1), 2);

        assert_eq!(agg.clear(), 3);
        assert_eq!(agg.pending_len(), 0);
        assert!(agg.take_due(1_000).is_empty());
    }

    #[test]
    fn test_due_aggregates_come_out_in_deadline_order() {
        let mut agg = Aggregator::new([AggregationRule::damage_by_target()], 100);
        agg.offer(hit(9, 1), 30);
        agg.offer(hit(4, 1), 10);
        agg.offer(hit(7, 1), 20);

        let targets: Vec<u32> = agg
            .take_due(500)
            .iter()
            .map(|a| match &a.event {
                GameEvent::DamageDealt(hit) => hit.target_id,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(targets, vec![4, 7, 9]);
    }
}
