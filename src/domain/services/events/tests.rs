#[cfg(test)]
pub mod tests {
    //--------------------------------------------------------------------------------------------------
    // TEST MODULE OVERVIEW
    //--------------------------------------------------------------------------------------------------
    // Behavioral tests for the EventBus facade, organized into categories:
    //
    // 1. Delivery
    //    - FIFO order, fan-out, no-subscriber safety
    //
    // 2. Buffer Management
    //    - Drop-oldest overflow, flush, buffer usage
    //
    // 3. Subscriptions
    //    - Disposer correctness, typed handlers, multi-type handlers
    //
    // 4. Fault Isolation
    //    - Failing and panicking handlers, error reporter calls
    //
    // 5. Aggregation & Pooling
    //
    // 6. Reentrancy & Metrics
    //--------------------------------------------------------------------------------------------------

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use crate::config::BusConfig;
    use crate::domain::models::event::{
        DamageDealt, DamageType, EntityMoved, Envelope, EventType, GameEvent, MenuOpened, Position,
    };
    use crate::domain::services::events::reporting::MockErrorReporter;
    use crate::domain::services::events::{
        AggregationRule, ErrorCode, ErrorHandler, EventBus, EventError, EventLogger, EventResult,
        ManualClock,
    };

    // Helper to create a damage event
    fn hit(target_id: u32, damage: u32) -> DamageDealt {
        DamageDealt {
            attacker_id: Some(1),
            target_id,
            damage,
            damage_type: DamageType::Physical,
            position: None,
        }
    }

    fn step(entity_id: u32, x: i32) -> EntityMoved {
        EntityMoved {
            entity_id,
            old_position: Position::new(x - 1, 0),
            new_position: Position::new(x, 0),
        }
    }

    fn damage_of(envelope: &Envelope) -> u32 {
        envelope.payload::<DamageDealt>().map_or(0, |hit| hit.damage)
    }

    /// Subscribes a handler that records every envelope it sees.
    fn record(bus: &EventBus, event_type: EventType) -> Arc<Mutex<Vec<Envelope>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(event_type, move |event| {
            sink.lock().push(event.clone());
            Ok(())
        });
        seen
    }

    fn manual_bus(config: BusConfig) -> (EventBus, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(10_000));
        let bus = EventBus::builder(config)
            .clock(clock.clone())
            .build()
            .unwrap();
        (bus, clock)
    }

    // Delivery

    #[test]
    fn test_fifo_delivery() {
        let bus = EventBus::default();
        let seen = record(&bus, EventType::DamageDealt);

        for damage in 0..50 {
            bus.publish(hit(1, damage));
        }
        assert_eq!(bus.process_events(), 50);

        let damages: Vec<u32> = seen.lock().iter().map(damage_of).collect();
        assert_eq!(damages, (0..50).collect::<Vec<_>>());

        let sequences: Vec<u64> = seen.lock().iter().map(|e| e.sequence).collect();
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_nothing_is_delivered_before_processing() {
        let bus = EventBus::default();
        let seen = record(&bus, EventType::MenuOpened);

        bus.publish(MenuOpened { menu: "inventory".into() });
        assert!(seen.lock().is_empty());
        assert_eq!(bus.pending_events(), 1);

        bus.process_events();
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(bus.process_events(), 0);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_fan_out_delivers_identical_event() {
        let bus = EventBus::default();
        let subscribers: Vec<_> = (0..3).map(|_| record(&bus, EventType::DamageDealt)).collect();

        bus.publish(hit(4, 9));
        bus.process_events();

        let first = subscribers[0].lock()[0].clone();
        for seen in &subscribers {
            let seen = seen.lock();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0], first);
        }
        assert_eq!(damage_of(&first), 9);
    }

    #[test]
    fn test_no_subscriber_safety() {
        let bus = EventBus::default();
        bus.publish(MenuOpened { menu: "pause".into() });

        assert_eq!(bus.process_events(), 1);
        let metrics = bus.get_metrics();
        assert_eq!(metrics.total_events_processed, 1);
        assert_eq!(metrics.active_handlers, 0);
    }

    #[test]
    fn test_handlers_only_see_their_type() {
        let bus = EventBus::default();
        let damage = record(&bus, EventType::DamageDealt);
        let movement = record(&bus, EventType::EntityMoved);

        bus.publish(hit(1, 1));
        bus.publish(step(2, 1));
        bus.publish(hit(1, 2));
        bus.process_events();

        assert_eq!(damage.lock().len(), 2);
        assert_eq!(movement.lock().len(), 1);
    }

    // Buffer Management

    #[test]
    fn test_overflow_drops_oldest() {
        let bus = EventBus::new(BusConfig::default().with_buffer_size(64)).unwrap();
        let seen = record(&bus, EventType::DamageDealt);

        for damage in 0..100 {
            bus.publish(hit(1, damage));
        }

        let metrics = bus.get_metrics();
        assert_eq!(metrics.dropped_events, 36);
        assert_eq!(metrics.buffer_usage, 1.0);
        assert_eq!(metrics.buffered_events, 64);

        assert_eq!(bus.process_events(), 64);
        let seen = seen.lock();
        assert_eq!(seen.len(), 64);
        assert_eq!(damage_of(&seen[0]), 36);
        assert_eq!(damage_of(&seen[63]), 99);
        assert_eq!(bus.get_metrics().dropped_events, 36);
    }

    #[test]
    fn test_flush_discards_everything() {
        let bus = EventBus::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        bus.subscribe(EventType::DamageDealt, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        for damage in 0..10 {
            bus.publish(hit(1, damage));
        }
        bus.flush();

        let metrics = bus.get_metrics();
        assert_eq!(metrics.buffer_usage, 0.0);
        assert!(metrics.is_buffer_empty());
        assert_eq!(metrics.flushed_events, 10);

        assert_eq!(bus.process_events(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_buffer_usage_is_fractional() {
        let bus = EventBus::new(BusConfig::default().with_buffer_size(8)).unwrap();
        bus.publish(hit(1, 1));
        bus.publish(hit(1, 2));

        let metrics = bus.get_metrics();
        assert!((metrics.buffer_usage - 0.25).abs() < f64::EPSILON);
        assert_eq!(metrics.buffer_capacity, 8);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = EventBus::new(BusConfig::default().with_buffer_size(0)).unwrap_err();
        assert!(matches!(err, EventError::InvalidConfig(_)));
    }

    // Subscriptions

    #[test]
    fn test_unsubscribe_before_publish() {
        let bus = EventBus::default();
        let removed = Arc::new(AtomicUsize::new(0));
        let kept = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&removed);
        let subscription = bus.subscribe(EventType::DamageDealt, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let counter = Arc::clone(&kept);
        bus.subscribe(EventType::DamageDealt, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(subscription.unsubscribe());
        assert!(!subscription.unsubscribe());
        assert_eq!(bus.handler_count(EventType::DamageDealt), 1);

        bus.publish(hit(1, 1));
        bus.process_events();

        assert_eq!(removed.load(Ordering::SeqCst), 0);
        assert_eq!(kept.load(Ordering::SeqCst), 1);
        assert_eq!(bus.get_metrics().active_handlers, 1);
    }

    #[test]
    fn test_clear_subscriptions_on_teardown() {
        let bus = EventBus::default();
        let damage = record(&bus, EventType::DamageDealt);
        let menus = record(&bus, EventType::MenuOpened);
        assert_eq!(bus.get_metrics().active_handlers, 2);

        bus.clear_subscriptions();
        assert_eq!(bus.get_metrics().active_handlers, 0);
        assert_eq!(bus.handler_count(EventType::DamageDealt), 0);

        bus.publish(hit(1, 1));
        bus.publish(MenuOpened { menu: "pause".into() });
        assert_eq!(bus.process_events(), 2);
        assert!(damage.lock().is_empty());
        assert!(menus.lock().is_empty());
    }

    #[test]
    fn test_typed_subscription() {
        let bus = EventBus::default();
        let total = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&total);
        bus.on::<DamageDealt, _>(move |_, hit| {
            sink.fetch_add(hit.damage as usize, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(hit(1, 5));
        bus.publish(step(1, 1));
        bus.publish(hit(2, 7));
        bus.process_events();

        assert_eq!(total.load(Ordering::SeqCst), 12);
    }

    #[test]
    fn test_register_handler_listens_to_every_declared_type() {
        let bus = EventBus::default();
        let logger = Arc::new(EventLogger::new(100));
        let subscriptions = bus.register_handler(logger.clone());
        assert_eq!(subscriptions.len(), EventType::ALL.len());

        bus.publish(hit(1, 1));
        bus.publish(MenuOpened { menu: "map".into() });
        bus.process_events();
        assert_eq!(logger.len(), 2);

        for subscription in &subscriptions {
            subscription.unsubscribe();
        }
        assert_eq!(bus.get_metrics().active_handlers, 0);
    }

    #[test]
    fn test_unsubscribe_during_dispatch_applies_to_next_event() {
        let bus = EventBus::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<crate::domain::services::events::Subscription>>> =
            Arc::new(Mutex::new(None));

        let counter = Arc::clone(&calls);
        let own = Arc::clone(&slot);
        let subscription = bus.subscribe(EventType::DamageDealt, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(subscription) = own.lock().as_ref() {
                subscription.unsubscribe();
            }
            Ok(())
        });
        *slot.lock() = Some(subscription);

        bus.publish(hit(1, 1));
        bus.publish(hit(1, 2));
        bus.process_events();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    // Fault Isolation

    #[test]
    fn test_failing_middle_handler_is_isolated() {
        let mut reporter = MockErrorReporter::new();
        reporter
            .expect_report()
            .withf(|code, _, context| {
                *code == ErrorCode::EventHandlerFailed && context["eventType"] == "DamageDealt"
            })
            .times(1)
            .return_const(());

        let bus = EventBus::builder(BusConfig::default())
            .error_reporter(Arc::new(reporter))
            .build()
            .unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "middle", "last"] {
            let order = Arc::clone(&order);
            bus.subscribe(EventType::DamageDealt, move |_| {
                order.lock().push(tag);
                if tag == "middle" {
                    return Err(EventError::processing("sound bank missing"));
                }
                Ok(())
            });
        }

        bus.publish(hit(3, 3));
        assert_eq!(bus.process_events(), 1);

        assert_eq!(*order.lock(), vec!["first", "middle", "last"]);
        assert_eq!(bus.get_metrics().handler_failures, 1);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_later_events() {
        let errors = Arc::new(ErrorHandler::new());
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reported);
        errors.add_listener(move |code, _, context| {
            sink.lock().push((code, context["eventId"].as_str().unwrap_or_default().to_string()));
        });

        let bus = EventBus::builder(BusConfig::default())
            .error_reporter(errors)
            .build()
            .unwrap();

        bus.subscribe(EventType::DamageDealt, |event| {
            if event.payload::<DamageDealt>().is_some_and(|hit| hit.damage == 1) {
                panic!("particle system crashed");
            }
            Ok(())
        });
        let seen = record(&bus, EventType::DamageDealt);

        bus.publish(hit(1, 1));
        bus.publish(hit(1, 2));
        assert_eq!(bus.process_events(), 2);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);

        let reported = reported.lock();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].0, ErrorCode::EventHandlerPanicked);
        assert_eq!(reported[0].1, seen[0].id.to_string());

        // The bus stays usable after a panic
        drop(seen);
        bus.publish(hit(1, 3));
        assert_eq!(bus.process_events(), 1);
    }

    #[test]
    fn test_panicking_error_listener_keeps_batch_alive() {
        let errors = Arc::new(ErrorHandler::new());
        errors.add_listener(|_, _, _| panic!("crash reporter offline"));

        let bus = EventBus::builder(BusConfig::default().with_pooling(8))
            .error_reporter(errors)
            .build()
            .unwrap();

        bus.subscribe(EventType::DamageDealt, |_| Err(EventError::processing("sound bank missing")));
        let seen = record(&bus, EventType::DamageDealt);

        for damage in 0..3 {
            bus.publish(hit(1, damage));
        }
        assert_eq!(bus.process_events(), 3);

        let damages: Vec<u32> = seen.lock().iter().map(damage_of).collect();
        assert_eq!(damages, vec![0, 1, 2]);

        let metrics = bus.get_metrics();
        assert_eq!(metrics.total_events_processed, 3);
        assert_eq!(metrics.handler_failures, 3);
        assert_eq!(metrics.buffered_events, 0);
        assert_eq!(metrics.pool_available, 3);
    }

    // Aggregation & Pooling

    #[test]
    fn test_aggregation_merges_damage() {
        let (bus, clock) = manual_bus(BusConfig::default().with_aggregation(100));
        let seen = record(&bus, EventType::DamageDealt);

        bus.publish(hit(7, 5));
        clock.advance(30);
        bus.publish(hit(7, 3));

        // Window still open
        assert_eq!(bus.process_events(), 0);
        assert_eq!(bus.get_metrics().pending_aggregates, 1);

        clock.advance(70);
        assert_eq!(bus.process_events(), 1);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(damage_of(&seen[0]), 8);
        assert_eq!(seen[0].timestamp_ms, 10_030);

        let metrics = bus.get_metrics();
        assert_eq!(metrics.events_aggregated, 1);
        assert_eq!(metrics.pending_aggregates, 0);
        assert_eq!(metrics.total_events_published, 2);
    }

    #[test]
    fn test_aggregation_leaves_other_types_alone() {
        let (bus, clock) = manual_bus(BusConfig::default().with_aggregation(100));
        let order = Arc::new(Mutex::new(Vec::new()));
        for event_type in [EventType::DamageDealt, EventType::EntityMoved] {
            let order = Arc::clone(&order);
            bus.subscribe(event_type, move |event| {
                order.lock().push(event.event_type());
                Ok(())
            });
        }

        bus.publish(hit(1, 2));
        bus.publish(step(3, 1));
        bus.publish(step(3, 2));
        assert_eq!(bus.process_events(), 2);

        clock.advance(100);
        assert_eq!(bus.process_events(), 1);
        assert_eq!(
            *order.lock(),
            vec![EventType::EntityMoved, EventType::EntityMoved, EventType::DamageDealt]
        );
    }

    #[test]
    fn test_aggregated_event_gets_fresh_id() {
        let (bus, clock) = manual_bus(BusConfig::default().with_aggregation(50));
        let seen = record(&bus, EventType::DamageDealt);

        bus.publish(hit(1, 1));
        clock.advance(50);
        bus.publish(hit(1, 1));
        clock.advance(50);
        bus.process_events();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_ne!(seen[0].id, seen[1].id);
        assert_eq!(damage_of(&seen[0]), 1);
        assert_eq!(damage_of(&seen[1]), 1);
    }

    #[test]
    fn test_custom_aggregation_rule() {
        let clock = Arc::new(ManualClock::new(0));
        let bus = EventBus::builder(BusConfig::default().with_aggregation(100))
            .aggregation_rule(AggregationRule::movement_by_entity())
            .clock(clock.clone())
            .build()
            .unwrap();
        let moves = record(&bus, EventType::EntityMoved);
        let hits = record(&bus, EventType::DamageDealt);

        for x in 1..=4 {
            bus.publish(step(9, x));
        }
        bus.publish(hit(1, 1));
        bus.publish(hit(1, 1));
        clock.advance(100);
        bus.process_events();

        let moves = moves.lock();
        assert_eq!(moves.len(), 1);
        let merged = moves[0].payload::<EntityMoved>().unwrap();
        assert_eq!(merged.old_position, Position::new(0, 0));
        assert_eq!(merged.new_position, Position::new(4, 0));

        // Only the configured rule applies, damage passes straight through
        assert_eq!(hits.lock().len(), 2);
    }

    #[test]
    fn test_flush_discards_pending_aggregates() {
        let (bus, clock) = manual_bus(BusConfig::default().with_aggregation(100));
        let seen = record(&bus, EventType::DamageDealt);

        bus.publish(hit(1, 4));
        bus.publish(hit(2, 4));
        bus.flush();
        clock.advance(500);

        assert_eq!(bus.process_events(), 0);
        assert!(seen.lock().is_empty());
        assert_eq!(bus.get_metrics().flushed_events, 2);
    }

    #[test]
    fn test_pooling_does_not_change_delivery() {
        let bus = EventBus::new(BusConfig::default().with_buffer_size(4).with_pooling(8)).unwrap();
        let seen = record(&bus, EventType::DamageDealt);

        for round in 0..3u32 {
            for damage in 0..6u32 {
                bus.publish(hit(1, round * 10 + damage));
            }
            bus.process_events();
        }

        let damages: Vec<u32> = seen.lock().iter().map(damage_of).collect();
        assert_eq!(damages, vec![2, 3, 4, 5, 12, 13, 14, 15, 22, 23, 24, 25]);

        let metrics = bus.get_metrics();
        assert_eq!(metrics.dropped_events, 6);
        assert!(metrics.pool_available > 0);
        assert!(metrics.pool_available <= 8);
    }

    // Reentrancy & Metrics

    #[test]
    fn test_publish_from_handler_goes_to_next_pass() {
        let bus = EventBus::default();
        let weak = bus.downgrade();
        bus.subscribe(EventType::DamageDealt, move |event| {
            let target = event.payload::<DamageDealt>().map_or(0, |hit| hit.target_id);
            weak.publish(MenuOpened { menu: format!("target-{}", target) })
        });
        let menus = record(&bus, EventType::MenuOpened);

        bus.publish(hit(5, 1));
        assert_eq!(bus.process_events(), 1);
        assert!(menus.lock().is_empty());
        assert_eq!(bus.pending_events(), 1);

        assert_eq!(bus.process_events(), 1);
        let menus = menus.lock();
        assert_eq!(menus.len(), 1);
        assert_eq!(
            menus[0].event,
            GameEvent::MenuOpened(MenuOpened { menu: "target-5".into() })
        );
    }

    #[test]
    fn test_reentrant_process_events_is_ignored() {
        let bus = EventBus::default();
        let weak = bus.downgrade();
        let nested = Arc::new(AtomicUsize::new(usize::MAX));
        let result = Arc::clone(&nested);

        bus.subscribe(EventType::DamageDealt, move |_| {
            if let Some(bus) = weak.upgrade() {
                bus.publish(MenuOpened { menu: "nested".into() });
                result.store(bus.process_events(), Ordering::SeqCst);
            }
            Ok(())
        });

        bus.publish(hit(1, 1));
        assert_eq!(bus.process_events(), 1);
        assert_eq!(nested.load(Ordering::SeqCst), 0);
        assert_eq!(bus.pending_events(), 1);
    }

    #[test]
    fn test_weak_bus_outliving_bus() {
        let bus = EventBus::default();
        let weak = bus.downgrade();
        drop(bus);

        let err = weak.publish(hit(1, 1)).unwrap_err();
        assert!(matches!(err, EventError::PublishError(_)));
    }

    #[test]
    fn test_metrics_accuracy() {
        let bus = EventBus::default();
        let _damage = record(&bus, EventType::DamageDealt);
        let _moves = record(&bus, EventType::EntityMoved);
        let extra = record(&bus, EventType::EntityMoved);
        drop(extra);

        for i in 0..5 {
            bus.publish(hit(1, i));
            bus.publish(step(2, i as i32));
        }
        assert_eq!(bus.process_events(), 10);

        let metrics = bus.get_metrics();
        assert_eq!(metrics.total_events_processed, 10);
        assert_eq!(metrics.total_events_published, 10);
        assert_eq!(metrics.active_handlers, 3);
        assert_eq!(metrics.buffer_usage, 0.0);
        assert_eq!(metrics.dropped_events, 0);
    }

    #[test]
    fn test_events_per_second_window() {
        let (bus, clock) = manual_bus(BusConfig::default());
        for _ in 0..20 {
            bus.publish(hit(1, 1));
        }
        bus.process_events();
        assert_eq!(bus.get_metrics().events_per_second, 0.0);

        clock.advance(1_000);
        for _ in 0..30 {
            bus.publish(hit(1, 1));
        }
        bus.process_events();
        assert!((bus.get_metrics().events_per_second - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset_metrics() {
        let bus = EventBus::new(BusConfig::default().with_buffer_size(2)).unwrap();
        for i in 0..5 {
            bus.publish(hit(1, i));
        }
        bus.process_events();
        assert_eq!(bus.get_metrics().dropped_events, 3);

        bus.reset_metrics();
        let metrics = bus.get_metrics();
        assert_eq!(metrics.dropped_events, 0);
        assert_eq!(metrics.total_events_processed, 0);
        assert_eq!(metrics.total_events_published, 0);
    }

    #[test]
    fn test_handler_error_display() {
        let err: EventResult<()> = Err(EventError::HandlerFailed {
            handler: "audio".into(),
            reason: "muted".into(),
        });
        assert_eq!(err.unwrap_err().to_string(), "Handler 'audio' failed: muted");
    }
}
