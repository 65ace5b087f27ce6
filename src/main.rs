//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Demo driver for the event bus. Simulates a short dungeon run: every frame the player moves,
// fights a flurry of blows against nearby enemies and occasionally opens a menu. Subscribers
// print what they see; an audio subscriber fails on purpose to show fault isolation.
//--------------------------------------------------------------------------------------------------
// To run the demo: cargo run --bin dungeon-bus
// Overflow on purpose: cargo run --bin dungeon-bus -- --buffer-size 16 --flurry 40
// Aggregated damage: cargo run --bin dungeon-bus -- --aggregate --pool --metrics-json
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use rand::Rng;
use tracing::{info, warn, Level};

use dungeon_bus::{
    AreaEntered, BusConfig, DamageDealt, DamageType, EnemyDied, EntityMoved, EventBus, EventError,
    EventLogger, EventType, MenuClosed, MenuOpened, Position,
};

const PLAYER_ID: u32 = 1;
const FRAME_TIME: Duration = Duration::from_millis(16);

#[derive(Debug, Parser)]
#[command(name = "dungeon-bus", about = "Runs a simulated dungeon frame loop on the event bus")]
struct Opt {
    /// Number of frames to simulate
    #[arg(long, default_value_t = 10)]
    frames: u32,

    /// Damage events published per frame
    #[arg(long, default_value_t = 8)]
    flurry: u32,

    /// Ring buffer capacity (overrides EVENT_BUS_BUFFER_SIZE)
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Merge damage per target over the aggregation window
    #[arg(long)]
    aggregate: bool,

    /// Recycle envelope allocations
    #[arg(long)]
    pool: bool,

    /// Log every delivered event
    #[arg(short, long)]
    verbose: bool,

    /// Print the final metrics as JSON
    #[arg(long)]
    metrics_json: bool,
}

fn main() -> Result<()> {
    let opt = Opt::parse();

    tracing_subscriber::fmt()
        .with_max_level(if opt.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let mut config = BusConfig::from_env();
    if let Some(buffer_size) = opt.buffer_size {
        config = config.with_buffer_size(buffer_size);
    }
    if opt.aggregate {
        config.enable_aggregation = true;
    }
    if opt.pool {
        config.enable_pooling = true;
    }

    let bus = EventBus::new(config)?;
    let logger = Arc::new(EventLogger::new(256));
    let _logger_subscriptions = bus.register_handler(logger.clone());

    bus.on::<DamageDealt, _>(|_, hit| {
        info!("⚔️  {} damage ({:?}) to entity {}", hit.damage, hit.damage_type, hit.target_id);
        Ok(())
    });
    bus.on::<EnemyDied, _>(|_, death| {
        info!("💀 Enemy {} died at ({}, {}), +{} xp", death.enemy_id, death.position.x, death.position.y, death.experience);
        Ok(())
    });
    bus.on::<AreaEntered, _>(|_, area| {
        info!("🗺️  Entered {} (depth {})", area.area, area.depth);
        Ok(())
    });
    // Fails on every hit to show that the other subscribers keep receiving events
    bus.subscribe(EventType::DamageDealt, |_| {
        Err(EventError::processing("audio device unavailable"))
    });

    bus.publish(AreaEntered {
        area: "Sewers".to_string(),
        depth: 1,
    });

    let mut rng = rand::thread_rng();
    let mut position = Position::new(0, 0);
    let mut enemy_health = [30i64, 45, 60];

    for frame in 0..opt.frames {
        let next = Position::new(position.x + 1, position.y);
        bus.publish(EntityMoved {
            entity_id: PLAYER_ID,
            old_position: position,
            new_position: next,
        });
        position = next;

        for _ in 0..opt.flurry {
            let slot = rng.gen_range(0..enemy_health.len());
            let damage = rng.gen_range(1..=12u32);
            let target_id = 10 + slot as u32;

            bus.publish(DamageDealt {
                attacker_id: Some(PLAYER_ID),
                target_id,
                damage,
                damage_type: if rng.gen_range(0..4) == 0 { DamageType::Fire } else { DamageType::Physical },
                position: Some(position),
            });

            let was_alive = enemy_health[slot] > 0;
            enemy_health[slot] -= i64::from(damage);
            if was_alive && enemy_health[slot] <= 0 {
                bus.publish(EnemyDied {
                    enemy_id: target_id,
                    killer_id: Some(PLAYER_ID),
                    position,
                    experience: 10 * (slot as u32 + 1),
                });
            }
        }

        if frame % 4 == 3 {
            bus.publish(MenuOpened { menu: "inventory".to_string() });
            bus.publish(MenuClosed { menu: "inventory".to_string() });
        }

        let dispatched = bus.process_events();
        info!("Frame {}: dispatched {} events", frame, dispatched);
        thread::sleep(FRAME_TIME);
    }

    // Let pending aggregates expire, then deliver them
    if bus.config().enable_aggregation {
        thread::sleep(Duration::from_millis(bus.config().aggregation_window_ms));
        bus.process_events();
    }

    let metrics = bus.get_metrics();
    if metrics.dropped_events > 0 {
        warn!("{} events were dropped by buffer overflow", metrics.dropped_events);
    }
    info!("Event logger captured {} events", logger.len());

    if opt.metrics_json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    } else {
        info!(
            "Processed {} events, {} handler failures, buffer usage {:.2}",
            metrics.total_events_processed, metrics.handler_failures, metrics.buffer_usage
        );
    }

    Ok(())
}
