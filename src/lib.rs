// Expose the modules
pub mod config;
pub mod domain;

// Re-export key types for easier usage
pub use config::BusConfig;
pub use domain::models::event::{
    AreaEntered, DamageDealt, DamageType, EnemyDied, EntityId, EntityMoved, Envelope, EventPayload,
    EventType, GameEvent, ItemPickedUp, MenuClosed, MenuOpened, PlayerDied, Position,
};
pub use domain::services::events::{
    AggregationRule, Clock, ErrorCode, ErrorHandler, ErrorReporter, EventBus, EventBusBuilder,
    EventError, EventHandler, EventLogger, EventResult, LogLevel, LogSink, ManualClock,
    MetricsSnapshot, Subscription, SystemClock, TracingLogSink, WeakEventBus,
};
