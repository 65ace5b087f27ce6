//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module defines the event model carried by the bus: the closed set of event kinds,
// one payload struct per kind, and the envelope that wraps a payload once it is published.
//
// | Section            | Description                                                      |
// |--------------------|------------------------------------------------------------------|
// | ENUMS              | EventType discriminator, GameEvent tagged union, DamageType.     |
// | STRUCTS            | Payload structs, Position, Envelope.                             |
// | TRAITS             | EventPayload for narrowing a GameEvent to its payload.           |
// | TESTS              | Unit tests for the event model.                                  |
//--------------------------------------------------------------------------------------------------

//--------------------------------------------------------------------------------------------------
//  ENUMS
//--------------------------------------------------------------------------------------------------
// | Name          | Description                                          |
// |---------------|------------------------------------------------------|
// | EventType     | Discriminator of every event kind the bus knows.     |
// | DamageType    | Flavor of a damage hit.                              |
// | GameEvent     | Tagged union with one payload per EventType.         |
//--------------------------------------------------------------------------------------------------
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of an entity on the map (player, enemy, item holder).
pub type EntityId = u32;

/// Discriminator of every event kind the bus can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    EntityMoved,
    DamageDealt,
    EnemyDied,
    PlayerDied,
    ItemPickedUp,
    MenuOpened,
    MenuClosed,
    AreaEntered,
}

impl EventType {
    /// Every event kind, in declaration order.
    pub const ALL: [EventType; 8] = [
        EventType::EntityMoved,
        EventType::DamageDealt,
        EventType::EnemyDied,
        EventType::PlayerDied,
        EventType::ItemPickedUp,
        EventType::MenuOpened,
        EventType::MenuClosed,
        EventType::AreaEntered,
    ];

    /// Stable tag string used in logs and error context.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::EntityMoved => "EntityMoved",
            EventType::DamageDealt => "DamageDealt",
            EventType::EnemyDied => "EnemyDied",
            EventType::PlayerDied => "PlayerDied",
            EventType::ItemPickedUp => "ItemPickedUp",
            EventType::MenuOpened => "MenuOpened",
            EventType::MenuClosed => "MenuClosed",
            EventType::AreaEntered => "AreaEntered",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flavor of a damage hit, used by audio/VFX consumers to pick a cue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DamageType {
    Physical,
    Fire,
    Poison,
    Magic,
}

//--------------------------------------------------------------------------------------------------
//  STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name          | Description                                          |
// |---------------|------------------------------------------------------|
// | Position      | Tile coordinate on the map.                          |
// | EntityMoved   | An entity moved between two tiles.                   |
// | DamageDealt   | One hit landed on a target.                          |
// | EnemyDied     | An enemy was killed.                                 |
// | PlayerDied    | The player character died.                           |
// | ItemPickedUp  | An entity picked up an item.                         |
// | MenuOpened    | A UI menu was opened.                                |
// | MenuClosed    | A UI menu was closed.                                |
// | AreaEntered   | The player entered a new area or dungeon depth.      |
// | Envelope      | Immutable published record wrapping a GameEvent.     |
//--------------------------------------------------------------------------------------------------

/// Tile coordinate on the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMoved {
    pub entity_id: EntityId,
    pub old_position: Position,
    pub new_position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageDealt {
    /// `None` for environmental damage (traps, lava).
    pub attacker_id: Option<EntityId>,
    pub target_id: EntityId,
    pub damage: u32,
    pub damage_type: DamageType,
    pub position: Option<Position>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnemyDied {
    pub enemy_id: EntityId,
    pub killer_id: Option<EntityId>,
    pub position: Position,
    pub experience: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerDied {
    pub cause: String,
    pub depth: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPickedUp {
    pub entity_id: EntityId,
    pub item: String,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuOpened {
    pub menu: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuClosed {
    pub menu: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaEntered {
    pub area: String,
    pub depth: u32,
}

/// Every occurrence a producer can publish, one variant per [`EventType`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GameEvent {
    EntityMoved(EntityMoved),
    DamageDealt(DamageDealt),
    EnemyDied(EnemyDied),
    PlayerDied(PlayerDied),
    ItemPickedUp(ItemPickedUp),
    MenuOpened(MenuOpened),
    MenuClosed(MenuClosed),
    AreaEntered(AreaEntered),
}

impl GameEvent {
    /// Returns the discriminator of this event.
    pub fn event_type(&self) -> EventType {
        match self {
            GameEvent::EntityMoved(_) => EventType::EntityMoved,
            GameEvent::DamageDealt(_) => EventType::DamageDealt,
            GameEvent::EnemyDied(_) => EventType::EnemyDied,
            GameEvent::PlayerDied(_) => EventType::PlayerDied,
            GameEvent::ItemPickedUp(_) => EventType::ItemPickedUp,
            GameEvent::MenuOpened(_) => EventType::MenuOpened,
            GameEvent::MenuClosed(_) => EventType::MenuClosed,
            GameEvent::AreaEntered(_) => EventType::AreaEntered,
        }
    }
}

//--------------------------------------------------------------------------------------------------
//  TRAITS
//--------------------------------------------------------------------------------------------------

/// A payload struct that belongs to exactly one [`EventType`].
///
/// Lets handlers be registered against a payload type and receive the narrowed
/// payload instead of matching on [`GameEvent`] themselves.
pub trait EventPayload: Into<GameEvent> + Send + Sync + 'static {
    /// The event kind this payload is carried under.
    const EVENT_TYPE: EventType;

    /// Narrows an event to this payload, `None` if the event is another kind.
    fn narrow(event: &GameEvent) -> Option<&Self>;
}

macro_rules! impl_payload {
    ($($name:ident),* $(,)?) => {
        $(
            impl EventPayload for $name {
                const EVENT_TYPE: EventType = EventType::$name;

                fn narrow(event: &GameEvent) -> Option<&Self> {
                    match event {
                        GameEvent::$name(payload) => Some(payload),
                        _ => None,
                    }
                }
            }

            impl From<$name> for GameEvent {
                fn from(payload: $name) -> Self {
                    GameEvent::$name(payload)
                }
            }
        )*
    };
}

impl_payload!(
    EntityMoved,
    DamageDealt,
    EnemyDied,
    PlayerDied,
    ItemPickedUp,
    MenuOpened,
    MenuClosed,
    AreaEntered,
);

/// One published event as seen by handlers.
///
/// Built by the bus at publish time (or when an aggregate is released) and never
/// mutated afterwards; handlers only ever get `&Envelope`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Process-unique identifier, for tracing and assertions.
    pub id: Uuid,
    /// Monotonic per-bus publish sequence.
    pub sequence: u64,
    /// Wall-clock time of publication in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub event: GameEvent,
}

impl Envelope {
    pub fn event_type(&self) -> EventType {
        self.event.event_type()
    }

    /// Narrows the carried event to payload `P`.
    pub fn payload<P: EventPayload>(&self) -> Option<&P> {
        P::narrow(&self.event)
    }

    /// Publication time as a chrono timestamp.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp_ms).single()
    }
}
