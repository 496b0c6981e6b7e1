//! Game Events
//!
//! Every canonical state change on the authority produces one event. The
//! replicator stamps events with per-entity sequence numbers and ships them
//! to observers, which apply them to their mirror in the same order.

use serde::{Serialize, Deserialize};

use crate::game::appearance::ColorId;
use crate::game::map::SpawnPose;
use crate::game::state::{PlayerId, PlayerVariant, ResourcesId, UnitId, UnitKind};

/// Replicated entity a change belongs to.
///
/// Ordering guarantees are per key, never across keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKey {
    /// A unit (stronghold, building, troop).
    Unit(UnitId),
    /// A player entity.
    Player(PlayerId),
    /// A resources container.
    Resources(ResourcesId),
    /// Match-wide state.
    Match,
}

/// Game event data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GameEventData {
    /// Unit entered the arena.
    UnitSpawned {
        unit: UnitId,
        kind: UnitKind,
        cost: u32,
        health: i32,
        color: ColorId,
        highlighted: bool,
        child_visuals: u16,
    },

    /// Unit left the arena.
    UnitDespawned {
        unit: UnitId,
    },

    /// Unit health changed.
    HealthChanged {
        unit: UnitId,
        health: i32,
    },

    /// Unit reached zero health. Sent before the owner is cleared.
    UnitDied {
        unit: UnitId,
        kind: UnitKind,
        owner: Option<PlayerId>,
    },

    /// Unit owner changed (`SetOwner`).
    OwnerChanged {
        unit: UnitId,
        owner: Option<PlayerId>,
    },

    /// Unit team color changed.
    UnitColorChanged {
        unit: UnitId,
        color: ColorId,
    },

    /// Unit highlight flag changed.
    HighlightChanged {
        unit: UnitId,
        highlighted: bool,
    },

    /// Player entity spawned at a spawn point.
    PlayerSpawned {
        player: PlayerId,
        variant: PlayerVariant,
        spawn_index: usize,
        pose: SpawnPose,
        color: ColorId,
    },

    /// Player team color changed (`SetColor`).
    PlayerColorChanged {
        player: PlayerId,
        color: ColorId,
    },

    /// Player entity removed along with its resources container.
    PlayerRemoved {
        player: PlayerId,
    },

    /// Resources container spawned.
    ResourcesSpawned {
        resources: ResourcesId,
        meal: u32,
        mana: u32,
    },

    /// Resources container bound to a player (`SetResources`).
    ResourcesBound {
        player: PlayerId,
        resources: ResourcesId,
    },

    /// Resources counters changed.
    ResourcesChanged {
        resources: ResourcesId,
        meal: u32,
        mana: u32,
    },

    /// A stronghold fell and the match has a result.
    MatchDecided {
        winner: Option<PlayerId>,
        loser: PlayerId,
    },
}

impl GameEventData {
    /// Entity this change is ordered against.
    pub fn entity(&self) -> EntityKey {
        match self {
            GameEventData::UnitSpawned { unit, .. }
            | GameEventData::UnitDespawned { unit }
            | GameEventData::HealthChanged { unit, .. }
            | GameEventData::UnitDied { unit, .. }
            | GameEventData::OwnerChanged { unit, .. }
            | GameEventData::UnitColorChanged { unit, .. }
            | GameEventData::HighlightChanged { unit, .. } => EntityKey::Unit(*unit),

            GameEventData::PlayerSpawned { player, .. }
            | GameEventData::PlayerColorChanged { player, .. }
            | GameEventData::PlayerRemoved { player }
            | GameEventData::ResourcesBound { player, .. } => EntityKey::Player(*player),

            GameEventData::ResourcesSpawned { resources, .. }
            | GameEventData::ResourcesChanged { resources, .. } => EntityKey::Resources(*resources),

            GameEventData::MatchDecided { .. } => EntityKey::Match,
        }
    }
}

/// A canonical state change, keyed by the entity it touches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Entity the change is ordered against.
    pub entity: EntityKey,
    /// Change payload.
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(data: GameEventData) -> Self {
        Self {
            entity: data.entity(),
            data,
        }
    }
}

impl From<GameEventData> for GameEvent {
    fn from(data: GameEventData) -> Self {
        Self::new(data)
    }
}
