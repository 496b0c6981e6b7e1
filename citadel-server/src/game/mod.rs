//! Game Logic Module
//!
//! Authoritative match rules. Nothing here touches the network or the clock.
//!
//! ## Module Structure
//!
//! - `state`: Arena of units, players and resources containers
//! - `ownership`: Player/unit ownership registry
//! - `lifecycle`: Damage, healing and death
//! - `appearance`: Team color and highlight with child fan-out
//! - `building`: Building catalog and placement
//! - `map`: Spawn layout
//! - `events`: Canonical state changes for replication

pub mod state;
pub mod ownership;
pub mod lifecycle;
pub mod appearance;
pub mod building;
pub mod map;
pub mod events;

// Re-export key types
pub use state::{MatchState, MatchConfig, MatchOutcome, PlayerState, PlayerId, UnitState, UnitId, UnitKind, ResourcesId};
pub use ownership::OwnershipRegistry;
pub use lifecycle::{apply_damage, apply_heal, DamageOutcome, LifeState};
pub use appearance::{Appearance, ColorId, MaterialSink, NullSink};
pub use building::{place_building, BlueprintId, CellId, PlacementError};
pub use map::{DuelMap, SpawnLayout, SpawnPoint};
pub use events::{EntityKey, GameEvent, GameEventData};
