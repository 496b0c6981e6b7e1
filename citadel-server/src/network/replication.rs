//! State Replication
//!
//! Authority side: the [`Replicator`] stamps each canonical change with a
//! per-entity sequence number, in application order.
//!
//! Observer side: the [`Mirror`] applies stamped changes, drops stale ones,
//! and runs the local reactions that keep presentation in step (color
//! reconciliation over owned units, material fan-out to child visuals).

use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::core::hash::{StateHash, StateHasher};
use crate::game::appearance::{Appearance, ColorId, MaterialSink};
use crate::game::events::{EntityKey, GameEvent, GameEventData};
use crate::game::map::SpawnPose;
use crate::game::state::{
    hash_player, hash_resources, hash_unit, PlayerId, PlayerVariant, Resources, ResourcesId,
    UnitId, UnitKind,
};
use crate::network::protocol::{ReplicationBatch, ReplicationUpdate};

// =============================================================================
// AUTHORITY
// =============================================================================

/// Assigns per-entity sequence numbers.
#[derive(Debug, Default)]
pub struct Replicator {
    sequences: BTreeMap<EntityKey, u32>,
}

impl Replicator {
    /// Create a new replicator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp events into a batch. Returns `None` when there is nothing to send.
    pub fn publish(&mut self, events: Vec<GameEvent>, state_hash: StateHash) -> Option<ReplicationBatch> {
        if events.is_empty() {
            return None;
        }

        let updates = events
            .into_iter()
            .map(|event| {
                let seq = self.sequences.entry(event.entity).or_insert(0);
                *seq += 1;
                ReplicationUpdate {
                    entity: event.entity,
                    seq: *seq,
                    change: event.data,
                }
            })
            .collect();

        Some(ReplicationBatch { updates, state_hash })
    }

    /// Last sequence number issued for an entity.
    pub fn last_seq(&self, entity: EntityKey) -> u32 {
        self.sequences.get(&entity).copied().unwrap_or(0)
    }
}

// =============================================================================
// OBSERVER
// =============================================================================

/// Mirror rejections.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MirrorError {
    /// Sequence number at or below the last one applied.
    #[error("Stale update for {entity:?}: seq {seq}, last applied {last}")]
    Stale {
        /// Entity of the update.
        entity: EntityKey,
        /// Received sequence number.
        seq: u32,
        /// Last applied sequence number.
        last: u32,
    },

    /// Change names an entity the mirror does not hold.
    #[error("Unknown entity {0:?}")]
    UnknownEntity(EntityKey),
}

/// Observer copy of a unit.
#[derive(Clone, Debug)]
pub struct MirrorUnit {
    /// Kind of unit.
    pub kind: UnitKind,
    /// Build cost.
    pub cost: u32,
    /// Current health.
    pub health: i32,
    /// Replicated color and highlight.
    pub appearance: Appearance,
    /// Current owner.
    pub owner: Option<PlayerId>,
}

/// Observer copy of a player.
#[derive(Clone, Debug)]
pub struct MirrorPlayer {
    /// Team color.
    pub color: ColorId,
    /// Bound resources container.
    pub resources: Option<ResourcesId>,
    /// Entity variant.
    pub variant: PlayerVariant,
    /// Spawn point index.
    pub spawn_index: usize,
    /// Spawn pose.
    pub pose: SpawnPose,
}

/// Observer-side replicated state.
#[derive(Debug, Default)]
pub struct Mirror {
    units: BTreeMap<UnitId, MirrorUnit>,
    players: BTreeMap<PlayerId, MirrorPlayer>,
    resources: BTreeMap<ResourcesId, Resources>,
    last_seq: BTreeMap<EntityKey, u32>,
    decided: Option<(Option<PlayerId>, PlayerId)>,
}

impl Mirror {
    /// Create an empty mirror.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a batch in order. Rejected updates are skipped.
    ///
    /// Returns true if the mirror hash matches the authority hash afterwards.
    pub fn apply_batch(&mut self, batch: &ReplicationBatch, sink: &mut dyn MaterialSink) -> bool {
        for update in &batch.updates {
            if let Err(e) = self.apply(update, sink) {
                warn!("Dropped replication update: {}", e);
            }
        }

        let matches = self.compute_hash() == batch.state_hash;
        if !matches {
            warn!(
                "Mirror diverged from authority (mirror {}, authority {})",
                hex::encode(&self.compute_hash()[..8]),
                hex::encode(&batch.state_hash[..8])
            );
        }
        matches
    }

    /// Apply one update.
    pub fn apply(&mut self, update: &ReplicationUpdate, sink: &mut dyn MaterialSink) -> Result<(), MirrorError> {
        let last = self.last_seq.get(&update.entity).copied().unwrap_or(0);
        if update.seq <= last {
            return Err(MirrorError::Stale {
                entity: update.entity,
                seq: update.seq,
                last,
            });
        }
        self.last_seq.insert(update.entity, update.seq);

        self.handle(&update.change, sink)
    }

    fn handle(&mut self, change: &GameEventData, sink: &mut dyn MaterialSink) -> Result<(), MirrorError> {
        match *change {
            GameEventData::UnitSpawned { unit, kind, cost, health, color, highlighted, child_visuals } => {
                let mut appearance = Appearance::new(color, child_visuals);
                appearance.set_highlighted(highlighted);
                appearance.broadcast(unit, sink);
                self.units.insert(unit, MirrorUnit {
                    kind,
                    cost,
                    health,
                    appearance,
                    owner: None,
                });
            }

            GameEventData::UnitDespawned { unit } => {
                self.units
                    .remove(&unit)
                    .ok_or(MirrorError::UnknownEntity(EntityKey::Unit(unit)))?;
            }

            GameEventData::HealthChanged { unit, health } => {
                self.unit_mut(unit)?.health = health;
            }

            GameEventData::UnitDied { unit, owner, .. } => {
                debug!("Unit {} died (owner {:?})", unit.raw(), owner.map(PlayerId::raw));
            }

            GameEventData::OwnerChanged { unit, owner } => {
                self.unit_mut(unit)?.owner = owner;
            }

            GameEventData::UnitColorChanged { unit, color } => {
                self.unit_mut(unit)?.appearance.apply_color(unit, color, sink);
            }

            GameEventData::HighlightChanged { unit, highlighted } => {
                self.unit_mut(unit)?.appearance.apply_highlighted(unit, highlighted, sink);
            }

            GameEventData::PlayerSpawned { player, variant, spawn_index, pose, color } => {
                self.players.insert(player, MirrorPlayer {
                    color,
                    resources: None,
                    variant,
                    spawn_index,
                    pose,
                });
            }

            GameEventData::PlayerColorChanged { player, color } => {
                self.player_mut(player)?.color = color;

                // Batch reconciliation over the owned-unit set
                for (id, unit) in self.units.iter_mut().filter(|(_, u)| u.owner == Some(player)) {
                    unit.appearance.apply_color(*id, color, sink);
                }
            }

            GameEventData::PlayerRemoved { player } => {
                let removed = self
                    .players
                    .remove(&player)
                    .ok_or(MirrorError::UnknownEntity(EntityKey::Player(player)))?;
                if let Some(resources) = removed.resources {
                    self.resources.remove(&resources);
                }
                for unit in self.units.values_mut().filter(|u| u.owner == Some(player)) {
                    unit.owner = None;
                }
            }

            GameEventData::ResourcesSpawned { resources, meal, mana } => {
                self.resources.insert(resources, Resources { id: resources, meal, mana });
            }

            GameEventData::ResourcesBound { player, resources } => {
                self.player_mut(player)?.resources = Some(resources);
            }

            GameEventData::ResourcesChanged { resources, meal, mana } => {
                let container = self
                    .resources
                    .get_mut(&resources)
                    .ok_or(MirrorError::UnknownEntity(EntityKey::Resources(resources)))?;
                container.meal = meal;
                container.mana = mana;
            }

            GameEventData::MatchDecided { winner, loser } => {
                self.decided.get_or_insert((winner, loser));
            }
        }

        Ok(())
    }

    fn unit_mut(&mut self, unit: UnitId) -> Result<&mut MirrorUnit, MirrorError> {
        self.units
            .get_mut(&unit)
            .ok_or(MirrorError::UnknownEntity(EntityKey::Unit(unit)))
    }

    fn player_mut(&mut self, player: PlayerId) -> Result<&mut MirrorPlayer, MirrorError> {
        self.players
            .get_mut(&player)
            .ok_or(MirrorError::UnknownEntity(EntityKey::Player(player)))
    }

    /// Get a unit by ID.
    pub fn unit(&self, id: UnitId) -> Option<&MirrorUnit> {
        self.units.get(&id)
    }

    /// Get a player by ID.
    pub fn player(&self, id: PlayerId) -> Option<&MirrorPlayer> {
        self.players.get(&id)
    }

    /// Units the mirror believes a player owns.
    pub fn units_of(&self, player: PlayerId) -> impl Iterator<Item = UnitId> + '_ {
        self.units
            .iter()
            .filter(move |(_, u)| u.owner == Some(player))
            .map(|(id, _)| *id)
    }

    /// Container bound to a player.
    pub fn resources_of(&self, player: PlayerId) -> Option<&Resources> {
        let id = self.players.get(&player)?.resources?;
        self.resources.get(&id)
    }

    /// Match result, if replicated.
    pub fn decided(&self) -> Option<(Option<PlayerId>, PlayerId)> {
        self.decided
    }

    /// Number of mirrored units.
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Is the mirror empty?
    pub fn is_empty(&self) -> bool {
        self.units.is_empty() && self.players.is_empty() && self.resources.is_empty()
    }

    /// Drop all mirrored state.
    pub fn clear(&mut self) {
        self.units.clear();
        self.players.clear();
        self.resources.clear();
        self.last_seq.clear();
        self.decided = None;
    }

    /// Snapshot hash, comparable with `MatchState::compute_hash`.
    pub fn compute_hash(&self) -> StateHash {
        let mut hasher = StateHasher::for_snapshot();

        hasher.update_u32(self.units.len() as u32);
        for (id, unit) in &self.units {
            hash_unit(&mut hasher, *id, unit.cost, unit.health, &unit.appearance, unit.owner);
        }

        hasher.update_u32(self.players.len() as u32);
        for (id, player) in &self.players {
            hash_player(&mut hasher, *id, player.color, player.resources);
        }

        hasher.update_u32(self.resources.len() as u32);
        for resources in self.resources.values() {
            hash_resources(&mut hasher, resources);
        }

        hasher.finalize()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::appearance::tests::RecordingSink;
    use crate::game::appearance::{NullSink, VisualTarget};
    use crate::game::building::{place_building, BlueprintId, CellId};
    use crate::game::lifecycle::apply_damage;
    use crate::game::state::{MatchConfig, MatchState};

    fn flush(state: &mut MatchState, replicator: &mut Replicator) -> ReplicationBatch {
        let hash = state.compute_hash();
        replicator.publish(state.take_events(), hash).unwrap()
    }

    #[test]
    fn test_sequences_are_per_entity() {
        let mut replicator = Replicator::new();
        let events = vec![
            GameEvent::new(GameEventData::HealthChanged { unit: UnitId(1), health: 5 }),
            GameEvent::new(GameEventData::HealthChanged { unit: UnitId(2), health: 5 }),
            GameEvent::new(GameEventData::HealthChanged { unit: UnitId(1), health: 4 }),
        ];

        let batch = replicator.publish(events, [0; 32]).unwrap();
        let seqs: Vec<u32> = batch.updates.iter().map(|u| u.seq).collect();
        assert_eq!(seqs, vec![1, 1, 2]);
        assert_eq!(replicator.last_seq(EntityKey::Unit(UnitId(1))), 2);
        assert!(replicator.publish(Vec::new(), [0; 32]).is_none());
    }

    #[test]
    fn test_mirror_rejects_stale_and_duplicate() {
        let mut mirror = Mirror::new();
        let spawn = ReplicationUpdate {
            entity: EntityKey::Unit(UnitId(1)),
            seq: 1,
            change: GameEventData::UnitSpawned {
                unit: UnitId(1),
                kind: UnitKind::Troop,
                cost: 5,
                health: 20,
                color: ColorId::First,
                highlighted: false,
                child_visuals: 0,
            },
        };
        let hit = ReplicationUpdate {
            entity: EntityKey::Unit(UnitId(1)),
            seq: 3,
            change: GameEventData::HealthChanged { unit: UnitId(1), health: 10 },
        };
        let late = ReplicationUpdate {
            entity: EntityKey::Unit(UnitId(1)),
            seq: 2,
            change: GameEventData::HealthChanged { unit: UnitId(1), health: 15 },
        };

        mirror.apply(&spawn, &mut NullSink).unwrap();
        mirror.apply(&hit, &mut NullSink).unwrap();

        assert!(matches!(mirror.apply(&hit, &mut NullSink), Err(MirrorError::Stale { seq: 3, last: 3, .. })));
        assert!(matches!(mirror.apply(&late, &mut NullSink), Err(MirrorError::Stale { seq: 2, .. })));
        assert_eq!(mirror.unit(UnitId(1)).unwrap().health, 10);
    }

    #[test]
    fn test_mirror_unknown_entity() {
        let mut mirror = Mirror::new();
        let update = ReplicationUpdate {
            entity: EntityKey::Unit(UnitId(9)),
            seq: 1,
            change: GameEventData::HighlightChanged { unit: UnitId(9), highlighted: true },
        };
        assert_eq!(
            mirror.apply(&update, &mut NullSink),
            Err(MirrorError::UnknownEntity(EntityKey::Unit(UnitId(9))))
        );
    }

    #[test]
    fn test_mirror_tracks_authority_hash() {
        let mut state = MatchState::new([1; 16], MatchConfig::default());
        let mut replicator = Replicator::new();
        let mut mirror = Mirror::new();

        let p1 = state.spawn_player(PlayerVariant::Standard, 0, SpawnPose::default());
        let p2 = state.spawn_player(PlayerVariant::AlternateInput, 1, SpawnPose::default());
        state.set_player_color(p2, ColorId::Second);
        for player in [p1, p2] {
            let resources = state.spawn_resources();
            state.bind_resources(player, resources).unwrap();
        }
        let castle = state.spawn_unit(UnitKind::Stronghold, 0, 1000, 4);
        state.transfer_owner(castle, Some(p2));

        assert!(mirror.apply_batch(&flush(&mut state, &mut replicator), &mut NullSink));
        assert_eq!(mirror.compute_hash(), state.compute_hash());

        let farm = place_building(&mut state, p1, CellId(2), BlueprintId(1)).unwrap();
        state.set_highlighted(farm, true);
        apply_damage(&mut state, castle, 250);
        assert!(mirror.apply_batch(&flush(&mut state, &mut replicator), &mut NullSink));

        apply_damage(&mut state, farm, 9999);
        state.remove_player(p2);
        assert!(mirror.apply_batch(&flush(&mut state, &mut replicator), &mut NullSink));

        assert!(mirror.unit(farm).is_none());
        assert_eq!(mirror.unit(castle).unwrap().owner, None);
        assert_eq!(mirror.compute_hash(), state.compute_hash());
    }

    #[test]
    fn test_player_color_reconciles_on_receipt() {
        let mut state = MatchState::new([1; 16], MatchConfig::default());
        let mut replicator = Replicator::new();
        let mut mirror = Mirror::new();

        let player = state.spawn_player(PlayerVariant::Standard, 0, SpawnPose::default());
        let castle = state.spawn_unit(UnitKind::Stronghold, 0, 1000, 2);
        state.attach(castle, Some(player));
        mirror.apply_batch(&flush(&mut state, &mut replicator), &mut NullSink);

        state.set_player_color(player, ColorId::Second);
        let batch = flush(&mut state, &mut replicator);

        // Only the player change: the handler alone must repaint the unit
        let player_only = ReplicationBatch {
            updates: batch.updates[..1].to_vec(),
            state_hash: batch.state_hash,
        };
        let mut sink = RecordingSink::default();
        mirror.apply_batch(&player_only, &mut sink);

        assert_eq!(mirror.unit(castle).unwrap().appearance.color, ColorId::Second);
        assert_eq!(sink.calls.len(), 3);
        assert_eq!(sink.last_for(VisualTarget::Child { unit: castle, index: 1 }).unwrap().color, 1.0);
    }

    #[test]
    fn test_clear_resets_sequences() {
        let mut mirror = Mirror::new();
        let spawn = ReplicationUpdate {
            entity: EntityKey::Resources(ResourcesId(1)),
            seq: 1,
            change: GameEventData::ResourcesSpawned { resources: ResourcesId(1), meal: 1, mana: 2 },
        };
        mirror.apply(&spawn, &mut NullSink).unwrap();
        mirror.clear();

        assert!(mirror.is_empty());
        assert!(mirror.apply(&spawn, &mut NullSink).is_ok());
    }
}
