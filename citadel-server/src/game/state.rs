//! Match State Definitions
//!
//! The authoritative arena: every unit, player and resources container of
//! a match, indexed by stable ids. Uses BTreeMap for deterministic iteration
//! order.
//!
//! Mutations go through `MatchState` methods so the ownership relation and
//! the replicated fields never drift apart, and every change leaves a
//! [`GameEvent`] behind for replication.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use crate::core::hash::{StateHash, StateHasher};
use crate::game::appearance::{Appearance, ColorId};
use crate::game::building::{BlueprintId, BuildingCatalog, CellId};
use crate::game::events::{GameEvent, GameEventData};
use crate::game::map::SpawnPose;
use crate::game::ownership::OwnershipRegistry;

// =============================================================================
// ENTITY IDS
// =============================================================================

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            /// Raw id value.
            #[inline]
            pub const fn raw(self) -> u32 {
                self.0
            }
        }
    };
}

entity_id!(
    /// Stable unit identifier, unique per match.
    UnitId
);
entity_id!(
    /// Stable player identifier, unique per match.
    PlayerId
);
entity_id!(
    /// Stable resources container identifier, unique per match.
    ResourcesId
);

// =============================================================================
// UNIT STATE
// =============================================================================

/// What a unit is. Selects the death hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitKind {
    /// Starting castle of a spawn point. Losing it loses the match.
    Stronghold,
    /// Building placed by a player.
    Building(BlueprintId),
    /// Basic unit.
    Troop,
}

/// State of a single unit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnitState {
    /// Unique unit ID
    pub id: UnitId,

    /// Kind of unit
    pub kind: UnitKind,

    /// Current health, never negative
    pub health: i32,

    /// Replicated color and highlight
    pub appearance: Appearance,

    /// Grid cell occupied (buildings only)
    pub cell: Option<CellId>,

    cost: u32,
}

impl UnitState {
    /// Create a new unit. Negative starting health is clamped to 0.
    pub fn new(id: UnitId, kind: UnitKind, cost: u32, health: i32, child_visuals: u16) -> Self {
        Self {
            id,
            kind,
            health: health.max(0),
            appearance: Appearance::new(ColorId::First, child_visuals),
            cell: None,
            cost,
        }
    }

    /// Build cost. Fixed at creation.
    #[inline]
    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Is the unit still alive?
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.health > 0
    }
}

// =============================================================================
// PLAYER STATE
// =============================================================================

/// Player entity variant, chosen by the connection's input modality.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerVariant {
    /// Keyboard/mouse player.
    #[default]
    Standard,
    /// Alternate input device (e.g. a headset with tracked controllers).
    AlternateInput,
}

/// State of a single player.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerState {
    /// Unique player ID
    pub id: PlayerId,

    /// Team color, set once at launch
    pub color: ColorId,

    /// Bound resources container
    pub resources: Option<ResourcesId>,

    /// Entity variant
    pub variant: PlayerVariant,

    /// Spawn point index the player started at
    pub spawn_index: usize,

    /// Spawn pose
    pub pose: SpawnPose,
}

/// Meal and mana counters of one player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// Container ID
    pub id: ResourcesId,
    /// Meal, spent on buildings
    pub meal: u32,
    /// Mana
    pub mana: u32,
}

/// Resources binding errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourcesError {
    /// Player does not exist.
    #[error("Unknown player {0:?}")]
    UnknownPlayer(PlayerId),

    /// Container does not exist.
    #[error("Unknown resources container {0:?}")]
    UnknownResources(ResourcesId),

    /// Player already has a container.
    #[error("Player {0:?} already has resources")]
    AlreadyBound(PlayerId),
}

// =============================================================================
// MATCH CONFIG
// =============================================================================

/// Match rules.
#[derive(Clone, Debug)]
pub struct MatchConfig {
    /// Meal in a fresh resources container.
    pub starting_meal: u32,
    /// Mana in a fresh resources container.
    pub starting_mana: u32,
    /// Upper bound for healing. `None` leaves health uncapped.
    pub max_health: Option<i32>,
    /// Buildings players may place.
    pub catalog: BuildingCatalog,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            starting_meal: 100,
            starting_mana: 50,
            max_health: None,
            catalog: BuildingCatalog::default(),
        }
    }
}

/// Result of a decided match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchOutcome {
    /// Winning player, if one is left.
    pub winner: Option<PlayerId>,
    /// Losing player.
    pub loser: PlayerId,
    /// Free text shown to the winner.
    pub won_description: String,
    /// Free text shown to the loser.
    pub lost_description: String,
}

// =============================================================================
// MATCH STATE
// =============================================================================

/// Complete authoritative state of a match.
#[derive(Clone, Debug)]
pub struct MatchState {
    /// Match identifier
    pub match_id: [u8; 16],

    /// Match rules
    pub config: MatchConfig,

    next_entity_id: u32,
    units: BTreeMap<UnitId, UnitState>,
    players: BTreeMap<PlayerId, PlayerState>,
    resources: BTreeMap<ResourcesId, Resources>,
    ownership: OwnershipRegistry,
    occupied_cells: BTreeMap<CellId, UnitId>,
    outcome: Option<MatchOutcome>,
    pending_events: Vec<GameEvent>,
}

impl MatchState {
    /// Create an empty match.
    pub fn new(match_id: [u8; 16], config: MatchConfig) -> Self {
        Self {
            match_id,
            config,
            next_entity_id: 1,
            units: BTreeMap::new(),
            players: BTreeMap::new(),
            resources: BTreeMap::new(),
            ownership: OwnershipRegistry::new(),
            occupied_cells: BTreeMap::new(),
            outcome: None,
            pending_events: Vec::new(),
        }
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    // -------------------------------------------------------------------------
    // Units
    // -------------------------------------------------------------------------

    /// Spawn an unowned unit.
    pub fn spawn_unit(&mut self, kind: UnitKind, cost: u32, health: i32, child_visuals: u16) -> UnitId {
        let id = UnitId(self.allocate_id());
        let unit = UnitState::new(id, kind, cost, health, child_visuals);

        self.push_event(GameEventData::UnitSpawned {
            unit: id,
            kind,
            cost,
            health: unit.health,
            color: unit.appearance.color,
            highlighted: unit.appearance.highlighted,
            child_visuals,
        });
        self.units.insert(id, unit);
        id
    }

    /// Remove a unit from the arena, detaching it first.
    pub fn despawn_unit(&mut self, id: UnitId) -> bool {
        if !self.units.contains_key(&id) {
            return false;
        }

        self.detach(id);
        self.release_cell(id);
        self.units.remove(&id);
        self.push_event(GameEventData::UnitDespawned { unit: id });
        true
    }

    /// Get a unit by ID.
    pub fn unit(&self, id: UnitId) -> Option<&UnitState> {
        self.units.get(&id)
    }

    pub(crate) fn unit_mut(&mut self, id: UnitId) -> Option<&mut UnitState> {
        self.units.get_mut(&id)
    }

    /// All units in id order.
    pub fn units(&self) -> impl Iterator<Item = &UnitState> {
        self.units.values()
    }

    /// Set a unit's team color.
    pub fn set_unit_color(&mut self, id: UnitId, color: ColorId) -> bool {
        let Some(unit) = self.units.get_mut(&id) else {
            return false;
        };
        if unit.appearance.set_color(color) {
            self.push_event(GameEventData::UnitColorChanged { unit: id, color });
        }
        true
    }

    /// Set a unit's highlight flag.
    pub fn set_highlighted(&mut self, id: UnitId, highlighted: bool) -> bool {
        let Some(unit) = self.units.get_mut(&id) else {
            return false;
        };
        if unit.appearance.set_highlighted(highlighted) {
            self.push_event(GameEventData::HighlightChanged { unit: id, highlighted });
        }
        true
    }

    // -------------------------------------------------------------------------
    // Ownership
    // -------------------------------------------------------------------------

    /// Attach a unit to a player and give it the player's current color.
    ///
    /// No-op when `player` is `None` or either entity is missing.
    pub fn attach(&mut self, unit: UnitId, player: Option<PlayerId>) -> bool {
        let Some(player) = player else {
            return false;
        };
        let Some(color) = self.players.get(&player).map(|p| p.color) else {
            return false;
        };
        if !self.units.contains_key(&unit) {
            return false;
        }

        if let Some(change) = self.ownership.attach(unit, Some(player)) {
            self.push_event(GameEventData::OwnerChanged {
                unit: change.unit,
                owner: change.current,
            });
        }
        self.set_unit_color(unit, color);
        true
    }

    /// Clear a unit's owner. Returns the previous owner.
    pub fn detach(&mut self, unit: UnitId) -> Option<PlayerId> {
        let change = self.ownership.detach(unit)?;
        self.push_event(GameEventData::OwnerChanged { unit, owner: None });
        change.previous
    }

    /// Hand a unit to another player in one transition.
    pub fn transfer_owner(&mut self, unit: UnitId, player: Option<PlayerId>) -> bool {
        self.attach(unit, player)
    }

    /// Owner of a unit.
    pub fn owner_of(&self, unit: UnitId) -> Option<PlayerId> {
        self.ownership.owner_of(unit)
    }

    /// Units owned by a player.
    pub fn units_of(&self, player: PlayerId) -> impl Iterator<Item = UnitId> + '_ {
        self.ownership.units_of(player)
    }

    /// Read access to the registry.
    pub fn ownership(&self) -> &OwnershipRegistry {
        &self.ownership
    }

    // -------------------------------------------------------------------------
    // Players
    // -------------------------------------------------------------------------

    /// Spawn a player entity at a spawn point.
    pub fn spawn_player(&mut self, variant: PlayerVariant, spawn_index: usize, pose: SpawnPose) -> PlayerId {
        let id = PlayerId(self.allocate_id());
        let player = PlayerState {
            id,
            color: ColorId::default(),
            resources: None,
            variant,
            spawn_index,
            pose,
        };

        self.push_event(GameEventData::PlayerSpawned {
            player: id,
            variant,
            spawn_index,
            pose,
            color: player.color,
        });
        self.players.insert(id, player);
        id
    }

    /// Spawn a player together with a fresh resources container bound to it.
    pub fn spawn_equipped_player(&mut self, variant: PlayerVariant, spawn_index: usize, pose: SpawnPose) -> PlayerId {
        let player = self.spawn_player(variant, spawn_index, pose);
        let resources = self.spawn_resources();
        if let Some(state) = self.players.get_mut(&player) {
            state.resources = Some(resources);
        }
        self.push_event(GameEventData::ResourcesBound { player, resources });
        player
    }

    /// Remove a player, orphaning its units and dropping its resources.
    pub fn remove_player(&mut self, id: PlayerId) -> bool {
        let Some(player) = self.players.remove(&id) else {
            return false;
        };

        for unit in self.ownership.release_player(id) {
            self.push_event(GameEventData::OwnerChanged { unit, owner: None });
        }
        if let Some(resources) = player.resources {
            self.resources.remove(&resources);
        }
        self.push_event(GameEventData::PlayerRemoved { player: id });
        true
    }

    /// Get a player by ID.
    pub fn player(&self, id: PlayerId) -> Option<&PlayerState> {
        self.players.get(&id)
    }

    /// All players in id order.
    pub fn players(&self) -> impl Iterator<Item = &PlayerState> {
        self.players.values()
    }

    /// Set a player's color and reconcile every unit it owns.
    pub fn set_player_color(&mut self, id: PlayerId, color: ColorId) -> bool {
        let Some(player) = self.players.get_mut(&id) else {
            return false;
        };
        player.color = color;
        self.push_event(GameEventData::PlayerColorChanged { player: id, color });

        let owned: Vec<UnitId> = self.ownership.units_of(id).collect();
        for unit in owned {
            self.set_unit_color(unit, color);
        }
        true
    }

    // -------------------------------------------------------------------------
    // Resources
    // -------------------------------------------------------------------------

    /// Spawn a resources container with the configured starting amounts.
    pub fn spawn_resources(&mut self) -> ResourcesId {
        let id = ResourcesId(self.allocate_id());
        let resources = Resources {
            id,
            meal: self.config.starting_meal,
            mana: self.config.starting_mana,
        };

        self.push_event(GameEventData::ResourcesSpawned {
            resources: id,
            meal: resources.meal,
            mana: resources.mana,
        });
        self.resources.insert(id, resources);
        id
    }

    /// Bind a container to a player. Each player gets exactly one.
    pub fn bind_resources(&mut self, player: PlayerId, resources: ResourcesId) -> Result<(), ResourcesError> {
        if !self.resources.contains_key(&resources) {
            return Err(ResourcesError::UnknownResources(resources));
        }
        let state = self
            .players
            .get_mut(&player)
            .ok_or(ResourcesError::UnknownPlayer(player))?;
        if state.resources.is_some() {
            return Err(ResourcesError::AlreadyBound(player));
        }

        state.resources = Some(resources);
        self.push_event(GameEventData::ResourcesBound { player, resources });
        Ok(())
    }

    /// Get a container by ID.
    pub fn resources(&self, id: ResourcesId) -> Option<&Resources> {
        self.resources.get(&id)
    }

    /// Container bound to a player.
    pub fn resources_of(&self, player: PlayerId) -> Option<&Resources> {
        let id = self.players.get(&player)?.resources?;
        self.resources.get(&id)
    }

    /// Spend meal from a container. Returns false if there is not enough.
    pub fn spend_meal(&mut self, id: ResourcesId, amount: u32) -> bool {
        let Some(resources) = self.resources.get_mut(&id) else {
            return false;
        };
        if resources.meal < amount {
            return false;
        }

        resources.meal -= amount;
        let (meal, mana) = (resources.meal, resources.mana);
        self.push_event(GameEventData::ResourcesChanged { resources: id, meal, mana });
        true
    }

    // -------------------------------------------------------------------------
    // Grid cells
    // -------------------------------------------------------------------------

    /// Unit standing on a cell.
    pub fn cell_occupant(&self, cell: CellId) -> Option<UnitId> {
        self.occupied_cells.get(&cell).copied()
    }

    pub(crate) fn occupy_cell(&mut self, cell: CellId, unit: UnitId) {
        if let Some(state) = self.units.get_mut(&unit) {
            state.cell = Some(cell);
            self.occupied_cells.insert(cell, unit);
        }
    }

    pub(crate) fn release_cell(&mut self, unit: UnitId) {
        if let Some(cell) = self.units.get_mut(&unit).and_then(|u| u.cell.take()) {
            self.occupied_cells.remove(&cell);
        }
    }

    // -------------------------------------------------------------------------
    // Outcome
    // -------------------------------------------------------------------------

    /// Match result, once decided.
    pub fn outcome(&self) -> Option<&MatchOutcome> {
        self.outcome.as_ref()
    }

    /// Record the match result. The first decision wins.
    pub(crate) fn decide(&mut self, outcome: MatchOutcome) {
        if self.outcome.is_some() {
            return;
        }
        self.push_event(GameEventData::MatchDecided {
            winner: outcome.winner,
            loser: outcome.loser,
        });
        self.outcome = Some(outcome);
    }

    // -------------------------------------------------------------------------
    // Events & hashing
    // -------------------------------------------------------------------------

    /// Take pending events (consumes them).
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// Number of events not yet taken.
    pub fn pending_event_count(&self) -> usize {
        self.pending_events.len()
    }

    /// Push a game event.
    pub fn push_event(&mut self, data: GameEventData) {
        self.pending_events.push(GameEvent::new(data));
    }

    /// Hash of the replicated snapshot. Matches `Mirror::compute_hash`.
    pub fn compute_hash(&self) -> StateHash {
        let mut hasher = StateHasher::for_snapshot();

        hasher.update_u32(self.units.len() as u32);
        for unit in self.units.values() {
            hash_unit(
                &mut hasher,
                unit.id,
                unit.cost,
                unit.health,
                &unit.appearance,
                self.ownership.owner_of(unit.id),
            );
        }

        hasher.update_u32(self.players.len() as u32);
        for player in self.players.values() {
            hash_player(&mut hasher, player.id, player.color, player.resources);
        }

        hasher.update_u32(self.resources.len() as u32);
        for resources in self.resources.values() {
            hash_resources(&mut hasher, resources);
        }

        hasher.finalize()
    }
}

/// Hash one unit's replicated fields.
pub(crate) fn hash_unit(
    hasher: &mut StateHasher,
    id: UnitId,
    cost: u32,
    health: i32,
    appearance: &Appearance,
    owner: Option<PlayerId>,
) {
    hasher.update_u32(id.raw());
    hasher.update_u32(cost);
    hasher.update_i32(health);
    hasher.update_u8(appearance.color.index());
    hasher.update_bool(appearance.highlighted);
    hasher.update_opt_u32(owner.map(PlayerId::raw));
}

/// Hash one player's replicated fields.
pub(crate) fn hash_player(
    hasher: &mut StateHasher,
    id: PlayerId,
    color: ColorId,
    resources: Option<ResourcesId>,
) {
    hasher.update_u32(id.raw());
    hasher.update_u8(color.index());
    hasher.update_opt_u32(resources.map(ResourcesId::raw));
}

/// Hash one resources container.
pub(crate) fn hash_resources(hasher: &mut StateHasher, resources: &Resources) {
    hasher.update_u32(resources.id.raw());
    hasher.update_u32(resources.meal);
    hasher.update_u32(resources.mana);
}

// =============================================================================
// TESTS
// =============================================================================
