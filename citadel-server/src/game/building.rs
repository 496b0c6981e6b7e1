//! Building Placement
//!
//! Authority-side handling of a player's request to put a building on a
//! grid cell. Grid geometry belongs to the presentation side; the authority
//! only tracks which cells are taken, charges the cost and hands the new
//! building to its player.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::game::state::{MatchState, PlayerId, UnitId, UnitKind};

/// Building blueprint identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlueprintId(pub u16);

/// Grid cell identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellId(pub u32);

/// A placeable building.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blueprint {
    /// Blueprint ID
    pub id: BlueprintId,
    /// Display name
    pub name: String,
    /// Meal cost
    pub cost: u32,
    /// Starting health
    pub health: i32,
    /// Child visuals that share the team color
    pub child_visuals: u16,
}

/// Buildings available in a match.
#[derive(Clone, Debug)]
pub struct BuildingCatalog {
    blueprints: BTreeMap<BlueprintId, Blueprint>,
}

impl BuildingCatalog {
    /// Empty catalog.
    pub fn empty() -> Self {
        Self {
            blueprints: BTreeMap::new(),
        }
    }

    /// Add or replace a blueprint.
    pub fn insert(&mut self, blueprint: Blueprint) {
        self.blueprints.insert(blueprint.id, blueprint);
    }

    /// Look up a blueprint.
    pub fn get(&self, id: BlueprintId) -> Option<&Blueprint> {
        self.blueprints.get(&id)
    }

    /// All blueprints in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Blueprint> {
        self.blueprints.values()
    }
}

impl Default for BuildingCatalog {
    fn default() -> Self {
        let mut catalog = Self::empty();
        catalog.insert(Blueprint {
            id: BlueprintId(1),
            name: "Farm".to_string(),
            cost: 40,
            health: 150,
            child_visuals: 2,
        });
        catalog.insert(Blueprint {
            id: BlueprintId(2),
            name: "Barracks".to_string(),
            cost: 60,
            health: 250,
            child_visuals: 3,
        });
        catalog.insert(Blueprint {
            id: BlueprintId(3),
            name: "Mage Tower".to_string(),
            cost: 80,
            health: 300,
            child_visuals: 1,
        });
        catalog
    }
}

/// Placement rejections. Never sent to participants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    /// Player does not exist.
    #[error("Unknown player {0:?}")]
    UnknownPlayer(PlayerId),

    /// Blueprint is not in the catalog.
    #[error("Unknown blueprint {0:?}")]
    UnknownBlueprint(BlueprintId),

    /// Player has no resources container yet.
    #[error("Player {0:?} has no resources")]
    NoResources(PlayerId),

    /// Not enough meal.
    #[error("Insufficient meal: cost {cost}, available {available}")]
    InsufficientMeal {
        /// Blueprint cost.
        cost: u32,
        /// Meal held.
        available: u32,
    },

    /// Cell already holds a building.
    #[error("Cell {0:?} is occupied")]
    CellOccupied(CellId),
}

/// Place a building for `player` on `cell`.
///
/// Charges the blueprint cost, spawns the building and attaches it to the
/// player, which paints it in the player's color.
pub fn place_building(
    state: &mut MatchState,
    player: PlayerId,
    cell: CellId,
    blueprint: BlueprintId,
) -> Result<UnitId, PlacementError> {
    if state.player(player).is_none() {
        return Err(PlacementError::UnknownPlayer(player));
    }

    let blueprint = state
        .config
        .catalog
        .get(blueprint)
        .cloned()
        .ok_or(PlacementError::UnknownBlueprint(blueprint))?;

    let resources = state
        .resources_of(player)
        .ok_or(PlacementError::NoResources(player))?;
    if resources.meal < blueprint.cost {
        return Err(PlacementError::InsufficientMeal {
            cost: blueprint.cost,
            available: resources.meal,
        });
    }
    let resources_id = resources.id;

    if state.cell_occupant(cell).is_some() {
        return Err(PlacementError::CellOccupied(cell));
    }

    state.spend_meal(resources_id, blueprint.cost);
    let unit = state.spawn_unit(
        UnitKind::Building(blueprint.id),
        blueprint.cost,
        blueprint.health,
        blueprint.child_visuals,
    );
    state.occupy_cell(cell, unit);
    state.attach(unit, Some(player));

    debug!("Placed {} as unit {} on cell {}", blueprint.name, unit.raw(), cell.0);
    Ok(unit)
}
