//! Damage and Death
//!
//! Units are `Alive` until a damage application leaves them at zero health,
//! then `Dead` for good. Death is resolved synchronously on the authority:
//! death hook, detach from owner, removal from the arena. A removed unit
//! cannot be found again, so it cannot die twice.

use tracing::{debug, info};

use crate::game::events::GameEventData;
use crate::game::state::{MatchOutcome, MatchState, PlayerId, UnitId, UnitKind};

/// Unit lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifeState {
    /// Health above zero.
    Alive,
    /// Terminal.
    Dead,
}

/// Result of a damage or heal application.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DamageOutcome {
    /// Unit is not in the arena (already dead or never existed).
    Absent,
    /// Unit is still alive.
    Damaged {
        /// Health after the change.
        health: i32,
    },
    /// Unit died and was removed.
    Died {
        /// Owner at the time of death.
        owner: Option<PlayerId>,
    },
}

impl DamageOutcome {
    /// Lifecycle state implied by the outcome, if the unit existed.
    pub fn life_state(self) -> Option<LifeState> {
        match self {
            DamageOutcome::Absent => None,
            DamageOutcome::Damaged { .. } => Some(LifeState::Alive),
            DamageOutcome::Died { .. } => Some(LifeState::Dead),
        }
    }
}

/// New health after applying `amount` of damage (negative heals).
///
/// Floors at zero. With a cap, healing never lifts health above
/// `max(cap, current)`.
pub fn next_health(current: i32, amount: i32, max_health: Option<i32>) -> i32 {
    let next = current.saturating_sub(amount).max(0);
    match max_health {
        Some(cap) if amount < 0 => next.min(cap.max(current)),
        _ => next,
    }
}

/// Apply damage to a unit.
pub fn apply_damage(state: &mut MatchState, unit: UnitId, amount: i32) -> DamageOutcome {
    let max_health = state.config.max_health;
    let Some(target) = state.unit_mut(unit) else {
        return DamageOutcome::Absent;
    };

    let before = target.health;
    target.health = next_health(before, amount, max_health);
    let health = target.health;
    let kind = target.kind;

    if health != before {
        state.push_event(GameEventData::HealthChanged { unit, health });
    }

    if health > 0 {
        return DamageOutcome::Damaged { health };
    }

    let owner = state.owner_of(unit);
    run_death_hook(state, unit, kind, owner);
    state.despawn_unit(unit);

    debug!("Unit {} died (owner {:?})", unit.raw(), owner.map(PlayerId::raw));
    DamageOutcome::Died { owner }
}

/// Heal a unit. Same as damage with the sign flipped.
pub fn apply_heal(state: &mut MatchState, unit: UnitId, amount: i32) -> DamageOutcome {
    apply_damage(state, unit, amount.saturating_neg())
}

/// Per-kind reaction to a death. Runs before the unit is detached.
fn run_death_hook(state: &mut MatchState, unit: UnitId, kind: UnitKind, owner: Option<PlayerId>) {
    state.push_event(GameEventData::UnitDied { unit, kind, owner });

    match kind {
        UnitKind::Stronghold => {
            let Some(loser) = owner else {
                return;
            };
            let winner = state.players().map(|p| p.id).find(|id| *id != loser);
            info!("Stronghold {} fell, player {} loses", unit.raw(), loser.raw());
            state.decide(MatchOutcome {
                winner,
                loser,
                won_description: "The enemy stronghold has fallen".to_string(),
                lost_description: "Your stronghold has fallen".to_string(),
            });
        }
        UnitKind::Building(_) => {
            state.release_cell(unit);
        }
        UnitKind::Troop => {}
    }
}

// =============================================================================
// TESTS
// =============================================================================
