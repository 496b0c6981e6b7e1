//! Ownership Registry
//!
//! Bidirectional relation between players and the units they control.
//! The unit → owner index and the owner → units index are only ever changed
//! together, inside a single `&mut self` call, so neither side can be
//! observed out of step with the other.

use std::collections::{BTreeMap, BTreeSet};

use crate::game::state::{PlayerId, UnitId};

/// Result of an ownership change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OwnershipChange {
    /// Unit whose owner changed.
    pub unit: UnitId,
    /// Owner before the change.
    pub previous: Option<PlayerId>,
    /// Owner after the change.
    pub current: Option<PlayerId>,
}

/// Bidirectional player/unit index.
///
/// Invariant: `owners[u] == p` iff `u ∈ holdings[p]`. Players owning no units
/// have no entry in `holdings`.
#[derive(Clone, Debug, Default)]
pub struct OwnershipRegistry {
    owners: BTreeMap<UnitId, PlayerId>,
    holdings: BTreeMap<PlayerId, BTreeSet<UnitId>>,
}

impl OwnershipRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `unit` to `player`, moving it off any previous owner.
    ///
    /// `None` is a no-op. Re-attaching to the current owner reports no change.
    pub fn attach(&mut self, unit: UnitId, player: Option<PlayerId>) -> Option<OwnershipChange> {
        let player = player?;

        let previous = self.owners.insert(unit, player);
        if previous == Some(player) {
            return None;
        }
        if let Some(prev) = previous {
            self.remove_holding(prev, unit);
        }
        self.holdings.entry(player).or_default().insert(unit);

        Some(OwnershipChange {
            unit,
            previous,
            current: Some(player),
        })
    }

    /// Clear the owner of `unit`. No-op if it has none.
    pub fn detach(&mut self, unit: UnitId) -> Option<OwnershipChange> {
        let previous = self.owners.remove(&unit)?;
        self.remove_holding(previous, unit);

        Some(OwnershipChange {
            unit,
            previous: Some(previous),
            current: None,
        })
    }

    /// Hand `unit` to `player`. Same single transition as [`attach`](Self::attach).
    pub fn transfer(&mut self, unit: UnitId, player: Option<PlayerId>) -> Option<OwnershipChange> {
        self.attach(unit, player)
    }

    /// Detach every unit owned by `player`. Returns the released units.
    pub fn release_player(&mut self, player: PlayerId) -> Vec<UnitId> {
        let units: Vec<UnitId> = self
            .holdings
            .remove(&player)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();

        for unit in &units {
            self.owners.remove(unit);
        }
        units
    }

    /// Current owner of a unit.
    pub fn owner_of(&self, unit: UnitId) -> Option<PlayerId> {
        self.owners.get(&unit).copied()
    }

    /// Units owned by a player, in id order.
    pub fn units_of(&self, player: PlayerId) -> impl Iterator<Item = UnitId> + '_ {
        self.holdings
            .get(&player)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Number of units owned by a player.
    pub fn unit_count(&self, player: PlayerId) -> usize {
        self.holdings.get(&player).map(|set| set.len()).unwrap_or(0)
    }

    /// Check the bijection between both indexes.
    pub fn is_consistent(&self) -> bool {
        let forward = self
            .owners
            .iter()
            .all(|(unit, owner)| self.holdings.get(owner).is_some_and(|set| set.contains(unit)));

        let backward = self.holdings.iter().all(|(owner, set)| {
            !set.is_empty() && set.iter().all(|unit| self.owners.get(unit) == Some(owner))
        });

        forward && backward
    }

    fn remove_holding(&mut self, player: PlayerId, unit: UnitId) {
        if let Some(set) = self.holdings.get_mut(&player) {
            set.remove(&unit);
            if set.is_empty() {
                self.holdings.remove(&player);
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const P1: PlayerId = PlayerId(1);
    const P2: PlayerId = PlayerId(2);

    #[test]
    fn test_attach_none_is_noop() {
        let mut registry = OwnershipRegistry::new();
        assert!(registry.attach(UnitId(1), None).is_none());
        assert_eq!(registry.owner_of(UnitId(1)), None);
    }

    #[test]
    fn test_attach_then_detach() {
        let mut registry = OwnershipRegistry::new();
        let change = registry.attach(UnitId(1), Some(P1)).unwrap();
        assert_eq!(change.previous, None);
        assert_eq!(change.current, Some(P1));
        assert_eq!(registry.owner_of(UnitId(1)), Some(P1));
        assert_eq!(registry.units_of(P1).collect::<Vec<_>>(), vec![UnitId(1)]);

        let change = registry.detach(UnitId(1)).unwrap();
        assert_eq!(change.previous, Some(P1));
        assert_eq!(registry.unit_count(P1), 0);

        // Second detach is a no-op
        assert!(registry.detach(UnitId(1)).is_none());
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_transfer_moves_between_players() {
        let mut registry = OwnershipRegistry::new();
        registry.attach(UnitId(5), Some(P1));

        let change = registry.transfer(UnitId(5), Some(P2)).unwrap();
        assert_eq!(change.previous, Some(P1));
        assert_eq!(change.current, Some(P2));

        assert_eq!(registry.unit_count(P1), 0);
        assert_eq!(registry.unit_count(P2), 1);
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_reattach_same_owner_reports_nothing() {
        let mut registry = OwnershipRegistry::new();
        registry.attach(UnitId(5), Some(P1));
        assert!(registry.attach(UnitId(5), Some(P1)).is_none());
        assert_eq!(registry.unit_count(P1), 1);
    }

    #[test]
    fn test_release_player() {
        let mut registry = OwnershipRegistry::new();
        registry.attach(UnitId(1), Some(P1));
        registry.attach(UnitId(2), Some(P1));
        registry.attach(UnitId(3), Some(P2));

        let released = registry.release_player(P1);
        assert_eq!(released, vec![UnitId(1), UnitId(2)]);
        assert_eq!(registry.owner_of(UnitId(1)), None);
        assert_eq!(registry.owner_of(UnitId(3)), Some(P2));
        assert!(registry.is_consistent());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Attach(u32, Option<u32>),
        Detach(u32),
        Release(u32),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u32..8, proptest::option::of(0u32..3)).prop_map(|(u, p)| Op::Attach(u, p)),
            (0u32..8).prop_map(Op::Detach),
            (0u32..3).prop_map(Op::Release),
        ]
    }

    proptest! {
        #[test]
        fn prop_ownership_bijection(ops in proptest::collection::vec(op_strategy(), 0..64)) {
            let mut registry = OwnershipRegistry::new();
            // Reference model: unit -> owner
            let mut model: BTreeMap<u32, u32> = BTreeMap::new();

            for op in ops {
                match op {
                    Op::Attach(u, p) => {
                        registry.attach(UnitId(u), p.map(PlayerId));
                        if let Some(p) = p {
                            model.insert(u, p);
                        }
                    }
                    Op::Detach(u) => {
                        registry.detach(UnitId(u));
                        model.remove(&u);
                    }
                    Op::Release(p) => {
                        registry.release_player(PlayerId(p));
                        model.retain(|_, owner| *owner != p);
                    }
                }

                prop_assert!(registry.is_consistent());

                for u in 0u32..8 {
                    prop_assert_eq!(registry.owner_of(UnitId(u)), model.get(&u).copied().map(PlayerId));
                    for p in 0u32..3 {
                        let in_set = registry.units_of(PlayerId(p)).any(|x| x == UnitId(u));
                        let owned = registry.owner_of(UnitId(u)) == Some(PlayerId(p));
                        prop_assert_eq!(in_set, owned);
                    }
                }
            }
        }
    }
}
