//! Spawn Layout
//!
//! Fixed spawn points of the duel map. Layout order is significant: spawn
//! point `i` always receives the `i`-th shuffled connection and gives its
//! own color to that player.

use serde::{Serialize, Deserialize};

use crate::game::appearance::ColorId;

const DUEL_HALF_LENGTH: f32 = 40.0;
const STRONGHOLD_HEALTH: i32 = 1000;
const STRONGHOLD_CHILD_VISUALS: u16 = 4;

/// Position and orientation in world space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SpawnPose {
    /// World position (x, y, z).
    pub position: [f32; 3],
    /// Rotation about the vertical axis, in degrees.
    pub yaw_degrees: f32,
}

/// Stronghold standing at a spawn point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrongholdTemplate {
    /// Build cost (informational).
    pub cost: u32,
    /// Starting health.
    pub health: i32,
    /// Child visuals sharing the team color.
    pub child_visuals: u16,
}

impl Default for StrongholdTemplate {
    fn default() -> Self {
        Self {
            cost: 0,
            health: STRONGHOLD_HEALTH,
            child_visuals: STRONGHOLD_CHILD_VISUALS,
        }
    }
}

/// One starting location.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpawnPoint {
    /// Where the player entity is placed.
    pub pose: SpawnPose,
    /// Color given to the player spawned here.
    pub color: ColorId,
    /// Stronghold handed to that player.
    pub stronghold: StrongholdTemplate,
}

/// Spawn layout provider.
pub trait SpawnLayout: Send + Sync {
    /// Spawn points in fixed order.
    fn spawn_points(&self) -> Vec<SpawnPoint>;
}

impl SpawnLayout for Vec<SpawnPoint> {
    fn spawn_points(&self) -> Vec<SpawnPoint> {
        self.clone()
    }
}

/// Two spawn points facing each other across the field.
#[derive(Clone, Copy, Debug)]
pub struct DuelMap {
    /// Distance from the field center to each spawn point.
    pub half_length: f32,
}

impl Default for DuelMap {
    fn default() -> Self {
        Self {
            half_length: DUEL_HALF_LENGTH,
        }
    }
}

impl SpawnLayout for DuelMap {
    fn spawn_points(&self) -> Vec<SpawnPoint> {
        vec![
            SpawnPoint {
                pose: SpawnPose {
                    position: [0.0, 0.0, -self.half_length],
                    yaw_degrees: 0.0,
                },
                color: ColorId::First,
                stronghold: StrongholdTemplate::default(),
            },
            SpawnPoint {
                pose: SpawnPose {
                    position: [0.0, 0.0, self.half_length],
                    yaw_degrees: 180.0,
                },
                color: ColorId::Second,
                stronghold: StrongholdTemplate::default(),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duel_map_has_two_opposing_points() {
        let points = DuelMap::default().spawn_points();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].color, ColorId::First);
        assert_eq!(points[1].color, ColorId::Second);
        assert_eq!(points[0].pose.position[2], -points[1].pose.position[2]);
        assert_eq!(points[1].pose.yaw_degrees, 180.0);
    }

    #[test]
    fn test_vec_layout_preserves_order() {
        let mut points = DuelMap::default().spawn_points();
        points.reverse();
        let layout: Vec<SpawnPoint> = points.clone();
        assert_eq!(layout.spawn_points(), points);
    }
}
