//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Control messages travel as JSON text frames. Replication batches are the
//! hot path and travel as bincode binary frames.

use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::core::hash::StateHash;
use crate::game::appearance::ColorId;
use crate::game::building::{BlueprintId, CellId};
use crate::game::events::{EntityKey, GameEventData};
use crate::game::state::{PlayerId, PlayerVariant};

/// Network identity of one WebSocket connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", hex::encode(self.0.to_be_bytes()))
    }
}

/// Input modality a client declares when joining.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputModality {
    /// Keyboard and mouse.
    #[default]
    Default,
    /// Alternate input device.
    Alternate,
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask to be paired into the match.
    Join {
        /// Local controller slot of the joining player.
        controller_slot: u8,
        /// Declared input modality.
        #[serde(default)]
        modality: InputModality,
    },

    /// Place a building on a grid cell.
    PlaceBuilding {
        /// Target cell.
        cell: CellId,
        /// Blueprint to build.
        blueprint: BlueprintId,
    },

    /// Player is leaving the match.
    Leave,

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection accepted.
    Welcome {
        /// Identity assigned to the connection.
        connection: ConnectionId,
        /// Server version.
        server_version: String,
    },

    /// Join accepted, still waiting for an opponent.
    Waiting {
        /// Connections buffered so far.
        pending: usize,
        /// Connections needed to launch.
        needed: usize,
    },

    /// Match is starting.
    MatchStart(MatchStartInfo),

    /// Ordered replicated state changes.
    Replicate(ReplicationBatch),

    /// The opponent's stronghold fell.
    WonGame {
        /// Free-text result.
        description: String,
    },

    /// This player's stronghold fell.
    LoseGame {
        /// Free-text result.
        description: String,
    },

    /// The session was torn down.
    LeaveGame {
        /// Why.
        reason: String,
    },

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server wall clock (ms since epoch).
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Why.
        reason: String,
    },
}

/// Information when match starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchStartInfo {
    /// Session identifier.
    pub match_id: Uuid,
    /// The receiving connection's player.
    pub you: PlayerId,
    /// Wall-clock launch time.
    pub started_at: DateTime<Utc>,
    /// Both players in spawn order.
    pub players: Vec<InitialPlayerInfo>,
}

/// Initial player information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialPlayerInfo {
    /// Player identifier.
    pub player: PlayerId,
    /// Spawn point index.
    pub spawn_index: usize,
    /// Assigned team color.
    pub color: ColorId,
    /// Player entity variant.
    pub variant: PlayerVariant,
}

/// One replicated change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationUpdate {
    /// Entity the change is ordered against.
    pub entity: EntityKey,
    /// Per-entity sequence number, starting at 1.
    pub seq: u32,
    /// The change itself.
    pub change: GameEventData,
}

/// Updates in authority application order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationBatch {
    /// Ordered updates.
    pub updates: Vec<ReplicationUpdate>,
    /// Authority snapshot hash after the batch.
    pub state_hash: StateHash,
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Message could not be decoded.
    InvalidMessage,
    /// Session no longer accepts connections.
    SessionClosed,
    /// Server at connection limit.
    ServerOverloaded,
}

/// Protocol decoding/encoding errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// JSON failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bincode failure.
    #[error("Binary error: {0}")]
    Binary(#[from] bincode::Error),

    /// Frame kind carries no message.
    #[error("Unexpected frame kind")]
    UnexpectedFrame,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Encode as a WebSocket frame.
    ///
    /// Internally tagged enums do not survive bincode, so only the batch
    /// payload goes binary and the frame kind carries the tag.
    pub fn to_frame(&self) -> Result<Message, ProtocolError> {
        match self {
            ServerMessage::Replicate(batch) => Ok(Message::Binary(batch.to_bytes()?)),
            other => Ok(Message::Text(other.to_json()?)),
        }
    }

    /// Decode a WebSocket frame.
    pub fn from_frame(frame: &Message) -> Result<Self, ProtocolError> {
        match frame {
            Message::Text(text) => Ok(Self::from_json(text)?),
            Message::Binary(data) => Ok(ServerMessage::Replicate(ReplicationBatch::from_bytes(data)?)),
            _ => Err(ProtocolError::UnexpectedFrame),
        }
    }
}

impl ReplicationBatch {
    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::map::SpawnPose;
    use crate::game::state::{ResourcesId, UnitId, UnitKind};

    #[test]
    fn test_join_json_shape() {
        let msg = ClientMessage::Join {
            controller_slot: 0,
            modality: InputModality::Alternate,
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"join\""));
        assert!(json.contains("alternate"));
        assert_eq!(ClientMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_join_modality_defaults() {
        let msg = ClientMessage::from_json(r#"{"type":"join","controller_slot":1}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Join {
                controller_slot: 1,
                modality: InputModality::Default
            }
        );
    }

    #[test]
    fn test_place_building_json() {
        let msg = ClientMessage::from_json(r#"{"type":"place_building","cell":12,"blueprint":2}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::PlaceBuilding {
                cell: CellId(12),
                blueprint: BlueprintId(2)
            }
        );
    }

    #[test]
    fn test_replicate_travels_binary() {
        let batch = ReplicationBatch {
            updates: vec![
                ReplicationUpdate {
                    entity: EntityKey::Unit(UnitId(3)),
                    seq: 1,
                    change: GameEventData::UnitSpawned {
                        unit: UnitId(3),
                        kind: UnitKind::Stronghold,
                        cost: 0,
                        health: 1000,
                        color: ColorId::First,
                        highlighted: false,
                        child_visuals: 4,
                    },
                },
                ReplicationUpdate {
                    entity: EntityKey::Player(PlayerId(5)),
                    seq: 1,
                    change: GameEventData::PlayerSpawned {
                        player: PlayerId(5),
                        variant: PlayerVariant::AlternateInput,
                        spawn_index: 1,
                        pose: SpawnPose {
                            position: [0.0, 0.0, 40.0],
                            yaw_degrees: 180.0,
                        },
                        color: ColorId::First,
                    },
                },
                ReplicationUpdate {
                    entity: EntityKey::Player(PlayerId(5)),
                    seq: 2,
                    change: GameEventData::ResourcesBound {
                        player: PlayerId(5),
                        resources: ResourcesId(7),
                    },
                },
            ],
            state_hash: [9; 32],
        };
        let msg = ServerMessage::Replicate(batch);

        let frame = msg.to_frame().unwrap();
        assert!(matches!(frame, Message::Binary(_)));
        assert_eq!(ServerMessage::from_frame(&frame).unwrap(), msg);
    }

    #[test]
    fn test_control_messages_travel_as_text() {
        let msg = ServerMessage::LeaveGame {
            reason: "Opponent disconnected".to_string(),
        };
        let frame = msg.to_frame().unwrap();
        assert!(matches!(frame, Message::Text(_)));
        assert_eq!(ServerMessage::from_frame(&frame).unwrap(), msg);
    }

    #[test]
    fn test_match_start_json() {
        let msg = ServerMessage::MatchStart(MatchStartInfo {
            match_id: Uuid::new_v4(),
            you: PlayerId(4),
            started_at: Utc::now(),
            players: vec![InitialPlayerInfo {
                player: PlayerId(4),
                spawn_index: 0,
                color: ColorId::First,
                variant: PlayerVariant::Standard,
            }],
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains("match_start"));
        assert_eq!(ServerMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_error_codes() {
        let msg = ServerMessage::Error(ServerError {
            code: ErrorCode::InvalidMessage,
            message: "bad json".to_string(),
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains("invalid_message"));
    }

    #[test]
    fn test_control_frames_rejected() {
        let err = ServerMessage::from_frame(&Message::Ping(vec![]));
        assert!(matches!(err, Err(ProtocolError::UnexpectedFrame)));
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId(0x2a).to_string(), "conn-000000000000002a");
    }
}
