//! Network Layer
//!
//! WebSocket server for the two connections of a match, the session that
//! pairs them, and the replication plumbing between authority and observers.
//! Match rules live in `game/`; this layer only routes and delivers.

pub mod protocol;
pub mod replication;
pub mod session;
pub mod participant;
pub mod server;

pub use protocol::{
    ClientMessage, ServerMessage, ConnectionId, InputModality, ReplicationBatch, ReplicationUpdate,
};
pub use replication::{Mirror, MirrorError, Replicator};
pub use session::{
    DeclaredModality, InputModalityResolver, LaunchError, MatchSession, SessionConfig, SessionId,
    SessionState,
};
pub use participant::{GameResult, LocalPresence, Participant, PlayerUi};
pub use server::{GameServer, ServerConfig, GameServerError};
