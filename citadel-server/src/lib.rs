//! # Citadel Match Server
//!
//! Authoritative session core for two-player Citadel matches.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      CITADEL SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/             - Deterministic primitives                │
//! │  ├── rng.rs        - Xorshift128+ PRNG for the side shuffle  │
//! │  └── hash.rs       - Snapshot hashing                        │
//! │                                                              │
//! │  game/             - Match rules (authoritative)             │
//! │  ├── state.rs      - Arena of units, players, resources      │
//! │  ├── ownership.rs  - Player/unit ownership registry          │
//! │  ├── lifecycle.rs  - Damage, healing, death                  │
//! │  ├── appearance.rs - Team color and highlight fan-out        │
//! │  ├── building.rs   - Building catalog and placement          │
//! │  ├── map.rs        - Spawn layout                            │
//! │  └── events.rs     - Canonical state changes                 │
//! │                                                              │
//! │  network/          - Networking                              │
//! │  ├── protocol.rs   - Message types and frames                │
//! │  ├── session.rs    - Pairing, launch, teardown               │
//! │  ├── replication.rs- Sequenced updates and observer mirror   │
//! │  ├── participant.rs- Client-side loop                        │
//! │  └── server.rs     - WebSocket server                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority
//!
//! Only the session mutates `MatchState`. Every mutation leaves a
//! `GameEvent` behind; the replicator numbers them per entity and every
//! observer applies them in that order to its `Mirror`. After each batch the
//! mirror hash equals the authority hash.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::rng::DeterministicRng;
pub use game::state::{MatchState, MatchConfig, PlayerId, UnitId};
pub use game::ownership::OwnershipRegistry;
pub use network::session::{MatchSession, SessionConfig};
pub use network::server::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
