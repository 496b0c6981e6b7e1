//! Citadel Match Server
//!
//! Hosts one authoritative two-player match over WebSocket and exits once
//! the match has been torn down.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

use citadel::{
    VERSION,
    game::map::{DuelMap, SpawnLayout},
    network::{
        server::{GameServer, ServerConfig},
        session::{DeclaredModality, MatchSession, SessionConfig},
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let config = ServerConfig::from_env()?;
    let map = DuelMap::default();
    let session_id = Uuid::new_v4();

    info!("Citadel Server v{}", VERSION);
    info!("Session: {}", hex::encode(&session_id.as_bytes()[..4]));
    info!("Spawn points: {}", map.spawn_points().len());
    info!("Max connections: {}", config.max_connections);

    let session = MatchSession::new(
        session_id,
        SessionConfig::default(),
        &map,
        Box::new(DeclaredModality),
    );
    let server = GameServer::new(config, session);

    tokio::select! {
        result = server.run() => {
            result.context("Server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            server.shutdown();
        }
    }

    info!("Server stopped");
    Ok(())
}
