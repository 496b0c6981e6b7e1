//! Match Session Management
//!
//! Pairs exactly two connections, launches the match, routes their commands
//! into the authoritative state and tears everything down when one of them
//! goes away.
//!
//! The session never touches a socket. Every message it wants delivered is
//! appended to an ordered outbox of `(ConnectionId, ServerMessage)` pairs,
//! which the server drains while still holding the session lock.

use std::collections::BTreeMap;
use chrono::Utc;
use rand::RngCore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::rng::{derive_match_seed, DeterministicRng};
use crate::game::appearance::ColorId;
use crate::game::building::place_building;
use crate::game::lifecycle::{self, DamageOutcome};
use crate::game::map::{SpawnLayout, SpawnPoint};
use crate::game::state::{MatchConfig, MatchState, PlayerId, PlayerVariant, UnitId, UnitKind};
use crate::network::protocol::{
    ClientMessage, ConnectionId, InitialPlayerInfo, InputModality, MatchStartInfo, ServerMessage,
};
use crate::network::replication::Replicator;

/// Connections needed to launch a match.
pub const PLAYERS_PER_MATCH: usize = 2;

/// Unique session identifier.
pub type SessionId = Uuid;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Buffering join requests.
    WaitingForPlayers,
    /// Launch sequence in progress.
    Starting,
    /// Match in progress.
    Running,
    /// Match decided, connections still open.
    Ending,
    /// Torn down. Terminal.
    Closed,
}

/// A join request waiting to be paired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingConnection {
    /// Network identity.
    pub connection: ConnectionId,
    /// Local controller slot.
    pub controller_slot: u8,
    /// Declared input modality.
    pub modality: InputModality,
}

/// Chooses the player entity variant for a connection.
pub trait InputModalityResolver: Send + Sync {
    /// Variant to spawn for this connection.
    fn resolve(&self, pending: &PendingConnection) -> PlayerVariant;
}

/// Trusts the modality the client declared.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclaredModality;

impl InputModalityResolver for DeclaredModality {
    fn resolve(&self, pending: &PendingConnection) -> PlayerVariant {
        match pending.modality {
            InputModality::Default => PlayerVariant::Standard,
            InputModality::Alternate => PlayerVariant::AlternateInput,
        }
    }
}

/// Configuration for a match session.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Fixed launch seed. Drawn from fresh entropy when `None`.
    pub rng_seed: Option<u64>,
    /// Match rules.
    pub match_config: MatchConfig,
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Session no longer takes join requests.
    #[error("Session is not accepting players")]
    NotAccepting,

    /// Connection already joined.
    #[error("Connection {0} already joined")]
    AlreadyJoined(ConnectionId),
}

/// Launch aborts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LaunchError {
    /// Spawn layout does not have exactly two points.
    #[error("Spawn layout has {0} points, need 2")]
    SpawnPointCount(usize),

    /// Pending list does not have exactly two entries.
    #[error("{0} pending connections, need 2")]
    PendingCount(usize),
}

/// A match session.
pub struct MatchSession {
    id: SessionId,
    state: SessionState,
    config: SessionConfig,
    spawn_points: Vec<SpawnPoint>,
    /// Stronghold per spawn point, same order.
    strongholds: Vec<UnitId>,
    resolver: Box<dyn InputModalityResolver>,
    pending: Vec<PendingConnection>,
    bindings: BTreeMap<ConnectionId, PlayerId>,
    game: MatchState,
    replicator: Replicator,
    outbox: Vec<(ConnectionId, ServerMessage)>,
    result_sent: bool,
}

impl MatchSession {
    /// Create a new session and load the map.
    ///
    /// Strongholds are spawned unowned right away. Their events are held
    /// until the first flush after launch.
    pub fn new(
        id: SessionId,
        config: SessionConfig,
        layout: &dyn SpawnLayout,
        resolver: Box<dyn InputModalityResolver>,
    ) -> Self {
        let spawn_points = layout.spawn_points();
        if spawn_points.len() != PLAYERS_PER_MATCH {
            error!(
                "Session {}: spawn layout has {} points, matches cannot launch",
                id,
                spawn_points.len()
            );
        }

        let mut game = MatchState::new(*id.as_bytes(), config.match_config.clone());
        let strongholds = spawn_points
            .iter()
            .map(|point| {
                let template = point.stronghold;
                game.spawn_unit(UnitKind::Stronghold, template.cost, template.health, template.child_visuals)
            })
            .collect();

        Self {
            id,
            state: SessionState::WaitingForPlayers,
            config,
            spawn_points,
            strongholds,
            resolver,
            pending: Vec::new(),
            bindings: BTreeMap::new(),
            game,
            replicator: Replicator::new(),
            outbox: Vec::new(),
            result_sent: false,
        }
    }

    // -------------------------------------------------------------------------
    // Pairing
    // -------------------------------------------------------------------------

    /// Buffer a join request. Launches the match on the second one.
    pub fn add_player(
        &mut self,
        connection: ConnectionId,
        controller_slot: u8,
        modality: InputModality,
    ) -> Result<(), SessionError> {
        if !self.is_accepting() {
            return Err(SessionError::NotAccepting);
        }
        if self.pending.iter().any(|p| p.connection == connection) {
            return Err(SessionError::AlreadyJoined(connection));
        }

        self.pending.push(PendingConnection {
            connection,
            controller_slot,
            modality,
        });
        info!("Session {}: {} joined ({}/{})", self.id, connection, self.pending.len(), PLAYERS_PER_MATCH);

        if self.pending.len() == PLAYERS_PER_MATCH {
            if let Err(e) = self.launch() {
                error!("Session {}: launch aborted: {}", self.id, e);
            }
        }

        if self.state == SessionState::WaitingForPlayers {
            self.send(connection, ServerMessage::Waiting {
                pending: self.pending.len(),
                needed: PLAYERS_PER_MATCH,
            });
        }

        Ok(())
    }

    /// Run the launch sequence over the pending connections.
    ///
    /// Count checks are the only failure points and run before anything
    /// is mutated, so an abort leaves the session untouched.
    pub fn launch(&mut self) -> Result<(), LaunchError> {
        if self.spawn_points.len() != PLAYERS_PER_MATCH {
            return Err(LaunchError::SpawnPointCount(self.spawn_points.len()));
        }
        if self.pending.len() != PLAYERS_PER_MATCH {
            return Err(LaunchError::PendingCount(self.pending.len()));
        }

        self.state = SessionState::Starting;
        let seed = self.launch_seed();
        debug!("Session {}: launch seed {:016x}", self.id, seed);

        // Sides are random, geography is fixed by layout order
        let mut rng = DeterministicRng::new(seed);
        let mut shuffled = std::mem::take(&mut self.pending);
        rng.shuffle(&mut shuffled);

        let points = self.spawn_points.clone();
        let mut players = Vec::with_capacity(PLAYERS_PER_MATCH);
        for (index, (point, pending)) in points.iter().zip(&shuffled).enumerate() {
            let variant = self.resolver.resolve(pending);
            let player = self.game.spawn_equipped_player(variant, index, point.pose);
            self.bindings.insert(pending.connection, player);
            players.push(player);
        }

        for (point, player) in points.iter().zip(&players) {
            self.game.set_player_color(*player, point.color);
        }

        for (stronghold, player) in self.strongholds.clone().into_iter().zip(&players) {
            self.game.transfer_owner(stronghold, Some(*player));
        }

        self.state = SessionState::Running;
        info!("Session {}: match running", self.id);

        let roster: Vec<InitialPlayerInfo> = players
            .iter()
            .filter_map(|id| self.game.player(*id))
            .map(|p| InitialPlayerInfo {
                player: p.id,
                spawn_index: p.spawn_index,
                color: p.color,
                variant: p.variant,
            })
            .collect();
        let started_at = Utc::now();
        let bound: Vec<(ConnectionId, PlayerId)> = self.bindings.iter().map(|(c, p)| (*c, *p)).collect();
        for (connection, player) in bound {
            self.send(connection, ServerMessage::MatchStart(MatchStartInfo {
                match_id: self.id,
                you: player,
                started_at,
                players: roster.clone(),
            }));
        }

        self.flush();
        Ok(())
    }

    fn launch_seed(&self) -> u64 {
        if let Some(seed) = self.config.rng_seed {
            return seed;
        }

        let mut entropy = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut entropy);
        let mut ids: Vec<u64> = self.pending.iter().map(|p| p.connection.0).collect();
        ids.sort_unstable();
        derive_match_seed(&entropy, self.id.as_bytes(), &ids)
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    /// Route a client message.
    pub fn handle_command(&mut self, connection: ConnectionId, message: ClientMessage) {
        match message {
            ClientMessage::Join { controller_slot, modality } => {
                if let Err(e) = self.add_player(connection, controller_slot, modality) {
                    debug!("Session {}: ignored join from {}: {}", self.id, connection, e);
                }
            }

            ClientMessage::PlaceBuilding { cell, blueprint } => {
                if self.state != SessionState::Running {
                    debug!("Session {}: ignored placement outside a running match", self.id);
                    return;
                }
                let Some(player) = self.player_for(connection) else {
                    debug!("Session {}: ignored placement from unbound {}", self.id, connection);
                    return;
                };
                match place_building(&mut self.game, player, cell, blueprint) {
                    Ok(_) => self.flush(),
                    Err(e) => debug!("Session {}: placement rejected: {}", self.id, e),
                }
            }

            ClientMessage::Leave => self.disconnect(connection),

            ClientMessage::Ping { timestamp } => {
                self.send(connection, ServerMessage::Pong {
                    timestamp,
                    server_time: Utc::now().timestamp_millis().max(0) as u64,
                });
            }
        }
    }

    // -------------------------------------------------------------------------
    // Authority gameplay hooks
    // -------------------------------------------------------------------------

    /// Spawn a unit, optionally owned, and replicate it.
    pub fn spawn_unit(
        &mut self,
        kind: UnitKind,
        cost: u32,
        health: i32,
        child_visuals: u16,
        owner: Option<PlayerId>,
    ) -> UnitId {
        let unit = self.game.spawn_unit(kind, cost, health, child_visuals);
        self.game.attach(unit, owner);
        self.flush();
        unit
    }

    /// Apply damage and replicate the result.
    pub fn apply_damage(&mut self, unit: UnitId, amount: i32) -> DamageOutcome {
        let outcome = lifecycle::apply_damage(&mut self.game, unit, amount);
        self.after_change();
        outcome
    }

    /// Heal a unit and replicate the result.
    pub fn apply_heal(&mut self, unit: UnitId, amount: i32) -> DamageOutcome {
        let outcome = lifecycle::apply_heal(&mut self.game, unit, amount);
        self.after_change();
        outcome
    }

    /// Set a unit's highlight and replicate it.
    pub fn set_highlighted(&mut self, unit: UnitId, highlighted: bool) -> bool {
        let found = self.game.set_highlighted(unit, highlighted);
        self.flush();
        found
    }

    /// Set a unit's color and replicate it.
    pub fn set_unit_color(&mut self, unit: UnitId, color: ColorId) -> bool {
        let found = self.game.set_unit_color(unit, color);
        self.flush();
        found
    }

    /// Hand a unit to another player and replicate it.
    pub fn transfer_owner(&mut self, unit: UnitId, player: Option<PlayerId>) -> bool {
        let moved = self.game.transfer_owner(unit, player);
        self.flush();
        moved
    }

    fn after_change(&mut self) {
        self.flush();

        if self.result_sent {
            return;
        }
        let Some(outcome) = self.game.outcome().cloned() else {
            return;
        };
        self.result_sent = true;

        for (connection, player) in self.bound_connections() {
            if Some(player) == outcome.winner {
                self.send(connection, ServerMessage::WonGame {
                    description: outcome.won_description.clone(),
                });
            } else if player == outcome.loser {
                self.send(connection, ServerMessage::LoseGame {
                    description: outcome.lost_description.clone(),
                });
            }
        }

        if self.state == SessionState::Running {
            self.state = SessionState::Ending;
        }
        info!("Session {}: match decided, player {} lost", self.id, outcome.loser.raw());
    }

    /// Publish pending changes to every bound connection.
    ///
    /// Nothing is published while no connection is bound; the events stay
    /// queued for the first flush after launch.
    fn flush(&mut self) {
        if self.bindings.is_empty() {
            return;
        }

        let hash = self.game.compute_hash();
        let Some(batch) = self.replicator.publish(self.game.take_events(), hash) else {
            return;
        };
        for connection in self.bindings.keys().copied().collect::<Vec<_>>() {
            self.send(connection, ServerMessage::Replicate(batch.clone()));
        }
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    /// Handle a connection going away.
    ///
    /// A pending connection is simply dropped. A bound one ends the match.
    pub fn disconnect(&mut self, connection: ConnectionId) {
        if let Some(index) = self.pending.iter().position(|p| p.connection == connection) {
            self.pending.remove(index);
            info!("Session {}: pending {} left before launch", self.id, connection);
            return;
        }

        if self.bindings.remove(&connection).is_some() {
            info!("Session {}: {} disconnected, tearing down", self.id, connection);
            self.teardown("Opponent disconnected");
        }
    }

    /// End the match for everyone still connected. Terminal.
    pub fn teardown(&mut self, reason: &str) {
        if self.state == SessionState::Closed {
            return;
        }

        self.pending.clear();

        let players: Vec<PlayerId> = self.game.players().map(|p| p.id).collect();
        for player in players {
            self.game.remove_player(player);
        }
        // Observers drop their mirrors on LeaveGame
        let dropped = self.game.take_events().len();
        debug!("Session {}: dropped {} teardown events", self.id, dropped);

        for connection in std::mem::take(&mut self.bindings).into_keys() {
            self.send(connection, ServerMessage::LeaveGame {
                reason: reason.to_string(),
            });
        }

        if !self.game.ownership().is_consistent() {
            warn!("Session {}: ownership registry inconsistent after teardown", self.id);
        }

        self.state = SessionState::Closed;
        info!("Session {}: closed", self.id);
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Take every queued message, in order.
    pub fn drain_outbox(&mut self) -> Vec<(ConnectionId, ServerMessage)> {
        std::mem::take(&mut self.outbox)
    }

    fn send(&mut self, connection: ConnectionId, message: ServerMessage) {
        self.outbox.push((connection, message));
    }

    fn bound_connections(&self) -> Vec<(ConnectionId, PlayerId)> {
        self.bindings.iter().map(|(c, p)| (*c, *p)).collect()
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Does the session take join requests?
    pub fn is_accepting(&self) -> bool {
        self.state == SessionState::WaitingForPlayers
    }

    /// Has the session been torn down?
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Player bound to a connection.
    pub fn player_for(&self, connection: ConnectionId) -> Option<PlayerId> {
        self.bindings.get(&connection).copied()
    }

    /// Number of buffered join requests.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Stronghold standing at a spawn point.
    pub fn stronghold(&self, spawn_index: usize) -> Option<UnitId> {
        self.strongholds.get(spawn_index).copied()
    }

    /// Read access to the authoritative state.
    pub fn game(&self) -> &MatchState {
        &self.game
    }
}

// =============================================================================
// TESTS
// =============================================================================
