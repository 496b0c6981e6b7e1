//! Participant Side
//!
//! What a connected client runs: it mirrors replicated state, drives the
//! local player's per-frame input loop and reacts to the end of the match.

use tracing::{debug, info, warn};

use crate::game::appearance::MaterialSink;
use crate::game::building::{BlueprintId, BuildingCatalog, CellId};
use crate::game::state::PlayerId;
use crate::network::protocol::{ClientMessage, ConnectionId, ServerMessage};
use crate::network::replication::Mirror;

/// Local player hook invoked when the session goes away.
pub trait LocalPresence: Send {
    /// Leave the game locally (return to menu, release input, ...).
    fn leave_game(&mut self);
}

/// UI and input collaborator of the local player.
pub trait PlayerUi {
    /// Building chosen in the build menu.
    fn selected_building(&self) -> Option<BlueprintId>;
    /// Grid cell under the cursor.
    fn selected_cell(&self) -> Option<CellId>;
    /// Accept button pressed this frame.
    fn accept_pressed(&self) -> bool;
    /// Reject button pressed this frame.
    fn reject_pressed(&self) -> bool;
    /// Change the building selection.
    fn select_building(&mut self, blueprint: Option<BlueprintId>);
    /// Highlight a cell for this frame.
    fn highlight_cell(&mut self, cell: CellId);
    /// Show the meal counter.
    fn set_meal_amount(&mut self, meal: u32);
    /// Show the mana counter.
    fn set_mana_amount(&mut self, mana: u32);
}

/// How the match ended for this participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameResult {
    /// Opponent's stronghold fell.
    Won(String),
    /// Own stronghold fell.
    Lost(String),
}

/// A connected client.
pub struct Participant {
    mirror: Mirror,
    catalog: BuildingCatalog,
    presence: Box<dyn LocalPresence>,
    connection: Option<ConnectionId>,
    local_player: Option<PlayerId>,
    result: Option<GameResult>,
}

impl Participant {
    /// Create a participant with the building catalog it may place from.
    pub fn new(catalog: BuildingCatalog, presence: Box<dyn LocalPresence>) -> Self {
        Self {
            mirror: Mirror::new(),
            catalog,
            presence,
            connection: None,
            local_player: None,
            result: None,
        }
    }

    /// React to a message from the authority.
    pub fn handle_server_message(&mut self, message: ServerMessage, sink: &mut dyn MaterialSink) {
        match message {
            ServerMessage::Welcome { connection, server_version } => {
                debug!("Connected as {} (server {})", connection, server_version);
                self.connection = Some(connection);
            }
            ServerMessage::Waiting { pending, needed } => {
                debug!("Waiting for players ({}/{})", pending, needed);
            }
            ServerMessage::MatchStart(info) => {
                info!("Match {} started as player {}", info.match_id, info.you.raw());
                self.local_player = Some(info.you);
                self.result = None;
            }
            ServerMessage::Replicate(batch) => {
                self.mirror.apply_batch(&batch, sink);
            }
            ServerMessage::WonGame { description } => {
                info!("GAME FINISHED: {}", description);
                self.result = Some(GameResult::Won(description));
            }
            ServerMessage::LoseGame { description } => {
                info!("GAME FINISHED: {}", description);
                self.result = Some(GameResult::Lost(description));
            }
            ServerMessage::LeaveGame { reason } | ServerMessage::Shutdown { reason } => {
                info!("Session ended: {}", reason);
                self.on_disconnect();
            }
            ServerMessage::Pong { timestamp, server_time } => {
                debug!("Pong {} (server {})", timestamp, server_time);
            }
            ServerMessage::Error(error) => {
                warn!("Server error {:?}: {}", error.code, error.message);
            }
        }
    }

    /// Local teardown. Also called when the socket drops.
    pub fn on_disconnect(&mut self) {
        self.mirror.clear();
        self.connection = None;
        if self.local_player.take().is_some() {
            self.presence.leave_game();
        }
    }

    /// Per-frame local player loop.
    ///
    /// Returns a placement request when a selected building is affordable,
    /// a cell is selected and accept was pressed.
    pub fn update_local(&mut self, ui: &mut dyn PlayerUi) -> Option<ClientMessage> {
        let player = self.local_player?;
        let (meal, mana) = self
            .mirror
            .resources_of(player)
            .map(|r| (r.meal, r.mana))?;

        let mut request = None;
        if let Some(blueprint) = ui.selected_building() {
            let affordable = self.catalog.get(blueprint).is_some_and(|b| b.cost <= meal);
            if let (true, Some(cell)) = (affordable, ui.selected_cell()) {
                ui.highlight_cell(cell);
                if ui.accept_pressed() {
                    request = Some(ClientMessage::PlaceBuilding { cell, blueprint });
                }
            }
        }

        if ui.reject_pressed() {
            ui.select_building(None);
        }

        ui.set_meal_amount(meal);
        ui.set_mana_amount(mana);
        request
    }

    /// Read access to the mirror.
    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    /// Local player, while a match is active.
    pub fn local_player(&self) -> Option<PlayerId> {
        self.local_player
    }

    /// Connection identity assigned by the server.
    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    /// Match result, once decided.
    pub fn result(&self) -> Option<&GameResult> {
        self.result.as_ref()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;
    use crate::game::appearance::NullSink;
    use crate::game::map::DuelMap;
    use crate::network::protocol::InputModality;
    use crate::network::session::{DeclaredModality, MatchSession, SessionConfig};

    #[derive(Clone, Default)]
    struct CountingPresence(Arc<AtomicUsize>);

    impl LocalPresence for CountingPresence {
        fn leave_game(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeUi {
        building: Option<BlueprintId>,
        cell: Option<CellId>,
        accept: bool,
        reject: bool,
        highlighted: Vec<CellId>,
        meal: Option<u32>,
        mana: Option<u32>,
    }

    impl PlayerUi for FakeUi {
        fn selected_building(&self) -> Option<BlueprintId> {
            self.building
        }
        fn selected_cell(&self) -> Option<CellId> {
            self.cell
        }
        fn accept_pressed(&self) -> bool {
            self.accept
        }
        fn reject_pressed(&self) -> bool {
            self.reject
        }
        fn select_building(&mut self, blueprint: Option<BlueprintId>) {
            self.building = blueprint;
        }
        fn highlight_cell(&mut self, cell: CellId) {
            self.highlighted.push(cell);
        }
        fn set_meal_amount(&mut self, meal: u32) {
            self.meal = Some(meal);
        }
        fn set_mana_amount(&mut self, mana: u32) {
            self.mana = Some(mana);
        }
    }

    const A: ConnectionId = ConnectionId(10);
    const B: ConnectionId = ConnectionId(20);

    /// Running session plus one participant per connection, fully synced.
    fn synced() -> (MatchSession, Participant, Participant, CountingPresence, CountingPresence) {
        let config = SessionConfig {
            rng_seed: Some(11),
            ..Default::default()
        };
        let mut session = MatchSession::new(Uuid::new_v4(), config, &DuelMap::default(), Box::new(DeclaredModality));
        session.add_player(A, 0, InputModality::Default).unwrap();
        session.add_player(B, 0, InputModality::Default).unwrap();

        let presence_a = CountingPresence::default();
        let presence_b = CountingPresence::default();
        let mut pa = Participant::new(BuildingCatalog::default(), Box::new(presence_a.clone()));
        let mut pb = Participant::new(BuildingCatalog::default(), Box::new(presence_b.clone()));
        deliver(&mut session, &mut pa, &mut pb);

        (session, pa, pb, presence_a, presence_b)
    }

    fn deliver(session: &mut MatchSession, pa: &mut Participant, pb: &mut Participant) {
        for (connection, message) in session.drain_outbox() {
            let target = if connection == A { &mut *pa } else { &mut *pb };
            target.handle_server_message(message, &mut NullSink);
        }
    }

    #[test]
    fn test_match_start_binds_local_player() {
        let (session, pa, pb, _, _) = synced();
        assert_eq!(pa.local_player(), session.player_for(A));
        assert_eq!(pb.local_player(), session.player_for(B));
        assert_eq!(pa.mirror().compute_hash(), session.game().compute_hash());
    }

    #[test]
    fn test_opponent_disconnect_leaves_game() {
        let (mut session, mut pa, mut pb, presence_a, presence_b) = synced();

        session.disconnect(B);
        pb.on_disconnect();
        deliver(&mut session, &mut pa, &mut pb);

        assert_eq!(presence_a.0.load(Ordering::SeqCst), 1);
        assert_eq!(presence_b.0.load(Ordering::SeqCst), 1);
        assert!(pa.mirror().is_empty());
        assert!(pa.local_player().is_none());

        // Local teardown runs once
        pa.on_disconnect();
        assert_eq!(presence_a.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disconnect_before_match_skips_hook() {
        let presence = CountingPresence::default();
        let mut participant = Participant::new(BuildingCatalog::default(), Box::new(presence.clone()));
        participant.on_disconnect();
        assert_eq!(presence.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_update_local_places_affordable_building() {
        let (mut session, mut pa, mut pb, _, _) = synced();
        let mut ui = FakeUi {
            building: Some(BlueprintId(1)),
            cell: Some(CellId(9)),
            accept: true,
            ..Default::default()
        };

        let request = pa.update_local(&mut ui).unwrap();
        assert_eq!(request, ClientMessage::PlaceBuilding { cell: CellId(9), blueprint: BlueprintId(1) });
        assert_eq!(ui.highlighted, vec![CellId(9)]);
        assert_eq!(ui.meal, Some(100));
        assert_eq!(ui.mana, Some(50));

        session.handle_command(A, request);
        deliver(&mut session, &mut pa, &mut pb);

        let mut ui = FakeUi::default();
        assert!(pa.update_local(&mut ui).is_none());
        assert_eq!(ui.meal, Some(60));
        assert_eq!(pb.mirror().compute_hash(), session.game().compute_hash());
    }

    #[test]
    fn test_update_local_skips_unaffordable() {
        let (_session, mut pa, _pb, _, _) = synced();
        let mut catalog = BuildingCatalog::empty();
        catalog.insert(crate::game::building::Blueprint {
            id: BlueprintId(7),
            name: "Castle".to_string(),
            cost: 500,
            health: 100,
            child_visuals: 0,
        });
        pa.catalog = catalog;

        let mut ui = FakeUi {
            building: Some(BlueprintId(7)),
            cell: Some(CellId(1)),
            accept: true,
            ..Default::default()
        };
        assert!(pa.update_local(&mut ui).is_none());
        assert!(ui.highlighted.is_empty());
    }

    #[test]
    fn test_update_local_reject_deselects() {
        let (_session, mut pa, _pb, _, _) = synced();
        let mut ui = FakeUi {
            building: Some(BlueprintId(1)),
            reject: true,
            ..Default::default()
        };
        assert!(pa.update_local(&mut ui).is_none());
        assert_eq!(ui.building, None);
    }

    #[test]
    fn test_results_reach_both_sides() {
        let (mut session, mut pa, mut pb, _, _) = synced();
        let castle = session.game().units_of(pb.local_player().unwrap()).next().unwrap();

        session.apply_damage(castle, 10_000);
        deliver(&mut session, &mut pa, &mut pb);

        assert!(matches!(pa.result(), Some(GameResult::Won(_))));
        assert!(matches!(pb.result(), Some(GameResult::Lost(_))));
        assert!(pa.mirror().unit(castle).is_none());
        assert_eq!(pa.mirror().decided().map(|(_, loser)| loser), pb.local_player());
    }
}
