use serde::Serialize;

use crate::reconnect::SessionPhase;
use crate::rotation::{connected_and_sorted, next_active_player_id};
use crate::types::{Game, Player};

/// Everything the presentation layer reads. Mutated only by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    pub game: Option<Game>,
    pub players: Vec<Player>,
    pub current_player_id: Option<String>,
    /// Remaining milliseconds of the running turn.
    pub timer_value: Option<u64>,
    pub loading: bool,
    pub phase: SessionPhase,
    /// Half the handshake round trip, when the ack arrived in time.
    pub message_delay_ms: Option<u64>,
}

impl AppState {
    pub fn connected_and_sorted_players(&self) -> Vec<Player> {
        connected_and_sorted(&self.players)
    }

    pub fn current_player(&self) -> Option<&Player> {
        let id = self.current_player_id.as_deref()?;
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_is_host(&self) -> bool {
        match (&self.current_player_id, &self.game) {
            (Some(me), Some(game)) => game.host_player_id.as_deref() == Some(me.as_str()),
            _ => false,
        }
    }

    pub fn player_is_active(&self) -> bool {
        match (&self.current_player_id, &self.game) {
            (Some(me), Some(game)) => game.active_player_id.as_deref() == Some(me.as_str()),
            _ => false,
        }
    }

    pub fn is_local_game(&self) -> bool {
        self.game.as_ref().is_some_and(Game::is_local)
    }

    pub fn active_player(&self) -> Option<&Player> {
        let id = self.game.as_ref()?.active_player_id.as_deref()?;
        self.players.iter().find(|p| p.id == id)
    }

    /// Whose turn follows the current one.
    pub fn next_player(&self) -> Option<Player> {
        let ordered = self.connected_and_sorted_players();
        let current = self.game.as_ref()?.active_player_id.as_deref();
        let next = next_active_player_id(current, &ordered)?;
        ordered.into_iter().find(|p| p.id == next)
    }

    /// Whether this client may end the running turn.
    pub fn can_end_turn(&self) -> bool {
        self.game.as_ref().is_some_and(Game::is_started)
            && (self.is_local_game() || self.player_is_active())
    }
}
