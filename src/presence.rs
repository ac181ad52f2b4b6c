//! Host and active-player hand-off when someone leaves or drops.

use crate::rotation::{close_position_gaps, connected_and_sorted, next_active_player_id};
use crate::types::{Game, GameUpdate, Player};

/// What a game and its roster look like once a player is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Roster with positions renumbered among the remaining connected players.
    pub players: Vec<Player>,
    pub host_player_id: Option<String>,
    pub active_player_id: Option<String>,
    pub host_changed: bool,
    pub active_changed: bool,
}

impl Reconciliation {
    /// Game fields that must be written back for the hand-off.
    pub fn game_update(&self) -> GameUpdate {
        GameUpdate {
            host_player_id: self.host_changed.then(|| self.host_player_id.clone()),
            active_player_id: self.active_changed.then(|| self.active_player_id.clone()),
            ..GameUpdate::default()
        }
    }
}

/// Reconciles `game` after `departing` leaves (`removed`) or disconnects.
///
/// Host passes to the remaining connected player with the lowest position.
/// An active departing player hands the turn to whoever follows them.
pub fn reconcile_departure(
    game: &Game,
    players: &[Player],
    departing: &str,
    removed: bool,
) -> Reconciliation {
    let before = connected_and_sorted(players);

    let remaining: Vec<Player> = players
        .iter()
        .filter(|p| !(removed && p.id == departing))
        .cloned()
        .map(|mut p| {
            if p.id == departing {
                p.connected = false;
            }
            p
        })
        .collect();
    let remaining = close_position_gaps(&remaining);
    let ordered = connected_and_sorted(&remaining);

    let mut host_player_id = game.host_player_id.clone();
    let host_changed = game.host_player_id.as_deref() == Some(departing);
    if host_changed {
        host_player_id = ordered.first().map(|p| p.id.clone());
    }

    let mut active_player_id = game.active_player_id.clone();
    let active_changed = game.active_player_id.as_deref() == Some(departing);
    if active_changed {
        active_player_id = next_active_player_id(Some(departing), &before)
            .filter(|next| next != departing && ordered.iter().any(|p| &p.id == next))
            .or_else(|| ordered.first().map(|p| p.id.clone()));
    }

    Reconciliation {
        players: remaining,
        host_player_id,
        active_player_id,
        host_changed,
        active_changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GameStatus;
    use chrono::Utc;

    fn player(id: &str, position: u32) -> Player {
        Player {
            id: id.to_string(),
            name: id.to_string(),
            color: "#4188F3".to_string(),
            game_id: "g".to_string(),
            position,
            connected: true,
            created_at: Utc::now(),
        }
    }

    fn game(host: &str, active: Option<&str>) -> Game {
        Game {
            id: "g".into(),
            name: "Test".into(),
            turn_length: 30_000,
            join_code: "ABCD".into(),
            status: GameStatus::Active,
            paused: false,
            host_player_id: Some(host.into()),
            active_player_id: active.map(Into::into),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn host_moves_to_lowest_remaining_position() {
        let players = vec![player("a", 0), player("b", 1), player("c", 2)];
        let outcome = reconcile_departure(&game("a", None), &players, "a", true);
        assert!(outcome.host_changed);
        assert_eq!(outcome.host_player_id.as_deref(), Some("b"));
        assert_eq!(outcome.players.len(), 2);
        assert_eq!(outcome.players[0].position, 0);
        assert_eq!(outcome.players[1].position, 1);
    }

    #[test]
    fn active_departure_passes_turn_to_next() {
        let players = vec![player("a", 0), player("b", 1), player("c", 2)];
        let outcome = reconcile_departure(&game("a", Some("b")), &players, "b", false);
        assert!(!outcome.host_changed);
        assert!(outcome.active_changed);
        assert_eq!(outcome.active_player_id.as_deref(), Some("c"));
        let dropped = outcome.players.iter().find(|p| p.id == "b").unwrap();
        assert!(!dropped.connected);

        let update = outcome.game_update();
        assert_eq!(update.active_player_id, Some(Some("c".to_string())));
        assert_eq!(update.host_player_id, None);
    }

    #[test]
    fn last_active_player_wraps_to_first() {
        let players = vec![player("a", 0), player("b", 1)];
        let outcome = reconcile_departure(&game("a", Some("b")), &players, "b", true);
        assert_eq!(outcome.active_player_id.as_deref(), Some("a"));
    }

    #[test]
    fn sole_player_leaving_clears_host_and_turn() {
        let players = vec![player("a", 0)];
        let outcome = reconcile_departure(&game("a", Some("a")), &players, "a", true);
        assert_eq!(outcome.host_player_id, None);
        assert_eq!(outcome.active_player_id, None);
        assert_eq!(
            outcome.game_update(),
            GameUpdate {
                host_player_id: Some(None),
                active_player_id: Some(None),
                ..GameUpdate::default()
            }
        );
    }

    #[test]
    fn bystander_departure_changes_nothing_but_positions() {
        let players = vec![player("a", 0), player("b", 1), player("c", 2)];
        let outcome = reconcile_departure(&game("a", Some("c")), &players, "b", true);
        assert!(outcome.game_update().is_empty());
        let c = outcome.players.iter().find(|p| p.id == "c").unwrap();
        assert_eq!(c.position, 1);
    }
}
