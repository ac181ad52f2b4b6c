//! Turn order: who goes next, and how positions are rewritten on reorder.

use crate::types::Player;

/// Connected players in turn order.
pub fn connected_and_sorted(players: &[Player]) -> Vec<Player> {
    let mut connected: Vec<Player> = players.iter().filter(|p| p.connected).cloned().collect();
    connected.sort_by_key(|p| p.position);
    connected
}

/// Picks the player whose turn follows `current`.
///
/// A missing or unknown `current` restarts from the top of the order, so a
/// turn can never get stuck on a player who has left.
pub fn next_active_player_id(current: Option<&str>, ordered: &[Player]) -> Option<String> {
    let first = ordered.first()?;
    let Some(current) = current else {
        return Some(first.id.clone());
    };

    match ordered.iter().position(|p| p.id == current) {
        Some(index) if index + 1 < ordered.len() => Some(ordered[index + 1].id.clone()),
        _ => Some(first.id.clone()),
    }
}

/// Rewrites `position` so every listed player sits at its index in `order`.
///
/// Unknown and disconnected ids in `order` are skipped, so a stale order never
/// leaves a gap among connected positions. Connected players missing from
/// `order` keep their relative order after the listed ones; disconnected
/// players are left untouched.
pub fn apply_reorder(players: &[Player], order: &[String]) -> Vec<Player> {
    let mut listed: Vec<&String> = Vec::with_capacity(order.len());
    for id in order {
        if players.iter().any(|p| &p.id == id && p.connected) && !listed.contains(&id) {
            listed.push(id);
        }
    }

    let mut trailing: Vec<&Player> = players
        .iter()
        .filter(|p| p.connected && !listed.contains(&&p.id))
        .collect();
    trailing.sort_by_key(|p| p.position);

    let mut next = players.to_vec();
    for player in next.iter_mut() {
        if let Some(index) = listed.iter().position(|id| **id == player.id) {
            player.position = index as u32;
        } else if let Some(index) = trailing.iter().position(|p| p.id == player.id) {
            player.position = (listed.len() + index) as u32;
        }
    }
    next
}

/// Renumbers connected players `0..n` in their current order.
pub fn close_position_gaps(players: &[Player]) -> Vec<Player> {
    let order: Vec<String> = connected_and_sorted(players)
        .into_iter()
        .map(|p| p.id)
        .collect();
    apply_reorder(players, &order)
}

/// Moves one entry of a drag-and-drop list, clamping both indices.
pub fn move_item<T>(items: &mut Vec<T>, from: usize, to: usize) {
    if items.is_empty() {
        return;
    }
    let from = from.min(items.len() - 1);
    let to = to.min(items.len() - 1);
    let item = items.remove(from);
    items.insert(to, item);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn player(id: &str, position: u32, connected: bool) -> Player {
        Player {
            id: id.to_string(),
            name: id.to_uppercase(),
            color: "#F34141".to_string(),
            game_id: "g".to_string(),
            position,
            connected,
            created_at: Utc::now(),
        }
    }

    fn ids(players: &[Player]) -> Vec<&str> {
        players.iter().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn empty_roster_has_no_active_player() {
        assert_eq!(next_active_player_id(None, &[]), None);
        assert_eq!(next_active_player_id(Some("a"), &[]), None);
    }

    #[test]
    fn first_turn_goes_to_lowest_position() {
        let ordered = vec![player("a", 0, true), player("b", 1, true)];
        assert_eq!(next_active_player_id(None, &ordered).as_deref(), Some("a"));
    }

    #[test]
    fn rotation_advances_and_wraps() {
        let ordered = vec![player("a", 0, true), player("b", 1, true), player("c", 2, true)];
        assert_eq!(next_active_player_id(Some("a"), &ordered).as_deref(), Some("b"));
        assert_eq!(next_active_player_id(Some("b"), &ordered).as_deref(), Some("c"));
        assert_eq!(next_active_player_id(Some("c"), &ordered).as_deref(), Some("a"));
    }

    #[test]
    fn departed_active_player_restarts_rotation() {
        let ordered = vec![player("a", 0, true), player("b", 1, true)];
        assert_eq!(next_active_player_id(Some("gone"), &ordered).as_deref(), Some("a"));
    }

    #[test]
    fn result_is_always_a_member() {
        let ordered = vec![player("a", 0, true), player("b", 1, true), player("c", 2, true)];
        for current in [None, Some("a"), Some("b"), Some("c"), Some("zzz")] {
            let next = next_active_player_id(current, &ordered).unwrap();
            assert!(ordered.iter().any(|p| p.id == next));
        }
    }

    #[test]
    fn connected_and_sorted_filters_and_orders() {
        let players = vec![player("c", 2, true), player("x", 0, false), player("a", 0, true)];
        assert_eq!(ids(&connected_and_sorted(&players)), vec!["a", "c"]);
    }

    #[test]
    fn reorder_assigns_index_positions() {
        let players = vec![player("a", 0, true), player("b", 1, true), player("c", 2, true)];
        let order = vec!["c".to_string(), "a".to_string(), "b".to_string()];
        let reordered = apply_reorder(&players, &order);
        let positions: Vec<(&str, u32)> =
            reordered.iter().map(|p| (p.id.as_str(), p.position)).collect();
        assert_eq!(positions, vec![("a", 1), ("b", 2), ("c", 0)]);
    }

    #[test]
    fn reorder_keeps_unlisted_players_dense() {
        let players = vec![
            player("a", 0, true),
            player("b", 1, true),
            player("c", 2, true),
            player("gone", 7, false),
        ];
        let order = vec!["b".to_string(), "nobody".to_string()];
        let reordered = apply_reorder(&players, &order);
        let sorted = connected_and_sorted(&reordered);
        assert_eq!(ids(&sorted), vec!["b", "a", "c"]);
        assert_eq!(sorted.iter().map(|p| p.position).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(reordered[3].position, 7);
    }

    #[test]
    fn stale_order_skips_players_who_dropped() {
        let players = vec![player("a", 0, true), player("b", 4, false), player("c", 1, true)];
        let order = vec!["c".to_string(), "b".to_string(), "a".to_string()];
        let reordered = apply_reorder(&players, &order);

        let sorted = connected_and_sorted(&reordered);
        let positions: Vec<(&str, u32)> =
            sorted.iter().map(|p| (p.id.as_str(), p.position)).collect();
        assert_eq!(positions, vec![("c", 0), ("a", 1)]);
        assert_eq!(reordered[1].position, 4);
    }

    #[test]
    fn gaps_close_after_removal() {
        let players = vec![player("a", 0, true), player("c", 2, true), player("d", 5, true)];
        let closed = close_position_gaps(&players);
        assert_eq!(closed.iter().map(|p| p.position).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn move_item_matches_drag_and_drop() {
        let mut order = vec!["a", "b", "c", "d"];
        move_item(&mut order, 3, 0);
        assert_eq!(order, vec!["d", "a", "b", "c"]);
        move_item(&mut order, 0, 10);
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }
}
