use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use uuid::Uuid;

use crate::error::StoreError;
use crate::presence::reconcile_departure;
use crate::rotation::apply_reorder;
use crate::store::RemoteStore;
use crate::types::*;

const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

fn create_join_code() -> String {
    let mut rng = rand::rng();
    (0..JOIN_CODE_LEN)
        .map(|_| char::from(JOIN_CODE_ALPHABET[rng.random_range(0..JOIN_CODE_ALPHABET.len())]))
        .collect()
}

/// In-process game/player registry.
///
/// Deleting or disconnecting a player closes position gaps and hands off
/// host and turn, so every client that re-fetches sees the same roster.
pub struct MemoryStore {
    /// game_id -> game
    games: DashMap<String, Game>,
    /// player_id -> player
    players: DashMap<String, Player>,
    /// join_code -> game_id
    join_codes: DashMap<String, String>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            games: DashMap::new(),
            players: DashMap::new(),
            join_codes: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// While unavailable every [`RemoteStore`] call fails as unreachable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unreachable("store offline".to_string()))
        }
    }

    pub fn insert_game(&self, form: &GameForm) -> Result<Game, StoreError> {
        let name = form.name.trim();
        if name.is_empty() {
            return Err(StoreError::Rejected("game name is required".to_string()));
        }
        if form.turn_length_ms() == 0 {
            return Err(StoreError::Rejected("turn length must be positive".to_string()));
        }

        let mut join_code = create_join_code();
        while self.join_codes.contains_key(&join_code) {
            join_code = create_join_code();
        }

        let game = Game {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            turn_length: form.turn_length_ms(),
            join_code: join_code.clone(),
            status: GameStatus::Pending,
            paused: false,
            host_player_id: None,
            active_player_id: None,
            created_at: Utc::now(),
        };
        self.join_codes.insert(join_code.clone(), game.id.clone());
        self.games.insert(game.id.clone(), game.clone());

        tracing::info!(game_id = %game.id, %join_code, "game created");
        Ok(game)
    }

    pub fn game(&self, game_id: &str) -> Result<Game, StoreError> {
        self.games
            .get(game_id)
            .map(|g| g.clone())
            .ok_or_else(|| StoreError::game_not_found(game_id))
    }

    pub fn games_by_join_code(&self, join_code: &str) -> Vec<Game> {
        let code = join_code.to_ascii_uppercase();
        self.join_codes
            .get(&code)
            .and_then(|id| self.games.get(id.value()).map(|g| g.clone()))
            .into_iter()
            .collect()
    }

    pub fn patch_game(&self, game_id: &str, update: &GameUpdate) -> Result<Game, StoreError> {
        let mut game = self
            .games
            .get_mut(game_id)
            .ok_or_else(|| StoreError::game_not_found(game_id))?;
        game.apply(update);
        Ok(game.clone())
    }

    pub fn insert_player(&self, form: &PlayerForm, game_id: &str) -> Result<Player, StoreError> {
        if form.name.trim().is_empty() {
            return Err(StoreError::Rejected("player name is required".to_string()));
        }
        self.game(game_id)?;

        let position = self.connected_count(game_id);
        let player = Player {
            id: Uuid::new_v4().to_string(),
            name: form.name.trim().to_string(),
            color: form.color.clone(),
            game_id: game_id.to_string(),
            position,
            connected: true,
            created_at: Utc::now(),
        };
        self.players.insert(player.id.clone(), player.clone());
        Ok(player)
    }

    pub fn player(&self, player_id: &str) -> Result<Player, StoreError> {
        self.players
            .get(player_id)
            .map(|p| p.clone())
            .ok_or_else(|| StoreError::player_not_found(player_id))
    }

    /// All of a game's players, connected or not, in turn order.
    pub fn roster(&self, game_id: &str) -> Vec<Player> {
        let mut roster: Vec<Player> = self
            .players
            .iter()
            .filter(|p| p.game_id == game_id)
            .map(|p| p.clone())
            .collect();
        roster.sort_by(|a, b| {
            a.position
                .cmp(&b.position)
                .then(a.created_at.cmp(&b.created_at))
        });
        roster
    }

    pub fn patch_player(&self, player_id: &str, update: &PlayerUpdate) -> Result<Player, StoreError> {
        let mut player = self
            .players
            .get_mut(player_id)
            .ok_or_else(|| StoreError::player_not_found(player_id))?;
        player.apply(update);
        Ok(player.clone())
    }

    pub fn remove_player(&self, player_id: &str) -> Result<Player, StoreError> {
        let player = self.player(player_id)?;
        let roster = self.roster(&player.game_id);
        self.players.remove(player_id);
        self.reconcile(&player.game_id, &roster, player_id, true);
        Ok(player)
    }

    pub fn reorder(&self, game_id: &str, order: &[String]) -> Result<Vec<Player>, StoreError> {
        self.game(game_id)?;
        let reordered = apply_reorder(&self.roster(game_id), order);
        for player in &reordered {
            if let Some(mut stored) = self.players.get_mut(&player.id) {
                stored.position = player.position;
            }
        }
        Ok(self.roster(game_id))
    }

    /// Marks a player present. Returns the game id when anything changed.
    pub fn mark_connected(&self, player_id: &str) -> Option<String> {
        let player = self.player(player_id).ok()?;
        let game_id = player.game_id.clone();
        let mut changed = false;

        if !player.connected {
            let position = self.connected_count(&game_id);
            if let Some(mut stored) = self.players.get_mut(player_id) {
                stored.connected = true;
                stored.position = position;
            }
            changed = true;
        }

        if let Some(mut game) = self.games.get_mut(&game_id) {
            if game.host_player_id.is_none() {
                game.host_player_id = Some(player_id.to_string());
                changed = true;
            }
        }

        changed.then_some(game_id)
    }

    /// Marks a player absent and hands off their roles. Returns the game id
    /// when the player was connected.
    pub fn mark_disconnected(&self, player_id: &str) -> Option<String> {
        let player = self.player(player_id).ok()?;
        if !player.connected {
            return None;
        }
        let roster = self.roster(&player.game_id);
        self.reconcile(&player.game_id, &roster, player_id, false);
        tracing::info!(player_id, game_id = %player.game_id, "player disconnected");
        Some(player.game_id)
    }

    fn connected_count(&self, game_id: &str) -> u32 {
        self.players
            .iter()
            .filter(|p| p.game_id == game_id && p.connected)
            .count() as u32
    }

    fn reconcile(&self, game_id: &str, roster: &[Player], departing: &str, removed: bool) {
        let Ok(game) = self.game(game_id) else {
            return;
        };
        let outcome = reconcile_departure(&game, roster, departing, removed);

        for player in &outcome.players {
            if let Some(mut stored) = self.players.get_mut(&player.id) {
                stored.position = player.position;
                stored.connected = player.connected;
            }
        }

        let update = outcome.game_update();
        if !update.is_empty() {
            if let Some(mut stored) = self.games.get_mut(game_id) {
                stored.apply(&update);
            }
            tracing::info!(
                game_id,
                host = ?outcome.host_player_id,
                active = ?outcome.active_player_id,
                "roles handed off"
            );
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn create_game(&self, form: &GameForm) -> Result<Game, StoreError> {
        self.check_available()?;
        self.insert_game(form)
    }

    async fn get_game(&self, game_id: &str) -> Result<Game, StoreError> {
        self.check_available()?;
        self.game(game_id)
    }

    async fn get_games_by_join_code(&self, join_code: &str) -> Result<Vec<Game>, StoreError> {
        self.check_available()?;
        Ok(self.games_by_join_code(join_code))
    }

    async fn update_game(&self, game_id: &str, update: &GameUpdate) -> Result<Game, StoreError> {
        self.check_available()?;
        self.patch_game(game_id, update)
    }

    async fn create_player(&self, form: &PlayerForm, game_id: &str) -> Result<Player, StoreError> {
        self.check_available()?;
        self.insert_player(form, game_id)
    }

    async fn get_player(&self, player_id: &str) -> Result<Player, StoreError> {
        self.check_available()?;
        self.player(player_id)
    }

    async fn get_players_by_game_id(&self, game_id: &str) -> Result<Vec<Player>, StoreError> {
        self.check_available()?;
        Ok(self.roster(game_id))
    }

    async fn update_player(
        &self,
        player_id: &str,
        update: &PlayerUpdate,
    ) -> Result<Player, StoreError> {
        self.check_available()?;
        self.patch_player(player_id, update)
    }

    async fn delete_player(&self, player_id: &str) -> Result<Player, StoreError> {
        self.check_available()?;
        self.remove_player(player_id)
    }

    async fn reorder_players(
        &self,
        game_id: &str,
        order: &[String],
    ) -> Result<Vec<Player>, StoreError> {
        self.check_available()?;
        self.reorder(game_id, order)
    }
}
