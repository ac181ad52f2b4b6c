use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{Game, GameForm, GameUpdate, Player, PlayerForm, PlayerUpdate};

/// REST-style CRUD for games and players.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn create_game(&self, form: &GameForm) -> Result<Game, StoreError>;
    async fn get_game(&self, game_id: &str) -> Result<Game, StoreError>;
    /// Expected to hold zero or one game.
    async fn get_games_by_join_code(&self, join_code: &str) -> Result<Vec<Game>, StoreError>;
    async fn update_game(&self, game_id: &str, update: &GameUpdate) -> Result<Game, StoreError>;

    async fn create_player(&self, form: &PlayerForm, game_id: &str) -> Result<Player, StoreError>;
    async fn get_player(&self, player_id: &str) -> Result<Player, StoreError>;
    async fn get_players_by_game_id(&self, game_id: &str) -> Result<Vec<Player>, StoreError>;
    async fn update_player(
        &self,
        player_id: &str,
        update: &PlayerUpdate,
    ) -> Result<Player, StoreError>;
    async fn delete_player(&self, player_id: &str) -> Result<Player, StoreError>;
    /// Persists `order` as the game's turn order and returns the updated roster.
    async fn reorder_players(
        &self,
        game_id: &str,
        order: &[String],
    ) -> Result<Vec<Player>, StoreError>;
}
