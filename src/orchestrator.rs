//! Single owner of client state.
//!
//! Every mutation goes through [`Orchestrator::dispatch`]. Handlers talk to
//! the store, transport and storage collaborators and resolve each failure
//! into a `*Failed` follow-up action, which turns into a [`Notice`] for the
//! presentation layer. [`Orchestrator::spawn`] runs the same dispatcher as an
//! actor that also reacts to timer ticks, broker messages, link drops and
//! heartbeat wake-ups.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, broadcast, mpsc, watch};

use crate::config::{self, ClientConfig};
use crate::dispatch_log::{DispatchLog, DispatchLogEntry};
use crate::error::{ConfigError, StoreError, TransportError};
use crate::format::time_with_colons;
use crate::persistence::{PersistenceAdapter, StorageKey, load, save};
use crate::presence::reconcile_departure;
use crate::reconnect::{SessionPhase, establish, spawn_heartbeat};
use crate::rotation::{apply_reorder, next_active_player_id};
use crate::state::AppState;
use crate::store::RemoteStore;
use crate::timer::{TimerTick, TurnTimer};
use crate::transport::{InboundMessage, LinkStatus, TransportChannel, game_destination, game_topic};
use crate::types::*;

const JOIN_SUMMARY: &str = "Unable to join game";
const CREATE_SUMMARY: &str = "Unable to create game";
const UNKNOWN_ERROR: &str = "An unknown error occurred.  Please try again.";

/// External collaborators, passed in explicitly.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn RemoteStore>,
    pub transport: Arc<dyn TransportChannel>,
    pub persistence: Arc<dyn PersistenceAdapter>,
}

/// Requests to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Navigate(Route),
    Error { summary: String, detail: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    AppInitialized,
    EmptyPlayerIdRetrievedFromStorage,
    LocalPlayerIdRetrievedFromStorage,
    OnlinePlayerIdRetrievedFromStorage { player_id: String },
    LoadPlayerFailed,
    LoadGameFailed,
    LoadedUnjoinableGame { game_name: String },
    LoadOnlinePlayersFailed { game_name: String },
    ConnectToWebSocketServerFailed { summary: String },
    SubscribeToGameTopicFailed { summary: String },
    WsPlayersOrGameUpdated,
    WsGameStarted,
    WsTimerValueChanged { timer_value: u64 },
    TransportDropped,
    SessionLost,
    CreateGameButtonClicked { game_form: GameForm },
    CreateGameFailed,
    CreatePlayerDuringGameCreationFailed,
    StartGameButtonClicked,
    StartGameFailed { reason: String },
    EndTurnButtonClicked,
    ChangeActivePlayerFailed,
    PauseToggled,
    TogglePauseFailed,
    TimerTicked { generation: u64 },
    LeaveGameConfirmed,
    LeaveGameFailed,
    JoinGameButtonClicked { join_code: String },
    FindJoinCodeFailed { join_code: String },
    CreatePlayerButtonClicked { player_form: PlayerForm },
    CreateOnlinePlayerFailed,
    UpdatePlayerButtonClicked { player_id: String, player_form: PlayerForm },
    UpdatePlayerFailed,
    DeletePlayerButtonClicked { player_id: String },
    DeletePlayerFailed,
    PlayersReordered { player_ids: Vec<String> },
    ReorderPlayersFailed { previous: Vec<Player> },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AppInitialized => "appInitialized",
            Self::EmptyPlayerIdRetrievedFromStorage => "emptyPlayerIdRetrievedFromStorage",
            Self::LocalPlayerIdRetrievedFromStorage => "localPlayerIdRetrievedFromStorage",
            Self::OnlinePlayerIdRetrievedFromStorage { .. } => "onlinePlayerIdRetrievedFromStorage",
            Self::LoadPlayerFailed => "loadPlayerFailed",
            Self::LoadGameFailed => "loadGameFailed",
            Self::LoadedUnjoinableGame { .. } => "loadedUnjoinableGame",
            Self::LoadOnlinePlayersFailed { .. } => "loadOnlinePlayersFailed",
            Self::ConnectToWebSocketServerFailed { .. } => "connectToWebSocketServerFailed",
            Self::SubscribeToGameTopicFailed { .. } => "subscribeToGameTopicFailed",
            Self::WsPlayersOrGameUpdated => "wsPlayersOrGameUpdated",
            Self::WsGameStarted => "wsGameStarted",
            Self::WsTimerValueChanged { .. } => "wsTimerValueChanged",
            Self::TransportDropped => "transportDropped",
            Self::SessionLost => "sessionLost",
            Self::CreateGameButtonClicked { .. } => "createGameButtonClicked",
            Self::CreateGameFailed => "createGameFailed",
            Self::CreatePlayerDuringGameCreationFailed => "createPlayerDuringGameCreationFailed",
            Self::StartGameButtonClicked => "startGameButtonClicked",
            Self::StartGameFailed { .. } => "startGameFailed",
            Self::EndTurnButtonClicked => "endTurnButtonClicked",
            Self::ChangeActivePlayerFailed => "changeActivePlayerFailed",
            Self::PauseToggled => "pauseToggled",
            Self::TogglePauseFailed => "togglePauseFailed",
            Self::TimerTicked { .. } => "timerTicked",
            Self::LeaveGameConfirmed => "leaveGameConfirmed",
            Self::LeaveGameFailed => "leaveGameFailed",
            Self::JoinGameButtonClicked { .. } => "joinGameButtonClicked",
            Self::FindJoinCodeFailed { .. } => "findJoinCodeFailed",
            Self::CreatePlayerButtonClicked { .. } => "createPlayerButtonClicked",
            Self::CreateOnlinePlayerFailed => "createOnlinePlayerFailed",
            Self::UpdatePlayerButtonClicked { .. } => "updatePlayerButtonClicked",
            Self::UpdatePlayerFailed => "updatePlayerFailed",
            Self::DeletePlayerButtonClicked { .. } => "deletePlayerButtonClicked",
            Self::DeletePlayerFailed => "deletePlayerFailed",
            Self::PlayersReordered { .. } => "playersReordered",
            Self::ReorderPlayersFailed { .. } => "reorderPlayersFailed",
        }
    }

    /// `(summary, errorDetail)` for failure actions.
    pub fn error(&self) -> Option<(String, String)> {
        let (summary, detail) = match self {
            Self::LoadPlayerFailed => (JOIN_SUMMARY.into(), "Failed to load recent player data.".into()),
            Self::LoadGameFailed => (JOIN_SUMMARY.into(), "Failed to load recent game data.".into()),
            Self::LoadedUnjoinableGame { game_name } => (
                JOIN_SUMMARY.into(),
                format!("Game \"{game_name}\" is no longer joinable."),
            ),
            Self::LoadOnlinePlayersFailed { game_name } => (
                JOIN_SUMMARY.into(),
                format!("Failed to load players for game \"{game_name}\"."),
            ),
            Self::ConnectToWebSocketServerFailed { summary } => {
                (summary.clone(), "Failed to connect to WebSocket server.".into())
            }
            Self::SubscribeToGameTopicFailed { summary } => {
                (summary.clone(), "Failed to subscribe to WebSocket messages.".into())
            }
            Self::CreateGameFailed => ("Failed to create game".into(), UNKNOWN_ERROR.into()),
            Self::CreatePlayerDuringGameCreationFailed => (
                "Failed to create game".into(),
                "Unable to create new player during game creation.  Please try again.".into(),
            ),
            Self::FindJoinCodeFailed { join_code } => (
                JOIN_SUMMARY.into(),
                format!("Could not find game with join code {join_code}."),
            ),
            Self::CreateOnlinePlayerFailed => ("Failed to join game".into(), UNKNOWN_ERROR.into()),
            Self::UpdatePlayerFailed => (
                "Failed to update player".into(),
                "Unable to save player changes.  Please try again.".into(),
            ),
            Self::DeletePlayerFailed => (
                "Failed to remove player".into(),
                "Unable to remove player.  Please try again.".into(),
            ),
            Self::ReorderPlayersFailed { .. } => (
                "Failed to reorder players".into(),
                "Player order could not be saved and was restored.".into(),
            ),
            Self::StartGameFailed { reason } => ("Unable to start game".into(), reason.clone()),
            Self::ChangeActivePlayerFailed => (
                "Unable to end turn".into(),
                "Failed to update the active player.".into(),
            ),
            Self::TogglePauseFailed => ("Unable to pause game".into(), "Failed to update the game.".into()),
            Self::LeaveGameFailed => (
                "Unable to leave game".into(),
                "Failed to remove player from game.".into(),
            ),
            Self::SessionLost => ("Connection lost".into(), "Unable to reconnect to the game.".into()),
            _ => return None,
        };
        Some((summary, detail))
    }

    /// Failures after which the client has no usable session left.
    fn ends_session(&self) -> bool {
        matches!(
            self,
            Self::LoadPlayerFailed
                | Self::LoadGameFailed
                | Self::LoadedUnjoinableGame { .. }
                | Self::LoadOnlinePlayersFailed { .. }
                | Self::ConnectToWebSocketServerFailed { .. }
                | Self::SubscribeToGameTopicFailed { .. }
                | Self::SessionLost
        )
    }
}

fn connect_failed(summary: &str, error: &TransportError) -> Action {
    match error {
        TransportError::SubscribeFailed(_) => Action::SubscribeToGameTopicFailed {
            summary: summary.to_string(),
        },
        _ => Action::ConnectToWebSocketServerFailed {
            summary: summary.to_string(),
        },
    }
}

pub struct Orchestrator {
    ctx: Collaborators,
    config: ClientConfig,
    state: AppState,
    log: Arc<Mutex<DispatchLog>>,
    timer: TurnTimer,
    tick_rx: Option<mpsc::UnboundedReceiver<TimerTick>>,
    /// Active player the countdown was last seeded for.
    timer_turn: Option<String>,
    /// Whether the transport has been engaged for the current session.
    linked: bool,
    state_tx: watch::Sender<AppState>,
    notice_tx: broadcast::Sender<Notice>,
}

impl Orchestrator {
    pub fn new(ctx: Collaborators, config: ClientConfig) -> Self {
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(AppState::default());
        let (notice_tx, _) = broadcast::channel(64);
        Self {
            timer: TurnTimer::new(config.tick_period(), tick_tx),
            log: Arc::new(Mutex::new(DispatchLog::new(config.dispatch_log_capacity))),
            ctx,
            config,
            state: AppState::default(),
            tick_rx: Some(tick_rx),
            timer_turn: None,
            linked: false,
            state_tx,
            notice_tx,
        }
    }

    /// Builds an orchestrator tuned by `timerush.json` under `CONFIG_PATH`.
    pub fn from_config_dir(ctx: Collaborators) -> Result<Self, ConfigError> {
        Ok(Self::new(ctx, config::load_client_config()?))
    }

    pub fn from_config_file(ctx: Collaborators, path: &Path) -> Result<Self, ConfigError> {
        Ok(Self::new(ctx, config::load_client_config_from(path)?))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The last submitted new-game form, for pre-filling an interrupted
    /// creation flow.
    pub fn last_game_form(&self) -> Option<GameForm> {
        load(self.ctx.persistence.as_ref(), StorageKey::NewGameForm)
    }

    pub fn timer(&self) -> &TurnTimer {
        &self.timer
    }

    pub fn subscribe_state(&self) -> watch::Receiver<AppState> {
        self.state_tx.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notice_tx.subscribe()
    }

    pub async fn dispatch_log(&self) -> Vec<DispatchLogEntry> {
        self.log.lock().await.entries()
    }

    /// Runs `action` and every follow-up it produces, in order.
    pub async fn dispatch(&mut self, action: Action) {
        let mut queue = VecDeque::from([action]);
        while let Some(action) = queue.pop_front() {
            let name = action.name();
            let dispatched_at = Utc::now();
            let before = self.snapshot();
            tracing::debug!(action = name, "dispatch");

            let follow_up = self.apply(action).await;
            self.sync_timer();
            self.persist();
            self.publish_state();

            let after = self.snapshot();
            self.log
                .lock()
                .await
                .push(DispatchLogEntry::new(name, dispatched_at, &before, &after));
            queue.extend(follow_up);
        }
    }

    async fn apply(&mut self, action: Action) -> Option<Action> {
        if let Some((summary, detail)) = action.error() {
            self.handle_failure(action, summary, detail).await;
            return None;
        }

        match action {
            Action::AppInitialized => self.handle_app_initialized().await,
            Action::EmptyPlayerIdRetrievedFromStorage => {
                self.state = AppState::default();
                self.navigate(Route::Home);
                None
            }
            Action::LocalPlayerIdRetrievedFromStorage => {
                self.handle_local_resume();
                None
            }
            Action::OnlinePlayerIdRetrievedFromStorage { player_id } => {
                self.handle_online_resume(player_id).await
            }
            Action::WsPlayersOrGameUpdated => self.handle_refresh().await,
            Action::WsGameStarted => {
                self.navigate(Route::ActiveGame);
                Some(Action::WsPlayersOrGameUpdated)
            }
            Action::WsTimerValueChanged { timer_value } => {
                self.handle_timer_value_changed(timer_value);
                None
            }
            Action::TransportDropped => self.handle_transport_dropped().await,
            Action::CreateGameButtonClicked { game_form } => self.handle_create_game(game_form).await,
            Action::StartGameButtonClicked => self.handle_start_game().await,
            Action::EndTurnButtonClicked => self.handle_end_turn().await,
            Action::PauseToggled => self.handle_toggle_pause().await,
            Action::TimerTicked { generation } => {
                self.handle_tick(generation).await;
                None
            }
            Action::LeaveGameConfirmed => self.handle_leave_game().await,
            Action::JoinGameButtonClicked { join_code } => self.handle_join_game(join_code).await,
            Action::CreatePlayerButtonClicked { player_form } => {
                self.handle_create_player(player_form).await
            }
            Action::UpdatePlayerButtonClicked {
                player_id,
                player_form,
            } => self.handle_update_player(player_id, player_form).await,
            Action::DeletePlayerButtonClicked { player_id } => {
                self.handle_delete_player(player_id).await
            }
            Action::PlayersReordered { player_ids } => self.handle_reorder(player_ids).await,
            failed => {
                tracing::error!(action = failed.name(), "failure action without error detail");
                None
            }
        }
    }

    // ─── Failures ─────────────────────────────────────────────────────

    async fn handle_failure(&mut self, action: Action, summary: String, detail: String) {
        tracing::warn!(action = action.name(), %summary, %detail, "action failed");
        self.state.loading = false;

        match action {
            ref a if a.ends_session() => {
                self.teardown().await;
                self.state = AppState::default();
                self.notify(Notice::Error { summary, detail });
                self.navigate(Route::Home);
                return;
            }
            Action::ReorderPlayersFailed { previous } => self.state.players = previous,
            Action::CreatePlayerDuringGameCreationFailed => {
                self.state.game = None;
                self.state.players.clear();
            }
            _ => {}
        }
        self.notify(Notice::Error { summary, detail });
    }

    // ─── Session resumption ───────────────────────────────────────────

    async fn handle_app_initialized(&mut self) -> Option<Action> {
        // Re-entry must not leave a previous subscription or countdown behind.
        self.teardown().await;

        match load::<String>(self.ctx.persistence.as_ref(), StorageKey::PlayerId) {
            None => Some(Action::EmptyPlayerIdRetrievedFromStorage),
            Some(id) if id == LOCAL_PLAYER_ID => Some(Action::LocalPlayerIdRetrievedFromStorage),
            Some(player_id) => Some(Action::OnlinePlayerIdRetrievedFromStorage { player_id }),
        }
    }

    fn handle_local_resume(&mut self) {
        let storage = self.ctx.persistence.as_ref();
        let game = load::<Game>(storage, StorageKey::Game).filter(Game::is_local);
        let Some(game) = game else {
            tracing::warn!("local session without a stored local game");
            self.state = AppState::default();
            self.navigate(Route::Home);
            return;
        };

        let route = Route::for_game(&game);
        self.state = AppState {
            players: load(storage, StorageKey::Players).unwrap_or_default(),
            game: Some(game),
            current_player_id: Some(LOCAL_PLAYER_ID.to_string()),
            phase: SessionPhase::Synced,
            ..AppState::default()
        };
        tracing::info!("resumed local game");
        self.navigate(route);
    }

    async fn handle_online_resume(&mut self, player_id: String) -> Option<Action> {
        self.state.loading = true;
        self.publish_state();

        let store = self.ctx.store.clone();
        let player = match store.get_player(&player_id).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(%player_id, error = %e, "failed to load player");
                return Some(Action::LoadPlayerFailed);
            }
        };
        let game = match store.get_game(&player.game_id).await {
            Ok(g) => g,
            Err(e) => {
                tracing::warn!(game_id = %player.game_id, error = %e, "failed to load game");
                return Some(Action::LoadGameFailed);
            }
        };
        if !is_rejoinable(&game) {
            return Some(Action::LoadedUnjoinableGame {
                game_name: game.name,
            });
        }
        let players = match store.get_players_by_game_id(&game.id).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(game_id = %game.id, error = %e, "failed to load players");
                return Some(Action::LoadOnlinePlayersFailed {
                    game_name: game.name,
                });
            }
        };

        self.state.current_player_id = Some(player.id.clone());
        self.state.game = Some(game.clone());
        self.state.players = players;

        if let Err(e) = self.connect(&game.id, &player.id).await {
            return Some(connect_failed(JOIN_SUMMARY, &e));
        }

        self.state.loading = false;
        self.navigate(Route::for_game(&game));
        None
    }

    async fn handle_transport_dropped(&mut self) -> Option<Action> {
        if !self.linked {
            return None;
        }
        let (Some(game_id), Some(player_id)) = (
            self.state.game.as_ref().map(|g| g.id.clone()),
            self.state.current_player_id.clone(),
        ) else {
            return None;
        };

        tracing::warn!(%game_id, "transport dropped, reconnecting");
        self.unlink().await;
        match self.connect(&game_id, &player_id).await {
            Ok(()) => Some(Action::WsPlayersOrGameUpdated),
            Err(e) => {
                tracing::error!(error = %e, "reconnect failed");
                Some(Action::SessionLost)
            }
        }
    }

    // ─── Inbound synchronization ──────────────────────────────────────

    async fn handle_refresh(&mut self) -> Option<Action> {
        let game_id = match &self.state.game {
            Some(game) if !game.is_local() => game.id.clone(),
            _ => return None,
        };

        let store = self.ctx.store.clone();
        let game = match store.get_game(&game_id).await {
            Ok(g) => g,
            Err(e) => {
                tracing::warn!(%game_id, error = %e, "refresh: failed to load game");
                return None;
            }
        };
        let players = match store.get_players_by_game_id(&game_id).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(%game_id, error = %e, "refresh: failed to load players");
                return None;
            }
        };

        let was_started = self.state.game.as_ref().is_some_and(Game::is_started);
        let started = game.is_started();
        self.state.game = Some(game);
        self.state.players = players;

        if let Some(me) = self.state.current_player_id.clone() {
            if !self.state.players.iter().any(|p| p.id == me) {
                tracing::info!(player_id = %me, "removed from game");
                self.teardown().await;
                self.state = AppState::default();
                self.navigate(Route::Home);
                return None;
            }
        }
        if !was_started && started {
            self.navigate(Route::ActiveGame);
        }
        None
    }

    fn handle_timer_value_changed(&mut self, timer_value: u64) {
        // The active client is the time source; its own echo is ignored.
        if self.state.player_is_active() || self.state.is_local_game() {
            return;
        }
        if self.state.game.is_none() {
            return;
        }
        self.state.timer_value = Some(self.timer.set_remaining(timer_value));
    }

    // ─── Game lifecycle ───────────────────────────────────────────────

    async fn handle_create_game(&mut self, form: GameForm) -> Option<Action> {
        save(self.ctx.persistence.as_ref(), StorageKey::NewGameForm, &form);
        self.teardown().await;

        if form.game_type == GameType::Local {
            self.state = AppState {
                game: Some(Game::local(&form)),
                current_player_id: Some(LOCAL_PLAYER_ID.to_string()),
                phase: SessionPhase::Synced,
                ..AppState::default()
            };
            tracing::info!("local game created");
            self.navigate(Route::ManagePlayers);
            return None;
        }

        self.state = AppState {
            loading: true,
            ..AppState::default()
        };
        self.publish_state();

        let store = self.ctx.store.clone();
        let game = match store.create_game(&form).await {
            Ok(g) => g,
            Err(e) => {
                tracing::warn!(error = %e, "create game failed");
                return Some(Action::CreateGameFailed);
            }
        };
        let host_form = PlayerForm {
            name: HOST_PLAYER_NAME.to_string(),
            color: random_player_color(),
        };
        let host = match store.create_player(&host_form, &game.id).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(game_id = %game.id, error = %e, "create host player failed");
                return Some(Action::CreatePlayerDuringGameCreationFailed);
            }
        };
        let update = GameUpdate {
            host_player_id: Some(Some(host.id.clone())),
            ..GameUpdate::default()
        };
        let game = match store.update_game(&game.id, &update).await {
            Ok(g) => g,
            Err(e) => {
                tracing::warn!(game_id = %game.id, error = %e, "assigning host failed");
                return Some(Action::CreateGameFailed);
            }
        };

        self.state.game = Some(game.clone());
        self.state.players = vec![host.clone()];
        self.state.current_player_id = Some(host.id.clone());

        if let Err(e) = self.connect(&game.id, &host.id).await {
            return Some(connect_failed(CREATE_SUMMARY, &e));
        }

        tracing::info!(game_id = %game.id, join_code = %game.join_code, "online game created");
        self.state.loading = false;
        self.navigate(Route::Lobby);
        None
    }

    async fn handle_join_game(&mut self, join_code: String) -> Option<Action> {
        let Some(code) = normalize_join_code(&join_code) else {
            return Some(Action::FindJoinCodeFailed { join_code });
        };

        self.state.loading = true;
        self.publish_state();

        let games = match self.ctx.store.get_games_by_join_code(&code).await {
            Ok(g) => g,
            Err(e) => {
                tracing::warn!(join_code = %code, error = %e, "join code lookup failed");
                Vec::new()
            }
        };
        let Some(game) = games.into_iter().next() else {
            return Some(Action::FindJoinCodeFailed { join_code: code });
        };
        if !is_joinable(&game) {
            return Some(Action::LoadedUnjoinableGame {
                game_name: game.name,
            });
        }
        let players = match self.ctx.store.get_players_by_game_id(&game.id).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(game_id = %game.id, error = %e, "failed to load players");
                return Some(Action::LoadOnlinePlayersFailed {
                    game_name: game.name,
                });
            }
        };

        self.teardown().await;
        self.state = AppState {
            game: Some(game),
            players,
            ..AppState::default()
        };
        self.navigate(Route::NewPlayer);
        None
    }

    async fn handle_start_game(&mut self) -> Option<Action> {
        let game = self.state.game.clone()?;
        if game.is_started() {
            tracing::warn!(game_id = %game.id, "start ignored, game already running");
            return None;
        }
        if !self.state.player_is_host() {
            return Some(Action::StartGameFailed {
                reason: "Only the host can start the game.".to_string(),
            });
        }

        let ordered = self.state.connected_and_sorted_players();
        if game.is_local() && ordered.is_empty() {
            return Some(Action::StartGameFailed {
                reason: "Add a player before starting the game.".to_string(),
            });
        }
        if !game.is_local() && ordered.len() < 2 {
            return Some(Action::StartGameFailed {
                reason: "At least two players must join before the game can start.".to_string(),
            });
        }
        let first = next_active_player_id(None, &ordered);

        if game.is_local() {
            if let Some(game) = self.state.game.as_mut() {
                game.active_player_id = first;
                game.paused = false;
            }
            self.navigate(Route::ActiveGame);
            return None;
        }

        let update = GameUpdate {
            status: Some(GameStatus::Active),
            paused: Some(false),
            active_player_id: Some(first),
            ..GameUpdate::default()
        };
        match self.ctx.store.update_game(&game.id, &update).await {
            Ok(g) => self.state.game = Some(g),
            Err(e) => {
                tracing::warn!(game_id = %game.id, error = %e, "start game failed");
                return Some(Action::StartGameFailed {
                    reason: "Failed to update the game.".to_string(),
                });
            }
        }

        tracing::info!(game_id = %game.id, "game started");
        self.broadcast(ChannelMessage::GameStarted).await;
        self.broadcast(ChannelMessage::PlayersOrGameUpdated).await;
        self.navigate(Route::ActiveGame);
        None
    }

    async fn handle_end_turn(&mut self) -> Option<Action> {
        if !self.state.can_end_turn() {
            tracing::warn!("end turn ignored, not this client's turn");
            return None;
        }
        let game = self.state.game.clone()?;
        let ordered = self.state.connected_and_sorted_players();
        let next = next_active_player_id(game.active_player_id.as_deref(), &ordered);

        if game.is_local() {
            if let Some(game) = self.state.game.as_mut() {
                game.active_player_id = next;
            }
            return None;
        }

        self.timer.stop();
        let update = GameUpdate {
            active_player_id: Some(next),
            ..GameUpdate::default()
        };
        match self.ctx.store.update_game(&game.id, &update).await {
            Ok(g) => self.state.game = Some(g),
            Err(e) => {
                tracing::warn!(game_id = %game.id, error = %e, "end turn failed");
                return Some(Action::ChangeActivePlayerFailed);
            }
        }
        self.broadcast(ChannelMessage::PlayersOrGameUpdated).await;
        None
    }

    async fn handle_toggle_pause(&mut self) -> Option<Action> {
        let game = self.state.game.clone()?;
        if !game.is_started() {
            return None;
        }
        let paused = !game.paused;

        if game.is_local() {
            if let Some(game) = self.state.game.as_mut() {
                game.paused = paused;
            }
            return None;
        }

        let update = GameUpdate {
            paused: Some(paused),
            ..GameUpdate::default()
        };
        match self.ctx.store.update_game(&game.id, &update).await {
            Ok(g) => self.state.game = Some(g),
            Err(e) => {
                tracing::warn!(game_id = %game.id, error = %e, "toggle pause failed");
                return Some(Action::TogglePauseFailed);
            }
        }
        self.broadcast(ChannelMessage::PlayersOrGameUpdated).await;
        None
    }

    async fn handle_tick(&mut self, generation: u64) {
        let Some(remaining) = self.timer.tick(TimerTick { generation }) else {
            return;
        };
        self.state.timer_value = Some(remaining);
        tracing::trace!(remaining = %time_with_colons(remaining), "tick");
        if !self.state.is_local_game() {
            self.broadcast(ChannelMessage::TimerValueChanged {
                timer_value: remaining,
            })
            .await;
        }
    }

    async fn handle_leave_game(&mut self) -> Option<Action> {
        let game = self.state.game.clone()?;

        if game.is_local() {
            let storage = self.ctx.persistence.as_ref();
            storage.set_item(StorageKey::Game, Value::Null);
            storage.set_item(StorageKey::Players, Value::Null);
            self.teardown().await;
            self.state = AppState::default();
            self.navigate(Route::Home);
            return None;
        }

        let Some(me) = self.state.current_player_id.clone() else {
            self.teardown().await;
            self.state = AppState::default();
            self.navigate(Route::Home);
            return None;
        };

        self.timer.stop();
        if let Err(e) = self.remove_online_player(&game, &me).await {
            tracing::warn!(player_id = %me, error = %e, "leave game failed");
            return Some(Action::LeaveGameFailed);
        }

        tracing::info!(game_id = %game.id, player_id = %me, "left game");
        self.teardown().await;
        self.state = AppState::default();
        self.navigate(Route::Home);
        None
    }

    // ─── Roster ───────────────────────────────────────────────────────

    async fn handle_create_player(&mut self, form: PlayerForm) -> Option<Action> {
        let game = self.state.game.clone()?;

        if game.is_local() {
            let position = self
                .state
                .players
                .iter()
                .map(|p| p.position + 1)
                .max()
                .unwrap_or(0);
            self.state.players.push(Player {
                id: uuid::Uuid::new_v4().to_string(),
                name: form.name,
                color: form.color,
                game_id: LOCAL_GAME_ID.to_string(),
                position,
                connected: true,
                created_at: Utc::now(),
            });
            return None;
        }

        if self.state.current_player_id.is_some() {
            tracing::warn!("already playing in this game, ignoring new player");
            return None;
        }

        self.state.loading = true;
        self.publish_state();

        let player = match self.ctx.store.create_player(&form, &game.id).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(game_id = %game.id, error = %e, "create player failed");
                return Some(Action::CreateOnlinePlayerFailed);
            }
        };
        self.state.current_player_id = Some(player.id.clone());
        self.state.players.push(player.clone());

        if let Err(e) = self.connect(&game.id, &player.id).await {
            return Some(connect_failed(JOIN_SUMMARY, &e));
        }
        self.broadcast(ChannelMessage::PlayersOrGameUpdated).await;

        tracing::info!(game_id = %game.id, player_id = %player.id, "joined game");
        self.state.loading = false;
        self.navigate(Route::for_game(&game));
        None
    }

    async fn handle_update_player(&mut self, player_id: String, form: PlayerForm) -> Option<Action> {
        let game = self.state.game.clone()?;
        let update = PlayerUpdate::from(&form);

        if game.is_local() {
            if let Some(player) = self.state.players.iter_mut().find(|p| p.id == player_id) {
                player.apply(&update);
            }
            return None;
        }

        match self.ctx.store.update_player(&player_id, &update).await {
            Ok(updated) => {
                if let Some(player) = self.state.players.iter_mut().find(|p| p.id == player_id) {
                    *player = updated;
                }
            }
            Err(e) => {
                tracing::warn!(%player_id, error = %e, "update player failed");
                return Some(Action::UpdatePlayerFailed);
            }
        }
        self.broadcast(ChannelMessage::PlayersOrGameUpdated).await;
        None
    }

    async fn handle_delete_player(&mut self, player_id: String) -> Option<Action> {
        let game = self.state.game.clone()?;

        if game.is_local() {
            let outcome = reconcile_departure(&game, &self.state.players, &player_id, true);
            let update = outcome.game_update();
            self.state.players = outcome.players;
            if let Some(game) = self.state.game.as_mut() {
                game.apply(&update);
            }
            return None;
        }

        if self.state.current_player_id.as_deref() == Some(player_id.as_str()) {
            return Some(Action::LeaveGameConfirmed);
        }

        if let Err(e) = self.remove_online_player(&game, &player_id).await {
            tracing::warn!(%player_id, error = %e, "delete player failed");
            return Some(Action::DeletePlayerFailed);
        }
        Some(Action::WsPlayersOrGameUpdated)
    }

    async fn handle_reorder(&mut self, player_ids: Vec<String>) -> Option<Action> {
        let game = self.state.game.clone()?;
        let previous = self.state.players.clone();
        self.state.players = apply_reorder(&previous, &player_ids);

        if game.is_local() {
            return None;
        }

        self.publish_state();
        match self.ctx.store.reorder_players(&game.id, &player_ids).await {
            Ok(players) => self.state.players = players,
            Err(e) => {
                tracing::warn!(game_id = %game.id, error = %e, "reorder failed, rolling back");
                return Some(Action::ReorderPlayersFailed { previous });
            }
        }
        self.broadcast(ChannelMessage::PlayersOrGameUpdated).await;
        None
    }

    /// Deletes `player_id` and writes back host/turn hand-off.
    async fn remove_online_player(&mut self, game: &Game, player_id: &str) -> Result<(), StoreError> {
        let outcome = reconcile_departure(game, &self.state.players, player_id, true);
        self.ctx.store.delete_player(player_id).await?;

        let update = outcome.game_update();
        if !update.is_empty() {
            if let Err(e) = self.ctx.store.update_game(&game.id, &update).await {
                tracing::warn!(game_id = %game.id, error = %e, "hand-off update failed");
            }
        }
        self.state.players = outcome.players;
        if let Some(current) = self.state.game.as_mut() {
            current.apply(&update);
        }
        self.broadcast(ChannelMessage::PlayersOrGameUpdated).await;
        Ok(())
    }

    // ─── Timer ────────────────────────────────────────────────────────

    /// Aligns the countdown with the game: a new active player seeds a fresh
    /// turn, and only the time source for the turn runs a tick source.
    fn sync_timer(&mut self) {
        let Some(game) = self.state.game.clone() else {
            self.timer.stop();
            self.timer_turn = None;
            self.state.timer_value = None;
            return;
        };

        if self.timer.turn_length() != game.turn_length {
            self.timer.configure(game.turn_length);
        }

        if game.active_player_id != self.timer_turn {
            self.timer.stop();
            self.timer_turn = game.active_player_id.clone();
            self.state.timer_value = game
                .active_player_id
                .as_ref()
                .map(|_| self.timer.set_remaining(game.turn_length));
        }

        let is_source = game.is_local() || self.state.player_is_active();
        let should_tick = game.is_started()
            && !game.paused
            && is_source
            && self.state.timer_value.is_some_and(|v| v > 0);

        if should_tick {
            if !self.timer.is_running() {
                let from = self.state.timer_value.unwrap_or(game.turn_length);
                self.timer.resume_from(from);
            }
        } else if self.timer.is_running() {
            self.timer.stop();
        }
    }

    // ─── Transport ────────────────────────────────────────────────────

    async fn connect(&mut self, game_id: &str, player_id: &str) -> Result<(), TransportError> {
        self.linked = true;
        let transport = self.ctx.transport.clone();
        let state_tx = self.state_tx.clone();
        let mut on_phase = |phase: SessionPhase| {
            tracing::debug!(?phase, "session phase");
            state_tx.send_modify(|s| s.phase = phase);
        };

        let attempts = self.config.max_connect_attempts;
        match establish(transport.as_ref(), game_id, player_id, &self.config, attempts, &mut on_phase).await {
            Ok(link) => {
                self.state.phase = SessionPhase::Synced;
                self.state.message_delay_ms = link.message_delay.map(|d| d.as_millis() as u64);
                Ok(())
            }
            Err(e) => {
                tracing::error!(%game_id, error = %e, "could not establish session");
                self.unlink().await;
                Err(e)
            }
        }
    }

    async fn unlink(&mut self) {
        if self.linked {
            self.ctx.transport.unsubscribe_all().await;
            self.ctx.transport.deactivate().await;
            self.linked = false;
            tracing::debug!("transport released");
        }
        self.state.phase = SessionPhase::Disconnected;
    }

    async fn teardown(&mut self) {
        self.timer.stop();
        self.timer_turn = None;
        self.unlink().await;
    }

    async fn broadcast(&self, message: ChannelMessage) {
        let Some(game) = &self.state.game else {
            return;
        };
        if game.is_local() || !self.linked {
            return;
        }
        if let Err(e) = self
            .ctx
            .transport
            .publish(&game_destination(&game.id), &message)
            .await
        {
            tracing::warn!(game_id = %game.id, error = %e, "broadcast failed");
        }
    }

    fn translate(&self, inbound: InboundMessage) -> Option<Action> {
        let game = self.state.game.as_ref()?;
        if inbound.topic != game_topic(&game.id) {
            return None;
        }
        match inbound.message {
            ChannelMessage::PlayersOrGameUpdated => Some(Action::WsPlayersOrGameUpdated),
            ChannelMessage::GameStarted => Some(Action::WsGameStarted),
            ChannelMessage::TimerValueChanged { timer_value } => {
                Some(Action::WsTimerValueChanged { timer_value })
            }
            ChannelMessage::Connect { .. } | ChannelMessage::ConnectAck { .. } => None,
        }
    }

    // ─── Outputs ──────────────────────────────────────────────────────

    fn persist(&self) {
        let storage = self.ctx.persistence.as_ref();
        save(storage, StorageKey::PlayerId, &self.state.current_player_id);
        if self.state.is_local_game() {
            save(storage, StorageKey::Game, &self.state.game);
            save(storage, StorageKey::Players, &self.state.players);
        }
    }

    fn publish_state(&self) {
        self.state_tx.send_replace(self.state.clone());
    }

    fn snapshot(&self) -> Value {
        serde_json::to_value(&self.state).unwrap_or_default()
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notice_tx.send(notice);
    }

    fn navigate(&self, route: Route) {
        tracing::debug!(?route, "navigate");
        self.notify(Notice::Navigate(route));
    }

    // ─── Actor ────────────────────────────────────────────────────────

    /// Moves the orchestrator onto its own task.
    pub fn spawn(self) -> OrchestratorHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        let handle = OrchestratorHandle {
            cmd_tx,
            wake_tx: wake_tx.clone(),
            state_rx: self.state_tx.subscribe(),
            notice_tx: self.notice_tx.clone(),
            log: self.log.clone(),
        };
        tokio::spawn(self.run(cmd_rx, wake_tx, wake_rx));
        handle
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        wake_tx: mpsc::UnboundedSender<()>,
        mut wake_rx: mpsc::UnboundedReceiver<()>,
    ) {
        let Some(mut tick_rx) = self.tick_rx.take() else {
            tracing::error!("orchestrator already running");
            return;
        };
        let mut inbound = self.ctx.transport.messages();
        let mut inbound_open = true;
        let mut link = self.ctx.transport.link_status();
        let mut link_open = true;

        let heartbeat = self
            .config
            .heartbeat_period()
            .map(|period| spawn_heartbeat(period, self.config.heartbeat_tolerance, wake_tx));

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Dispatch(action)) => self.dispatch(action).await,
                    Some(Command::Shutdown) | None => break,
                },
                Some(tick) = tick_rx.recv() => {
                    self.dispatch(Action::TimerTicked { generation: tick.generation }).await;
                }
                msg = inbound.recv(), if inbound_open => match msg {
                    Ok(msg) => {
                        if let Some(action) = self.translate(msg) {
                            self.dispatch(action).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "inbound lagged, refreshing");
                        self.dispatch(Action::WsPlayersOrGameUpdated).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => inbound_open = false,
                },
                changed = link.changed(), if link_open => {
                    if changed.is_err() {
                        link_open = false;
                        continue;
                    }
                    let status = *link.borrow_and_update();
                    if status == LinkStatus::Disconnected
                        && self.linked
                        && self.state.phase == SessionPhase::Synced
                    {
                        self.dispatch(Action::TransportDropped).await;
                    }
                }
                Some(()) = wake_rx.recv() => self.dispatch(Action::AppInitialized).await,
            }
        }

        if let Some(heartbeat) = heartbeat {
            heartbeat.abort();
        }
        self.teardown().await;
        tracing::info!("orchestrator stopped");
    }
}

#[derive(Debug)]
pub enum Command {
    Dispatch(Action),
    Shutdown,
}

/// Cloneable access to a spawned [`Orchestrator`].
#[derive(Clone)]
pub struct OrchestratorHandle {
    cmd_tx: mpsc::Sender<Command>,
    wake_tx: mpsc::UnboundedSender<()>,
    state_rx: watch::Receiver<AppState>,
    notice_tx: broadcast::Sender<Notice>,
    log: Arc<Mutex<DispatchLog>>,
}

impl OrchestratorHandle {
    pub async fn dispatch(&self, action: Action) {
        if self.cmd_tx.send(Command::Dispatch(action)).await.is_err() {
            tracing::warn!("dispatch after orchestrator stopped");
        }
    }

    /// Re-runs session resumption, as after the process was suspended.
    pub fn wake(&self) {
        if self.wake_tx.send(()).is_err() {
            tracing::warn!("wake after orchestrator stopped");
        }
    }

    pub fn state(&self) -> AppState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<AppState> {
        self.state_rx.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notice_tx.subscribe()
    }

    pub async fn dispatch_log(&self) -> Vec<DispatchLogEntry> {
        self.log.lock().await.entries()
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
    }
}
