use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};

/// Game id used for pass-and-play games that never touch the network.
pub const LOCAL_GAME_ID: &str = "__localgame__";
/// Player id persisted for pass-and-play sessions.
pub const LOCAL_PLAYER_ID: &str = "__localplayer__";
pub const LOCAL_JOIN_CODE: &str = "__localjoincode__";

pub const JOIN_CODE_LEN: usize = 4;
pub const HOST_PLAYER_NAME: &str = "Host";

pub const DEFAULT_PLAYER_COLORS: [&str; 12] = [
    "#F34141", "#F38141", "#F3CC41", "#38D048", "#4188F3", "#B041F3", "#F659CA", "#41D9FB",
    "#8E744D", "#D3D3D3", "#767676", "#181818",
];

/// Lifecycle of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Pending,
    Active,
    Complete,
    #[serde(rename = "__localgamestate__")]
    LocalOnly,
}

impl std::fmt::Display for GameStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Complete => write!(f, "complete"),
            Self::LocalOnly => write!(f, "__localgamestate__"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub id: String,
    pub name: String,
    /// Milliseconds per turn.
    pub turn_length: u64,
    pub join_code: String,
    pub status: GameStatus,
    #[serde(default)]
    pub paused: bool,
    pub host_player_id: Option<String>,
    pub active_player_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Game {
    /// Synthesizes the pass-and-play game for a submitted form.
    pub fn local(form: &GameForm) -> Self {
        Self {
            id: LOCAL_GAME_ID.to_string(),
            name: form.name.clone(),
            turn_length: form.turn_length_ms(),
            join_code: LOCAL_JOIN_CODE.to_string(),
            status: GameStatus::LocalOnly,
            paused: false,
            host_player_id: Some(LOCAL_PLAYER_ID.to_string()),
            active_player_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.id == LOCAL_GAME_ID
    }

    /// A local game has no status transition, so "started" means a turn is running.
    pub fn is_started(&self) -> bool {
        match self.status {
            GameStatus::Active => true,
            GameStatus::LocalOnly => self.active_player_id.is_some(),
            GameStatus::Pending | GameStatus::Complete => false,
        }
    }

    pub fn apply(&mut self, update: &GameUpdate) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(turn_length) = update.turn_length {
            self.turn_length = turn_length;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(paused) = update.paused {
            self.paused = paused;
        }
        if let Some(host) = &update.host_player_id {
            self.host_player_id = host.clone();
        }
        if let Some(active) = &update.active_player_id {
            self.active_player_id = active.clone();
        }
    }
}

pub fn is_joinable(game: &Game) -> bool {
    game.status == GameStatus::Pending
}

pub fn is_rejoinable(game: &Game) -> bool {
    is_joinable(game) || game.status == GameStatus::Active
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: String,
    pub name: String,
    pub color: String,
    pub game_id: String,
    /// Turn order among the game's connected players.
    pub position: u32,
    #[serde(rename = "isConnected", alias = "connected")]
    pub connected: bool,
    pub created_at: DateTime<Utc>,
}

impl Player {
    pub fn apply(&mut self, update: &PlayerUpdate) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(color) = &update.color {
            self.color = color.clone();
        }
        if let Some(position) = update.position {
            self.position = position;
        }
        if let Some(connected) = update.connected {
            self.connected = connected;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnits {
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "min")]
    Minutes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameType {
    Local,
    Online,
}

/// Submitted "new game" form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameForm {
    pub name: String,
    pub turn_length: u64,
    pub turn_length_units: TimeUnits,
    pub game_type: GameType,
}

impl GameForm {
    pub fn turn_length_ms(&self) -> u64 {
        match self.turn_length_units {
            TimeUnits::Seconds => self.turn_length.saturating_mul(1_000),
            TimeUnits::Minutes => self.turn_length.saturating_mul(60_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerForm {
    pub name: String,
    pub color: String,
}

/// Request body for player creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPlayer {
    #[serde(flatten)]
    pub form: PlayerForm,
    pub game_id: String,
}

// Absent field -> None, explicit null -> Some(None).
fn double_option<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/// Partial game fields for `update game`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<GameStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub host_player_id: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub active_player_id: Option<Option<String>>,
}

impl GameUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Partial player fields for `update player`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    #[serde(
        default,
        rename = "isConnected",
        alias = "connected",
        skip_serializing_if = "Option::is_none"
    )]
    pub connected: Option<bool>,
}

impl From<&PlayerForm> for PlayerUpdate {
    fn from(form: &PlayerForm) -> Self {
        Self {
            name: Some(form.name.clone()),
            color: Some(form.color.clone()),
            ..Self::default()
        }
    }
}

/// Messages carried on broker topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "camelCase")]
pub enum ChannelMessage {
    /// Roster or game changed; receivers re-fetch instead of trusting a payload.
    PlayersOrGameUpdated,
    GameStarted,
    #[serde(rename_all = "camelCase")]
    TimerValueChanged { timer_value: u64 },
    #[serde(rename_all = "camelCase")]
    Connect { player_id: String },
    #[serde(rename_all = "camelCase")]
    ConnectAck { player_id: String },
}

/// Screens the presentation layer can be asked to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Route {
    Home,
    Lobby,
    NewPlayer,
    ManagePlayers,
    ActiveGame,
}

impl Route {
    pub fn for_game(game: &Game) -> Self {
        match game.status {
            GameStatus::Pending => Self::Lobby,
            GameStatus::Active => Self::ActiveGame,
            GameStatus::Complete => Self::Home,
            GameStatus::LocalOnly if game.active_player_id.is_some() => Self::ActiveGame,
            GameStatus::LocalOnly => Self::ManagePlayers,
        }
    }
}

/// Upper-cases a typed join code, or `None` if it is not four alphanumerics.
pub fn normalize_join_code(input: &str) -> Option<String> {
    let code = input.trim().to_ascii_uppercase();
    let valid = code.len() == JOIN_CODE_LEN && code.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then_some(code)
}

pub fn random_player_color() -> String {
    let mut rng = rand::rng();
    DEFAULT_PLAYER_COLORS[rng.random_range(0..DEFAULT_PLAYER_COLORS.len())].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_messages_use_action_and_data_keys() {
        let json = serde_json::to_value(ChannelMessage::TimerValueChanged { timer_value: 21000 })
            .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"action": "timerValueChanged", "data": {"timerValue": 21000}})
        );

        let parsed: ChannelMessage =
            serde_json::from_str(r#"{"action":"playersOrGameUpdated"}"#).unwrap();
        assert_eq!(parsed, ChannelMessage::PlayersOrGameUpdated);
    }

    #[test]
    fn local_status_keeps_its_sentinel_wire_value() {
        let json = serde_json::to_string(&GameStatus::LocalOnly).unwrap();
        assert_eq!(json, r#""__localgamestate__""#);
        assert_eq!(GameStatus::LocalOnly.to_string(), "__localgamestate__");
    }

    #[test]
    fn game_update_distinguishes_null_from_absent() {
        let cleared: GameUpdate = serde_json::from_str(r#"{"hostPlayerId":null}"#).unwrap();
        assert_eq!(cleared.host_player_id, Some(None));

        let untouched: GameUpdate = serde_json::from_str(r#"{"paused":true}"#).unwrap();
        assert_eq!(untouched.host_player_id, None);
        assert_eq!(untouched.paused, Some(true));
    }

    #[test]
    fn join_codes_are_upper_cased_and_validated() {
        assert_eq!(normalize_join_code("ab1z"), Some("AB1Z".to_string()));
        assert_eq!(normalize_join_code(" q7rt "), Some("Q7RT".to_string()));
        assert_eq!(normalize_join_code("abc"), None);
        assert_eq!(normalize_join_code("ab-1"), None);
    }

    #[test]
    fn form_converts_turn_length_to_milliseconds() {
        let form = GameForm {
            name: "Catan".into(),
            turn_length: 2,
            turn_length_units: TimeUnits::Minutes,
            game_type: GameType::Online,
        };
        assert_eq!(form.turn_length_ms(), 120_000);

        let local = Game::local(&GameForm {
            turn_length: 10,
            turn_length_units: TimeUnits::Seconds,
            game_type: GameType::Local,
            ..form
        });
        assert!(local.is_local());
        assert_eq!(local.turn_length, 10_000);
        assert_eq!(local.host_player_id.as_deref(), Some(LOCAL_PLAYER_ID));
        assert_eq!(Route::for_game(&local), Route::ManagePlayers);
    }

    #[test]
    fn rejoinable_covers_active_games() {
        let mut game = Game::local(&GameForm {
            name: "x".into(),
            turn_length: 1,
            turn_length_units: TimeUnits::Seconds,
            game_type: GameType::Online,
        });
        game.status = GameStatus::Active;
        assert!(!is_joinable(&game));
        assert!(is_rejoinable(&game));
        game.status = GameStatus::Complete;
        assert!(!is_rejoinable(&game));
    }
}
