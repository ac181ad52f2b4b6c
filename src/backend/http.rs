use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::broker::Broker;
use super::store::MemoryStore;
use crate::error::StoreError;
use crate::transport::game_topic;
use crate::types::*;

#[derive(Clone)]
pub struct BackendState {
    pub store: Arc<MemoryStore>,
    pub broker: Arc<Broker>,
}

impl BackendState {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let broker = Broker::with_presence(store.clone());
        Self { store, broker }
    }
}

impl Default for BackendState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::Rejected(_) => StatusCode::BAD_REQUEST,
            StoreError::Unreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(state: BackendState) -> Router {
    Router::new()
        .route("/game", post(create_game).get(find_games))
        .route("/game/{game_id}", get(get_game).patch(update_game))
        .route("/game/{game_id}/players/order", put(reorder_players))
        .route("/player", post(create_player).get(list_players))
        .route(
            "/player/{player_id}",
            get(get_player).patch(update_player).delete(delete_player),
        )
        .route("/ws", get(ws_handler))
        .with_state(state)
}

// ─── Games ────────────────────────────────────────────────────────

async fn create_game(
    State(state): State<BackendState>,
    Json(form): Json<GameForm>,
) -> Result<(StatusCode, Json<Game>), ApiError> {
    let game = state.store.insert_game(&form)?;
    Ok((StatusCode::CREATED, Json(game)))
}

async fn find_games(
    State(state): State<BackendState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Vec<Game>> {
    let Some(code) = params.get("joinCode") else {
        return Err(StoreError::Rejected("joinCode is required".to_string()).into());
    };
    Ok(Json(state.store.games_by_join_code(code)))
}

async fn get_game(State(state): State<BackendState>, Path(game_id): Path<String>) -> ApiResult<Game> {
    Ok(Json(state.store.game(&game_id)?))
}

async fn update_game(
    State(state): State<BackendState>,
    Path(game_id): Path<String>,
    Json(update): Json<GameUpdate>,
) -> ApiResult<Game> {
    Ok(Json(state.store.patch_game(&game_id, &update)?))
}

async fn reorder_players(
    State(state): State<BackendState>,
    Path(game_id): Path<String>,
    Json(order): Json<Vec<String>>,
) -> ApiResult<Vec<Player>> {
    Ok(Json(state.store.reorder(&game_id, &order)?))
}

// ─── Players ──────────────────────────────────────────────────────

async fn create_player(
    State(state): State<BackendState>,
    Json(new_player): Json<NewPlayer>,
) -> Result<(StatusCode, Json<Player>), ApiError> {
    let player = state
        .store
        .insert_player(&new_player.form, &new_player.game_id)?;
    Ok((StatusCode::CREATED, Json(player)))
}

async fn list_players(
    State(state): State<BackendState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Vec<Player>> {
    let Some(game_id) = params.get("gameId") else {
        return Err(StoreError::Rejected("gameId is required".to_string()).into());
    };
    Ok(Json(state.store.roster(game_id)))
}

async fn get_player(
    State(state): State<BackendState>,
    Path(player_id): Path<String>,
) -> ApiResult<Player> {
    Ok(Json(state.store.player(&player_id)?))
}

async fn update_player(
    State(state): State<BackendState>,
    Path(player_id): Path<String>,
    Json(update): Json<PlayerUpdate>,
) -> ApiResult<Player> {
    Ok(Json(state.store.patch_player(&player_id, &update)?))
}

async fn delete_player(
    State(state): State<BackendState>,
    Path(player_id): Path<String>,
) -> ApiResult<Player> {
    let player = state.store.remove_player(&player_id)?;
    state.broker.broadcast(
        &game_topic(&player.game_id),
        ChannelMessage::PlayersOrGameUpdated,
    );
    Ok(Json(player))
}

// ─── WebSocket ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ClientFrame {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Send {
        destination: String,
        message: ChannelMessage,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ServerFrame {
    Message {
        topic: String,
        message: ChannelMessage,
    },
    Error {
        message: String,
    },
}

type SocketSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<BackendState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: BackendState) {
    let (sender, mut receiver) = socket.split();
    let sender: SocketSink = Arc::new(Mutex::new(sender));

    let session_id = state.broker.open_session();
    tracing::info!(%session_id, "websocket connected");

    let mut subscriptions: HashMap<String, JoinHandle<()>> = HashMap::new();

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else { continue };

        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(%session_id, error = %e, "invalid frame");
                send_frame(&sender, &ServerFrame::Error {
                    message: format!("invalid frame: {e}"),
                })
                .await;
                continue;
            }
        };

        match frame {
            ClientFrame::Subscribe { topic } => {
                if subscriptions.contains_key(&topic) {
                    continue;
                }
                let forward = forward_topic(state.broker.clone(), sender.clone(), topic.clone());
                subscriptions.insert(topic, forward);
            }

            ClientFrame::Unsubscribe { topic } => {
                if let Some(forward) = subscriptions.remove(&topic) {
                    forward.abort();
                }
            }

            ClientFrame::Send {
                destination,
                message,
            } => {
                if let Err(e) = state.broker.publish(&session_id, &destination, message) {
                    send_frame(&sender, &ServerFrame::Error {
                        message: e.to_string(),
                    })
                    .await;
                }
            }
        }
    }

    tracing::info!(%session_id, "websocket disconnected");
    for (_, forward) in subscriptions.drain() {
        forward.abort();
    }
    state.broker.close_session(&session_id);
}

fn forward_topic(broker: Arc<Broker>, sender: SocketSink, topic: String) -> JoinHandle<()> {
    let mut rx = broker.subscribe(&topic);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(inbound) => {
                    let frame = ServerFrame::Message {
                        topic: inbound.topic,
                        message: inbound.message,
                    };
                    if !send_frame(&sender, &frame).await {
                        return;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    })
}

async fn send_frame(sender: &SocketSink, frame: &ServerFrame) -> bool {
    let Ok(json) = serde_json::to_string(frame) else {
        return true;
    };
    let mut s = sender.lock().await;
    s.send(Message::Text(json.into())).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_parse_from_json() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"type":"send","destination":"/timerush/game/g","message":{"action":"gameStarted"}}"#,
        )
        .unwrap();
        assert!(matches!(
            frame,
            ClientFrame::Send { destination, message: ChannelMessage::GameStarted }
                if destination == "/timerush/game/g"
        ));
    }

    #[test]
    fn store_errors_map_to_status_codes() {
        let status = |e: StoreError| ApiError(e).into_response().status();
        assert_eq!(status(StoreError::game_not_found("g")), StatusCode::NOT_FOUND);
        assert_eq!(status(StoreError::Rejected("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(StoreError::Unreachable("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
