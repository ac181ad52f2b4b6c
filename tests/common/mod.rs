#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use timerush::backend::{Broker, BrokerChannel, MemoryStore};
use timerush::config::ClientConfig;
use timerush::error::{StoreError, TransportError};
use timerush::persistence::MemoryStorage;
use timerush::store::RemoteStore;
use timerush::transport::{InboundMessage, LinkStatus, TransportChannel};
use timerush::types::*;
use timerush::{Action, Collaborators, Notice, Orchestrator};

pub fn test_config() -> ClientConfig {
    ClientConfig {
        connection_timeout_ms: 200,
        ack_timeout_ms: 200,
        reconnect_backoff_ms: 10,
        heartbeat_period_ms: 0,
        max_connect_attempts: 2,
        ..ClientConfig::default()
    }
}

pub fn local_form(name: &str, seconds: u64) -> GameForm {
    GameForm {
        name: name.into(),
        turn_length: seconds,
        turn_length_units: TimeUnits::Seconds,
        game_type: GameType::Local,
    }
}

pub fn online_form(name: &str, seconds: u64) -> GameForm {
    GameForm {
        game_type: GameType::Online,
        ..local_form(name, seconds)
    }
}

pub fn player_form(name: &str) -> PlayerForm {
    PlayerForm {
        name: name.into(),
        color: DEFAULT_PLAYER_COLORS[3].into(),
    }
}

/// Store wrapper that records the name of every call.
pub struct RecordingStore {
    pub inner: Arc<MemoryStore>,
    calls: Mutex<Vec<&'static str>>,
}

impl RecordingStore {
    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteStore for RecordingStore {
    async fn create_game(&self, form: &GameForm) -> Result<Game, StoreError> {
        self.record("create_game");
        self.inner.create_game(form).await
    }

    async fn get_game(&self, game_id: &str) -> Result<Game, StoreError> {
        self.record("get_game");
        self.inner.get_game(game_id).await
    }

    async fn get_games_by_join_code(&self, join_code: &str) -> Result<Vec<Game>, StoreError> {
        self.record("get_games_by_join_code");
        self.inner.get_games_by_join_code(join_code).await
    }

    async fn update_game(&self, game_id: &str, update: &GameUpdate) -> Result<Game, StoreError> {
        self.record("update_game");
        self.inner.update_game(game_id, update).await
    }

    async fn create_player(&self, form: &PlayerForm, game_id: &str) -> Result<Player, StoreError> {
        self.record("create_player");
        self.inner.create_player(form, game_id).await
    }

    async fn get_player(&self, player_id: &str) -> Result<Player, StoreError> {
        self.record("get_player");
        self.inner.get_player(player_id).await
    }

    async fn get_players_by_game_id(&self, game_id: &str) -> Result<Vec<Player>, StoreError> {
        self.record("get_players_by_game_id");
        self.inner.get_players_by_game_id(game_id).await
    }

    async fn update_player(
        &self,
        player_id: &str,
        update: &PlayerUpdate,
    ) -> Result<Player, StoreError> {
        self.record("update_player");
        self.inner.update_player(player_id, update).await
    }

    async fn delete_player(&self, player_id: &str) -> Result<Player, StoreError> {
        self.record("delete_player");
        self.inner.delete_player(player_id).await
    }

    async fn reorder_players(
        &self,
        game_id: &str,
        order: &[String],
    ) -> Result<Vec<Player>, StoreError> {
        self.record("reorder_players");
        self.inner.reorder_players(game_id, order).await
    }
}

/// Broker channel wrapper that records calls and can refuse subscriptions.
pub struct RecordingTransport {
    pub inner: BrokerChannel,
    calls: Mutex<Vec<&'static str>>,
    refuse_subscribe: AtomicBool,
}

impl RecordingTransport {
    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn refuse_subscribe(&self, refuse: bool) {
        self.refuse_subscribe.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransportChannel for RecordingTransport {
    async fn activate(&self) -> Result<(), TransportError> {
        self.record("activate");
        self.inner.activate().await
    }

    async fn deactivate(&self) {
        self.record("deactivate");
        self.inner.deactivate().await
    }

    fn link_status(&self) -> watch::Receiver<LinkStatus> {
        self.inner.link_status()
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.record("subscribe");
        if self.refuse_subscribe.load(Ordering::SeqCst) {
            return Err(TransportError::SubscribeFailed(topic.to_string()));
        }
        self.inner.subscribe(topic).await
    }

    async fn unsubscribe_all(&self) {
        self.record("unsubscribe_all");
        self.inner.unsubscribe_all().await
    }

    async fn publish(
        &self,
        destination: &str,
        message: &ChannelMessage,
    ) -> Result<(), TransportError> {
        self.record("publish");
        self.inner.publish(destination, message).await
    }

    fn messages(&self) -> broadcast::Receiver<InboundMessage> {
        self.inner.messages()
    }
}

/// One shared backend.
pub struct World {
    pub store: Arc<MemoryStore>,
    pub broker: Arc<Broker>,
}

impl World {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let broker = Broker::with_presence(store.clone());
        Self { store, broker }
    }

    pub fn client(&self) -> Client {
        self.client_with_storage(Arc::new(MemoryStorage::new()))
    }

    pub fn client_with_storage(&self, storage: Arc<MemoryStorage>) -> Client {
        let store = Arc::new(RecordingStore {
            inner: self.store.clone(),
            calls: Mutex::new(Vec::new()),
        });
        let transport = Arc::new(RecordingTransport {
            inner: BrokerChannel::new(self.broker.clone()),
            calls: Mutex::new(Vec::new()),
            refuse_subscribe: AtomicBool::new(false),
        });
        let orchestrator = Orchestrator::new(
            Collaborators {
                store: store.clone(),
                transport: transport.clone(),
                persistence: storage.clone(),
            },
            test_config(),
        );
        Client {
            orchestrator,
            store,
            transport,
            storage,
        }
    }
}

/// An orchestrator driven directly, plus its recording collaborators.
pub struct Client {
    pub orchestrator: Orchestrator,
    pub store: Arc<RecordingStore>,
    pub transport: Arc<RecordingTransport>,
    pub storage: Arc<MemoryStorage>,
}

impl Client {
    pub async fn dispatch(&mut self, action: Action) {
        self.orchestrator.dispatch(action).await;
    }

    /// Delivers one tick from the currently running tick source.
    pub async fn tick(&mut self) {
        let generation = self.orchestrator.timer().generation();
        self.dispatch(Action::TimerTicked { generation }).await;
    }

    pub fn player_id(&self, name: &str) -> String {
        self.orchestrator
            .state()
            .players
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.id.clone())
            .unwrap_or_else(|| panic!("no player named {name}"))
    }

    pub fn active_player_id(&self) -> Option<String> {
        self.orchestrator
            .state()
            .game
            .as_ref()
            .and_then(|g| g.active_player_id.clone())
    }
}

pub fn drain(rx: &mut broadcast::Receiver<Notice>) -> Vec<Notice> {
    let mut notices = Vec::new();
    while let Ok(notice) = rx.try_recv() {
        notices.push(notice);
    }
    notices
}

pub fn errors(notices: &[Notice]) -> Vec<(String, String)> {
    notices
        .iter()
        .filter_map(|n| match n {
            Notice::Error { summary, detail } => Some((summary.clone(), detail.clone())),
            Notice::Navigate(_) => None,
        })
        .collect()
}
