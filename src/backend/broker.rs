use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;

use super::store::MemoryStore;
use crate::error::TransportError;
use crate::transport::{
    CONNECT_DESTINATION, InboundMessage, LinkStatus, TransportChannel, ack_topic, game_topic,
    topic_for_destination,
};
use crate::types::ChannelMessage;

const TOPIC_CAPACITY: usize = 64;

/// Topic fan-out shared by every session.
///
/// A `connect` handshake binds a session to a player; closing that session
/// marks the player disconnected in the presence store and tells the game.
pub struct Broker {
    /// topic -> subscribers
    topics: DashMap<String, broadcast::Sender<InboundMessage>>,
    /// session_id -> player bound by handshake
    sessions: DashMap<String, Option<String>>,
    presence: Option<Arc<MemoryStore>>,
    reachable: AtomicBool,
    acknowledge: AtomicBool,
}

impl Broker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    pub fn with_presence(store: Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(Self::build(Some(store)))
    }

    fn build(presence: Option<Arc<MemoryStore>>) -> Self {
        Self {
            topics: DashMap::new(),
            sessions: DashMap::new(),
            presence,
            reachable: AtomicBool::new(true),
            acknowledge: AtomicBool::new(true),
        }
    }

    /// While unreachable, channels activate but never connect.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Whether handshakes are answered with a `connectAck`.
    pub fn set_acknowledge(&self, acknowledge: bool) {
        self.acknowledge.store(acknowledge, Ordering::SeqCst);
    }

    pub fn open_session(&self) -> String {
        let session_id = uuid::Uuid::new_v4().to_string();
        self.sessions.insert(session_id.clone(), None);
        tracing::info!(%session_id, "session opened");
        session_id
    }

    pub fn close_session(&self, session_id: &str) {
        let Some((_, player_id)) = self.sessions.remove(session_id) else {
            return;
        };
        tracing::info!(session_id, ?player_id, "session closed");

        let (Some(store), Some(player_id)) = (&self.presence, player_id) else {
            return;
        };
        // Another session may still speak for the same player.
        if self
            .sessions
            .iter()
            .any(|s| s.value().as_deref() == Some(player_id.as_str()))
        {
            return;
        }
        if let Some(game_id) = store.mark_disconnected(&player_id) {
            self.broadcast(&game_topic(&game_id), ChannelMessage::PlayersOrGameUpdated);
        }
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<InboundMessage> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    /// Delivers to current subscribers of `topic`, if any.
    pub fn broadcast(&self, topic: &str, message: ChannelMessage) {
        if let Some(sender) = self.topics.get(topic) {
            let _ = sender.send(InboundMessage {
                topic: topic.to_string(),
                message,
            });
        }
    }

    pub fn publish(
        &self,
        session_id: &str,
        destination: &str,
        message: ChannelMessage,
    ) -> Result<(), TransportError> {
        if !self.sessions.contains_key(session_id) {
            return Err(TransportError::NotConnected);
        }

        if destination == CONNECT_DESTINATION {
            if let ChannelMessage::Connect { player_id } = &message {
                self.handshake(session_id, player_id);
            }
            return Ok(());
        }

        let topic = topic_for_destination(destination)
            .ok_or_else(|| TransportError::InvalidDestination(destination.to_string()))?;
        self.broadcast(&topic, message);
        Ok(())
    }

    fn handshake(&self, session_id: &str, player_id: &str) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            *session = Some(player_id.to_string());
        }

        if let Some(store) = &self.presence {
            if let Some(game_id) = store.mark_connected(player_id) {
                self.broadcast(&game_topic(&game_id), ChannelMessage::PlayersOrGameUpdated);
            }
        }

        if self.acknowledge.load(Ordering::SeqCst) {
            self.broadcast(
                &ack_topic(player_id),
                ChannelMessage::ConnectAck {
                    player_id: player_id.to_string(),
                },
            );
        }
    }
}

/// In-process [`TransportChannel`] over a shared [`Broker`].
pub struct BrokerChannel {
    broker: Arc<Broker>,
    session: Mutex<Option<String>>,
    status_tx: watch::Sender<LinkStatus>,
    inbound_tx: broadcast::Sender<InboundMessage>,
    forwards: Mutex<Vec<JoinHandle<()>>>,
}

impl BrokerChannel {
    pub fn new(broker: Arc<Broker>) -> Self {
        let (status_tx, _) = watch::channel(LinkStatus::Disconnected);
        let (inbound_tx, _) = broadcast::channel(TOPIC_CAPACITY);
        Self {
            broker,
            session: Mutex::new(None),
            status_tx,
            inbound_tx,
            forwards: Mutex::new(Vec::new()),
        }
    }

    /// Drops the connection from the broker side, as a network failure would.
    pub async fn sever(&self) {
        tracing::warn!("severing broker link");
        self.close().await;
    }

    async fn close(&self) {
        for handle in self.forwards.lock().await.drain(..) {
            handle.abort();
        }
        if let Some(session_id) = self.session.lock().await.take() {
            self.broker.close_session(&session_id);
        }
        self.status_tx.send_replace(LinkStatus::Disconnected);
    }
}

#[async_trait]
impl TransportChannel for BrokerChannel {
    async fn activate(&self) -> Result<(), TransportError> {
        if !self.broker.is_reachable() {
            tracing::warn!("broker unreachable, link stays down");
            return Ok(());
        }
        let mut session = self.session.lock().await;
        if session.is_none() {
            *session = Some(self.broker.open_session());
        }
        self.status_tx.send_replace(LinkStatus::Connected);
        Ok(())
    }

    async fn deactivate(&self) {
        self.close().await;
    }

    fn link_status(&self) -> watch::Receiver<LinkStatus> {
        self.status_tx.subscribe()
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        if self.session.lock().await.is_none() {
            return Err(TransportError::NotConnected);
        }

        let mut rx = self.broker.subscribe(topic);
        let inbound_tx = self.inbound_tx.clone();
        let forward = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => {
                        let _ = inbound_tx.send(msg);
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.forwards.lock().await.push(forward);
        Ok(())
    }

    async fn unsubscribe_all(&self) {
        for handle in self.forwards.lock().await.drain(..) {
            handle.abort();
        }
    }

    async fn publish(
        &self,
        destination: &str,
        message: &ChannelMessage,
    ) -> Result<(), TransportError> {
        let session = self.session.lock().await;
        let session_id = session.as_deref().ok_or(TransportError::NotConnected)?;
        self.broker.publish(session_id, destination, message.clone())
    }

    fn messages(&self) -> broadcast::Receiver<InboundMessage> {
        self.inbound_tx.subscribe()
    }
}

impl Drop for BrokerChannel {
    fn drop(&mut self) {
        for handle in self.forwards.get_mut().drain(..) {
            handle.abort();
        }
        if let Some(session_id) = self.session.get_mut().take() {
            self.broker.close_session(&session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::game_destination;
    use crate::types::{GameForm, GameType, PlayerForm, TimeUnits};

    fn seeded() -> (Arc<MemoryStore>, String, String, String) {
        let store = Arc::new(MemoryStore::new());
        let game = store
            .insert_game(&GameForm {
                name: "Test".into(),
                turn_length: 1,
                turn_length_units: TimeUnits::Minutes,
                game_type: GameType::Online,
            })
            .unwrap();
        let form = |name: &str| PlayerForm {
            name: name.into(),
            color: "#F38141".into(),
        };
        let a = store.insert_player(&form("a"), &game.id).unwrap();
        let b = store.insert_player(&form("b"), &game.id).unwrap();
        (store, game.id, a.id, b.id)
    }

    #[tokio::test]
    async fn publish_reaches_topic_subscribers() {
        let broker = Broker::new();
        let session = broker.open_session();
        let mut rx = broker.subscribe(&game_topic("g"));

        broker
            .publish(&session, &game_destination("g"), ChannelMessage::GameStarted)
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, game_topic("g"));
        assert_eq!(received.message, ChannelMessage::GameStarted);
    }

    #[test]
    fn publish_rejects_unknown_sessions_and_destinations() {
        let broker = Broker::new();
        assert_eq!(
            broker.publish("nope", &game_destination("g"), ChannelMessage::GameStarted),
            Err(TransportError::NotConnected)
        );
        let session = broker.open_session();
        assert_eq!(
            broker.publish(&session, "/elsewhere", ChannelMessage::GameStarted),
            Err(TransportError::InvalidDestination("/elsewhere".into()))
        );
    }

    #[tokio::test]
    async fn closing_a_bound_session_disconnects_the_player() {
        let (store, game_id, a, b) = seeded();
        let broker = Broker::with_presence(store.clone());
        let mut updates = broker.subscribe(&game_topic(&game_id));

        let session = broker.open_session();
        broker
            .publish(
                &session,
                CONNECT_DESTINATION,
                ChannelMessage::Connect { player_id: a.clone() },
            )
            .unwrap();
        // First handshake claims the empty host seat.
        assert_eq!(
            updates.recv().await.unwrap().message,
            ChannelMessage::PlayersOrGameUpdated
        );

        broker.close_session(&session);
        assert_eq!(
            updates.recv().await.unwrap().message,
            ChannelMessage::PlayersOrGameUpdated
        );
        assert!(!store.player(&a).unwrap().connected);
        assert_eq!(store.game(&game_id).unwrap().host_player_id, Some(b));
    }

    #[tokio::test]
    async fn severed_channel_reports_disconnected() {
        let channel = BrokerChannel::new(Broker::new());
        let mut status = channel.link_status();
        channel.activate().await.unwrap();
        assert!(channel.is_connected());

        channel.sever().await;
        status
            .wait_for(|s| *s == LinkStatus::Disconnected)
            .await
            .unwrap();
        assert_eq!(
            channel
                .publish(&game_destination("g"), &ChannelMessage::GameStarted)
                .await,
            Err(TransportError::NotConnected)
        );
    }
}
