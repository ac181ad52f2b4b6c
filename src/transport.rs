//! Message channel toward the broker, and the topic naming shared by both ends.

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use crate::error::TransportError;
use crate::types::ChannelMessage;

/// Prefix of topics clients subscribe to.
pub const INCOMING_PREFIX: &str = "/topic";
/// Prefix of destinations clients publish to.
pub const OUTGOING_PREFIX: &str = "/timerush";
/// Destination of the session handshake.
pub const CONNECT_DESTINATION: &str = "/timerush/connect";

pub fn game_topic(game_id: &str) -> String {
    format!("{INCOMING_PREFIX}/game/{game_id}")
}

pub fn game_destination(game_id: &str) -> String {
    format!("{OUTGOING_PREFIX}/game/{game_id}")
}

/// Per-player topic carrying the handshake acknowledgment.
pub fn ack_topic(player_id: &str) -> String {
    format!("{INCOMING_PREFIX}/connect/{player_id}")
}

/// Maps a publish destination onto the topic its subscribers listen on.
pub fn topic_for_destination(destination: &str) -> Option<String> {
    let rest = destination.strip_prefix(OUTGOING_PREFIX)?;
    rest.starts_with('/')
        .then(|| format!("{INCOMING_PREFIX}{rest}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub message: ChannelMessage,
}

/// Bidirectional broker connection.
///
/// `activate` only starts connecting; completion is observed through
/// [`link_status`](TransportChannel::link_status). The inbound stream returned
/// by [`messages`](TransportChannel::messages) survives deactivation, so one
/// receiver can follow the channel across reconnects.
#[async_trait]
pub trait TransportChannel: Send + Sync {
    async fn activate(&self) -> Result<(), TransportError>;
    async fn deactivate(&self);
    fn link_status(&self) -> watch::Receiver<LinkStatus>;
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;
    async fn unsubscribe_all(&self);
    async fn publish(
        &self,
        destination: &str,
        message: &ChannelMessage,
    ) -> Result<(), TransportError>;
    fn messages(&self) -> broadcast::Receiver<InboundMessage>;

    fn is_connected(&self) -> bool {
        *self.link_status().borrow() == LinkStatus::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destinations_map_onto_incoming_topics() {
        assert_eq!(
            topic_for_destination(&game_destination("g1")),
            Some(game_topic("g1"))
        );
        assert_eq!(topic_for_destination("/timerush"), None);
        assert_eq!(topic_for_destination("/topic/game/g1"), None);
        assert_eq!(topic_for_destination("/timerushx/a"), None);
    }
}
