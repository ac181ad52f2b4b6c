//! Session (re)establishment against the broker.
//!
//! `Disconnected -> Connecting -> AwaitingAck -> Synced`, falling back to
//! `Disconnected` on any transport failure. The handshake ack only feeds the
//! message delay estimate; a missing ack never blocks reaching `Synced`.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::transport::{
    CONNECT_DESTINATION, InboundMessage, LinkStatus, TransportChannel, ack_topic, game_topic,
};
use crate::types::ChannelMessage;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    #[default]
    Disconnected,
    Connecting,
    AwaitingAck,
    Synced,
}

/// An established session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub game_topic: String,
    pub message_delay: Option<Duration>,
}

/// Reconnect delays: each step doubles, and every wait lands in the upper
/// half of its step.
#[derive(Debug, Clone)]
pub struct Backoff {
    step: Duration,
}

impl Backoff {
    pub fn new(initial: Duration) -> Self {
        Self { step: initial }
    }

    /// The wait before the next attempt. Advances to the following step.
    pub fn next_delay(&mut self, rng: &mut impl Rng) -> Duration {
        let step_ms = u64::try_from(self.step.as_millis()).unwrap_or(u64::MAX);
        self.step = self.step.saturating_mul(2);
        let floor_ms = step_ms - step_ms / 2;
        Duration::from_millis(rng.random_range(floor_ms..=step_ms))
    }
}

/// Runs [`connect_once`] up to `attempts` times, waiting out a [`Backoff`] between tries.
pub async fn establish(
    transport: &dyn TransportChannel,
    game_id: &str,
    player_id: &str,
    config: &ClientConfig,
    attempts: u32,
    on_phase: &mut (dyn FnMut(SessionPhase) + Send),
) -> Result<Link, TransportError> {
    let attempts = attempts.max(1);
    let mut backoff = Backoff::new(config.reconnect_backoff());
    let mut last_error = TransportError::NotConnected;

    for attempt in 1..=attempts {
        match connect_once(transport, game_id, player_id, config, on_phase).await {
            Ok(link) => {
                tracing::info!(attempt, game_id, player_id, "session synced");
                return Ok(link);
            }
            Err(e) => {
                tracing::warn!(attempt, attempts, error = %e, "connect attempt failed");
                last_error = e;
            }
        }
        if attempt < attempts {
            let delay = backoff.next_delay(&mut rand::rng());
            tokio::time::sleep(delay).await;
        }
    }
    Err(last_error)
}

/// One pass through the connect state machine.
pub async fn connect_once(
    transport: &dyn TransportChannel,
    game_id: &str,
    player_id: &str,
    config: &ClientConfig,
    on_phase: &mut (dyn FnMut(SessionPhase) + Send),
) -> Result<Link, TransportError> {
    on_phase(SessionPhase::Connecting);

    let mut status = transport.link_status();
    if let Err(e) = transport.activate().await {
        on_phase(SessionPhase::Disconnected);
        return Err(e);
    }

    let wait_connected = async {
        status
            .wait_for(|s| *s == LinkStatus::Connected)
            .await
            .map(|_| ())
    };
    let connected = matches!(
        tokio::time::timeout(config.connection_timeout(), wait_connected).await,
        Ok(Ok(()))
    );
    if !connected {
        tracing::warn!(game_id, "transport did not connect in time");
        transport.deactivate().await;
        on_phase(SessionPhase::Disconnected);
        return Err(TransportError::ConnectTimeout(config.connection_timeout()));
    }

    let topic = game_topic(game_id);
    for target in [topic.clone(), ack_topic(player_id)] {
        if let Err(e) = transport.subscribe(&target).await {
            tracing::warn!(topic = %target, error = %e, "subscribe failed");
            transport.deactivate().await;
            on_phase(SessionPhase::Disconnected);
            return Err(TransportError::SubscribeFailed(target));
        }
    }

    on_phase(SessionPhase::AwaitingAck);
    let mut inbound = transport.messages();
    let sent_at = Instant::now();
    let handshake = ChannelMessage::Connect {
        player_id: player_id.to_string(),
    };
    if let Err(e) = transport.publish(CONNECT_DESTINATION, &handshake).await {
        tracing::warn!(error = %e, "handshake publish failed");
    }

    let acked = tokio::time::timeout(config.ack_timeout(), wait_for_ack(&mut inbound, player_id))
        .await
        .is_ok();
    let message_delay = acked.then(|| sent_at.elapsed() / 2);
    if !acked {
        tracing::warn!(player_id, "handshake ack not received, continuing");
    }

    on_phase(SessionPhase::Synced);
    Ok(Link {
        game_topic: topic,
        message_delay,
    })
}

async fn wait_for_ack(inbound: &mut broadcast::Receiver<InboundMessage>, player_id: &str) {
    loop {
        match inbound.recv().await {
            Ok(InboundMessage {
                message: ChannelMessage::ConnectAck { player_id: acked },
                ..
            }) if acked == player_id => return,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

/// Detects that the whole process was suspended, from gaps between beats.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    period_ms: i64,
    tolerance: f64,
    last_beat_ms: Option<i64>,
}

impl Heartbeat {
    pub fn new(period: Duration, tolerance: f64) -> Self {
        Self {
            period_ms: period.as_millis() as i64,
            tolerance,
            last_beat_ms: None,
        }
    }

    /// Records a beat at wall-clock `now_ms`. True when the gap since the
    /// previous beat exceeds `tolerance` periods.
    pub fn beat(&mut self, now_ms: i64) -> bool {
        let limit = self.period_ms as f64 * self.tolerance;
        let woke = self
            .last_beat_ms
            .is_some_and(|last| (now_ms - last) as f64 > limit);
        self.last_beat_ms = Some(now_ms);
        woke
    }
}

/// Beats every `period` on the wall clock and signals `wake_tx` after a suspend.
pub fn spawn_heartbeat(
    period: Duration,
    tolerance: f64,
    wake_tx: mpsc::UnboundedSender<()>,
) -> JoinHandle<()> {
    spawn_heartbeat_with(period, tolerance, || Utc::now().timestamp_millis(), wake_tx)
}

/// [`spawn_heartbeat`] reading milliseconds from `clock`.
pub fn spawn_heartbeat_with(
    period: Duration,
    tolerance: f64,
    clock: impl Fn() -> i64 + Send + 'static,
    wake_tx: mpsc::UnboundedSender<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut heartbeat = Heartbeat::new(period, tolerance);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if heartbeat.beat(clock()) {
                tracing::info!("heartbeat gap detected, re-initializing session");
                if wake_tx.send(()).is_err() {
                    return;
                }
            }
        }
    })
}
