use std::time::Duration;

use thiserror::Error;

/// Failures reported by a [`RemoteStore`](crate::store::RemoteStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("store unreachable: {0}")]
    Unreachable(String),
}

impl StoreError {
    pub fn game_not_found(id: &str) -> Self {
        Self::NotFound {
            entity: "game",
            id: id.to_string(),
        }
    }

    pub fn player_not_found(id: &str) -> Self {
        Self::NotFound {
            entity: "player",
            id: id.to_string(),
        }
    }
}

/// Failures reported by a [`TransportChannel`](crate::transport::TransportChannel)
/// or by the reconnection protocol driving it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("broker unreachable")]
    Unreachable,
    #[error("connection not established within {0:?}")]
    ConnectTimeout(Duration),
    #[error("failed to subscribe to {0}")]
    SubscribeFailed(String),
    #[error("invalid destination {0}")]
    InvalidDestination(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid {name}: {value}")]
    InvalidVar { name: &'static str, value: String },
}
