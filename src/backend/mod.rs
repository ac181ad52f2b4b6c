//! Development backend: an in-memory game store, a topic broker and the
//! HTTP/WebSocket surface exposing both.

pub mod broker;
pub mod http;
pub mod store;

pub use broker::{Broker, BrokerChannel};
pub use http::{BackendState, router};
pub use store::MemoryStore;
