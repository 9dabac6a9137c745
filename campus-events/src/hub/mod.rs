//! Real-time push hub
//!
//! Keeps track of every live push connection and delivers JSON envelopes
//! `{"type": ..., "data": ...}` to one subscriber or to everyone.
//!
//! ## Delivery policy
//!
//! - A send never blocks on a slow client: each connection owns a bounded
//!   mailbox and a full mailbox gets its connection evicted.
//! - One subscriber may hold several connections; targeted sends reach all
//!   of them and nobody else.
//! - Connections that stop answering pings within
//!   `ping_interval + pong_timeout` are evicted by the heartbeat.
//!
//! ## Example
//!
//! ```rust,ignore
//! use campus_events::hub::{routes, EventMessage, Hub, HubConfig};
//!
//! let hub = Hub::new(HubConfig::default());
//! let app = routes(hub.clone());
//!
//! hub.broadcast(&EventMessage::new("schedule.updated", json!({"week": 42}))).await;
//! ```

mod config;
mod connection;
mod message;
mod registry;
mod transport;

pub use config::HubConfig;
pub use connection::{
    Connection, ConnectionId, ConnectionState, Link, Mailbox, Outbound, SubscriberId,
};
pub use message::EventMessage;
pub use registry::{DeliveryReport, Hub};
pub use transport::{pump, routes, ws_handler};

// Re-export axum WebSocket types for convenience
pub use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
