//! Connection registry and delivery
//!
//! The `Hub` keeps every live push connection in a single map guarded by a
//! read/write lock: deliveries take the read side, register/unregister take
//! the write side. Delivery never waits on a mailbox; a full or closed
//! mailbox gets its connection evicted instead.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc::error::TrySendError, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::config::HubConfig;
use super::connection::{Connection, ConnectionId, ConnectionState, Mailbox, Outbound, SubscriberId};
use super::message::EventMessage;
use crate::worker::spawn_periodic;

/// Outcome of a single delivery attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections that accepted the message into their mailbox
    pub delivered: usize,
    /// Connections removed because their mailbox was full or closed
    pub evicted: usize,
}

/// Registry of live push connections
///
/// Cheap to clone; every clone shares the same registry. Hubs are plain
/// values, so tests can run any number of independent hubs side by side.
///
/// # Example
///
/// ```rust,ignore
/// let hub = Hub::new(HubConfig::default());
/// let (connection, mailbox) = hub.open("42");
/// hub.register(connection).await;
///
/// hub.send_to_subscriber(&"42".into(), &EventMessage::new("grade.posted", data)).await;
/// ```
#[derive(Debug, Clone)]
pub struct Hub {
    connections: Arc<RwLock<HashMap<ConnectionId, Connection>>>,
    config: Arc<HubConfig>,
    closing: CancellationToken,
}

impl Hub {
    /// Create an empty hub
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            config: Arc::new(config),
            closing: CancellationToken::new(),
        }
    }

    /// Hub configuration
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Open a connection sized by this hub's mailbox capacity
    ///
    /// The connection is not registered yet; the transport registers it once
    /// the handshake has completed.
    #[must_use]
    pub fn open(&self, subscriber: impl Into<SubscriberId>) -> (Connection, Mailbox) {
        Connection::open(subscriber, self.config.mailbox_capacity)
    }

    /// Add a connection to the registry
    ///
    /// Returns `false` if a connection with the same ID is already registered
    /// or the hub is closing, in which case the registry is left untouched.
    pub async fn register(&self, connection: Connection) -> bool {
        let id = connection.id();
        let subscriber = connection.subscriber().clone();
        let mut connections = self.connections.write().await;
        if self.closing.is_cancelled() || connections.contains_key(&id) {
            return false;
        }
        connection.link().transition(ConnectionState::Registered);
        connections.insert(id, connection);
        drop(connections);

        tracing::debug!(connection_id = %id, subscriber = %subscriber, "Connection registered");
        true
    }

    /// Remove a connection and close its mailbox
    ///
    /// Safe to call any number of times; returns `true` only for the call
    /// that actually removed the connection.
    pub async fn unregister(&self, id: &ConnectionId) -> bool {
        let removed = self.connections.write().await.remove(id);
        match removed {
            Some(connection) => {
                connection.link().transition(ConnectionState::Draining);
                connection.link().close();
                tracing::debug!(
                    connection_id = %id,
                    subscriber = %connection.subscriber(),
                    "Connection unregistered"
                );
                true
            }
            None => false,
        }
    }

    /// Deliver a message to every connection of one subscriber
    pub async fn send_to_subscriber(
        &self,
        subscriber: &SubscriberId,
        message: &EventMessage,
    ) -> DeliveryReport {
        let Some(frame) = encode_or_log(message) else {
            return DeliveryReport::default();
        };
        let report = self
            .deliver(Outbound::Event(frame), |c| c.subscriber() == subscriber)
            .await;
        tracing::debug!(
            subscriber = %subscriber,
            kind = %message.kind,
            delivered = report.delivered,
            evicted = report.evicted,
            "Targeted delivery completed"
        );
        report
    }

    /// Deliver a message to every registered connection
    pub async fn broadcast(&self, message: &EventMessage) -> DeliveryReport {
        let Some(frame) = encode_or_log(message) else {
            return DeliveryReport::default();
        };
        let report = self.deliver(Outbound::Event(frame), |_| true).await;
        tracing::debug!(
            kind = %message.kind,
            delivered = report.delivered,
            evicted = report.evicted,
            "Broadcast completed"
        );
        report
    }

    /// Current number of registered connections (advisory)
    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Number of registered connections for one subscriber (advisory)
    pub async fn subscriber_count(&self, subscriber: &SubscriberId) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| c.subscriber() == subscriber)
            .count()
    }

    /// Check if a connection is registered
    pub async fn is_registered(&self, id: &ConnectionId) -> bool {
        self.connections.read().await.contains_key(id)
    }

    /// Ping every connection and evict the ones that went silent
    ///
    /// A connection is dead when nothing was heard from it within
    /// `ping_interval + pong_timeout` of `now`.
    pub async fn heartbeat(&self, now: DateTime<Utc>) -> DeliveryReport {
        let window = chrono::Duration::from_std(self.config.liveness_window())
            .unwrap_or_else(|_| chrono::Duration::seconds(40));

        let mut stale = Vec::new();
        {
            let connections = self.connections.read().await;
            for (id, connection) in connections.iter() {
                if now - connection.link().last_seen() > window {
                    stale.push(*id);
                }
            }
        }
        for id in &stale {
            tracing::info!(connection_id = %id, "Pong timeout, evicting connection");
            self.unregister(id).await;
        }

        let mut report = self.deliver(Outbound::Ping, |_| true).await;
        report.evicted += stale.len();
        report
    }

    /// Run [`heartbeat`](Self::heartbeat) every ping interval until cancelled
    pub fn spawn_heartbeat(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let hub = self.clone();
        spawn_periodic("hub-heartbeat", self.config.ping_interval(), cancel, move || {
            let hub = hub.clone();
            async move {
                let report = hub.heartbeat(Utc::now()).await;
                if report.evicted > 0 {
                    tracing::info!(evicted = report.evicted, "Heartbeat evicted dead connections");
                }
            }
        })
    }

    /// Whether [`close_all`](Self::close_all) has been called
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.closing.is_cancelled()
    }

    /// Unregister every connection and refuse new ones (hub shutdown)
    pub async fn close_all(&self) -> usize {
        self.closing.cancel();
        let drained: Vec<Connection> = self
            .connections
            .write()
            .await
            .drain()
            .map(|(_, c)| c)
            .collect();
        for connection in &drained {
            connection.link().transition(ConnectionState::Draining);
            connection.link().close();
        }
        tracing::info!(closed = drained.len(), "Hub closed all connections");
        drained.len()
    }

    /// Offer `item` to every matching mailbox without waiting, then evict
    /// the connections that could not take it
    async fn deliver<F>(&self, item: Outbound, matches: F) -> DeliveryReport
    where
        F: Fn(&Connection) -> bool,
    {
        let mut report = DeliveryReport::default();
        let mut overflowed = Vec::new();
        {
            let connections = self.connections.read().await;
            for (id, connection) in connections.iter().filter(|(_, c)| matches(c)) {
                match connection.try_deliver(item.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(
                            connection_id = %id,
                            subscriber = %connection.subscriber(),
                            "Mailbox full, evicting slow consumer"
                        );
                        overflowed.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => overflowed.push(*id),
                }
            }
        }
        for id in &overflowed {
            if self.unregister(id).await {
                report.evicted += 1;
            }
        }
        report
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

fn encode_or_log(message: &EventMessage) -> Option<Arc<str>> {
    match message.encode() {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::error!(kind = %message.kind, error = %e, "Failed to encode push message");
            None
        }
    }
}
