//! Connection identity, lifecycle state and mailbox halves

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique identifier for a physical push connection
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new unique connection ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity a connection subscribes under
///
/// Not unique: one user may hold several concurrent connections
/// (browser tabs, devices) and each receives targeted messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberId(String);

impl SubscriberId {
    /// Create a subscriber ID
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the subscriber ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for SubscriberId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SubscriberId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SubscriberId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle of a push connection
///
/// `Connecting → Registered → Draining → Closed`. `Closed` is terminal;
/// a client that wants to keep receiving must open a new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Handshake in progress, not yet in the registry
    Connecting = 0,
    /// Member of the registry, receiving deliveries
    Registered = 1,
    /// Removed from the registry, transport winding down
    Draining = 2,
    /// Transport released
    Closed = 3,
}

impl ConnectionState {
    /// Whether the state machine allows moving from `self` to `next`
    #[must_use]
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Registered)
                | (Connecting, Draining)
                | (Connecting, Closed)
                | (Registered, Draining)
                | (Draining, Closed)
        )
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Registered,
            2 => Self::Draining,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Registered => write!(f, "registered"),
            Self::Draining => write!(f, "draining"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// State shared between the registry entry and the transport adapter
#[derive(Debug)]
pub struct Link {
    state: AtomicU8,
    last_seen_ms: AtomicI64,
    closed: CancellationToken,
}

impl Link {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            last_seen_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            closed: CancellationToken::new(),
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Attempt a state transition; returns `false` if the edge is not allowed
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if !ConnectionState::from_u8(current).can_transition_to(next) {
                return false;
            }
            match self.state.compare_exchange(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Record inbound traffic from the client
    pub fn touch(&self) {
        self.touch_at(Utc::now());
    }

    /// Record inbound traffic at a specific instant
    pub fn touch_at(&self, at: DateTime<Utc>) {
        self.last_seen_ms
            .store(at.timestamp_millis(), Ordering::Release);
    }

    /// When the client was last heard from
    #[must_use]
    pub fn last_seen(&self) -> DateTime<Utc> {
        let ms = self.last_seen_ms.load(Ordering::Acquire);
        Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
    }

    /// Signal the transport that the hub has let go of this connection
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Resolves once the hub has closed the connection
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Whether the close signal has fired
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Item queued in a connection's mailbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized `{type, data}` envelope, shared across recipients
    Event(Arc<str>),
    /// Keepalive probe
    Ping,
}

/// Registry entry for a live push connection
///
/// Owns the only sender of the mailbox, so removing the entry from the hub
/// closes the mailbox.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    subscriber: SubscriberId,
    mailbox: mpsc::Sender<Outbound>,
    link: Arc<Link>,
}

impl Connection {
    /// Create a connection and the mailbox its transport drains
    #[must_use]
    pub fn open(subscriber: impl Into<SubscriberId>, mailbox_capacity: usize) -> (Self, Mailbox) {
        let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
        let link = Arc::new(Link::new());
        let id = ConnectionId::new();
        let subscriber = subscriber.into();

        let connection = Self {
            id,
            subscriber: subscriber.clone(),
            mailbox: tx,
            link: link.clone(),
        };
        let mailbox = Mailbox {
            id,
            subscriber,
            receiver: rx,
            link,
        };
        (connection, mailbox)
    }

    /// Connection ID
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Subscriber identity
    #[must_use]
    pub fn subscriber(&self) -> &SubscriberId {
        &self.subscriber
    }

    /// Shared lifecycle state
    #[must_use]
    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }

    pub(crate) fn try_deliver(
        &self,
        item: Outbound,
    ) -> Result<(), mpsc::error::TrySendError<Outbound>> {
        self.mailbox.try_send(item)
    }
}

/// Receiving half of a connection's mailbox, held by the transport adapter
#[derive(Debug)]
pub struct Mailbox {
    id: ConnectionId,
    subscriber: SubscriberId,
    receiver: mpsc::Receiver<Outbound>,
    link: Arc<Link>,
}

impl Mailbox {
    /// Connection ID this mailbox belongs to
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Subscriber identity
    #[must_use]
    pub fn subscriber(&self) -> &SubscriberId {
        &self.subscriber
    }

    /// Shared lifecycle state
    #[must_use]
    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }

    /// Receive the next queued item; `None` once the hub dropped the connection
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.receiver.recv().await
    }

    /// Non-blocking receive
    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.receiver.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_uniqueness() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_subscriber_id_from_integer() {
        assert_eq!(SubscriberId::from(42).as_str(), "42");
        assert_eq!(SubscriberId::from("42"), SubscriberId::from(42));
    }

    #[test]
    fn test_state_machine_edges() {
        use ConnectionState::*;
        assert!(Connecting.can_transition_to(Registered));
        assert!(Registered.can_transition_to(Draining));
        assert!(Draining.can_transition_to(Closed));
        assert!(!Registered.can_transition_to(Connecting));
        assert!(!Closed.can_transition_to(Registered));
        assert!(!Closed.can_transition_to(Draining));
        assert!(!Draining.can_transition_to(Registered));
    }

    #[test]
    fn test_link_rejects_illegal_transition() {
        let (conn, _mailbox) = Connection::open("7", 4);
        let link = conn.link();
        assert_eq!(link.state(), ConnectionState::Connecting);
        assert!(link.transition(ConnectionState::Registered));
        assert!(link.transition(ConnectionState::Draining));
        assert!(link.transition(ConnectionState::Closed));
        assert!(!link.transition(ConnectionState::Registered));
        assert_eq!(link.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_mailbox_closes_when_connection_dropped() {
        let (conn, mut mailbox) = Connection::open("7", 4);
        conn.try_deliver(Outbound::Ping).unwrap();
        drop(conn);
        assert_eq!(mailbox.recv().await, Some(Outbound::Ping));
        assert_eq!(mailbox.recv().await, None);
    }

    #[test]
    fn test_touch_updates_last_seen() {
        let (conn, _mailbox) = Connection::open("7", 4);
        let earlier = Utc::now() - chrono::Duration::minutes(5);
        conn.link().touch_at(earlier);
        assert_eq!(
            conn.link().last_seen().timestamp_millis(),
            earlier.timestamp_millis()
        );
    }
}
