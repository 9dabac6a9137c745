//! WebSocket transport adapter
//!
//! Bridges one physical socket to one hub [`Connection`]. The pump is
//! generic over the socket halves so it can be driven by plain channels in
//! tests; production passes the split axum `WebSocket`.

use std::fmt::Display;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{Sink, SinkExt, Stream, StreamExt};

use super::connection::{Connection, ConnectionState, Mailbox, Outbound};
use super::registry::Hub;
use crate::audit::middleware::Actor;
use crate::error::Error;

/// Router exposing the push endpoint at `/ws`
///
/// Expects the [`Actor`] extension to be installed by the authentication
/// layer in front of it; unauthenticated upgrades get `401`.
pub fn routes(hub: Hub) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(hub)
}

/// Upgrade handler: registers the socket under the caller's identity
///
/// Upgrades are refused with `503` once the hub is shutting down.
pub async fn ws_handler(ws: WebSocketUpgrade, actor: Actor, State(hub): State<Hub>) -> crate::error::Result<Response> {
    if hub.is_closing() {
        return Err(Error::QueueClosed("push hub".into()));
    }
    let max_size = hub.config().max_message_size_bytes;
    Ok(ws
        .max_message_size(max_size)
        .on_upgrade(move |socket| serve_socket(socket, hub, actor)))
}

async fn serve_socket(socket: WebSocket, hub: Hub, actor: Actor) {
    let (connection, mailbox) = hub.open(actor.0);
    let (writer, reader) = socket.split();
    pump(writer, reader, hub, connection, mailbox).await;
}

/// Drive one connection until either side goes away
///
/// Registers `connection`, then forwards mailbox items to `writer` in send
/// order while treating every inbound frame as proof of life. Returns after
/// the connection has been unregistered and its link marked `Closed`.
pub async fn pump<W, R, E>(mut writer: W, mut reader: R, hub: Hub, connection: Connection, mut mailbox: Mailbox)
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let id = connection.id();
    let subscriber = connection.subscriber().clone();
    let link = mailbox.link().clone();

    if !hub.register(connection).await {
        tracing::debug!(connection_id = %id, "Hub refused connection");
        link.transition(ConnectionState::Draining);
        let _ = writer.close().await;
        link.transition(ConnectionState::Closed);
        return;
    }
    tracing::info!(connection_id = %id, subscriber = %subscriber, "Push connection opened");

    loop {
        tokio::select! {
            () = link.closed() => {
                tracing::debug!(connection_id = %id, "Connection evicted by hub");
                break;
            }
            outbound = mailbox.recv() => {
                let frame = match outbound {
                    Some(Outbound::Event(payload)) => Message::Text(payload.to_string().into()),
                    Some(Outbound::Ping) => Message::Ping(Bytes::new()),
                    None => break,
                };
                if let Err(e) = writer.send(frame).await {
                    tracing::debug!(connection_id = %id, error = %e, "Push write failed");
                    break;
                }
            }
            inbound = reader.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(payload))) => {
                        link.touch();
                        if let Err(e) = writer.send(Message::Pong(payload)).await {
                            tracing::debug!(connection_id = %id, error = %e, "Pong write failed");
                            break;
                        }
                    }
                    Some(Ok(_)) => link.touch(),
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %id, error = %e, "Push read failed");
                        break;
                    }
                }
            }
        }
    }

    hub.unregister(&id).await;
    link.transition(ConnectionState::Draining);
    let _ = writer.close().await;
    link.transition(ConnectionState::Closed);
    tracing::info!(connection_id = %id, subscriber = %subscriber, "Push connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{EventMessage, HubConfig};
    use futures::channel::mpsc;
    use serde_json::json;
    use std::time::Duration;

    type Inbound = std::result::Result<Message, std::io::Error>;

    struct Harness {
        to_server: mpsc::Sender<Inbound>,
        from_server: mpsc::Receiver<Message>,
        task: tokio::task::JoinHandle<()>,
        link: std::sync::Arc<crate::hub::Link>,
    }

    async fn connect(hub: &Hub, subscriber: &str) -> Harness {
        let (writer, from_server) = mpsc::channel::<Message>(16);
        let (to_server, reader) = mpsc::channel::<Inbound>(16);
        let (connection, mailbox) = hub.open(subscriber);
        let link = connection.link().clone();
        let task = tokio::spawn(pump(writer, reader, hub.clone(), connection, mailbox));

        // Wait for registration
        for _ in 0..100 {
            if link.state() == ConnectionState::Registered {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Harness {
            to_server,
            from_server,
            task,
            link,
        }
    }

    #[tokio::test]
    async fn test_pump_forwards_events_as_text() {
        let hub = Hub::new(HubConfig::default());
        let mut client = connect(&hub, "9").await;

        hub.send_to_subscriber(&"9".into(), &EventMessage::new("notice", json!({"id": 1})))
            .await;

        let frame = tokio::time::timeout(Duration::from_secs(1), client.from_server.next())
            .await
            .unwrap()
            .unwrap();
        match frame {
            Message::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(value["type"], "notice");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        drop(client.to_server);
        client.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_close_unregisters() {
        let hub = Hub::default();
        let mut client = connect(&hub, "9").await;
        assert_eq!(hub.count().await, 1);

        client.to_server.send(Ok(Message::Close(None))).await.unwrap();
        client.task.await.unwrap();

        assert_eq!(hub.count().await, 0);
        assert_eq!(client.link.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_read_error_unregisters() {
        let hub = Hub::default();
        let mut client = connect(&hub, "9").await;

        client
            .to_server
            .send(Err(std::io::Error::other("reset")))
            .await
            .unwrap();
        client.task.await.unwrap();
        assert_eq!(hub.count().await, 0);
    }

    #[tokio::test]
    async fn test_pong_refreshes_liveness() {
        let hub = Hub::default();
        let mut client = connect(&hub, "9").await;
        let stale = chrono::Utc::now() - chrono::Duration::minutes(5);
        client.link.touch_at(stale);

        client
            .to_server
            .send(Ok(Message::Pong(Bytes::new())))
            .await
            .unwrap();
        for _ in 0..100 {
            if client.link.last_seen() > stale {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(client.link.last_seen() > stale);

        drop(client.to_server);
        client.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_heartbeat_eviction_ends_pump() {
        let hub = Hub::default();
        let client = connect(&hub, "9").await;
        client
            .link
            .touch_at(chrono::Utc::now() - chrono::Duration::minutes(5));

        hub.heartbeat(chrono::Utc::now()).await;
        tokio::time::timeout(Duration::from_secs(1), client.task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(client.link.state(), ConnectionState::Closed);
    }
}
