//! Push hub delivery through the transport pump

use std::time::Duration;

use campus_events::hub::{pump, ConnectionState, EventMessage, Hub, HubConfig, Link, Message, SubscriberId};
use futures::channel::mpsc;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;

type Inbound = Result<Message, std::io::Error>;

struct Client {
    to_server: mpsc::Sender<Inbound>,
    from_server: mpsc::Receiver<Message>,
    link: Arc<Link>,
    task: tokio::task::JoinHandle<()>,
}

impl Client {
    async fn connect(hub: &Hub, subscriber: &str, outbound_capacity: usize) -> Self {
        let (writer, from_server) = mpsc::channel::<Message>(outbound_capacity);
        let (to_server, reader) = mpsc::channel::<Inbound>(4);
        let (connection, mailbox) = hub.open(subscriber);
        let link = connection.link().clone();
        let task = tokio::spawn(pump(writer, reader, hub.clone(), connection, mailbox));

        for _ in 0..200 {
            if link.state() == ConnectionState::Registered {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(link.state(), ConnectionState::Registered);
        Self {
            to_server,
            from_server,
            link,
            task,
        }
    }

    async fn next_event(&mut self) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(1), self.from_server.next())
            .await
            .expect("no frame within 1s")
            .expect("stream ended");
        match frame {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    fn has_pending(&mut self) -> bool {
        matches!(self.from_server.try_next(), Ok(Some(_)))
    }

    async fn disconnect(mut self) {
        self.to_server.close_channel();
        tokio::time::timeout(Duration::from_secs(1), self.task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(self.link.state(), ConnectionState::Closed);
        drop(self.from_server);
    }
}

#[tokio::test]
async fn targeted_send_reaches_every_tab_of_one_user_only() {
    let hub = Hub::new(HubConfig::default());
    let mut tab_a = Client::connect(&hub, "41", 16).await;
    let mut tab_b = Client::connect(&hub, "41", 16).await;
    let mut other = Client::connect(&hub, "42", 16).await;

    let report = hub
        .send_to_subscriber(
            &SubscriberId::from(41),
            &EventMessage::new("attendance.marked", json!({"lesson": 3})),
        )
        .await;
    assert_eq!(report.delivered, 2);

    for tab in [&mut tab_a, &mut tab_b] {
        let event = tab.next_event().await;
        assert_eq!(event["type"], "attendance.marked");
        assert_eq!(event["data"]["lesson"], 3);
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!other.has_pending());

    tab_a.disconnect().await;
    tab_b.disconnect().await;
    other.disconnect().await;
    assert_eq!(hub.count().await, 0);
}

#[tokio::test]
async fn stalled_client_is_evicted_without_holding_up_others() {
    let hub = Hub::new(HubConfig {
        mailbox_capacity: 2,
        ..HubConfig::default()
    });
    // Outbound channel of one slot that is never read
    let stalled = Client::connect(&hub, "1", 1).await;
    let mut healthy = Client::connect(&hub, "2", 64).await;

    let mut evicted = 0;
    for i in 0..10 {
        let report = hub
            .broadcast(&EventMessage::new("timetable.changed", json!({"rev": i})))
            .await;
        evicted += report.evicted;
        // Let the healthy pump keep its mailbox empty
        let event = healthy.next_event().await;
        assert_eq!(event["data"]["rev"], i);
    }

    assert_eq!(evicted, 1);
    assert_eq!(hub.count().await, 1);
    tokio::time::timeout(Duration::from_secs(1), stalled.link.closed())
        .await
        .unwrap();

    healthy.disconnect().await;
    assert_eq!(hub.count().await, 0);
}

#[tokio::test]
async fn repeated_connect_disconnect_does_not_leak() {
    let hub = Hub::new(HubConfig::default());
    for round in 0..25 {
        let client = Client::connect(&hub, &format!("user-{}", round % 3), 4).await;
        assert_eq!(hub.count().await, 1);
        client.disconnect().await;
        assert_eq!(hub.count().await, 0);
    }
}

#[tokio::test]
async fn hubs_do_not_share_connections() {
    let first = Hub::new(HubConfig::default());
    let second = Hub::new(HubConfig::default());
    let mut client = Client::connect(&first, "7", 8).await;

    let report = second
        .broadcast(&EventMessage::new("noop", Value::Null))
        .await;
    assert_eq!(report.delivered, 0);
    assert_eq!(second.count().await, 0);

    first.broadcast(&EventMessage::new("hello", Value::Null)).await;
    assert_eq!(client.next_event().await["type"], "hello");
    client.disconnect().await;
}
