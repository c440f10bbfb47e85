//! End-to-end tests: a real listener, a real WebSocket client, and the
//! publish slot feeding the broadcaster.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use kickoff_feed::{slot, Publisher};
use kickoff_server::{ConnectionRegistry, ServerConfig, ServerHandle};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DOC: &str = r#"{
    "filters": {"dateFrom": "2024-05-01"},
    "matches": [
        {"id": 1, "competition": {"code": "PL"}, "status": "LIVE"},
        {"id": 2, "competition": {"code": "SA"}, "status": "FINISHED"},
        {"id": 3, "competition": {"code": "PL"}, "status": "TIMED"}
    ]
}"#;

struct Harness {
    handle: ServerHandle,
    registry: Arc<ConnectionRegistry>,
    publisher: Publisher<Bytes>,
}

impl Harness {
    async fn boot(config: ServerConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let (publisher, documents) = slot::channel();
        let handle = kickoff_server::start(config, Arc::clone(&registry), documents, None)
            .await
            .unwrap();
        Self {
            handle,
            registry,
            publisher,
        }
    }

    async fn new() -> Self {
        Self::boot(test_config()).await
    }

    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.handle.port())
    }

    async fn connect(&self) -> Client {
        let before = self.registry.len();
        let (ws, _) = connect_async(format!("ws://127.0.0.1:{}/ws", self.handle.port()))
            .await
            .unwrap();
        self.wait_for(|r| r.len() == before + 1).await;
        ws
    }

    fn publish(&self, doc: &str) {
        let _ = self.publisher.publish(Bytes::copy_from_slice(doc.as_bytes()));
    }

    async fn wait_for(&self, cond: impl Fn(&ConnectionRegistry) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond(&self.registry) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }
}

fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        static_dir: None,
        ..Default::default()
    }
}

async fn next_text(ws: &mut Client) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return text.to_string(),
                Some(Ok(_)) => continue,
                other => panic!("connection ended: {other:?}"),
            }
        }
    })
    .await
    .expect("no frame received");
    serde_json::from_str(&frame).unwrap()
}

async fn assert_silent(ws: &mut Client, wait: Duration) {
    let got = tokio::time::timeout(wait, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return Some(text.to_string()),
                Some(Ok(_)) => continue,
                _ => return None,
            }
        }
    })
    .await;
    if let Ok(Some(text)) = got {
        panic!("unexpected frame: {text}");
    }
}

fn match_ids(frame: &Value) -> Vec<i64> {
    frame["matches"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_i64().unwrap())
        .collect()
}

async fn update_filters(ws: &mut Client, body: &str) {
    ws.send(Message::Text(body.into())).await.unwrap();
}

#[tokio::test]
async fn new_connection_receives_everything() {
    let h = Harness::new().await;
    let mut ws = h.connect().await;

    h.publish(DOC);

    let frame = next_text(&mut ws).await;
    assert_eq!(match_ids(&frame), vec![1, 2, 3]);
    assert_eq!(frame["filters"]["dateFrom"], "2024-05-01");
}

#[tokio::test]
async fn update_filters_narrows_the_feed() {
    let h = Harness::new().await;
    let mut ws = h.connect().await;

    update_filters(&mut ws, r#"{"action":"updateFilters","leagues":["PL"],"status":["LIVE"]}"#).await;
    h.wait_for(|r| r.snapshot().iter().all(|(_, c)| !c.is_wildcard())).await;
    h.publish(DOC);

    let frame = next_text(&mut ws).await;
    assert_eq!(match_ids(&frame), vec![1]);
}

#[tokio::test]
async fn connections_are_filtered_independently() {
    let h = Harness::new().await;
    let mut pl = h.connect().await;
    let mut everything = h.connect().await;

    update_filters(&mut pl, r#"{"action":"updateFilters","leagues":["PL"]}"#).await;
    h.wait_for(|r| r.snapshot().iter().any(|(_, c)| !c.is_wildcard())).await;
    h.publish(DOC);

    assert_eq!(match_ids(&next_text(&mut pl).await), vec![1, 3]);
    assert_eq!(match_ids(&next_text(&mut everything).await), vec![1, 2, 3]);
}

#[tokio::test]
async fn empty_view_sends_nothing() {
    let h = Harness::new().await;
    let mut ws = h.connect().await;

    update_filters(&mut ws, r#"{"action":"updateFilters","leagues":["BL1"]}"#).await;
    h.wait_for(|r| r.snapshot().iter().all(|(_, c)| !c.is_wildcard())).await;
    h.publish(DOC);

    assert_silent(&mut ws, Duration::from_millis(300)).await;
    assert_eq!(h.registry.len(), 1);
}

#[tokio::test]
async fn malformed_control_keeps_connection_and_filters() {
    let h = Harness::new().await;
    let mut ws = h.connect().await;

    update_filters(&mut ws, r#"{"action":"updateFilters","status":["FINISHED"]}"#).await;
    h.wait_for(|r| r.snapshot().iter().all(|(_, c)| !c.is_wildcard())).await;
    ws.send(Message::Text("definitely not json".into())).await.unwrap();
    update_filters(&mut ws, r#"{"action":"unsubscribe"}"#).await;
    h.publish(DOC);

    let frame = next_text(&mut ws).await;
    assert_eq!(match_ids(&frame), vec![2]);
    assert_eq!(h.registry.len(), 1);
}

#[tokio::test]
async fn undecodable_document_is_dropped() {
    let h = Harness::new().await;
    let mut ws = h.connect().await;

    h.publish("<html>502 Bad Gateway</html>");
    assert_silent(&mut ws, Duration::from_millis(200)).await;

    h.publish(DOC);
    assert_eq!(match_ids(&next_text(&mut ws).await), vec![1, 2, 3]);
}

#[tokio::test]
async fn client_close_deregisters() {
    let h = Harness::new().await;
    let mut ws = h.connect().await;

    ws.close(None).await.unwrap();
    h.wait_for(|r| r.is_empty()).await;

    // Later passes run without the departed connection.
    h.publish(DOC);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn dropped_client_deregisters() {
    let h = Harness::new().await;
    let ws = h.connect().await;

    drop(ws);
    h.wait_for(|r| r.is_empty()).await;
}

#[tokio::test]
async fn silent_client_hits_idle_timeout() {
    let h = Harness::boot(ServerConfig {
        heartbeat_interval_secs: 1,
        idle_timeout_secs: 1,
        ..test_config()
    })
    .await;
    // Never polled, so server pings go unanswered.
    let _ws = h.connect().await;

    h.wait_for(|r| r.is_empty()).await;
}

#[tokio::test]
async fn health_counts_connections() {
    let h = Harness::new().await;
    let _a = h.connect().await;
    let _b = h.connect().await;

    let body: Value = reqwest::get(h.url("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 2);
}

#[tokio::test]
async fn plain_http_on_ws_is_rejected() {
    let h = Harness::new().await;

    let resp = reqwest::get(h.url("/ws")).await.unwrap();

    assert_eq!(resp.status(), 400);
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn bind_conflict_is_reported() {
    let h = Harness::new().await;
    let (_publisher, documents) = slot::channel();

    let result = kickoff_server::start(
        ServerConfig {
            port: h.handle.port(),
            ..test_config()
        },
        Arc::new(ConnectionRegistry::new()),
        documents,
        None,
    )
    .await;

    assert!(matches!(result, Err(kickoff_server::ServerError::Bind { .. })));
}
