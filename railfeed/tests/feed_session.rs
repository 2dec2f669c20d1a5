use std::collections::HashMap;
use std::time::Duration;

use envconfig::Envconfig;
use futures::{SinkExt, StreamExt};
use railfeed::client::{load_persisted, FeedClient};
use railfeed::config::Config;
use railfeed::error::FeedError;
use railfeed::stomp::{Command, Frame, StompCodec};
use railfeed_common::error::SinkError;
use railfeed_common::health::HealthRegistry;
use railfeed_common::row::{Row, Value};
use railfeed_common::topics::TopicRegistry;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

const BERTH_STEPS: &str = r#"[
    {"CA_MSG": {"time": "1349696911000", "area_id": "SK", "msg_type": "CA", "descr": "1F42"}},
    {"CC_MSG": {"time": "1349696912000", "area_id": "SK", "msg_type": "CC", "descr": "2K17"}}
]"#;

const HEARTBEAT_STEP: &str =
    r#"[{"CT_MSG": {"time": "1349696913000", "area_id": "WY", "msg_type": "CT"}}]"#;

fn config(dir: &TempDir, port: u16, extra: &[(&str, &str)]) -> Config {
    let mut env: HashMap<String, String> = [
        ("DATAFEED_USERNAME", "user@example.com"),
        ("DATAFEED_PW", "secret"),
        ("TOPIC", "TD"),
        ("STOMP_HOST", "127.0.0.1"),
        ("LIVENESS_INTERVAL", "200"),
        ("DISCONNECT_TIMEOUT", "2000"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    env.insert("STOMP_PORT".to_owned(), port.to_string());
    env.insert(
        "DATABASE_PATH".to_owned(),
        dir.path()
            .join("train_td_all_toc.db")
            .to_string_lossy()
            .into_owned(),
    );
    env.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));

    Config::init_from_hashmap(&env).unwrap()
}

fn message(id: &str, body: &'static str) -> Frame {
    Frame::new(Command::Message)
        .with_header("destination", "/topic/TD_ALL_SIG_AREA")
        .with_header("message-id", id)
        .with_header("subscription", "1")
        .with_body(body.as_bytes())
}

fn text(s: &str) -> Value {
    Value::Text(s.to_owned())
}

/// Accepts one client and plays a broker session: handshake, subscription, the given
/// frames, then waits for DISCONNECT and answers it with a receipt.
async fn fake_broker(listener: TcpListener, frames: Vec<Frame>) {
    let (socket, _) = listener.accept().await.unwrap();
    let mut broker = Framed::new(socket, StompCodec::default());

    let connect = broker.next().await.unwrap().unwrap();
    assert_eq!(connect.command, Command::Connect);
    assert_eq!(connect.header("login"), Some("user@example.com"));
    assert_eq!(connect.header("passcode"), Some("secret"));
    broker
        .send(
            Frame::new(Command::Connected)
                .with_header("version", "1.2")
                .with_header("server", "fake-broker"),
        )
        .await
        .unwrap();

    let subscribe = broker.next().await.unwrap().unwrap();
    assert_eq!(subscribe.command, Command::Subscribe);
    assert_eq!(subscribe.header("destination"), Some("/topic/TD_ALL_SIG_AREA"));
    assert_eq!(subscribe.header("id"), Some("1"));
    assert_eq!(subscribe.header("ack"), Some("auto"));

    for frame in frames {
        broker.send(frame).await.unwrap();
    }

    let disconnect = broker.next().await.unwrap().unwrap();
    assert_eq!(disconnect.command, Command::Disconnect);
    let receipt = disconnect.header("receipt").unwrap().to_owned();
    broker
        .send(Frame::new(Command::Receipt).with_header("receipt-id", receipt))
        .await
        .unwrap();

    assert!(broker.next().await.is_none());
}

async fn wait_for_rows(dir: &TempDir, expected: usize) -> Vec<Row> {
    let path = dir.path().join("train_td_all_toc.db");
    for _ in 0..250 {
        let rows = load_persisted(&path, "train_td_all_toc").await.unwrap();
        if rows.len() >= expected {
            return rows;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {expected} rows");
}

#[tokio::test]
async fn test_session_persists_rows_and_survives_bad_messages() {
    let dir = TempDir::new().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let broker = tokio::spawn(fake_broker(
        listener,
        vec![
            message("1", BERTH_STEPS),
            Frame::new(Command::Error)
                .with_header("message", "slow consumer")
                .with_body(&b"consumer is falling behind"[..]),
            message("2", "this is not json"),
            message("3", r#"{"CA_MSG": {"time": "1"}}"#),
            Frame::new(Command::Receipt).with_header("receipt-id", "unsolicited"),
            message("4", HEARTBEAT_STEP),
        ],
    ));

    let liveness = HealthRegistry::new("liveness");
    let mut client = FeedClient::new(
        &config(&dir, port, &[]),
        &TopicRegistry::default(),
        liveness.clone(),
    )
    .await
    .unwrap();

    let token = CancellationToken::new();
    let session = {
        let token = token.clone();
        tokio::spawn(async move {
            let result = client.run(token).await;
            (client, result)
        })
    };

    // Rows are read through a separate handle while the session is live.
    let rows = wait_for_rows(&dir, 3).await;
    assert!(liveness.get_status().healthy);

    token.cancel();
    let (mut client, result) = session.await.unwrap();
    result.unwrap();
    broker.await.unwrap();

    assert_eq!(rows.len(), 3);
    assert_eq!(client.load_persisted().await.unwrap(), rows);
    assert_eq!(
        rows[0],
        Row(vec![
            text("CA_MSG"),
            text("1349696911000"),
            text("SK"),
            text("CA"),
            Value::Null,
            Value::Null,
            text("1F42"),
        ])
    );
    assert_eq!(rows[1].get(0), Some(&text("CC_MSG")));
    assert_eq!(rows[1].get(6), Some(&text("2K17")));
    assert_eq!(rows[2].get(0), Some(&text("CT_MSG")));
    assert_eq!(rows[2].get(2), Some(&text("WY")));
    assert_eq!(rows[2].get(6), Some(&Value::Null));

    let rerun = client.run(CancellationToken::new()).await;
    assert!(matches!(rerun, Err(FeedError::Sink(SinkError::SinkClosed))));
}

#[tokio::test]
async fn test_startup_failures_never_reach_the_broker() {
    let dir = TempDir::new().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let unknown = FeedClient::new(
        &config(&dir, port, &[("TOPIC", "SMART")]),
        &TopicRegistry::default(),
        HealthRegistry::new("liveness"),
    )
    .await;
    assert!(matches!(unknown, Err(FeedError::UnknownTopic(_))));

    let first = FeedClient::new(
        &config(&dir, port, &[]),
        &TopicRegistry::default(),
        HealthRegistry::new("liveness"),
    )
    .await
    .unwrap();
    let second = FeedClient::new(
        &config(&dir, port, &[("DROP_IF_EXISTS", "false")]),
        &TopicRegistry::default(),
        HealthRegistry::new("liveness"),
    )
    .await;
    assert!(matches!(
        second,
        Err(FeedError::Sink(SinkError::TableAlreadyExists(_)))
    ));
    drop(first);

    let accepted = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
    assert!(accepted.is_err(), "no connection should have been attempted");
}

#[tokio::test]
async fn test_refused_login_closes_the_sink() {
    let dir = TempDir::new().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let broker = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut broker = Framed::new(socket, StompCodec::default());
        let _connect = broker.next().await;
        broker
            .send(Frame::new(Command::Error).with_header("message", "Bad CONNECT"))
            .await
            .unwrap();
    });

    let mut client = FeedClient::new(
        &config(&dir, port, &[]),
        &TopicRegistry::default(),
        HealthRegistry::new("liveness"),
    )
    .await
    .unwrap();

    let result = client.run(CancellationToken::new()).await;
    assert!(matches!(result, Err(FeedError::Transport(_))));
    broker.await.unwrap();

    assert!(client.load_persisted().await.unwrap().is_empty());
}
