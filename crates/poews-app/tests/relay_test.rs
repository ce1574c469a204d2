//! End-to-end relay tests.
//!
//! Each test starts the real server on an ephemeral port, connects with
//! tokio-tungstenite and appends to a temp log file.

mod common;
use common::{test_config, Relay};

use std::time::Duration;

use futures_util::StreamExt;
use poews_app::{AppError, Application};
use poews_feed::FeedError;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

async fn next_text(client: &mut common::Client) -> String {
    let frame = timeout(Duration::from_secs(2), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => return text.to_string(),
                Some(Ok(_)) => continue,
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    })
    .await;
    frame.expect("message should arrive within timeout")
}

/// An appended whisper reaches every client exactly once.
#[tokio::test]
async fn test_appended_whisper_reaches_all_clients() {
    let relay = Relay::start().await;
    let mut first = relay.connect().await;
    let mut second = relay.connect().await;
    relay.wait_for_clients(2).await;

    relay.append(
        "2024/01/01 10:00:01 123 [INFO Client 1] @From Alice: Hi, I would like to buy your Chaos Orb\r\n\
         2024/01/01 10:00:02 124 [INFO Client 1] : You have entered The Twilight Strand.\r\n",
    );

    let expected = "From Alice: Hi, I would like to buy your Chaos Orb";
    assert_eq!(next_text(&mut first).await, expected);
    assert_eq!(next_text(&mut second).await, expected);

    // The non-trade line and the pre-existing content produce nothing.
    assert!(timeout(Duration::from_millis(200), first.next()).await.is_err());
    assert!(timeout(Duration::from_millis(200), second.next()).await.is_err());

    relay.app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_messages_arrive_in_file_order() {
    let relay = Relay::start().await;
    let mut client = relay.connect().await;
    relay.wait_for_clients(1).await;

    relay.append("@From a: one\n@From b: two\n");
    relay.append("@From c: three\n");

    assert_eq!(next_text(&mut client).await, "From a: one");
    assert_eq!(next_text(&mut client).await, "From b: two");
    assert_eq!(next_text(&mut client).await, "From c: three");

    relay.app.shutdown().await.unwrap();
}

async fn next_close(client: &mut common::Client) -> CloseFrame<'static> {
    let frame = timeout(Duration::from_secs(2), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(frame))) => return frame,
                Some(Ok(_)) => continue,
                other => panic!("expected close frame, got {other:?}"),
            }
        }
    })
    .await
    .expect("close frame should arrive within timeout");
    frame.expect("close frame should carry a code")
}

#[tokio::test]
async fn test_shutdown_sends_going_away() {
    let relay = Relay::start().await;
    let mut client = relay.connect().await;
    relay.wait_for_clients(1).await;

    relay.app.shutdown().await.unwrap();

    assert_eq!(next_close(&mut client).await.code, CloseCode::Away);
}

/// An elapsed deadline still closes every client with going-away.
#[tokio::test]
async fn test_clients_closed_when_deadline_elapses() {
    let relay = Relay::start_with(|config| config.shutdown_timeout_ms = 0).await;
    let mut first = relay.connect().await;
    let mut second = relay.connect().await;
    relay.wait_for_clients(2).await;

    let result = relay.app.shutdown().await;
    assert!(
        matches!(result, Ok(()) | Err(AppError::ShutdownTimeout(0))),
        "unexpected shutdown result: {result:?}"
    );

    assert_eq!(next_close(&mut first).await.code, CloseCode::Away);
    assert_eq!(next_close(&mut second).await.code, CloseCode::Away);
}

/// A poll stuck in `open()` makes the watcher overrun the deadline; clients
/// must still be closed.
#[cfg(unix)]
#[tokio::test]
async fn test_stuck_watcher_does_not_skip_client_close() {
    let relay = Relay::start_with(|config| config.shutdown_timeout_ms = 300).await;
    let mut client = relay.connect().await;
    relay.wait_for_clients(1).await;

    // Opening a FIFO for reading blocks until a writer shows up.
    std::fs::remove_file(&relay.log_path).unwrap();
    let status = std::process::Command::new("mkfifo")
        .arg(&relay.log_path)
        .status()
        .expect("mkfifo should be available");
    assert!(status.success());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let log_path = relay.log_path.clone();
    let result = relay.app.shutdown().await;
    assert!(
        matches!(result, Err(AppError::ShutdownTimeout(300))),
        "unexpected shutdown result: {result:?}"
    );
    assert_eq!(next_close(&mut client).await.code, CloseCode::Away);

    // Release the blocked poll so the runtime can wind down.
    let writer = tokio::task::spawn_blocking(move || {
        std::fs::OpenOptions::new().write(true).open(log_path)
    });
    drop(writer.await.unwrap().unwrap());
}

#[tokio::test]
async fn test_disconnected_client_is_unregistered() {
    let relay = Relay::start().await;
    let mut client = relay.connect().await;
    relay.wait_for_clients(1).await;

    client.close(None).await.unwrap();
    relay.wait_for_clients(0).await;

    relay.app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_connection_limit_returns_503() {
    let relay = Relay::start_with(|config| config.server.max_connections = 1).await;
    let _client = relay.connect().await;
    relay.wait_for_clients(1).await;

    let result = tokio_tungstenite::connect_async(relay.ws_url().as_str()).await;
    match result {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 503),
        Err(e) => panic!("expected HTTP 503, got {e}"),
        Ok(_) => panic!("expected HTTP 503, connection was accepted"),
    }

    relay.app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_log_file_fails_to_start() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir.path().join("Client.txt"));

    let result = Application::new(config).unwrap().start().await;
    assert!(matches!(
        result,
        Err(AppError::Feed(FeedError::WatchStart { .. }))
    ));
}

#[tokio::test]
async fn test_occupied_address_fails_to_start() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = occupied.local_addr().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("Client.txt");
    std::fs::write(&log_path, "").unwrap();
    let mut config = test_config(&log_path);
    config.server.listen_addr = addr.to_string();

    let result = Application::new(config).unwrap().start().await;
    match result {
        Err(AppError::Bind { addr: failed, .. }) => assert_eq!(failed, addr.to_string()),
        Err(e) => panic!("expected bind error, got {e}"),
        Ok(_) => panic!("expected bind error, got a running relay"),
    }
}
