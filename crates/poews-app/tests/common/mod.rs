//! Shared fixtures for relay integration tests.

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use poews_app::{AppConfig, Application, RunningApp};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A temp log file plus a relay watching it.
pub struct Relay {
    pub dir: tempfile::TempDir,
    pub log_path: PathBuf,
    pub app: RunningApp,
}

impl Relay {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("Client.txt");
        std::fs::write(&log_path, "2024/01/01 10:00:00 [INFO Client 1] old session\n").unwrap();

        let mut config = test_config(&log_path);
        customize(&mut config);

        let app = Application::new(config).unwrap().start().await.unwrap();
        Self { dir, log_path, app }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.app.local_addr())
    }

    pub async fn connect(&self) -> Client {
        let (stream, _) = connect_async(self.ws_url().as_str()).await.unwrap();
        stream
    }

    pub fn append(&self, text: &str) {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&self.log_path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file.flush().unwrap();
    }

    /// Wait until the hub reports `count` registered clients.
    pub async fn wait_for_clients(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.app.hub().client_count() != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("clients should register within timeout");
    }
}

pub fn test_config(log_path: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.server.listen_addr = "127.0.0.1:0".to_string();
    config.watcher.file_path = Some(log_path.to_path_buf());
    config.watcher.poll_interval_ms = 20;
    config.input.stdin = false;
    config
}
