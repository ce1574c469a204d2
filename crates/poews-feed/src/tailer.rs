//! Offset-based tailing of an append-only log file.
//!
//! `FileTailer` is either idle or watching exactly one path. While watching,
//! a poll task wakes on a fixed interval, reads whatever was appended since
//! the stored offset, and publishes the trade messages found there. No OS
//! file-change notification is involved; latency is bounded by one interval.
//!
//! Content that exists when the watch starts is never delivered.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use poews_telemetry::Metrics;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{FeedError, FeedResult};
use crate::extractor::extract_trade_message;
use crate::sink::MessageSink;

/// What to do with a trailing fragment that has no newline yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialLinePolicy {
    /// Leave the fragment unread until its newline arrives.
    #[default]
    Defer,
    /// Yield the fragment as a line and move the offset to end of file.
    Emit,
}

/// Tailer settings.
#[derive(Debug, Clone)]
pub struct TailerConfig {
    /// Time between poll ticks.
    pub poll_interval: Duration,
    /// Handling of unterminated trailing fragments.
    pub partial_lines: PartialLinePolicy,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            partial_lines: PartialLinePolicy::Defer,
        }
    }
}

/// Path and consumed offset of the active watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchState {
    pub path: PathBuf,
    pub offset: u64,
}

/// Result of one incremental read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailRead {
    /// Trade messages in file order.
    pub messages: Vec<String>,
    /// Offset to resume from. Never below the offset that was passed in.
    pub offset: u64,
    /// File size observed during the read.
    pub file_size: u64,
}

/// Read everything appended to `path` after `offset` and extract trade messages.
///
/// When the file has not grown past `offset` (including when it shrank),
/// nothing is read and the offset comes back unchanged.
pub async fn read_appended(
    path: &Path,
    offset: u64,
    policy: PartialLinePolicy,
) -> FeedResult<TailRead> {
    let mut file = tokio::fs::File::open(path).await?;
    let file_size = file.metadata().await?.len();

    if offset >= file_size {
        return Ok(TailRead {
            messages: Vec::new(),
            offset,
            file_size,
        });
    }

    let pending = file_size - offset;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = Vec::with_capacity(pending as usize);
    file.take(pending).read_to_end(&mut buf).await?;

    let consumed = match policy {
        PartialLinePolicy::Emit => buf.len(),
        PartialLinePolicy::Defer => buf
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |newline| newline + 1),
    };

    // `lines()` strips both "\n" and "\r\n".
    let text = String::from_utf8_lossy(&buf[..consumed]);
    let messages = text.lines().filter_map(extract_trade_message).collect();

    Ok(TailRead {
        messages,
        offset: offset + consumed as u64,
        file_size,
    })
}

struct ActiveWatch {
    state: Arc<Mutex<WatchState>>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Polls one file at a time and publishes new trade messages to a sink.
pub struct FileTailer {
    config: TailerConfig,
    sink: Arc<dyn MessageSink>,
    active: Mutex<Option<ActiveWatch>>,
}

impl FileTailer {
    pub fn new(config: TailerConfig, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            config,
            sink,
            active: Mutex::new(None),
        }
    }

    /// Start watching `path` from its current end.
    ///
    /// Any previous watch is cancelled before the new poll task starts. If
    /// the new path cannot be sized, the previous watch is left running.
    /// Returns the starting offset.
    pub async fn watch(&self, path: impl Into<PathBuf>) -> FeedResult<u64> {
        let path = path.into();
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|source| FeedError::WatchStart {
                path: path.clone(),
                source,
            })?;
        if !metadata.is_file() {
            return Err(FeedError::NotAFile(path));
        }
        let offset = metadata.len();

        let state = Arc::new(Mutex::new(WatchState {
            path: path.clone(),
            offset,
        }));
        let cancel = CancellationToken::new();

        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            previous.cancel.cancel();
            info!(
                previous = %previous.state.lock().path.display(),
                "Replacing active watch"
            );
        }
        let handle = tokio::spawn(run_poll_loop(
            state.clone(),
            cancel.clone(),
            self.config.clone(),
            self.sink.clone(),
        ));
        *active = Some(ActiveWatch {
            state,
            cancel,
            handle,
        });
        drop(active);

        info!(
            path = %path.display(),
            offset,
            interval_ms = self.config.poll_interval.as_millis() as u64,
            "Watching file"
        );
        Ok(offset)
    }

    /// Cancel the active watch and wait for its poll task to finish.
    ///
    /// A tick already in progress completes first. Idempotent.
    pub async fn stop(&self) {
        let watch = self.active.lock().take();
        if let Some(watch) = watch {
            watch.cancel.cancel();
            if let Err(e) = watch.handle.await {
                warn!(error = %e, "Poll task ended abnormally");
            }
            info!(path = %watch.state.lock().path.display(), "Stopped watching file");
        }
    }

    /// Snapshot of the active watch, if any.
    pub fn current_watch(&self) -> Option<WatchState> {
        self.active
            .lock()
            .as_ref()
            .map(|watch| watch.state.lock().clone())
    }

    pub fn is_watching(&self) -> bool {
        self.active.lock().is_some()
    }
}

impl Drop for FileTailer {
    fn drop(&mut self) {
        if let Some(watch) = self.active.get_mut().take() {
            watch.cancel.cancel();
        }
    }
}

async fn run_poll_loop(
    state: Arc<Mutex<WatchState>>,
    cancel: CancellationToken,
    config: TailerConfig,
    sink: Arc<dyn MessageSink>,
) {
    let mut interval = tokio::time::interval(config.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // File sat below the stored offset on the previous tick.
    let mut shrunk = false;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("Poll task cancelled");
                return;
            }
            _ = interval.tick() => {}
        }

        let (path, offset) = {
            let state = state.lock();
            (state.path.clone(), state.offset)
        };

        let read = match read_appended(&path, offset, config.partial_lines).await {
            Ok(read) => read,
            Err(e) => {
                Metrics::poll_error();
                warn!(path = %path.display(), error = %e, "Failed to poll watched file");
                continue;
            }
        };

        if read.file_size < offset {
            if !shrunk {
                warn!(
                    path = %path.display(),
                    offset,
                    file_size = read.file_size,
                    "Watched file is smaller than the read offset; waiting for it to grow"
                );
                shrunk = true;
            }
        } else if shrunk {
            info!(path = %path.display(), offset, "Watched file reached the read offset again");
            shrunk = false;
        }

        state.lock().offset = read.offset;

        if !read.messages.is_empty() {
            Metrics::trade_lines(read.messages.len());
            debug!(count = read.messages.len(), offset = read.offset, "Extracted trade messages");
        }
        for message in read.messages {
            sink.publish(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    fn log_file(initial: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Client.txt");
        std::fs::write(&path, initial).unwrap();
        (dir, path)
    }

    fn fast_config() -> TailerConfig {
        TailerConfig {
            poll_interval: Duration::from_millis(20),
            partial_lines: PartialLinePolicy::Defer,
        }
    }

    #[tokio::test]
    async fn test_read_extracts_in_file_order() {
        let (_dir, path) = log_file("");
        append(
            &path,
            "noise\n@From A: one\nmore noise\n@From B: two\n",
        );

        let read = read_appended(&path, 0, PartialLinePolicy::Defer).await.unwrap();
        assert_eq!(read.messages, vec!["From A: one", "From B: two"]);
        assert_eq!(read.offset, read.file_size);
    }

    #[tokio::test]
    async fn test_second_read_without_growth_is_empty() {
        let (_dir, path) = log_file("@From A: one\n");

        let first = read_appended(&path, 0, PartialLinePolicy::Defer).await.unwrap();
        assert_eq!(first.messages.len(), 1);

        let second = read_appended(&path, first.offset, PartialLinePolicy::Defer)
            .await
            .unwrap();
        assert!(second.messages.is_empty());
        assert_eq!(second.offset, first.offset);
    }

    #[tokio::test]
    async fn test_offset_never_moves_backwards() {
        let (_dir, path) = log_file("");
        let mut offset = 0;
        for chunk in ["@From A: x\n", "partial @Fr", "om B: y\n", "", "tail"] {
            append(&path, chunk);
            let read = read_appended(&path, offset, PartialLinePolicy::Defer)
                .await
                .unwrap();
            assert!(read.offset >= offset);
            offset = read.offset;
        }
    }

    #[tokio::test]
    async fn test_defer_holds_unterminated_fragment() {
        let (_dir, path) = log_file("");
        append(&path, "@From Bob: WTB Exa");

        let read = read_appended(&path, 0, PartialLinePolicy::Defer).await.unwrap();
        assert!(read.messages.is_empty());
        assert_eq!(read.offset, 0);

        append(&path, "lted Orb\n");
        let read = read_appended(&path, read.offset, PartialLinePolicy::Defer)
            .await
            .unwrap();
        assert_eq!(read.messages, vec!["From Bob: WTB Exalted Orb"]);
    }

    #[tokio::test]
    async fn test_emit_yields_fragment_and_advances_to_size() {
        let (_dir, path) = log_file("");
        append(&path, "@From Bob: WTB Exa");

        let read = read_appended(&path, 0, PartialLinePolicy::Emit).await.unwrap();
        assert_eq!(read.messages, vec!["From Bob: WTB Exa"]);
        assert_eq!(read.offset, read.file_size);
    }

    #[tokio::test]
    async fn test_crlf_is_stripped() {
        let (_dir, path) = log_file("");
        append(&path, "@From A: windows line\r\n");

        let read = read_appended(&path, 0, PartialLinePolicy::Defer).await.unwrap();
        assert_eq!(read.messages, vec!["From A: windows line"]);
    }

    #[tokio::test]
    async fn test_shrunk_file_leaves_offset_unchanged() {
        let (_dir, path) = log_file("short\n");

        let read = read_appended(&path, 1_000, PartialLinePolicy::Defer)
            .await
            .unwrap();
        assert!(read.messages.is_empty());
        assert_eq!(read.offset, 1_000);
        assert_eq!(read.file_size, 6);
    }

    #[tokio::test]
    async fn test_read_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_appended(&dir.path().join("gone.txt"), 0, PartialLinePolicy::Defer).await;
        assert!(matches!(result, Err(FeedError::Io(_))));
    }

    #[tokio::test]
    async fn test_watch_skips_existing_content() {
        let (_dir, path) = log_file("@From Old: already here\n");
        let (tx, mut rx) = mpsc::channel::<String>(16);
        let tailer = FileTailer::new(fast_config(), Arc::new(tx));

        let offset = tailer.watch(&path).await.unwrap();
        assert_eq!(offset, 24);
        assert_eq!(tailer.current_watch().unwrap().offset, 24);

        append(&path, "@From Bob: WTB Exalted Orb\n");
        let received = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(received.as_deref(), Some("From Bob: WTB Exalted Orb"));
        assert!(rx.try_recv().is_err());

        tailer.stop().await;
    }

    #[tokio::test]
    async fn test_watch_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel::<String>(1);
        let tailer = FileTailer::new(fast_config(), Arc::new(tx));

        let result = tailer.watch(dir.path().join("missing.txt")).await;
        assert!(matches!(result, Err(FeedError::WatchStart { .. })));
        assert!(!tailer.is_watching());
    }

    #[tokio::test]
    async fn test_watch_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel::<String>(1);
        let tailer = FileTailer::new(fast_config(), Arc::new(tx));

        let result = tailer.watch(dir.path()).await;
        assert!(matches!(result, Err(FeedError::NotAFile(_))));
    }

    #[tokio::test]
    async fn test_rewatch_replaces_previous_target() {
        let (_dir_a, path_a) = log_file("");
        let (_dir_b, path_b) = log_file("");
        let (tx, mut rx) = mpsc::channel::<String>(16);
        let tailer = FileTailer::new(fast_config(), Arc::new(tx));

        tailer.watch(&path_a).await.unwrap();
        tailer.watch(&path_b).await.unwrap();
        assert_eq!(tailer.current_watch().unwrap().path, path_b);

        append(&path_a, "@From A: stale target\n");
        append(&path_b, "@From B: live target\n");

        let received = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(received.as_deref(), Some("From B: live target"));

        // Give the old target a few ticks to prove it is no longer polled.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        tailer.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (_dir, path) = log_file("");
        let (tx, mut rx) = mpsc::channel::<String>(16);
        let tailer = FileTailer::new(fast_config(), Arc::new(tx));

        tailer.watch(&path).await.unwrap();
        tailer.stop().await;
        tailer.stop().await;
        assert!(!tailer.is_watching());
        assert!(tailer.current_watch().is_none());

        append(&path, "@From A: after stop\n");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unreadable_tick_is_retried() {
        let (_dir, path) = log_file("");
        let (tx, mut rx) = mpsc::channel::<String>(16);
        let tailer = FileTailer::new(fast_config(), Arc::new(tx));
        tailer.watch(&path).await.unwrap();

        // Ticks fail while the file is gone, then recover once it is back.
        std::fs::remove_file(&path).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        std::fs::write(&path, "@From A: back again\n").unwrap();

        let received = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(received.as_deref(), Some("From A: back again"));

        tailer.stop().await;
    }
}
