//! Operator input: lines typed on stdin are broadcast like trade messages.

use std::io::BufRead;
use std::sync::Arc;
use std::thread::JoinHandle;

use poews_feed::MessageSink;
use tracing::{debug, warn};

/// Forward each non-empty line of `reader` to `sink` until EOF.
///
/// Returns how many lines were handed over.
pub fn forward_lines<R: BufRead>(reader: R, sink: &dyn MessageSink) -> usize {
    let mut forwarded = 0;
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to read operator input");
                break;
            }
        };
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        sink.publish(line.to_string());
        forwarded += 1;
    }
    forwarded
}

/// Read stdin on a dedicated thread.
///
/// Blocking reads stay off the runtime. The thread is not joined on shutdown;
/// it ends with the process or at EOF.
pub fn spawn_stdin_reader(sink: Arc<dyn MessageSink>) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("poews-stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            let forwarded = forward_lines(stdin.lock(), sink.as_ref());
            debug!(forwarded, "Operator input closed");
        })
}
