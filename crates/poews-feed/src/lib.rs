//! Trade message feed for poews.
//!
//! Tails the game client's log file and turns newly appended whisper lines
//! into formatted trade messages:
//!
//! ```text
//!  Client.txt ──(poll every N ms)──> FileTailer ──> extract_trade_message ──> MessageSink
//!               offset-based read                   "@From a: b" -> "From a: b"
//! ```
//!
//! The sink is whatever fans messages out; in the server binary it is the
//! connection hub's intake queue.

pub mod error;
pub mod extractor;
pub mod sink;
pub mod tailer;

pub use error::{FeedError, FeedResult};
pub use extractor::{extract_trade_message, TRADE_KEYWORD};
pub use sink::MessageSink;
pub use tailer::{read_appended, FileTailer, PartialLinePolicy, TailRead, TailerConfig, WatchState};
