//! Trade whisper extraction.
//!
//! The game client logs incoming whispers as `@From <name>: <message>`,
//! normally behind a timestamp and a client tag:
//!
//! ```text
//! 2024/05/01 18:22:10 1234567 cffb0719 [INFO Client 1337] @From Aria: WTS Chaos Orb
//! ```
//!
//! Everything else in the log is noise and is filtered without error.

use once_cell::sync::Lazy;
use regex::Regex;

/// Keyword that marks an incoming whisper.
pub const TRADE_KEYWORD: &str = "From";

// Unanchored: the whisper sits after the client's line prefix.
static TRADE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"@({}) ([^:]+): (.+)",
        regex::escape(TRADE_KEYWORD)
    ))
    .expect("Invalid regex pattern for trade whispers")
});

/// Extract a trade message from one log line.
///
/// Returns `<keyword> <name>: <message>` with the leading `@` dropped and
/// every other separator kept verbatim, or `None` when the line is not a
/// whisper. `line` must not carry its line terminator.
pub fn extract_trade_message(line: &str) -> Option<String> {
    let captures = TRADE_PATTERN.captures(line)?;
    let keyword = captures.get(1)?.as_str();
    let name = captures.get(2)?.as_str();
    let message = captures.get(3)?.as_str();

    let mut formatted = String::with_capacity(keyword.len() + name.len() + message.len() + 3);
    formatted.push_str(keyword);
    formatted.push(' ');
    formatted.push_str(name);
    formatted.push_str(": ");
    formatted.push_str(message);
    Some(formatted)
}
