//! Typed messages parsed from the game server's log stream
//!
//! The server writes one entry per line, prefixed with a level tag:
//!
//! ```text
//! [Info] UniverseServer: Client 'Bob' <3> (127.0.0.1:51234) connected
//! [Info] Chat: <Bob> hello there
//! [Error] Fatal Error: segfault
//! ```
//!
//! Parsing never fails. Anything that does not look like a tagged entry
//! becomes an [`Level::Error`] message carrying the whole line.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Author given to lines too short to classify
pub const UNKNOWN_AUTHOR: &str = "UNKNOWN";

/// Lines shorter than this are not classified
const MIN_LINE_LEN: usize = 6;

const INFO_TAG: &str = "[Info]";
const WARN_TAG: &str = "[Warn]";
const ERROR_TAG: &str = "[Error]";

const CHAT_MARKER: &str = "Chat: <";
const AUTHOR_END: &str = "> ";

/// Severity of a log entry, plus the synthetic chat level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    Info,
    Warning,
    Error,
    Chat,
}

impl Level {
    /// Single-letter code used by level filters (`C`, `I`, `W`, `E`)
    pub fn letter(self) -> char {
        match self {
            Level::Chat => 'C',
            Level::Info => 'I',
            Level::Warning => 'W',
            Level::Error => 'E',
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Info => "Info",
            Level::Warning => "Warning",
            Level::Error => "Error",
            Level::Chat => "Chat",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single classified log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub level: Level,
    /// Set for chat messages (and for unclassifiable short lines)
    pub author: Option<String>,
    pub content: String,
}

impl Message {
    /// Create an authorless message
    pub fn new(level: Level, content: impl Into<String>) -> Self {
        Self {
            level,
            author: None,
            content: content.into(),
        }
    }

    /// Create a chat message
    pub fn chat(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            level: Level::Chat,
            author: Some(author.into()),
            content: content.into(),
        }
    }

    /// Parse a raw log line
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.chars().count() < MIN_LINE_LEN {
            return Self {
                level: Level::Error,
                author: Some(UNKNOWN_AUTHOR.to_string()),
                content: line.to_string(),
            };
        }

        let (level, content) = if let Some(rest) = line.strip_prefix(INFO_TAG) {
            (Level::Info, rest.trim_start())
        } else if let Some(rest) = line.strip_prefix(WARN_TAG) {
            (Level::Warning, rest.trim_start())
        } else if let Some(rest) = line.strip_prefix(ERROR_TAG) {
            (Level::Error, rest.trim_start())
        } else {
            (Level::Error, line)
        };

        if level == Level::Info {
            if let Some(chat) = content.strip_prefix(CHAT_MARKER) {
                if let Some(end) = chat.find(AUTHOR_END) {
                    if end > 0 {
                        return Self::chat(&chat[..end], &chat[end + AUTHOR_END.len()..]);
                    }
                }
            }
        }

        Self::new(level, content)
    }

    pub fn is_chat(&self) -> bool {
        self.level == Level::Chat
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.author {
            Some(author) => write!(f, "[{}] <{}> {}", self.level, author, self.content),
            None => write!(f, "[{}] {}", self.level, self.content),
        }
    }
}

/// Split a raw stdout line into log entries.
///
/// The server occasionally writes untagged text in front of a tagged entry
/// on the same line; the prefix is kept as its own entry. Entries are
/// trimmed and empty ones dropped.
pub fn split_entries(raw: &str) -> Vec<String> {
    let escaped = raw.trim().replace('\r', "\\r").replace('\n', "\\n");
    let tag_start = [INFO_TAG, WARN_TAG, ERROR_TAG]
        .iter()
        .filter_map(|tag| escaped.find(tag))
        .min();

    let parts = match tag_start {
        Some(index) if index > 0 => vec![&escaped[..index], &escaped[index..]],
        _ => vec![escaped.as_str()],
    };

    parts
        .into_iter()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat() {
        let msg = Message::parse("[Info] Chat: <^pink;Lumi^reset;> ^white;");
        assert_eq!(msg.level, Level::Chat);
        assert_eq!(msg.author.as_deref(), Some("^pink;Lumi^reset;"));
        assert_eq!(msg.content, "^white;");
    }

    #[test]
    fn test_parse_levels() {
        let info = Message::parse("[Info] UniverseServer: Client 'Bob' <1> (1.2.3.4) connected");
        assert_eq!(info.level, Level::Info);
        assert_eq!(info.author, None);
        assert!(info.content.starts_with("UniverseServer: Client"));

        let warn = Message::parse("[Warn] Could not load asset");
        assert_eq!(warn.level, Level::Warning);
        assert_eq!(warn.content, "Could not load asset");

        let error = Message::parse("  [Error] Fatal Error: boom  ");
        assert_eq!(error.level, Level::Error);
        assert_eq!(error.content, "Fatal Error: boom");
    }

    #[test]
    fn test_parse_untagged_lines() {
        for line in ["return math.factor(749)", "--------", "7 * 107"] {
            let msg = Message::parse(line);
            assert_eq!(msg.level, Level::Error);
            assert_eq!(msg.author, None);
            assert_eq!(msg.content, line);
        }
    }

    #[test]
    fn test_parse_short_line() {
        let msg = Message::parse(" [I] ");
        assert_eq!(msg.level, Level::Error);
        assert_eq!(msg.author.as_deref(), Some(UNKNOWN_AUTHOR));
        assert_eq!(msg.content, "[I]");
    }

    #[test]
    fn test_parse_chat_without_author_end_stays_info() {
        let msg = Message::parse("[Info] Chat: <Bob hello");
        assert_eq!(msg.level, Level::Info);
        assert_eq!(msg.author, None);

        let empty = Message::parse("[Info] Chat: <> hello");
        assert_eq!(empty.level, Level::Info);
    }

    #[test]
    fn test_parse_is_total() {
        let samples = [
            "",
            "[",
            "[Info]",
            "[Info] Chat: <",
            "[Info] Chat: <> ",
            "[Error]",
            "\u{1F600}\u{1F600}\u{1F600}\u{1F600}\u{1F600}\u{1F600}",
            "[Warn]\t\t",
        ];
        for line in samples {
            let msg = Message::parse(line);
            if msg.level == Level::Chat {
                assert!(msg.author.is_some());
            }
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Message::chat("Bob", "hi").to_string(),
            "[Chat] <Bob> hi"
        );
        assert_eq!(
            Message::new(Level::Warning, "careful").to_string(),
            "[Warning] careful"
        );
    }

    #[test]
    fn test_split_entries() {
        assert_eq!(
            split_entries("noise [Info] Server\rstarted\r\n"),
            vec!["noise".to_string(), "[Info] Server\\rstarted".to_string()]
        );
        assert_eq!(
            split_entries("[Warn] only one"),
            vec!["[Warn] only one".to_string()]
        );
        assert!(split_entries("   ").is_empty());
    }
}
