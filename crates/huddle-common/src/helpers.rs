//! Common helper functions for Huddle.

use std::time::{SystemTime, UNIX_EPOCH};

/// Longest chat line the gateway will relay, in characters.
pub const MAX_CHAT_CHARS: usize = 500;

/// Longest accepted room id, in characters.
pub const MAX_ROOM_ID_CHARS: usize = 128;

/// Truncates chat text to [`MAX_CHAT_CHARS`] and rejects blank lines.
///
/// Returns `None` when nothing but whitespace remains.
pub fn sanitize_chat_text(text: &str) -> Option<String> {
    let truncated: String = text.chars().take(MAX_CHAT_CHARS).collect();
    if truncated.trim().is_empty() {
        return None;
    }
    Some(truncated)
}

pub fn is_valid_room_id(room_id: &str) -> bool {
    let len = room_id.chars().count();
    (1..=MAX_ROOM_ID_CHARS).contains(&len) && room_id.chars().all(|c| !c.is_control())
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

pub fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_truncates_to_limit() {
        let text = "a".repeat(600);
        let sanitized = sanitize_chat_text(&text).unwrap();
        assert_eq!(sanitized.chars().count(), MAX_CHAT_CHARS);
    }

    #[test]
    fn test_chat_keeps_short_text_verbatim() {
        assert_eq!(sanitize_chat_text("hello").as_deref(), Some("hello"));
        assert_eq!(sanitize_chat_text("  hi  ").as_deref(), Some("  hi  "));
    }

    #[test]
    fn test_chat_rejects_blank() {
        assert!(sanitize_chat_text("").is_none());
        assert!(sanitize_chat_text("   \t\n").is_none());
    }

    #[test]
    fn test_chat_counts_characters_not_bytes() {
        let text = "é".repeat(501);
        let sanitized = sanitize_chat_text(&text).unwrap();
        assert_eq!(sanitized.chars().count(), MAX_CHAT_CHARS);
    }

    #[test]
    fn test_room_id_validation() {
        assert!(is_valid_room_id("r1"));
        assert!(is_valid_room_id("会議室"));
        assert!(!is_valid_room_id(""));
        assert!(!is_valid_room_id("bad\nroom"));
        assert!(!is_valid_room_id(&"x".repeat(MAX_ROOM_ID_CHARS + 1)));
    }
}
