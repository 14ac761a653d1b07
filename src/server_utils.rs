use crate::constants::MAX_NAME_CHARS;

pub const ANONYMOUS_PLAYER: &str = "Anonymous";

/// Display name for a new session.
pub fn sanitize_player_name(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return ANONYMOUS_PLAYER.to_string();
    }
    trimmed.chars().take(MAX_NAME_CHARS).collect()
}

/// Leaderboard key for a submitted name. Case-sensitive; blank names have no key.
pub fn ranking_key(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

pub fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|raw| !raw.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_player_name_applies_trim_empty_and_max_len() {
        assert_eq!(sanitize_player_name(""), "Anonymous");
        assert_eq!(sanitize_player_name("   "), "Anonymous");
        assert_eq!(sanitize_player_name(" Ana "), "Ana");
        assert_eq!(
            sanitize_player_name("abcdefghijklmnopqrstuvwxyz0123"),
            "abcdefghijklmnopqrstuvwx"
        );
    }

    #[test]
    fn ranking_key_is_trimmed_and_case_sensitive() {
        assert_eq!(ranking_key("  Ana "), Some("Ana".to_string()));
        assert_ne!(ranking_key("ana"), ranking_key("Ana"));
        assert_eq!(ranking_key(" \t "), None);
    }

    #[test]
    fn non_blank_drops_whitespace_values() {
        assert_eq!(non_blank(Some("  ".to_string())), None);
        assert_eq!(non_blank(None), None);
        assert_eq!(non_blank(Some("x".to_string())), Some("x".to_string()));
    }
}
