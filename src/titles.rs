//! Track and album title parsing.
//!
//! Version-descriptor extraction, base-title stripping, normalization, and
//! live-context detection. All classification and matching logic in the scan
//! pipeline goes through this module so the keyword sets live in one place.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Keywords that mark a title segment as a version descriptor.
pub const VERSION_KEYWORDS: &[&str] = &[
    "live",
    "acoustic",
    "unplugged",
    "remix",
    "edit",
    "demo",
    "instrumental",
    "karaoke",
    "remaster",
    "remastered",
    "orchestral",
    "mix",
];

/// Titles containing any of these are never sent to the popularity or
/// scrobble APIs; they receive a baseline score only.
pub const SKIP_KEYWORDS: &[&str] = &[
    "intro",
    "outro",
    "jam",
    "live",
    "unplugged",
    "remix",
    "edit",
    "mix",
    "acoustic",
    "orchestral",
    "demo",
    "instrumental",
    "karaoke",
    "remaster",
    "remastered",
];

/// Markers that flag an album (title or notes) as a live/unplugged recording.
const LIVE_CONTEXT_MARKERS: &[&str] = &["live", "unplugged", "in concert", "on stage", "recorded live"];

fn trailing_paren_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\([^)]*\)\s*$").unwrap())
}

fn bracketed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[(\[][^)\]]*[)\]]").unwrap())
}

/// Whether the title ends in a parenthesized segment, e.g. `"Song (Live)"`.
pub fn has_trailing_parenthetical(title: &str) -> bool {
    trailing_paren_re().is_match(title)
}

/// The title with any trailing parenthesized segment removed and trimmed.
///
/// `"Song (Acoustic)"` → `"Song"`, `"Song"` → `"Song"`.
pub fn base_title(title: &str) -> String {
    trailing_paren_re().replace(title, "").trim().to_string()
}

/// Extract version tokens from a title.
///
/// The version descriptor is the content of a trailing `(...)` segment, or
/// the suffix after a trailing ` - ` separator. The descriptor is lowercased,
/// tokenized, and intersected with [`VERSION_KEYWORDS`]. Returns the token
/// set; an empty set means the title names no recognized version.
pub fn version_tokens(title: &str) -> BTreeSet<String> {
    let descriptor = extract_descriptor(title);
    let Some(descriptor) = descriptor else {
        return BTreeSet::new();
    };

    descriptor
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|tok| VERSION_KEYWORDS.contains(tok))
        .map(|tok| tok.to_string())
        .collect()
}

fn extract_descriptor(title: &str) -> Option<String> {
    let trimmed = title.trim_end();
    if trimmed.ends_with(')') {
        if let Some(open) = trimmed.rfind('(') {
            return Some(trimmed[open + 1..trimmed.len() - 1].to_string());
        }
    }
    // " - Remastered 2011" style suffix
    trimmed.rfind(" - ").map(|idx| trimmed[idx + 3..].to_string())
}

/// Whether the title contains a keyword that disqualifies it from external
/// popularity lookups (intro/outro/live/remix/...).
///
/// Matching is on word boundaries so that e.g. "Remixed Feelings" does not
/// trip on "mix" but "Song (Club Mix)" does.
pub fn contains_skip_keyword(title: &str) -> bool {
    let lower = title.to_lowercase();
    lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|tok| SKIP_KEYWORDS.contains(&tok))
}

/// Normalize a title for cross-source comparison: lowercase, drop bracketed
/// segments, strip punctuation, collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    let without_brackets = bracketed_re().replace_all(title, " ");
    let mut out = String::with_capacity(without_brackets.len());
    let mut last_was_space = true;
    for c in without_brackets.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }
    out.trim_end().to_string()
}

/// Whether two titles are equal after normalization.
pub fn titles_match(a: &str, b: &str) -> bool {
    normalize_title(a) == normalize_title(b)
}

/// Whether album title or notes mark a live/unplugged context.
pub fn is_live_context(text: &str) -> bool {
    let lower = text.to_lowercase();
    LIVE_CONTEXT_MARKERS.iter().any(|m| {
        if m.contains(' ') {
            lower.contains(m)
        } else {
            lower
                .split(|c: char| !c.is_alphanumeric())
                .any(|tok| tok == *m)
        }
    })
}

/// Whether a track title names a live version.
pub fn is_live_title(title: &str) -> bool {
    version_tokens(title).contains("live")
        || title
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .any(|tok| tok == "live")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_title_strips_trailing_parenthetical() {
        assert_eq!(base_title("Song (Live)"), "Song");
        assert_eq!(base_title("Song (Live in Wacken 2022)"), "Song");
        assert_eq!(base_title("Song"), "Song");
        assert_eq!(base_title("Song (feat. X) (Acoustic)"), "Song (feat. X)");
    }

    #[test]
    fn test_has_trailing_parenthetical() {
        assert!(has_trailing_parenthetical("Song (Live)"));
        assert!(has_trailing_parenthetical("Song (Acoustic) "));
        assert!(!has_trailing_parenthetical("Song"));
        assert!(!has_trailing_parenthetical("(Intro) Song"));
    }

    #[test]
    fn test_version_tokens_from_parenthetical() {
        let tokens = version_tokens("Song (Live in Wacken 2022)");
        assert!(tokens.contains("live"));
        assert_eq!(tokens.len(), 1);
    }

    #[test]
    fn test_version_tokens_from_dash_suffix() {
        let tokens = version_tokens("Song - Remastered 2011");
        assert!(tokens.contains("remastered"));
    }

    #[test]
    fn test_version_tokens_multiple() {
        let tokens = version_tokens("Song (Live Acoustic Mix)");
        assert!(tokens.contains("live"));
        assert!(tokens.contains("acoustic"));
        assert!(tokens.contains("mix"));
    }

    #[test]
    fn test_version_tokens_plain_title_empty() {
        assert!(version_tokens("Song").is_empty());
        // Parenthetical without version keywords
        assert!(version_tokens("Song (feat. Someone)").is_empty());
    }

    #[test]
    fn test_version_token_sets_differ() {
        // The Metadata-A version guard: "(Live ...)" vs a plain release group
        let track = version_tokens("Song (Live in Wacken 2022)");
        let release_group = version_tokens("Song");
        assert_ne!(track, release_group);
    }

    #[test]
    fn test_contains_skip_keyword() {
        assert!(contains_skip_keyword("Intro"));
        assert!(contains_skip_keyword("Song (Club Mix)"));
        assert!(contains_skip_keyword("song LIVE at wembley"));
        assert!(!contains_skip_keyword("Remixed Feelings"));
        assert!(!contains_skip_keyword("Outrowed"));
        assert!(!contains_skip_keyword("Plain Song"));
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("Song Title"), "song title");
        assert_eq!(normalize_title("Song (Remastered 2011)"), "song");
        assert_eq!(normalize_title("Don't Stop!"), "don t stop");
        assert_eq!(normalize_title("  Song   [Bonus]  "), "song");
    }

    #[test]
    fn test_titles_match() {
        assert!(titles_match("Song Title", "song title"));
        assert!(titles_match("Song (Single Version)", "Song"));
        assert!(!titles_match("Song One", "Song Two"));
    }

    #[test]
    fn test_is_live_context() {
        assert!(is_live_context("Live at Budokan"));
        assert!(is_live_context("MTV Unplugged"));
        assert!(is_live_context("An Evening In Concert"));
        assert!(is_live_context("recorded live at the Roxy"));
        assert!(!is_live_context("Alive and Kicking"));
        assert!(!is_live_context("Delivery"));
    }

    #[test]
    fn test_is_live_title() {
        assert!(is_live_title("Song (Live)"));
        assert!(is_live_title("Song Live At Wembley"));
        assert!(!is_live_title("Alive"));
    }
}
