//! Essential-playlist emission.
//!
//! After an artist finishes scanning, a Navidrome smart playlist (`.nsp`)
//! is written when the artist has enough five-star tracks or a large enough
//! catalog. Overwrites are idempotent.

use crate::store::Track;
use anyhow::{Context, Result};
use serde_json::json;
use std::path::{Path, PathBuf};

/// Case A: at least this many five-star tracks emits the 5★ playlist.
const MIN_FIVE_STAR_TRACKS: usize = 10;

/// Case B: at least this many total tracks emits the top-10% playlist.
const MIN_TOTAL_TRACKS: usize = 100;

/// Share of the catalog selected in case B.
const TOP_SHARE: f64 = 0.10;

fn playlist_file_name(artist: &str) -> String {
    let slug: String = artist
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}_essential.nsp", slug.to_lowercase())
}

/// Decide whether the artist earns a playlist, and of which shape.
fn playlist_spec(artist: &str, tracks: &[Track]) -> Option<serde_json::Value> {
    let five_star_count = tracks.iter().filter(|t| t.stars == 5).count();

    if five_star_count >= MIN_FIVE_STAR_TRACKS {
        // Case A: the five-star set
        return Some(json!({
            "name": format!("{} Essentials", artist),
            "comment": "Five-star tracks",
            "all": [
                {"is": {"artist": artist}},
                {"is": {"rating": 5}}
            ],
            "sort": "title",
            "order": "asc"
        }));
    }

    if tracks.len() >= MIN_TOTAL_TRACKS {
        // Case B: the top 10% by rating
        let limit = ((tracks.len() as f64 * TOP_SHARE).ceil() as usize).max(1);
        return Some(json!({
            "name": format!("{} Essentials", artist),
            "comment": "Top tracks by rating",
            "all": [
                {"is": {"artist": artist}}
            ],
            "sort": "rating",
            "order": "desc",
            "limit": limit
        }));
    }

    None
}

/// Write the essential playlist for an artist, if it qualifies.
///
/// Returns the written path, or `None` when the thresholds are not met.
pub fn emit_essential_playlist(
    dir: &Path,
    artist: &str,
    tracks: &[Track],
) -> Result<Option<PathBuf>> {
    let Some(spec) = playlist_spec(artist, tracks) else {
        return Ok(None);
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create playlist directory {:?}", dir))?;
    let path = dir.join(playlist_file_name(artist));
    let body = serde_json::to_string_pretty(&spec)?;
    std::fs::write(&path, body)
        .with_context(|| format!("Failed to write playlist {:?}", path))?;
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(stars: u8) -> Track {
        Track {
            title: "Song".to_string(),
            artist: "Artist".to_string(),
            album: "Album".to_string(),
            stars,
            ..Default::default()
        }
    }

    #[test]
    fn test_five_star_set_spec() {
        let tracks: Vec<Track> = (0..10).map(|_| track(5)).collect();
        let spec = playlist_spec("Artist", &tracks).unwrap();
        assert_eq!(spec["all"][1]["is"]["rating"], 5);
        assert!(spec.get("limit").is_none());
    }

    #[test]
    fn test_top_ten_percent_spec() {
        // 9 five-star tracks is below case A, but 120 total hits case B
        let mut tracks: Vec<Track> = (0..9).map(|_| track(5)).collect();
        tracks.extend((0..111).map(|_| track(2)));
        let spec = playlist_spec("Artist", &tracks).unwrap();
        assert_eq!(spec["limit"], 12);
        assert_eq!(spec["order"], "desc");
        assert_eq!(spec["sort"], "rating");
    }

    #[test]
    fn test_small_artist_gets_no_playlist() {
        let tracks: Vec<Track> = (0..20).map(|_| track(3)).collect();
        assert!(playlist_spec("Artist", &tracks).is_none());
    }

    #[test]
    fn test_emit_is_idempotent_overwrite() {
        let dir = tempfile::TempDir::new().unwrap();
        let tracks: Vec<Track> = (0..10).map(|_| track(5)).collect();

        let first = emit_essential_playlist(dir.path(), "The Artist", &tracks)
            .unwrap()
            .unwrap();
        let second = emit_essential_playlist(dir.path(), "The Artist", &tracks)
            .unwrap()
            .unwrap();
        assert_eq!(first, second);

        let body = std::fs::read_to_string(&first).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["all"][0]["is"]["artist"], "The Artist");
    }

    #[test]
    fn test_file_name_is_sanitized() {
        assert_eq!(
            playlist_file_name("AC/DC & Friends"),
            "ac_dc___friends_essential.nsp"
        );
    }

    #[test]
    fn test_below_thresholds_writes_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let tracks: Vec<Track> = (0..5).map(|_| track(5)).collect();
        let result = emit_essential_playlist(dir.path(), "Artist", &tracks).unwrap();
        assert!(result.is_none());
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }
}
