//! Catalog entity types shared by the store, the scan pipeline, and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Three-level classification of a track's single status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Confidence {
    #[default]
    None,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::None => "none",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Confidence::None),
            "medium" => Some(Confidence::Medium),
            "high" => Some(Confidence::High),
            _ => None,
        }
    }
}

/// Release type as reported by external sources and stored on albums.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlbumType {
    Album,
    Ep,
    Single,
    Compilation,
}

impl AlbumType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlbumType::Album => "album",
            AlbumType::Ep => "ep",
            AlbumType::Single => "single",
            AlbumType::Compilation => "compilation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "album" => Some(AlbumType::Album),
            "ep" => Some(AlbumType::Ep),
            "single" => Some(AlbumType::Single),
            "compilation" => Some(AlbumType::Compilation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanType {
    LibraryImport,
    Popularity,
    BeetsImport,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::LibraryImport => "library_import",
            ScanType::Popularity => "popularity",
            ScanType::BeetsImport => "beets_import",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "library_import" => Some(ScanType::LibraryImport),
            "popularity" => Some(ScanType::Popularity),
            "beets_import" => Some(ScanType::BeetsImport),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Completed,
    Error,
    Skipped,
    Interrupted,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Completed => "completed",
            ScanStatus::Error => "error",
            ScanStatus::Skipped => "skipped",
            ScanStatus::Interrupted => "interrupted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(ScanStatus::Completed),
            "error" => Some(ScanStatus::Error),
            "skipped" => Some(ScanStatus::Skipped),
            "interrupted" => Some(ScanStatus::Interrupted),
            _ => None,
        }
    }
}

/// Cached external identifiers for an artist, one per source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistExternalIds {
    pub spotify_id: Option<String>,
    pub lastfm_mbid: Option<String>,
    pub musicbrainz_mbid: Option<String>,
    pub discogs_id: Option<String>,
}

/// Aggregate popularity statistics for an artist, derived from scanned tracks.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ArtistStats {
    pub mean: f64,
    pub median: f64,
    pub stddev: f64,
    pub track_count: usize,
}

impl ArtistStats {
    /// Artist statistics are only trusted once enough tracks back them.
    pub const MIN_RELIABLE_TRACKS: usize = 10;

    pub fn is_reliable(&self) -> bool {
        self.track_count >= Self::MIN_RELIABLE_TRACKS
    }
}

#[derive(Debug, Clone, Default)]
pub struct Artist {
    pub id: i64,
    pub name: String,
    pub genres: Vec<String>,
    pub external_ids: ArtistExternalIds,
    pub stats: Option<ArtistStats>,
    pub stats_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct Album {
    pub id: i64,
    pub artist: String,
    pub title: String,
    pub release_year: Option<i32>,
    pub release_date: Option<String>,
    pub album_type: Option<AlbumType>,
    pub track_count: Option<u32>,
    pub disc_count: Option<u32>,
    pub cover_art_url: Option<String>,
    pub genres: Vec<String>,
    pub musicbrainz_release_id: Option<String>,
    pub discogs_release_id: Option<String>,
    pub last_scanned: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct Track {
    pub id: i64,
    /// Opaque id assigned by the music library server.
    pub library_id: Option<String>,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_sec: u32,
    pub isrc: Option<String>,
    pub file_path: Option<String>,
    pub spotify_id: Option<String>,
    pub lastfm_mbid: Option<String>,
    pub musicbrainz_mbid: Option<String>,
    pub discogs_release_id: Option<String>,
    pub popularity_score: f64,
    pub stars: u8,
    pub is_single: bool,
    pub single_confidence: Confidence,
    pub single_sources: Vec<String>,
    pub album_z: Option<f64>,
    pub artist_z: Option<f64>,
    pub alternate_take: bool,
    pub base_track_id: Option<i64>,
    pub last_popularity_lookup: Option<DateTime<Utc>>,
    pub last_scanned: Option<DateTime<Utc>>,
}

impl Track {
    /// The content key used for deduplication:
    /// `(artist_lc, album_lc, title_lc, round(duration))`.
    pub fn content_key(&self) -> (String, String, String, i64) {
        (
            self.artist.to_lowercase(),
            self.album.to_lowercase(),
            self.title.to_lowercase(),
            self.duration_sec as i64,
        )
    }

    /// Metadata-quality score used to pick the winner when two rows collide
    /// on the content key. Higher wins; ties break on `last_scanned` recency.
    pub fn metadata_quality_score(&self) -> i64 {
        let mut score = 0;
        if self.musicbrainz_mbid.is_some() {
            score += 500;
        }
        if self.discogs_release_id.is_some() {
            score += 200;
        }
        if self.file_path.is_some() {
            score += 200;
        }
        if self.duration_sec > 0 {
            score += 50;
        }
        if self.popularity_score > 0.0 {
            score += 30;
        }
        if self.is_single {
            score += 20;
        }
        if self.stars > 0 {
            score += 10;
        }
        score
    }
}

#[derive(Debug, Clone)]
pub struct ScanHistoryEntry {
    pub id: i64,
    pub artist: String,
    pub album: String,
    pub scan_type: ScanType,
    pub timestamp: DateTime<Utc>,
    pub tracks_processed: u32,
    pub status: ScanStatus,
}

/// One row of an atomic popularity batch update.
#[derive(Debug, Clone)]
pub struct PopularityUpdate {
    pub track_id: i64,
    pub popularity_score: f64,
    pub album_z: Option<f64>,
    pub artist_z: Option<f64>,
    pub looked_up_at: Option<DateTime<Utc>>,
}

/// One row of an atomic single-status batch update.
#[derive(Debug, Clone)]
pub struct SinglesUpdate {
    pub track_id: i64,
    pub is_single: bool,
    pub confidence: Confidence,
    pub sources: Vec<String>,
    pub stars: u8,
}

/// One row of an alternate-take batch update.
#[derive(Debug, Clone, Copy)]
pub struct AlternateUpdate {
    pub track_id: i64,
    pub alternate_take: bool,
    /// For alternate takes, the row id of the base recording.
    pub base_track_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_round_trip() {
        for c in [Confidence::None, Confidence::Medium, Confidence::High] {
            assert_eq!(Confidence::parse(c.as_str()), Some(c));
        }
        assert_eq!(Confidence::parse("bogus"), None);
    }

    #[test]
    fn test_scan_type_round_trip() {
        for t in [
            ScanType::LibraryImport,
            ScanType::Popularity,
            ScanType::BeetsImport,
        ] {
            assert_eq!(ScanType::parse(t.as_str()), Some(t));
        }
    }

    #[test]
    fn test_album_type_parse_case_insensitive() {
        assert_eq!(AlbumType::parse("Single"), Some(AlbumType::Single));
        assert_eq!(AlbumType::parse("EP"), Some(AlbumType::Ep));
        assert_eq!(AlbumType::parse("weird"), None);
    }

    #[test]
    fn test_metadata_quality_score_ordering() {
        let bare = Track {
            title: "Song".into(),
            artist: "Artist".into(),
            album: "Album".into(),
            duration_sec: 200,
            ..Default::default()
        };
        let rich = Track {
            musicbrainz_mbid: Some("mbid".into()),
            file_path: Some("/music/song.flac".into()),
            ..bare.clone()
        };
        assert!(rich.metadata_quality_score() > bare.metadata_quality_score());
    }

    #[test]
    fn test_content_key_lowercases() {
        let track = Track {
            title: "Song Title".into(),
            artist: "The Artist".into(),
            album: "The Album".into(),
            duration_sec: 187,
            ..Default::default()
        };
        let (artist, album, title, duration) = track.content_key();
        assert_eq!(artist, "the artist");
        assert_eq!(album, "the album");
        assert_eq!(title, "song title");
        assert_eq!(duration, 187);
    }
}
