//! Single detection.
//!
//! Pure classification over a track's popularity, its album/artist
//! statistics, and the evidence gathered from the external metadata
//! sources. The pipeline collects the evidence; this module only decides.

use super::stats::AlbumStats;
use crate::store::{ArtistStats, Confidence};
use std::collections::BTreeSet;

pub const SOURCE_POPULARITY_STANDOUT: &str = "popularity_standout";
pub const SOURCE_DISCOGS_SINGLE: &str = "discogs_single";
pub const SOURCE_MUSICBRAINZ_SINGLE: &str = "musicbrainz_single";
pub const SOURCE_SPOTIFY_SINGLE: &str = "spotify_single";
pub const SOURCE_DISCOGS_VIDEO: &str = "discogs_video";
pub const SOURCE_ZSCORE_METADATA: &str = "zscore_metadata";

/// A track this far above the album mean is a standout on popularity alone.
const STANDOUT_MARGIN: f64 = 6.0;

/// Slack below the top-half mean z-score for the z-threshold source.
const Z_THRESHOLD_SLACK: f64 = 0.3;

/// Albums larger than this get the popularity-only downgrade.
const SMALL_ALBUM_TRACKS: usize = 3;

/// External confirmations gathered for one track.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleEvidence {
    /// Popularity client reported `album_type` single/ep with a title match
    /// (live/remix album names already filtered out).
    pub spotify_single: bool,
    /// Metadata-A release group confirmed, version tokens matching.
    pub musicbrainz_single: bool,
    /// Metadata-B release format heuristics confirmed.
    pub discogs_single: bool,
    /// Metadata-B official video matched.
    pub discogs_video: bool,
}

impl SingleEvidence {
    pub fn any_metadata(&self) -> bool {
        self.spotify_single || self.musicbrainz_single || self.discogs_single || self.discogs_video
    }
}

#[derive(Debug, Clone)]
pub struct DetectionInput {
    pub popularity: f64,
    /// Live title or live album context. Live tracks only classify through
    /// a live-version confirmation from a metadata source.
    pub is_live: bool,
    pub album_stats: Option<AlbumStats>,
    /// Total track count of the album (excluded tracks included).
    pub album_track_count: usize,
    /// Artist statistics; consulted only when reliable.
    pub artist_stats: Option<ArtistStats>,
    pub evidence: SingleEvidence,
    /// Whether a video-only match may reach medium confidence on its own.
    pub video_only_allowed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub is_single: bool,
    pub confidence: Confidence,
    pub sources: Vec<String>,
}

impl Detection {
    pub fn none() -> Self {
        Self {
            is_single: false,
            confidence: Confidence::None,
            sources: Vec::new(),
        }
    }
}

/// Classify one track.
pub fn detect(input: &DetectionInput) -> Detection {
    let evidence = input.evidence;

    // Live tracks never classify through statistics; they need a metadata
    // source confirming the live version itself (the pipeline queries the
    // sources under live context for these).
    if input.is_live {
        let mut sources = BTreeSet::new();
        if evidence.musicbrainz_single {
            sources.insert(SOURCE_MUSICBRAINZ_SINGLE.to_string());
        }
        if evidence.discogs_single {
            sources.insert(SOURCE_DISCOGS_SINGLE.to_string());
        }
        if sources.is_empty() {
            return Detection::none();
        }
        return Detection {
            is_single: true,
            confidence: Confidence::Medium,
            sources: sources.into_iter().collect(),
        };
    }

    // Artist sanity filter: a below-average track with no external
    // confirmation is not a single, whatever its album looks like.
    if let Some(artist) = input.artist_stats.filter(|s| s.is_reliable()) {
        if input.popularity < artist.mean && !evidence.any_metadata() {
            return Detection::none();
        }
    }

    let mut sources: BTreeSet<String> = BTreeSet::new();
    let mut high = false;
    let mut medium = false;

    let album_z = input.album_stats.map(|s| s.album_z(input.popularity));

    // High-confidence sources
    if let Some(stats) = &input.album_stats {
        if stats.counted > 1 && input.popularity >= stats.mean + STANDOUT_MARGIN {
            sources.insert(SOURCE_POPULARITY_STANDOUT.to_string());
            high = true;
        }
    }
    if evidence.discogs_single {
        sources.insert(SOURCE_DISCOGS_SINGLE.to_string());
        high = true;
    }

    // Medium-confidence sources: real external confirmation required
    if evidence.musicbrainz_single {
        sources.insert(SOURCE_MUSICBRAINZ_SINGLE.to_string());
        medium = true;
    }
    if evidence.spotify_single {
        sources.insert(SOURCE_SPOTIFY_SINGLE.to_string());
        medium = true;
    }

    let z_qualifies = match (album_z, &input.album_stats) {
        (Some(z), Some(stats)) => z >= stats.mean_top50_z - Z_THRESHOLD_SLACK,
        _ => false,
    };
    if z_qualifies && evidence.any_metadata() {
        sources.insert(SOURCE_ZSCORE_METADATA.to_string());
        medium = true;
    }

    // A video match needs a second signal unless the video-only flag is on
    let video_backed = evidence.spotify_single
        || evidence.musicbrainz_single
        || evidence.discogs_single
        || z_qualifies;
    if evidence.discogs_video && (video_backed || input.video_only_allowed) {
        sources.insert(SOURCE_DISCOGS_VIDEO.to_string());
        medium = true;
    }

    let sources: Vec<String> = sources.into_iter().collect();

    if high {
        return Detection {
            is_single: true,
            confidence: Confidence::High,
            sources,
        };
    }

    if medium {
        // Album-context downgrade: one popularity-only source on a real
        // album is too thin to call it a single.
        if sources.len() == 1
            && sources[0] == SOURCE_SPOTIFY_SINGLE
            && input.album_track_count > SMALL_ALBUM_TRACKS
        {
            return Detection::none();
        }
        return Detection {
            is_single: true,
            confidence: Confidence::Medium,
            sources,
        };
    }

    Detection::none()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn album_stats() -> AlbumStats {
        AlbumStats {
            mean: 57.0,
            median: 53.5,
            stddev: 12.5,
            mean_top50_z: 0.77,
            counted: 10,
        }
    }

    fn reliable_artist() -> ArtistStats {
        ArtistStats {
            mean: 55.0,
            median: 55.0,
            stddev: 10.0,
            track_count: 40,
        }
    }

    fn base_input() -> DetectionInput {
        DetectionInput {
            popularity: 50.0,
            is_live: false,
            album_stats: Some(album_stats()),
            album_track_count: 10,
            artist_stats: Some(reliable_artist()),
            evidence: SingleEvidence::default(),
            video_only_allowed: false,
        }
    }

    #[test]
    fn test_no_evidence_no_standout_is_none() {
        let detection = detect(&base_input());
        assert_eq!(detection.confidence, Confidence::None);
        assert!(!detection.is_single);
        assert!(detection.sources.is_empty());
    }

    #[test]
    fn test_popularity_standout_is_high() {
        let mut input = base_input();
        input.popularity = 85.0; // >= mean + 6
        let detection = detect(&input);
        assert_eq!(detection.confidence, Confidence::High);
        assert!(detection
            .sources
            .contains(&SOURCE_POPULARITY_STANDOUT.to_string()));
    }

    #[test]
    fn test_discogs_single_is_high() {
        let mut input = base_input();
        input.popularity = 60.0;
        input.evidence.discogs_single = true;
        let detection = detect(&input);
        assert_eq!(detection.confidence, Confidence::High);
        assert!(detection.sources.contains(&SOURCE_DISCOGS_SINGLE.to_string()));
    }

    #[test]
    fn test_standout_with_discogs_collects_both_sources() {
        // Reference scenario: pop 85 on the standard album, Discogs
        // confirms -> high with the z source recorded too
        let mut input = base_input();
        input.popularity = 85.0;
        input.evidence.discogs_single = true;
        let detection = detect(&input);
        assert_eq!(detection.confidence, Confidence::High);
        assert!(detection.sources.contains(&SOURCE_DISCOGS_SINGLE.to_string()));
        assert!(detection
            .sources
            .contains(&SOURCE_POPULARITY_STANDOUT.to_string()));
        assert!(detection.sources.contains(&SOURCE_ZSCORE_METADATA.to_string()));
    }

    #[test]
    fn test_musicbrainz_single_is_medium() {
        let mut input = base_input();
        input.popularity = 56.0;
        input.evidence.musicbrainz_single = true;
        // Keep z below threshold so only the MB source fires
        input.album_stats = Some(AlbumStats {
            mean_top50_z: 10.0,
            ..album_stats()
        });
        let detection = detect(&input);
        assert_eq!(detection.confidence, Confidence::Medium);
        assert_eq!(detection.sources, vec![SOURCE_MUSICBRAINZ_SINGLE.to_string()]);
    }

    #[test]
    fn test_zscore_with_metadata_is_medium() {
        let mut input = base_input();
        input.popularity = 70.0; // z ≈ 1.04 >= 0.77 - 0.3
        input.evidence.spotify_single = true;
        let detection = detect(&input);
        assert_eq!(detection.confidence, Confidence::Medium);
        assert!(detection.sources.contains(&SOURCE_ZSCORE_METADATA.to_string()));
        assert!(detection.sources.contains(&SOURCE_SPOTIFY_SINGLE.to_string()));
    }

    #[test]
    fn test_zscore_without_metadata_does_not_fire() {
        let mut input = base_input();
        input.popularity = 70.0;
        // No evidence at all: z alone is not a source
        let detection = detect(&input);
        assert_eq!(detection.confidence, Confidence::None);
    }

    #[test]
    fn test_artist_sanity_filter() {
        let mut input = base_input();
        input.popularity = 40.0; // below artist mean 55
        // z would actually be negative here anyway; the point is the early
        // return: no metadata, below artist mean -> none
        let detection = detect(&input);
        assert_eq!(detection.confidence, Confidence::None);
    }

    #[test]
    fn test_artist_sanity_filter_disabled_when_unreliable() {
        let mut input = base_input();
        input.popularity = 85.0;
        input.artist_stats = Some(ArtistStats {
            track_count: 5,
            ..reliable_artist()
        });
        // Unreliable artist stats: the standout path still applies
        let detection = detect(&input);
        assert_eq!(detection.confidence, Confidence::High);
    }

    #[test]
    fn test_album_context_downgrade_popularity_only() {
        let mut input = base_input();
        input.popularity = 56.0;
        input.evidence.spotify_single = true;
        input.album_track_count = 12;
        // Keep z below threshold so spotify is the only source
        input.album_stats = Some(AlbumStats {
            mean_top50_z: 10.0,
            ..album_stats()
        });
        let detection = detect(&input);
        assert_eq!(detection.confidence, Confidence::None);
    }

    #[test]
    fn test_no_downgrade_on_small_album() {
        let mut input = base_input();
        input.popularity = 56.0;
        input.evidence.spotify_single = true;
        input.album_track_count = 3;
        input.album_stats = Some(AlbumStats {
            mean_top50_z: 10.0,
            ..album_stats()
        });
        let detection = detect(&input);
        assert_eq!(detection.confidence, Confidence::Medium);
    }

    #[test]
    fn test_video_only_needs_secondary_confirmation() {
        let mut input = base_input();
        input.popularity = 56.0;
        input.evidence.discogs_video = true;
        input.album_stats = Some(AlbumStats {
            mean_top50_z: 10.0,
            ..album_stats()
        });
        let detection = detect(&input);
        assert_eq!(detection.confidence, Confidence::None);

        // With the feature flag the video alone reaches medium
        input.video_only_allowed = true;
        let detection = detect(&input);
        assert_eq!(detection.confidence, Confidence::Medium);
        assert_eq!(detection.sources, vec![SOURCE_DISCOGS_VIDEO.to_string()]);
    }

    #[test]
    fn test_video_with_zscore_qualifies() {
        let mut input = base_input();
        input.popularity = 70.0; // clears the z threshold
        input.evidence.discogs_video = true;
        let detection = detect(&input);
        assert_eq!(detection.confidence, Confidence::Medium);
        assert!(detection.sources.contains(&SOURCE_DISCOGS_VIDEO.to_string()));
        assert!(detection.sources.contains(&SOURCE_ZSCORE_METADATA.to_string()));
    }

    #[test]
    fn test_live_track_requires_live_confirmation() {
        let mut input = base_input();
        input.is_live = true;
        input.popularity = 95.0; // standout is irrelevant for live tracks
        let detection = detect(&input);
        assert_eq!(detection.confidence, Confidence::None);

        input.evidence.musicbrainz_single = true;
        let detection = detect(&input);
        assert_eq!(detection.confidence, Confidence::Medium);
        assert_eq!(detection.sources, vec![SOURCE_MUSICBRAINZ_SINGLE.to_string()]);
    }

    #[test]
    fn test_album_of_one_falls_back_to_metadata_only() {
        let mut input = base_input();
        input.album_stats = None;
        input.album_track_count = 1;
        input.popularity = 90.0;
        // No stats: no standout, no z; metadata still classifies
        let detection = detect(&input);
        assert_eq!(detection.confidence, Confidence::None);

        input.evidence.musicbrainz_single = true;
        let detection = detect(&input);
        assert_eq!(detection.confidence, Confidence::Medium);
    }

    #[test]
    fn test_none_confidence_implies_not_single() {
        let detection = detect(&base_input());
        assert!(detection.confidence != Confidence::None || !detection.is_single);
    }
}
