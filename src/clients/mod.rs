//! External music-database clients.
//!
//! Four clients behind uniform trait seams: Spotify (track popularity),
//! Last.fm (scrobbles), MusicBrainz (release groups), Discogs (release
//! formats and videos). Every client owns its retry policy, per-host
//! throttle, and a bounded in-memory cache; errors never escape a trait
//! method: they are coerced to `None`/`false`/empty and logged at info.

mod cache;
mod discogs;
mod http;
mod lastfm;
mod musicbrainz;
mod spotify;

pub use cache::RequestCache;
pub use discogs::DiscogsClient;
pub use http::{ClientError, HttpPolicy};
pub use lastfm::LastFmClient;
pub use musicbrainz::MusicBrainzClient;
pub use spotify::SpotifyClient;

use crate::store::AlbumType;
use async_trait::async_trait;

/// A track candidate returned by the popularity service's search.
#[derive(Debug, Clone)]
pub struct TrackCandidate {
    pub id: String,
    pub album_type: Option<AlbumType>,
    pub album_name: String,
    /// Popularity score, 0..=100.
    pub popularity: f64,
    pub duration_ms: Option<u64>,
}

/// Scrobble data for one track.
#[derive(Debug, Clone, Default)]
pub struct TrackScrobbles {
    pub playcount: u64,
    pub tags: Vec<ScrobbleTag>,
}

#[derive(Debug, Clone)]
pub struct ScrobbleTag {
    pub name: String,
    pub count: u32,
}

/// A MusicBrainz release group.
#[derive(Debug, Clone, Default)]
pub struct ReleaseGroup {
    pub title: String,
    pub primary_type: Option<String>,
    pub secondary_types: Vec<String>,
    pub first_release_date: Option<String>,
}

/// Album context inherited by per-track lookups. Live/unplugged albums relax
/// the version-token and banned-flavor filters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReleaseContext {
    pub is_live: bool,
    pub is_unplugged: bool,
}

impl ReleaseContext {
    pub fn live_ok(&self) -> bool {
        self.is_live || self.is_unplugged
    }
}

/// Popularity service operations (Spotify).
#[async_trait]
pub trait PopularityApi: Send + Sync {
    /// Resolve an artist name to the service's artist id.
    async fn find_artist_id(&self, name: &str) -> Option<String>;

    /// Search track candidates by title/artist (and optionally album).
    async fn search_track(
        &self,
        title: &str,
        artist: &str,
        album: Option<&str>,
    ) -> Vec<TrackCandidate>;
}

/// Scrobble service operations (Last.fm).
#[async_trait]
pub trait ScrobbleApi: Send + Sync {
    async fn track_info(&self, artist: &str, title: &str) -> Option<TrackScrobbles>;
}

/// Release-group metadata operations (MusicBrainz).
#[async_trait]
pub trait ReleaseGroupApi: Send + Sync {
    /// Whether a release group confirms the track as a single. The track's
    /// version tokens must match the release group's exactly.
    async fn is_single(&self, title: &str, artist: &str) -> bool;

    async fn release_group(&self, mbid: &str) -> Option<ReleaseGroup>;
}

/// Release-format and video metadata operations (Discogs).
#[async_trait]
pub trait ReleaseFormatApi: Send + Sync {
    async fn is_single(&self, title: &str, artist: &str, ctx: ReleaseContext) -> bool;

    async fn has_official_video(&self, title: &str, artist: &str, ctx: ReleaseContext) -> bool;
}
