//! Persistent catalog: artists, albums, tracks, scan history.
//!
//! A single embedded SQLite database in WAL mode. Writes are serialized
//! behind the connection mutex; readers run concurrently through WAL.

mod models;
mod schema;
mod sqlite_store;

pub use models::{
    Album, AlbumType, AlternateUpdate, Artist, ArtistExternalIds, ArtistStats, Confidence,
    PopularityUpdate, ScanHistoryEntry, ScanStatus, ScanType, SinglesUpdate, Track,
};
pub use sqlite_store::SqliteStore;

use anyhow::Result;

/// The catalog persistence contract consumed by the scan pipeline and CLI.
pub trait Store: Send + Sync {
    /// Insert or refresh an artist row, returning its id.
    fn upsert_artist(&self, name: &str, genres: &[String]) -> Result<i64>;

    fn get_artist(&self, name: &str) -> Result<Option<Artist>>;

    fn list_artist_names(&self) -> Result<Vec<String>>;

    /// Cache resolved external ids for an artist. Only non-null ids are
    /// written; existing ids are never cleared by a `None`.
    fn set_artist_external_ids(&self, name: &str, ids: &ArtistExternalIds) -> Result<()>;

    fn update_artist_stats(&self, name: &str, stats: &ArtistStats) -> Result<()>;

    fn upsert_album(&self, album: &Album) -> Result<i64>;

    fn list_albums(&self, artist: &str) -> Result<Vec<Album>>;

    /// Insert a track, or merge it into an existing row whose content key
    /// collides. Returns the id of the surviving row.
    ///
    /// A plain import never overwrites
    /// `is_single`/`single_confidence`/`single_sources`/`stars`; those are
    /// written only through [`Store::batch_update_singles`].
    fn upsert_track(&self, track: &Track) -> Result<i64>;

    fn get_album_tracks(&self, artist: &str, album: &str) -> Result<Vec<Track>>;

    fn get_artist_tracks(&self, artist: &str) -> Result<Vec<Track>>;

    /// Atomically apply popularity results. `last_popularity_lookup` only
    /// advances; a stale timestamp in a row never moves it backward.
    fn batch_update_popularity(&self, rows: &[PopularityUpdate]) -> Result<()>;

    /// Atomically apply single-detection results and star ratings.
    fn batch_update_singles(&self, rows: &[SinglesUpdate]) -> Result<()>;

    /// Atomically record which tracks are alternate takes of which base
    /// recordings.
    fn batch_update_alternates(&self, rows: &[AlternateUpdate]) -> Result<()>;

    fn record_scan(
        &self,
        artist: &str,
        album: &str,
        scan_type: ScanType,
        tracks_processed: u32,
        status: ScanStatus,
    ) -> Result<()>;

    fn recent_scans(&self, limit: usize) -> Result<Vec<ScanHistoryEntry>>;

    fn was_album_scanned(
        &self,
        artist: &str,
        album: &str,
        scan_type: ScanType,
        within_days: i64,
    ) -> Result<bool>;

    /// Re-run content-key deduplication across the whole tracks table.
    /// The only operation that deletes rows. Returns the number removed.
    fn dedup_tracks(&self) -> Result<usize>;

    /// Loved-content guard: scans must never write these tables.
    fn love_track(&self, user: &str, track_id: i64) -> Result<()>;

    fn is_track_loved(&self, user: &str, track_id: i64) -> Result<bool>;
}
