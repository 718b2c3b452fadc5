//! The music library server seam.
//!
//! The pipeline only depends on four operations: list artists, list albums,
//! list tracks, apply a rating. The Subsonic adapter is the production
//! implementation; tests substitute their own.

mod subsonic;

pub use subsonic::SubsonicLibrary;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("library unreachable: {0}")]
    Unreachable(String),
    #[error("library request failed: {0}")]
    Request(String),
    #[error("unexpected library response: {0}")]
    Response(String),
}

#[derive(Debug, Clone)]
pub struct LibraryArtist {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct LibraryAlbum {
    pub id: String,
    pub artist: String,
    pub title: String,
    pub year: Option<i32>,
    pub genre: Option<String>,
    pub cover_art: Option<String>,
    pub track_count: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct LibraryTrack {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_sec: u32,
    pub path: Option<String>,
    pub genre: Option<String>,
    pub disc_number: Option<u32>,
}

/// The four library operations the pipeline consumes.
#[async_trait]
pub trait Library: Send + Sync {
    /// Cheap connectivity probe, used at startup.
    async fn ping(&self) -> Result<(), LibraryError>;

    async fn list_artists(&self) -> Result<Vec<LibraryArtist>, LibraryError>;

    async fn list_albums(&self, artist: &LibraryArtist)
        -> Result<Vec<LibraryAlbum>, LibraryError>;

    async fn list_tracks(&self, album: &LibraryAlbum) -> Result<Vec<LibraryTrack>, LibraryError>;

    async fn apply_rating(&self, track_id: &str, stars: u8) -> Result<(), LibraryError>;
}
