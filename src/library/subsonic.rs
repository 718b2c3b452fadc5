//! Thin Subsonic-REST adapter for the [`Library`] trait.
//!
//! Speaks the JSON flavor of the Subsonic API (`f=json`) with API-key
//! authentication. Only the four operations the pipeline needs are
//! implemented.

use super::{Library, LibraryAlbum, LibraryArtist, LibraryError, LibraryTrack};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::time::Duration;

const CLIENT_NAME: &str = "trackstar";
const PROTOCOL_VERSION: &str = "1.16.1";

pub struct SubsonicLibrary {
    session: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "subsonic-response")]
    response: SubsonicResponse,
}

#[derive(Deserialize)]
struct SubsonicResponse {
    status: String,
    error: Option<ApiError>,
    artists: Option<ArtistsIndex>,
    artist: Option<ArtistDetail>,
    album: Option<AlbumDetail>,
}

#[derive(Deserialize)]
struct ApiError {
    code: i64,
    message: Option<String>,
}

#[derive(Deserialize)]
struct ArtistsIndex {
    #[serde(default)]
    index: Vec<IndexEntry>,
}

#[derive(Deserialize)]
struct IndexEntry {
    #[serde(default)]
    artist: Vec<ApiArtist>,
}

#[derive(Deserialize)]
struct ApiArtist {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct ArtistDetail {
    #[serde(default)]
    album: Vec<ApiAlbum>,
}

#[derive(Deserialize)]
struct ApiAlbum {
    id: String,
    #[serde(default)]
    name: String,
    artist: Option<String>,
    year: Option<i32>,
    genre: Option<String>,
    #[serde(rename = "coverArt")]
    cover_art: Option<String>,
    #[serde(rename = "songCount")]
    song_count: Option<u32>,
}

#[derive(Deserialize)]
struct AlbumDetail {
    #[serde(default)]
    song: Vec<ApiSong>,
}

#[derive(Deserialize)]
struct ApiSong {
    id: String,
    #[serde(default)]
    title: String,
    artist: Option<String>,
    album: Option<String>,
    duration: Option<u32>,
    path: Option<String>,
    genre: Option<String>,
    #[serde(rename = "discNumber")]
    disc_number: Option<u32>,
}

impl SubsonicLibrary {
    pub fn new(base_url: &str, token: &str) -> Result<Self, LibraryError> {
        let session = reqwest::Client::builder()
            .default_headers(HeaderMap::new())
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| LibraryError::Request(e.to_string()))?;
        Ok(Self {
            session,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn endpoint(&self, method: &str, extra: &[(&str, &str)]) -> String {
        let mut url = format!(
            "{}/rest/{}?f=json&v={}&c={}&apiKey={}",
            self.base_url,
            method,
            PROTOCOL_VERSION,
            CLIENT_NAME,
            urlencoding::encode(&self.token)
        );
        for (key, value) in extra {
            url.push_str(&format!("&{}={}", key, urlencoding::encode(value)));
        }
        url
    }

    async fn call(&self, url: &str) -> Result<SubsonicResponse, LibraryError> {
        let response = self
            .session
            .get(url)
            .send()
            .await
            .map_err(|e| LibraryError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LibraryError::Request(format!(
                "status {}",
                response.status()
            )));
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| LibraryError::Response(e.to_string()))?;

        let body = envelope.response;
        if body.status != "ok" {
            let detail = body
                .error
                .map(|e| format!("code {}: {}", e.code, e.message.unwrap_or_default()))
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(LibraryError::Request(detail));
        }
        Ok(body)
    }
}

#[async_trait]
impl Library for SubsonicLibrary {
    async fn ping(&self) -> Result<(), LibraryError> {
        self.call(&self.endpoint("ping", &[])).await.map(|_| ())
    }

    async fn list_artists(&self) -> Result<Vec<LibraryArtist>, LibraryError> {
        let body = self.call(&self.endpoint("getArtists", &[])).await?;
        let artists = body
            .artists
            .ok_or_else(|| LibraryError::Response("missing artists index".to_string()))?
            .index
            .into_iter()
            .flat_map(|entry| entry.artist)
            .map(|artist| LibraryArtist {
                id: artist.id,
                name: artist.name,
            })
            .collect();
        Ok(artists)
    }

    async fn list_albums(
        &self,
        artist: &LibraryArtist,
    ) -> Result<Vec<LibraryAlbum>, LibraryError> {
        let body = self
            .call(&self.endpoint("getArtist", &[("id", &artist.id)]))
            .await?;
        let albums = body
            .artist
            .map(|detail| detail.album)
            .unwrap_or_default()
            .into_iter()
            .map(|album| LibraryAlbum {
                id: album.id,
                artist: album.artist.unwrap_or_else(|| artist.name.clone()),
                title: album.name,
                year: album.year,
                genre: album.genre,
                cover_art: album.cover_art,
                track_count: album.song_count,
            })
            .collect();
        Ok(albums)
    }

    async fn list_tracks(&self, album: &LibraryAlbum) -> Result<Vec<LibraryTrack>, LibraryError> {
        let body = self
            .call(&self.endpoint("getAlbum", &[("id", &album.id)]))
            .await?;
        let tracks = body
            .album
            .map(|detail| detail.song)
            .unwrap_or_default()
            .into_iter()
            .map(|song| LibraryTrack {
                id: song.id,
                title: song.title,
                artist: song.artist.unwrap_or_else(|| album.artist.clone()),
                album: song.album.unwrap_or_else(|| album.title.clone()),
                duration_sec: song.duration.unwrap_or(0),
                path: song.path,
                genre: song.genre,
                disc_number: song.disc_number,
            })
            .collect();
        Ok(tracks)
    }

    async fn apply_rating(&self, track_id: &str, stars: u8) -> Result<(), LibraryError> {
        let rating = stars.min(5).to_string();
        self.call(&self.endpoint(
            "setRating",
            &[("id", track_id), ("rating", &rating)],
        ))
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_parses_artists_index() {
        let raw = r#"{
            "subsonic-response": {
                "status": "ok",
                "artists": {"index": [
                    {"name": "A", "artist": [{"id": "ar-1", "name": "Alpha"}]},
                    {"name": "B", "artist": [{"id": "ar-2", "name": "Beta"}]}
                ]}
            }
        }"#;
        let envelope: Envelope = serde_json::from_str(raw).unwrap();
        let artists: Vec<ApiArtist> = envelope
            .response
            .artists
            .unwrap()
            .index
            .into_iter()
            .flat_map(|e| e.artist)
            .collect();
        assert_eq!(artists.len(), 2);
        assert_eq!(artists[0].name, "Alpha");
    }

    #[test]
    fn test_envelope_parses_error() {
        let raw = r#"{
            "subsonic-response": {
                "status": "failed",
                "error": {"code": 40, "message": "Wrong token"}
            }
        }"#;
        let envelope: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.response.status, "failed");
        assert_eq!(envelope.response.error.unwrap().code, 40);
    }

    #[test]
    fn test_endpoint_encodes_params() {
        let library = SubsonicLibrary::new("http://music.local:4533/", "se cret").unwrap();
        let url = library.endpoint("getArtist", &[("id", "ar 1")]);
        assert!(url.starts_with("http://music.local:4533/rest/getArtist?"));
        assert!(url.contains("apiKey=se%20cret"));
        assert!(url.contains("id=ar%201"));
        assert!(!url.ends_with('/'));
    }
}
