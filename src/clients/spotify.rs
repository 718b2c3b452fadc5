//! Spotify Web API client: track popularity and artist search.
//!
//! Authenticates with the OAuth2 client-credentials grant; the token is
//! cached and refreshed shortly before expiry. Search responses are cached
//! by normalized query.

use super::cache::RequestCache;
use super::http::{build_session, get_json, ClientError, HttpPolicy};
use super::{PopularityApi, TrackCandidate};
use crate::store::AlbumType;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

const API_BASE: &str = "https://api.spotify.com/v1";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Refresh the token this long before its reported expiry.
const TOKEN_EXPIRY_SLACK: Duration = Duration::from_secs(60);

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

pub struct SpotifyClient {
    session: reqwest::Client,
    client_id: String,
    client_secret: String,
    policy: HttpPolicy,
    token: RwLock<Option<CachedToken>>,
    artist_cache: RequestCache<String, Option<String>>,
    search_cache: RequestCache<String, Vec<TrackCandidate>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct SearchResponse {
    tracks: Option<TracksPage>,
    artists: Option<ArtistsPage>,
}

#[derive(Deserialize)]
struct TracksPage {
    #[serde(default)]
    items: Vec<ApiTrack>,
}

#[derive(Deserialize)]
struct ApiTrack {
    id: String,
    popularity: Option<f64>,
    duration_ms: Option<u64>,
    album: Option<ApiAlbum>,
}

#[derive(Deserialize)]
struct ApiAlbum {
    name: Option<String>,
    album_type: Option<String>,
}

#[derive(Deserialize)]
struct ArtistsPage {
    #[serde(default)]
    items: Vec<ApiArtist>,
}

#[derive(Deserialize)]
struct ApiArtist {
    id: String,
}

impl SpotifyClient {
    pub fn new(client_id: &str, client_secret: &str, policy: HttpPolicy) -> Result<Self, ClientError> {
        let session = build_session(HeaderMap::new())?;
        Ok(Self {
            session,
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            policy,
            token: RwLock::new(None),
            artist_cache: RequestCache::with_default_capacity(),
            search_cache: RequestCache::with_default_capacity(),
        })
    }

    async fn ensure_token(&self) -> Result<String, ClientError> {
        {
            let token = self.token.read().await;
            if let Some(cached) = token.as_ref() {
                if cached.expires_at > Instant::now() {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let mut token = self.token.write().await;
        // Another task may have refreshed while we waited for the lock
        if let Some(cached) = token.as_ref() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.access_token.clone());
            }
        }

        let refreshed = self.request_token().await?;
        let access_token = refreshed.access_token.clone();
        *token = Some(refreshed);
        Ok(access_token)
    }

    async fn request_token(&self) -> Result<CachedToken, ClientError> {
        debug!("Requesting new Spotify access token");
        let response = self
            .session
            .post(TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::Auth(format!(
                "token request failed with status {}",
                response.status()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))?;

        let lifetime = Duration::from_secs(body.expires_in).saturating_sub(TOKEN_EXPIRY_SLACK);
        Ok(CachedToken {
            access_token: body.access_token,
            expires_at: Instant::now() + lifetime,
        })
    }

    async fn search_artist(&self, name: &str) -> Result<Option<String>, ClientError> {
        let token = self.ensure_token().await?;
        let url = format!(
            "{}/search?type=artist&limit=1&q={}",
            API_BASE,
            urlencoding::encode(name)
        );
        let body: SearchResponse = get_json(&self.session, &url, Some(&token), self.policy).await?;
        Ok(body
            .artists
            .and_then(|page| page.items.into_iter().next())
            .map(|artist| artist.id))
    }

    async fn search_tracks(
        &self,
        title: &str,
        artist: &str,
        album: Option<&str>,
    ) -> Result<Vec<TrackCandidate>, ClientError> {
        let token = self.ensure_token().await?;
        let mut query = format!("track:\"{}\" artist:\"{}\"", title, artist);
        if let Some(album) = album {
            query.push_str(&format!(" album:\"{}\"", album));
        }
        let url = format!(
            "{}/search?type=track&limit=10&q={}",
            API_BASE,
            urlencoding::encode(&query)
        );
        let body: SearchResponse = get_json(&self.session, &url, Some(&token), self.policy).await?;

        let candidates = body
            .tracks
            .map(|page| page.items)
            .unwrap_or_default()
            .into_iter()
            .map(|track| {
                let (album_name, album_type) = track
                    .album
                    .map(|a| (a.name.unwrap_or_default(), a.album_type))
                    .unwrap_or_default();
                TrackCandidate {
                    id: track.id,
                    album_type: album_type.as_deref().and_then(AlbumType::parse),
                    album_name,
                    popularity: track.popularity.unwrap_or(0.0).clamp(0.0, 100.0),
                    duration_ms: track.duration_ms,
                }
            })
            .collect();
        Ok(candidates)
    }
}

#[async_trait]
impl PopularityApi for SpotifyClient {
    async fn find_artist_id(&self, name: &str) -> Option<String> {
        let key = name.to_lowercase();
        let result = self
            .artist_cache
            .get_or_fetch(key, || self.search_artist(name))
            .await;
        match result {
            Ok(id) => id,
            Err(e) => {
                info!("spotify artist search failed for '{}': {}", name, e);
                None
            }
        }
    }

    async fn search_track(
        &self,
        title: &str,
        artist: &str,
        album: Option<&str>,
    ) -> Vec<TrackCandidate> {
        let key = format!(
            "{}|{}|{}",
            title.to_lowercase(),
            artist.to_lowercase(),
            album.map(|a| a.to_lowercase()).unwrap_or_default()
        );
        let result = self
            .search_cache
            .get_or_fetch(key, || self.search_tracks(title, artist, album))
            .await;
        match result {
            Ok(candidates) => candidates,
            Err(e) => {
                info!(
                    "spotify track search failed for '{}' / '{}': {}",
                    artist, title, e
                );
                Vec::new()
            }
        }
    }
}
