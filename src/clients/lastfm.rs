//! Last.fm API client: per-track playcount and tags.
//!
//! Query-string API-key auth. Requests are spaced out client-side on top of
//! the limiter's one-per-second gate.

use super::cache::RequestCache;
use super::http::{build_session, get_json, ClientError, HttpPolicy};
use super::{ScrobbleApi, ScrobbleTag, TrackScrobbles};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Deserializer};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::info;

const API_BASE: &str = "https://ws.audioscrobbler.com/2.0/";
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(250);

pub struct LastFmClient {
    session: reqwest::Client,
    api_key: String,
    policy: HttpPolicy,
    last_request: Mutex<Instant>,
    cache: RequestCache<String, TrackScrobbles>,
}

// Last.fm serializes counters as JSON strings
fn de_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Text(String),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Num(n) => n,
        Raw::Text(s) => s.parse().unwrap_or(0),
    })
}

#[derive(Deserialize)]
struct TrackInfoResponse {
    track: Option<ApiTrack>,
}

#[derive(Deserialize)]
struct ApiTrack {
    #[serde(default, deserialize_with = "de_count")]
    playcount: u64,
    toptags: Option<TopTags>,
}

#[derive(Deserialize)]
struct TopTags {
    #[serde(default)]
    tag: Vec<ApiTag>,
}

#[derive(Deserialize)]
struct ApiTag {
    name: String,
    #[serde(default, deserialize_with = "de_count")]
    count: u64,
}

impl LastFmClient {
    pub fn new(api_key: &str, policy: HttpPolicy) -> Result<Self, ClientError> {
        let session = build_session(HeaderMap::new())?;
        Ok(Self {
            session,
            api_key: api_key.to_string(),
            policy,
            last_request: Mutex::new(Instant::now() - MIN_REQUEST_INTERVAL),
            cache: RequestCache::with_default_capacity(),
        })
    }

    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        let elapsed = last.elapsed();
        if elapsed < MIN_REQUEST_INTERVAL {
            tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
        }
        *last = Instant::now();
    }

    async fn fetch_track_info(
        &self,
        artist: &str,
        title: &str,
    ) -> Result<TrackScrobbles, ClientError> {
        self.throttle().await;
        let url = format!(
            "{}?method=track.getInfo&artist={}&track={}&api_key={}&format=json&autocorrect=1",
            API_BASE,
            urlencoding::encode(artist),
            urlencoding::encode(title),
            self.api_key
        );
        let body: TrackInfoResponse = get_json(&self.session, &url, None, self.policy).await?;

        let Some(track) = body.track else {
            return Ok(TrackScrobbles::default());
        };
        Ok(TrackScrobbles {
            playcount: track.playcount,
            tags: track
                .toptags
                .map(|t| t.tag)
                .unwrap_or_default()
                .into_iter()
                .map(|tag| ScrobbleTag {
                    name: tag.name,
                    count: tag.count.min(u32::MAX as u64) as u32,
                })
                .collect(),
        })
    }
}

#[async_trait]
impl ScrobbleApi for LastFmClient {
    async fn track_info(&self, artist: &str, title: &str) -> Option<TrackScrobbles> {
        let key = format!("{}|{}", artist.to_lowercase(), title.to_lowercase());
        let result = self
            .cache
            .get_or_fetch(key, || self.fetch_track_info(artist, title))
            .await;
        match result {
            Ok(scrobbles) => Some(scrobbles),
            Err(e) => {
                info!(
                    "lastfm track.getInfo failed for '{}' / '{}': {}",
                    artist, title, e
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_string_playcount() {
        let raw = r#"{"track":{"playcount":"12345","toptags":{"tag":[{"name":"rock","count":100}]}}}"#;
        let parsed: TrackInfoResponse = serde_json::from_str(raw).unwrap();
        let track = parsed.track.unwrap();
        assert_eq!(track.playcount, 12345);
        assert_eq!(track.toptags.unwrap().tag[0].name, "rock");
    }

    #[test]
    fn test_parses_numeric_playcount() {
        let raw = r#"{"track":{"playcount":42}}"#;
        let parsed: TrackInfoResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.track.unwrap().playcount, 42);
    }

    #[test]
    fn test_missing_track_yields_empty() {
        let raw = r#"{"error":6,"message":"Track not found"}"#;
        let parsed: TrackInfoResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.track.is_none());
    }
}
