//! MusicBrainz API client: release-group lookups for single confirmation.
//!
//! Rate limited to ~1 request per second per MusicBrainz API policy, with
//! the mandatory User-Agent header. Single confirmation enforces the
//! version-token guard: a release group only counts when its version tokens
//! equal the track title's, so `"Song (Live ...)"` never matches a plain
//! `"Song"` single.

use super::cache::RequestCache;
use super::http::{build_session, get_json, ClientError, HttpPolicy};
use super::{ReleaseGroup, ReleaseGroupApi};
use crate::titles;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::info;

const API_BASE: &str = "https://musicbrainz.org/ws/2";
// slightly over 1s for safety
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(1100);

const SEARCH_LIMIT: usize = 10;

pub struct MusicBrainzClient {
    session: reqwest::Client,
    policy: HttpPolicy,
    last_request: Mutex<Instant>,
    single_cache: RequestCache<String, bool>,
    group_cache: RequestCache<String, Option<ReleaseGroup>>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(rename = "release-groups", default)]
    release_groups: Vec<ApiReleaseGroup>,
}

#[derive(Deserialize)]
struct ApiReleaseGroup {
    #[serde(default)]
    title: String,
    #[serde(rename = "primary-type")]
    primary_type: Option<String>,
    #[serde(rename = "secondary-types", default)]
    secondary_types: Vec<String>,
    #[serde(rename = "first-release-date")]
    first_release_date: Option<String>,
}

impl From<ApiReleaseGroup> for ReleaseGroup {
    fn from(api: ApiReleaseGroup) -> Self {
        ReleaseGroup {
            title: api.title,
            primary_type: api.primary_type,
            secondary_types: api.secondary_types,
            first_release_date: api.first_release_date,
        }
    }
}

/// Whether a release group confirms `track_title` as a single.
///
/// The group's normalized title must match the track's, its version tokens
/// must equal the track's exactly, and disqualifying secondary types
/// (Live/Remix/Compilation) are rejected unless the track's own version
/// tokens call for them.
pub(crate) fn release_group_confirms_single(group: &ReleaseGroup, track_title: &str) -> bool {
    let track_tokens = titles::version_tokens(track_title);
    let group_tokens = titles::version_tokens(&group.title);

    let base = titles::base_title(track_title);
    let title_matches =
        titles::titles_match(&group.title, &base) || titles::titles_match(&group.title, track_title);
    if !title_matches || track_tokens != group_tokens {
        return false;
    }

    for secondary in &group.secondary_types {
        let disqualifies = match secondary.to_lowercase().as_str() {
            "live" => !track_tokens.contains("live"),
            "remix" => !track_tokens.contains("remix"),
            "compilation" => true,
            _ => false,
        };
        if disqualifies {
            return false;
        }
    }

    match group.primary_type.as_deref() {
        Some("Single") => true,
        Some("EP") => titles::titles_match(&group.title, track_title),
        _ => false,
    }
}

impl MusicBrainzClient {
    pub fn new(user_agent: &str, policy: HttpPolicy) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|e| ClientError::Parse(format!("invalid user agent: {}", e)))?,
        );
        let session = build_session(headers)?;
        Ok(Self {
            session,
            policy,
            last_request: Mutex::new(Instant::now() - MIN_REQUEST_INTERVAL),
            single_cache: RequestCache::with_default_capacity(),
            group_cache: RequestCache::with_default_capacity(),
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

    async fn search_release_groups(
        &self,
        title: &str,
        artist: &str,
    ) -> Result<Vec<ReleaseGroup>, ClientError> {
        self.throttle().await;
        let query = format!("releasegroup:\"{}\" AND artist:\"{}\"", title, artist);
        let url = format!(
            "{}/release-group/?query={}&fmt=json&limit={}",
            API_BASE,
            urlencoding::encode(&query),
            SEARCH_LIMIT
        );
        let body: SearchResponse = get_json(&self.session, &url, None, self.policy).await?;
        Ok(body.release_groups.into_iter().map(Into::into).collect())
    }

    async fn check_single(&self, title: &str, artist: &str) -> Result<bool, ClientError> {
        // Search by the base title so versioned tracks still find their
        // candidate groups; the token guard filters them afterwards.
        let base = titles::base_title(title);
        let groups = self.search_release_groups(&base, artist).await?;
        Ok(groups
            .iter()
            .any(|group| release_group_confirms_single(group, title)))
    }

    async fn fetch_release_group(&self, mbid: &str) -> Result<Option<ReleaseGroup>, ClientError> {
        self.throttle().await;
        let url = format!("{}/release-group/{}?fmt=json", API_BASE, mbid);
        match get_json::<ApiReleaseGroup>(&self.session, &url, None, self.policy).await {
            Ok(group) => Ok(Some(group.into())),
            Err(ClientError::Status { status: 404 }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ReleaseGroupApi for MusicBrainzClient {
    async fn is_single(&self, title: &str, artist: &str) -> bool {
        let key = format!("{}|{}", title.to_lowercase(), artist.to_lowercase());
        let result = self
            .single_cache
            .get_or_fetch(key, || self.check_single(title, artist))
            .await;
        match result {
            Ok(confirmed) => confirmed,
            Err(e) => {
                info!(
                    "musicbrainz release-group search failed for '{}' / '{}': {}",
                    artist, title, e
                );
                false
            }
        }
    }

    async fn release_group(&self, mbid: &str) -> Option<ReleaseGroup> {
        let result = self
            .group_cache
            .get_or_fetch(mbid.to_string(), || self.fetch_release_group(mbid))
            .await;
        match result {
            Ok(group) => group,
            Err(e) => {
                info!("musicbrainz release-group lookup failed for {}: {}", mbid, e);
                None
            }
        }
    }
}
