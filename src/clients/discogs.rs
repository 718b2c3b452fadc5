//! Discogs API client: release formats, tracklists, and official videos.
//!
//! Token-header auth, ~1 request per second. A release counts as a single
//! when any of the format heuristics hold; a video counts as official when
//! it passes the flavor filters and is fuzzy-similar to the track title.

use super::cache::RequestCache;
use super::http::{build_session, get_json, ClientError, HttpPolicy};
use super::{ReleaseContext, ReleaseFormatApi};
use crate::titles;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::info;

const API_BASE: &str = "https://api.discogs.com";
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(1100);

/// How many search results are worth fetching release details for.
const MAX_CANDIDATE_RELEASES: usize = 3;

/// Minimum fuzzy similarity between a cleaned video title and the track title.
const VIDEO_TITLE_MIN_RATIO: f64 = 0.50;

pub struct DiscogsClient {
    session: reqwest::Client,
    policy: HttpPolicy,
    last_request: Mutex<Instant>,
    single_cache: RequestCache<String, bool>,
    video_cache: RequestCache<String, bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscogsRelease {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    pub year: Option<u32>,
    pub country: Option<String>,
    pub master_id: Option<u64>,
    #[serde(default)]
    pub formats: Vec<ReleaseFormat>,
    #[serde(default)]
    pub tracklist: Vec<ReleaseTrack>,
    #[serde(default)]
    pub videos: Vec<ReleaseVideo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseFormat {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub descriptions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseTrack {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub duration: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseVideo {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Deserialize)]
struct SearchResult {
    id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    format: Vec<String>,
}

/// Parse a Discogs `"m:ss"` / `"h:mm:ss"` duration into seconds.
pub(crate) fn parse_duration_sec(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let mut total: u32 = 0;
    for part in raw.split(':') {
        let value: u32 = part.trim().parse().ok()?;
        total = total.checked_mul(60)?.checked_add(value)?;
    }
    Some(total)
}

/// Whether the release contains a track matching `title` (normalized exact
/// match, or duration within ±2 s when both durations are known).
pub(crate) fn release_has_matching_track(
    release: &DiscogsRelease,
    title: &str,
    duration_sec: Option<u32>,
) -> bool {
    release.tracklist.iter().any(|track| {
        if titles::titles_match(&track.title, title) {
            return true;
        }
        match (duration_sec, parse_duration_sec(&track.duration)) {
            (Some(want), Some(have)) => (want as i64 - have as i64).abs() <= 2,
            _ => false,
        }
    })
}

/// The Metadata-B single heuristics. `search_formats` carries the format
/// hints from the master-level search entry (rule e).
pub(crate) fn release_is_single(release: &DiscogsRelease, search_formats: &[String]) -> bool {
    // (a) format name contains "Single"
    if release
        .formats
        .iter()
        .any(|f| f.name.to_lowercase().contains("single"))
    {
        return true;
    }
    // (b) a format descriptor contains "Single" or "Maxi-Single"
    if release.formats.iter().any(|f| {
        f.descriptions
            .iter()
            .any(|d| d.to_lowercase().contains("single"))
    }) {
        return true;
    }
    // (c)/(d) 1-2 track release (promo or not)
    if !release.tracklist.is_empty() && release.tracklist.len() <= 2 {
        return true;
    }
    // (e) the master-level search entry is flagged as a single
    if search_formats
        .iter()
        .any(|f| f.to_lowercase().contains("single"))
    {
        return true;
    }
    false
}

/// Strip video-title noise before fuzzy comparison.
fn clean_video_title(raw: &str) -> String {
    const NOISE: &[&str] = &["official", "video", "music", "lyric", "lyrics", "hd", "4k"];
    titles::normalize_title(raw)
        .split_whitespace()
        .filter(|tok| !NOISE.contains(tok))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether a release video counts as the track's official video.
pub(crate) fn video_confirms_official(
    video: &ReleaseVideo,
    track_title: &str,
    ctx: ReleaseContext,
) -> bool {
    let title = video.title.as_deref().unwrap_or_default();
    let description = video.description.as_deref().unwrap_or_default();
    let text = format!("{} {}", title, description).to_lowercase();

    if !text.contains("official") {
        return false;
    }
    // Banned flavor tokens: live outside live context, remix always
    if text.contains("remix") {
        return false;
    }
    if text.contains("live") && !ctx.live_ok() {
        return false;
    }

    let cleaned_video = clean_video_title(title);
    let cleaned_track = titles::normalize_title(&titles::base_title(track_title));
    if cleaned_video.is_empty() || cleaned_track.is_empty() {
        return false;
    }
    strsim::normalized_levenshtein(&cleaned_video, &cleaned_track) >= VIDEO_TITLE_MIN_RATIO
}

/// Whether a search candidate should be considered at all given the album
/// context: live/remix releases are skipped outside a live context.
fn candidate_allowed(result_title: &str, ctx: ReleaseContext) -> bool {
    let tokens = titles::version_tokens(result_title);
    let lower = result_title.to_lowercase();
    if (tokens.contains("remix") || lower.contains("remix")) && !ctx.live_ok() {
        return false;
    }
    if (tokens.contains("live") || titles::is_live_title(result_title)) && !ctx.live_ok() {
        return false;
    }
    true
}

impl DiscogsClient {
    pub fn new(token: &str, user_agent: &str, policy: HttpPolicy) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|e| ClientError::Parse(format!("invalid user agent: {}", e)))?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Discogs token={}", token))
                .map_err(|e| ClientError::Parse(format!("invalid token: {}", e)))?,
        );
        let session = build_session(headers)?;
        Ok(Self {
            session,
            policy,
            last_request: Mutex::new(Instant::now() - MIN_REQUEST_INTERVAL),
            single_cache: RequestCache::with_default_capacity(),
            video_cache: RequestCache::with_default_capacity(),
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

    async fn search_releases(
        &self,
        title: &str,
        artist: &str,
    ) -> Result<Vec<SearchResult>, ClientError> {
        self.throttle().await;
        let url = format!(
            "{}/database/search?type=release&release_title={}&artist={}",
            API_BASE,
            urlencoding::encode(title),
            urlencoding::encode(artist)
        );
        let body: SearchResponse = get_json(&self.session, &url, None, self.policy).await?;
        Ok(body.results)
    }

    async fn fetch_release(&self, id: u64) -> Result<DiscogsRelease, ClientError> {
        self.throttle().await;
        let url = format!("{}/releases/{}", API_BASE, id);
        get_json(&self.session, &url, None, self.policy).await
    }

    /// Find the best-matching release for a track, skipping live/remix
    /// candidates outside a live context.
    pub async fn find_release(
        &self,
        title: &str,
        artist: &str,
        duration_sec: Option<u32>,
        ctx: ReleaseContext,
    ) -> Result<Option<DiscogsRelease>, ClientError> {
        let base = titles::base_title(title);
        let results = self.search_releases(&base, artist).await?;

        for result in results
            .iter()
            .filter(|r| candidate_allowed(&r.title, ctx))
            .take(MAX_CANDIDATE_RELEASES)
        {
            let release = self.fetch_release(result.id).await?;
            if release_has_matching_track(&release, title, duration_sec) {
                return Ok(Some(release));
            }
        }
        Ok(None)
    }

    async fn check_single(
        &self,
        title: &str,
        artist: &str,
        ctx: ReleaseContext,
    ) -> Result<bool, ClientError> {
        let base = titles::base_title(title);
        let results = self.search_releases(&base, artist).await?;

        for result in results
            .iter()
            .filter(|r| candidate_allowed(&r.title, ctx))
            .take(MAX_CANDIDATE_RELEASES)
        {
            let release = self.fetch_release(result.id).await?;
            if release_has_matching_track(&release, title, None)
                && release_is_single(&release, &result.format)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn check_official_video(
        &self,
        title: &str,
        artist: &str,
        ctx: ReleaseContext,
    ) -> Result<bool, ClientError> {
        let release = self.find_release(title, artist, None, ctx).await?;
        let Some(release) = release else {
            return Ok(false);
        };
        Ok(release
            .videos
            .iter()
            .any(|video| video_confirms_official(video, title, ctx)))
    }
}

#[async_trait]
impl ReleaseFormatApi for DiscogsClient {
    async fn is_single(&self, title: &str, artist: &str, ctx: ReleaseContext) -> bool {
        let key = format!(
            "{}|{}|{}",
            title.to_lowercase(),
            artist.to_lowercase(),
            ctx.live_ok()
        );
        let result = self
            .single_cache
            .get_or_fetch(key, || self.check_single(title, artist, ctx))
            .await;
        match result {
            Ok(confirmed) => confirmed,
            Err(e) => {
                info!(
                    "discogs release search failed for '{}' / '{}': {}",
                    artist, title, e
                );
                false
            }
        }
    }

    async fn has_official_video(&self, title: &str, artist: &str, ctx: ReleaseContext) -> bool {
        let key = format!(
            "{}|{}|{}",
            title.to_lowercase(),
            artist.to_lowercase(),
            ctx.live_ok()
        );
        let result = self
            .video_cache
            .get_or_fetch(key, || self.check_official_video(title, artist, ctx))
            .await;
        match result {
            Ok(confirmed) => confirmed,
            Err(e) => {
                info!(
                    "discogs video lookup failed for '{}' / '{}': {}",
                    artist, title, e
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(formats: &[(&str, &[&str])], tracks: &[(&str, &str)]) -> DiscogsRelease {
        DiscogsRelease {
            id: 1,
            title: "Song".to_string(),
            year: Some(1999),
            country: None,
            master_id: None,
            formats: formats
                .iter()
                .map(|(name, descs)| ReleaseFormat {
                    name: name.to_string(),
                    descriptions: descs.iter().map(|d| d.to_string()).collect(),
                })
                .collect(),
            tracklist: tracks
                .iter()
                .map(|(title, duration)| ReleaseTrack {
                    title: title.to_string(),
                    duration: duration.to_string(),
                })
                .collect(),
            videos: vec![],
        }
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration_sec("4:03"), Some(243));
        assert_eq!(parse_duration_sec("0:59"), Some(59));
        assert_eq!(parse_duration_sec("1:02:03"), Some(3723));
        assert_eq!(parse_duration_sec(""), None);
        assert_eq!(parse_duration_sec("abc"), None);
    }

    #[test]
    fn test_single_by_format_name() {
        let r = release(&[("Vinyl Single", &[])], &[("A", ""), ("B", ""), ("C", ""), ("D", "")]);
        assert!(release_is_single(&r, &[]));
    }

    #[test]
    fn test_single_by_format_descriptor() {
        let r = release(
            &[("Vinyl", &["45 RPM", "Maxi-Single"])],
            &[("A", ""), ("B", ""), ("C", ""), ("D", "")],
        );
        assert!(release_is_single(&r, &[]));
    }

    #[test]
    fn test_single_by_track_count() {
        let r = release(&[("CD", &[])], &[("A", "3:30"), ("B", "4:00")]);
        assert!(release_is_single(&r, &[]));
    }

    #[test]
    fn test_single_by_master_search_flag() {
        let r = release(&[("CD", &[])], &[("A", ""), ("B", ""), ("C", ""), ("D", "")]);
        assert!(release_is_single(&r, &["Single".to_string()]));
    }

    #[test]
    fn test_full_album_is_not_single() {
        let r = release(
            &[("CD", &["Album"])],
            &[("A", ""), ("B", ""), ("C", ""), ("D", ""), ("E", "")],
        );
        assert!(!release_is_single(&r, &["LP".to_string()]));
    }

    #[test]
    fn test_track_match_by_normalized_title() {
        let r = release(&[("CD", &[])], &[("Song Title", "4:00")]);
        assert!(release_has_matching_track(&r, "song title!", None));
        assert!(!release_has_matching_track(&r, "Other", None));
    }

    #[test]
    fn test_track_match_by_duration_tolerance() {
        let r = release(&[("CD", &[])], &[("Completely Different", "4:00")]);
        assert!(release_has_matching_track(&r, "Song", Some(241)));
        assert!(!release_has_matching_track(&r, "Song", Some(250)));
    }

    fn video(title: &str, description: &str) -> ReleaseVideo {
        ReleaseVideo {
            title: Some(title.to_string()),
            description: Some(description.to_string()),
        }
    }

    #[test]
    fn test_official_video_match() {
        let v = video("Song Title (Official Video)", "");
        assert!(video_confirms_official(&v, "Song Title", ReleaseContext::default()));
    }

    #[test]
    fn test_video_without_official_marker_rejected() {
        let v = video("Song Title", "fan upload");
        assert!(!video_confirms_official(&v, "Song Title", ReleaseContext::default()));
    }

    #[test]
    fn test_live_video_rejected_outside_live_context() {
        let v = video("Song Title (Official Live Video)", "");
        assert!(!video_confirms_official(&v, "Song Title", ReleaseContext::default()));
        let live_ctx = ReleaseContext {
            is_live: true,
            is_unplugged: false,
        };
        assert!(video_confirms_official(&v, "Song Title", live_ctx));
    }

    #[test]
    fn test_remix_video_always_rejected() {
        let v = video("Song Title (Official Remix Video)", "");
        let live_ctx = ReleaseContext {
            is_live: true,
            is_unplugged: false,
        };
        assert!(!video_confirms_official(&v, "Song Title", live_ctx));
    }

    #[test]
    fn test_unrelated_video_title_rejected() {
        let v = video("Totally Different Track (Official Video)", "");
        assert!(!video_confirms_official(&v, "Song Title", ReleaseContext::default()));
    }

    #[test]
    fn test_candidate_filter_skips_live_and_remix() {
        let ctx = ReleaseContext::default();
        assert!(!candidate_allowed("Song (Live)", ctx));
        assert!(!candidate_allowed("Song (Remix)", ctx));
        assert!(candidate_allowed("Song", ctx));

        let live_ctx = ReleaseContext {
            is_live: true,
            is_unplugged: false,
        };
        assert!(candidate_allowed("Song (Live)", live_ctx));
    }

    #[test]
    fn test_release_json_parses() {
        let raw = r#"{
            "id": 123,
            "title": "Song",
            "year": 1999,
            "country": "UK",
            "master_id": 456,
            "formats": [{"name": "CD", "descriptions": ["Single"]}],
            "tracklist": [{"title": "Song", "duration": "4:03"}],
            "videos": [{"title": "Song (Official Video)", "description": "x"}]
        }"#;
        let release: DiscogsRelease = serde_json::from_str(raw).unwrap();
        assert_eq!(release.id, 123);
        assert_eq!(release.formats[0].descriptions, vec!["Single"]);
        assert_eq!(parse_duration_sec(&release.tracklist[0].duration), Some(243));
    }
}
