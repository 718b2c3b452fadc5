//! Request gating for the popularity and scrobble APIs.
//!
//! Each API gets a rolling-window counter plus a daily quota. Decisions are
//! returned, never raised: a denied lookup is skipped and logged by the
//! caller, not treated as an error. Daily counters survive restarts through
//! a small JSON state file; the window itself is persisted too so a quick
//! restart cannot burst past the window limit.

use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// State is flushed to disk every this many `record` calls (and on drop).
/// A crash can under-count by at most this many requests.
const FLUSH_EVERY_RECORDS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitedApi {
    Spotify,
    LastFm,
}

impl RateLimitedApi {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitedApi::Spotify => "spotify",
            RateLimitedApi::LastFm => "lastfm",
        }
    }
}

impl fmt::Display for RateLimitedApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-API limits. The rolling window covers `window`; `window_limit` is the
/// maximum number of requests inside it. `daily_limit` counts per local
/// calendar day.
#[derive(Debug, Clone, Copy)]
pub struct ApiQuota {
    pub window_limit: usize,
    pub window: Duration,
    pub daily_limit: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub spotify: ApiQuota,
    pub lastfm: ApiQuota,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            spotify: ApiQuota {
                window_limit: 250,
                window: Duration::from_secs(30),
                daily_limit: 500_000,
            },
            // Last.fm asks for one request per second
            lastfm: ApiQuota {
                window_limit: 1,
                window: Duration::from_secs(1),
                daily_limit: 50_000,
            },
        }
    }
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The rolling window is full; allowed again once the oldest entry ages out.
    WindowExhausted,
    /// The daily quota is spent; allowed again after local midnight.
    DailyQuotaExhausted,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::WindowExhausted => f.write_str("rolling window exhausted"),
            DenyReason::DailyQuotaExhausted => f.write_str("daily quota exhausted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateCheck {
    Allowed,
    Denied(DenyReason),
}

impl RateCheck {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateCheck::Allowed)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    spotify_daily_count: u64,
    lastfm_daily_count: u64,
    last_reset_date: Option<NaiveDate>,
    /// Window entries as unix milliseconds.
    spotify_window: Vec<i64>,
    lastfm_window: Vec<i64>,
}

struct ApiState {
    window: VecDeque<DateTime<Utc>>,
    daily_count: u64,
}

struct Inner {
    spotify: ApiState,
    lastfm: ApiState,
    last_reset_date: NaiveDate,
    records_since_flush: u32,
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    state_path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl RateLimiter {
    /// Load limiter state from `state_path` (missing or corrupt files start
    /// fresh) with the given quotas.
    pub fn new<P: AsRef<Path>>(state_path: P, config: RateLimiterConfig) -> Self {
        let path = state_path.as_ref().to_path_buf();
        let persisted = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<PersistedState>(&raw).ok())
            .unwrap_or_else(|| {
                debug!("No rate limiter state at {:?}, starting fresh", path);
                PersistedState::default()
            });
        Self::from_persisted(persisted, Some(path), config)
    }

    /// Limiter with no backing file, used by tests and dry runs.
    pub fn ephemeral(config: RateLimiterConfig) -> Self {
        Self::from_persisted(PersistedState::default(), None, config)
    }

    fn from_persisted(
        persisted: PersistedState,
        state_path: Option<PathBuf>,
        config: RateLimiterConfig,
    ) -> Self {
        let to_window = |entries: &[i64]| {
            entries
                .iter()
                .filter_map(|ms| DateTime::<Utc>::from_timestamp_millis(*ms))
                .collect::<VecDeque<_>>()
        };
        let inner = Inner {
            spotify: ApiState {
                window: to_window(&persisted.spotify_window),
                daily_count: persisted.spotify_daily_count,
            },
            lastfm: ApiState {
                window: to_window(&persisted.lastfm_window),
                daily_count: persisted.lastfm_daily_count,
            },
            last_reset_date: persisted
                .last_reset_date
                .unwrap_or_else(|| Local::now().date_naive()),
            records_since_flush: 0,
        };
        Self {
            config,
            state_path,
            inner: Mutex::new(inner),
        }
    }

    fn quota(&self, api: RateLimitedApi) -> ApiQuota {
        match api {
            RateLimitedApi::Spotify => self.config.spotify,
            RateLimitedApi::LastFm => self.config.lastfm,
        }
    }

    fn reset_daily_if_new_day(inner: &mut Inner) {
        let today = Local::now().date_naive();
        if inner.last_reset_date != today {
            debug!(
                "Rate limiter daily reset: {} -> {}",
                inner.last_reset_date, today
            );
            inner.spotify.daily_count = 0;
            inner.lastfm.daily_count = 0;
            inner.spotify.window.clear();
            inner.lastfm.window.clear();
            inner.last_reset_date = today;
        }
    }

    fn prune_window(state: &mut ApiState, window: Duration, now: DateTime<Utc>) {
        let cutoff = now - ChronoDuration::from_std(window).unwrap_or(ChronoDuration::zero());
        while let Some(front) = state.window.front() {
            if *front <= cutoff {
                state.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Whether a request to `api` may go out right now.
    pub fn check(&self, api: RateLimitedApi) -> RateCheck {
        let quota = self.quota(api);
        let mut inner = self.inner.lock().unwrap();
        Self::reset_daily_if_new_day(&mut inner);
        let state = Self::api_state(&mut inner, api);
        let now = Utc::now();
        Self::prune_window(state, quota.window, now);

        if state.daily_count >= quota.daily_limit {
            return RateCheck::Denied(DenyReason::DailyQuotaExhausted);
        }
        if state.window.len() >= quota.window_limit {
            return RateCheck::Denied(DenyReason::WindowExhausted);
        }
        RateCheck::Allowed
    }

    /// Record an outgoing request to `api`.
    pub fn record(&self, api: RateLimitedApi) {
        let quota = self.quota(api);
        let should_flush = {
            let mut inner = self.inner.lock().unwrap();
            Self::reset_daily_if_new_day(&mut inner);
            let now = Utc::now();
            let state = Self::api_state(&mut inner, api);
            Self::prune_window(state, quota.window, now);
            state.window.push_back(now);
            state.daily_count += 1;
            inner.records_since_flush += 1;
            if inner.records_since_flush >= FLUSH_EVERY_RECORDS {
                inner.records_since_flush = 0;
                true
            } else {
                false
            }
        };
        if should_flush {
            self.flush();
        }
    }

    /// Wait until a request to `api` is allowed, up to `max_wait`.
    ///
    /// Returns `true` once allowed. Returns `false` immediately when the
    /// daily quota is spent (never sleeps toward midnight) or when the
    /// required wait exceeds `max_wait`.
    pub async fn wait_if_needed(&self, api: RateLimitedApi, max_wait: Duration) -> bool {
        let quota = self.quota(api);
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let wait = {
                let mut inner = self.inner.lock().unwrap();
                Self::reset_daily_if_new_day(&mut inner);
                let state = Self::api_state(&mut inner, api);
                let now = Utc::now();
                Self::prune_window(state, quota.window, now);

                if state.daily_count >= quota.daily_limit {
                    return false;
                }
                if state.window.len() < quota.window_limit {
                    return true;
                }
                // Window full: wait for the oldest entry to age out
                let oldest = *state.window.front().expect("window is non-empty");
                let expires_at =
                    oldest + ChronoDuration::from_std(quota.window).unwrap_or(ChronoDuration::zero());
                (expires_at - now)
                    .to_std()
                    .unwrap_or(Duration::from_millis(10))
            };

            if tokio::time::Instant::now() + wait > deadline {
                return false;
            }
            tokio::time::sleep(wait).await;
        }
    }

    fn api_state(inner: &mut Inner, api: RateLimitedApi) -> &mut ApiState {
        match api {
            RateLimitedApi::Spotify => &mut inner.spotify,
            RateLimitedApi::LastFm => &mut inner.lastfm,
        }
    }

    /// Write current state to the backing file, if any.
    pub fn flush(&self) {
        let Some(path) = &self.state_path else {
            return;
        };
        let persisted = {
            let inner = self.inner.lock().unwrap();
            PersistedState {
                spotify_daily_count: inner.spotify.daily_count,
                lastfm_daily_count: inner.lastfm.daily_count,
                last_reset_date: Some(inner.last_reset_date),
                spotify_window: inner
                    .spotify
                    .window
                    .iter()
                    .map(|ts| ts.timestamp_millis())
                    .collect(),
                lastfm_window: inner
                    .lastfm
                    .window
                    .iter()
                    .map(|ts| ts.timestamp_millis())
                    .collect(),
            }
        };
        match serde_json::to_string(&persisted) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    warn!("Failed to write rate limiter state to {:?}: {}", path, e);
                }
            }
            Err(e) => warn!("Failed to serialize rate limiter state: {}", e),
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> RateLimiterConfig {
        RateLimiterConfig {
            spotify: ApiQuota {
                window_limit: 3,
                window: Duration::from_secs(30),
                daily_limit: 10,
            },
            lastfm: ApiQuota {
                window_limit: 1,
                window: Duration::from_millis(50),
                daily_limit: 5,
            },
        }
    }

    #[test]
    fn test_allows_under_limits() {
        let limiter = RateLimiter::ephemeral(tiny_config());
        assert!(limiter.check(RateLimitedApi::Spotify).is_allowed());
        limiter.record(RateLimitedApi::Spotify);
        limiter.record(RateLimitedApi::Spotify);
        assert!(limiter.check(RateLimitedApi::Spotify).is_allowed());
    }

    #[test]
    fn test_denies_when_window_full() {
        let limiter = RateLimiter::ephemeral(tiny_config());
        for _ in 0..3 {
            limiter.record(RateLimitedApi::Spotify);
        }
        assert_eq!(
            limiter.check(RateLimitedApi::Spotify),
            RateCheck::Denied(DenyReason::WindowExhausted)
        );
    }

    #[test]
    fn test_denies_when_daily_quota_spent() {
        let mut config = tiny_config();
        config.spotify.window_limit = 1000;
        config.spotify.daily_limit = 4;
        let limiter = RateLimiter::ephemeral(config);
        for _ in 0..4 {
            limiter.record(RateLimitedApi::Spotify);
        }
        assert_eq!(
            limiter.check(RateLimitedApi::Spotify),
            RateCheck::Denied(DenyReason::DailyQuotaExhausted)
        );
    }

    #[test]
    fn test_apis_tracked_independently() {
        let limiter = RateLimiter::ephemeral(tiny_config());
        for _ in 0..3 {
            limiter.record(RateLimitedApi::Spotify);
        }
        assert!(!limiter.check(RateLimitedApi::Spotify).is_allowed());
        assert!(limiter.check(RateLimitedApi::LastFm).is_allowed());
    }

    #[tokio::test]
    async fn test_wait_if_needed_returns_after_window_expires() {
        let mut config = tiny_config();
        config.lastfm.window = Duration::from_millis(30);
        let limiter = RateLimiter::ephemeral(config);
        limiter.record(RateLimitedApi::LastFm);

        // Window of 1 request is full; should become allowed within ~30ms
        let allowed = limiter
            .wait_if_needed(RateLimitedApi::LastFm, Duration::from_secs(2))
            .await;
        assert!(allowed);
    }

    #[tokio::test]
    async fn test_wait_if_needed_daily_quota_fails_fast() {
        let mut config = tiny_config();
        config.lastfm.window_limit = 1000;
        config.lastfm.daily_limit = 1;
        let limiter = RateLimiter::ephemeral(config);
        limiter.record(RateLimitedApi::LastFm);

        let start = std::time::Instant::now();
        let allowed = limiter
            .wait_if_needed(RateLimitedApi::LastFm, Duration::from_secs(10))
            .await;
        assert!(!allowed);
        // Must not have slept toward midnight
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_wait_if_needed_respects_max_wait() {
        let mut config = tiny_config();
        config.spotify.window = Duration::from_secs(60);
        config.spotify.window_limit = 1;
        let limiter = RateLimiter::ephemeral(config);
        limiter.record(RateLimitedApi::Spotify);

        let allowed = limiter
            .wait_if_needed(RateLimitedApi::Spotify, Duration::from_millis(20))
            .await;
        assert!(!allowed);
    }

    #[test]
    fn test_state_survives_restart() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rate_limiter.json");
        {
            let limiter = RateLimiter::new(&path, tiny_config());
            limiter.record(RateLimitedApi::Spotify);
            limiter.record(RateLimitedApi::Spotify);
            limiter.flush();
        }

        let limiter = RateLimiter::new(&path, tiny_config());
        let inner = limiter.inner.lock().unwrap();
        assert_eq!(inner.spotify.daily_count, 2);
        assert_eq!(inner.spotify.window.len(), 2);
    }

    #[test]
    fn test_flush_on_drop() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rate_limiter.json");
        {
            let limiter = RateLimiter::new(&path, tiny_config());
            limiter.record(RateLimitedApi::LastFm);
            // No explicit flush; drop should persist
        }
        assert!(path.exists());
        let raw = std::fs::read_to_string(&path).unwrap();
        let state: PersistedState = serde_json::from_str(&raw).unwrap();
        assert_eq!(state.lastfm_daily_count, 1);
    }

    #[test]
    fn test_stale_date_resets_daily_counters() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rate_limiter.json");
        let stale = PersistedState {
            spotify_daily_count: 9999,
            lastfm_daily_count: 50,
            last_reset_date: Some(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()),
            spotify_window: vec![],
            lastfm_window: vec![],
        };
        std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

        let limiter = RateLimiter::new(&path, tiny_config());
        // First check on a later date resets the counters
        assert!(limiter.check(RateLimitedApi::Spotify).is_allowed());
        let inner = limiter.inner.lock().unwrap();
        assert_eq!(inner.spotify.daily_count, 0);
    }

    #[test]
    fn test_corrupt_state_file_starts_fresh() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rate_limiter.json");
        std::fs::write(&path, "not json at all").unwrap();

        let limiter = RateLimiter::new(&path, tiny_config());
        assert!(limiter.check(RateLimitedApi::Spotify).is_allowed());
    }
}
