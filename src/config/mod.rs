//! Configuration resolution.
//!
//! Three layers, strongest last: CLI arguments, the YAML config file, and
//! environment variables (`DB_PATH`, `LOG_PATH`, `MUSIC_FOLDER`,
//! `FORCE_RESCAN`). A missing library endpoint is a configuration error and
//! fails startup.

mod file_config;

pub use file_config::{
    AgeDecayFileConfig, ApiFileConfig, DiscogsFileConfig, FeaturesFileConfig, FileConfig,
    LastFmFileConfig, LibraryFileConfig, MusicBrainzFileConfig, SpotifyFileConfig,
    WeightsFileConfig,
};

use crate::scan::score::{AgeDecay, ScoreWeights};
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_ALBUM_SKIP_DAYS: i64 = 30;
const DEFAULT_PERPETUAL_INTERVAL_HOURS: u64 = 24;
const DEFAULT_API_CALL_TIMEOUT_SECS: u64 = 30;

/// CLI-provided values that participate in config resolution.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    pub force: bool,
    pub dry_run: bool,
    pub batchrate: bool,
    pub perpetual: bool,
    pub verbose: bool,
}

/// Environment overrides, read once at startup so tests can inject values.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub db_path: Option<String>,
    pub log_path: Option<String>,
    pub music_folder: Option<String>,
    pub force_rescan: bool,
}

impl EnvOverrides {
    pub fn from_process_env() -> Self {
        Self {
            db_path: std::env::var("DB_PATH").ok().filter(|v| !v.is_empty()),
            log_path: std::env::var("LOG_PATH").ok().filter(|v| !v.is_empty()),
            music_folder: std::env::var("MUSIC_FOLDER").ok().filter(|v| !v.is_empty()),
            force_rescan: std::env::var("FORCE_RESCAN").as_deref() == Ok("1"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub library_base_url: String,
    pub library_token: String,

    pub spotify: Option<SpotifyCredentials>,
    pub lastfm_api_key: Option<String>,
    pub musicbrainz_user_agent: String,
    pub discogs_token: Option<String>,

    pub weights: ScoreWeights,
    pub age_decay: AgeDecay,

    pub force: bool,
    pub dry_run: bool,
    pub batchrate: bool,
    pub perpetual: bool,
    pub verbose: bool,
    pub video_only_single: bool,
    pub album_skip_days: i64,
    pub perpetual_interval_hours: u64,
    pub api_call_timeout: Duration,

    pub db_path: PathBuf,
    pub log_path: PathBuf,
    pub playlist_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Resolve configuration. File values override CLI values; environment
    /// variables override both.
    pub fn resolve(
        cli: &CliConfig,
        file: Option<FileConfig>,
        env: &EnvOverrides,
    ) -> Result<Self> {
        let file = file.unwrap_or_default();

        let library = file.library.unwrap_or_default();
        let Some(library_base_url) = library.base_url.filter(|url| !url.is_empty()) else {
            bail!("library.base_url must be set in the config file");
        };
        let library_token = library.token.unwrap_or_default();

        let api = file.api.unwrap_or_default();
        let spotify = api.spotify.unwrap_or_default();
        let spotify = if spotify.enabled.unwrap_or(true) {
            match (spotify.client_id, spotify.client_secret) {
                (Some(client_id), Some(client_secret))
                    if !client_id.is_empty() && !client_secret.is_empty() =>
                {
                    Some(SpotifyCredentials {
                        client_id,
                        client_secret,
                    })
                }
                _ => None,
            }
        } else {
            None
        };
        let lastfm_api_key = api
            .lastfm
            .unwrap_or_default()
            .api_key
            .filter(|key| !key.is_empty());
        let musicbrainz_user_agent = api
            .musicbrainz
            .unwrap_or_default()
            .user_agent
            .filter(|ua| !ua.is_empty())
            .unwrap_or_else(|| format!("trackstar/{}", env!("CARGO_PKG_VERSION")));
        let discogs_token = api
            .discogs
            .unwrap_or_default()
            .token
            .filter(|token| !token.is_empty());

        let weights_file = file.weights.unwrap_or_default();
        let defaults = ScoreWeights::default();
        let weights = ScoreWeights {
            spotify: weights_file.spotify.unwrap_or(defaults.spotify),
            lastfm: weights_file.lastfm.unwrap_or(defaults.lastfm),
            age: weights_file.age.unwrap_or(defaults.age),
        }
        .normalized();

        let decay_file = file.age_decay.unwrap_or_default();
        let age_decay = match decay_file.mode.as_deref() {
            Some("linear") => AgeDecay::Linear {
                zero_at_years: decay_file.zero_at_years.unwrap_or(50.0),
            },
            Some("exponential") | None => AgeDecay::Exponential {
                half_life_years: decay_file.half_life_years.unwrap_or(5.0),
            },
            Some(other) => bail!("Unknown age_decay.mode '{}'", other),
        };

        let features = file.features.unwrap_or_default();
        let force = env.force_rescan || features.force.unwrap_or(cli.force);
        let perpetual = features.perpetual.unwrap_or(cli.perpetual);
        let verbose = features.verbose.unwrap_or(cli.verbose);
        let batchrate = features.batchrate.unwrap_or(cli.batchrate);
        let album_skip_days = features
            .album_skip_days
            .unwrap_or(DEFAULT_ALBUM_SKIP_DAYS)
            .max(0);
        let perpetual_interval_hours = features
            .perpetual_interval_hours
            .unwrap_or(DEFAULT_PERPETUAL_INTERVAL_HOURS)
            .max(1);
        let video_only_single = features
            .video_only_single
            .unwrap_or(cfg!(feature = "video_only_single"));

        let api_call_timeout = Duration::from_secs(
            file.api_call_timeout_seconds
                .unwrap_or(DEFAULT_API_CALL_TIMEOUT_SECS)
                .max(1),
        );

        let db_path = env
            .db_path
            .clone()
            .map(PathBuf::from)
            .or_else(|| file.db_path.clone().map(PathBuf::from))
            .or_else(|| cli.db_path.clone())
            .unwrap_or_else(|| PathBuf::from("trackstar.db"));
        let log_path = env
            .log_path
            .clone()
            .map(PathBuf::from)
            .or_else(|| file.log_path.clone().map(PathBuf::from))
            .or_else(|| cli.log_path.clone())
            .unwrap_or_else(|| PathBuf::from("logs"));
        let playlist_dir = env
            .music_folder
            .clone()
            .map(|folder| PathBuf::from(folder).join("playlists"))
            .or_else(|| file.playlist_dir.clone().map(PathBuf::from));

        Ok(Self {
            library_base_url,
            library_token,
            spotify,
            lastfm_api_key,
            musicbrainz_user_agent,
            discogs_token,
            weights,
            age_decay,
            force,
            dry_run: cli.dry_run,
            batchrate,
            perpetual,
            verbose,
            video_only_single,
            album_skip_days,
            perpetual_interval_hours,
            api_call_timeout,
            db_path,
            log_path,
            playlist_dir,
        })
    }

    /// The rate-limiter state file lives next to the database.
    pub fn rate_limiter_state_path(&self) -> PathBuf {
        match self.db_path.parent() {
            Some(parent) if parent.as_os_str().is_empty() => {
                PathBuf::from("rate_limiter_state.json")
            }
            Some(parent) => parent.join("rate_limiter_state.json"),
            None => PathBuf::from("rate_limiter_state.json"),
        }
    }
}
