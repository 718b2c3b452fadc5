use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use trackstar::clients::{
    DiscogsClient, HttpPolicy, LastFmClient, MusicBrainzClient, SpotifyClient,
};
use trackstar::config::{AppConfig, CliConfig, EnvOverrides, FileConfig};
use trackstar::library::SubsonicLibrary;
use trackstar::scan::{ApiClients, ScanFilter, ScanPipeline, ScanSettings};
use trackstar::store::Store;
use trackstar::{logging, RateLimiter, RateLimiterConfig, SqliteStore};

const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_LIBRARY_ERROR: i32 = 2;

#[derive(Parser, Debug)]
#[clap(name = "trackstar", version, about = "Popularity ratings and single detection for a Subsonic library")]
struct CliArgs {
    /// Path to the YAML configuration file (or $CONFIG_PATH).
    #[clap(long)]
    config: Option<PathBuf>,

    /// Path to the catalog database file.
    #[clap(long)]
    db_path: Option<PathBuf>,

    /// Directory for the rotated log files.
    #[clap(long)]
    log_path: Option<PathBuf>,

    /// Only scan this artist.
    #[clap(long)]
    artist: Option<String>,

    /// Only scan this album (combined with --artist).
    #[clap(long)]
    album: Option<String>,

    /// Resume scanning from this artist name onwards.
    #[clap(long)]
    resume_from: Option<String>,

    /// Rescan albums even when recently completed.
    #[clap(long)]
    force: bool,

    /// Compute everything but write nothing and push no ratings.
    #[clap(long)]
    dry_run: bool,

    /// Re-rate from cached popularity scores without external API calls.
    #[clap(long)]
    batchrate: bool,

    /// Keep rescanning on an interval instead of exiting.
    #[clap(long)]
    perpetual: bool,

    /// Debug-level output on stdout.
    #[clap(long, short)]
    verbose: bool,

    /// Print the last N scan-history entries and exit.
    #[clap(long, value_name = "N")]
    recent: Option<usize>,

    /// Run the track deduplication utility and exit.
    #[clap(long)]
    dedup: bool,

    /// Skip the library import step and scan the stored catalog directly.
    #[clap(long)]
    skip_import: bool,
}

fn load_config(args: &CliArgs) -> Result<(AppConfig, Vec<String>)> {
    let config_path = args
        .config
        .clone()
        .or_else(|| std::env::var("CONFIG_PATH").ok().map(PathBuf::from));

    let (file_config, unknown_keys) = match &config_path {
        Some(path) => {
            let (config, unknown) = FileConfig::load(path)?;
            (Some(config), unknown)
        }
        None => (None, Vec::new()),
    };

    let cli = CliConfig {
        db_path: args.db_path.clone(),
        log_path: args.log_path.clone(),
        force: args.force,
        dry_run: args.dry_run,
        batchrate: args.batchrate,
        perpetual: args.perpetual,
        verbose: args.verbose,
    };
    let config = AppConfig::resolve(&cli, file_config, &EnvOverrides::from_process_env())?;
    Ok((config, unknown_keys))
}

fn build_clients(config: &AppConfig) -> Result<ApiClients> {
    // Under a bounded per-call budget the clients retry only once
    let policy = if config.api_call_timeout.as_secs() <= 30 {
        HttpPolicy::timeout_safe()
    } else {
        HttpPolicy::standard()
    };

    let popularity = match &config.spotify {
        Some(creds) => Some(Arc::new(SpotifyClient::new(
            &creds.client_id,
            &creds.client_secret,
            policy,
        )?) as Arc<dyn trackstar::clients::PopularityApi>),
        None => {
            warn!("Spotify credentials missing: popularity signals disabled");
            None
        }
    };
    let scrobbles = match &config.lastfm_api_key {
        Some(key) => Some(Arc::new(LastFmClient::new(key, policy)?)
            as Arc<dyn trackstar::clients::ScrobbleApi>),
        None => {
            warn!("Last.fm API key missing: scrobble signals disabled");
            None
        }
    };
    let release_groups = Some(Arc::new(MusicBrainzClient::new(
        &config.musicbrainz_user_agent,
        policy,
    )?) as Arc<dyn trackstar::clients::ReleaseGroupApi>);
    let release_formats = match &config.discogs_token {
        Some(token) => Some(Arc::new(DiscogsClient::new(
            token,
            &config.musicbrainz_user_agent,
            policy,
        )?) as Arc<dyn trackstar::clients::ReleaseFormatApi>),
        None => {
            warn!("Discogs token missing: release-format signals disabled");
            None
        }
    };

    Ok(ApiClients::new(
        popularity,
        scrobbles,
        release_groups,
        release_formats,
    ))
}

fn print_recent_scans(store: &dyn Store, limit: usize) -> Result<()> {
    let entries = store.recent_scans(limit)?;
    if entries.is_empty() {
        println!("No scan history.");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{}  {:<10}  {:<14}  {} / {} ({} tracks)",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.status.as_str(),
            entry.scan_type.as_str(),
            entry.artist,
            entry.album,
            entry.tracks_processed,
        );
    }
    Ok(())
}

async fn run_cycle(pipeline: &ScanPipeline, filter: &ScanFilter, skip_import: bool) -> Result<()> {
    if !skip_import {
        let import = pipeline.import_library().await?;
        info!(
            "Import: {} artists / {} albums / {} tracks",
            import.artists, import.albums, import.tracks
        );
    }
    let summary = pipeline.run(filter).await?;
    info!(
        "Scan summary: {} artists, {} completed, {} skipped, {} failed, {} ratings pushed{}",
        summary.artists_scanned,
        summary.albums_completed,
        summary.albums_skipped,
        summary.albums_failed,
        summary.ratings_pushed,
        if summary.cancelled { " (cancelled)" } else { "" },
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let (config, unknown_keys) = match load_config(&args) {
        Ok(resolved) => resolved,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    if let Err(e) = logging::init(&config.log_path, config.verbose) {
        eprintln!("Failed to initialize logging: {:#}", e);
        std::process::exit(EXIT_CONFIG_ERROR);
    }
    for key in &unknown_keys {
        warn!("Ignoring unknown config key '{}'", key);
    }

    let store: Arc<dyn Store> = match SqliteStore::new(&config.db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open catalog database: {:#}", e);
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    if let Some(limit) = args.recent {
        if let Err(e) = print_recent_scans(store.as_ref(), limit) {
            error!("Failed to read scan history: {:#}", e);
            std::process::exit(EXIT_CONFIG_ERROR);
        }
        return;
    }

    if args.dedup {
        match store.dedup_tracks() {
            Ok(removed) => info!("Deduplication removed {} rows", removed),
            Err(e) => {
                error!("Deduplication failed: {:#}", e);
                std::process::exit(EXIT_CONFIG_ERROR);
            }
        }
        return;
    }

    let library = match SubsonicLibrary::new(&config.library_base_url, &config.library_token) {
        Ok(library) => Arc::new(library),
        Err(e) => {
            error!("Failed to construct library client: {}", e);
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    let clients = match build_clients(&config) {
        Ok(clients) => clients,
        Err(e) => {
            error!("Failed to construct API clients: {:#}", e);
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    let limiter = Arc::new(RateLimiter::new(
        config.rate_limiter_state_path(),
        RateLimiterConfig::default(),
    ));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            eprintln!("Stop requested, finishing current album...");
            cancel.cancel();
        }) {
            warn!("Failed to install interrupt handler: {}", e);
        }
    }

    let settings = ScanSettings {
        weights: config.weights,
        age_decay: config.age_decay,
        api_call_timeout: config.api_call_timeout,
        album_skip_days: config.album_skip_days,
        force: config.force,
        dry_run: config.dry_run,
        batchrate: config.batchrate,
        playlist_dir: config.playlist_dir.clone(),
        video_only_single: config.video_only_single,
    };
    let pipeline = ScanPipeline::new(
        store,
        library,
        clients,
        Arc::clone(&limiter),
        settings,
        cancel.clone(),
    );

    // Library connectivity is fatal at startup, except in perpetual mode
    // where the next cycle retries.
    if let Err(e) = pipeline.check_library().await {
        if config.perpetual {
            warn!("Library unreachable, will retry next cycle: {}", e);
        } else {
            error!("Library unreachable: {}", e);
            std::process::exit(EXIT_LIBRARY_ERROR);
        }
    }

    let filter = ScanFilter {
        artist: args.artist.clone(),
        album: args.album.clone(),
        resume_from_artist: args.resume_from.clone(),
    };

    if config.perpetual {
        let interval =
            std::time::Duration::from_secs(config.perpetual_interval_hours * 60 * 60);
        loop {
            if let Err(e) = run_cycle(&pipeline, &filter, args.skip_import).await {
                error!("Scan cycle failed: {:#}", e);
            }
            if cancel.is_cancelled() {
                break;
            }
            info!(
                "Perpetual mode: sleeping {} hours",
                config.perpetual_interval_hours
            );
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => break,
            }
        }
        limiter.flush();
        return;
    }

    let result = run_cycle(&pipeline, &filter, args.skip_import).await;
    limiter.flush();
    if let Err(e) = result {
        error!("Scan failed: {:#}", e);
        std::process::exit(EXIT_LIBRARY_ERROR);
    }
}
