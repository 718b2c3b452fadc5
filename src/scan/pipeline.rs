//! Scan orchestration.
//!
//! Albums are processed sequentially to keep rate-limiter pressure
//! predictable; within a track the popularity and scrobble calls run
//! concurrently, as do the two metadata lookups during detection. Per-API
//! concurrency is capped by semaphores. Failures are contained: a track
//! failure never aborts its album, an album failure never aborts the scan.

use super::detector::{self, Detection, DetectionInput, SingleEvidence};
use super::rater::{self, RatingInput};
use super::score::{self, AgeDecay, ScoreWeights};
use super::stats;
use crate::clients::{
    PopularityApi, ReleaseContext, ReleaseFormatApi, ReleaseGroupApi, ScrobbleApi, TrackCandidate,
};
use crate::library::{Library, LibraryError};
use crate::playlist;
use crate::rate_limiter::{RateLimitedApi, RateLimiter};
use crate::store::{
    Album, AlternateUpdate, Artist, ArtistExternalIds, PopularityUpdate, ScanStatus, ScanType,
    SinglesUpdate, Store, Track,
};
use crate::titles;
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Store writes are retried once after this backoff before the album is
/// marked failed.
const STORE_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Cached popularity scores younger than this are not re-fetched.
const POPULARITY_CACHE_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub weights: ScoreWeights,
    pub age_decay: AgeDecay,
    /// Hard wall-clock budget for one external API call.
    pub api_call_timeout: Duration,
    /// Completed popularity scans within this many days are skipped.
    pub album_skip_days: i64,
    pub force: bool,
    pub dry_run: bool,
    /// Re-rate from cached scores without external calls.
    pub batchrate: bool,
    /// Directory for essential-playlist emission; `None` disables it.
    pub playlist_dir: Option<PathBuf>,
    /// Allow a video-only metadata match to reach medium confidence.
    pub video_only_single: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            age_decay: AgeDecay::default(),
            api_call_timeout: Duration::from_secs(30),
            album_skip_days: 30,
            force: false,
            dry_run: false,
            batchrate: false,
            playlist_dir: None,
            video_only_single: cfg!(feature = "video_only_single"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    pub artist: Option<String>,
    pub album: Option<String>,
    pub resume_from_artist: Option<String>,
}

/// The four external clients with their concurrency caps. A `None` client
/// is a disabled integration; its signals simply never fire.
pub struct ApiClients {
    pub popularity: Option<Arc<dyn PopularityApi>>,
    pub scrobbles: Option<Arc<dyn ScrobbleApi>>,
    pub release_groups: Option<Arc<dyn ReleaseGroupApi>>,
    pub release_formats: Option<Arc<dyn ReleaseFormatApi>>,
    spotify_permits: Arc<Semaphore>,
    lastfm_permits: Arc<Semaphore>,
    musicbrainz_permits: Arc<Semaphore>,
    discogs_permits: Arc<Semaphore>,
}

impl ApiClients {
    pub fn new(
        popularity: Option<Arc<dyn PopularityApi>>,
        scrobbles: Option<Arc<dyn ScrobbleApi>>,
        release_groups: Option<Arc<dyn ReleaseGroupApi>>,
        release_formats: Option<Arc<dyn ReleaseFormatApi>>,
    ) -> Self {
        Self {
            popularity,
            scrobbles,
            release_groups,
            release_formats,
            spotify_permits: Arc::new(Semaphore::new(4)),
            lastfm_permits: Arc::new(Semaphore::new(1)),
            musicbrainz_permits: Arc::new(Semaphore::new(2)),
            discogs_permits: Arc::new(Semaphore::new(2)),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, None, None, None)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ScanSummary {
    pub artists_scanned: u32,
    pub albums_completed: u32,
    pub albums_skipped: u32,
    pub albums_failed: u32,
    pub tracks_processed: u32,
    pub ratings_pushed: u32,
    pub cancelled: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ImportSummary {
    pub artists: u32,
    pub albums: u32,
    pub tracks: u32,
}

enum AlbumOutcome {
    Completed(u32),
    Skipped,
    Cancelled,
}

pub struct ScanPipeline {
    store: Arc<dyn Store>,
    library: Arc<dyn Library>,
    clients: ApiClients,
    limiter: Arc<RateLimiter>,
    settings: ScanSettings,
    cancel: CancellationToken,
}

/// Pick the search candidate closest in duration, skipping live/remix album
/// names outside a live context.
fn pick_candidate<'a>(
    candidates: &'a [TrackCandidate],
    duration_sec: u32,
    ctx: ReleaseContext,
) -> Option<&'a TrackCandidate> {
    let duration_ms = duration_sec as i64 * 1000;
    candidates
        .iter()
        .filter(|candidate| {
            if ctx.live_ok() {
                return true;
            }
            let album_lc = candidate.album_name.to_lowercase();
            !album_lc.contains("live") && !album_lc.contains("remix")
        })
        .min_by_key(|candidate| match candidate.duration_ms {
            Some(ms) if duration_ms > 0 => (ms as i64 - duration_ms).abs(),
            _ => i64::MAX / 2,
        })
}

fn candidate_reports_single(candidate: &TrackCandidate) -> bool {
    matches!(
        candidate.album_type,
        Some(crate::store::AlbumType::Single) | Some(crate::store::AlbumType::Ep)
    )
}

impl ScanPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        library: Arc<dyn Library>,
        clients: ApiClients,
        limiter: Arc<RateLimiter>,
        settings: ScanSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            library,
            clients,
            limiter,
            settings,
            cancel,
        }
    }

    /// Retry a store write once with a short backoff before giving up.
    fn store_write<F>(&self, op: F) -> Result<()>
    where
        F: Fn() -> Result<()>,
    {
        match op() {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!("Store write failed, retrying once: {}", first);
                std::thread::sleep(STORE_RETRY_BACKOFF);
                op()
            }
        }
    }

    /// Pull the library catalog into the store (content-key deduplicated).
    pub async fn import_library(&self) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();
        let artists = self
            .library
            .list_artists()
            .await
            .context("Failed to list library artists")?;
        info!("Importing {} artists from library", artists.len());

        for lib_artist in artists {
            if self.cancel.is_cancelled() {
                break;
            }
            self.store.upsert_artist(&lib_artist.name, &[])?;
            summary.artists += 1;

            let albums = match self.library.list_albums(&lib_artist).await {
                Ok(albums) => albums,
                Err(e) => {
                    error!("Failed to list albums for '{}': {}", lib_artist.name, e);
                    continue;
                }
            };

            for lib_album in albums {
                if self.cancel.is_cancelled() {
                    break;
                }
                let genres: Vec<String> = lib_album.genre.clone().into_iter().collect();
                self.store.upsert_album(&Album {
                    artist: lib_artist.name.clone(),
                    title: lib_album.title.clone(),
                    release_year: lib_album.year,
                    genres: genres.clone(),
                    cover_art_url: lib_album.cover_art.clone(),
                    track_count: lib_album.track_count,
                    ..Default::default()
                })?;
                if !genres.is_empty() {
                    self.store.upsert_artist(&lib_artist.name, &genres)?;
                }

                let tracks = match self.library.list_tracks(&lib_album).await {
                    Ok(tracks) => tracks,
                    Err(e) => {
                        error!(
                            "Failed to list tracks for '{}' / '{}': {}",
                            lib_artist.name, lib_album.title, e
                        );
                        self.store_write(|| {
                            self.store.record_scan(
                                &lib_artist.name,
                                &lib_album.title,
                                ScanType::LibraryImport,
                                0,
                                ScanStatus::Error,
                            )
                        })?;
                        continue;
                    }
                };

                let mut imported = 0u32;
                for track in &tracks {
                    self.store.upsert_track(&Track {
                        library_id: Some(track.id.clone()),
                        title: track.title.clone(),
                        artist: track.artist.clone(),
                        album: track.album.clone(),
                        duration_sec: track.duration_sec,
                        file_path: track.path.clone(),
                        ..Default::default()
                    })?;
                    imported += 1;
                }
                summary.tracks += imported;
                summary.albums += 1;

                let status = if imported > 0 {
                    ScanStatus::Completed
                } else {
                    ScanStatus::Skipped
                };
                self.store_write(|| {
                    self.store.record_scan(
                        &lib_artist.name,
                        &lib_album.title,
                        ScanType::LibraryImport,
                        imported,
                        status,
                    )
                })?;
            }
        }

        info!(
            "Library import finished: {} artists, {} albums, {} tracks",
            summary.artists, summary.albums, summary.tracks
        );
        Ok(summary)
    }

    /// Run the popularity scan over the stored catalog.
    pub async fn run(&self, filter: &ScanFilter) -> Result<ScanSummary> {
        let mut summary = ScanSummary::default();
        let mut artist_names = self.store.list_artist_names()?;

        if let Some(wanted) = &filter.artist {
            let wanted_lc = wanted.to_lowercase();
            artist_names.retain(|name| name.to_lowercase() == wanted_lc);
        }
        if let Some(resume) = &filter.resume_from_artist {
            let resume_lc = resume.to_lowercase();
            artist_names.retain(|name| name.to_lowercase() >= resume_lc);
        }

        info!("Scanning {} artists", artist_names.len());
        for name in artist_names {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            match self.scan_artist(&name, filter, &mut summary).await {
                Ok(()) => summary.artists_scanned += 1,
                Err(e) => {
                    error!("Artist scan failed for '{}': {}", name, e);
                }
            }
        }

        info!(
            "Scan finished: {} artists, {} albums completed, {} skipped, {} failed, {} tracks",
            summary.artists_scanned,
            summary.albums_completed,
            summary.albums_skipped,
            summary.albums_failed,
            summary.tracks_processed
        );
        Ok(summary)
    }

    async fn scan_artist(
        &self,
        name: &str,
        filter: &ScanFilter,
        summary: &mut ScanSummary,
    ) -> Result<()> {
        let artist = self
            .store
            .get_artist(name)?
            .with_context(|| format!("Artist '{}' not in store", name))?;
        let artist = self.resolve_artist_ids(artist).await?;

        // Store ordering is already deterministic (title, case-insensitive)
        let mut albums = self.store.list_albums(name)?;
        if let Some(wanted) = &filter.album {
            let wanted_lc = wanted.to_lowercase();
            albums.retain(|album| album.title.to_lowercase() == wanted_lc);
        }

        for album in &albums {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                return Ok(());
            }

            if !self.settings.force
                && self.store.was_album_scanned(
                    &artist.name,
                    &album.title,
                    ScanType::Popularity,
                    self.settings.album_skip_days,
                )?
            {
                info!("Skipping '{}' / '{}': recently scanned", artist.name, album.title);
                self.store_write(|| {
                    self.store.record_scan(
                        &artist.name,
                        &album.title,
                        ScanType::Popularity,
                        0,
                        ScanStatus::Skipped,
                    )
                })?;
                summary.albums_skipped += 1;
                continue;
            }

            match self.scan_album(&artist, album, summary).await {
                Ok(AlbumOutcome::Completed(tracks)) => {
                    summary.albums_completed += 1;
                    summary.tracks_processed += tracks;
                }
                Ok(AlbumOutcome::Skipped) => summary.albums_skipped += 1,
                Ok(AlbumOutcome::Cancelled) => {
                    summary.cancelled = true;
                    return Ok(());
                }
                Err(e) => {
                    error!(
                        "Album scan failed for '{}' / '{}': {}",
                        artist.name, album.title, e
                    );
                    if let Err(record_err) = self.store_write(|| {
                        self.store.record_scan(
                            &artist.name,
                            &album.title,
                            ScanType::Popularity,
                            0,
                            ScanStatus::Error,
                        )
                    }) {
                        error!("Failed to record album error: {}", record_err);
                    }
                    summary.albums_failed += 1;
                }
            }
        }

        self.refresh_artist_stats(&artist).await?;
        self.emit_playlist(&artist)?;
        Ok(())
    }

    /// Resolve and cache external artist ids once per artist.
    async fn resolve_artist_ids(&self, artist: Artist) -> Result<Artist> {
        if artist.external_ids.spotify_id.is_some() {
            return Ok(artist);
        }
        let Some(popularity) = &self.clients.popularity else {
            return Ok(artist);
        };
        if !self
            .limiter
            .wait_if_needed(RateLimitedApi::Spotify, self.settings.api_call_timeout)
            .await
        {
            info!("Rate limited: skipping artist id lookup for '{}'", artist.name);
            return Ok(artist);
        }
        self.limiter.record(RateLimitedApi::Spotify);

        let found = tokio::time::timeout(
            self.settings.api_call_timeout,
            popularity.find_artist_id(&artist.name),
        )
        .await
        .unwrap_or_else(|_| {
            warn!("Timeout resolving artist id for '{}'", artist.name);
            None
        });

        if let Some(id) = found {
            debug!("Resolved artist id {} for '{}'", id, artist.name);
            self.store.set_artist_external_ids(
                &artist.name,
                &ArtistExternalIds {
                    spotify_id: Some(id),
                    ..Default::default()
                },
            )?;
            return Ok(self.store.get_artist(&artist.name)?.unwrap_or(artist));
        }
        Ok(artist)
    }

    async fn scan_album(
        &self,
        artist: &Artist,
        album: &Album,
        summary: &mut ScanSummary,
    ) -> Result<AlbumOutcome> {
        let mut tracks = self.store.get_album_tracks(&artist.name, &album.title)?;
        if tracks.is_empty() {
            self.store_write(|| {
                self.store.record_scan(
                    &artist.name,
                    &album.title,
                    ScanType::Popularity,
                    0,
                    ScanStatus::Skipped,
                )
            })?;
            return Ok(AlbumOutcome::Skipped);
        }

        let prev_stars: Vec<u8> = tracks.iter().map(|t| t.stars).collect();
        let ctx = ReleaseContext {
            is_live: titles::is_live_context(&album.title),
            is_unplugged: album.title.to_lowercase().contains("unplugged"),
        };

        // Phase 1: popularity lookups
        let mut popularity_rows: Vec<PopularityUpdate> = Vec::with_capacity(tracks.len());
        let mut spotify_single_flags = vec![false; tracks.len()];
        let mut interrupted = false;

        for index in 0..tracks.len() {
            if self.cancel.is_cancelled() {
                interrupted = true;
                break;
            }

            let track = &tracks[index];
            let has_fresh_score = track.popularity_score > 0.0
                && track.last_popularity_lookup.is_some_and(|ts| {
                    ts > Utc::now() - ChronoDuration::hours(POPULARITY_CACHE_HOURS)
                });
            let skip_lookup = self.settings.batchrate
                || titles::contains_skip_keyword(&track.title)
                || (has_fresh_score && !self.settings.force);

            if skip_lookup {
                debug!("Keeping cached score for '{}'", track.title);
                continue;
            }

            let (spotify_result, scrobbles) = tokio::join!(
                self.spotify_lookup(track, ctx),
                self.lastfm_lookup(track)
            );

            let spotify_pop = spotify_result.as_ref().map(|(pop, _)| *pop);
            if let Some((_, reports_single)) = spotify_result {
                spotify_single_flags[index] = reports_single;
            }
            let playcount = scrobbles.map(|s| s.playcount);

            if spotify_pop.is_none() && playcount.is_none() {
                // Nothing came back; leave the cached score alone
                continue;
            }

            let score = score::popularity_score(
                spotify_pop,
                playcount,
                album.release_year,
                self.settings.weights,
                self.settings.age_decay,
            );
            tracks[index].popularity_score = score;
            popularity_rows.push(PopularityUpdate {
                track_id: tracks[index].id,
                popularity_score: score,
                album_z: None,
                artist_z: None,
                looked_up_at: Some(Utc::now()),
            });
        }

        // Phase 2: statistics
        let analysis = stats::analyze_album(&tracks);
        let album_stats = analysis.stats;
        let artist_stats = self.refresh_artist_stats_with(artist, &tracks).await?;
        let underperforming = match (&album_stats, &artist_stats) {
            (Some(album), artist) => stats::is_underperforming(album, artist),
            _ => false,
        };

        let counted_desc: Vec<f64> = {
            let mut pops: Vec<f64> = (0..tracks.len())
                .filter(|&i| !analysis.is_excluded(i) && tracks[i].popularity_score > 0.0)
                .map(|i| tracks[i].popularity_score)
                .collect();
            pops.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
            pops
        };

        // Fill in the z-scores now that statistics exist
        if let Some(album_stats) = &album_stats {
            for row in &mut popularity_rows {
                if let Some(track) = tracks.iter().find(|t| t.id == row.track_id) {
                    row.album_z = Some(album_stats.album_z(track.popularity_score));
                    row.artist_z = stats::artist_z(&artist_stats, track.popularity_score);
                }
            }
        }

        // Phase 3: detection and rating
        let mut singles_rows: Vec<SinglesUpdate> = Vec::with_capacity(tracks.len());
        if !interrupted {
            for index in 0..tracks.len() {
                if self.cancel.is_cancelled() {
                    interrupted = true;
                    break;
                }
                let track = &tracks[index];
                let excluded = analysis.is_excluded(index);

                let detection = if excluded || self.settings.batchrate {
                    // Excluded tracks never promote; batchrate re-rates from
                    // cached scores without external calls
                    Detection::none()
                } else {
                    let evidence = self
                        .gather_evidence(track, ctx, spotify_single_flags[index])
                        .await;
                    let is_live = titles::is_live_title(&track.title) || ctx.live_ok();
                    detector::detect(&DetectionInput {
                        popularity: track.popularity_score,
                        is_live,
                        album_stats,
                        album_track_count: tracks.len(),
                        artist_stats: Some(artist_stats),
                        evidence,
                        video_only_allowed: self.settings.video_only_single,
                    })
                };

                let band = rater::band_for_popularity(track.popularity_score, &counted_desc);
                let stars = rater::rate(&RatingInput {
                    detection: &detection,
                    band,
                    excluded,
                    album_underperforming: underperforming,
                    artist_z: stats::artist_z(&artist_stats, track.popularity_score),
                });

                singles_rows.push(SinglesUpdate {
                    track_id: track.id,
                    is_single: detection.is_single,
                    confidence: detection.confidence,
                    sources: detection.sources,
                    stars,
                });
            }
        }

        let alternate_rows: Vec<AlternateUpdate> = (0..tracks.len())
            .map(|index| AlternateUpdate {
                track_id: tracks[index].id,
                alternate_take: analysis.alternate_of[index].is_some(),
                base_track_id: analysis.alternate_of[index].map(|base| tracks[base].id),
            })
            .collect();

        // Phase 4: batched writes, then the library push, then history.
        // A crash between steps leaves the album rescannable: scan_history
        // is written last.
        self.store_write(|| self.store.batch_update_popularity(&popularity_rows))?;
        self.store_write(|| self.store.batch_update_alternates(&alternate_rows))?;
        self.store_write(|| self.store.batch_update_singles(&singles_rows))?;

        if !self.settings.dry_run {
            for row in &singles_rows {
                let Some(index) = tracks.iter().position(|t| t.id == row.track_id) else {
                    continue;
                };
                if prev_stars[index] == row.stars {
                    continue;
                }
                let Some(library_id) = tracks[index].library_id.clone() else {
                    continue;
                };
                match self.library.apply_rating(&library_id, row.stars).await {
                    Ok(()) => summary.ratings_pushed += 1,
                    Err(e) => info!(
                        "Failed to push rating for '{}': {}",
                        tracks[index].title, e
                    ),
                }
            }
        }

        if interrupted {
            self.store_write(|| {
                self.store.record_scan(
                    &artist.name,
                    &album.title,
                    ScanType::Popularity,
                    singles_rows.len() as u32,
                    ScanStatus::Interrupted,
                )
            })?;
            return Ok(AlbumOutcome::Cancelled);
        }

        let processed = tracks.len() as u32;
        self.store_write(|| {
            self.store.record_scan(
                &artist.name,
                &album.title,
                ScanType::Popularity,
                processed,
                ScanStatus::Completed,
            )
        })?;
        info!(
            "Completed '{}' / '{}': {} tracks",
            artist.name, album.title, processed
        );
        Ok(AlbumOutcome::Completed(processed))
    }

    async fn spotify_lookup(&self, track: &Track, ctx: ReleaseContext) -> Option<(f64, bool)> {
        let client = self.clients.popularity.as_ref()?;
        if !self
            .limiter
            .wait_if_needed(RateLimitedApi::Spotify, self.settings.api_call_timeout)
            .await
        {
            info!("Rate limited: skipping spotify lookup for '{}'", track.title);
            return None;
        }
        let _permit = self.clients.spotify_permits.acquire().await.ok()?;
        self.limiter.record(RateLimitedApi::Spotify);

        let candidates = tokio::time::timeout(
            self.settings.api_call_timeout,
            client.search_track(&track.title, &track.artist, Some(&track.album)),
        )
        .await
        .unwrap_or_else(|_| {
            warn!("Timeout on spotify search for '{}'", track.title);
            Vec::new()
        });

        let candidate = pick_candidate(&candidates, track.duration_sec, ctx)?;
        Some((candidate.popularity, candidate_reports_single(candidate)))
    }

    async fn lastfm_lookup(&self, track: &Track) -> Option<crate::clients::TrackScrobbles> {
        let client = self.clients.scrobbles.as_ref()?;
        if !self
            .limiter
            .wait_if_needed(RateLimitedApi::LastFm, self.settings.api_call_timeout)
            .await
        {
            info!("Rate limited: skipping lastfm lookup for '{}'", track.title);
            return None;
        }
        let _permit = self.clients.lastfm_permits.acquire().await.ok()?;
        self.limiter.record(RateLimitedApi::LastFm);

        tokio::time::timeout(
            self.settings.api_call_timeout,
            client.track_info(&track.artist, &track.title),
        )
        .await
        .unwrap_or_else(|_| {
            warn!("Timeout on lastfm lookup for '{}'", track.title);
            None
        })
    }

    /// Query the two metadata sources concurrently for one track.
    async fn gather_evidence(
        &self,
        track: &Track,
        ctx: ReleaseContext,
        spotify_single: bool,
    ) -> SingleEvidence {
        let musicbrainz = async {
            let Some(client) = self.clients.release_groups.as_ref() else {
                return false;
            };
            let Ok(_permit) = self.clients.musicbrainz_permits.acquire().await else {
                return false;
            };
            tokio::time::timeout(
                self.settings.api_call_timeout,
                client.is_single(&track.title, &track.artist),
            )
            .await
            .unwrap_or_else(|_| {
                warn!("Timeout on musicbrainz lookup for '{}'", track.title);
                false
            })
        };

        let discogs = async {
            let Some(client) = self.clients.release_formats.as_ref() else {
                return (false, false);
            };
            let Ok(_permit) = self.clients.discogs_permits.acquire().await else {
                return (false, false);
            };
            let single = tokio::time::timeout(
                self.settings.api_call_timeout,
                client.is_single(&track.title, &track.artist, ctx),
            )
            .await
            .unwrap_or_else(|_| {
                warn!("Timeout on discogs lookup for '{}'", track.title);
                false
            });
            let video = tokio::time::timeout(
                self.settings.api_call_timeout,
                client.has_official_video(&track.title, &track.artist, ctx),
            )
            .await
            .unwrap_or(false);
            (single, video)
        };

        let (musicbrainz_single, (discogs_single, discogs_video)) =
            tokio::join!(musicbrainz, discogs);

        SingleEvidence {
            spotify_single,
            musicbrainz_single,
            discogs_single,
            discogs_video,
        }
    }

    /// Recompute artist statistics with the in-memory scores of the current
    /// album overriding the stored rows, and persist the result.
    async fn refresh_artist_stats_with(
        &self,
        artist: &Artist,
        current_album: &[Track],
    ) -> Result<crate::store::ArtistStats> {
        let mut artist_tracks = self.store.get_artist_tracks(&artist.name)?;
        for stored in &mut artist_tracks {
            if let Some(fresh) = current_album.iter().find(|t| t.id == stored.id) {
                stored.popularity_score = fresh.popularity_score;
            }
        }
        let computed = stats::artist_stats(&artist_tracks);
        if !self.settings.dry_run {
            self.store_write(|| self.store.update_artist_stats(&artist.name, &computed))?;
        }
        Ok(computed)
    }

    async fn refresh_artist_stats(&self, artist: &Artist) -> Result<()> {
        let artist_tracks = self.store.get_artist_tracks(&artist.name)?;
        let computed = stats::artist_stats(&artist_tracks);
        if !self.settings.dry_run {
            self.store_write(|| self.store.update_artist_stats(&artist.name, &computed))?;
        }
        Ok(())
    }

    fn emit_playlist(&self, artist: &Artist) -> Result<()> {
        let Some(dir) = &self.settings.playlist_dir else {
            return Ok(());
        };
        if self.settings.dry_run {
            return Ok(());
        }
        let tracks = self.store.get_artist_tracks(&artist.name)?;
        match playlist::emit_essential_playlist(dir, &artist.name, &tracks) {
            Ok(Some(path)) => info!("Wrote essential playlist {:?}", path),
            Ok(None) => {}
            Err(e) => warn!("Failed to write playlist for '{}': {}", artist.name, e),
        }
        Ok(())
    }

    /// Probe library connectivity; startup fails fast when unreachable.
    pub async fn check_library(&self) -> Result<(), LibraryError> {
        self.library.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AlbumType;

    fn candidate(album: &str, album_type: Option<AlbumType>, pop: f64, ms: Option<u64>) -> TrackCandidate {
        TrackCandidate {
            id: "x".to_string(),
            album_type,
            album_name: album.to_string(),
            popularity: pop,
            duration_ms: ms,
        }
    }

    #[test]
    fn test_pick_candidate_filters_live_and_remix_albums() {
        let candidates = vec![
            candidate("Greatest Live", Some(AlbumType::Album), 90.0, Some(200_000)),
            candidate("Club Remixes", Some(AlbumType::Compilation), 85.0, Some(200_000)),
            candidate("The Album", Some(AlbumType::Album), 70.0, Some(200_000)),
        ];
        let picked = pick_candidate(&candidates, 200, ReleaseContext::default()).unwrap();
        assert_eq!(picked.album_name, "The Album");
    }

    #[test]
    fn test_pick_candidate_allows_live_in_live_context() {
        let candidates = vec![candidate(
            "Greatest Live",
            Some(AlbumType::Album),
            90.0,
            Some(200_000),
        )];
        let ctx = ReleaseContext {
            is_live: true,
            is_unplugged: false,
        };
        assert!(pick_candidate(&candidates, 200, ctx).is_some());
        assert!(pick_candidate(&candidates, 200, ReleaseContext::default()).is_none());
    }

    #[test]
    fn test_pick_candidate_prefers_duration_match() {
        let candidates = vec![
            candidate("A", Some(AlbumType::Album), 50.0, Some(350_000)),
            candidate("B", Some(AlbumType::Album), 60.0, Some(201_000)),
        ];
        let picked = pick_candidate(&candidates, 200, ReleaseContext::default()).unwrap();
        assert_eq!(picked.album_name, "B");
    }

    #[test]
    fn test_candidate_reports_single() {
        assert!(candidate_reports_single(&candidate(
            "S",
            Some(AlbumType::Single),
            0.0,
            None
        )));
        assert!(candidate_reports_single(&candidate(
            "E",
            Some(AlbumType::Ep),
            0.0,
            None
        )));
        assert!(!candidate_reports_single(&candidate(
            "A",
            Some(AlbumType::Album),
            0.0,
            None
        )));
        assert!(!candidate_reports_single(&candidate("N", None, 0.0, None)));
    }
}
