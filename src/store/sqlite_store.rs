//! SQLite implementation of the [`Store`] contract.

use super::models::{
    Album, AlbumType, AlternateUpdate, Artist, ArtistExternalIds, ArtistStats, Confidence,
    PopularityUpdate, ScanHistoryEntry, ScanStatus, ScanType, SinglesUpdate, Track,
};
use super::schema::CATALOG_VERSIONED_SCHEMAS;
use super::Store;
use crate::sqlite_persistence::open_versioned;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Duration slack (seconds) when matching an incoming track against an
/// existing row's content key.
const DURATION_TOLERANCE_SEC: i64 = 2;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();
        let mut conn = Connection::open(path).context("Failed to open catalog database")?;
        if is_new_db {
            info!("Creating new catalog database at {:?}", path);
        }
        open_versioned(&mut conn, CATALOG_VERSIONED_SCHEMAS, is_new_db)
            .context("Catalog database schema check failed")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store, used by tests.
    pub fn in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        open_versioned(&mut conn, CATALOG_VERSIONED_SCHEMAS, true)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    fn parse_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
        s.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        })
    }

    fn genres_to_json(genres: &[String]) -> Option<String> {
        if genres.is_empty() {
            None
        } else {
            serde_json::to_string(genres).ok()
        }
    }

    fn genres_from_json(raw: Option<String>) -> Vec<String> {
        raw.and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    fn row_to_track(row: &rusqlite::Row) -> rusqlite::Result<Track> {
        let confidence_str: String = row.get("single_confidence")?;
        let sources_raw: Option<String> = row.get("single_sources")?;
        let lookup_raw: Option<String> = row.get("last_popularity_lookup")?;
        let scanned_raw: Option<String> = row.get("last_scanned")?;
        let stars: i64 = row.get("stars")?;
        let duration: i64 = row.get("duration_sec")?;

        Ok(Track {
            id: row.get("id")?,
            library_id: row.get("library_id")?,
            title: row.get("title")?,
            artist: row.get("artist")?,
            album: row.get("album")?,
            duration_sec: duration.max(0) as u32,
            isrc: row.get("isrc")?,
            file_path: row.get("file_path")?,
            spotify_id: row.get("spotify_id")?,
            lastfm_mbid: row.get("lastfm_mbid")?,
            musicbrainz_mbid: row.get("musicbrainz_mbid")?,
            discogs_release_id: row.get("discogs_release_id")?,
            popularity_score: row.get("popularity_score")?,
            stars: stars.clamp(0, 5) as u8,
            is_single: row.get::<_, i64>("is_single")? != 0,
            single_confidence: Confidence::parse(&confidence_str).unwrap_or_default(),
            single_sources: sources_raw
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            album_z: row.get("album_z")?,
            artist_z: row.get("artist_z")?,
            alternate_take: row.get::<_, i64>("alternate_take")? != 0,
            base_track_id: row.get("base_track_id")?,
            last_popularity_lookup: Self::parse_datetime(lookup_raw),
            last_scanned: Self::parse_datetime(scanned_raw),
        })
    }

    fn row_to_album(row: &rusqlite::Row) -> rusqlite::Result<Album> {
        let album_type_raw: Option<String> = row.get("album_type")?;
        let genres_raw: Option<String> = row.get("genres")?;
        let scanned_raw: Option<String> = row.get("last_scanned")?;
        Ok(Album {
            id: row.get("id")?,
            artist: row.get("artist")?,
            title: row.get("title")?,
            release_year: row.get("release_year")?,
            release_date: row.get("release_date")?,
            album_type: album_type_raw.as_deref().and_then(AlbumType::parse),
            track_count: row.get::<_, Option<i64>>("track_count")?.map(|c| c as u32),
            disc_count: row.get::<_, Option<i64>>("disc_count")?.map(|c| c as u32),
            cover_art_url: row.get("cover_art_url")?,
            genres: Self::genres_from_json(genres_raw),
            musicbrainz_release_id: row.get("musicbrainz_release_id")?,
            discogs_release_id: row.get("discogs_release_id")?,
            last_scanned: Self::parse_datetime(scanned_raw),
        })
    }

    fn row_to_artist(row: &rusqlite::Row) -> rusqlite::Result<Artist> {
        let genres_raw: Option<String> = row.get("genres")?;
        let mean: Option<f64> = row.get("pop_mean")?;
        let median: Option<f64> = row.get("pop_median")?;
        let stddev: Option<f64> = row.get("pop_stddev")?;
        let track_count: Option<i64> = row.get("stats_track_count")?;
        let stats_updated_raw: Option<String> = row.get("stats_updated_at")?;

        let stats = match (mean, median, stddev, track_count) {
            (Some(mean), Some(median), Some(stddev), Some(track_count)) => Some(ArtistStats {
                mean,
                median,
                stddev,
                track_count: track_count.max(0) as usize,
            }),
            _ => None,
        };

        Ok(Artist {
            id: row.get("id")?,
            name: row.get("name")?,
            genres: Self::genres_from_json(genres_raw),
            external_ids: ArtistExternalIds {
                spotify_id: row.get("spotify_id")?,
                lastfm_mbid: row.get("lastfm_mbid")?,
                musicbrainz_mbid: row.get("musicbrainz_mbid")?,
                discogs_id: row.get("discogs_id")?,
            },
            stats,
            stats_updated_at: Self::parse_datetime(stats_updated_raw),
        })
    }

    fn row_to_scan_entry(row: &rusqlite::Row) -> rusqlite::Result<ScanHistoryEntry> {
        let scan_type_raw: String = row.get("scan_type")?;
        let status_raw: String = row.get("status")?;
        let timestamp_raw: String = row.get("timestamp")?;
        let tracks_processed: i64 = row.get("tracks_processed")?;
        Ok(ScanHistoryEntry {
            id: row.get("id")?,
            artist: row.get("artist")?,
            album: row.get("album")?,
            scan_type: ScanType::parse(&scan_type_raw).unwrap_or(ScanType::LibraryImport),
            timestamp: Self::parse_datetime(Some(timestamp_raw)).unwrap_or_else(Utc::now),
            tracks_processed: tracks_processed.max(0) as u32,
            status: ScanStatus::parse(&status_raw).unwrap_or(ScanStatus::Error),
        })
    }

    fn insert_track(conn: &Connection, track: &Track) -> Result<i64> {
        let now = Self::format_datetime(&Utc::now());
        conn.execute(
            "INSERT INTO tracks (
                library_id, title, artist, album, title_lc, artist_lc, album_lc,
                duration_sec, isrc, file_path,
                spotify_id, lastfm_mbid, musicbrainz_mbid, discogs_release_id,
                last_scanned
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                track.library_id,
                track.title,
                track.artist,
                track.album,
                track.title.to_lowercase(),
                track.artist.to_lowercase(),
                track.album.to_lowercase(),
                track.duration_sec as i64,
                track.isrc,
                track.file_path,
                track.spotify_id,
                track.lastfm_mbid,
                track.musicbrainz_mbid,
                track.discogs_release_id,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn find_colliding_tracks(conn: &Connection, track: &Track) -> Result<Vec<Track>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM tracks
             WHERE artist_lc = ?1 AND album_lc = ?2 AND title_lc = ?3
               AND ABS(duration_sec - ?4) <= ?5",
        )?;
        let rows = stmt
            .query_map(
                params![
                    track.artist.to_lowercase(),
                    track.album.to_lowercase(),
                    track.title.to_lowercase(),
                    track.duration_sec as i64,
                    DURATION_TOLERANCE_SEC,
                ],
                Self::row_to_track,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Pick the higher-quality of two colliding tracks and fill its gaps with
    /// the loser's fields. Rating and single fields travel with the winner;
    /// they are only inherited from the loser when the winner has none.
    fn merge_tracks(winner: &Track, loser: &Track) -> Track {
        let mut merged = winner.clone();
        merged.library_id = merged.library_id.or_else(|| loser.library_id.clone());
        merged.isrc = merged.isrc.or_else(|| loser.isrc.clone());
        merged.file_path = merged.file_path.or_else(|| loser.file_path.clone());
        merged.spotify_id = merged.spotify_id.or_else(|| loser.spotify_id.clone());
        merged.lastfm_mbid = merged.lastfm_mbid.or_else(|| loser.lastfm_mbid.clone());
        merged.musicbrainz_mbid = merged
            .musicbrainz_mbid
            .or_else(|| loser.musicbrainz_mbid.clone());
        merged.discogs_release_id = merged
            .discogs_release_id
            .or_else(|| loser.discogs_release_id.clone());
        if merged.popularity_score <= 0.0 && loser.popularity_score > 0.0 {
            merged.popularity_score = loser.popularity_score;
            merged.album_z = loser.album_z;
            merged.artist_z = loser.artist_z;
        }
        if merged.stars == 0 && loser.stars > 0 {
            merged.stars = loser.stars;
        }
        if !merged.is_single && loser.is_single {
            merged.is_single = loser.is_single;
            merged.single_confidence = loser.single_confidence;
            merged.single_sources = loser.single_sources.clone();
        }
        // last_popularity_lookup only ever advances
        merged.last_popularity_lookup = match (merged.last_popularity_lookup, loser.last_popularity_lookup)
        {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        merged
    }

    fn pick_winner<'a>(a: &'a Track, b: &'a Track) -> (&'a Track, &'a Track) {
        let (qa, qb) = (a.metadata_quality_score(), b.metadata_quality_score());
        if qa > qb {
            (a, b)
        } else if qb > qa {
            (b, a)
        } else if b.last_scanned > a.last_scanned {
            (b, a)
        } else {
            (a, b)
        }
    }

    fn write_merged(conn: &Connection, row_id: i64, merged: &Track) -> Result<()> {
        let now = Self::format_datetime(&Utc::now());
        conn.execute(
            "UPDATE tracks SET
                library_id = ?1, isrc = ?2, file_path = ?3,
                spotify_id = ?4, lastfm_mbid = ?5, musicbrainz_mbid = ?6,
                discogs_release_id = ?7,
                popularity_score = ?8, stars = ?9, is_single = ?10,
                single_confidence = ?11, single_sources = ?12,
                album_z = ?13, artist_z = ?14,
                last_popularity_lookup = ?15, last_scanned = ?16
             WHERE id = ?17",
            params![
                merged.library_id,
                merged.isrc,
                merged.file_path,
                merged.spotify_id,
                merged.lastfm_mbid,
                merged.musicbrainz_mbid,
                merged.discogs_release_id,
                merged.popularity_score,
                merged.stars as i64,
                merged.is_single as i64,
                merged.single_confidence.as_str(),
                serde_json::to_string(&merged.single_sources)?,
                merged.album_z,
                merged.artist_z,
                merged
                    .last_popularity_lookup
                    .as_ref()
                    .map(Self::format_datetime),
                now,
            row_id,
            ],
        )?;
        Ok(())
    }
}

impl Store for SqliteStore {
    fn upsert_artist(&self, name: &str, genres: &[String]) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let name_lc = name.to_lowercase();

        let existing: Option<(i64, Option<String>)> = conn
            .query_row(
                "SELECT id, genres FROM artists WHERE name_lc = ?1",
                params![name_lc],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match existing {
            Some((id, existing_genres)) => {
                // Union incoming genres into the stored list
                let mut merged = Self::genres_from_json(existing_genres);
                for genre in genres {
                    if !merged.iter().any(|g| g.eq_ignore_ascii_case(genre)) {
                        merged.push(genre.clone());
                    }
                }
                conn.execute(
                    "UPDATE artists SET name = ?1, genres = ?2 WHERE id = ?3",
                    params![name, Self::genres_to_json(&merged), id],
                )?;
                Ok(id)
            }
            None => {
                conn.execute(
                    "INSERT INTO artists (name, name_lc, genres) VALUES (?1, ?2, ?3)",
                    params![name, name_lc, Self::genres_to_json(genres)],
                )?;
                Ok(conn.last_insert_rowid())
            }
        }
    }

    fn get_artist(&self, name: &str) -> Result<Option<Artist>> {
        let conn = self.conn.lock().unwrap();
        let artist = conn
            .query_row(
                "SELECT * FROM artists WHERE name_lc = ?1",
                params![name.to_lowercase()],
                Self::row_to_artist,
            )
            .optional()?;
        Ok(artist)
    }

    fn list_artist_names(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT name FROM artists ORDER BY name_lc")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn set_artist_external_ids(&self, name: &str, ids: &ArtistExternalIds) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE artists SET
                spotify_id = COALESCE(?1, spotify_id),
                lastfm_mbid = COALESCE(?2, lastfm_mbid),
                musicbrainz_mbid = COALESCE(?3, musicbrainz_mbid),
                discogs_id = COALESCE(?4, discogs_id)
             WHERE name_lc = ?5",
            params![
                ids.spotify_id,
                ids.lastfm_mbid,
                ids.musicbrainz_mbid,
                ids.discogs_id,
                name.to_lowercase()
            ],
        )?;
        Ok(())
    }

    fn update_artist_stats(&self, name: &str, stats: &ArtistStats) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE artists SET
                pop_mean = ?1, pop_median = ?2, pop_stddev = ?3,
                stats_track_count = ?4, stats_updated_at = ?5
             WHERE name_lc = ?6",
            params![
                stats.mean,
                stats.median,
                stats.stddev,
                stats.track_count as i64,
                Self::format_datetime(&Utc::now()),
                name.to_lowercase()
            ],
        )?;
        Ok(())
    }

    fn upsert_album(&self, album: &Album) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let artist_lc = album.artist.to_lowercase();
        let title_lc = album.title.to_lowercase();

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM albums WHERE artist_lc = ?1 AND title_lc = ?2",
                params![artist_lc, title_lc],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE albums SET
                        release_year = COALESCE(?1, release_year),
                        release_date = COALESCE(?2, release_date),
                        album_type = COALESCE(?3, album_type),
                        track_count = COALESCE(?4, track_count),
                        disc_count = COALESCE(?5, disc_count),
                        cover_art_url = COALESCE(?6, cover_art_url),
                        genres = COALESCE(?7, genres),
                        musicbrainz_release_id = COALESCE(?8, musicbrainz_release_id),
                        discogs_release_id = COALESCE(?9, discogs_release_id)
                     WHERE id = ?10",
                    params![
                        album.release_year,
                        album.release_date,
                        album.album_type.map(|t| t.as_str()),
                        album.track_count.map(|c| c as i64),
                        album.disc_count.map(|c| c as i64),
                        album.cover_art_url,
                        Self::genres_to_json(&album.genres),
                        album.musicbrainz_release_id,
                        album.discogs_release_id,
                        id,
                    ],
                )?;
                Ok(id)
            }
            None => {
                conn.execute(
                    "INSERT INTO albums (
                        artist, artist_lc, title, title_lc, release_year, release_date,
                        album_type, track_count, disc_count, cover_art_url, genres,
                        musicbrainz_release_id, discogs_release_id
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    params![
                        album.artist,
                        artist_lc,
                        album.title,
                        title_lc,
                        album.release_year,
                        album.release_date,
                        album.album_type.map(|t| t.as_str()),
                        album.track_count.map(|c| c as i64),
                        album.disc_count.map(|c| c as i64),
                        album.cover_art_url,
                        Self::genres_to_json(&album.genres),
                        album.musicbrainz_release_id,
                        album.discogs_release_id,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            }
        }
    }

    fn list_albums(&self, artist: &str) -> Result<Vec<Album>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM albums WHERE artist_lc = ?1 ORDER BY title_lc")?;
        let albums = stmt
            .query_map(params![artist.to_lowercase()], Self::row_to_album)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(albums)
    }

    fn upsert_track(&self, track: &Track) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let colliding = Self::find_colliding_tracks(&conn, track)?;

        let Some(existing) = colliding.into_iter().next() else {
            return Self::insert_track(&conn, track);
        };

        let row_id = existing.id;
        let (winner, loser) = Self::pick_winner(&existing, track);
        let merged = Self::merge_tracks(winner, loser);
        debug!(
            "Merging duplicate track '{}' / '{}' into row {}",
            track.artist, track.title, row_id
        );
        Self::write_merged(&conn, row_id, &merged)?;
        Ok(row_id)
    }

    fn get_album_tracks(&self, artist: &str, album: &str) -> Result<Vec<Track>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM tracks WHERE artist_lc = ?1 AND album_lc = ?2 ORDER BY title_lc",
        )?;
        let tracks = stmt
            .query_map(
                params![artist.to_lowercase(), album.to_lowercase()],
                Self::row_to_track,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tracks)
    }

    fn get_artist_tracks(&self, artist: &str) -> Result<Vec<Track>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM tracks WHERE artist_lc = ?1 ORDER BY album_lc, title_lc")?;
        let tracks = stmt
            .query_map(params![artist.to_lowercase()], Self::row_to_track)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tracks)
    }

    fn batch_update_popularity(&self, rows: &[PopularityUpdate]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE tracks SET
                    popularity_score = ?1,
                    album_z = ?2,
                    artist_z = ?3,
                    last_popularity_lookup = CASE
                        WHEN ?4 IS NULL THEN last_popularity_lookup
                        WHEN last_popularity_lookup IS NULL OR ?4 > last_popularity_lookup THEN ?4
                        ELSE last_popularity_lookup
                    END
                 WHERE id = ?5",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.popularity_score.clamp(0.0, 100.0),
                    row.album_z,
                    row.artist_z,
                    row.looked_up_at.as_ref().map(Self::format_datetime),
                    row.track_id,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn batch_update_singles(&self, rows: &[SinglesUpdate]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE tracks SET
                    is_single = ?1, single_confidence = ?2, single_sources = ?3, stars = ?4
                 WHERE id = ?5",
            )?;
            for row in rows {
                // confidence == none implies not a single
                let is_single = row.is_single && row.confidence != Confidence::None;
                stmt.execute(params![
                    is_single as i64,
                    row.confidence.as_str(),
                    serde_json::to_string(&row.sources)?,
                    row.stars.min(5) as i64,
                    row.track_id,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn batch_update_alternates(&self, rows: &[AlternateUpdate]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE tracks SET alternate_take = ?1, base_track_id = ?2 WHERE id = ?3",
            )?;
            for row in rows {
                let base = if row.alternate_take {
                    row.base_track_id
                } else {
                    None
                };
                stmt.execute(params![row.alternate_take as i64, base, row.track_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn record_scan(
        &self,
        artist: &str,
        album: &str,
        scan_type: ScanType,
        tracks_processed: u32,
        status: ScanStatus,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        // An album keeps at most one completed entry per scan type per day;
        // a forced rescan replaces today's row instead of stacking a second
        if status == ScanStatus::Completed {
            let day_prefix = format!("{}%", now.format("%Y-%m-%d"));
            conn.execute(
                "DELETE FROM scan_history
                 WHERE artist = ?1 AND album = ?2 AND scan_type = ?3
                   AND status = 'completed' AND timestamp LIKE ?4",
                params![artist, album, scan_type.as_str(), day_prefix],
            )?;
        }

        conn.execute(
            "INSERT INTO scan_history (artist, album, scan_type, timestamp, tracks_processed, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                artist,
                album,
                scan_type.as_str(),
                Self::format_datetime(&now),
                tracks_processed as i64,
                status.as_str(),
            ],
        )?;
        Ok(())
    }

    fn recent_scans(&self, limit: usize) -> Result<Vec<ScanHistoryEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM scan_history ORDER BY timestamp DESC LIMIT ?1")?;
        let entries = stmt
            .query_map(params![limit as i64], Self::row_to_scan_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn was_album_scanned(
        &self,
        artist: &str,
        album: &str,
        scan_type: ScanType,
        within_days: i64,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let cutoff = Self::format_datetime(&(Utc::now() - Duration::days(within_days)));
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM scan_history
                 WHERE artist = ?1 AND album = ?2 AND scan_type = ?3
                   AND status = 'completed' AND timestamp >= ?4
                 LIMIT 1",
                params![artist, album, scan_type.as_str(), cutoff],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn dedup_tracks(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM tracks ORDER BY artist_lc, album_lc, title_lc, duration_sec")?;
        let all: Vec<Track> = stmt
            .query_map([], Self::row_to_track)?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        let mut removed = 0usize;
        let mut i = 0usize;
        while i < all.len() {
            let mut group = vec![all[i].clone()];
            let mut j = i + 1;
            while j < all.len() {
                let a = &all[i];
                let b = &all[j];
                let same_key = a.artist.to_lowercase() == b.artist.to_lowercase()
                    && a.album.to_lowercase() == b.album.to_lowercase()
                    && a.title.to_lowercase() == b.title.to_lowercase()
                    && (a.duration_sec as i64 - b.duration_sec as i64).abs()
                        <= DURATION_TOLERANCE_SEC;
                if !same_key {
                    break;
                }
                group.push(b.clone());
                j += 1;
            }

            if group.len() > 1 {
                let mut winner = group[0].clone();
                for other in &group[1..] {
                    let (w, l) = Self::pick_winner(&winner, other);
                    // merge_tracks keeps the winner's id, so the surviving
                    // row is always the winner's
                    winner = Self::merge_tracks(w, l);
                }
                Self::write_merged(&conn, winner.id, &winner)?;
                for track in &group {
                    if track.id != winner.id {
                        conn.execute("DELETE FROM tracks WHERE id = ?1", params![track.id])?;
                        removed += 1;
                    }
                }
            }
            i = j;
        }

        if removed > 0 {
            info!("Deduplicated {} track rows", removed);
        }
        Ok(removed)
    }

    fn love_track(&self, user: &str, track_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO loved_tracks (user, track_id, loved_at) VALUES (?1, ?2, ?3)",
            params![user, track_id, Self::format_datetime(&Utc::now())],
        )?;
        Ok(())
    }

    fn is_track_loved(&self, user: &str, track_id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM loved_tracks WHERE user = ?1 AND track_id = ?2",
                params![user, track_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}
