//! SQLite schema for the catalog database.
//!
//! Version 1: artists, albums, tracks, scan history.
//! Version 2: loved-content guard tables (never written by scans).

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

const ARTISTS_TABLE_V1: Table = Table {
    name: "artists",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true), // AUTOINCREMENT
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("name_lc", &SqlType::Text, non_null = true),
        sqlite_column!("genres", &SqlType::Text), // JSON array
        sqlite_column!("spotify_id", &SqlType::Text),
        sqlite_column!("lastfm_mbid", &SqlType::Text),
        sqlite_column!("musicbrainz_mbid", &SqlType::Text),
        sqlite_column!("discogs_id", &SqlType::Text),
        sqlite_column!("pop_mean", &SqlType::Real),
        sqlite_column!("pop_median", &SqlType::Real),
        sqlite_column!("pop_stddev", &SqlType::Real),
        sqlite_column!("stats_track_count", &SqlType::Integer),
        sqlite_column!("stats_updated_at", &SqlType::Text),
    ],
    indices: &[("idx_artists_name_lc", "name_lc")],
    unique_constraints: &[&["name_lc"]],
};

const ALBUMS_TABLE_V1: Table = Table {
    name: "albums",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true), // AUTOINCREMENT
        sqlite_column!("artist", &SqlType::Text, non_null = true),
        sqlite_column!("artist_lc", &SqlType::Text, non_null = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("title_lc", &SqlType::Text, non_null = true),
        sqlite_column!("release_year", &SqlType::Integer),
        sqlite_column!("release_date", &SqlType::Text),
        sqlite_column!("album_type", &SqlType::Text),
        sqlite_column!("track_count", &SqlType::Integer),
        sqlite_column!("disc_count", &SqlType::Integer),
        sqlite_column!("cover_art_url", &SqlType::Text),
        sqlite_column!("genres", &SqlType::Text), // JSON array
        sqlite_column!("musicbrainz_release_id", &SqlType::Text),
        sqlite_column!("discogs_release_id", &SqlType::Text),
        sqlite_column!("last_scanned", &SqlType::Text),
    ],
    indices: &[("idx_albums_artist_lc", "artist_lc")],
    unique_constraints: &[&["artist_lc", "title_lc"]],
};

const TRACKS_TABLE_V1: Table = Table {
    name: "tracks",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true), // AUTOINCREMENT
        sqlite_column!("library_id", &SqlType::Text),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("artist", &SqlType::Text, non_null = true),
        sqlite_column!("album", &SqlType::Text, non_null = true),
        sqlite_column!("title_lc", &SqlType::Text, non_null = true),
        sqlite_column!("artist_lc", &SqlType::Text, non_null = true),
        sqlite_column!("album_lc", &SqlType::Text, non_null = true),
        sqlite_column!("duration_sec", &SqlType::Integer, non_null = true),
        sqlite_column!("isrc", &SqlType::Text),
        sqlite_column!("file_path", &SqlType::Text),
        sqlite_column!("spotify_id", &SqlType::Text),
        sqlite_column!("lastfm_mbid", &SqlType::Text),
        sqlite_column!("musicbrainz_mbid", &SqlType::Text),
        sqlite_column!("discogs_release_id", &SqlType::Text),
        sqlite_column!(
            "popularity_score",
            &SqlType::Real,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "stars",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "is_single",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "single_confidence",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'none'")
        ),
        sqlite_column!("single_sources", &SqlType::Text), // JSON array
        sqlite_column!("album_z", &SqlType::Real),
        sqlite_column!("artist_z", &SqlType::Real),
        sqlite_column!(
            "alternate_take",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("base_track_id", &SqlType::Integer),
        sqlite_column!("last_popularity_lookup", &SqlType::Text),
        sqlite_column!("last_scanned", &SqlType::Text),
    ],
    indices: &[
        ("idx_tracks_artist_lc", "artist_lc"),
        ("idx_tracks_album", "artist_lc, album_lc"),
        ("idx_tracks_library_id", "library_id"),
    ],
    unique_constraints: &[&["artist_lc", "album_lc", "title_lc", "duration_sec"]],
};

const SCAN_HISTORY_TABLE_V1: Table = Table {
    name: "scan_history",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true), // AUTOINCREMENT
        sqlite_column!("artist", &SqlType::Text, non_null = true),
        sqlite_column!("album", &SqlType::Text, non_null = true),
        sqlite_column!("scan_type", &SqlType::Text, non_null = true),
        sqlite_column!("timestamp", &SqlType::Text, non_null = true),
        sqlite_column!(
            "tracks_processed",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("status", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_scan_history_album", "artist, album, scan_type"),
        ("idx_scan_history_timestamp", "timestamp DESC"),
    ],
    unique_constraints: &[],
};

const LOVED_TRACKS_TABLE_V2: Table = Table {
    name: "loved_tracks",
    columns: &[
        sqlite_column!("user", &SqlType::Text, non_null = true),
        sqlite_column!("track_id", &SqlType::Integer, non_null = true),
        sqlite_column!("loved_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_loved_tracks_user", "user")],
    unique_constraints: &[&["user", "track_id"]],
};

const LOVED_ALBUMS_TABLE_V2: Table = Table {
    name: "loved_albums",
    columns: &[
        sqlite_column!("user", &SqlType::Text, non_null = true),
        sqlite_column!("artist_lc", &SqlType::Text, non_null = true),
        sqlite_column!("album_lc", &SqlType::Text, non_null = true),
        sqlite_column!("loved_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_loved_albums_user", "user")],
    unique_constraints: &[&["user", "artist_lc", "album_lc"]],
};

const LOVED_ARTISTS_TABLE_V2: Table = Table {
    name: "loved_artists",
    columns: &[
        sqlite_column!("user", &SqlType::Text, non_null = true),
        sqlite_column!("artist_lc", &SqlType::Text, non_null = true),
        sqlite_column!("loved_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_loved_artists_user", "user")],
    unique_constraints: &[&["user", "artist_lc"]],
};

fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "CREATE TABLE loved_tracks (
            user TEXT NOT NULL,
            track_id INTEGER NOT NULL,
            loved_at TEXT NOT NULL,
            UNIQUE (user, track_id)
        );
        CREATE INDEX idx_loved_tracks_user ON loved_tracks(user);
        CREATE TABLE loved_albums (
            user TEXT NOT NULL,
            artist_lc TEXT NOT NULL,
            album_lc TEXT NOT NULL,
            loved_at TEXT NOT NULL,
            UNIQUE (user, artist_lc, album_lc)
        );
        CREATE INDEX idx_loved_albums_user ON loved_albums(user);
        CREATE TABLE loved_artists (
            user TEXT NOT NULL,
            artist_lc TEXT NOT NULL,
            loved_at TEXT NOT NULL,
            UNIQUE (user, artist_lc)
        );
        CREATE INDEX idx_loved_artists_user ON loved_artists(user);",
    )?;
    Ok(())
}

/// All versioned schemas for the catalog database.
pub const CATALOG_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[
            ARTISTS_TABLE_V1,
            ALBUMS_TABLE_V1,
            TRACKS_TABLE_V1,
            SCAN_HISTORY_TABLE_V1,
        ],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            ARTISTS_TABLE_V1,
            ALBUMS_TABLE_V1,
            TRACKS_TABLE_V1,
            SCAN_HISTORY_TABLE_V1,
            LOVED_TRACKS_TABLE_V2,
            LOVED_ALBUMS_TABLE_V2,
            LOVED_ARTISTS_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_v1_schema_creates_and_validates() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = &CATALOG_VERSIONED_SCHEMAS[0];
        schema.create(&conn).unwrap();
        schema.validate(&conn).unwrap();
    }

    #[test]
    fn test_v2_schema_creates_and_validates() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = &CATALOG_VERSIONED_SCHEMAS[1];
        schema.create(&conn).unwrap();
        schema.validate(&conn).unwrap();
    }

    #[test]
    fn test_migration_v1_to_v2() {
        let conn = Connection::open_in_memory().unwrap();
        CATALOG_VERSIONED_SCHEMAS[0].create(&conn).unwrap();

        if let Some(migrate_fn) = CATALOG_VERSIONED_SCHEMAS[1].migration {
            migrate_fn(&conn).unwrap();
        }

        for table in ["loved_tracks", "loved_albums", "loved_artists"] {
            let exists: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "missing table {}", table);
        }

        CATALOG_VERSIONED_SCHEMAS[1].validate(&conn).unwrap();
    }

    #[test]
    fn test_content_key_unique_constraint_enforced() {
        let conn = Connection::open_in_memory().unwrap();
        CATALOG_VERSIONED_SCHEMAS[1].create(&conn).unwrap();

        conn.execute(
            "INSERT INTO tracks (title, artist, album, title_lc, artist_lc, album_lc, duration_sec)
             VALUES ('Song', 'Artist', 'Album', 'song', 'artist', 'album', 200)",
            [],
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO tracks (title, artist, album, title_lc, artist_lc, album_lc, duration_sec)
             VALUES ('SONG', 'Artist', 'Album', 'song', 'artist', 'album', 200)",
            [],
        );
        assert!(dup.is_err());
    }
}
