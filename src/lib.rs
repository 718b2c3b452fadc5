//! trackstar
//!
//! Enriches a personal music library (behind a Subsonic-compatible server)
//! with popularity-derived star ratings and single-status classifications.
//! Signals are fused from Spotify, Last.fm, MusicBrainz, and Discogs under
//! strict rate limits; results land in an embedded SQLite catalog and are
//! pushed back to the library server.

pub mod clients;
pub mod config;
pub mod library;
pub mod logging;
pub mod playlist;
pub mod rate_limiter;
pub mod scan;
pub mod sqlite_persistence;
pub mod store;
pub mod titles;

pub use config::AppConfig;
pub use rate_limiter::{RateLimitedApi, RateLimiter, RateLimiterConfig};
pub use scan::{ApiClients, ScanFilter, ScanPipeline, ScanSettings};
pub use store::{SqliteStore, Store};
