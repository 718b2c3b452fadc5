//! YAML configuration file parsing.
//!
//! Every field is optional; resolution against CLI arguments and
//! environment overrides happens in [`super::AppConfig::resolve`]. Unknown
//! keys are collected and reported as warnings instead of failing the load.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub library: Option<LibraryFileConfig>,
    pub api: Option<ApiFileConfig>,
    pub weights: Option<WeightsFileConfig>,
    pub features: Option<FeaturesFileConfig>,
    pub age_decay: Option<AgeDecayFileConfig>,
    pub api_call_timeout_seconds: Option<u64>,
    pub db_path: Option<String>,
    pub log_path: Option<String>,
    pub playlist_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LibraryFileConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiFileConfig {
    pub spotify: Option<SpotifyFileConfig>,
    pub lastfm: Option<LastFmFileConfig>,
    pub musicbrainz: Option<MusicBrainzFileConfig>,
    pub discogs: Option<DiscogsFileConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpotifyFileConfig {
    pub enabled: Option<bool>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LastFmFileConfig {
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MusicBrainzFileConfig {
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscogsFileConfig {
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WeightsFileConfig {
    pub spotify: Option<f64>,
    pub lastfm: Option<f64>,
    pub age: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeaturesFileConfig {
    pub force: Option<bool>,
    pub perpetual: Option<bool>,
    pub verbose: Option<bool>,
    pub batchrate: Option<bool>,
    pub album_skip_days: Option<i64>,
    pub perpetual_interval_hours: Option<u64>,
    pub video_only_single: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgeDecayFileConfig {
    /// `exponential` (default) or `linear`.
    pub mode: Option<String>,
    pub half_life_years: Option<f64>,
    pub zero_at_years: Option<f64>,
}

/// Keys recognized at each level, used for unknown-key warnings.
const TOP_LEVEL_KEYS: &[&str] = &[
    "library",
    "api",
    "weights",
    "features",
    "age_decay",
    "api_call_timeout_seconds",
    "db_path",
    "log_path",
    "playlist_dir",
];

const SECTION_KEYS: &[(&str, &[&str])] = &[
    ("library", &["base_url", "token"]),
    ("api", &["spotify", "lastfm", "musicbrainz", "discogs"]),
    ("weights", &["spotify", "lastfm", "age"]),
    (
        "features",
        &[
            "force",
            "perpetual",
            "verbose",
            "batchrate",
            "album_skip_days",
            "perpetual_interval_hours",
            "video_only_single",
        ],
    ),
    ("age_decay", &["mode", "half_life_years", "zero_at_years"]),
];

fn collect_unknown_keys(value: &serde_yaml::Value) -> Vec<String> {
    let mut unknown = Vec::new();
    let Some(root) = value.as_mapping() else {
        return unknown;
    };

    let top: BTreeSet<&str> = TOP_LEVEL_KEYS.iter().copied().collect();
    for (key, child) in root {
        let Some(key_str) = key.as_str() else {
            continue;
        };
        if !top.contains(key_str) {
            unknown.push(key_str.to_string());
            continue;
        }
        if let Some((_, section_keys)) = SECTION_KEYS.iter().find(|(name, _)| *name == key_str) {
            if let Some(section) = child.as_mapping() {
                for section_key in section.keys() {
                    if let Some(section_key_str) = section_key.as_str() {
                        if !section_keys.contains(&section_key_str) {
                            unknown.push(format!("{}.{}", key_str, section_key_str));
                        }
                    }
                }
            }
        }
    }
    unknown
}

impl FileConfig {
    /// Parse a YAML config file. Returns the config and any unrecognized
    /// keys (to be logged as warnings once logging is up).
    pub fn load(path: &Path) -> Result<(FileConfig, Vec<String>)> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<(FileConfig, Vec<String>)> {
        let value: serde_yaml::Value =
            serde_yaml::from_str(raw).context("Config file is not valid YAML")?;
        let unknown = collect_unknown_keys(&value);
        let config: FileConfig =
            serde_yaml::from_value(value).context("Config file has invalid structure")?;
        Ok((config, unknown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_CONFIG: &str = r#"
library:
  base_url: "http://navidrome.local:4533"
  token: "secret"
api:
  spotify:
    enabled: true
    client_id: "id"
    client_secret: "cs"
  lastfm:
    api_key: "lk"
  musicbrainz:
    user_agent: "trackstar/0.4 (admin@example.org)"
  discogs:
    token: "dt"
weights:
  spotify: 0.3
  lastfm: 0.5
  age: 0.2
features:
  force: false
  perpetual: true
  album_skip_days: 14
api_call_timeout_seconds: 20
"#;

    #[test]
    fn test_parse_full_config() {
        let (config, unknown) = FileConfig::parse(FULL_CONFIG).unwrap();
        assert!(unknown.is_empty());
        assert_eq!(
            config.library.unwrap().base_url.as_deref(),
            Some("http://navidrome.local:4533")
        );
        let api = config.api.unwrap();
        assert_eq!(api.spotify.unwrap().client_id.as_deref(), Some("id"));
        assert_eq!(api.lastfm.unwrap().api_key.as_deref(), Some("lk"));
        assert_eq!(config.weights.unwrap().lastfm, Some(0.5));
        assert_eq!(config.features.unwrap().album_skip_days, Some(14));
        assert_eq!(config.api_call_timeout_seconds, Some(20));
    }

    #[test]
    fn test_unknown_keys_are_collected_not_fatal() {
        let raw = r#"
library:
  base_url: "http://x"
  tokken: "typo"
mystery_section:
  value: 1
"#;
        let (config, unknown) = FileConfig::parse(raw).unwrap();
        assert!(config.library.unwrap().base_url.is_some());
        assert!(unknown.contains(&"library.tokken".to_string()));
        assert!(unknown.contains(&"mystery_section".to_string()));
    }

    #[test]
    fn test_empty_config_is_valid() {
        let (config, unknown) = FileConfig::parse("{}").unwrap();
        assert!(unknown.is_empty());
        assert!(config.library.is_none());
    }

    #[test]
    fn test_invalid_yaml_fails() {
        assert!(FileConfig::parse("library: [unclosed").is_err());
    }
}
