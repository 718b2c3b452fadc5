//! The popularity score formula.
//!
//! `score = w_spotify · P + w_lastfm · L + w_age · A`, all components on a
//! 0..=100 scale. Missing components drop out and the remaining weights are
//! renormalized, so a track with scrobbles but no Spotify match still lands
//! in a comparable range.

use chrono::{Datelike, Utc};
use serde::Deserialize;

/// Component weights. Renormalized to sum to 1 on config load.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ScoreWeights {
    pub spotify: f64,
    pub lastfm: f64,
    pub age: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            spotify: 0.3,
            lastfm: 0.5,
            age: 0.2,
        }
    }
}

impl ScoreWeights {
    /// Scale the weights so they sum to 1. Zero/negative sums fall back to
    /// the defaults.
    pub fn normalized(self) -> Self {
        let sum = self.spotify + self.lastfm + self.age;
        if sum <= 0.0 {
            return Self::default();
        }
        Self {
            spotify: self.spotify / sum,
            lastfm: self.lastfm / sum,
            age: self.age / sum,
        }
    }
}

/// Age-decay variants for the release-date component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AgeDecay {
    /// `100 · 0.5^(age/half_life)`, the default. Half-life in years.
    Exponential { half_life_years: f64 },
    /// Linear ramp from 100 at age 0 down to 0 at `zero_at_years`.
    Linear { zero_at_years: f64 },
}

impl Default for AgeDecay {
    fn default() -> Self {
        AgeDecay::Exponential {
            half_life_years: 5.0,
        }
    }
}

/// Scrobble component: `clamp(12.5 · log10(max(playcount, 1)), 0, 100)`.
pub fn scrobble_component(playcount: u64) -> f64 {
    let count = playcount.max(1) as f64;
    (12.5 * count.log10()).clamp(0.0, 100.0)
}

/// Age component at a given reference year.
pub fn age_component_at(release_year: i32, now_year: i32, decay: AgeDecay) -> f64 {
    let age_years = (now_year - release_year).max(0) as f64;
    match decay {
        AgeDecay::Exponential { half_life_years } => {
            if half_life_years <= 0.0 {
                return 0.0;
            }
            100.0 * 0.5_f64.powf(age_years / half_life_years)
        }
        AgeDecay::Linear { zero_at_years } => {
            if zero_at_years <= 0.0 {
                return 0.0;
            }
            (100.0 * (1.0 - age_years / zero_at_years)).clamp(0.0, 100.0)
        }
    }
}

pub fn age_component(release_year: i32, decay: AgeDecay) -> f64 {
    age_component_at(release_year, Utc::now().year(), decay)
}

/// Combine the available components into the final 0..=100 score.
///
/// A `None` component is treated as unavailable (not as zero): its weight is
/// removed and the rest renormalized. With no components at all the score
/// is 0.
pub fn popularity_score(
    spotify_popularity: Option<f64>,
    playcount: Option<u64>,
    release_year: Option<i32>,
    weights: ScoreWeights,
    decay: AgeDecay,
) -> f64 {
    let weights = weights.normalized();
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;

    if let Some(pop) = spotify_popularity {
        weighted_sum += weights.spotify * pop.clamp(0.0, 100.0);
        weight_total += weights.spotify;
    }
    if let Some(count) = playcount {
        weighted_sum += weights.lastfm * scrobble_component(count);
        weight_total += weights.lastfm;
    }
    if let Some(year) = release_year {
        weighted_sum += weights.age * age_component(year, decay);
        weight_total += weights.age;
    }

    if weight_total <= 0.0 {
        return 0.0;
    }
    (weighted_sum / weight_total).clamp(0.0, 100.0)
}
