//! Star rating.
//!
//! Every track starts from a baseline band rating (quartiles of the album's
//! non-excluded tracks by popularity); detection promotes it. Excluded
//! tracks never receive promotions so bonus/live material cannot inherit
//! inflated z-scores.

use super::detector::Detection;
use crate::store::Confidence;

/// Band rating for a rank within the counted tracks: top quartile 4★ down
/// to the lowest quartile 1★.
pub fn band_rating(rank: usize, counted: usize) -> u8 {
    if counted == 0 {
        return 1;
    }
    let band = (rank.min(counted - 1) * 4) / counted; // 0..=3
    (4 - band) as u8
}

/// Baseline band for a popularity value against the album's counted
/// popularity list (descending). Zero popularity is always 1★.
pub fn band_for_popularity(popularity: f64, counted_desc: &[f64]) -> u8 {
    if popularity <= 0.0 {
        return 1;
    }
    if counted_desc.is_empty() {
        return 1;
    }
    let rank = counted_desc.iter().filter(|&&p| p > popularity).count();
    band_rating(rank, counted_desc.len())
}

#[derive(Debug, Clone)]
pub struct RatingInput<'a> {
    pub detection: &'a Detection,
    /// Baseline band rating, 1..=4.
    pub band: u8,
    /// Excluded tracks (trailing-parenthesis tail, alternate takes) keep
    /// their baseline.
    pub excluded: bool,
    pub album_underperforming: bool,
    /// Artist-relative z-score; `None` while artist stats are unreliable.
    pub artist_z: Option<f64>,
}

/// Combine baseline and detection into the final 0..=5 star rating.
pub fn rate(input: &RatingInput) -> u8 {
    let band = input.band.clamp(1, 4);

    if input.excluded {
        return band;
    }

    let mut stars = match input.detection.confidence {
        Confidence::High => 5,
        Confidence::Medium if input.detection.sources.len() >= 2 => 5,
        Confidence::Medium => (band + 1).min(4),
        Confidence::None => band,
    };

    // Underperforming-album rule: a 5★ on a weak album only survives with
    // an artist-level standout or corroborating sources.
    if stars == 5
        && input.album_underperforming
        && input.artist_z.is_some_and(|z| z < 0.0)
        && input.detection.sources.len() < 2
    {
        stars = 4;
    }

    stars
}
