//! Album and artist popularity statistics.
//!
//! Implements the preprocessing steps that decide which tracks count toward
//! statistics (trailing-parenthesis exclusion, alternate-take detection) and
//! the z-score math the single detector builds on.

use crate::store::{ArtistStats, Track};
use crate::titles;

/// Ratio of the artist median below which an album is underperforming.
const UNDERPERFORMING_RATIO: f64 = 0.6;

/// Minimum album size before trailing-parenthesis tracks are excluded.
const MIN_ALBUM_SIZE_FOR_EXCLUSION: usize = 3;

/// Minimum run of consecutive trailing-parenthesis tracks to exclude.
const MIN_TRAILING_RUN: usize = 2;

/// Aggregate statistics over an album's counted tracks.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AlbumStats {
    pub mean: f64,
    pub median: f64,
    pub stddev: f64,
    /// Mean z-score of the top half of counted tracks.
    pub mean_top50_z: f64,
    /// Number of tracks that entered the statistics.
    pub counted: usize,
}

impl AlbumStats {
    pub fn album_z(&self, popularity: f64) -> f64 {
        if self.stddev == 0.0 {
            0.0
        } else {
            (popularity - self.mean) / self.stddev
        }
    }
}

/// Per-album preprocessing result, indexed like the input track slice.
#[derive(Debug, Clone)]
pub struct AlbumAnalysis {
    /// Track indices ordered by popularity descending.
    pub by_popularity: Vec<usize>,
    /// Tracks excluded from statistics (bonus/live tail, alternate takes).
    pub excluded: Vec<bool>,
    /// For alternate takes, the index of the base track within the slice.
    pub alternate_of: Vec<Option<usize>>,
    pub stats: Option<AlbumStats>,
}

impl AlbumAnalysis {
    pub fn is_excluded(&self, index: usize) -> bool {
        self.excluded.get(index).copied().unwrap_or(false)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn stddev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    match sorted.len() {
        0 => 0.0,
        n if n % 2 == 1 => sorted[n / 2],
        n => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    median_of_sorted(&sorted)
}

/// Mean of the top `⌈n/2⌉` z-scores, selected without a full sort.
fn mean_top_half(z_scores: &[f64]) -> f64 {
    if z_scores.is_empty() {
        return 0.0;
    }
    let take = z_scores.len().div_ceil(2);
    let mut work = z_scores.to_vec();
    if take < work.len() {
        // Partition so the `take` largest values sit in front
        work.select_nth_unstable_by(take - 1, |a, b| {
            b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal)
        });
    }
    mean(&work[..take])
}

/// Run the full album preprocessing over `tracks`.
pub fn analyze_album(tracks: &[Track]) -> AlbumAnalysis {
    let mut by_popularity: Vec<usize> = (0..tracks.len()).collect();
    by_popularity.sort_by(|&a, &b| {
        tracks[b]
            .popularity_score
            .partial_cmp(&tracks[a].popularity_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut excluded = vec![false; tracks.len()];
    let mut alternate_of: Vec<Option<usize>> = vec![None; tracks.len()];

    // Trailing-parenthesis filter: walking up from the low-popularity tail,
    // a run of >= 2 consecutive suffixed titles is excluded (albums of < 3
    // tracks keep everything).
    if tracks.len() >= MIN_ALBUM_SIZE_FOR_EXCLUSION {
        let mut run = 0usize;
        for &index in by_popularity.iter().rev() {
            if titles::has_trailing_parenthetical(&tracks[index].title) {
                run += 1;
            } else {
                break;
            }
        }
        if run >= MIN_TRAILING_RUN {
            for &index in by_popularity.iter().rev().take(run) {
                excluded[index] = true;
            }
        }
    }

    // Alternate takes: a suffixed title whose base matches another track on
    // the album is linked to it and excluded from statistics.
    for i in 0..tracks.len() {
        if !titles::has_trailing_parenthetical(&tracks[i].title) {
            continue;
        }
        let base = titles::base_title(&tracks[i].title);
        let base_match = (0..tracks.len()).find(|&j| {
            j != i
                && !titles::has_trailing_parenthetical(&tracks[j].title)
                && tracks[j].title.eq_ignore_ascii_case(&base)
        });
        if let Some(j) = base_match {
            alternate_of[i] = Some(j);
            excluded[i] = true;
        }
    }

    let counted: Vec<f64> = (0..tracks.len())
        .filter(|&i| !excluded[i] && tracks[i].popularity_score > 0.0)
        .map(|i| tracks[i].popularity_score)
        .collect();

    let stats = if counted.is_empty() {
        None
    } else {
        let m = mean(&counted);
        let sd = stddev(&counted, m);
        let md = median(&counted);
        let z_scores: Vec<f64> = counted
            .iter()
            .map(|&pop| if sd == 0.0 { 0.0 } else { (pop - m) / sd })
            .collect();
        Some(AlbumStats {
            mean: m,
            median: md,
            stddev: sd,
            mean_top50_z: mean_top_half(&z_scores),
            counted: counted.len(),
        })
    };

    AlbumAnalysis {
        by_popularity,
        excluded,
        alternate_of,
        stats,
    }
}

/// Artist statistics over all the artist's tracks, applying the same version
/// filter as album statistics: versioned titles and zero scores don't count.
pub fn artist_stats(tracks: &[Track]) -> ArtistStats {
    let counted: Vec<f64> = tracks
        .iter()
        .filter(|t| {
            t.popularity_score > 0.0
                && !titles::contains_skip_keyword(&t.title)
                && !titles::has_trailing_parenthetical(&t.title)
        })
        .map(|t| t.popularity_score)
        .collect();

    let m = mean(&counted);
    ArtistStats {
        mean: m,
        median: median(&counted),
        stddev: stddev(&counted, m),
        track_count: counted.len(),
    }
}

pub fn artist_z(stats: &ArtistStats, popularity: f64) -> Option<f64> {
    if !stats.is_reliable() || stats.stddev == 0.0 {
        return None;
    }
    Some((popularity - stats.mean) / stats.stddev)
}

/// An album is underperforming when its median popularity falls below 60% of
/// the artist's median. Disabled while artist statistics are unreliable.
pub fn is_underperforming(album: &AlbumStats, artist: &ArtistStats) -> bool {
    artist.is_reliable() && artist.median > 0.0 && album.median < UNDERPERFORMING_RATIO * artist.median
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(title: &str, popularity: f64) -> Track {
        Track {
            title: title.to_string(),
            artist: "Artist".to_string(),
            album: "Album".to_string(),
            duration_sec: 200,
            popularity_score: popularity,
            ..Default::default()
        }
    }

    #[test]
    fn test_standard_album_statistics() {
        // Scenario: 10 tracks, popularities as in the reference album
        let pops = [85.0, 70.0, 65.0, 60.0, 55.0, 52.0, 50.0, 48.0, 45.0, 40.0];
        let tracks: Vec<Track> = pops
            .iter()
            .enumerate()
            .map(|(i, &p)| track(&format!("Track {}", i), p))
            .collect();

        let analysis = analyze_album(&tracks);
        let stats = analysis.stats.unwrap();
        assert_eq!(stats.counted, 10);
        assert!((stats.mean - 57.0).abs() < 0.01);
        assert!((stats.stddev - 12.5).abs() < 0.5);

        // Top track z ≈ +2.24
        let top_z = stats.album_z(85.0);
        assert!((top_z - 2.24).abs() < 0.05, "top_z = {}", top_z);

        // Mean of the top 5 z-scores ≈ +0.77
        assert!((stats.mean_top50_z - 0.77).abs() < 0.05, "mean_top50_z = {}", stats.mean_top50_z);

        // Top track clears the promotion threshold
        assert!(top_z >= stats.mean_top50_z - 0.3);
    }

    #[test]
    fn test_trailing_parenthesis_exclusion() {
        // 12 tracks, the 3 least popular carry version suffixes
        let mut tracks: Vec<Track> = (0..9)
            .map(|i| track(&format!("Track {}", i), 80.0 - i as f64))
            .collect();
        tracks.push(track("Encore (Live)", 30.0));
        tracks.push(track("Encore Two (Live)", 25.0));
        tracks.push(track("Quiet One (Acoustic)", 20.0));

        let analysis = analyze_album(&tracks);
        assert!(analysis.is_excluded(9));
        assert!(analysis.is_excluded(10));
        assert!(analysis.is_excluded(11));
        let stats = analysis.stats.unwrap();
        assert_eq!(stats.counted, 9);
        // Mean over the first 9 only
        let expected: f64 = (0..9).map(|i| 80.0 - i as f64).sum::<f64>() / 9.0;
        assert!((stats.mean - expected).abs() < 0.001);
    }

    #[test]
    fn test_single_trailing_parenthetical_not_excluded() {
        let mut tracks: Vec<Track> = (0..5)
            .map(|i| track(&format!("Track {}", i), 80.0 - i as f64))
            .collect();
        tracks.push(track("Closer (Live)", 10.0));

        let analysis = analyze_album(&tracks);
        // Run of 1 is below the threshold
        assert!(!analysis.is_excluded(5));
        assert_eq!(analysis.stats.unwrap().counted, 6);
    }

    #[test]
    fn test_small_album_keeps_everything() {
        let tracks = vec![track("A (Live)", 50.0), track("B (Live)", 40.0)];
        let analysis = analyze_album(&tracks);
        assert!(!analysis.is_excluded(0));
        assert!(!analysis.is_excluded(1));
    }

    #[test]
    fn test_alternate_take_detection() {
        let tracks = vec![
            track("Song", 70.0),
            track("Song (Acoustic)", 30.0),
            track("Other", 50.0),
            track("Third", 45.0),
        ];
        let analysis = analyze_album(&tracks);
        assert_eq!(analysis.alternate_of[1], Some(0));
        assert!(analysis.is_excluded(1));
        assert!(!analysis.is_excluded(0));
        // Stats over the three non-excluded tracks
        assert_eq!(analysis.stats.unwrap().counted, 3);
    }

    #[test]
    fn test_all_zero_popularity_yields_no_stats() {
        let tracks = vec![track("A", 0.0), track("B", 0.0), track("C", 0.0)];
        let analysis = analyze_album(&tracks);
        assert!(analysis.stats.is_none());
    }

    #[test]
    fn test_zero_stddev_gives_zero_z() {
        let tracks = vec![track("A", 50.0), track("B", 50.0), track("C", 50.0)];
        let analysis = analyze_album(&tracks);
        let stats = analysis.stats.unwrap();
        assert_eq!(stats.album_z(50.0), 0.0);
    }

    #[test]
    fn test_by_popularity_ordering() {
        let tracks = vec![track("A", 10.0), track("B", 90.0), track("C", 50.0)];
        let analysis = analyze_album(&tracks);
        assert_eq!(analysis.by_popularity, vec![1, 2, 0]);
    }

    #[test]
    fn test_artist_stats_filters_versions() {
        let mut tracks: Vec<Track> = (0..12)
            .map(|i| track(&format!("Track {}", i), 60.0 + i as f64))
            .collect();
        tracks.push(track("Track X (Live)", 90.0));
        tracks.push(track("Intro", 5.0));
        tracks.push(track("Nothing", 0.0));

        let stats = artist_stats(&tracks);
        assert_eq!(stats.track_count, 12);
        assert!(stats.is_reliable());
    }

    #[test]
    fn test_artist_stats_unreliable_below_threshold() {
        let tracks: Vec<Track> = (0..5)
            .map(|i| track(&format!("Track {}", i), 50.0))
            .collect();
        let stats = artist_stats(&tracks);
        assert!(!stats.is_reliable());
        assert_eq!(artist_z(&stats, 60.0), None);
    }

    #[test]
    fn test_underperforming_album() {
        let album = AlbumStats {
            median: 35.0,
            ..Default::default()
        };
        let artist = ArtistStats {
            mean: 70.0,
            median: 70.0,
            stddev: 10.0,
            track_count: 30,
        };
        // 35 < 0.6 * 70 = 42
        assert!(is_underperforming(&album, &artist));

        let healthy = AlbumStats {
            median: 65.0,
            ..Default::default()
        };
        assert!(!is_underperforming(&healthy, &artist));
    }

    #[test]
    fn test_underperforming_disabled_without_reliable_artist_stats() {
        let album = AlbumStats {
            median: 1.0,
            ..Default::default()
        };
        let artist = ArtistStats {
            mean: 70.0,
            median: 70.0,
            stddev: 10.0,
            track_count: 3,
        };
        assert!(!is_underperforming(&album, &artist));
    }

    #[test]
    fn test_mean_top_half_partial_selection() {
        let z = [2.0, -1.0, 0.5, 1.0, -0.5];
        // top 3: 2.0, 1.0, 0.5 → mean ≈ 1.1667
        assert!((mean_top_half(&z) - 7.0 / 6.0).abs() < 1e-9);
    }
}
