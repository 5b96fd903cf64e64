//! Score-based filtering and ranking of upstream hits.
//!
//! The percentile cutoff uses the nearest-rank method on scores sorted in
//! ascending order:
//!
//! ```text
//! rank   = clamp(ceil(p / 100 * n), 1, n)
//! cutoff = sorted[rank - 1]
//! ```
//!
//! Hits scoring strictly below the cutoff are dropped. For the scores
//! `[90, 80, 50, 10]` at `p = 75` the rank is 3, the cutoff is 80 and the
//! hits scoring 90 and 80 survive. A single hit is its own cutoff and is
//! always retained.

use std::cmp::Ordering;

use crate::models::{RankedResult, RawHit};

/// Default percentile cutoff.
pub const DEFAULT_PERCENTILE: f64 = 75.0;

/// Default number of retained results.
pub const DEFAULT_TOP_K: usize = 10;

/// Returns the nearest-rank `percentile` of `scores`, or `None` when empty.
#[must_use]
pub fn nearest_rank_cutoff(scores: &[f64], percentile: f64) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    let mut sorted = scores.to_vec();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    let p = percentile.clamp(0.0, 100.0);
    let rank = ((p / 100.0) * n as f64).ceil() as usize;
    Some(sorted[rank.clamp(1, n) - 1])
}

/// Share of `scores` (0-100) at or below `score`.
#[must_use]
pub fn percentile_rank(scores: &[f64], score: f64) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let at_or_below = scores
        .iter()
        .filter(|s| s.total_cmp(&score) != Ordering::Greater)
        .count();
    at_or_below as f64 / scores.len() as f64 * 100.0
}

/// Filters and ranks raw hits.
///
/// Applies the percentile cutoff (skipped when `percentile` is `None`), then
/// sorts the survivors by descending score, stable on ties, and keeps the
/// first `top_k`. Only retained results are returned; their `rank` is their
/// zero-based position.
#[must_use]
pub fn filter(hits: Vec<RawHit>, percentile: Option<f64>, top_k: usize) -> Vec<RankedResult> {
    if hits.is_empty() || top_k == 0 {
        return Vec::new();
    }

    let scores: Vec<f64> = hits.iter().map(|h| h.score).collect();
    let cutoff = percentile.and_then(|p| nearest_rank_cutoff(&scores, p));
    let received = hits.len();

    let mut survivors: Vec<RawHit> = match cutoff {
        Some(cutoff) => hits
            .into_iter()
            .filter(|h| h.score.total_cmp(&cutoff) != Ordering::Less)
            .collect(),
        None => hits,
    };

    // sort_by is stable, so equal scores keep upstream order
    survivors.sort_by(|a, b| b.score.total_cmp(&a.score));
    survivors.truncate(top_k);

    tracing::debug!(
        received,
        retained = survivors.len(),
        cutoff = ?cutoff,
        top_k,
        "Ranked search hits"
    );

    survivors
        .into_iter()
        .enumerate()
        .map(|(rank, hit)| RankedResult {
            percentile_rank: percentile_rank(&scores, hit.score),
            hit,
            retained: true,
            rank,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn hits(scores: &[f64]) -> Vec<RawHit> {
        scores
            .iter()
            .enumerate()
            .map(|(i, s)| {
                RawHit::new(format!("https://example.com/{i}"), format!("hit {i}"), *s)
                    .with_position(i)
            })
            .collect()
    }

    fn scores_of(results: &[RankedResult]) -> Vec<f64> {
        results.iter().map(|r| r.hit.score).collect()
    }

    #[test]
    fn test_reference_distribution() {
        let ranked = filter(hits(&[90.0, 80.0, 50.0, 10.0]), Some(75.0), 10);
        assert_eq!(scores_of(&ranked), vec![90.0, 80.0]);
        assert_eq!(ranked[0].rank, 0);
        assert_eq!(ranked[1].rank, 1);
    }

    #[test]
    fn test_cutoff_reference_values() {
        let scores = [15.0, 20.0, 35.0, 40.0, 50.0];
        assert_eq!(nearest_rank_cutoff(&scores, 30.0), Some(20.0));
        assert_eq!(nearest_rank_cutoff(&scores, 40.0), Some(20.0));
        assert_eq!(nearest_rank_cutoff(&scores, 50.0), Some(35.0));
        assert_eq!(nearest_rank_cutoff(&scores, 100.0), Some(50.0));
        assert_eq!(nearest_rank_cutoff(&scores, 0.0), Some(15.0));
        assert_eq!(nearest_rank_cutoff(&[], 75.0), None);
    }

    #[test]
    fn test_no_percentile_keeps_top_k_sorted() {
        let ranked = filter(hits(&[1.0, 5.0, 3.0, 4.0]), None, 3);
        assert_eq!(scores_of(&ranked), vec![5.0, 4.0, 3.0]);
    }

    #[test]
    fn test_ties_preserve_upstream_order() {
        let ranked = filter(hits(&[2.0, 7.0, 2.0, 7.0, 2.0]), None, 10);
        let positions: Vec<usize> = ranked.iter().map(|r| r.hit.position).collect();
        assert_eq!(positions, vec![1, 3, 0, 2, 4]);
    }

    #[test]
    fn test_empty_input() {
        assert!(filter(Vec::new(), Some(75.0), 10).is_empty());
        assert!(filter(Vec::new(), None, 10).is_empty());
    }

    #[test]
    fn test_top_k_zero_yields_nothing() {
        assert!(filter(hits(&[1.0, 2.0]), None, 0).is_empty());
    }

    #[test]
    fn test_top_k_larger_than_survivors() {
        let ranked = filter(hits(&[3.0, 1.0]), None, 50);
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn test_single_hit_always_retained() {
        for p in [0.0, 50.0, 75.0, 100.0] {
            let ranked = filter(hits(&[0.3]), Some(p), 10);
            assert_eq!(ranked.len(), 1, "percentile {p}");
        }
    }

    #[test]
    fn test_retained_scores_at_or_above_cutoff() {
        let scores = [0.1, 0.9, 0.4, 0.4, 0.7, 0.2, 0.95, 0.55];
        for p in [10.0, 25.0, 50.0, 75.0, 90.0] {
            let cutoff = nearest_rank_cutoff(&scores, p).unwrap();
            let ranked = filter(hits(&scores), Some(p), 100);
            assert!(!ranked.is_empty());
            assert!(ranked.iter().all(|r| r.hit.score >= cutoff), "percentile {p}");
            assert!(ranked.windows(2).all(|w| w[0].hit.score >= w[1].hit.score));
        }
    }

    #[test]
    fn test_equal_scores_all_survive_cutoff() {
        let ranked = filter(hits(&[5.0, 5.0, 5.0]), Some(75.0), 10);
        assert_eq!(ranked.len(), 3);
    }

    #[test]
    fn test_percentile_rank() {
        let scores = [90.0, 80.0, 50.0, 10.0];
        assert!((percentile_rank(&scores, 90.0) - 100.0).abs() < f64::EPSILON);
        assert!((percentile_rank(&scores, 50.0) - 50.0).abs() < f64::EPSILON);
        assert!((percentile_rank(&scores, 10.0) - 25.0).abs() < f64::EPSILON);

        let ranked = filter(hits(&scores), Some(75.0), 10);
        assert!((ranked[1].percentile_rank - 75.0).abs() < f64::EPSILON);
        assert!(ranked.iter().all(|r| r.retained));
    }
}
