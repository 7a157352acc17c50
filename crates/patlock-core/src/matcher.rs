//! Brute-force Hamming matching of frame descriptors against the trained
//! pattern pyramid.

use crate::descriptor::{hamming_distance, DescriptorBank, WORDS_PER_ROW};
use crate::pattern::PatternLevel;
use multiversion::multiversion;

/// A descriptor correspondence between the frame and the pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Match {
    /// Index of the query keypoint in the frame.
    pub screen_idx: usize,
    /// Pattern pyramid level of the matched keypoint.
    pub pattern_level: usize,
    /// Keypoint index within that level.
    pub pattern_idx: usize,
    /// Hamming distance of the winning pair.
    pub distance: u32,
}

/// Per-frame matching statistics, surfaced through trace logging.
#[derive(Clone, Copy, Debug, Default)]
pub struct MatchStats {
    /// Queries inspected.
    pub queries: usize,
    /// Queries that produced a match under the threshold.
    pub matched: usize,
    /// Matched queries whose second-best candidate was within 8 bits of the
    /// best; high counts indicate a repetitive pattern.
    pub ambiguous: usize,
}

/// Match every query descriptor against all pattern levels.
///
/// For each query the best and second-best distances over the whole pyramid
/// are tracked; a [`Match`] is emitted when the best distance is under
/// `threshold`. Ties keep the first candidate seen, walking levels in order
/// and rows in order. Results are appended to `out` in query order.
pub fn match_against_pattern(
    query: &DescriptorBank,
    levels: &[PatternLevel],
    threshold: u32,
    out: &mut Vec<Match>,
) -> MatchStats {
    out.clear();
    let n = query.rows();
    if n == 0 {
        return MatchStats::default();
    }

    use rayon::prelude::*;

    let found: Vec<Option<(Match, bool)>> = (0..n)
        .into_par_iter()
        .map(|qi| {
            let q = query.row(qi);
            let mut best = u32::MAX;
            let mut second = u32::MAX;
            let mut best_level = 0usize;
            let mut best_idx = 0usize;

            for (li, level) in levels.iter().enumerate() {
                let (idx, dist, runner_up) = scan_bank(q, &level.descriptors);
                if dist < best {
                    second = best.min(runner_up);
                    best = dist;
                    best_level = li;
                    best_idx = idx;
                } else {
                    second = second.min(dist);
                }
            }

            if best < threshold {
                let m = Match {
                    screen_idx: qi,
                    pattern_level: best_level,
                    pattern_idx: best_idx,
                    distance: best,
                };
                let ambiguous = second != u32::MAX && second - best < 8;
                Some((m, ambiguous))
            } else {
                None
            }
        })
        .collect();

    let mut stats = MatchStats { queries: n, matched: 0, ambiguous: 0 };
    for entry in found.into_iter().flatten() {
        stats.matched += 1;
        if entry.1 {
            stats.ambiguous += 1;
        }
        out.push(entry.0);
    }
    stats
}

/// Scan one level's bank for the best and second-best distances to `q`.
/// Returns `(best_idx, best, second)`; empty banks yield `u32::MAX`
/// distances.
#[multiversion(targets = "simd")]
fn scan_bank(q: &[u32], bank: &DescriptorBank) -> (usize, u32, u32) {
    debug_assert_eq!(q.len(), WORDS_PER_ROW);
    let mut best = u32::MAX;
    let mut second = u32::MAX;
    let mut best_idx = 0usize;
    for i in 0..bank.rows() {
        let dist = hamming_distance(q, bank.row(i));
        if dist < best {
            second = best;
            best = dist;
            best_idx = i;
        } else if dist < second {
            second = dist;
        }
    }
    (best_idx, best, second)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Keypoint;

    fn level_with_rows(rows: &[[u32; WORDS_PER_ROW]]) -> PatternLevel {
        let mut level = PatternLevel::default();
        for (i, row) in rows.iter().enumerate() {
            level.keypoints.push(Keypoint { x: i as f32, y: 0.0, ..Default::default() });
            level.descriptors.push_row(*row);
        }
        level
    }

    fn bank_with_rows(rows: &[[u32; WORDS_PER_ROW]]) -> DescriptorBank {
        let mut bank = DescriptorBank::default();
        for row in rows {
            bank.push_row(*row);
        }
        bank
    }

    #[test]
    fn test_exact_match_found() {
        let target = [0xaaaa_5555u32; WORDS_PER_ROW];
        let levels = vec![
            level_with_rows(&[[0u32; WORDS_PER_ROW], [!0u32; WORDS_PER_ROW]]),
            level_with_rows(&[target]),
        ];
        let query = bank_with_rows(&[target]);
        let mut out = Vec::new();
        let stats = match_against_pattern(&query, &levels, 48, &mut out);

        assert_eq!(stats.matched, 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].pattern_level, 1);
        assert_eq!(out[0].pattern_idx, 0);
        assert_eq!(out[0].distance, 0);
    }

    #[test]
    fn test_threshold_drops_weak_matches() {
        let levels = vec![level_with_rows(&[[0u32; WORDS_PER_ROW]])];
        // 64 bits set: distance 64 > 48.
        let mut far = [0u32; WORDS_PER_ROW];
        far[0] = !0;
        far[1] = !0;
        let query = bank_with_rows(&[far]);
        let mut out = Vec::new();
        let stats = match_against_pattern(&query, &levels, 48, &mut out);
        assert_eq!(stats.matched, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_tie_keeps_first_seen() {
        let row = [7u32; WORDS_PER_ROW];
        let levels = vec![level_with_rows(&[row, row])];
        let query = bank_with_rows(&[row]);
        let mut out = Vec::new();
        match_against_pattern(&query, &levels, 48, &mut out);
        assert_eq!(out[0].pattern_idx, 0);
    }

    #[test]
    fn test_matches_preserve_query_order() {
        let a = [1u32; WORDS_PER_ROW];
        let b = [2u32; WORDS_PER_ROW];
        let levels = vec![level_with_rows(&[a, b])];
        let query = bank_with_rows(&[b, a]);
        let mut out = Vec::new();
        match_against_pattern(&query, &levels, 48, &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].screen_idx, 0);
        assert_eq!(out[0].pattern_idx, 1);
        assert_eq!(out[1].screen_idx, 1);
        assert_eq!(out[1].pattern_idx, 0);
    }

    #[test]
    fn test_empty_levels_match_nothing() {
        let levels = vec![PatternLevel::default()];
        let query = bank_with_rows(&[[0u32; WORDS_PER_ROW]]);
        let mut out = Vec::new();
        let stats = match_against_pattern(&query, &levels, 48, &mut out);
        assert_eq!(stats.matched, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_ambiguous_counted() {
        let row = [3u32; WORDS_PER_ROW];
        let mut near = row;
        near[0] ^= 0b11; // distance 2 from row
        let levels = vec![level_with_rows(&[row, near])];
        let query = bank_with_rows(&[row]);
        let mut out = Vec::new();
        let stats = match_against_pattern(&query, &levels, 48, &mut out);
        assert_eq!(stats.matched, 1);
        assert_eq!(stats.ambiguous, 1);
    }
}
