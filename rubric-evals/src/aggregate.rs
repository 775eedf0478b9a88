// Copyright 2025 Rubric Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Judgment aggregation: reducing repeated, noisy model judgments for one
//! evaluation row into a single scalar score.
//!
//! All policies are stateless. An undefined score is `f64::NAN`, never a
//! defaulted `0.0`, so callers can tell "the model said no" apart from
//! "the judgment was unusable".

/// Cosine similarity between two vectors: `dot(u, v) / (|u| * |v|)`.
///
/// Zero-magnitude vectors yield NaN.
pub fn cosine_similarity(u: &[f64], v: &[f64]) -> f64 {
    assert_eq!(u.len(), v.len(), "vectors must have the same dimension");

    let dot: f64 = u.iter().zip(v).map(|(a, b)| a * b).sum();
    let norm_u: f64 = u.iter().map(|a| a * a).sum::<f64>().sqrt();
    let norm_v: f64 = v.iter().map(|b| b * b).sum::<f64>().sqrt();
    dot / (norm_u * norm_v)
}

/// Mean cosine similarity of each candidate against the reference vector,
/// discarded entirely when any candidate was judged noncommittal.
///
/// A single noncommittal flag zeroes the whole row's score rather than
/// excluding that candidate from the mean: one evasive generation marks the
/// entire answer as untrustworthy. An empty candidate set yields NaN.
pub fn similarity_gated_mean(
    reference: &[f64],
    candidates: &[Vec<f64>],
    noncommittal: &[bool],
) -> f64 {
    if noncommittal.iter().any(|&flag| flag) {
        return 0.0;
    }
    if candidates.is_empty() {
        return f64::NAN;
    }
    let total: f64 = candidates
        .iter()
        .map(|candidate| cosine_similarity(reference, candidate))
        .sum();
    total / candidates.len() as f64
}

/// Fraction of statements with a supporting verdict.
///
/// `"1"` maps to 1, `"0"` to 0, anything else (including `"-1"` and
/// `"null"`) is undefined and propagates: a single unusable verdict makes
/// the whole ratio NaN. An empty verdict list is NaN as well.
pub fn verdict_ratio_mean<S: AsRef<str>>(verdicts: &[S]) -> f64 {
    if verdicts.is_empty() {
        return f64::NAN;
    }
    let sum: f64 = verdicts
        .iter()
        .map(|verdict| match verdict.as_ref() {
            "1" => 1.0,
            "0" => 0.0,
            _ => f64::NAN,
        })
        .sum();
    sum / verdicts.len() as f64
}

/// Most frequent verdict across repeated samples.
///
/// A single sample short-circuits to its own mapped value. Ties break by
/// first-seen order; with an odd sample count (see [`normalize_strictness`])
/// that only matters for malformed input. Unmapped verdicts count as their
/// own (undefined) bucket and score NaN if they win.
pub fn majority_vote<S: AsRef<str>>(verdicts: &[S]) -> f64 {
    let mapped: Vec<Option<u8>> = verdicts.iter().map(|v| map_verdict(v.as_ref())).collect();

    if mapped.len() == 1 {
        return verdict_score(mapped[0]);
    }

    let mut counts: Vec<(Option<u8>, usize)> = Vec::new();
    for value in mapped {
        match counts.iter_mut().find(|(seen, _)| *seen == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }

    let mut winner = (None, 0usize);
    for (value, count) in counts {
        if count > winner.1 {
            winner = (value, count);
        }
    }
    verdict_score(winner.0)
}

fn map_verdict(verdict: &str) -> Option<u8> {
    match verdict {
        "1" => Some(1),
        "0" => Some(0),
        _ => None,
    }
}

fn verdict_score(mapped: Option<u8>) -> f64 {
    match mapped {
        Some(value) => f64::from(value),
        None => f64::NAN,
    }
}

/// Self-consistency sample counts must be odd to avoid ties; even
/// configurations are bumped by one.
pub fn normalize_strictness(strictness: usize) -> usize {
    if strictness % 2 == 0 {
        strictness + 1
    } else {
        strictness
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_of_unit_axes() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), -1.0);
    }

    #[test]
    fn gated_mean_averages_similarities() {
        let score = similarity_gated_mean(
            &[1.0, 0.0],
            &[vec![1.0, 0.0], vec![0.0, 1.0]],
            &[false, false],
        );
        assert_eq!(score, 0.5);
    }

    #[test]
    fn gated_mean_collapses_to_zero_on_any_noncommittal_flag() {
        let score = similarity_gated_mean(
            &[1.0, 0.0],
            &[vec![1.0, 0.0], vec![0.0, 1.0]],
            &[false, true],
        );
        assert_eq!(score, 0.0);
    }

    #[test]
    fn gated_mean_of_no_candidates_is_undefined() {
        assert!(similarity_gated_mean(&[1.0, 0.0], &[], &[]).is_nan());
    }

    #[test]
    fn verdict_ratio_counts_supporting_verdicts() {
        assert!((verdict_ratio_mean(&["1", "1", "0"]) - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(verdict_ratio_mean(&["0", "0"]), 0.0);
    }

    #[test]
    fn verdict_ratio_of_empty_list_is_undefined() {
        assert!(verdict_ratio_mean::<&str>(&[]).is_nan());
    }

    #[test]
    fn verdict_ratio_propagates_undefined_verdicts() {
        assert!(verdict_ratio_mean(&["1", "null"]).is_nan());
        assert!(verdict_ratio_mean(&["1", "-1", "1"]).is_nan());
    }

    #[test]
    fn majority_vote_picks_most_frequent() {
        assert_eq!(majority_vote(&["1", "1", "0"]), 1.0);
        assert_eq!(majority_vote(&["0", "1", "0"]), 0.0);
    }

    #[test]
    fn majority_vote_single_sample_short_circuits() {
        assert_eq!(majority_vote(&["0"]), 0.0);
        assert_eq!(majority_vote(&["1"]), 1.0);
        assert!(majority_vote(&["maybe"]).is_nan());
    }

    #[test]
    fn majority_vote_ties_break_by_first_seen() {
        // malformed even-count input; the first-seen verdict wins
        assert_eq!(majority_vote(&["1", "0"]), 1.0);
        assert_eq!(majority_vote(&["0", "1"]), 0.0);
    }

    #[test]
    fn majority_vote_undefined_bucket_can_win() {
        assert!(majority_vote(&["x", "y", "1"]).is_nan());
    }

    #[test]
    fn strictness_normalizes_to_odd() {
        assert_eq!(normalize_strictness(1), 1);
        assert_eq!(normalize_strictness(3), 3);
        assert_eq!(normalize_strictness(4), 5);
        assert_eq!(normalize_strictness(0), 1);
    }
}
