//! Candidate model, filtering, and ranking.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::ids::deterministic_id;

/// Metric used to rank candidates.
pub const SCORE_METRIC: &str = "mean_plddt";
/// Flag set on candidates rejected by quality control.
pub const QC_REJECT_FLAG: &str = "qc_reject";

/// A proposed sequence plus its evaluation metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub candidate_id: String,
    pub sequence: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub flags: Vec<String>,
}

impl Candidate {
    pub fn new(candidate_id: impl Into<String>, sequence: impl Into<String>) -> Self {
        Self {
            candidate_id: candidate_id.into(),
            sequence: sequence.into(),
            metrics: BTreeMap::new(),
            flags: Vec::new(),
        }
    }

    /// Ranking score. Missing metric scores zero.
    pub fn score(&self) -> f64 {
        self.metrics.get(SCORE_METRIC).copied().unwrap_or(0.0)
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }
}

/// Version id over the full candidate payload and the version it follows.
///
/// Including the parent keeps ids unique when a candidate returns to an
/// earlier payload.
pub fn version_id_for(candidate: &Candidate, parent: Option<&str>) -> serde_json::Result<String> {
    deterministic_id("ver", &json!({"candidate": candidate, "parent": parent}))
}

/// Keep candidates with a sequence, no QC rejection, and a score of at least `min_score`.
pub fn filter_candidates(candidates: &[Candidate], min_score: f64) -> Vec<Candidate> {
    candidates
        .iter()
        .filter(|c| !c.sequence.trim().is_empty())
        .filter(|c| !c.has_flag(QC_REJECT_FLAG))
        .filter(|c| c.score() >= min_score)
        .cloned()
        .collect()
}

/// Top `n` candidates by score descending, ties by candidate id.
pub fn rank_top_n(candidates: &[Candidate], n: usize) -> Vec<Candidate> {
    let mut ranked = candidates.to_vec();
    ranked.sort_by(|a, b| {
        b.score()
            .partial_cmp(&a.score())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.candidate_id.cmp(&b.candidate_id))
    });
    ranked.truncate(n);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scored_candidate;

    #[test]
    fn filter_accepts_valid_candidate() {
        let c = scored_candidate("c1", "ACD", 80.0);
        assert_eq!(filter_candidates(std::slice::from_ref(&c), 50.0), vec![c]);
    }

    #[test]
    fn filter_rejects_empty_flagged_and_low_scores() {
        let empty = scored_candidate("c2", "", 90.0);
        let mut flagged = scored_candidate("c3", "ACD", 80.0);
        flagged.flags.push(QC_REJECT_FLAG.to_string());
        let low = scored_candidate("c4", "ACD", 10.0);
        assert!(filter_candidates(&[empty, flagged, low], 50.0).is_empty());
    }

    #[test]
    fn rank_orders_by_score_then_id() {
        let ranked = rank_top_n(
            &[
                scored_candidate("b", "A", 60.0),
                scored_candidate("c", "A", 80.0),
                scored_candidate("a", "A", 60.0),
            ],
            2,
        );
        let ids: Vec<&str> = ranked.iter().map(|c| c.candidate_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[test]
    fn version_id_tracks_payload_and_parent() {
        let a = scored_candidate("c1", "ACD", 80.0);
        let mut b = a.clone();
        assert_eq!(
            version_id_for(&a, None).expect("id"),
            version_id_for(&b, None).expect("id")
        );
        b.flags.push("mutated".to_string());
        assert_ne!(
            version_id_for(&a, None).expect("id"),
            version_id_for(&b, None).expect("id")
        );
        assert_ne!(
            version_id_for(&a, None).expect("id"),
            version_id_for(&a, Some("ver-0")).expect("id")
        );
    }
}
