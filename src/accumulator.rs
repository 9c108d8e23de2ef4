//! # Match Accumulator
//!
//! Per-run collection of the surviving match candidates, indexed from both
//! sides: by reference stop and by candidate stop. Both indexes share the
//! same [`MatchCandidate`] instances, so a candidate stop that plausibly
//! matches several reference stops appears once per pairing without copies.
//!
//! One accumulator is created per matching run and owned by the pipeline;
//! it is filled in a single pass and then handed to the export step.

use crate::MatchCandidate;
use std::collections::HashMap;
use std::sync::Arc;

/// Accumulated match candidates for one run.
#[derive(Debug, Default)]
pub struct MatchAccumulator {
    by_reference: HashMap<String, Vec<Arc<MatchCandidate>>>,
    by_candidate: HashMap<String, Vec<Arc<MatchCandidate>>>,
    total: usize,
}

impl MatchAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the ranked matches for one reference stop.
    ///
    /// Single-pass contract: each reference stop is recorded at most once
    /// per run. Recording the same reference stop twice is unsupported.
    pub fn record(&mut self, reference_id: &str, matches: Vec<MatchCandidate>) {
        let shared: Vec<Arc<MatchCandidate>> = matches.into_iter().map(Arc::new).collect();
        self.total += shared.len();

        for m in &shared {
            self.by_candidate
                .entry(m.candidate_id.clone())
                .or_default()
                .push(Arc::clone(m));
        }
        self.by_reference.insert(reference_id.to_string(), shared);
    }

    /// Matches recorded for a reference stop, in retrieval order.
    pub fn reference_matches(&self, reference_id: &str) -> &[Arc<MatchCandidate>] {
        self.by_reference
            .get(reference_id)
            .map_or(&[], Vec::as_slice)
    }

    /// Matches in which a candidate stop appears, across all reference stops.
    pub fn candidate_matches(&self, candidate_id: &str) -> &[Arc<MatchCandidate>] {
        self.by_candidate
            .get(candidate_id)
            .map_or(&[], Vec::as_slice)
    }

    /// Iterate all recorded (reference id, matches) entries.
    ///
    /// Iteration order is unspecified; the export step imposes its own
    /// ordering when persisting.
    pub fn iter_by_reference(
        &self,
    ) -> impl Iterator<Item = (&str, &[Arc<MatchCandidate>])> {
        self.by_reference
            .iter()
            .map(|(id, matches)| (id.as_str(), matches.as_slice()))
    }

    /// Number of reference stops with at least one match.
    pub fn matched_reference_stops(&self) -> usize {
        self.by_reference.len()
    }

    /// Total number of match candidates recorded.
    pub fn len(&self) -> usize {
        self.total
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate_match(reference_id: &str, candidate_id: &str, rating: f64) -> MatchCandidate {
        MatchCandidate {
            reference_id: reference_id.to_string(),
            candidate_id: candidate_id.to_string(),
            rating,
            distance: 10.0,
            name_distance: 1.0,
            platform_matches: false,
            successor_rating: 0,
            mode_rating: 1.0,
        }
    }

    #[test]
    fn test_record_indexes_both_sides() {
        let mut acc = MatchAccumulator::new();
        acc.record(
            "ref:1",
            vec![candidate_match("ref:1", "n1", 0.5), candidate_match("ref:1", "n2", 0.2)],
        );

        assert_eq!(acc.len(), 2);
        assert_eq!(acc.matched_reference_stops(), 1);
        assert_eq!(acc.reference_matches("ref:1").len(), 2);
        assert_eq!(acc.candidate_matches("n1").len(), 1);
        assert_eq!(acc.candidate_matches("n2").len(), 1);
    }

    #[test]
    fn test_candidate_shared_by_two_references() {
        let mut acc = MatchAccumulator::new();
        acc.record("ref:1", vec![candidate_match("ref:1", "n1", 0.5)]);
        acc.record("ref:2", vec![candidate_match("ref:2", "n1", 0.4)]);

        let shared = acc.candidate_matches("n1");
        assert_eq!(shared.len(), 2);
        assert_eq!(acc.matched_reference_stops(), 2);

        // Same instances, not copies: the per-candidate entries alias the
        // per-reference entries
        assert!(Arc::ptr_eq(&shared[0], &acc.reference_matches(&shared[0].reference_id)[0]));
    }

    #[test]
    fn test_preserves_recorded_order() {
        let mut acc = MatchAccumulator::new();
        acc.record(
            "ref:1",
            vec![
                candidate_match("ref:1", "n1", 0.1),
                candidate_match("ref:1", "n2", 0.9),
                candidate_match("ref:1", "n3", 0.5),
            ],
        );

        let ids: Vec<&str> = acc
            .reference_matches("ref:1")
            .iter()
            .map(|m| m.candidate_id.as_str())
            .collect();
        assert_eq!(ids, vec!["n1", "n2", "n3"]);
    }

    #[test]
    fn test_unknown_ids_empty() {
        let acc = MatchAccumulator::new();
        assert!(acc.is_empty());
        assert!(acc.reference_matches("ref:1").is_empty());
        assert!(acc.candidate_matches("n1").is_empty());
    }
}
