//! # Spatial Index
//!
//! R-tree index over the crowd-sourced candidate stops, built once per run
//! and queried once per reference stop.
//!
//! The index is bulk-loaded from the full candidate dataset before any
//! query, is never mutated afterwards, and owns the candidate records it
//! indexes. Candidates without a usable coordinate are left out and are
//! therefore unreachable by matching — by the same token they never need to
//! be filtered again downstream.

use crate::{CandidateStop, GeoPoint};
use rstar::{PointDistance, RTree, RTreeObject, AABB};

/// Index entry: a candidate's coordinate plus its slot in the owned vector.
struct IndexEntry {
    point: [f64; 2],
    slot: usize,
}

impl RTreeObject for IndexEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.point)
    }
}

impl PointDistance for IndexEntry {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.point[0] - point[0];
        let dy = self.point[1] - point[1];
        dx * dx + dy * dy
    }
}

/// Nearest-neighbour index over all candidate stops with valid coordinates.
///
/// # Ordering contract
///
/// [`StopIndex::nearest`] yields candidates in ascending Euclidean
/// coordinate distance from the query point. The ranking algorithm's
/// distance-cutoff short-circuit depends on this ordering, so it is a
/// documented postcondition of this type (covered by a unit test), not an
/// incidental property of the underlying library.
pub struct StopIndex {
    tree: RTree<IndexEntry>,
    stops: Vec<CandidateStop>,
}

impl StopIndex {
    /// Bulk-load the index from the full candidate dataset.
    ///
    /// Candidates with a missing or out-of-range coordinate are retained as
    /// owned records but receive no index entry, so queries can never return
    /// them.
    pub fn build(stops: Vec<CandidateStop>) -> Self {
        let entries: Vec<IndexEntry> = stops
            .iter()
            .enumerate()
            .filter_map(|(slot, stop)| {
                let position = stop.position.filter(GeoPoint::is_valid)?;
                Some(IndexEntry {
                    point: [position.latitude, position.longitude],
                    slot,
                })
            })
            .collect();

        Self {
            tree: RTree::bulk_load(entries),
            stops,
        }
    }

    /// The k candidate stops closest to `position`, ascending by Euclidean
    /// coordinate distance. Returns fewer than k when the index is smaller.
    pub fn nearest(&self, position: &GeoPoint, k: usize) -> impl Iterator<Item = &CandidateStop> {
        self.tree
            .nearest_neighbor_iter(&[position.latitude, position.longitude])
            .take(k)
            .map(|entry| &self.stops[entry.slot])
    }

    /// Number of candidate stops reachable through the index.
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Whether the index contains no reachable candidates.
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}
