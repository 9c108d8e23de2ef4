//! # Similarity Primitives
//!
//! Stateless scoring primitives used by the candidate ranking algorithm.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`unigram_similarity`] | Character-overlap similarity between two names |
//! | [`haversine_distance`] | Great-circle distance between two stop positions |
//! | [`extract_direction`] | Destination fragment from a free-text heading field |
//!
//! ## Example
//!
//! ```rust
//! use stop_matcher::{GeoPoint, similarity};
//!
//! let sim = similarity::unigram_similarity("Hauptbahnhof", "Hauptbahnhof Gleis 1");
//! assert!(sim > 0.5 && sim < 1.0);
//!
//! let a = GeoPoint::new(48.7758, 9.1829); // Stuttgart
//! let b = GeoPoint::new(48.7838, 9.1821);
//! let dist = similarity::haversine_distance(&a, &b);
//! assert!(dist > 800.0 && dist < 1000.0);
//!
//! let dest = similarity::extract_direction("Steig 2 Richtung Flughafen");
//! assert_eq!(dest.as_deref(), Some("Flughafen"));
//! ```
//!
//! ## Algorithm Notes
//!
//! ### Unigram overlap
//!
//! Transit-stop names are short, heavily abbreviated, and full of near-dupes
//! ("Hbf", "Hauptbf.", "Hauptbahnhof"). Edit distance punishes abbreviation
//! hard, so name similarity is instead a character-multiset overlap
//! coefficient: `shared / (|a| + |b| - shared)` where `shared` sums the
//! per-character minimum occurrence counts. The result is symmetric, lies in
//! [0, 1], and is 1.0 exactly for identical non-empty strings.
//!
//! ### Coordinate system
//!
//! All positions are WGS84 latitude/longitude in degrees; distances are
//! meters along the great circle.

use crate::GeoPoint;
use geo::{Distance, Haversine, Point};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

// =============================================================================
// Name Similarity
// =============================================================================

/// Character-unigram overlap similarity between two strings.
///
/// Computes a multiset Jaccard coefficient over the characters of `a` and
/// `b`: the sum of per-character minimum counts, divided by the total number
/// of characters minus that overlap.
///
/// # Returns
///
/// A value in `[0, 1]`. Identical non-empty strings score 1.0. If either
/// input is empty, returns 0.0 — callers that need the missing-name sentinel
/// apply it themselves (see the ranking module).
///
/// # Example
///
/// ```rust
/// use stop_matcher::similarity::unigram_similarity;
///
/// assert_eq!(unigram_similarity("abc", "abc"), 1.0);
/// assert_eq!(unigram_similarity("abc", "abd"), 0.5);
/// assert_eq!(unigram_similarity("", "abc"), 0.0);
/// ```
pub fn unigram_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut counts: HashMap<char, (usize, usize)> = HashMap::new();
    for c in a.chars() {
        counts.entry(c).or_default().0 += 1;
    }
    for c in b.chars() {
        counts.entry(c).or_default().1 += 1;
    }

    let shared: usize = counts.values().map(|&(x, y)| x.min(y)).sum();
    let total = a.chars().count() + b.chars().count();

    shared as f64 / (total - shared) as f64
}

// =============================================================================
// Distance
// =============================================================================

/// Great-circle distance between two stop positions in meters.
///
/// Uses the haversine formula on a spherical Earth (radius 6,371 km),
/// accurate to well under a meter at stop-matching ranges.
#[inline]
pub fn haversine_distance(p: &GeoPoint, q: &GeoPoint) -> f64 {
    let p = Point::new(p.longitude, p.latitude);
    let q = Point::new(q.longitude, q.latitude);
    Haversine::distance(p, q)
}

// =============================================================================
// Directional Text
// =============================================================================

/// Directional markers seen in heading fields, e.g. "Steig 2 Ri Flughafen",
/// "> Marienplatz", "Fahrtrichtung Stadtmitte". The leading `(.*)` is greedy,
/// so the split happens at the last marker occurrence.
const DIRECTION_PATTERN: &str =
    r"^(.*)(eRtg|Ri |>|Ri\.|Rtg|Richt |Fahrtrichtung|Ri-|Ri:|Richtung|Richtg\.|FR )(.*)$";

fn direction_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(DIRECTION_PATTERN).expect("direction pattern must compile"))
}

/// Extract the destination-name fragment from a free-text heading field.
///
/// Heading fields mix platform labels, directional markers, and destination
/// names ("Steig 2 Richtung Flughafen"). This returns the trimmed text after
/// the last directional marker, or `None` when no marker is present — in
/// which case the heading carries no usable directional signal.
///
/// # Example
///
/// ```rust
/// use stop_matcher::similarity::extract_direction;
///
/// assert_eq!(extract_direction("Ri Hauptbahnhof").as_deref(), Some("Hauptbahnhof"));
/// assert_eq!(extract_direction("> Marienplatz").as_deref(), Some("Marienplatz"));
/// assert_eq!(extract_direction("Steig 2"), None);
/// ```
pub fn extract_direction(raw_heading: &str) -> Option<String> {
    let caps = direction_regex().captures(raw_heading)?;
    Some(caps[3].trim().to_string())
}

// =============================================================================
// Unit Tests
// =============================================================================
