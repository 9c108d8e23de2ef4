//! # Candidate Ranking
//!
//! The multi-factor confidence ranking at the heart of the matching engine.
//!
//! For one reference stop and its nearest-neighbour pool, [`rank_candidates`]
//! walks the pool in ascending distance order and keeps every candidate that
//! survives the pruning rules, scored by [`rate_candidate`]. The composite
//! rating starts from name similarity damped by distance and is then raised
//! to an exponent that shrinks with every corroborating signal — directional
//! agreement, mode compatibility, platform agreement — which pushes the
//! rating of a base fraction towards 1. A contradicting directional signal
//! grows the exponent instead and lowers the rating.
//!
//! Ratings are deterministic and explainable: every kept match carries the
//! individual signal values it was computed from, and every rejected
//! candidate is logged with its reason.

use crate::similarity::{extract_direction, haversine_distance, unigram_similarity};
use crate::{CandidateStop, MatchCandidate, MatchConfig, ReferenceStop, TransitMode};
use log::{debug, info};

/// Name fragments marking stops that serve as major interchanges: station
/// names ("ahnhof" catches Bahnhof and its compounds), central bus terminals,
/// school centers, airports, and the abbreviated station marker.
const INTERCHANGE_MARKERS: [&str; 5] = ["ahnhof", "ZOB", "Schulzentrum", "Flughafen", " Bf"];

/// Whether a reference stop looks like a major interchange.
///
/// Interchanges bundle many platforms within walking distance, so matching
/// uses a larger nearest-neighbour pool for them. Checks the short name,
/// falling back to the long name when the short name is absent or empty.
pub fn is_major_interchange(stop: &ReferenceStop) -> bool {
    let name = stop
        .short_name
        .as_deref()
        .filter(|s| !s.is_empty())
        .or(stop.long_name.as_deref());

    name.is_some_and(|name| INTERCHANGE_MARKERS.iter().any(|marker| name.contains(marker)))
}

/// Mode compatibility score between a reference stop and a candidate.
///
/// 1.0 for an exact mode match or a generic-rail candidate against a train
/// or light-rail reference; the configured unknown score (default 0.7) when
/// either side's mode is missing; 0.0 for conflicting modes.
pub fn mode_rating(stop: &ReferenceStop, candidate: &CandidateStop, config: &MatchConfig) -> f64 {
    match (stop.mode, candidate.mode) {
        (Some(stop_mode), Some(candidate_mode)) => {
            let compatible = match candidate_mode {
                TransitMode::Rail => {
                    matches!(stop_mode, TransitMode::Train | TransitMode::LightRail)
                }
                other => other == stop_mode,
            };
            if compatible {
                1.0
            } else {
                0.0
            }
        }
        _ => config.unknown_mode_rating,
    }
}

/// Directional agreement between a reference stop's heading and a
/// candidate's recorded adjacent-stop names.
///
/// Extracts the destination fragment from the heading, strips the stop's
/// administrative-area names from both sides, and compares against the
/// candidate's onward and reverse neighbour lists:
///
/// - `+1` — heading clearly matches the onward neighbours,
/// - `-1` — heading clearly matches the reverse neighbours (the candidate
///   points the wrong way),
/// - `0` — no heading, no marker, or no clear winner.
pub fn successor_rating(
    stop: &ReferenceStop,
    candidate: &CandidateStop,
    config: &MatchConfig,
) -> i8 {
    let Some(heading) = stop.heading.as_deref() else {
        return 0;
    };
    let Some(direction) = extract_direction(heading) else {
        return 0;
    };

    let direction = strip_area_names(&direction, stop).replace(',', " ");
    let next = candidate
        .next_stops
        .as_deref()
        .map(|s| strip_area_names(s, stop));
    let prev = candidate
        .prev_stops
        .as_deref()
        .map(|s| strip_area_names(s, stop));

    let similarity_next = next.map_or(0.0, |s| unigram_similarity(&direction, &s));
    let similarity_prev = prev.map_or(0.0, |s| unigram_similarity(&direction, &s));

    if similarity_next > config.successor_accept && similarity_prev < config.successor_reject {
        1
    } else if similarity_prev > config.successor_accept && similarity_next < config.successor_reject
    {
        -1
    } else {
        0
    }
}

/// Remove the stop's administrative-area names from directional text, so
/// that a shared town name does not make every direction look similar.
fn strip_area_names(text: &str, stop: &ReferenceStop) -> String {
    let mut out = text.to_string();
    for area in [stop.locality.as_deref(), stop.municipality.as_deref()]
        .into_iter()
        .flatten()
    {
        if !area.is_empty() {
            out = out.replace(area, "");
        }
    }
    out
}

/// Platform suffix of a structured identifier: the part after the last
/// colon, present only when the identifier has more than three colon
/// separators (otherwise the id names a stop, not a platform).
fn platform_suffix(id: &str) -> Option<&str> {
    if id.matches(':').count() > 3 {
        id.rsplit(':').next()
    } else {
        None
    }
}

/// The individual signals and composite rating for one reference/candidate
/// pair, before pruning decides whether the pair becomes a match candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRating {
    pub rating: f64,
    pub name_distance: f64,
    pub platform_matches: bool,
    pub successor_rating: i8,
    pub mode_rating: f64,
}

/// Compute the composite confidence rating for one candidate at a known
/// geodesic distance.
///
/// Name similarity is the better of the short-name and long-name
/// comparisons; when the reference stop has no name at all, or the candidate
/// has none, the fixed missing-name similarity takes its place. An exact
/// external cross-reference (`candidate.ref_code == stop.id`) short-circuits
/// everything with a rating of 1.0.
pub fn rate_candidate(
    stop: &ReferenceStop,
    candidate: &CandidateStop,
    distance: f64,
    config: &MatchConfig,
) -> CandidateRating {
    let candidate_name = candidate.name.as_deref().unwrap_or("");
    let short_name = stop.short_name.as_deref().unwrap_or("");
    let long_name = stop.long_name.as_deref().unwrap_or("");

    let mut similarity_short = unigram_similarity(short_name, candidate_name);
    let mut similarity_long = unigram_similarity(long_name, candidate_name);
    if short_name.is_empty() && long_name.is_empty() {
        debug!("Reference stop {} has no name, using fixed name similarity", stop.id);
        similarity_short = config.missing_name_similarity;
    } else if candidate_name.is_empty() {
        debug!("Candidate stop {} has no name, using fixed name similarity", candidate.id);
        similarity_short = config.missing_name_similarity;
        similarity_long = config.missing_name_similarity;
    }
    let name_distance = similarity_short.max(similarity_long);

    let platform_id = platform_suffix(&stop.id);
    let platform_matches =
        platform_id.is_some() && platform_id == candidate.assumed_platform.as_deref();
    let platform_mismatches =
        platform_id.is_some() && candidate.assumed_platform.is_some() && !platform_matches;

    let mode_rating = mode_rating(stop, candidate, config);
    let successor_rating = successor_rating(stop, candidate, config);

    let rating = if candidate.ref_code.as_deref() == Some(stop.id.as_str()) {
        // Authoritative cross-reference: trust it over every other signal
        1.0
    } else {
        let mut base = name_distance / (1.0 + distance);
        if platform_mismatches {
            base *= 0.5;
        }
        let platform_boost = if platform_matches { 1.0 } else { 0.0 };
        let exponent = 1.0
            - f64::from(successor_rating) * 0.2
            - mode_rating * 0.1
            - mode_rating * platform_boost * 0.5;
        base.powf(exponent)
    };

    CandidateRating {
        rating,
        name_distance,
        platform_matches,
        successor_rating,
        mode_rating,
    }
}

/// Rank a reference stop's nearest-neighbour pool into its surviving match
/// candidates, in retrieval order.
///
/// `neighbours` must be in ascending distance order (the [`crate::StopIndex`]
/// contract): the first candidate beyond the distance cutoff ends the scan.
/// Candidates are dropped by the mode-family exclusion (rail-family point
/// for a bus stop or vice versa), by the sequential-dedup rule (a textually
/// weak candidate following a textually better one), and by the minimum
/// rating floor. The result is never re-sorted by rating.
pub fn rank_candidates<'a, I>(
    stop: &ReferenceStop,
    neighbours: I,
    config: &MatchConfig,
) -> Vec<MatchCandidate>
where
    I: IntoIterator<Item = &'a CandidateStop>,
{
    let mut matches = Vec::new();
    let Some(origin) = stop.position else {
        return matches;
    };

    let mut last_name_distance = 0.0_f64;
    for candidate in neighbours {
        let Some(position) = candidate.position else {
            continue;
        };
        let distance = haversine_distance(&origin, &position);
        if distance > config.max_match_distance {
            // Ascending distance order: no later neighbour can qualify
            return matches;
        }

        if let (Some(stop_mode), Some(candidate_mode)) = (stop.mode, candidate.mode) {
            // A bus stop never matches a rail-family point and vice versa
            if candidate_mode.is_rail() && stop_mode == TransitMode::Bus {
                continue;
            }
            if candidate_mode == TransitMode::Bus
                && matches!(
                    stop_mode,
                    TransitMode::Tram | TransitMode::LightRail | TransitMode::Train
                )
            {
                continue;
            }
        }

        let rated = rate_candidate(stop, candidate, distance, config);
        if last_name_distance > rated.name_distance && rated.name_distance < config.weak_name_cutoff
        {
            info!(
                "Ignoring {} for {}: name similarity {:.3} dropped below earlier candidate",
                candidate.id, stop.id, rated.name_distance
            );
            continue;
        }
        if rated.rating < config.min_rating {
            info!(
                "Ignoring {} for {}: rating {:.5} below floor",
                candidate.id, stop.id, rated.rating
            );
            continue;
        }

        debug!(
            "{} might match {} at {:.1}m, name similarity {:.3}, rating {:.4}",
            stop.id, candidate.id, distance, rated.name_distance, rated.rating
        );
        matches.push(MatchCandidate {
            reference_id: stop.id.clone(),
            candidate_id: candidate.id.clone(),
            rating: rated.rating,
            distance,
            name_distance: rated.name_distance,
            platform_matches: rated.platform_matches,
            successor_rating: rated.successor_rating,
            mode_rating: rated.mode_rating,
        });
        last_name_distance = rated.name_distance;
    }

    matches
}
