//! # Stop Matcher
//!
//! Reconciles two independently maintained transit-stop datasets: an
//! authoritative reference registry (e.g. a regional stop register or
//! GTFS-derived records) and a crowd-sourced set of mapped stop points.
//!
//! For every reference stop the engine retrieves the nearest crowd-sourced
//! points from a spatial index, scores each one with a composite confidence
//! rating (name similarity, geodesic distance, transport-mode compatibility,
//! platform-identifier correlation, directional agreement), prunes implausible
//! candidates, and persists the ranked candidate lists to SQLite for a
//! downstream disambiguation step.
//!
//! ## Quick Start
//!
//! ```rust
//! use stop_matcher::{
//!     rank_candidates, CandidateStop, GeoPoint, MatchConfig, ReferenceStop, TransitMode,
//! };
//!
//! let reference = ReferenceStop {
//!     id: "de:08111:6008:0:1".to_string(),
//!     short_name: Some("Hauptbahnhof".to_string()),
//!     position: Some(GeoPoint::new(48.7838, 9.1821)),
//!     mode: Some(TransitMode::Train),
//!     ..ReferenceStop::default()
//! };
//!
//! let candidate = CandidateStop {
//!     id: "n123456".to_string(),
//!     name: Some("Hauptbahnhof".to_string()),
//!     position: Some(GeoPoint::new(48.7840, 9.1823)),
//!     mode: Some(TransitMode::Train),
//!     ..CandidateStop::default()
//! };
//!
//! let matches = rank_candidates(&reference, [&candidate], &MatchConfig::default());
//! assert_eq!(matches.len(), 1);
//! assert_eq!(matches[0].name_distance, 1.0);
//! assert!(matches[0].rating > 0.0 && matches[0].rating < 1.0);
//! ```
//!
//! ## Pipeline
//!
//! [`StopMatcher`] drives the full batch run against a SQLite database whose
//! input relations (`reference_stops`, `candidate_stops`) have been populated
//! by an importer:
//!
//! 1. load all candidate stops and bulk-build the [`StopIndex`];
//! 2. for each reference stop with a coordinate, query the k nearest
//!    candidates, rank them, and record the survivors in a
//!    [`MatchAccumulator`];
//! 3. export the accumulated matches as the ranked `candidates` relation and
//!    stage the empty `matches` output relation for the external
//!    disambiguation step.
//!
//! The run is single-threaded, deterministic, and idempotent per input
//! snapshot: re-running after fixing the input is the recovery path.

use anyhow::Result;
use log::{debug, info};
use rusqlite::Connection;

pub mod accumulator;
pub mod index;
pub mod ranking;
pub mod similarity;
pub mod store;

pub use accumulator::MatchAccumulator;
pub use index::StopIndex;
pub use ranking::{is_major_interchange, rank_candidates};

// ============================================================================
// Core Types
// ============================================================================

/// A WGS84 coordinate with latitude and longitude in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a new coordinate.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check that the coordinate is finite and within WGS84 range.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Transport mode of a stop.
///
/// [`TransitMode::Rail`] is the unspecific rail family (wire value
/// `trainish`): rail-like points whose tagging does not distinguish heavy
/// rail from light rail. It is compatible with both [`TransitMode::Train`]
/// and [`TransitMode::LightRail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitMode {
    Bus,
    Tram,
    Train,
    LightRail,
    Rail,
}

impl TransitMode {
    /// Parse the mode text used in the input relations. Unknown or empty
    /// values degrade to `None` rather than failing the load.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "bus" => Some(Self::Bus),
            "tram" => Some(Self::Tram),
            "train" => Some(Self::Train),
            "light_rail" => Some(Self::LightRail),
            "trainish" => Some(Self::Rail),
            _ => None,
        }
    }

    /// Whether this mode belongs to the rail family
    /// (tram, train, light rail, or unspecific rail).
    pub fn is_rail(self) -> bool {
        matches!(self, Self::Tram | Self::Train | Self::LightRail | Self::Rail)
    }
}

/// One authoritative stop/platform record from the reference registry.
///
/// Read-only during matching. Any field other than `id` may be missing in
/// real-world data; absence degrades the corresponding ranking signal rather
/// than failing the run.
#[derive(Debug, Clone, Default)]
pub struct ReferenceStop {
    /// Structured, colon-delimited identifier. With more than three colon
    /// separators, the suffix after the last colon encodes a platform number.
    pub id: String,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    /// Stops without a coordinate are excluded from matching.
    pub position: Option<GeoPoint>,
    pub mode: Option<TransitMode>,
    /// Identifier of the parent station, if this record is a platform.
    pub parent_id: Option<String>,
    /// Free-text direction/heading field, e.g. "Steig 2 Richtung Flughafen".
    pub heading: Option<String>,
    /// Administrative area names, stripped from directional text before
    /// comparison so that area fragments do not dominate the similarity.
    pub locality: Option<String>,
    pub municipality: Option<String>,
}

/// One crowd-sourced stop point.
#[derive(Debug, Clone, Default)]
pub struct CandidateStop {
    pub id: String,
    pub name: Option<String>,
    pub network: Option<String>,
    pub operator: Option<String>,
    /// Points without a coordinate never enter the spatial index.
    pub position: Option<GeoPoint>,
    pub mode: Option<TransitMode>,
    /// Stop-vs-platform classification of the mapped point.
    pub stop_type: Option<String>,
    /// External reference code. When it equals a reference stop's identifier
    /// exactly, that pair is an authoritative cross-reference.
    pub ref_code: Option<String>,
    /// Names of adjacent stops in travel direction, comma-separated.
    pub next_stops: Option<String>,
    /// Names of adjacent stops against travel direction, comma-separated.
    pub prev_stops: Option<String>,
    /// Platform number inferred by the importer, as text.
    pub assumed_platform: Option<String>,
}

/// A scored association between one reference stop and one candidate stop.
///
/// Immutable once created; only produced for pairs that passed every pruning
/// rule of the ranking algorithm. Persisted verbatim by the export step.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub reference_id: String,
    pub candidate_id: String,
    /// Composite confidence rating; higher is better. 1.0 is reserved for
    /// exact authoritative cross-references.
    pub rating: f64,
    /// Geodesic distance between the two stops in meters.
    pub distance: f64,
    /// Best name similarity over the reference stop's short and long names.
    pub name_distance: f64,
    /// Platform suffix of the reference identifier equals the candidate's
    /// assumed platform.
    pub platform_matches: bool,
    /// Directional agreement: +1 when the reference heading matches the
    /// candidate's onward neighbours, -1 when it matches the reverse
    /// neighbours, 0 when undecided.
    pub successor_rating: i8,
    /// Mode compatibility: 1.0 compatible, 0.7 unknown, 0.0 conflicting.
    pub mode_rating: f64,
}

/// Tuning constants for the ranking algorithm.
///
/// All values are fixed, hand-tuned constants; there is no learned scoring.
/// The defaults reproduce the behavior the downstream disambiguation and
/// statistics steps were calibrated against.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Hard distance cutoff in meters. Candidates beyond this radius never
    /// match, and since neighbours arrive in ascending distance order the
    /// per-stop scan stops at the first one past it. Default: 400.0
    pub max_match_distance: f64,

    /// Nearest-neighbour pool size for ordinary stops. Default: 10
    pub candidate_pool_size: usize,

    /// Pool size for major interchanges (stations, bus terminals, airports),
    /// which have many platforms close together. Default: 15
    pub interchange_pool_size: usize,

    /// Fixed name similarity assumed when either side has no name at all.
    /// Prevents two missing names from counting as a perfect match.
    /// Default: 0.3
    pub missing_name_similarity: f64,

    /// Sequential-dedup cutoff: a candidate whose name similarity is below
    /// this AND worse than the previously kept candidate's is dropped.
    /// Default: 0.3
    pub weak_name_cutoff: f64,

    /// Candidates rated below this are discarded outright. Default: 0.001
    pub min_rating: f64,

    /// Mode compatibility score when either side's mode is unknown.
    /// Default: 0.7
    pub unknown_mode_rating: f64,

    /// Directional similarity above which a neighbour list counts as
    /// agreeing with the heading. Default: 0.7
    pub successor_accept: f64,

    /// Directional similarity below which the opposite neighbour list counts
    /// as disagreeing. Default: 0.6
    pub successor_reject: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            max_match_distance: 400.0,
            candidate_pool_size: 10,
            interchange_pool_size: 15,
            missing_name_similarity: 0.3,
            weak_name_cutoff: 0.3,
            min_rating: 0.001,
            unknown_mode_rating: 0.7,
            successor_accept: 0.7,
            successor_reject: 0.6,
        }
    }
}

/// Counters reported by a completed [`StopMatcher::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchSummary {
    /// Reference stops considered (those with a coordinate).
    pub reference_stops: usize,
    /// Reference stops with at least one surviving match candidate.
    pub matched_stops: usize,
    /// Total match candidates exported.
    pub match_candidates: usize,
    /// Candidate stops loaded into the spatial index.
    pub indexed_candidates: usize,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Batch driver for one full matching run against a SQLite database.
///
/// Expects the `reference_stops` and `candidate_stops` relations to be
/// populated (see [`store::init_input_schema`] for their shape). One
/// `StopMatcher` performs one run; the accumulator is created per run and
/// never shared.
pub struct StopMatcher<'c> {
    db: &'c Connection,
    config: MatchConfig,
}

impl<'c> StopMatcher<'c> {
    /// Create a matcher with the default configuration.
    pub fn new(db: &'c Connection) -> Self {
        Self::with_config(db, MatchConfig::default())
    }

    /// Create a matcher with an explicit configuration.
    pub fn with_config(db: &'c Connection, config: MatchConfig) -> Self {
        Self { db, config }
    }

    /// Execute the full run: index build, per-stop ranking, export.
    ///
    /// Phases are strictly ordered and sequential. Returns the run counters,
    /// or the first unrecoverable store error.
    pub fn run(&self) -> Result<MatchSummary> {
        let candidates = store::load_candidate_stops(self.db)?;
        let index = StopIndex::build(candidates);
        info!("Loaded {} candidate stops into the spatial index", index.len());

        let stops = store::load_reference_stops(self.db)?;
        info!("Matching {} reference stops", stops.len());

        let mut accumulator = MatchAccumulator::new();
        for stop in &stops {
            let Some(position) = stop.position else {
                continue;
            };
            let pool = if is_major_interchange(stop) {
                self.config.interchange_pool_size
            } else {
                self.config.candidate_pool_size
            };
            let neighbours = index.nearest(&position, pool);
            let matches = rank_candidates(stop, neighbours, &self.config);
            debug!("{}: {} match candidates", stop.id, matches.len());
            if !matches.is_empty() {
                accumulator.record(&stop.id, matches);
            }
        }

        let summary = MatchSummary {
            reference_stops: stops.len(),
            matched_stops: accumulator.matched_reference_stops(),
            match_candidates: accumulator.len(),
            indexed_candidates: index.len(),
        };

        store::export_candidates(self.db, &accumulator)?;
        info!(
            "Exported {} match candidates for {} of {} reference stops",
            summary.match_candidates, summary.matched_stops, summary.reference_stops
        );

        if store::spatial_support(self.db)? {
            store::attach_geometry(self.db)?;
        } else {
            info!("Spatial extension not available, skipping geometry columns");
        }

        Ok(summary)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().expect("in-memory db");
        store::init_input_schema(&conn).expect("schema");
        conn
    }

    fn insert_reference(conn: &Connection, id: &str, name: &str, lat: f64, lon: f64, mode: &str) {
        conn.execute(
            "INSERT INTO reference_stops (ref_id, short_name, lat, lon, mode) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            (id, name, lat, lon, mode),
        )
        .expect("insert reference stop");
    }

    fn insert_candidate(conn: &Connection, id: &str, name: &str, lat: f64, lon: f64, mode: &str) {
        conn.execute(
            "INSERT INTO candidate_stops (candidate_id, name, lat, lon, mode) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            (id, name, lat, lon, mode),
        )
        .expect("insert candidate stop");
    }

    fn candidate_rows(conn: &Connection) -> Vec<(String, String, f64)> {
        let mut stmt = conn
            .prepare(
                "SELECT ref_id, candidate_id, rating FROM candidates ORDER BY ref_id, candidate_id",
            )
            .expect("prepare");
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .expect("query")
            .collect::<Result<Vec<_>, _>>()
            .expect("rows")
    }

    #[test]
    fn test_mode_from_wire() {
        assert_eq!(TransitMode::from_wire("bus"), Some(TransitMode::Bus));
        assert_eq!(TransitMode::from_wire("trainish"), Some(TransitMode::Rail));
        assert_eq!(TransitMode::from_wire("ferry"), None);
        assert_eq!(TransitMode::from_wire(""), None);
    }

    #[test]
    fn test_rail_family() {
        assert!(TransitMode::Tram.is_rail());
        assert!(TransitMode::Train.is_rail());
        assert!(TransitMode::LightRail.is_rail());
        assert!(TransitMode::Rail.is_rail());
        assert!(!TransitMode::Bus.is_rail());
    }

    #[test]
    fn test_geo_point_validation() {
        assert!(GeoPoint::new(48.7758, 9.1829).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, 181.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_pipeline_matches_station_and_excludes_bus_point() {
        let conn = test_db();
        insert_reference(&conn, "de:08111:6008", "Hauptbahnhof", 48.0, 8.0, "train");
        // Train point ~50m away with the same name: should match strongly
        insert_candidate(&conn, "n1", "Hauptbahnhof", 48.00045, 8.0, "train");
        // Bus point ~30m away: excluded by the mode family rule
        insert_candidate(&conn, "n2", "Hauptbahnhof Bus", 48.00027, 8.0, "bus");

        let summary = StopMatcher::new(&conn).run().expect("run");
        assert_eq!(summary.reference_stops, 1);
        assert_eq!(summary.matched_stops, 1);
        assert_eq!(summary.match_candidates, 1);
        assert_eq!(summary.indexed_candidates, 2);

        let rows = candidate_rows(&conn);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "de:08111:6008");
        assert_eq!(rows[0].1, "n1");
        // Exact name at ~50m: (1/51)^0.9, well above the pruning floor but
        // below the reserved override value
        assert!(rows[0].2 > 0.01 && rows[0].2 < 1.0);
    }

    #[test]
    fn test_pipeline_skips_reference_without_coordinate() {
        let conn = test_db();
        conn.execute(
            "INSERT INTO reference_stops (ref_id, short_name, mode) VALUES ('x:1', 'Nowhere', 'bus')",
            [],
        )
        .expect("insert");
        insert_candidate(&conn, "n1", "Nowhere", 48.0, 8.0, "bus");

        let summary = StopMatcher::new(&conn).run().expect("run");
        assert_eq!(summary.reference_stops, 0);
        assert_eq!(summary.match_candidates, 0);
    }

    #[test]
    fn test_pipeline_is_idempotent() {
        let conn = test_db();
        insert_reference(&conn, "de:08111:6008:0:1", "Marktplatz", 48.5, 8.5, "bus");
        insert_candidate(&conn, "n10", "Marktplatz", 48.5002, 8.5, "bus");
        insert_candidate(&conn, "n11", "Rathaus", 48.5004, 8.5001, "bus");

        let first_summary = StopMatcher::new(&conn).run().expect("first run");
        let first = candidate_rows(&conn);
        let second_summary = StopMatcher::new(&conn).run().expect("second run");
        let second = candidate_rows(&conn);

        assert_eq!(first_summary, second_summary);
        assert_eq!(first, second);
    }

    #[test]
    fn test_pipeline_interchange_uses_larger_pool() {
        let conn = test_db();
        insert_reference(&conn, "de:08111:6008", "Busbahnhof", 48.0, 8.0, "bus");
        // 12 nearby points with the stop's own name; an ordinary stop would
        // only pull 10 of them from the index
        for i in 0..12 {
            insert_candidate(
                &conn,
                &format!("n{i}"),
                "Busbahnhof",
                48.0 + 0.00002 * (i as f64 + 1.0),
                8.0,
                "bus",
            );
        }

        let summary = StopMatcher::new(&conn).run().expect("run");
        assert_eq!(summary.match_candidates, 12);
    }
}
