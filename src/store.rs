//! # Persistent Store
//!
//! SQLite access for the matching engine: loading the two input relations,
//! exporting the ranked `candidates` relation, staging the empty `matches`
//! output relation for the external disambiguation step, and the optional
//! geometry step for visualization.
//!
//! The store is a single shared SQLite database with one writer (this
//! process). Export happens in discrete batches — bulk insert, then index
//! creation, then geometry — and later phases read rows written by earlier
//! ones, so the phase order is fixed. Missing optional data in the input
//! relations maps to `None` and is never an error; an unreachable or
//! ill-shaped relation is, and aborts the run.

use crate::{CandidateStop, GeoPoint, MatchAccumulator, ReferenceStop, TransitMode};
use anyhow::{Context, Result};
use indoc::indoc;
use log::info;
use rusqlite::Connection;

// -----------------------------------------------------------------------------
// Input relations
// -----------------------------------------------------------------------------

/// Create the two empty input relations if they do not exist.
///
/// Importer collaborators (and tests) populate these; the engine itself only
/// reads them.
pub fn init_input_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(indoc! {r#"
        CREATE TABLE IF NOT EXISTS reference_stops (
            ref_id       TEXT NOT NULL,
            short_name   TEXT,
            long_name    TEXT,
            lat          REAL,
            lon          REAL,
            mode         TEXT,
            parent_id    TEXT,
            heading      TEXT,
            locality     TEXT,
            municipality TEXT
        );
        CREATE TABLE IF NOT EXISTS candidate_stops (
            candidate_id     TEXT NOT NULL,
            name             TEXT,
            network          TEXT,
            operator         TEXT,
            lat              REAL,
            lon              REAL,
            mode             TEXT,
            stop_type        TEXT,
            ref_code         TEXT,
            next_stops       TEXT,
            prev_stops       TEXT,
            assumed_platform TEXT
        );
    "#})
    .context("Failed to create input relations")?;
    Ok(())
}

/// Load every reference stop that has a coordinate.
///
/// Rows with a NULL coordinate cannot be matched and are excluded here.
/// Unknown mode strings degrade to `None`.
pub fn load_reference_stops(conn: &Connection) -> Result<Vec<ReferenceStop>> {
    let mut stmt = conn
        .prepare(indoc! {r#"
            SELECT ref_id, short_name, long_name, lat, lon, mode,
                   parent_id, heading, locality, municipality
              FROM reference_stops
             WHERE lat IS NOT NULL AND lon IS NOT NULL
             ORDER BY ref_id
        "#})
        .context("Failed to query reference stops")?;

    let stops = stmt
        .query_map([], |row| {
            Ok(ReferenceStop {
                id: row.get("ref_id")?,
                short_name: row.get("short_name")?,
                long_name: row.get("long_name")?,
                position: parse_position(row.get("lat")?, row.get("lon")?),
                mode: parse_mode(row.get("mode")?),
                parent_id: row.get("parent_id")?,
                heading: row.get("heading")?,
                locality: row.get("locality")?,
                municipality: row.get("municipality")?,
            })
        })
        .context("Failed to read reference stops")?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to map reference stop rows")?;

    Ok(stops)
}

/// Load the full crowd-sourced candidate dataset, including rows without a
/// coordinate (the spatial index leaves those unreachable).
pub fn load_candidate_stops(conn: &Connection) -> Result<Vec<CandidateStop>> {
    let mut stmt = conn
        .prepare(indoc! {r#"
            SELECT candidate_id, name, network, operator, lat, lon, mode,
                   stop_type, ref_code, next_stops, prev_stops, assumed_platform
              FROM candidate_stops
             ORDER BY candidate_id
        "#})
        .context("Failed to query candidate stops")?;

    let stops = stmt
        .query_map([], |row| {
            Ok(CandidateStop {
                id: row.get("candidate_id")?,
                name: row.get("name")?,
                network: row.get("network")?,
                operator: row.get("operator")?,
                position: parse_position(row.get("lat")?, row.get("lon")?),
                mode: parse_mode(row.get("mode")?),
                stop_type: row.get("stop_type")?,
                ref_code: row.get("ref_code")?,
                next_stops: row.get("next_stops")?,
                prev_stops: row.get("prev_stops")?,
                assumed_platform: row.get("assumed_platform")?,
            })
        })
        .context("Failed to read candidate stops")?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to map candidate stop rows")?;

    Ok(stops)
}

fn parse_position(lat: Option<f64>, lon: Option<f64>) -> Option<GeoPoint> {
    match (lat, lon) {
        (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
        _ => None,
    }
}

fn parse_mode(mode: Option<String>) -> Option<TransitMode> {
    mode.as_deref().and_then(TransitMode::from_wire)
}

// -----------------------------------------------------------------------------
// Candidate export
// -----------------------------------------------------------------------------

/// Persist the accumulated match candidates.
///
/// Recreates the `candidates` relation, bulk-inserts every match in one
/// transaction, builds the two descending-rating lookup indexes, preserves a
/// previous run's `matches` table as `matches_backup`, and stages a fresh
/// empty `matches` relation with the same shape for the external
/// disambiguation step.
pub fn export_candidates(conn: &Connection, accumulator: &MatchAccumulator) -> Result<()> {
    conn.execute("DROP TABLE IF EXISTS candidates", [])
        .context("Failed to drop previous candidates relation")?;
    conn.execute(
        indoc! {r#"
            CREATE TABLE candidates (
                ref_id           TEXT NOT NULL,
                candidate_id     TEXT NOT NULL,
                rating           REAL NOT NULL,
                distance         REAL NOT NULL,
                name_distance    REAL NOT NULL,
                platform_matches INTEGER NOT NULL,
                successor_rating INTEGER NOT NULL,
                mode_rating      REAL NOT NULL
            )
        "#},
        [],
    )
    .context("Failed to create candidates relation")?;

    let tx = conn
        .unchecked_transaction()
        .context("Failed to begin export transaction")?;
    {
        let mut insert = tx
            .prepare_cached(indoc! {r#"
                INSERT INTO candidates (ref_id, candidate_id, rating, distance,
                                        name_distance, platform_matches,
                                        successor_rating, mode_rating)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#})
            .context("Failed to prepare candidate insert")?;

        // Stable export order keeps re-runs on an unchanged snapshot
        // byte-identical
        let mut entries: Vec<_> = accumulator.iter_by_reference().collect();
        entries.sort_by_key(|(reference_id, _)| *reference_id);

        for (_, matches) in entries {
            for m in matches {
                insert
                    .execute((
                        &m.reference_id,
                        &m.candidate_id,
                        m.rating,
                        m.distance,
                        m.name_distance,
                        m.platform_matches,
                        m.successor_rating,
                        m.mode_rating,
                    ))
                    .context("Failed to insert match candidate")?;
            }
        }
    }
    tx.commit().context("Failed to commit candidate export")?;

    conn.execute(
        "CREATE INDEX candidates_by_candidate ON candidates (candidate_id, rating DESC)",
        [],
    )
    .context("Failed to index candidates by candidate stop")?;
    conn.execute(
        "CREATE INDEX candidates_by_reference ON candidates (ref_id, rating DESC)",
        [],
    )
    .context("Failed to index candidates by reference stop")?;

    if table_exists(conn, "matches")? {
        conn.execute("DROP TABLE IF EXISTS matches_backup", [])
            .context("Failed to drop previous matches backup")?;
        conn.execute("ALTER TABLE matches RENAME TO matches_backup", [])
            .context("Failed to back up previous matches relation")?;
        info!("Preserved previous matches relation as matches_backup");
    }
    conn.execute("CREATE TABLE matches AS SELECT * FROM candidates WHERE 0", [])
        .context("Failed to stage empty matches relation")?;

    Ok(())
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )
        .with_context(|| format!("Failed to check for table {name}"))?;
    Ok(count > 0)
}

// -----------------------------------------------------------------------------
// Geometry (optional)
// -----------------------------------------------------------------------------

/// Whether the connection exposes the spatial extension needed for geometry
/// columns.
///
/// An explicit capability probe: geometry is skipped when this returns
/// false, and real failures while the capability is present are surfaced
/// instead of being swallowed.
pub fn spatial_support(conn: &Connection) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT count(*) FROM pragma_function_list WHERE name = 'AddGeometryColumn'",
            [],
            |row| row.get(0),
        )
        .context("Failed to probe for spatial extension")?;
    Ok(count > 0)
}

/// Materialize visualization geometry: a point per candidate stop and a
/// line from each exported candidate/match row's candidate stop to its
/// reference stop.
///
/// Requires [`spatial_support`]; callers check the capability first.
pub fn attach_geometry(conn: &Connection) -> Result<()> {
    conn.query_row("SELECT InitSpatialMetaData()", [], |_row| Ok(()))
        .context("Failed to initialize spatial metadata")?;

    for (table, kind) in [
        ("candidate_stops", "POINT"),
        ("matches", "LINESTRING"),
        ("candidates", "LINESTRING"),
    ] {
        if column_exists(conn, table, "the_geom")? {
            continue;
        }
        conn.query_row(
            &format!("SELECT AddGeometryColumn('{table}', 'the_geom', 4326, '{kind}', 'XY')"),
            [],
            |_row| Ok(()),
        )
        .with_context(|| format!("Failed to add geometry column to {table}"))?;
    }

    conn.execute(
        "UPDATE candidate_stops SET the_geom = MakePoint(lon, lat, 4326)",
        [],
    )
    .context("Failed to set candidate stop geometry")?;

    for table in ["matches", "candidates"] {
        conn.execute(
            &format!(indoc! {r#"
                UPDATE {table} SET the_geom = (
                    SELECT LineFromText('LINESTRING(' || o.lon || ' ' || o.lat || ', '
                                                     || n.lon || ' ' || n.lat || ')', 4326)
                      FROM candidate_stops o, reference_stops n
                     WHERE o.candidate_id = {table}.candidate_id
                       AND {table}.ref_id = n.ref_id
                       AND n.lat IS NOT NULL
                )
            "#}, table = table),
            [],
        )
        .with_context(|| format!("Failed to set {table} geometry"))?;
    }

    info!("Attached visualization geometry");
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT count(*) FROM pragma_table_info(?1) WHERE name = ?2",
            [table, column],
            |row| row.get(0),
        )
        .with_context(|| format!("Failed to inspect columns of {table}"))?;
    Ok(count > 0)
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MatchCandidate;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().expect("in-memory db");
        init_input_schema(&conn).expect("schema");
        conn
    }

    fn sample_match(reference_id: &str, candidate_id: &str, rating: f64) -> MatchCandidate {
        MatchCandidate {
            reference_id: reference_id.to_string(),
            candidate_id: candidate_id.to_string(),
            rating,
            distance: 42.0,
            name_distance: 0.8,
            platform_matches: true,
            successor_rating: 1,
            mode_rating: 1.0,
        }
    }

    #[test]
    fn test_load_empty_relations() {
        let conn = test_db();
        assert!(load_reference_stops(&conn).expect("load").is_empty());
        assert!(load_candidate_stops(&conn).expect("load").is_empty());
    }

    #[test]
    fn test_load_maps_nulls_and_unknown_modes() {
        let conn = test_db();
        conn.execute(
            "INSERT INTO reference_stops (ref_id, lat, lon, mode) VALUES ('r:1', 48.0, 8.0, 'zeppelin')",
            [],
        )
        .expect("insert");
        conn.execute(
            "INSERT INTO candidate_stops (candidate_id, name, mode) VALUES ('n1', NULL, 'bus')",
            [],
        )
        .expect("insert");

        let refs = load_reference_stops(&conn).expect("load");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].id, "r:1");
        assert_eq!(refs[0].mode, None);
        assert_eq!(refs[0].short_name, None);
        assert!(refs[0].position.is_some());

        let cands = load_candidate_stops(&conn).expect("load");
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].name, None);
        assert_eq!(cands[0].mode, Some(TransitMode::Bus));
        assert_eq!(cands[0].position, None);
    }

    #[test]
    fn test_reference_load_excludes_null_coordinates() {
        let conn = test_db();
        conn.execute(
            "INSERT INTO reference_stops (ref_id, lat, lon) VALUES ('r:1', NULL, NULL)",
            [],
        )
        .expect("insert");
        conn.execute(
            "INSERT INTO reference_stops (ref_id, lat, lon) VALUES ('r:2', 48.0, 8.0)",
            [],
        )
        .expect("insert");

        let refs = load_reference_stops(&conn).expect("load");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].id, "r:2");
    }

    #[test]
    fn test_export_persists_rows_and_indexes() {
        let conn = test_db();
        let mut acc = MatchAccumulator::new();
        acc.record("r:2", vec![sample_match("r:2", "n1", 0.5)]);
        acc.record("r:1", vec![sample_match("r:1", "n1", 0.9), sample_match("r:1", "n2", 0.1)]);

        export_candidates(&conn, &acc).expect("export");

        let rows: Vec<(String, String)> = {
            let mut stmt = conn
                .prepare("SELECT ref_id, candidate_id FROM candidates")
                .expect("prepare");
            stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .expect("query")
                .collect::<Result<_, _>>()
                .expect("rows")
        };
        // Insert order is sorted by reference id
        assert_eq!(
            rows,
            vec![
                ("r:1".to_string(), "n1".to_string()),
                ("r:1".to_string(), "n2".to_string()),
                ("r:2".to_string(), "n1".to_string()),
            ]
        );

        let indexes: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'index' \
                 AND name IN ('candidates_by_candidate', 'candidates_by_reference')",
                [],
                |row| row.get(0),
            )
            .expect("indexes");
        assert_eq!(indexes, 2);

        // The staged output relation exists, has the same shape, and is empty
        let staged: i64 = conn
            .query_row("SELECT count(*) FROM matches", [], |row| row.get(0))
            .expect("staged");
        assert_eq!(staged, 0);
        assert!(column_exists(&conn, "matches", "successor_rating").expect("columns"));
    }

    #[test]
    fn test_export_backs_up_previous_matches() {
        let conn = test_db();
        let mut acc = MatchAccumulator::new();
        acc.record("r:1", vec![sample_match("r:1", "n1", 0.9)]);

        export_candidates(&conn, &acc).expect("first export");
        // Simulate the external disambiguation step committing a match
        conn.execute(
            "INSERT INTO matches SELECT * FROM candidates",
            [],
        )
        .expect("commit match");

        export_candidates(&conn, &acc).expect("second export");

        let backed_up: i64 = conn
            .query_row("SELECT count(*) FROM matches_backup", [], |row| row.get(0))
            .expect("backup");
        assert_eq!(backed_up, 1);
        let staged: i64 = conn
            .query_row("SELECT count(*) FROM matches", [], |row| row.get(0))
            .expect("staged");
        assert_eq!(staged, 0);
    }

    #[test]
    fn test_export_empty_accumulator() {
        let conn = test_db();
        export_candidates(&conn, &MatchAccumulator::new()).expect("export");

        let rows: i64 = conn
            .query_row("SELECT count(*) FROM candidates", [], |row| row.get(0))
            .expect("rows");
        assert_eq!(rows, 0);
    }

    #[test]
    fn test_spatial_support_absent_on_stock_sqlite() {
        let conn = test_db();
        assert!(!spatial_support(&conn).expect("probe"));
    }
}
