//! Basic example of matching official stops against a crowd-sourced dataset.
//!
//! Run with: cargo run --example match_stops

use anyhow::Result;
use rusqlite::Connection;
use stop_matcher::{store, MatchConfig, StopMatcher};

fn main() -> Result<()> {
    env_logger::init();

    let conn = Connection::open_in_memory()?;
    store::init_input_schema(&conn)?;

    // Two official stops (Stuttgart area): a train station and a bus stop
    conn.execute_batch(
        "INSERT INTO reference_stops (ref_id, short_name, lat, lon, mode, heading) VALUES
             ('de:08111:6118', 'Hauptbahnhof', 48.7840, 9.1815, 'train', NULL),
             ('de:08111:2201:0:1', 'Marktplatz', 48.7760, 9.1790, 'bus', 'Ri Charlottenplatz');
         INSERT INTO candidate_stops (candidate_id, name, lat, lon, mode, next_stops) VALUES
             ('n100', 'Stuttgart Hauptbahnhof', 48.7843, 9.1817, 'rail', NULL),
             ('n101', 'Hauptbahnhof', 48.7838, 9.1820, 'bus', NULL),
             ('n200', 'Marktplatz', 48.7761, 9.1792, 'bus', 'Charlottenplatz'),
             ('n201', 'Rathaus', 48.7755, 9.1780, 'bus', NULL);",
    )?;

    let config = MatchConfig::default();
    println!("Stop Matching Example\n");
    println!(
        "Config: max_distance={}m, pool={} ({} at interchanges), min_rating={}\n",
        config.max_match_distance,
        config.candidate_pool_size,
        config.interchange_pool_size,
        config.min_rating
    );

    let summary = StopMatcher::with_config(&conn, config).run()?;
    println!(
        "Matched {} of {} official stops ({} candidates rated, {} stops indexed)\n",
        summary.matched_stops,
        summary.reference_stops,
        summary.match_candidates,
        summary.indexed_candidates
    );

    // Ranked candidates, best first
    let mut stmt = conn.prepare(
        "SELECT ref_id, candidate_id, rating, distance, name_distance
           FROM candidates
          ORDER BY ref_id, rating DESC",
    )?;
    let mut rows = stmt.query([])?;
    println!("Ranked candidates:");
    while let Some(row) = rows.next()? {
        let ref_id: String = row.get(0)?;
        let candidate_id: String = row.get(1)?;
        let rating: f64 = row.get(2)?;
        let distance: f64 = row.get(3)?;
        let name_distance: f64 = row.get(4)?;
        println!(
            "  {ref_id} -> {candidate_id}: rating={rating:.4} ({distance:.0}m, name={name_distance:.2})"
        );
    }

    Ok(())
}
