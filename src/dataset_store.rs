use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::dataset::Dataset;
use crate::discipline::{Exposure, ZoneDisciplineRecord};
use crate::features::RawTeamMatchFeatures;
use crate::standardize::{NormSet, TeamMatchFeatures};
use crate::zones::ZoneGrid;

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS team_matches (
            match_id INTEGER NOT NULL,
            team TEXT NOT NULL,
            opponent TEXT NOT NULL,
            referee TEXT NULL,
            home INTEGER NOT NULL,
            competition_id INTEGER NULL,
            season_id INTEGER NULL,
            features_json TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (match_id, team)
        );
        CREATE INDEX IF NOT EXISTS idx_team_matches_referee ON team_matches(referee);
        CREATE TABLE IF NOT EXISTS zone_records (
            match_id INTEGER NOT NULL,
            team TEXT NOT NULL,
            zone_id INTEGER NOT NULL,
            fouls INTEGER NOT NULL,
            yellow_cards INTEGER NOT NULL,
            red_cards INTEGER NOT NULL,
            opp_passes REAL NOT NULL,
            minutes REAL NOT NULL,
            PRIMARY KEY (match_id, team, zone_id)
        );
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )
    .context("init dataset schema")?;
    Ok(())
}

/// Replaces the stored dataset in one transaction.
pub fn save_dataset(conn: &mut Connection, dataset: &Dataset) -> Result<()> {
    let tx = conn.transaction().context("begin dataset tx")?;
    tx.execute("DELETE FROM team_matches", [])?;
    tx.execute("DELETE FROM zone_records", [])?;
    let now = Utc::now().to_rfc3339();
    {
        let mut stmt = tx.prepare(
            "INSERT INTO team_matches (match_id, team, opponent, referee, home, competition_id, \
             season_id, features_json, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for row in &dataset.raw {
            let features = serde_json::to_string(&row.values).context("serialize features")?;
            stmt.execute(params![
                row.match_id as i64,
                row.team,
                row.opponent,
                row.referee,
                row.home as i64,
                row.competition_id.map(|v| v as i64),
                row.season_id.map(|v| v as i64),
                features,
                now,
            ])?;
        }
        let mut stmt = tx.prepare(
            "INSERT INTO zone_records (match_id, team, zone_id, fouls, yellow_cards, red_cards, \
             opp_passes, minutes) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for r in &dataset.records {
            stmt.execute(params![
                r.match_id as i64,
                r.team,
                r.zone_id as i64,
                r.fouls,
                r.yellow_cards,
                r.red_cards,
                r.exposure.opp_passes,
                r.exposure.minutes,
            ])?;
        }
    }
    put_meta(&tx, "grid", &serde_json::to_string(&dataset.grid)?)?;
    put_meta(&tx, "norms", &serde_json::to_string(&dataset.norms)?)?;
    put_meta(&tx, "saved_at", &now)?;
    tx.commit().context("commit dataset tx")?;
    Ok(())
}

fn put_meta(tx: &rusqlite::Transaction<'_>, key: &str, value: &str) -> Result<()> {
    tx.execute(
        "INSERT INTO meta (key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )
    .with_context(|| format!("write meta {key}"))?;
    Ok(())
}

fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row("SELECT value FROM meta WHERE key = ?1", params![key], |r| r.get(0))
        .optional()
        .with_context(|| format!("read meta {key}"))
}

/// Loads the dataset with the norms it was saved with, so z-scores match the
/// ones the models were fitted on.
pub fn load_dataset(conn: &Connection) -> Result<Dataset> {
    let grid: ZoneGrid = match get_meta(conn, "grid")? {
        Some(raw) => serde_json::from_str(&raw).context("parse stored grid")?,
        None => return Err(anyhow!("dataset store is empty")),
    };
    grid.validate()?;
    let raw = load_raw_rows(conn, None)?;
    let records = load_zone_records(conn)?;
    let dataset = match get_meta(conn, "norms")? {
        Some(json) => {
            let norms: NormSet = serde_json::from_str(&json).context("parse stored norms")?;
            Dataset::with_norms(grid, norms, raw, records)
        }
        None => Dataset::assemble(grid, raw, records),
    };
    Ok(dataset)
}

/// Standardized rows for one match, empty when the match was never ingested.
pub fn load_team_match(conn: &Connection, match_id: u64) -> Result<Vec<TeamMatchFeatures>> {
    let Some(json) = get_meta(conn, "norms")? else {
        return Ok(Vec::new());
    };
    let norms: NormSet = serde_json::from_str(&json).context("parse stored norms")?;
    let rows = load_raw_rows(conn, Some(match_id))?;
    Ok(rows.iter().map(|r| norms.standardize(r)).collect())
}

fn load_raw_rows(conn: &Connection, match_id: Option<u64>) -> Result<Vec<RawTeamMatchFeatures>> {
    let mut stmt = conn.prepare(
        "SELECT match_id, team, opponent, referee, home, competition_id, season_id, features_json \
         FROM team_matches WHERE (?1 IS NULL OR match_id = ?1) ORDER BY match_id, team",
    )?;
    let rows = stmt.query_map(params![match_id.map(|v| v as i64)], |r| {
        Ok((
            r.get::<_, i64>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
            r.get::<_, Option<String>>(3)?,
            r.get::<_, i64>(4)?,
            r.get::<_, Option<i64>>(5)?,
            r.get::<_, Option<i64>>(6)?,
            r.get::<_, String>(7)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (match_id, team, opponent, referee, home, competition_id, season_id, json) = row?;
        let values = serde_json::from_str(&json)
            .with_context(|| format!("parse features for {match_id}/{team}"))?;
        out.push(RawTeamMatchFeatures {
            match_id: match_id as u64,
            team,
            opponent,
            referee,
            home: home != 0,
            competition_id: competition_id.map(|v| v as u64),
            season_id: season_id.map(|v| v as u64),
            values,
        });
    }
    Ok(out)
}

fn load_zone_records(conn: &Connection) -> Result<Vec<ZoneDisciplineRecord>> {
    let mut stmt = conn.prepare(
        "SELECT match_id, team, zone_id, fouls, yellow_cards, red_cards, opp_passes, minutes \
         FROM zone_records ORDER BY match_id, team, zone_id",
    )?;
    let rows = stmt.query_map([], |r| {
        Ok(ZoneDisciplineRecord {
            match_id: r.get::<_, i64>(0)? as u64,
            team: r.get(1)?,
            zone_id: r.get::<_, i64>(2)? as usize,
            fouls: r.get(3)?,
            yellow_cards: r.get(4)?,
            red_cards: r.get(5)?,
            exposure: Exposure {
                opp_passes: r.get(6)?,
                minutes: r.get(7)?,
            },
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("read zone records")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    fn sample_dataset() -> Dataset {
        let raw = vec![RawTeamMatchFeatures {
            match_id: 42,
            team: "A".into(),
            opponent: "B".into(),
            referee: Some("Ref".into()),
            home: true,
            competition_id: Some(1),
            season_id: Some(2),
            values: [("ppda".to_string(), 9.5)].into_iter().collect(),
        }];
        let records = vec![ZoneDisciplineRecord {
            match_id: 42,
            team: "A".into(),
            zone_id: 3,
            fouls: 2,
            yellow_cards: 1,
            red_cards: 0,
            exposure: Exposure {
                opp_passes: 410.0,
                minutes: 94.0,
            },
        }];
        Dataset::assemble(ZoneGrid::default(), raw, records)
    }

    #[test]
    fn dataset_survives_store_roundtrip() {
        let mut conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let ds = sample_dataset();
        save_dataset(&mut conn, &ds).unwrap();
        let back = load_dataset(&conn).unwrap();
        assert_eq!(back.raw, ds.raw);
        assert_eq!(back.records, ds.records);
        assert_eq!(back.norms.version, ds.norms.version);
        assert_eq!(load_team_match(&conn, 42).unwrap().len(), 1);
        assert!(load_team_match(&conn, 7).unwrap().is_empty());
    }

    #[test]
    fn zero_bin_grid_is_rejected_on_load() {
        let mut conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        save_dataset(&mut conn, &sample_dataset()).unwrap();
        conn.execute(
            "UPDATE meta SET value = ?1 WHERE key = 'grid'",
            params![r#"{"x_bins":5,"y_bins":0}"#],
        )
        .unwrap();
        let err = load_dataset(&conn).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InvalidRequest(_))
        ));
    }

    #[test]
    fn empty_store_is_an_error() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        assert!(load_dataset(&conn).is_err());
    }
}
