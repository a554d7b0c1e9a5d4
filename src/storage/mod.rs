//! SQLite-backed persistence
//!
//! One connection behind a parking_lot mutex, WAL mode for concurrent
//! reads, and a `schema_version` table driving strictly forward-only
//! migrations. Everything the core keeps across restarts lives here:
//! config keys, the watchlist, scan history, and the station-name and
//! market-history caches.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use tracing::{debug, info};

use crate::models::{HistoryDay, LocationId, RegionId, TypeId};

const PRAGMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -16000;
PRAGMA temp_store = MEMORY;
"#;

/// Ordered migration scripts. Index + 1 is the schema version a script
/// brings the database up to; shipped databases only ever move forward.
const MIGRATIONS: &[&str] = &[r#"
CREATE TABLE IF NOT EXISTS config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS watchlist (
    type_id INTEGER PRIMARY KEY,
    note TEXT,
    added_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS scan_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    params_json TEXT NOT NULL,
    result_count INTEGER NOT NULL DEFAULT 0,
    started_at TEXT NOT NULL,
    finished_at TEXT
);

CREATE TABLE IF NOT EXISTS scan_flip_results (
    scan_id INTEGER NOT NULL REFERENCES scan_history(id),
    rank INTEGER NOT NULL,
    row_json TEXT NOT NULL,
    PRIMARY KEY (scan_id, rank)
);

CREATE TABLE IF NOT EXISTS scan_contract_results (
    scan_id INTEGER NOT NULL REFERENCES scan_history(id),
    rank INTEGER NOT NULL,
    row_json TEXT NOT NULL,
    PRIMARY KEY (scan_id, rank)
);

CREATE TABLE IF NOT EXISTS station_names (
    station_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS market_history (
    region_id INTEGER NOT NULL,
    type_id INTEGER NOT NULL,
    days_json TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    PRIMARY KEY (region_id, type_id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_scan_history_started
    ON scan_history(started_at DESC);
"#];

pub struct Storage {
    conn: Mutex<Connection>,
}

/// Summary row for the scan-history listing endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ScanRecord {
    pub id: i64,
    pub kind: String,
    pub params_json: String,
    pub result_count: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct WatchlistEntry {
    pub type_id: TypeId,
    pub note: Option<String>,
    pub added_at: i64,
}

impl Storage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .with_context(|| format!("failed to open database {}", path.as_ref().display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(PRAGMA_SQL)
            .context("failed to apply database pragmas")?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.migrate()?;
        Ok(storage)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        )?;
        let current: i64 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| {
                r.get(0)
            })
            .context("failed to read schema version")?;

        let target = MIGRATIONS.len() as i64;
        if current > target {
            // A database written by a newer build. Migrations never run
            // backwards, so refuse to touch it.
            bail!(
                "database schema version {} is newer than supported version {}",
                current,
                target
            );
        }

        for version in current..target {
            let script = MIGRATIONS[version as usize];
            conn.execute_batch(script)
                .with_context(|| format!("migration to schema version {} failed", version + 1))?;
            conn.execute("DELETE FROM schema_version", [])?;
            conn.execute("INSERT INTO schema_version (version) VALUES (?1)", params![
                version + 1
            ])?;
            info!(version = version + 1, "applied database migration");
        }
        Ok(())
    }

    // --- config -----------------------------------------------------------

    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT value FROM config WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )?
        .execute(params![key, value])?;
        Ok(())
    }

    // --- watchlist --------------------------------------------------------

    pub fn add_watch(&self, type_id: TypeId, note: Option<&str>) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO watchlist (type_id, note) VALUES (?1, ?2)
             ON CONFLICT(type_id) DO UPDATE SET note = excluded.note",
        )?
        .execute(params![type_id, note])?;
        Ok(())
    }

    pub fn remove_watch(&self, type_id: TypeId) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn
            .prepare_cached("DELETE FROM watchlist WHERE type_id = ?1")?
            .execute(params![type_id])?;
        Ok(changed > 0)
    }

    pub fn watchlist(&self) -> Result<Vec<WatchlistEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT type_id, note, added_at FROM watchlist ORDER BY added_at")?;
        let rows = stmt.query_map([], |row| {
            Ok(WatchlistEntry {
                type_id: row.get(0)?,
                note: row.get(1)?,
                added_at: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    // --- scan history -----------------------------------------------------

    pub fn begin_scan(&self, kind: &str, params_json: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO scan_history (kind, params_json, started_at) VALUES (?1, ?2, ?3)",
        )?
        .execute(params![kind, params_json, Utc::now().to_rfc3339()])?;
        Ok(conn.last_insert_rowid())
    }

    pub fn finish_scan(&self, scan_id: i64, result_count: usize) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "UPDATE scan_history SET result_count = ?2, finished_at = ?3 WHERE id = ?1",
        )?
        .execute(params![scan_id, result_count as i64, Utc::now().to_rfc3339()])?;
        Ok(())
    }

    /// Persist serialized result rows under a scan. The child table is
    /// chosen by scan kind; other scan kinds are history-only.
    pub fn store_scan_rows(&self, scan_id: i64, kind: &str, rows: &[String]) -> Result<()> {
        let table = match kind {
            "flip" => "scan_flip_results",
            "contracts" => "scan_contract_results",
            _ => return Ok(()),
        };
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let sql = format!(
                "INSERT OR REPLACE INTO {} (scan_id, rank, row_json) VALUES (?1, ?2, ?3)",
                table
            );
            let mut stmt = tx.prepare(&sql)?;
            for (rank, row) in rows.iter().enumerate() {
                stmt.execute(params![scan_id, rank as i64, row])?;
            }
        }
        tx.commit()?;
        debug!(scan_id, kind, rows = rows.len(), "stored scan rows");
        Ok(())
    }

    pub fn recent_scans(&self, limit: usize) -> Result<Vec<ScanRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, kind, params_json, result_count, started_at, finished_at
             FROM scan_history ORDER BY started_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(ScanRecord {
                id: row.get(0)?,
                kind: row.get(1)?,
                params_json: row.get(2)?,
                result_count: row.get(3)?,
                started_at: row.get(4)?,
                finished_at: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    // --- station name cache ----------------------------------------------

    pub fn station_name(&self, station_id: LocationId) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT name FROM station_names WHERE station_id = ?1")?;
        let mut rows = stmt.query(params![station_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    pub fn upsert_station_name(&self, station_id: LocationId, name: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO station_names (station_id, name) VALUES (?1, ?2)
             ON CONFLICT(station_id) DO UPDATE SET
                 name = excluded.name,
                 updated_at = strftime('%s', 'now')",
        )?
        .execute(params![station_id, name])?;
        Ok(())
    }

    // --- market history cache --------------------------------------------

    pub fn history(
        &self,
        region_id: RegionId,
        type_id: TypeId,
    ) -> Result<Option<(Vec<HistoryDay>, DateTime<Utc>)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT days_json, fetched_at FROM market_history
             WHERE region_id = ?1 AND type_id = ?2",
        )?;
        let mut rows = stmt.query(params![region_id, type_id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let days_json: String = row.get(0)?;
        let fetched_at: String = row.get(1)?;
        let days: Vec<HistoryDay> =
            serde_json::from_str(&days_json).context("corrupt market_history row")?;
        let fetched_at = DateTime::parse_from_rfc3339(&fetched_at)
            .context("corrupt market_history timestamp")?
            .with_timezone(&Utc);
        Ok(Some((days, fetched_at)))
    }

    pub fn upsert_history(
        &self,
        region_id: RegionId,
        type_id: TypeId,
        days: &[HistoryDay],
    ) -> Result<()> {
        let days_json = serde_json::to_string(days)?;
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO market_history (region_id, type_id, days_json, fetched_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(region_id, type_id) DO UPDATE SET
                 days_json = excluded.days_json,
                 fetched_at = excluded.fetched_at",
        )?
        .execute(params![
            region_id,
            type_id,
            days_json,
            Utc::now().to_rfc3339()
        ])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32, avg: f64) -> HistoryDay {
        HistoryDay {
            date: NaiveDate::from_ymd_opt(2024, 1, d).unwrap(),
            average: avg,
            highest: avg * 1.1,
            lowest: avg * 0.9,
            volume: 1000,
            order_count: 42,
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        {
            let s = Storage::open(&path).unwrap();
            s.set_config("greeting", "hello").unwrap();
        }
        // Reopening re-runs migrate() against an up-to-date schema.
        let s = Storage::open(&path).unwrap();
        assert_eq!(s.get_config("greeting").unwrap().as_deref(), Some("hello"));
    }

    #[test]
    fn test_config_roundtrip_and_overwrite() {
        let s = Storage::open_in_memory().unwrap();
        assert_eq!(s.get_config("missing").unwrap(), None);
        s.set_config("k", "v1").unwrap();
        s.set_config("k", "v2").unwrap();
        assert_eq!(s.get_config("k").unwrap().as_deref(), Some("v2"));
    }

    #[test]
    fn test_watchlist_crud() {
        let s = Storage::open_in_memory().unwrap();
        s.add_watch(34, Some("mineral staple")).unwrap();
        s.add_watch(603, None).unwrap();
        assert_eq!(s.watchlist().unwrap().len(), 2);
        assert!(s.remove_watch(34).unwrap());
        assert!(!s.remove_watch(34).unwrap());
        assert_eq!(s.watchlist().unwrap().len(), 1);
    }

    #[test]
    fn test_scan_history_with_child_rows() {
        let s = Storage::open_in_memory().unwrap();
        let id = s.begin_scan("flip", r#"{"origin":30000142}"#).unwrap();
        s.store_scan_rows(id, "flip", &["{\"a\":1}".to_string(), "{\"b\":2}".to_string()])
            .unwrap();
        s.finish_scan(id, 2).unwrap();

        let scans = s.recent_scans(10).unwrap();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].kind, "flip");
        assert_eq!(scans[0].result_count, 2);
        assert!(scans[0].finished_at.is_some());
    }

    #[test]
    fn test_station_name_upsert_is_last_writer_wins() {
        let s = Storage::open_in_memory().unwrap();
        assert_eq!(s.station_name(60000001).unwrap(), None);
        s.upsert_station_name(60000001, "Jita IV - Moon 4").unwrap();
        s.upsert_station_name(60000001, "Jita IV - Moon 4 - CNAP").unwrap();
        assert_eq!(
            s.station_name(60000001).unwrap().as_deref(),
            Some("Jita IV - Moon 4 - CNAP")
        );
    }

    #[test]
    fn test_history_roundtrip() {
        let s = Storage::open_in_memory().unwrap();
        let days = vec![day(1, 100.0), day(2, 110.0)];
        s.upsert_history(10000002, 34, &days).unwrap();
        let (loaded, fetched_at) = s.history(10000002, 34).unwrap().unwrap();
        assert_eq!(loaded, days);
        assert!(fetched_at <= Utc::now());

        // Same-value rewrite stays readable and keeps one row.
        s.upsert_history(10000002, 34, &days).unwrap();
        let (loaded, _) = s.history(10000002, 34).unwrap().unwrap();
        assert_eq!(loaded, days);
    }
}
