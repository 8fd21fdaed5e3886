//! Last-known-region cache.
//!
//! # Storage layout
//!
//! A single table `region_fixes` is created (if it does not already exist):
//!
//! | column      | type | description                                   |
//! |-------------|------|-----------------------------------------------|
//! | id          | TEXT | UUID v4 primary key                           |
//! | map_key     | TEXT | Identifies the building map the fix belongs to |
//! | region      | TEXT | Region identifier                             |
//! | confidence  | REAL | Localizer confidence at the time of the fix   |
//! | recorded_at | TEXT | RFC-3339 time (UTC)                           |
//!
//! Fixes are keyed by map so a cache written in one building is never used
//! to seed a run in another.
//!
//! # Example
//!
//! ```rust
//! use autonav_memory::RegionCache;
//!
//! let cache = RegionCache::open_in_memory().unwrap();
//! cache.store("lab.json", &"r_03".into(), 0.9).unwrap();
//! cache.store("lab.json", &"r_04".into(), 0.8).unwrap();
//!
//! let last = cache.last_known("lab.json").unwrap().unwrap();
//! assert_eq!(last.region.as_str(), "r_04");
//! assert!(cache.last_known("office.json").unwrap().is_none());
//! ```

use std::path::Path;

use autonav_types::{NavError, RegionId};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Corrupt cache row: {0}")]
    Corrupt(String),
}

impl From<CacheError> for NavError {
    fn from(e: CacheError) -> Self {
        NavError::Config(format!("region cache: {e}"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CachedFix
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedFix {
    pub id: Uuid,
    pub map_key: String,
    pub region: RegionId,
    pub confidence: f32,
    pub recorded_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// RegionCache
// ─────────────────────────────────────────────────────────────────────────────

pub struct RegionCache {
    conn: Connection,
}

impl RegionCache {
    /// Open (or create) a cache database at `path`.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;
        let cache = Self { conn };
        cache.init_schema()?;
        debug!(path = %path.display(), "region cache opened");
        Ok(cache)
    }

    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        let cache = Self { conn };
        cache.init_schema()?;
        Ok(cache)
    }

    fn init_schema(&self) -> Result<(), CacheError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS region_fixes (
                id          TEXT PRIMARY KEY,
                map_key     TEXT NOT NULL,
                region      TEXT NOT NULL,
                confidence  REAL NOT NULL,
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_region_fixes_map
                ON region_fixes (map_key, recorded_at);",
        )?;
        Ok(())
    }

    /// Record an accepted fix.
    pub fn store(&self, map_key: &str, region: &RegionId, confidence: f32) -> Result<CachedFix, CacheError> {
        let fix = CachedFix {
            id: Uuid::new_v4(),
            map_key: map_key.to_string(),
            region: region.clone(),
            confidence,
            recorded_at: Utc::now(),
        };
        self.conn.execute(
            "INSERT INTO region_fixes (id, map_key, region, confidence, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                fix.id.to_string(),
                fix.map_key,
                fix.region.as_str(),
                f64::from(fix.confidence),
                fix.recorded_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            ],
        )?;
        Ok(fix)
    }

    /// Most recent fix for `map_key`, if any.
    pub fn last_known(&self, map_key: &str) -> Result<Option<CachedFix>, CacheError> {
        Ok(self.history(map_key, 1)?.into_iter().next())
    }

    /// Up to `limit` fixes for `map_key`, newest first.
    pub fn history(&self, map_key: &str, limit: usize) -> Result<Vec<CachedFix>, CacheError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, map_key, region, confidence, recorded_at
             FROM region_fixes
             WHERE map_key = ?1
             ORDER BY recorded_at DESC, rowid DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![map_key, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut fixes = Vec::new();
        for row in rows {
            let (id, map_key, region, confidence, recorded_at) = row?;
            let id = Uuid::parse_str(&id).map_err(|e| CacheError::Corrupt(format!("id {id}: {e}")))?;
            let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
                .map_err(|e| CacheError::Corrupt(format!("timestamp {recorded_at}: {e}")))?
                .with_timezone(&Utc);
            fixes.push(CachedFix {
                id,
                map_key,
                region: RegionId::new(region),
                confidence: confidence as f32,
                recorded_at,
            });
        }
        Ok(fixes)
    }

    /// Keep only the newest `keep` fixes for `map_key`.  Returns the number
    /// of rows removed.
    pub fn prune(&self, map_key: &str, keep: usize) -> Result<usize, CacheError> {
        let removed = self.conn.execute(
            "DELETE FROM region_fixes
             WHERE map_key = ?1 AND id NOT IN (
                 SELECT id FROM region_fixes
                 WHERE map_key = ?1
                 ORDER BY recorded_at DESC, rowid DESC
                 LIMIT ?2
             )",
            params![map_key, keep as i64],
        )?;
        Ok(removed)
    }

    pub fn count(&self, map_key: &str) -> Result<usize, CacheError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM region_fixes WHERE map_key = ?1",
            params![map_key],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}
