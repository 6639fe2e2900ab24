//! amiclean persistence: a small SQLite journal of produced cleanup plans.
//! Keeps the newest N plans so operators can see what a previous run decided.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};

pub const DEFAULT_KEEP: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanRecord {
    pub id: uuid::Uuid,
    pub ts: i64,
    pub image_count: usize,
    pub snapshot_count: usize,
    /// Serialized plan (JSON).
    pub body: String,
}

impl PlanRecord {
    pub fn new<T: Serialize>(plan: &T, image_count: usize, snapshot_count: usize) -> Result<Self> {
        let body = serde_json::to_string(plan).context("serializing plan")?;
        Ok(Self { id: uuid::Uuid::new_v4(), ts: now_ts(), image_count, snapshot_count, body })
    }
}

pub trait PlanStore {
    fn record(&self, rec: &PlanRecord) -> Result<()>;
    fn recent(&self, limit: usize) -> Result<Vec<PlanRecord>>;
}

/// SQLite-backed journal. Synchronous; one write per CLI run.
pub struct SqliteStore {
    db: std::sync::Mutex<rusqlite::Connection>,
    keep: usize,
}

impl SqliteStore {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("AMICLEAN_DB_PATH").unwrap_or_else(|_| default_db_path());
        let keep = std::env::var("AMICLEAN_HISTORY_KEEP").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(DEFAULT_KEEP);
        Self::open(&path, keep)
    }

    pub fn open(path: &str, keep: usize) -> Result<Self> {
        let started = std::time::Instant::now();
        let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        db.execute(
            "CREATE TABLE IF NOT EXISTS plans (
                id             TEXT PRIMARY KEY,
                ts             INTEGER NOT NULL,
                image_count    INTEGER NOT NULL,
                snapshot_count INTEGER NOT NULL,
                body           TEXT NOT NULL
            )",
            [],
        ).context("creating plans table")?;
        db.execute("CREATE INDEX IF NOT EXISTS idx_plans_ts ON plans(ts DESC)", []).ok();
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(Self { db: std::sync::Mutex::new(db), keep: keep.max(1) })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>> {
        self.db.lock().map_err(|_| anyhow!("plan journal lock poisoned"))
    }
}

impl PlanStore for SqliteStore {
    fn record(&self, rec: &PlanRecord) -> Result<()> {
        let started = std::time::Instant::now();
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO plans(id, ts, image_count, snapshot_count, body) VALUES (?1, ?2, ?3, ?4, ?5)",
            (rec.id.to_string(), rec.ts, rec.image_count as i64, rec.snapshot_count as i64, &rec.body),
        )?;
        tx.execute(
            "DELETE FROM plans
             WHERE rowid NOT IN (SELECT rowid FROM plans ORDER BY ts DESC, rowid DESC LIMIT ?1)",
            [self.keep as i64],
        )?;
        tx.commit()?;
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        tracing::debug!(id = %rec.id, images = rec.image_count, snapshots = rec.snapshot_count, "plan recorded");
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<PlanRecord>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT id, ts, image_count, snapshot_count, body FROM plans ORDER BY ts DESC, rowid DESC LIMIT ?1",
        )?;
        let mut rows = stmt.query([limit as i64])?;
        let mut out: Vec<PlanRecord> = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let image_count: i64 = row.get(2)?;
            let snapshot_count: i64 = row.get(3)?;
            out.push(PlanRecord {
                id: uuid::Uuid::parse_str(&id).with_context(|| format!("bad plan id {}", id))?,
                ts: row.get(1)?,
                image_count: image_count.max(0) as usize,
                snapshot_count: snapshot_count.max(0) as usize,
                body: row.get(4)?,
            });
        }
        Ok(out)
    }
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".amiclean");
        let _ = std::fs::create_dir_all(&p);
        p.push("amiclean.db");
        return p.to_string_lossy().to_string();
    }
    "amiclean.db".to_string()
}

pub fn now_ts() -> i64 { chrono::Utc::now().timestamp() }

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> String {
        let dir = std::env::temp_dir();
        let f = format!("amiclean-test-{}.db", std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos());
        dir.join(f).to_string_lossy().to_string()
    }

    #[test]
    fn record_and_rotate() {
        let s = SqliteStore::open(&temp_db(), 3).unwrap();
        for i in 0..5 {
            let mut rec = PlanRecord::new(&serde_json::json!({ "run": i }), i, 0).unwrap();
            rec.ts = i as i64;
            s.record(&rec).unwrap();
        }
        let rows = s.recent(10).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].image_count, 4);
        assert_eq!(rows[2].image_count, 2);
        let body: serde_json::Value = serde_json::from_str(&rows[0].body).unwrap();
        assert_eq!(body["run"], 4);
    }

    #[test]
    fn recent_respects_limit() {
        let s = SqliteStore::open(&temp_db(), 10).unwrap();
        for i in 0..4 {
            s.record(&PlanRecord::new(&i, i, i).unwrap()).unwrap();
        }
        assert_eq!(s.recent(2).unwrap().len(), 2);
    }
}
