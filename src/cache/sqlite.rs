//! SQLite-backed local tier of the interpretation cache.

use async_trait::async_trait;
use fs2::FileExt;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{hash_text, now_epoch, CacheError, InterpretationKey, ObjectCache};
use crate::interpretation::Interpretation;

#[derive(Clone)]
pub struct SqliteObjectCache {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteObjectCache {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             CREATE TABLE IF NOT EXISTS interpretation_cache (\
               key_hash TEXT PRIMARY KEY,\
               bucket TEXT NOT NULL,\
               interpretation_id TEXT NOT NULL,\
               subject_id TEXT NOT NULL,\
               slice_index INTEGER,\
               origin_id TEXT,\
               body TEXT NOT NULL,\
               body_hash TEXT NOT NULL,\
               hit_count INTEGER NOT NULL DEFAULT 0,\
               created_at INTEGER NOT NULL,\
               updated_at INTEGER NOT NULL \
             );\
             CREATE INDEX IF NOT EXISTS interpretation_cache_bucket \
               ON interpretation_cache (bucket);",
        )?;

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("LEGISCORE_CACHE_PATH") {
            return PathBuf::from(path);
        }
        PathBuf::from(".legiscore_cache.sqlite")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_exclusive(&self) -> Result<CacheLock, CacheError> {
        CacheLock::new(&self.path)
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, CacheError>
    where
        F: FnOnce(&Connection) -> Result<R, CacheError>,
    {
        let guard = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        f(&guard)
    }

    async fn blocking<F, R>(&self, f: F) -> Result<R, CacheError>
    where
        F: FnOnce(&Connection) -> Result<R, CacheError> + Send + 'static,
        R: Send + 'static,
    {
        let cache = self.clone();
        tokio::task::spawn_blocking(move || cache.with_conn(f))
            .await
            .map_err(|e| CacheError::Join(e.to_string()))?
    }
}

fn decode(body: &str) -> Result<Interpretation, CacheError> {
    serde_json::from_str(body).map_err(|e| CacheError::Serde(e.to_string()))
}

#[async_trait]
impl ObjectCache for SqliteObjectCache {
    async fn exists(&self, key: &InterpretationKey) -> Result<bool, CacheError> {
        let key_hash = key.key_hash.clone();
        self.blocking(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM interpretation_cache WHERE key_hash = ?1",
                params![key_hash],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    async fn get(&self, key: &InterpretationKey) -> Result<Option<Interpretation>, CacheError> {
        let key_hash = key.key_hash.clone();
        self.blocking(move |conn| {
            let mut stmt =
                conn.prepare("SELECT body FROM interpretation_cache WHERE key_hash = ?1")?;
            let mut rows = stmt.query(params![key_hash])?;
            let Some(row) = rows.next()? else {
                return Ok(None);
            };
            let body: String = row.get(0)?;
            conn.execute(
                "UPDATE interpretation_cache \
                 SET hit_count = hit_count + 1, updated_at = ?1 \
                 WHERE key_hash = ?2",
                params![now_epoch(), key_hash],
            )?;
            decode(&body).map(Some)
        })
        .await
    }

    async fn put(&self, key: &InterpretationKey, value: &Interpretation) -> Result<(), CacheError> {
        let key = key.clone();
        let body = serde_json::to_string(value).map_err(|e| CacheError::Serde(e.to_string()))?;
        self.blocking(move |conn| {
            let now = now_epoch();
            conn.execute(
                "INSERT INTO interpretation_cache (\
                    key_hash, bucket, interpretation_id, subject_id, slice_index, origin_id,\
                    body, body_hash, created_at, updated_at \
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)\
                 ON CONFLICT(key_hash) DO UPDATE SET \
                    body = excluded.body,\
                    body_hash = excluded.body_hash,\
                    updated_at = excluded.updated_at",
                params![
                    key.key_hash,
                    key.bucket,
                    key.id,
                    key.subject_id,
                    key.slice_index.map(|v| v as i64),
                    key.origin_id,
                    body,
                    hash_text(&body),
                    now,
                    now,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn query(&self, bucket: &str) -> Result<Vec<Interpretation>, CacheError> {
        let bucket = bucket.to_string();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT body FROM interpretation_cache WHERE bucket = ?1 \
                 ORDER BY interpretation_id",
            )?;
            let mut rows = stmt.query(params![bucket])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let body: String = row.get(0)?;
                out.push(decode(&body)?);
            }
            Ok(out)
        })
        .await
    }
}

#[derive(Debug)]
pub struct CacheLock {
    _file: std::fs::File,
}

impl CacheLock {
    fn new(db_path: &Path) -> Result<Self, CacheError> {
        let mut lock_path = db_path.to_path_buf();
        lock_path.set_extension("lock");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_path)?;
        file.lock_exclusive()?;
        Ok(Self { _file: file })
    }
}

#[derive(Debug, Serialize)]
pub struct CacheExportRow {
    pub key_hash: String,
    pub bucket: String,
    pub interpretation_id: String,
    pub subject_id: String,
    pub slice_index: Option<usize>,
    pub origin_id: Option<String>,
    pub body_hash: String,
    pub interpretation: Interpretation,
    pub created_at: i64,
    pub updated_at: i64,
    pub hit_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CachePruneStats {
    pub deleted: usize,
    pub remaining: usize,
}

impl SqliteObjectCache {
    pub async fn export_jsonl(&self, path: impl AsRef<Path>) -> Result<usize, CacheError> {
        let path = path.as_ref().to_path_buf();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key_hash, bucket, interpretation_id, subject_id, slice_index, origin_id,\
                        body, body_hash, created_at, updated_at, hit_count \
                 FROM interpretation_cache ORDER BY updated_at DESC",
            )?;
            let mut rows = stmt.query([])?;
            let mut file = std::fs::File::create(path)?;
            let mut written = 0usize;
            while let Some(row) = rows.next()? {
                let body: String = row.get(6)?;
                let record = CacheExportRow {
                    key_hash: row.get(0)?,
                    bucket: row.get(1)?,
                    interpretation_id: row.get(2)?,
                    subject_id: row.get(3)?,
                    slice_index: row.get::<_, Option<i64>>(4)?.map(|v| v as usize),
                    origin_id: row.get(5)?,
                    interpretation: decode(&body)?,
                    body_hash: row.get(7)?,
                    created_at: row.get(8)?,
                    updated_at: row.get(9)?,
                    hit_count: row.get(10)?,
                };
                let line =
                    serde_json::to_string(&record).map_err(|e| CacheError::Serde(e.to_string()))?;
                use std::io::Write;
                writeln!(file, "{line}")?;
                written += 1;
            }
            Ok(written)
        })
        .await
    }

    pub async fn prune(
        &self,
        max_age_days: Option<u64>,
        max_rows: Option<usize>,
    ) -> Result<CachePruneStats, CacheError> {
        self.blocking(move |conn| {
            let mut deleted: usize = 0;
            if let Some(days) = max_age_days {
                let cutoff = now_epoch().saturating_sub((days as i64).saturating_mul(86_400));
                let removed = conn.execute(
                    "DELETE FROM interpretation_cache WHERE updated_at < ?1",
                    params![cutoff],
                )?;
                deleted = deleted.saturating_add(removed);
            }

            if let Some(max_rows) = max_rows {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM interpretation_cache", [], |row| {
                        row.get(0)
                    })?;
                let keep = max_rows as i64;
                if count > keep {
                    let removed = conn.execute(
                        "DELETE FROM interpretation_cache WHERE key_hash IN (\
                            SELECT key_hash FROM interpretation_cache \
                            ORDER BY updated_at DESC LIMIT -1 OFFSET ?1 \
                         )",
                        params![keep],
                    )?;
                    deleted = deleted.saturating_add(removed);
                }
            }

            let remaining: i64 =
                conn.query_row("SELECT COUNT(*) FROM interpretation_cache", [], |row| {
                    row.get(0)
                })?;
            Ok(CachePruneStats {
                deleted,
                remaining: remaining.max(0) as usize,
            })
        })
        .await
    }
}
