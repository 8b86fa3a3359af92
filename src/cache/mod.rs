//! Content-addressed interpretation store.
//!
//! Every interpretation is keyed by (subject, slice, origin) inside a session
//! bucket, which gives the reducer at-most-once computation per key.

pub mod sqlite;
pub mod tiered;

use async_trait::async_trait;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::interpretation::{Interpretation, SessionContext};

pub use sqlite::{CacheExportRow, CacheLock, CachePruneStats, SqliteObjectCache};
pub use tiered::{MemoryObjectCache, TieredCache};

/// Deterministic key for one unit of interpretation work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InterpretationKey {
    pub bucket: String,
    pub subject_id: String,
    pub slice_index: Option<usize>,
    pub origin_id: Option<String>,
    /// `subject`, `subject#slice`, `subject@origin` or `subject#slice@origin`.
    pub id: String,
    pub key_hash: String,
}

impl InterpretationKey {
    pub fn new(
        ctx: &SessionContext,
        subject_id: &str,
        slice_index: Option<usize>,
        origin_id: Option<&str>,
    ) -> Self {
        let mut id = subject_id.to_string();
        if let Some(slice) = slice_index {
            id.push_str(&format!("#{slice}"));
        }
        if let Some(origin) = origin_id {
            id.push_str(&format!("@{origin}"));
        }
        let bucket = ctx.bucket();
        let key_hash = hash_fields(&[&bucket, &id]);
        Self {
            bucket,
            subject_id: subject_id.to_string(),
            slice_index,
            origin_id: origin_id.map(str::to_string),
            id,
            key_hash,
        }
    }

    pub fn document(ctx: &SessionContext, subject_id: &str) -> Self {
        Self::new(ctx, subject_id, None, None)
    }

    /// Rebuilds a key from its `id` form.
    pub fn from_id(ctx: &SessionContext, id: &str) -> Self {
        let (rest, origin) = match id.rsplit_once('@') {
            Some((rest, origin)) => (rest, Some(origin)),
            None => (id, None),
        };
        let (subject, slice) = match rest.rsplit_once('#') {
            Some((subject, slice)) => match slice.parse::<usize>() {
                Ok(index) => (subject, Some(index)),
                Err(_) => (rest, None),
            },
            None => (rest, None),
        };
        Self::new(ctx, subject, slice, origin)
    }

    /// Key of the whole-document interpretation this key belongs to.
    pub fn parent(&self, ctx: &SessionContext) -> Self {
        Self::new(ctx, &self.subject_id, None, self.origin_id.as_deref())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache lock poisoned")]
    Poisoned,
    #[error("task join error: {0}")]
    Join(String),
    #[error("serialization error: {0}")]
    Serde(String),
}

#[async_trait]
pub trait ObjectCache: Send + Sync {
    async fn exists(&self, key: &InterpretationKey) -> Result<bool, CacheError>;
    async fn get(&self, key: &InterpretationKey) -> Result<Option<Interpretation>, CacheError>;
    async fn put(&self, key: &InterpretationKey, value: &Interpretation) -> Result<(), CacheError>;
    /// Every interpretation stored under `bucket`.
    async fn query(&self, bucket: &str) -> Result<Vec<Interpretation>, CacheError>;
}

pub(crate) fn hash_text(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

pub(crate) fn hash_fields(fields: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for (idx, field) in fields.iter().enumerate() {
        if idx > 0 {
            hasher.update(b"|");
        }
        hasher.update(field.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

pub(crate) fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
