//! In-memory tier and the ordered multi-tier decorator.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

use super::{CacheError, InterpretationKey, ObjectCache};
use crate::interpretation::Interpretation;

/// Process-local tier. Last writer wins.
#[derive(Default, Clone)]
pub struct MemoryObjectCache {
    entries: Arc<Mutex<HashMap<String, (String, Interpretation)>>>,
}

impl MemoryObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectCache for MemoryObjectCache {
    async fn exists(&self, key: &InterpretationKey) -> Result<bool, CacheError> {
        let entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(entries.contains_key(&key.key_hash))
    }

    async fn get(&self, key: &InterpretationKey) -> Result<Option<Interpretation>, CacheError> {
        let entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(entries.get(&key.key_hash).map(|(_, v)| v.clone()))
    }

    async fn put(&self, key: &InterpretationKey, value: &Interpretation) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        entries.insert(key.key_hash.clone(), (key.bucket.clone(), value.clone()));
        Ok(())
    }

    async fn query(&self, bucket: &str) -> Result<Vec<Interpretation>, CacheError> {
        let entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        let mut out: Vec<Interpretation> = entries
            .values()
            .filter(|(b, _)| b == bucket)
            .map(|(_, v)| v.clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}

/// Ordered chain of tiers, fastest first.
///
/// `put` writes every tier. `get` probes in order and copies a hit into every
/// faster tier that missed. `query` asks the slowest tier, which holds everything.
#[derive(Clone)]
pub struct TieredCache {
    tiers: Vec<Arc<dyn ObjectCache>>,
}

impl TieredCache {
    pub fn new(tiers: Vec<Arc<dyn ObjectCache>>) -> Self {
        Self { tiers }
    }

    pub fn tiers(&self) -> &[Arc<dyn ObjectCache>] {
        &self.tiers
    }
}

#[async_trait]
impl ObjectCache for TieredCache {
    async fn exists(&self, key: &InterpretationKey) -> Result<bool, CacheError> {
        for tier in &self.tiers {
            if tier.exists(key).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn get(&self, key: &InterpretationKey) -> Result<Option<Interpretation>, CacheError> {
        for (depth, tier) in self.tiers.iter().enumerate() {
            let Some(found) = tier.get(key).await? else {
                continue;
            };
            for faster in &self.tiers[..depth] {
                if let Err(err) = faster.put(key, &found).await {
                    warn!(key = %key.id, error = %err, "cache backfill failed");
                }
            }
            return Ok(Some(found));
        }
        Ok(None)
    }

    async fn put(&self, key: &InterpretationKey, value: &Interpretation) -> Result<(), CacheError> {
        for tier in &self.tiers {
            tier.put(key, value).await?;
        }
        Ok(())
    }

    async fn query(&self, bucket: &str) -> Result<Vec<Interpretation>, CacheError> {
        match self.tiers.last() {
            Some(tier) => tier.query(bucket).await,
            None => Ok(Vec::new()),
        }
    }
}
