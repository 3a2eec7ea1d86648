//! Brick registry: local registrations plus an optional remote source.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use brickline_config::RegistryId;
use brickline_types::{BrickError, Result};

use crate::brick::Brick;

/// A place bricks can be fetched from when they are not registered locally.
#[async_trait]
pub trait BrickSource: Send + Sync {
    /// `Ok(None)` means the source does not know the id.
    async fn fetch(&self, id: &RegistryId) -> Result<Option<Arc<dyn Brick>>>;
}

// ---------------------------------------------------------------------------
// LookupCache
// ---------------------------------------------------------------------------

/// Bricks already fetched from a [`BrickSource`]. Cloning shares the cache.
#[derive(Clone, Default)]
pub struct LookupCache {
    entries: Arc<RwLock<HashMap<RegistryId, Arc<dyn Brick>>>>,
}

impl LookupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &RegistryId) -> Option<Arc<dyn Brick>> {
        self.entries.read().await.get(id).cloned()
    }

    pub async fn insert(&self, id: RegistryId, brick: Arc<dyn Brick>) {
        self.entries.write().await.insert(id, brick);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

// ---------------------------------------------------------------------------
// BrickRegistry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct BrickRegistry {
    bricks: HashMap<RegistryId, Arc<dyn Brick>>,
    source: Option<Arc<dyn BrickSource>>,
    cache: LookupCache,
}

impl BrickRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fall back to `source` for ids not registered locally, memoizing hits
    /// in `cache`.
    pub fn with_source(mut self, source: Arc<dyn BrickSource>, cache: LookupCache) -> Self {
        self.source = Some(source);
        self.cache = cache;
        self
    }

    pub fn register(&mut self, brick: impl Brick + 'static) {
        self.register_arc(Arc::new(brick));
    }

    pub fn register_arc(&mut self, brick: Arc<dyn Brick>) {
        let id = RegistryId::from(brick.id());
        if self.bricks.insert(id.clone(), brick).is_some() {
            tracing::warn!(brick = %id, "Replacing registered brick");
        }
    }

    pub fn has(&self, id: &str) -> bool {
        self.bricks.contains_key(&RegistryId::from(id))
    }

    /// Locally registered ids, sorted.
    pub fn ids(&self) -> Vec<&RegistryId> {
        let mut ids: Vec<_> = self.bricks.keys().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.bricks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bricks.is_empty()
    }

    pub async fn lookup(&self, id: &RegistryId) -> Result<Arc<dyn Brick>> {
        if let Some(brick) = self.bricks.get(id) {
            return Ok(brick.clone());
        }
        if let Some(brick) = self.cache.get(id).await {
            return Ok(brick);
        }
        if let Some(source) = &self.source {
            if let Some(brick) = source.fetch(id).await? {
                tracing::debug!(brick = %id, "Fetched brick from source");
                self.cache.insert(id.clone(), brick.clone()).await;
                return Ok(brick);
            }
        }
        Err(BrickError::BrickNotFound { id: id.to_string() })
    }
}
