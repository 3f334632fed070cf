//! kevex store: bounded LRU cache of involved-object metadata in front of the
//! API server.

#![forbid(unsafe_code)]

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use kevex_core::lookup::{LookupError, ObjectLookup};
use kevex_core::metrics::MetricsStore;
use kevex_core::{ObjectIdentity, ObjectMetadata};
use lru::LruCache;
use tracing::{debug, trace};

/// Source of involved-object metadata for the enricher.
#[async_trait::async_trait]
pub trait ObjectMetadataProvider: Send + Sync {
    async fn get_object_metadata(&self, id: &ObjectIdentity) -> Result<ObjectMetadata, LookupError>;
}

/// LRU cache keyed by [`ObjectIdentity`].
///
/// A miss resolves through the [`ObjectLookup`]. A `NotFound` lookup is cached
/// as a `deleted` entry and is never re-checked while it stays resident; only
/// eviction makes the next request go back to the API. Any other lookup error
/// is returned and not cached.
///
/// The lock is held only around map operations, never across the lookup, so
/// concurrent misses for one identity may each hit the API.
pub struct ObjectMetadataCache {
    entries: Mutex<LruCache<ObjectIdentity, ObjectMetadata>>,
    lookup: Arc<dyn ObjectLookup>,
    metrics: Arc<MetricsStore>,
}

impl ObjectMetadataCache {
    /// `capacity` of zero is treated as one.
    pub fn new(capacity: usize, lookup: Arc<dyn ObjectLookup>, metrics: Arc<MetricsStore>) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { entries: Mutex::new(LruCache::new(cap)), lookup, metrics }
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Membership test that does not touch recency.
    pub fn contains(&self, id: &ObjectIdentity) -> bool {
        self.lock().contains(id)
    }

    pub async fn get_object_metadata(&self, id: &ObjectIdentity) -> Result<ObjectMetadata, LookupError> {
        let hit = self.lock().get(id).cloned();
        if let Some(hit) = hit {
            self.metrics.inc_kube_api_read_cache_hits();
            trace!(object = %id, "metadata cache hit");
            return Ok(hit);
        }

        self.metrics.inc_kube_api_read_requests();
        let meta = match self.lookup.lookup(id).await {
            Ok(meta) => ObjectMetadata::from_meta(&meta),
            Err(e) if e.is_not_found() => {
                debug!(object = %id, "involved object not found; caching as deleted");
                ObjectMetadata::deleted()
            }
            Err(e) => return Err(e),
        };

        let evicted = self.lock().push(id.clone(), meta.clone());
        if let Some((evicted, _)) = evicted {
            if &evicted != id {
                trace!(object = %evicted, "metadata cache eviction");
            }
        }
        Ok(meta)
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<ObjectIdentity, ObjectMetadata>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl ObjectMetadataProvider for ObjectMetadataCache {
    async fn get_object_metadata(&self, id: &ObjectIdentity) -> Result<ObjectMetadata, LookupError> {
        ObjectMetadataCache::get_object_metadata(self, id).await
    }
}
