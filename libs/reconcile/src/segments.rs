//! Per-run cache of allocated segments.

use std::collections::HashMap;

use clusternet_networking::Segment;
use tracing::{debug, info, warn};

use crate::allocator::AllocatorService;

/// Segment lookups for one reconciliation run.
///
/// Warmed with a single bulk fetch on first use, then filled lazily from
/// single lookups. Misses are remembered so each name is asked for at most
/// once.
#[derive(Debug, Default)]
pub struct SegmentCache {
    warmed: bool,
    entries: HashMap<String, Option<Segment>>,
}

impl SegmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-load allocated segments. Only the first call queries the service.
    pub async fn warm(&mut self, allocator: &dyn AllocatorService, vrf: &str) {
        if self.warmed {
            return;
        }
        self.warmed = true;

        match allocator.fetch_allocated_segments(vrf).await {
            Ok(segments) => {
                info!(count = segments.len(), vrf, "Cached allocated segments");
                for (name, segment) in segments {
                    self.entries.entry(name).or_insert(Some(segment));
                }
            }
            Err(e) => {
                warn!(error = %e, vrf, "Failed to fetch allocated segments");
            }
        }
    }

    /// Record a segment, e.g. one just allocated to a cluster.
    pub fn insert(&mut self, name: impl Into<String>, segment: Segment) {
        self.entries.insert(name.into(), Some(segment));
    }

    /// Cached value without querying the service.
    pub fn get(&self, name: &str) -> Option<Segment> {
        self.entries.get(name).copied().flatten()
    }

    /// Resolve a name, falling back to a single lookup on a cache miss.
    pub async fn resolve(
        &mut self,
        allocator: &dyn AllocatorService,
        vrf: &str,
        name: &str,
    ) -> Option<Segment> {
        self.warm(allocator, vrf).await;

        if let Some(cached) = self.entries.get(name) {
            debug!(name, segment = ?cached, "Segment cache hit");
            return *cached;
        }

        let found = match allocator.lookup_segment(name).await {
            Ok(found) => found,
            Err(e) => {
                warn!(name, error = %e, "Segment lookup failed");
                None
            }
        };
        self.entries.insert(name.to_string(), found);
        found
    }

    pub fn len(&self) -> usize {
        self.entries.values().filter(|v| v.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::allocator::{AllocationRequest, AllocationResult};
    use crate::error::AllocationError;

    #[derive(Default)]
    struct CountingAllocator {
        fetches: AtomicUsize,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl AllocatorService for CountingAllocator {
        async fn health_check(&self) -> bool {
            true
        }

        async fn fetch_allocated_segments(
            &self,
            _vrf: &str,
        ) -> Result<BTreeMap<String, Segment>, AllocationError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(BTreeMap::from([(
                "mce-site1-prod".to_string(),
                "192.168.110.0/24".parse().unwrap(),
            )]))
        }

        async fn allocate_vlan(
            &self,
            _request: &AllocationRequest,
        ) -> Result<AllocationResult, AllocationError> {
            Err(AllocationError::ServiceUnavailable("not used".to_string()))
        }

        async fn lookup_segment(&self, name: &str) -> Result<Option<Segment>, AllocationError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            match name {
                "mce-lazy" => Ok(Some("192.168.50.0/24".parse().unwrap())),
                "mce-broken" => Err(AllocationError::ServiceUnavailable("down".to_string())),
                _ => Ok(None),
            }
        }
    }

    #[tokio::test]
    async fn test_warm_happens_once() {
        let allocator = CountingAllocator::default();
        let mut cache = SegmentCache::new();

        cache.warm(&allocator, "Network1").await;
        cache.warm(&allocator, "Network1").await;
        assert_eq!(
            cache.resolve(&allocator, "Network1", "mce-site1-prod").await,
            Some("192.168.110.0/24".parse().unwrap())
        );

        assert_eq!(allocator.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(allocator.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_misses_are_looked_up_once() {
        let allocator = CountingAllocator::default();
        let mut cache = SegmentCache::new();

        assert!(cache.resolve(&allocator, "Network1", "mce-missing").await.is_none());
        assert!(cache.resolve(&allocator, "Network1", "mce-missing").await.is_none());
        assert!(cache.resolve(&allocator, "Network1", "mce-broken").await.is_none());
        assert_eq!(
            cache.resolve(&allocator, "Network1", "mce-lazy").await,
            Some("192.168.50.0/24".parse().unwrap())
        );
        assert!(cache.resolve(&allocator, "Network1", "mce-lazy").await.is_some());

        assert_eq!(allocator.lookups.load(Ordering::SeqCst), 3);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_insert_overrides() {
        let mut cache = SegmentCache::new();
        cache.insert("ocp4-a", "10.0.1.0/24".parse().unwrap());
        assert_eq!(cache.get("ocp4-a"), Some("10.0.1.0/24".parse().unwrap()));
        assert_eq!(cache.get("ocp4-b"), None);
    }
}
