//! Allocator service contract and the deterministic offline allocator.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clusternet_networking::{NetworkError, Segment, SubnetPool, VlanId};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::AllocationError;

/// VRF used when none is configured.
pub const DEFAULT_VRF: &str = "Network1";

/// Request body for a VLAN allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationRequest {
    pub cluster_name: String,
    pub site: String,
    pub vrf: String,
}

/// A VLAN and segment assigned to a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationResult {
    pub vlan_id: VlanId,
    pub segment: Segment,
    pub epg_name: String,
    pub allocated_at: DateTime<Utc>,
}

/// Operations the reconciler needs from the allocator service.
///
/// `allocate_vlan` must be idempotent: asking again for an allocated cluster
/// returns the existing allocation.
#[async_trait]
pub trait AllocatorService: Send + Sync {
    /// Whether the service is reachable.
    async fn health_check(&self) -> bool;

    /// All allocated segments in a VRF, keyed by owner name.
    async fn fetch_allocated_segments(
        &self,
        vrf: &str,
    ) -> Result<BTreeMap<String, Segment>, AllocationError>;

    /// Allocate (or return the existing) VLAN for a cluster.
    async fn allocate_vlan(
        &self,
        request: &AllocationRequest,
    ) -> Result<AllocationResult, AllocationError>;

    /// Look up the segment allocated to a single owner.
    async fn lookup_segment(&self, name: &str) -> Result<Option<Segment>, AllocationError>;
}

/// VLAN ids handed out by the mock allocator.
pub const MOCK_VLAN_RANGE: RangeInclusive<u16> = 100..=3999;

/// Segment pool the mock allocator carves /24s from.
pub const MOCK_SEGMENT_BASE: &str = "10.0.0.0/8";

/// Prefix length of mock segments.
pub const MOCK_SEGMENT_LEN: u8 = 24;

/// Offline allocator used when the service health check fails.
///
/// Every value is a pure function of the request, so repeated offline runs
/// produce the same allocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockAllocator;

impl MockAllocator {
    pub fn new() -> Self {
        Self
    }

    /// The allocation this request always maps to.
    pub fn allocation_for(
        &self,
        request: &AllocationRequest,
    ) -> Result<AllocationResult, AllocationError> {
        let seed = seed(&[&request.site, &request.cluster_name, &request.vrf]);
        let vlan_id = VlanId::from_seed(seed, MOCK_VLAN_RANGE).map_err(mock_error)?;
        let segment = mock_pool()?.pick(seed);

        Ok(AllocationResult {
            vlan_id,
            segment,
            epg_name: format!("EPG_{}_{}", request.cluster_name, vlan_id),
            allocated_at: DateTime::<Utc>::UNIX_EPOCH,
        })
    }

    /// The segment a named owner (an MCE) always maps to.
    pub fn segment_for(&self, name: &str) -> Result<Segment, AllocationError> {
        Ok(mock_pool()?.pick(seed(&["mce", name])))
    }
}

fn mock_pool() -> Result<SubnetPool, AllocationError> {
    let base = Segment::from_cidr(MOCK_SEGMENT_BASE).map_err(mock_error)?;
    SubnetPool::new(base, MOCK_SEGMENT_LEN).map_err(mock_error)
}

fn mock_error(err: NetworkError) -> AllocationError {
    AllocationError::InvalidResponse(format!("mock allocation: {err}"))
}

/// First eight bytes of SHA-256 over the `/`-joined parts.
fn seed(parts: &[&str]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(parts.join("/").as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

#[async_trait]
impl AllocatorService for MockAllocator {
    async fn health_check(&self) -> bool {
        true
    }

    async fn fetch_allocated_segments(
        &self,
        _vrf: &str,
    ) -> Result<BTreeMap<String, Segment>, AllocationError> {
        Ok(BTreeMap::new())
    }

    async fn allocate_vlan(
        &self,
        request: &AllocationRequest,
    ) -> Result<AllocationResult, AllocationError> {
        self.allocation_for(request)
    }

    async fn lookup_segment(&self, name: &str) -> Result<Option<Segment>, AllocationError> {
        self.segment_for(name).map(Some)
    }
}
