//! Cluster descriptor reconciliation.
//!
//! Walks a `sites/` tree of OpenShift cluster descriptors, allocates a VLAN
//! and segment for each cluster that asks for automatic allocation, and
//! patches the descriptor with `vlanId` plus a pair of network rules linking
//! the cluster to its managing MCE.
//!
//! # Invariants
//!
//! - Clusters are processed sequentially and independently
//! - A descriptor is either left untouched or replaced atomically
//! - Re-running over patched descriptors changes nothing

pub mod allocator;
pub mod descriptor;
pub mod error;
pub mod path;
pub mod reconciler;
pub mod rules;
pub mod segments;

pub use allocator::{
    AllocationRequest, AllocationResult, AllocatorService, MockAllocator, DEFAULT_VRF,
};
pub use descriptor::{Descriptor, Patch};
pub use error::{
    AllocationError, ClusterError, DescriptorError, DiscoveryError, IdentityError, ReconcileError,
};
pub use path::{discover, ClusterIdentity, DescriptorPath, TenantDir};
pub use reconciler::{
    ClusterOutcome, ClusterStatus, Reconciler, ReconcilerConfig, RunSummary, SkipReason,
    StatusCounts,
};
pub use rules::{bidirectional_rules, NetworkRule, PortSpec, Protocol};
pub use segments::SegmentCache;
