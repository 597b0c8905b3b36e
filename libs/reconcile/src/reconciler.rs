//! Reconciliation of cluster descriptors against the allocator service.
//!
//! Clusters are processed one at a time. Each ends in exactly one of
//! [`ClusterStatus`]; per-cluster failures are recorded and never stop the
//! run. Only discovery failures abort.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clusternet_networking::{Segment, VlanId};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::allocator::{AllocationRequest, AllocatorService, MockAllocator, DEFAULT_VRF};
use crate::descriptor::{render, write_atomic, Descriptor, Patch};
use crate::error::{ClusterError, ReconcileError};
use crate::path::{discover, ClusterIdentity, DescriptorPath};
use crate::rules::bidirectional_rules;
use crate::segments::SegmentCache;

/// Reconciliation run configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Root of the `sites/` tree.
    pub sites_dir: PathBuf,

    /// VRF to allocate in.
    pub vrf: String,

    /// Compute and log patches without writing.
    pub dry_run: bool,

    /// Re-check descriptors that already carry allocation fields.
    pub update_existing: bool,

    /// MCEs whose clusters are left alone.
    pub skip_mces: BTreeSet<String>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            sites_dir: PathBuf::from("sites"),
            vrf: DEFAULT_VRF.to_string(),
            dry_run: false,
            update_existing: false,
            skip_mces: BTreeSet::new(),
        }
    }
}

/// Terminal state of one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    Skipped,
    Updated,
    Unchanged,
    Failed,
}

impl std::fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Skipped => "skipped",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of reconciling one descriptor.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterOutcome {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mce_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub status: ClusterStatus,
    /// Skip reason or error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Error class for failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vlan_id: Option<VlanId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_segment: Option<Segment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mce_segment: Option<Segment>,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl ClusterOutcome {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            cluster_name: None,
            mce_name: None,
            site: None,
            status: ClusterStatus::Failed,
            detail: None,
            error_kind: None,
            vlan_id: None,
            cluster_segment: None,
            mce_segment: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Best available name for display.
    pub fn display_name(&self) -> String {
        self.cluster_name
            .clone()
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

/// Counts per terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub skipped: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub outcomes: Vec<ClusterOutcome>,
    /// Allocations came from the offline mock allocator.
    pub mock_allocation: bool,
    pub dry_run: bool,
    /// The run stopped early on a shutdown signal.
    pub interrupted: bool,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for outcome in &self.outcomes {
            match outcome.status {
                ClusterStatus::Skipped => counts.skipped += 1,
                ClusterStatus::Updated => counts.updated += 1,
                ClusterStatus::Unchanged => counts.unchanged += 1,
                ClusterStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| o.status == ClusterStatus::Failed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ClusterOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == ClusterStatus::Failed)
    }
}

/// Why a cluster was not allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MceExcluded,
    AlreadyConfigured,
    AllocationDisabled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MceExcluded => "mce excluded",
            Self::AlreadyConfigured => "already configured",
            Self::AllocationDisabled => "automatic allocation disabled",
        }
    }
}

enum Step {
    Skipped(SkipReason),
    Updated,
    Unchanged,
}

/// Drives descriptors toward their allocated state.
pub struct Reconciler<A> {
    allocator: A,
    mock: MockAllocator,
    config: ReconcilerConfig,
    cache: SegmentCache,
    offline: bool,
}

impl<A: AllocatorService> Reconciler<A> {
    /// Create a new reconciler.
    pub fn new(allocator: A, config: ReconcilerConfig) -> Self {
        Self {
            allocator,
            mock: MockAllocator::new(),
            config,
            cache: SegmentCache::new(),
            offline: false,
        }
    }

    /// Discover and reconcile every descriptor under the sites root.
    ///
    /// The shutdown signal is checked between clusters; the in-flight
    /// cluster always runs to completion.
    pub async fn run(
        &mut self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<RunSummary, ReconcileError> {
        let started = Instant::now();

        info!(sites_dir = %self.config.sites_dir.display(), "Scanning for cluster descriptors");
        let paths = discover(&self.config.sites_dir)?;
        if paths.is_empty() {
            return Err(ReconcileError::NoClusters(self.config.sites_dir.clone()));
        }
        info!(count = paths.len(), "Found cluster descriptors");

        self.offline = !self.allocator.health_check().await;
        if self.offline {
            warn!("Allocator service unavailable, falling back to deterministic mock allocation");
        } else {
            info!("Allocator service is available");
        }

        let total = paths.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut interrupted = false;

        for (index, path) in paths.iter().enumerate() {
            tokio::task::yield_now().await;
            if *shutdown.borrow() {
                warn!(
                    processed = index,
                    remaining = total - index,
                    "Shutdown requested, stopping before next cluster"
                );
                interrupted = true;
                break;
            }

            outcomes.push(self.reconcile_cluster(path).await);

            let done = index + 1;
            if done % 10 == 0 || done == total {
                info!(done, total, "Reconciliation progress");
            }

            // A signal received mid-cluster still marks the run interrupted,
            // even when no cluster is left.
            if *shutdown.borrow() {
                warn!(
                    processed = done,
                    remaining = total - done,
                    "Shutdown requested, stopping after current cluster"
                );
                interrupted = true;
                break;
            }
        }

        Ok(RunSummary {
            outcomes,
            mock_allocation: self.offline,
            dry_run: self.config.dry_run,
            interrupted,
            elapsed: started.elapsed(),
        })
    }

    /// Reconcile a single descriptor file.
    pub async fn reconcile_cluster(&mut self, path: &Path) -> ClusterOutcome {
        let started = Instant::now();
        let mut outcome = ClusterOutcome::new(path);

        match self.process(path, &mut outcome).await {
            Ok(Step::Skipped(reason)) => {
                debug!(path = %path.display(), reason = reason.as_str(), "Skipped cluster");
                outcome.status = ClusterStatus::Skipped;
                outcome.detail = Some(reason.as_str().to_string());
            }
            Ok(Step::Updated) => outcome.status = ClusterStatus::Updated,
            Ok(Step::Unchanged) => outcome.status = ClusterStatus::Unchanged,
            Err(e) => {
                error!(
                    path = %path.display(),
                    site = outcome.site.as_deref().unwrap_or("-"),
                    mce = outcome.mce_name.as_deref().unwrap_or("-"),
                    cluster = outcome.cluster_name.as_deref().unwrap_or("-"),
                    error = %e,
                    "Cluster reconciliation failed"
                );
                outcome.status = ClusterStatus::Failed;
                outcome.error_kind = Some(e.kind());
                outcome.detail = Some(e.to_string());
            }
        }

        outcome.elapsed = started.elapsed();
        outcome
    }

    async fn process(
        &mut self,
        path: &Path,
        outcome: &mut ClusterOutcome,
    ) -> Result<Step, ClusterError> {
        let location = DescriptorPath::parse(path)?;
        let identity = location.identity();
        outcome.site = Some(identity.site.clone());
        outcome.mce_name = Some(identity.mce_name.clone());
        outcome.cluster_name = Some(identity.cluster_name.clone());

        if self.config.skip_mces.contains(&identity.mce_name) {
            return Ok(Step::Skipped(SkipReason::MceExcluded));
        }

        let descriptor = Descriptor::load(path)?;

        if descriptor.is_configured() && !self.config.update_existing {
            return Ok(Step::Skipped(SkipReason::AlreadyConfigured));
        }
        if !descriptor.automatic_allocation() {
            return Ok(Step::Skipped(SkipReason::AllocationDisabled));
        }

        info!(
            site = %identity.site,
            mce = %identity.mce_name,
            cluster = %identity.cluster_name,
            "Processing cluster"
        );

        let patch = self.plan(&identity, outcome).await?;

        if patch.is_noop_for(&descriptor)? {
            info!(cluster = %identity.cluster_name, vlan_id = %patch.vlan_id, "Already up to date");
            return Ok(Step::Unchanged);
        }

        let rendered = render(&descriptor, &patch)?;

        if self.config.dry_run {
            info!(
                cluster = %identity.cluster_name,
                vlan_id = %patch.vlan_id,
                networks = patch.networks.is_some(),
                "DRY-RUN: would update descriptor"
            );
            debug!(path = %path.display(), patched = %rendered, "DRY-RUN: patched descriptor");
            return Ok(Step::Updated);
        }

        write_atomic(path, &rendered)?;
        info!(
            cluster = %identity.cluster_name,
            vlan_id = %patch.vlan_id,
            networks = patch.networks.is_some(),
            "Updated descriptor"
        );
        Ok(Step::Updated)
    }

    /// Allocate and build the patch for one cluster.
    async fn plan(
        &mut self,
        identity: &ClusterIdentity,
        outcome: &mut ClusterOutcome,
    ) -> Result<Patch, ClusterError> {
        let allocator: &dyn AllocatorService = if self.offline {
            &self.mock
        } else {
            &self.allocator
        };

        let request = AllocationRequest {
            cluster_name: identity.cluster_name.clone(),
            site: identity.site.clone(),
            vrf: self.config.vrf.clone(),
        };
        let allocation = allocator.allocate_vlan(&request).await?;
        debug!(
            cluster = %identity.cluster_name,
            vlan_id = %allocation.vlan_id,
            segment = %allocation.segment,
            epg = %allocation.epg_name,
            "Allocated VLAN"
        );
        outcome.vlan_id = Some(allocation.vlan_id);
        outcome.cluster_segment = Some(allocation.segment);

        self.cache
            .insert(identity.cluster_name.clone(), allocation.segment);

        let mce_segment = self
            .cache
            .resolve(allocator, &self.config.vrf, &identity.mce_name)
            .await;
        outcome.mce_segment = mce_segment;

        let networks = match mce_segment {
            Some(mce_segment) => Some(bidirectional_rules(
                &mce_segment.to_string(),
                &identity.mce_name,
                &allocation.segment.to_string(),
                &identity.cluster_name,
            )),
            None => {
                warn!(
                    mce = %identity.mce_name,
                    cluster = %identity.cluster_name,
                    "MCE segment not found, inserting vlanId only"
                );
                None
            }
        };

        Ok(Patch {
            vlan_id: allocation.vlan_id,
            networks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconciler_config_default() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.sites_dir, PathBuf::from("sites"));
        assert_eq!(config.vrf, DEFAULT_VRF);
        assert!(!config.dry_run);
        assert!(!config.update_existing);
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = RunSummary {
            outcomes: Vec::new(),
            mock_allocation: false,
            dry_run: false,
            interrupted: false,
            elapsed: Duration::ZERO,
        };
        for status in [
            ClusterStatus::Skipped,
            ClusterStatus::Updated,
            ClusterStatus::Updated,
            ClusterStatus::Failed,
        ] {
            let mut outcome = ClusterOutcome::new(Path::new("x"));
            outcome.status = status;
            summary.outcomes.push(outcome);
        }

        assert_eq!(
            summary.counts(),
            StatusCounts {
                skipped: 1,
                updated: 2,
                unchanged: 0,
                failed: 1,
            }
        );
        assert!(summary.has_failures());
        assert_eq!(summary.failures().count(), 1);
    }
}
