//! Error types for cluster reconciliation.

use std::path::PathBuf;

use thiserror::Error;

/// A descriptor path does not match the expected tree shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The path has fewer components than the layout requires.
    #[error("path too shallow: {path} (expected <site>/<tenant-dir>/<environment>/<mce>/<cluster>.yaml)")]
    TooShallow { path: String },

    /// A path component is not valid UTF-8 or is empty.
    #[error("invalid {segment} segment in {path}")]
    InvalidSegment { segment: &'static str, path: String },

    /// The file name does not follow the cluster naming convention.
    #[error("file name {file_name:?} does not match ocp4-*.yaml")]
    BadFileName { file_name: String },

    /// The tenant directory uses an unknown spelling.
    #[error("unexpected tenant directory {found:?} in {path} (expected mce-tenant-clusters or mce-tenant-cluster)")]
    BadTenantDir { found: String, path: String },
}

/// The descriptor tree could not be enumerated.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The root does not exist or is not a directory.
    #[error("sites directory not found: {0}")]
    RootMissing(PathBuf),

    /// Walking the root failed.
    #[error("failed to scan {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Loading, rendering or writing a descriptor failed.
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid YAML or its top level is not a mapping.
    #[error("failed to parse {name}: {message}")]
    Parse { name: String, message: String },

    /// The patched document failed verification and was not written.
    #[error("refusing to write {name}: {message}")]
    Render { name: String, message: String },

    /// The atomic replace failed; the original file is untouched.
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Allocator service failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    /// The service could not be reached or returned a server error.
    #[error("allocator service unavailable: {0}")]
    ServiceUnavailable(String),

    /// No unallocated segment exists for the site/VRF pair.
    #[error("no available segment for site {site} in VRF {vrf}")]
    NoAvailableSegment { site: String, vrf: String },

    /// Credentials were rejected.
    #[error("allocator authentication failed")]
    AuthenticationFailed,

    /// The service rejected the request.
    #[error("allocator rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The response body was malformed or incomplete.
    #[error("invalid allocator response: {0}")]
    InvalidResponse(String),
}

/// A single cluster failed; the run continues with the next one.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Allocation(#[from] AllocationError),
}

impl ClusterError {
    /// Short error class used in summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Identity(_) => "identity",
            Self::Descriptor(DescriptorError::Read { .. }) => "read",
            Self::Descriptor(DescriptorError::Parse { .. }) => "parse",
            Self::Descriptor(DescriptorError::Render { .. }) => "render",
            Self::Descriptor(DescriptorError::Write { .. }) => "write",
            Self::Allocation(_) => "allocation",
        }
    }
}

/// Run-level failures that abort reconciliation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Discovery succeeded but matched nothing.
    #[error("no cluster descriptors found under {0}")]
    NoClusters(PathBuf),
}
