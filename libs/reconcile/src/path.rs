//! Cluster identity resolution from the descriptor tree layout.
//!
//! Descriptors live at
//! `sites/<site>/<mce-tenant-clusters|mce-tenant-cluster>/<environment>/<mce>/<cluster>.yaml`.
//! The last five path components are matched against that schema by name, so
//! the root the tree is mounted under does not matter.

use std::path::{Component, Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::error::{DiscoveryError, IdentityError};

/// Cluster descriptor file names start with this prefix.
pub const CLUSTER_FILE_PREFIX: &str = "ocp4-";

/// Accepted descriptor file extensions.
pub const DESCRIPTOR_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// Number of path components covered by the layout (site through file).
const LAYOUT_DEPTH: usize = 5;

/// Accepted spellings of the tenant directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TenantDir {
    /// `mce-tenant-clusters`
    Clusters,
    /// `mce-tenant-cluster`
    Cluster,
}

impl TenantDir {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clusters => "mce-tenant-clusters",
            Self::Cluster => "mce-tenant-cluster",
        }
    }

    pub fn from_dir_name(name: &str) -> Option<Self> {
        match name {
            "mce-tenant-clusters" => Some(Self::Clusters),
            "mce-tenant-cluster" => Some(Self::Cluster),
            _ => None,
        }
    }
}

/// Site, MCE and cluster a descriptor belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterIdentity {
    pub site: String,
    pub mce_name: String,
    pub cluster_name: String,
}

impl std::fmt::Display for ClusterIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.site, self.mce_name, self.cluster_name)
    }
}

/// A descriptor location decomposed into its named segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorPath {
    pub site: String,
    pub tenant_dir: TenantDir,
    pub environment: String,
    pub mce_name: String,
    pub cluster_name: String,
    pub extension: String,
}

impl DescriptorPath {
    /// Match a path against the descriptor layout.
    ///
    /// Pure: only the path string is inspected.
    pub fn parse(path: &Path) -> Result<Self, IdentityError> {
        let display = path.display().to_string();

        let mut tail = Vec::with_capacity(LAYOUT_DEPTH);
        for component in path.components().rev().take(LAYOUT_DEPTH) {
            match component {
                Component::Normal(name) => tail.push(name),
                _ => break,
            }
        }
        if tail.len() < LAYOUT_DEPTH {
            return Err(IdentityError::TooShallow { path: display });
        }

        let segment = |index: usize, name: &'static str| -> Result<String, IdentityError> {
            tail[index]
                .to_str()
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| IdentityError::InvalidSegment {
                    segment: name,
                    path: display.clone(),
                })
        };

        let file_name = segment(0, "file name")?;
        let (cluster_name, extension) = split_descriptor_name(&file_name).ok_or_else(|| {
            IdentityError::BadFileName {
                file_name: file_name.clone(),
            }
        })?;

        let mce_name = segment(1, "mce")?;
        let environment = segment(2, "environment")?;
        let tenant = segment(3, "tenant directory")?;
        let tenant_dir =
            TenantDir::from_dir_name(&tenant).ok_or_else(|| IdentityError::BadTenantDir {
                found: tenant.clone(),
                path: display.clone(),
            })?;
        let site = segment(4, "site")?;

        Ok(Self {
            site,
            tenant_dir,
            environment,
            mce_name,
            cluster_name: cluster_name.to_string(),
            extension: extension.to_string(),
        })
    }

    /// The identity this location encodes.
    pub fn identity(&self) -> ClusterIdentity {
        ClusterIdentity {
            site: self.site.clone(),
            mce_name: self.mce_name.clone(),
            cluster_name: self.cluster_name.clone(),
        }
    }

    /// Path relative to the sites root; the inverse of [`DescriptorPath::parse`].
    pub fn relative_path(&self) -> PathBuf {
        [
            self.site.as_str(),
            self.tenant_dir.as_str(),
            self.environment.as_str(),
            self.mce_name.as_str(),
        ]
        .iter()
        .collect::<PathBuf>()
        .join(format!("{}.{}", self.cluster_name, self.extension))
    }
}

/// Split `ocp4-foo.yaml` into (`ocp4-foo`, `yaml`).
fn split_descriptor_name(file_name: &str) -> Option<(&str, &str)> {
    let (stem, extension) = file_name.rsplit_once('.')?;
    let suffix = stem.strip_prefix(CLUSTER_FILE_PREFIX)?;
    if suffix.is_empty() || !DESCRIPTOR_EXTENSIONS.contains(&extension) {
        return None;
    }
    Some((stem, extension))
}

/// Whether a file name looks like a cluster descriptor.
pub fn is_descriptor_file_name(file_name: &str) -> bool {
    split_descriptor_name(file_name).is_some()
}

/// Recursively find descriptor files under `root`, sorted by path.
///
/// Entries that do not match the file name convention are skipped silently;
/// unreadable subdirectories are logged and skipped.
pub fn discover(root: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    if !root.is_dir() {
        return Err(DiscoveryError::RootMissing(root.to_path_buf()));
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => {
                return Err(DiscoveryError::Walk {
                    path: root.to_path_buf(),
                    source: err,
                });
            }
            Err(err) => {
                warn!(error = %err, "Skipping unreadable entry");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        if entry
            .file_name()
            .to_str()
            .is_some_and(is_descriptor_file_name)
        {
            found.push(entry.into_path());
        }
    }

    Ok(found)
}
