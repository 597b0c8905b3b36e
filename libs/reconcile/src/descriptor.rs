//! Cluster descriptor loading, patching and atomic write-back.
//!
//! Patching is text-preserving: existing top-level `vlanId` / `Networks`
//! blocks are cut out of the original text and the new sections are appended,
//! so comments, key order and formatting of everything else survive. The
//! result is re-parsed and compared against the expected document before it
//! is allowed anywhere near the disk. Documents the line-based cut cannot
//! handle (flow mappings, odd layouts) fall back to a full re-serialization
//! of the merged mapping.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use clusternet_networking::VlanId;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::error::DescriptorError;
use crate::rules::NetworkRule;

pub const KEY_CLUSTER_NAME: &str = "clusterName";
pub const KEY_AUTOMATIC_ALLOCATION: &str = "AutomaticAllocation";
pub const KEY_VLAN_ID: &str = "vlanId";
pub const KEY_NETWORKS: &str = "Networks";

/// A parsed cluster descriptor together with its original text.
#[derive(Debug, Clone)]
pub struct Descriptor {
    name: String,
    text: String,
    document: Mapping,
}

impl Descriptor {
    /// Read and parse a descriptor file.
    pub fn load(path: &Path) -> Result<Self, DescriptorError> {
        let text = fs::read_to_string(path).map_err(|source| DescriptorError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path.display().to_string(), text)
    }

    /// Parse descriptor text. An empty document is an empty mapping.
    pub fn parse(name: impl Into<String>, text: impl Into<String>) -> Result<Self, DescriptorError> {
        let name = name.into();
        let text = text.into();

        let value: Value = if has_content(&text) {
            serde_yaml::from_str(&text).map_err(|e| DescriptorError::Parse {
                name: name.clone(),
                message: e.to_string(),
            })?
        } else {
            Value::Null
        };

        let document = match value {
            Value::Mapping(mapping) => mapping,
            Value::Null => Mapping::new(),
            other => {
                return Err(DescriptorError::Parse {
                    name,
                    message: format!("top level must be a mapping, found {}", kind_of(&other)),
                });
            }
        };

        Ok(Self {
            name,
            text,
            document,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn document(&self) -> &Mapping {
        &self.document
    }

    /// True once either allocation field is present.
    pub fn is_configured(&self) -> bool {
        self.document.contains_key(KEY_NETWORKS) || self.document.contains_key(KEY_VLAN_ID)
    }

    /// Allocation is enabled unless `AutomaticAllocation` is explicitly `false`.
    pub fn automatic_allocation(&self) -> bool {
        !matches!(
            self.document.get(KEY_AUTOMATIC_ALLOCATION),
            Some(Value::Bool(false))
        )
    }

    pub fn cluster_name(&self) -> Option<&str> {
        self.document.get(KEY_CLUSTER_NAME).and_then(Value::as_str)
    }

    /// Existing `vlanId`, accepting integers and numeric strings.
    pub fn vlan_id(&self) -> Option<i64> {
        match self.document.get(KEY_VLAN_ID)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Existing `Networks` value, unparsed.
    pub fn networks(&self) -> Option<&Value> {
        self.document.get(KEY_NETWORKS)
    }
}

/// Anything besides blank lines, comments and document markers.
fn has_content(text: &str) -> bool {
    text.lines().any(|line| {
        let line = line.trim();
        !(line.is_empty() || line.starts_with('#') || line == "---" || line == "...")
    })
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Allocation fields to merge into a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub vlan_id: VlanId,
    /// `None` when the MCE segment is unknown; existing `Networks` are then left alone.
    pub networks: Option<Vec<NetworkRule>>,
}

#[derive(Serialize)]
struct Sections<'a> {
    #[serde(rename = "vlanId")]
    vlan_id: u16,
    #[serde(rename = "Networks", skip_serializing_if = "Option::is_none")]
    networks: Option<&'a [NetworkRule]>,
}

impl Patch {
    /// `Networks` as a document value. Every rule is serialized on its own,
    /// so the resulting sequence shares no structure between entries.
    pub fn networks_value(&self) -> Result<Option<Value>, serde_yaml::Error> {
        self.networks.as_deref().map(serde_yaml::to_value).transpose()
    }

    /// Whether applying this patch would leave the document unchanged.
    pub fn is_noop_for(&self, descriptor: &Descriptor) -> Result<bool, DescriptorError> {
        if descriptor.vlan_id() != Some(i64::from(self.vlan_id.get())) {
            return Ok(false);
        }

        match self.networks_value().map_err(|e| render_error(descriptor, e))? {
            None => Ok(true),
            Some(expected) => Ok(descriptor.networks() == Some(&expected)),
        }
    }

    /// The document this patch should produce.
    fn expected_document(&self, descriptor: &Descriptor) -> Result<Mapping, DescriptorError> {
        let mut document = descriptor.document.clone();
        document.insert(
            Value::from(KEY_VLAN_ID),
            Value::from(u64::from(self.vlan_id.get())),
        );
        if let Some(networks) = self.networks_value().map_err(|e| render_error(descriptor, e))? {
            document.insert(Value::from(KEY_NETWORKS), networks);
        }
        Ok(document)
    }

    fn sections_yaml(&self, descriptor: &Descriptor) -> Result<String, DescriptorError> {
        serde_yaml::to_string(&Sections {
            vlan_id: self.vlan_id.get(),
            networks: self.networks.as_deref(),
        })
        .map_err(|e| render_error(descriptor, e))
    }
}

fn render_error(descriptor: &Descriptor, err: impl std::fmt::Display) -> DescriptorError {
    DescriptorError::Render {
        name: descriptor.name.clone(),
        message: err.to_string(),
    }
}

/// Produce the patched document text.
///
/// The output is verified to parse back to exactly the original mapping with
/// the patch applied.
pub fn render(descriptor: &Descriptor, patch: &Patch) -> Result<String, DescriptorError> {
    let expected = patch.expected_document(descriptor)?;

    let preserved = render_preserving(descriptor, patch)?;
    if parses_to(&preserved, &expected) {
        return Ok(preserved);
    }

    debug!(
        descriptor = %descriptor.name,
        "Text-preserving patch did not verify, re-serializing document"
    );
    let merged = serde_yaml::to_string(&expected).map_err(|e| render_error(descriptor, e))?;
    if parses_to(&merged, &expected) {
        return Ok(merged);
    }

    Err(render_error(
        descriptor,
        "patched document does not round-trip",
    ))
}

fn parses_to(text: &str, expected: &Mapping) -> bool {
    matches!(serde_yaml::from_str::<Value>(text), Ok(Value::Mapping(m)) if &m == expected)
}

fn render_preserving(descriptor: &Descriptor, patch: &Patch) -> Result<String, DescriptorError> {
    let strip_networks = patch.networks.is_some();
    let mut out = String::with_capacity(descriptor.text.len() + 512);
    let mut skipping = false;
    let mut held_blank = String::new();

    for line in descriptor.text.split_inclusive('\n') {
        if skipping {
            if line.trim().is_empty() {
                held_blank.push_str(line);
                continue;
            }
            if is_block_continuation(line) {
                held_blank.clear();
                continue;
            }
            skipping = false;
            out.push_str(&held_blank);
            held_blank.clear();
        }

        if let Some(key) = top_level_key(line) {
            if key == KEY_VLAN_ID || (strip_networks && key == KEY_NETWORKS) {
                skipping = true;
                continue;
            }
        }
        out.push_str(line);
    }

    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&patch.sections_yaml(descriptor)?);
    Ok(out)
}

/// Lines that belong to the block of the preceding top-level key.
fn is_block_continuation(line: &str) -> bool {
    if line.starts_with("---") || line.starts_with("...") {
        return false;
    }
    line.starts_with([' ', '\t', '-'])
}

/// The key of a `key: value` line at column zero.
fn top_level_key(line: &str) -> Option<&str> {
    if line.starts_with([' ', '\t', '#', '-']) {
        return None;
    }
    let line = line.trim_end();
    let (key, rest) = line.split_once(':')?;
    if !(rest.is_empty() || rest.starts_with([' ', '\t'])) {
        return None;
    }
    let key = key.trim();
    Some(
        key.strip_prefix('"')
            .and_then(|k| k.strip_suffix('"'))
            .or_else(|| key.strip_prefix('\'').and_then(|k| k.strip_suffix('\'')))
            .unwrap_or(key),
    )
}

/// Replace `path` with `contents` via a sibling temp file and rename.
///
/// On failure the temp file is removed and the original is left as it was.
pub fn write_atomic(path: &Path, contents: &str) -> Result<(), DescriptorError> {
    let tmp_path = temp_path_for(path);

    let result = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(contents.as_bytes())?;
        if let Ok(meta) = fs::metadata(path) {
            file.set_permissions(meta.permissions())?;
        }
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if let Err(source) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(DescriptorError::Write {
            path: path.to_path_buf(),
            source,
        });
    }

    debug!(path = %path.display(), bytes = contents.len(), "Wrote descriptor");
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "descriptor".to_string());
    path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()))
}
