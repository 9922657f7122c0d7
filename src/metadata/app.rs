//! Layer, buildpack, and image metadata
//!
//! [`LayerMetadata`] is persisted next to each cached layer as TOML and
//! embedded, per buildpack, in the aggregate [`AppImageMetadata`] JSON label.
//! Both encodings use the same field names so that a layer's file and its
//! label entry decode to equal values.

use crate::error::{LifecycleError, LifecycleResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Metadata of a single buildpack layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerMetadata {
    /// Diff identifier of the layer content (`sha256:<hex>`)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sha: String,

    /// Needed while building
    #[serde(default)]
    pub build: bool,

    /// Needed at runtime
    #[serde(default)]
    pub launch: bool,

    /// Buildpack-defined document, preserved verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<toml::Value>,
}

impl LayerMetadata {
    /// Parse layer metadata from TOML text
    pub fn parse(content: &str) -> LifecycleResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read a `<layer>.toml` file
    pub fn from_file(path: &Path) -> LifecycleResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| LifecycleError::io(format!("reading {}", path.display()), e))?;

        Self::parse(&content).map_err(|e| LifecycleError::LayerMetadataInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Encode as TOML text
    pub fn to_toml(&self) -> LifecycleResult<String> {
        Ok(toml::to_string(self)?)
    }

    /// Write a `<layer>.toml` file, creating the buildpack directory if needed
    pub fn write_file(&self, path: &Path) -> LifecycleResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| LifecycleError::io(format!("creating {}", parent.display()), e))?;
        }

        let content = self.to_toml()?;
        fs::write(path, content)
            .map_err(|e| LifecycleError::io(format!("writing {}", path.display()), e))?;

        debug!("Wrote layer metadata {}", path.display());
        Ok(())
    }

    /// Runtime-only layer (never needed during a build)
    pub fn is_launch_only(&self) -> bool {
        !self.build
    }
}

/// Layers contributed by one buildpack
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildpackMetadata {
    /// Buildpack id (matches the launch-directory folder name)
    #[serde(rename = "key", alias = "id")]
    pub id: String,

    /// Layer name to metadata
    #[serde(default)]
    pub layers: BTreeMap<String, LayerMetadata>,
}

impl BuildpackMetadata {
    /// Create an empty record for a buildpack
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            layers: BTreeMap::new(),
        }
    }

    /// Look up a layer by name
    pub fn layer(&self, name: &str) -> Option<&LayerMetadata> {
        self.layers.get(name)
    }
}

/// Base image the app was built on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackMetadata {
    /// Digest of the stack image
    #[serde(default)]
    pub sha: String,
}

/// Aggregate metadata recorded on every exported image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppImageMetadata {
    /// Buildpacks in group order
    #[serde(default)]
    pub buildpacks: Vec<BuildpackMetadata>,

    /// Stack image the layers were appended to
    #[serde(default)]
    pub stack: StackMetadata,
}

impl AppImageMetadata {
    /// Decode the aggregate label of a previous image.
    ///
    /// A missing, empty, or malformed label means "no metadata": it is
    /// logged as a warning and the caller proceeds as on a first build.
    pub fn from_label(label: Option<&str>) -> Option<Self> {
        let label = match label.map(str::trim) {
            Some(label) if !label.is_empty() => label,
            _ => {
                warn!("Previous image metadata was not found");
                return None;
            }
        };

        match serde_json::from_str(label) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!("Previous image metadata was incompatible: {}", e);
                None
            }
        }
    }

    /// Read the JSON document from a file. Unlike a label, the file was
    /// named explicitly, so unreadable or malformed content is an error.
    pub fn from_file(path: &Path) -> LifecycleResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| LifecycleError::MetadataRead {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        serde_json::from_str(&content).map_err(|e| LifecycleError::MetadataRead {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Encode for the [`super::labels::BUILD_METADATA`] label
    pub fn to_label(&self) -> LifecycleResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Look up a buildpack by id
    pub fn buildpack(&self, id: &str) -> Option<&BuildpackMetadata> {
        self.buildpacks.iter().find(|bp| bp.id == id)
    }
}
