//! Error types for the lifecycle
//!
//! All modules use `LifecycleResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for lifecycle operations
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// All errors that can occur while analyzing or exporting
#[derive(Error, Debug)]
pub enum LifecycleError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to read buildpack group {path}: {reason}")]
    GroupRead { path: PathBuf, reason: String },

    #[error("Invalid image reference: {0}")]
    ImageRefInvalid(String),

    // Cache errors
    #[error("Failed to remove cached layer {path}: {source}")]
    CacheRemove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to restore metadata for {buildpack}/{layer}: {source}")]
    CacheRestore {
        buildpack: String,
        layer: String,
        #[source]
        source: Box<LifecycleError>,
    },

    #[error("Failed to read analyzer metadata {path}: {reason}")]
    MetadataRead { path: PathBuf, reason: String },

    // Layer errors
    #[error("Failed to archive {path} as a layer: {source}")]
    LayerArchive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid layer metadata {path}: {reason}")]
    LayerMetadataInvalid { path: PathBuf, reason: String },

    #[error("Layer {buildpack}/{layer} has metadata but no directory, and no previous image was supplied")]
    MetadataOnlyLayerWithoutPrevious { buildpack: String, layer: String },

    #[error("Previous image has no label '{0}'")]
    MissingDiffIdLabel(String),

    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    #[error("Layer {diff_id} for {buildpack}/{layer} not found in previous image")]
    PreviousLayerNotFound {
        buildpack: String,
        layer: String,
        diff_id: String,
    },

    // Image errors
    #[error("Stack image not found: {0}")]
    StackNotFound(String),

    #[error("Missing process with web type in {0}")]
    MissingWebProcess(PathBuf),

    #[error("Invalid image {image}: {reason}")]
    ImageInvalid { image: String, reason: String },

    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("Failed to write image {image}: {source}")]
    ImageWrite {
        image: String,
        #[source]
        source: Box<LifecycleError>,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("{0}")]
    User(String),
}

impl LifecycleError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Wrap a store failure with the image name it was writing
    pub fn image_write(image: impl Into<String>, source: LifecycleError) -> Self {
        Self::ImageWrite {
            image: image.into(),
            source: Box::new(source),
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::MissingWebProcess(_) => {
                Some("Declare a [[processes]] entry with type = \"web\" in the app metadata")
            }
            Self::MetadataOnlyLayerWithoutPrevious { .. } => {
                Some("Pass the previous image so unchanged layers can be reused")
            }
            Self::GroupRead { .. } => Some("Check --group points at the detected group.toml"),
            Self::StackNotFound(_) => Some("Check --stack points at an existing image layout"),
            _ => None,
        }
    }
}
