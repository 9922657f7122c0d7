//! Container image model
//!
//! An [`Image`] is an immutable value: every mutation returns a new image.
//! Layers carry their compressed blob behind an `Arc`, so an image built on
//! top of another shares the exact layer bytes instead of copying them.

pub mod digest;
pub mod manifest;
pub mod store;

pub use digest::Digest;
pub use manifest::{
    ContainerConfig, Descriptor, History, ImageConfig, ImageIndex, OciManifest, RootFs,
};
pub use store::{ImageStore, OciLayoutStore};

use crate::error::{LifecycleError, LifecycleResult};
use crate::layer::LayerArchive;
use manifest::{MEDIA_TYPE_OCI_CONFIG, MEDIA_TYPE_OCI_LAYER_GZIP, MEDIA_TYPE_OCI_MANIFEST};
use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

/// A filesystem layer
#[derive(Debug, Clone)]
pub struct Layer {
    diff_id: Digest,
    digest: Digest,
    media_type: String,
    blob: Arc<[u8]>,
}

impl Layer {
    /// Layer from a compressed blob and the digest of its uncompressed form
    pub fn new(diff_id: Digest, media_type: impl Into<String>, blob: impl Into<Arc<[u8]>>) -> Self {
        let blob = blob.into();
        Self {
            diff_id,
            digest: Digest::of(&blob),
            media_type: media_type.into(),
            blob,
        }
    }

    /// Load a packaged layer into memory
    pub fn from_archive(archive: &LayerArchive) -> LifecycleResult<Self> {
        let blob = fs::read(&archive.path).map_err(|e| LifecycleError::LayerArchive {
            path: archive.path.clone(),
            source: e,
        })?;
        Ok(Self {
            diff_id: archive.diff_id.clone(),
            digest: archive.digest.clone(),
            media_type: MEDIA_TYPE_OCI_LAYER_GZIP.to_string(),
            blob: blob.into(),
        })
    }

    pub fn diff_id(&self) -> &Digest {
        &self.diff_id
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn size(&self) -> u64 {
        self.blob.len() as u64
    }

    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    /// True when both layers hold the very same blob allocation
    pub fn shares_blob(&self, other: &Layer) -> bool {
        Arc::ptr_eq(&self.blob, &other.blob)
    }

    fn descriptor(&self) -> Descriptor {
        Descriptor::new(&self.media_type, self.digest.clone(), self.size())
    }
}

/// Serialized config and manifest of an image
#[derive(Debug, Clone)]
pub struct SerializedImage {
    pub config: Vec<u8>,
    pub manifest: Vec<u8>,
    pub digest: Digest,
}

/// An image: config plus ordered layers
#[derive(Debug, Clone)]
pub struct Image {
    config: ImageConfig,
    layers: Vec<Layer>,
    /// Bytes the image was read from; dropped on any change
    stored: Option<SerializedImage>,
}

impl Image {
    /// Empty image for the host platform
    pub fn scratch() -> Self {
        Self {
            config: ImageConfig {
                architecture: host_arch().to_string(),
                os: "linux".to_string(),
                config: ContainerConfig::default(),
                rootfs: RootFs::default(),
                history: Vec::new(),
                extra: BTreeMap::new(),
            },
            layers: Vec::new(),
            stored: None,
        }
    }

    /// Assemble an image read from storage. The config's diff_ids must line
    /// up with the layers.
    pub fn from_parts(config: ImageConfig, layers: Vec<Layer>) -> LifecycleResult<Self> {
        let diff_ids: Vec<&Digest> = layers.iter().map(Layer::diff_id).collect();
        if config.rootfs.diff_ids.iter().collect::<Vec<_>>() != diff_ids {
            return Err(LifecycleError::ImageInvalid {
                image: "config".to_string(),
                reason: format!(
                    "rootfs lists {} diff_ids for {} layers",
                    config.rootfs.diff_ids.len(),
                    layers.len()
                ),
            });
        }
        Ok(Self {
            config,
            layers,
            stored: None,
        })
    }

    /// Remember the config and manifest bytes this image was read from, so
    /// its digest stays the stored one until it is changed
    pub fn with_stored(mut self, stored: SerializedImage) -> Self {
        self.stored = Some(stored);
        self
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.config.config.labels
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels().get(key).map(String::as_str)
    }

    /// Layer whose uncompressed digest is `diff_id`
    pub fn layer_by_diff_id(&self, diff_id: &Digest) -> Option<&Layer> {
        self.layers.iter().find(|l| l.diff_id() == diff_id)
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.stored = None;
        self.config.config.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_labels<K, V>(mut self, labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.stored = None;
        self.config
            .config
            .labels
            .extend(labels.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_cmd(mut self, cmd: Vec<String>) -> Self {
        self.stored = None;
        self.config.config.cmd = Some(cmd);
        self
    }

    /// Add `layer` on top, with a history entry for it
    pub fn append_layer(mut self, layer: Layer) -> Self {
        self.stored = None;
        self.config.rootfs.diff_ids.push(layer.diff_id().clone());
        self.config.history.push(History {
            created_by: Some(format!("lifecycle: layer {}", layer.diff_id())),
            ..Default::default()
        });
        self.layers.push(layer);
        self
    }

    /// Config and manifest JSON as they are stored. An unchanged image read
    /// from a store yields its original bytes.
    pub fn serialize(&self) -> LifecycleResult<SerializedImage> {
        if let Some(stored) = &self.stored {
            return Ok(stored.clone());
        }
        let config = serde_json::to_vec(&self.config)?;
        let manifest = OciManifest {
            schema_version: 2,
            media_type: MEDIA_TYPE_OCI_MANIFEST.to_string(),
            config: Descriptor::new(MEDIA_TYPE_OCI_CONFIG, Digest::of(&config), config.len() as u64),
            layers: self.layers.iter().map(Layer::descriptor).collect(),
        };
        let manifest = serde_json::to_vec(&manifest)?;
        let digest = Digest::of(&manifest);
        Ok(SerializedImage {
            config,
            manifest,
            digest,
        })
    }

    /// Manifest digest identifying this image
    pub fn digest(&self) -> LifecycleResult<Digest> {
        Ok(self.serialize()?.digest)
    }
}

/// Map Rust `std::env::consts::ARCH` values to OCI platform strings.
fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "powerpc64" => "ppc64le",
        other => other,
    }
}
