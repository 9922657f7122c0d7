//! Image storage
//!
//! [`ImageStore`] is the seam between the lifecycle and wherever images
//! live. [`OciLayoutStore`] keeps them in an OCI image layout directory:
//!
//! ```text
//! <dir>/oci-layout
//! <dir>/index.json            tag -> manifest, via ref.name annotation
//! <dir>/blobs/sha256/<hex>    manifests, configs, layers
//! ```

use crate::error::{LifecycleError, LifecycleResult};
use crate::image::manifest::{
    Descriptor, ImageConfig, ImageIndex, OciManifest, MEDIA_TYPE_OCI_MANIFEST,
};
use crate::image::{Digest, Image, Layer, SerializedImage};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

const LAYOUT_FILE: &str = "oci-layout";
const INDEX_FILE: &str = "index.json";
const LAYOUT_CONTENT: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;
const DEFAULT_TAG: &str = "latest";

/// Where images are read from and written to
pub trait ImageStore {
    /// Human-readable reference
    fn name(&self) -> String;

    /// The stored image, `None` when it does not exist
    fn image(&self) -> LifecycleResult<Option<Image>>;

    fn found(&self) -> LifecycleResult<bool> {
        Ok(self.image()?.is_some())
    }

    /// Store `image`, returning its manifest digest
    fn write(&self, image: &Image) -> LifecycleResult<Digest>;
}

/// An image tag inside an OCI layout directory, written `<dir>[:<tag>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciLayoutStore {
    dir: PathBuf,
    tag: String,
}

impl OciLayoutStore {
    pub fn new(dir: impl Into<PathBuf>, tag: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            tag: tag.into(),
        }
    }

    /// Parse `<dir>[:<tag>]`. The tag defaults to `latest`.
    pub fn parse(reference: &str) -> LifecycleResult<Self> {
        if reference.trim().is_empty() {
            return Err(LifecycleError::ImageRefInvalid(reference.to_string()));
        }

        let (dir, tag) = match reference.rsplit_once(':') {
            Some((dir, tag)) if !tag.contains('/') => (dir, tag),
            _ => (reference, DEFAULT_TAG),
        };
        if dir.is_empty() || tag.is_empty() {
            return Err(LifecycleError::ImageRefInvalid(reference.to_string()));
        }
        Ok(Self::new(dir, tag))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    fn blobs_dir(&self) -> PathBuf {
        self.dir.join("blobs").join("sha256")
    }

    fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.blobs_dir().join(digest.hex())
    }

    fn read_index(&self) -> LifecycleResult<Option<ImageIndex>> {
        let path = self.dir.join(INDEX_FILE);
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                LifecycleError::ImageInvalid {
                    image: self.name(),
                    reason: format!("{}: {}", path.display(), e),
                }
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LifecycleError::io(format!("reading {}", path.display()), e)),
        }
    }

    /// Read a blob and check it against its digest
    fn read_blob(&self, digest: &Digest) -> LifecycleResult<Vec<u8>> {
        let path = self.blob_path(digest);
        let bytes = fs::read(&path)
            .map_err(|e| LifecycleError::io(format!("reading blob {}", path.display()), e))?;
        let actual = Digest::of(&bytes);
        if &actual != digest {
            return Err(LifecycleError::DigestMismatch {
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(bytes)
    }

    /// Read a JSON blob, returning the raw bytes alongside the decoded value
    fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        digest: &Digest,
    ) -> LifecycleResult<(Vec<u8>, T)> {
        let bytes = self.read_blob(digest)?;
        let value = serde_json::from_slice(&bytes).map_err(|e| LifecycleError::ImageInvalid {
            image: self.name(),
            reason: format!("blob {}: {}", digest, e),
        })?;
        Ok((bytes, value))
    }

    /// Write a blob unless one with the same digest is already present
    fn write_blob(&self, digest: &Digest, bytes: &[u8]) -> LifecycleResult<()> {
        let path = self.blob_path(digest);
        if path.exists() {
            debug!("Blob {} already stored", digest);
            return Ok(());
        }
        write_atomic(&self.blobs_dir(), &path, bytes)
    }

    fn write_layout(&self, image: &Image) -> LifecycleResult<Digest> {
        fs::create_dir_all(self.blobs_dir()).map_err(|e| {
            LifecycleError::io(format!("creating {}", self.blobs_dir().display()), e)
        })?;
        write_atomic(&self.dir, &self.dir.join(LAYOUT_FILE), LAYOUT_CONTENT.as_bytes())?;

        for layer in image.layers() {
            self.write_blob(layer.digest(), layer.blob())?;
        }

        let serialized = image.serialize()?;
        self.write_blob(&Digest::of(&serialized.config), &serialized.config)?;
        self.write_blob(&serialized.digest, &serialized.manifest)?;

        let mut index = self.read_index()?.unwrap_or_default();
        index.set_tag(
            &self.tag,
            Descriptor::new(
                MEDIA_TYPE_OCI_MANIFEST,
                serialized.digest.clone(),
                serialized.manifest.len() as u64,
            ),
        );
        write_atomic(
            &self.dir,
            &self.dir.join(INDEX_FILE),
            &serde_json::to_vec_pretty(&index)?,
        )?;

        Ok(serialized.digest)
    }
}

impl ImageStore for OciLayoutStore {
    fn name(&self) -> String {
        format!("{}:{}", self.dir.display(), self.tag)
    }

    fn image(&self) -> LifecycleResult<Option<Image>> {
        let Some(index) = self.read_index()? else {
            debug!("No image layout at {}", self.dir.display());
            return Ok(None);
        };
        let Some(descriptor) = index.find_tag(&self.tag) else {
            debug!("Tag {} not found in {}", self.tag, self.dir.display());
            return Ok(None);
        };

        let (manifest_bytes, manifest): (_, OciManifest) = self.read_json(&descriptor.digest)?;
        let (config_bytes, config): (_, ImageConfig) = self.read_json(&manifest.config.digest)?;

        if manifest.layers.len() != config.rootfs.diff_ids.len() {
            return Err(LifecycleError::ImageInvalid {
                image: self.name(),
                reason: format!(
                    "manifest has {} layers but config lists {} diff_ids",
                    manifest.layers.len(),
                    config.rootfs.diff_ids.len()
                ),
            });
        }

        let layers = manifest
            .layers
            .iter()
            .zip(&config.rootfs.diff_ids)
            .map(|(desc, diff_id)| {
                let blob = self.read_blob(&desc.digest)?;
                Ok(Layer::new(diff_id.clone(), desc.media_type.clone(), blob))
            })
            .collect::<LifecycleResult<Vec<_>>>()?;

        debug!("Read {} with {} layers", self.name(), layers.len());
        let stored = SerializedImage {
            config: config_bytes,
            manifest: manifest_bytes,
            digest: descriptor.digest.clone(),
        };
        Image::from_parts(config, layers).map(|image| Some(image.with_stored(stored)))
    }

    fn write(&self, image: &Image) -> LifecycleResult<Digest> {
        let digest = self
            .write_layout(image)
            .map_err(|e| LifecycleError::image_write(self.name(), e))?;
        info!("Wrote {} ({})", self.name(), digest);
        Ok(digest)
    }
}

/// Write through a temp file in `dir`, then rename over `path`
fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> LifecycleResult<()> {
    let ctx = || format!("writing {}", path.display());
    let mut temp = NamedTempFile::new_in(dir).map_err(|e| LifecycleError::io(ctx(), e))?;
    temp.write_all(bytes)
        .map_err(|e| LifecycleError::io(ctx(), e))?;
    temp.persist(path)
        .map_err(|e| LifecycleError::io(ctx(), e.error))?;
    Ok(())
}
