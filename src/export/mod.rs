//! Image export
//!
//! Builds the app image on top of a stack image:
//!
//! 1. the application directory becomes the bottom layer
//! 2. each buildpack's layer directories are packaged in group order, then
//!    name order, and labelled with their diff identifiers
//! 3. layers that only left a `<layer>.toml` behind reuse the previous
//!    image's layer object unchanged
//! 4. the `web` process becomes the start command
//! 5. the aggregate build metadata is written as a JSON label
//!
//! Identical inputs yield identical layer order and labels, which the next
//! analyze run relies on.

use crate::cache::{list_layers, LayerListing};
use crate::error::{LifecycleError, LifecycleResult};
use crate::image::{Digest, Image, ImageStore, Layer};
use crate::layer::archive_dir;
use crate::metadata::launch::web_command;
use crate::metadata::{
    labels, AppImageMetadata, BuildpackGroup, BuildpackMetadata, LayerMetadata, StackMetadata,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

const TEMP_PREFIX: &str = "lifecycle.export.layer";

/// Paths and naming used by [`Exporter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSettings {
    pub launch_dir: PathBuf,
    pub app_dir: PathBuf,
    /// In-image directory layers unpack under
    pub layer_prefix: PathBuf,
    /// Program the web command is handed to, if any
    pub launcher: Option<String>,
    /// Process list, relative to `app_dir`
    pub process_file: PathBuf,
}

impl ExportSettings {
    /// Defaults for a launch directory: app in `<launch>/app`, layers under
    /// `launch/` in the image, processes in `metadata.toml`
    pub fn new(launch_dir: impl Into<PathBuf>) -> Self {
        let launch_dir = launch_dir.into();
        Self {
            app_dir: launch_dir.join("app"),
            launch_dir,
            layer_prefix: PathBuf::from("launch"),
            launcher: None,
            process_file: PathBuf::from("metadata.toml"),
        }
    }

    fn process_path(&self) -> PathBuf {
        self.app_dir.join(&self.process_file)
    }
}

/// Assembles app images from a launch directory
pub struct Exporter<'a> {
    group: &'a BuildpackGroup,
    settings: ExportSettings,
}

impl<'a> Exporter<'a> {
    pub fn new(group: &'a BuildpackGroup, settings: ExportSettings) -> Self {
        Self { group, settings }
    }

    /// Build the app image on `stack`, reusing layers from `previous`
    pub fn export(&self, stack: &Image, previous: Option<&Image>) -> LifecycleResult<Image> {
        let tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir()
            .map_err(|e| LifecycleError::io("creating export temp directory", e))?;

        let mut metadata = AppImageMetadata {
            buildpacks: Vec::new(),
            stack: StackMetadata {
                sha: stack.digest()?.to_string(),
            },
        };

        let app = self.package(
            &tmp,
            "app.tgz",
            &self.settings.app_dir,
            &self.settings.layer_prefix.join("app"),
        )?;
        info!("Added app layer {}", app.diff_id());
        let mut image = stack.clone().append_layer(app);

        for folder in self.group.folder_names() {
            let (next, bp) = self.add_buildpack_layers(&tmp, &folder, image, previous)?;
            image = next;
            metadata.buildpacks.push(bp);
        }

        let cmd = self.start_command()?;
        debug!("Start command {:?}", cmd);

        Ok(image
            .with_cmd(cmd)
            .with_label(labels::BUILD_METADATA, metadata.to_label()?))
    }

    /// Export and hand the image to `store`, returning its digest
    pub fn export_to(
        &self,
        stack: &Image,
        previous: Option<&Image>,
        store: &dyn ImageStore,
    ) -> LifecycleResult<Digest> {
        let image = self.export(stack, previous)?;
        store.write(&image)
    }

    fn package(&self, tmp: &TempDir, file: &str, source: &Path, prefix: &Path) -> LifecycleResult<Layer> {
        let archive = archive_dir(source, prefix, &tmp.path().join(file))?;
        Layer::from_archive(&archive)
    }

    fn add_buildpack_layers(
        &self,
        tmp: &TempDir,
        folder: &str,
        mut image: Image,
        previous: Option<&Image>,
    ) -> LifecycleResult<(Image, BuildpackMetadata)> {
        let bp_dir = self.settings.launch_dir.join(folder);
        let LayerListing {
            directories,
            metadata_only,
        } = list_layers(&bp_dir)?;
        let mut metadata = BuildpackMetadata::new(folder);

        for name in directories {
            let layer = self.package(
                tmp,
                &format!("layer.{}.{}.tgz", folder, name),
                &bp_dir.join(&name),
                &self.settings.layer_prefix.join(folder).join(&name),
            )?;
            let diff_id = layer.diff_id().to_string();
            info!("Added layer {}/{} {}", folder, name, diff_id);

            image = image
                .append_layer(layer)
                .with_label(labels::diff_id(folder, &name), diff_id.as_str());

            let record = match read_layer_toml(&bp_dir, &name)? {
                Some((text, record)) => {
                    image = image.with_label(labels::layer_toml(folder, &name), text);
                    record
                }
                None => LayerMetadata::default(),
            };
            metadata.layers.insert(
                name,
                LayerMetadata {
                    sha: diff_id,
                    ..record
                },
            );
        }

        for name in metadata_only {
            let Some((text, record)) = read_layer_toml(&bp_dir, &name)? else {
                continue;
            };
            image = image.with_label(labels::layer_toml(folder, &name), text);

            let reused = reuse_layer(folder, &name, previous)?;
            let diff_id = reused.diff_id().to_string();
            info!("Reused layer {}/{} {}", folder, name, diff_id);

            image = image
                .append_layer(reused)
                .with_label(labels::diff_id(folder, &name), diff_id.as_str());
            metadata.layers.insert(
                name,
                LayerMetadata {
                    sha: diff_id,
                    ..record
                },
            );
        }

        Ok((image, metadata))
    }

    fn start_command(&self) -> LifecycleResult<Vec<String>> {
        let web = web_command(&self.settings.process_path())?;
        Ok(match &self.settings.launcher {
            Some(launcher) => vec![launcher.clone(), web],
            None => vec![web],
        })
    }
}

/// Literal text and parsed form of `<layer>.toml`, if present
fn read_layer_toml(bp_dir: &Path, layer: &str) -> LifecycleResult<Option<(String, LayerMetadata)>> {
    let path = bp_dir.join(format!("{}.toml", layer));
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(LifecycleError::io(format!("reading {}", path.display()), e)),
    };
    let record = LayerMetadata::parse(&text).map_err(|e| LifecycleError::LayerMetadataInvalid {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    Ok(Some((text, record)))
}

/// The previous image's layer for `<bp>/<layer>`, located by its diffid label
fn reuse_layer(folder: &str, layer: &str, previous: Option<&Image>) -> LifecycleResult<Layer> {
    let previous = previous.ok_or_else(|| LifecycleError::MetadataOnlyLayerWithoutPrevious {
        buildpack: folder.to_string(),
        layer: layer.to_string(),
    })?;

    let key = labels::diff_id(folder, layer);
    let label = previous
        .label(&key)
        .ok_or_else(|| LifecycleError::MissingDiffIdLabel(key.clone()))?;
    let diff_id = Digest::parse(label)?;

    previous
        .layer_by_diff_id(&diff_id)
        .cloned()
        .ok_or_else(|| LifecycleError::PreviousLayerNotFound {
            buildpack: folder.to_string(),
            layer: layer.to_string(),
            diff_id: diff_id.to_string(),
        })
}
