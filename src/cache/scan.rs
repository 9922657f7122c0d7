//! Launch-directory scanning
//!
//! Enumerates buildpack folders and the layers inside them. Results are
//! sorted so analysis and export visit layers in a reproducible order.

use crate::error::{LifecycleError, LifecycleResult};
use crate::metadata::BuildpackMetadata;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Suffix of a layer metadata file
pub const TOML_SUFFIX: &str = ".toml";

/// Layers found in one buildpack folder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerListing {
    /// Layer directories, sorted
    pub directories: Vec<String>,

    /// Layers with a `<layer>.toml` but no directory, sorted
    pub metadata_only: Vec<String>,
}

/// Sorted entry names of a directory. A missing directory is empty.
fn read_dir_sorted(dir: &Path) -> LifecycleResult<Vec<(String, PathBuf)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Directory not found: {}", dir.display());
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(LifecycleError::io(format!("listing {}", dir.display()), e));
        }
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| LifecycleError::io(format!("listing {}", dir.display()), e))?;
        match entry.file_name().into_string() {
            Ok(name) => names.push((name, entry.path())),
            Err(name) => warn!("Skipping non UTF-8 entry {:?} in {}", name, dir.display()),
        }
    }
    names.sort();
    Ok(names)
}

/// Buildpack folders currently present in the launch directory
pub fn cached_buildpacks(launch_dir: &Path) -> LifecycleResult<Vec<String>> {
    Ok(read_dir_sorted(launch_dir)?
        .into_iter()
        .filter(|(_, path)| path.is_dir())
        .map(|(name, _)| name)
        .collect())
}

/// Base names of the `*.toml` files in a buildpack folder
pub fn metadata_files(bp_dir: &Path) -> LifecycleResult<BTreeSet<String>> {
    Ok(read_dir_sorted(bp_dir)?
        .into_iter()
        .filter(|(_, path)| path.is_file())
        .filter_map(|(name, _)| name.strip_suffix(TOML_SUFFIX).map(str::to_string))
        .filter(|name| !name.is_empty())
        .collect())
}

/// All layers to classify for a buildpack: the union of the layers the
/// previous image recorded and the metadata files on disk.
pub fn layer_names(
    bp_dir: &Path,
    previous: Option<&BuildpackMetadata>,
) -> LifecycleResult<BTreeSet<String>> {
    let mut names = metadata_files(bp_dir)?;
    if let Some(previous) = previous {
        names.extend(previous.layers.keys().cloned());
    }
    debug!("Found {} layers in {}", names.len(), bp_dir.display());
    Ok(names)
}

/// Split a buildpack folder into layer directories and metadata-only layers
pub fn list_layers(bp_dir: &Path) -> LifecycleResult<LayerListing> {
    let directories: Vec<String> = read_dir_sorted(bp_dir)?
        .into_iter()
        .filter(|(_, path)| path.is_dir())
        .map(|(name, _)| name)
        .collect();

    let metadata_only = metadata_files(bp_dir)?
        .into_iter()
        .filter(|name| !directories.contains(name))
        .collect();

    Ok(LayerListing {
        directories,
        metadata_only,
    })
}
