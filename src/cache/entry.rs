//! On-disk cache entry for one buildpack layer
//!
//! A layer is cached as three siblings inside the buildpack folder:
//! `<layer>/` (content), `<layer>.toml` (metadata), and `<layer>.sha`
//! (the diff identifier recorded when the content was produced). They are
//! removed together, in that order.

use crate::error::{LifecycleError, LifecycleResult};
use crate::metadata::LayerMetadata;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Paths of a cached layer
#[derive(Debug, Clone)]
pub struct CacheEntry {
    buildpack: String,
    name: String,
    dir: PathBuf,
    toml_path: PathBuf,
    sha_path: PathBuf,
}

impl CacheEntry {
    /// Entry for `layer` in the folder of `buildpack` under `launch_dir`
    pub fn new(launch_dir: &Path, buildpack: &str, layer: &str) -> Self {
        let bp_dir = launch_dir.join(buildpack);
        Self {
            buildpack: buildpack.to_string(),
            name: layer.to_string(),
            dir: bp_dir.join(layer),
            toml_path: bp_dir.join(format!("{}.toml", layer)),
            sha_path: bp_dir.join(format!("{}.sha", layer)),
        }
    }

    pub fn buildpack(&self) -> &str {
        &self.buildpack
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn toml_path(&self) -> &Path {
        &self.toml_path
    }

    pub fn sha_path(&self) -> &Path {
        &self.sha_path
    }

    /// Cached metadata, if the file exists and parses.
    ///
    /// An unreadable file only makes this layer uncached.
    pub fn cached_metadata(&self) -> Option<LayerMetadata> {
        if !self.toml_path.exists() {
            return None;
        }
        match LayerMetadata::from_file(&self.toml_path) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!("Treating {}/{} as uncached: {}", self.buildpack, self.name, e);
                None
            }
        }
    }

    /// Diff identifier recorded in the `.sha` marker
    pub fn recorded_sha(&self) -> Option<String> {
        match fs::read_to_string(&self.sha_path) {
            // a trailing newline in the marker still matches the recorded sha
            Ok(sha) => Some(sha.trim().to_string()),
            Err(e) => {
                debug!("No sha marker at {}: {}", self.sha_path.display(), e);
                None
            }
        }
    }

    /// Delete directory, `.sha`, then `.toml`. Already-absent parts are
    /// skipped; any other failure aborts.
    pub fn remove(&self) -> LifecycleResult<()> {
        info!("Removing stale cached layer {}", self.dir.display());
        remove_path(&self.dir, |p| fs::remove_dir_all(p))?;
        remove_path(&self.sha_path, |p| fs::remove_file(p))?;
        remove_path(&self.toml_path, |p| fs::remove_file(p))?;
        Ok(())
    }

    /// Overwrite the metadata file with a previous image's record
    pub fn restore(&self, record: &LayerMetadata) -> LifecycleResult<()> {
        info!("Restoring metadata {}", self.toml_path.display());
        record
            .write_file(&self.toml_path)
            .map_err(|e| LifecycleError::CacheRestore {
                buildpack: self.buildpack.clone(),
                layer: self.name.clone(),
                source: Box::new(e),
            })
    }
}

fn remove_path(path: &Path, remove: fn(&Path) -> io::Result<()>) -> LifecycleResult<()> {
    match remove(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LifecycleError::CacheRemove {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Remove a whole buildpack folder, tolerating its absence
pub fn remove_buildpack_dir(dir: &Path) -> LifecycleResult<()> {
    info!("Removing cache for buildpack not in group {}", dir.display());
    remove_path(dir, |p| fs::remove_dir_all(p))
}
