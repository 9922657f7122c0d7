//! Configuration schema for the lifecycle
//!
//! Configuration is stored at `~/.config/lifecycle/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Filesystem locations
    pub paths: PathsConfig,

    /// Export settings
    pub export: ExportConfig,
}

/// Where the lifecycle finds its inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory buildpacks write their layers into
    pub launch_dir: PathBuf,

    /// Application source directory
    pub app_dir: PathBuf,

    /// Detected buildpack group
    pub group: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            launch_dir: PathBuf::from("/launch"),
            app_dir: PathBuf::from("/launch/app"),
            group: PathBuf::from("/buildpacks/group.toml"),
        }
    }
}

/// Image export settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// In-image directory layers are unpacked under
    pub layer_prefix: PathBuf,

    /// Program prepended to the start command
    pub launcher: Option<String>,

    /// Process list file, relative to the app directory
    pub process_file: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            layer_prefix: PathBuf::from("launch"),
            launcher: None,
            process_file: PathBuf::from("metadata.toml"),
        }
    }
}
