//! CLI argument definitions using clap derive

use crate::config::schema::{ExportConfig, PathsConfig};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Lifecycle - buildpack layer cache analysis and image export
///
/// Reconciles cached layers against the previous app image before a build,
/// and assembles the next app image after it.
#[derive(Parser, Debug)]
#[command(name = "lifecycle")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "LIFECYCLE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Remove stale layer caches and restore reusable layer metadata
    Analyze(AnalyzeArgs),

    /// Build the app image from the launch directory
    Export(ExportArgs),
}

/// Launch directory locations, falling back to the config file
#[derive(Args, Debug, Clone, Default)]
pub struct PathArgs {
    /// Buildpack group file
    #[arg(long, env = "LIFECYCLE_GROUP")]
    pub group: Option<PathBuf>,

    /// Launch directory
    #[arg(long = "launch", env = "LIFECYCLE_LAUNCH_DIR")]
    pub launch_dir: Option<PathBuf>,

    /// Application directory
    #[arg(long = "app", env = "LIFECYCLE_APP_DIR")]
    pub app_dir: Option<PathBuf>,
}

impl PathArgs {
    /// Flags win over the config file
    pub fn resolve(&self, config: &PathsConfig) -> PathsConfig {
        PathsConfig {
            launch_dir: self
                .launch_dir
                .clone()
                .unwrap_or_else(|| config.launch_dir.clone()),
            app_dir: self.app_dir.clone().unwrap_or_else(|| config.app_dir.clone()),
            group: self.group.clone().unwrap_or_else(|| config.group.clone()),
        }
    }
}

/// Arguments for the analyze command
#[derive(Parser, Debug)]
pub struct AnalyzeArgs {
    /// Previous app image, as <layout-dir>[:<tag>]
    pub image: String,

    #[command(flatten)]
    pub paths: PathArgs,

    /// Read previous metadata from a JSON file instead of the image
    #[arg(long)]
    pub metadata: Option<PathBuf>,

    /// Report format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the export command
#[derive(Parser, Debug)]
pub struct ExportArgs {
    /// Image to write, as <layout-dir>[:<tag>]
    pub image: String,

    /// Previous app image to reuse unchanged layers from
    pub previous: Option<String>,

    /// Stack image the app is built on
    #[arg(long, env = "LIFECYCLE_STACK")]
    pub stack: String,

    #[command(flatten)]
    pub paths: PathArgs,

    /// Program prepended to the start command
    #[arg(long, env = "LIFECYCLE_LAUNCHER")]
    pub launcher: Option<String>,
}

impl ExportArgs {
    /// Export settings with flags applied over the config file
    pub fn export_config(&self, config: &ExportConfig) -> ExportConfig {
        ExportConfig {
            launcher: self.launcher.clone().or_else(|| config.launcher.clone()),
            ..config.clone()
        }
    }
}

/// Output format for reports
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// JSON output
    Json,
}
