//! Launch-directory layer cache
//!
//! Buildpacks leave each layer under `<launch>/<buildpack>/` as a directory
//! with `.toml` and `.sha` siblings. Before a rebuild the analyzer compares
//! that cache against the previous image's metadata and removes or restores
//! entries so buildpacks only reuse what can be verified.
//!
//! # Cache States
//!
//! | State | Action |
//! |-------|--------|
//! | NoCacheAvailable | restore launch metadata from previous image |
//! | StaleBuildNoMetadata | keep |
//! | StaleLaunchNoMetadata | remove |
//! | OutdatedBuild | remove |
//! | OutdatedLaunch | remove, restore metadata |
//! | UpToDate | keep |

pub mod analyzer;
pub mod entry;
pub mod scan;
pub mod state;

pub use analyzer::{AnalysisReport, Analyzer, LayerOutcome, SkipReason};
pub use entry::CacheEntry;
pub use scan::{list_layers, LayerListing};
pub use state::CacheState;
