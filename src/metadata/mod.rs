//! Build metadata shared by the analyzer and the exporter
//!
//! One canonical in-memory schema with two serializations:
//!
//! | Where | Format | Type |
//! |-------|--------|------|
//! | `<launch>/<bp>/<layer>.toml` | TOML | [`LayerMetadata`] |
//! | image label [`labels::BUILD_METADATA`] | JSON | [`AppImageMetadata`] |
//!
//! The buildpack group and the application's process list are TOML inputs
//! produced by earlier lifecycle phases.

pub mod app;
pub mod group;
pub mod launch;

pub use app::{AppImageMetadata, BuildpackMetadata, LayerMetadata, StackMetadata};
pub use group::{Buildpack, BuildpackGroup};
pub use launch::{LaunchMetadata, Process};

/// Image label keys written by the exporter and read by the analyzer
pub mod labels {
    /// Aggregate build metadata (JSON)
    pub const BUILD_METADATA: &str = "sh.packs.build";

    /// Diff identifier of a buildpack layer: `<bp>.<layer>.diffid`
    pub fn diff_id(buildpack: &str, layer: &str) -> String {
        format!("{}.{}.diffid", buildpack, layer)
    }

    /// Literal TOML metadata of a buildpack layer: `<bp>.<layer>.toml`
    pub fn layer_toml(buildpack: &str, layer: &str) -> String {
        format!("{}.{}.toml", buildpack, layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_keys() {
        assert_eq!(labels::diff_id("bp.node", "modules"), "bp.node.modules.diffid");
        assert_eq!(labels::layer_toml("bp.node", "modules"), "bp.node.modules.toml");
    }
}
