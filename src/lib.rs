//! Lifecycle - buildpack layer cache analysis and image export
//!
//! The analyzer decides which cached layers in a launch directory survive a
//! rebuild; the exporter packages the launch directory into the next app
//! image, reusing unchanged layers from the previous one.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod image;
pub mod layer;
pub mod metadata;

pub use error::{LifecycleError, LifecycleResult};
