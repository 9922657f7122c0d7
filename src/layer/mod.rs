//! Layer packaging
//!
//! Turns launch-directory trees into compressed, content-addressed image
//! layers. Each layer unpacks to a fixed location inside the image.

pub mod archive;

pub use archive::{archive_dir, LayerArchive};
