//! CLI command implementations

pub mod analyze;
pub mod export;

pub use analyze::execute as analyze;
pub use export::execute as export;
