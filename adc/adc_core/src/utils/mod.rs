//! Utilities.

pub mod logging;
pub mod version;

pub use logging::LogLevel;
pub use version::{Version, VersionParseError, VersionReq};
