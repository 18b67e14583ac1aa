//! System-level concerns: configuration, logging and shutdown.

pub mod config;
pub mod logging;
pub mod shutdown;

pub use config::{LanguageConfig, RuntimeConfig};
pub use logging::ModuleLogger;
pub use shutdown::ShutdownManager;
