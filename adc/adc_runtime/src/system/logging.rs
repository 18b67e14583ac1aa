//! Global logger setup and per-module loggers.

use std::sync::atomic::{AtomicBool, Ordering};

use adc_core::LogLevel;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set. Returns `false` if a
/// subscriber was already installed, by this function or by someone else.
pub fn init(level: LogLevel) -> bool {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return false;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.filter_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

/// Logger bound to one module's name.
///
/// Events carry a `module` field so the global subscriber can attribute them.
/// `level` is an additional per-module threshold applied before `tracing`'s.
#[derive(Debug, Clone)]
pub struct ModuleLogger {
    module: String,
    level: LogLevel,
}

impl ModuleLogger {
    pub fn new(module: impl Into<String>, level: LogLevel) -> Self {
        Self {
            module: module.into(),
            level,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn debug(&self, message: &str) {
        if self.level.allows(LogLevel::Debug) {
            debug!(module = %self.module, "{}", message);
        }
    }

    pub fn info(&self, message: &str) {
        if self.level.allows(LogLevel::Info) {
            info!(module = %self.module, "{}", message);
        }
    }

    /// Success milestone, emitted at info with `status = "ok"`.
    pub fn ok(&self, message: &str) {
        if self.level.allows(LogLevel::Ok) {
            info!(module = %self.module, status = "ok", "{}", message);
        }
    }

    pub fn warn(&self, message: &str) {
        if self.level.allows(LogLevel::Warn) {
            warn!(module = %self.module, "{}", message);
        }
    }

    pub fn error(&self, message: &str) {
        if self.level.allows(LogLevel::Error) {
            error!(module = %self.module, "{}", message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init(LogLevel::Debug);
        assert!(!init(LogLevel::Error));
    }

    #[test]
    fn test_module_logger_threshold() {
        let logger = ModuleLogger::new("cache", LogLevel::Warn);
        assert_eq!(logger.module(), "cache");
        assert!(!logger.level().allows(LogLevel::Ok));

        // Below the threshold these are no-ops; above it they must not panic
        // without a subscriber installed.
        logger.info("ignored");
        logger.ok("ignored");
        logger.error("emitted");
    }
}
