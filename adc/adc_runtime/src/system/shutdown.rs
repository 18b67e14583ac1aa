//! Shutdown signalling for the kernel.
//!
//! The manager owns the cancellation source whose tokens every module
//! receives. Requesting shutdown cancels them all once; later requests are
//! rejected so the stop sequence runs exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use adc_core::{LifecycleToken, TokenSource};
use thiserror::Error;
use tracing::info;

/// Errors that can occur during shutdown
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("Shutdown already in progress")]
    AlreadyInProgress,
}

/// Manager for kernel shutdown
#[derive(Debug)]
pub struct ShutdownManager {
    source: TokenSource,
    in_progress: AtomicBool,
    stop_timeout: Duration,
}

impl ShutdownManager {
    pub fn new(stop_timeout: Duration) -> Self {
        Self {
            source: TokenSource::new(),
            in_progress: AtomicBool::new(false),
            stop_timeout,
        }
    }

    /// Token observed by modules; cancelled when shutdown begins.
    pub fn token(&self) -> LifecycleToken {
        self.source.token()
    }

    /// Bound on each module's `stop`.
    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    /// Mark shutdown as started and cancel every outstanding token.
    pub fn begin(&self) -> Result<(), ShutdownError> {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            return Err(ShutdownError::AlreadyInProgress);
        }

        info!("Initiating kernel shutdown");
        self.source.cancel();
        Ok(())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }
}

/// Wait for Ctrl-C.
pub async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received interrupt signal");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_begin_cancels_tokens_once() {
        let manager = ShutdownManager::new(Duration::from_secs(1));
        let token = manager.token();
        assert!(!token.is_cancelled());
        assert!(!manager.is_shutting_down());

        manager.begin().unwrap();
        assert!(token.is_cancelled());
        token.cancelled().await;

        assert!(matches!(manager.begin(), Err(ShutdownError::AlreadyInProgress)));
        assert_eq!(manager.stop_timeout(), Duration::from_secs(1));
    }
}
