//! Registry entry status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a registry entry.
///
/// An entry is created `Loading` when instantiation begins, becomes `Ready`
/// once `start` resolves, and is `Stopping` while an unload runs its `stop`.
/// The registry removes an entry once it has stopped, so `Stopped` and
/// `Failed` are never held by a live entry; they describe modules that are
/// no longer registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Loading,
    Ready,
    Stopping,
    Stopped,
    Failed,
}

impl EntryStatus {
    /// Whether the entry still occupies its registry key.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Loading | Self::Ready | Self::Stopping)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
