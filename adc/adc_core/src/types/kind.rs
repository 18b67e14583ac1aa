//! Module kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of a pluggable unit.
///
/// The kind decides which directory a module is installed under and which
/// method the kernel expects besides the lifecycle: `get_instance` for every
/// kind except `App`, which exposes `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Provider,
    Utility,
    Service,
    Middleware,
    Preset,
    App,
}

impl ModuleKind {
    /// All kinds, in the order manifests list their requirements.
    pub const ALL: [ModuleKind; 6] = [
        ModuleKind::Provider,
        ModuleKind::Utility,
        ModuleKind::Service,
        ModuleKind::Middleware,
        ModuleKind::Preset,
        ModuleKind::App,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Utility => "utility",
            Self::Service => "service",
            Self::Middleware => "middleware",
            Self::Preset => "preset",
            Self::App => "app",
        }
    }

    /// Directory under the modules root that holds this kind.
    pub fn directory(&self) -> &'static str {
        match self {
            Self::Provider => "providers",
            Self::Utility => "utilities",
            Self::Service => "services",
            Self::Middleware => "middlewares",
            Self::Preset => "presets",
            Self::App => "apps",
        }
    }

    pub fn is_app(&self) -> bool {
        matches!(self, Self::App)
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleKind {
    type Err = String;

    /// Accepts both the singular name and the directory name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_ascii_lowercase();
        ModuleKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lowered || kind.directory() == lowered)
            .ok_or_else(|| format!("unknown module kind '{}'", s))
    }
}
