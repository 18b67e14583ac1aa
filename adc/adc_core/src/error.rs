//! Error types for the ADC module kernel.
//!
//! Errors are organized by the subsystem that raises them: loaders, the
//! registry, dependency resolution, manifest parsing and module lifecycle.
//! The root error type, `Error`, wraps each of them so callers can handle
//! failures uniformly, and `Error::kind` maps any failure onto the flat
//! taxonomy that boot reports and logs use.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::{EntryStatus, ModuleKind};

/// The flat classification of every failure the kernel can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ModuleNotFound,
    InvalidModuleExport,
    DuplicateRegistration,
    CapabilityNotFound,
    CapabilityNotReady,
    UndeclaredDependency,
    CyclicDependency,
    VersionUnsatisfied,
    InvalidManifest,
    DependencyFailed,
    Timeout,
    ModuleFailed,
    Io,
    Config,
}

impl ErrorKind {
    /// Stable name used in logs and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ModuleNotFound => "ModuleNotFound",
            Self::InvalidModuleExport => "InvalidModuleExport",
            Self::DuplicateRegistration => "DuplicateRegistration",
            Self::CapabilityNotFound => "CapabilityNotFound",
            Self::CapabilityNotReady => "CapabilityNotReady",
            Self::UndeclaredDependency => "UndeclaredDependency",
            Self::CyclicDependency => "CyclicDependency",
            Self::VersionUnsatisfied => "VersionUnsatisfied",
            Self::InvalidManifest => "InvalidManifest",
            Self::DependencyFailed => "DependencyFailed",
            Self::Timeout => "Timeout",
            Self::ModuleFailed => "ModuleFailed",
            Self::Io => "Io",
            Self::Config => "Config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Root error type for the kernel.
#[derive(Debug, Error)]
pub enum Error {
    /// Failures while locating or instantiating a module
    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    /// Failures in the live module registry
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Failures in dependency resolution and access control
    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    /// Malformed manifests or package descriptors
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Start/stop failures
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Failure raised by module code itself
    #[error("Module error: {0}")]
    Module(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid runtime configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build an error from inside module code.
    pub fn module(message: impl Into<String>) -> Self {
        Self::Module(message.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Loader(e) => e.kind(),
            Self::Registry(e) => e.kind(),
            Self::Resolution(e) => e.kind(),
            Self::Manifest(_) => ErrorKind::InvalidManifest,
            Self::Lifecycle(e) => e.kind(),
            Self::Module(_) => ErrorKind::ModuleFailed,
            Self::Io(_) => ErrorKind::Io,
            Self::Config(_) => ErrorKind::Config,
        }
    }
}

/// Errors raised by loaders and by on-disk module resolution.
///
/// These are local to one module: the kernel turns them into that module's
/// `failed` status unless the owning manifest is fatal.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The module directory or its entry file does not exist
    #[error("Module '{name}' not found at {}", path.display())]
    ModuleNotFound { name: String, path: PathBuf },

    /// The entry exists but does not provide a usable export for the kind
    #[error("Module '{name}' has no valid {kind} export: {reason}")]
    InvalidModuleExport {
        name: String,
        kind: ModuleKind,
        reason: String,
    },

    /// No installed version satisfies the requested requirement
    #[error("No version of '{name}' satisfies '{requested}' (available: {})", available.join(", "))]
    VersionUnsatisfied {
        name: String,
        requested: String,
        available: Vec<String>,
    },

    /// The module's entry could not be executed
    #[error("Failed to launch module '{name}': {reason}")]
    LaunchFailed { name: String, reason: String },
}

impl LoaderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ModuleNotFound { .. } => ErrorKind::ModuleNotFound,
            Self::InvalidModuleExport { .. } => ErrorKind::InvalidModuleExport,
            Self::VersionUnsatisfied { .. } => ErrorKind::VersionUnsatisfied,
            Self::LaunchFailed { .. } => ErrorKind::ModuleFailed,
        }
    }
}

/// Errors raised by the module registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{kind} '{capability}' is already registered")]
    DuplicateRegistration { kind: ModuleKind, capability: String },

    #[error("{kind} '{capability}' not found")]
    CapabilityNotFound { kind: ModuleKind, capability: String },

    #[error("{kind} '{capability}' is not ready (status: {status})")]
    CapabilityNotReady {
        kind: ModuleKind,
        capability: String,
        status: EntryStatus,
    },
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateRegistration { .. } => ErrorKind::DuplicateRegistration,
            Self::CapabilityNotFound { .. } => ErrorKind::CapabilityNotFound,
            Self::CapabilityNotReady { .. } => ErrorKind::CapabilityNotReady,
        }
    }
}

/// Errors raised while ordering modules and enforcing declared access.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// A module looked up a capability it never declared
    #[error("Module '{module}' did not declare a dependency on {kind} '{capability}'")]
    UndeclaredDependency {
        module: String,
        kind: ModuleKind,
        capability: String,
    },

    /// The declared dependencies form a cycle
    #[error("Cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// A declared dependency failed, so the dependent was never started
    #[error("Module '{module}' depends on failed module '{dependency}'")]
    DependencyFailed { module: String, dependency: String },
}

impl ResolutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UndeclaredDependency { .. } => ErrorKind::UndeclaredDependency,
            Self::CyclicDependency { .. } => ErrorKind::CyclicDependency,
            Self::DependencyFailed { .. } => ErrorKind::DependencyFailed,
        }
    }
}

/// Errors in manifest and package descriptor declarations.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to parse {source_name}: {reason}")]
    Parse { source_name: String, reason: String },

    #[error("Empty module name in {kind} list")]
    EmptyName { kind: ModuleKind },

    #[error("Duplicate {kind} '{name}'")]
    DuplicateName { kind: ModuleKind, name: String },

    #[error("Invalid version requirement '{requirement}' for '{name}': {reason}")]
    InvalidVersion {
        name: String,
        requirement: String,
        reason: String,
    },

    #[error("More than one default declared for {kind} '{name}'")]
    MultipleDefaults { kind: ModuleKind, name: String },
}

/// Errors raised while driving a module through its lifecycle.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Module '{module}' did not finish {phase} within {timeout_ms}ms")]
    Timeout {
        module: String,
        phase: &'static str,
        timeout_ms: u64,
    },

    #[error("Module '{module}' failed to {phase}: {reason}")]
    Failed {
        module: String,
        phase: &'static str,
        reason: String,
    },
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Failed { .. } => ErrorKind::ModuleFailed,
        }
    }
}

/// Result type used throughout the kernel.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_keeps_kind() {
        let err: Error = LoaderError::ModuleNotFound {
            name: "storage".to_string(),
            path: PathBuf::from("/modules/providers/storage"),
        }
        .into();
        assert!(matches!(err, Error::Loader(_)));
        assert_eq!(err.kind(), ErrorKind::ModuleNotFound);

        let err: Error = RegistryError::CapabilityNotReady {
            kind: ModuleKind::Provider,
            capability: "cache".to_string(),
            status: EntryStatus::Loading,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::CapabilityNotReady);

        assert_eq!(Error::module("boom").kind(), ErrorKind::ModuleFailed);
    }

    #[test]
    fn test_cycle_display_names_the_cycle() {
        let err = ResolutionError::CyclicDependency {
            cycle: vec![
                "provider:a".to_string(),
                "provider:b".to_string(),
                "provider:a".to_string(),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Cyclic dependency: provider:a -> provider:b -> provider:a"
        );
    }

    #[test]
    fn test_version_unsatisfied_lists_available() {
        let err = LoaderError::VersionUnsatisfied {
            name: "cache".to_string(),
            requested: "^2.0".to_string(),
            available: vec!["1.0.0-rust".to_string(), "1.4.2-rust".to_string()],
        };
        let display = err.to_string();
        assert!(display.contains("^2.0"));
        assert!(display.contains("1.0.0-rust, 1.4.2-rust"));
        assert_eq!(err.kind(), ErrorKind::VersionUnsatisfied);
    }
}
