//! Log levels shared by the kernel and module loggers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Verbosity levels.
///
/// `Ok` sits between `Info` and `Warn` and marks successful milestones such as
/// a module becoming ready. Tracing has no such level, so it is filtered like
/// `Info` and emitted with a `status = "ok"` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Ok,
    Warn,
    Error,
    None,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Ok => "ok",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::None => "none",
        }
    }

    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn filter_directive(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info | Self::Ok => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::None => "off",
        }
    }

    /// Whether a message at `level` passes this threshold.
    pub fn allows(&self, level: LogLevel) -> bool {
        *self != LogLevel::None && level != LogLevel::None && level >= *self
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "ok" => Ok(Self::Ok),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "none" | "off" => Ok(Self::None),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        level.as_str().to_string()
    }
}
