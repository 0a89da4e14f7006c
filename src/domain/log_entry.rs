//! `LogEntry` and level inference (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warn,
    Error,
    Debug,
}

impl Level {
    pub fn as_file_token(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Debug => "DEBUG",
        }
    }

    pub fn from_file_token(token: &str) -> Option<Level> {
        match token {
            "INFO" => Some(Level::Info),
            "WARN" | "WARNING" => Some(Level::Warn),
            "ERROR" => Some(Level::Error),
            "DEBUG" => Some(Level::Debug),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub service: String,
    #[serde(with = "crate::support::timestamp")]
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub message: String,
    pub is_stderr: bool,
}

impl LogEntry {
    pub fn new(service: impl Into<String>, message: impl Into<String>, is_stderr: bool) -> Self {
        let message = message.into();
        let level = infer_level(&message, is_stderr);
        Self {
            service: service.into(),
            timestamp: Utc::now(),
            level,
            message,
            is_stderr,
        }
    }
}

/// Token match on `ERROR|WARN|WARNING|DEBUG|INFO` (§4.5); stderr without a
/// recognized token defaults to `Warn`, stdout defaults to `Info`.
pub fn infer_level(message: &str, is_stderr: bool) -> Level {
    let upper = message.to_ascii_uppercase();
    for (token, level) in [
        ("ERROR", Level::Error),
        ("WARNING", Level::Warn),
        ("WARN", Level::Warn),
        ("DEBUG", Level::Debug),
        ("INFO", Level::Info),
    ] {
        if upper.contains(token) {
            return level;
        }
    }
    if is_stderr {
        Level::Warn
    } else {
        Level::Info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdout_defaults_to_info() {
        assert_eq!(infer_level("server started", false), Level::Info);
    }

    #[test]
    fn stderr_defaults_to_warn() {
        assert_eq!(infer_level("something happened", true), Level::Warn);
    }

    #[test]
    fn token_match_wins_over_stream_default() {
        assert_eq!(infer_level("ERROR: boom", true), Level::Error);
        assert_eq!(infer_level("ERROR: boom", false), Level::Error);
        assert_eq!(infer_level("DEBUG tracing enabled", false), Level::Debug);
    }

    #[test]
    fn warning_token_maps_to_warn() {
        assert_eq!(infer_level("WARNING: deprecated", false), Level::Warn);
    }
}
