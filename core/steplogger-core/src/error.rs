//! Error types for steplogger-core operations.

use std::path::PathBuf;

/// All errors that can occur in steplogger-core operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeNotFound,

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Configuration read failed: {path}: {source}")]
    ConfigReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration write failed: {path}: {source}")]
    ConfigWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Waypoint Script Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Waypoint script key '{key}' is not set")]
    ScriptMissing { key: String },

    #[error("Waypoint script is empty")]
    ScriptEmpty,

    #[error("Waypoint descriptor #{index} '{descriptor}' has {found} fields, expected {expected}")]
    DescriptorMalformed {
        index: usize,
        descriptor: String,
        found: usize,
        expected: usize,
    },
}

pub type Result<T> = std::result::Result<T, CoreError>;
