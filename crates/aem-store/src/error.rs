use std::path::PathBuf;

use aem_types::ConfigMode;

/// Describes a specific configuration store invariant violation.
///
/// The store itself never produces these; they surface when a snapshot
/// written by another process (or an older build) is loaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreViolation {
    /// A mode key is present with no configurations under it.
    EmptyMode { mode: ConfigMode },
    /// A configuration is filed under a mode other than its own `config_mode`.
    ModeMismatch {
        key: ConfigMode,
        config_mode: ConfigMode,
        valid_from: i64,
    },
    /// Two entries of one mode share a `valid_from`.
    DuplicateValidFrom { mode: ConfigMode, valid_from: i64 },
    /// Entries of one mode are not ascending by `valid_from`.
    OutOfOrder {
        mode: ConfigMode,
        index: usize,
        previous: i64,
        actual: i64,
    },
}

/// Errors produced by store persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to (de)serialize snapshot {path}: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("snapshot {path} has unsupported version {found} (expected {expected})")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
}

impl std::fmt::Display for StoreViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMode { mode } => write!(f, "mode {mode} has no configurations"),
            Self::ModeMismatch {
                key,
                config_mode,
                valid_from,
            } => write!(
                f,
                "configuration valid from {valid_from} has mode {config_mode} but is filed under {key}"
            ),
            Self::DuplicateValidFrom { mode, valid_from } => write!(
                f,
                "mode {mode} holds more than one configuration valid from {valid_from}"
            ),
            Self::OutOfOrder {
                mode,
                index,
                previous,
                actual,
            } => write!(
                f,
                "mode {mode} out of order at index {index}: {actual} follows {previous}"
            ),
        }
    }
}
