//! ENT-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, EntropyError>;

/// Top-level error type for the entropy auditor.
#[derive(Debug, Error)]
pub enum EntropyError {
    #[error("[ENT-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[ENT-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[ENT-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[ENT-2001] parse failure for {path}: {details}")]
    ParseFailure { path: PathBuf, details: String },

    #[error("[ENT-2002] literal at {start}..{end} is not externalizable: {reason}")]
    LiteralEval {
        start: usize,
        end: usize,
        reason: String,
    },

    #[error("[ENT-2003] overlapping edits: {first_start}..{first_end} and {second_start}..{second_end}")]
    OverlappingEdits {
        first_start: usize,
        first_end: usize,
        second_start: usize,
        second_end: usize,
    },

    #[error("[ENT-2101] coverage tool failure in {context}: {details}")]
    CoverageTool {
        context: &'static str,
        details: String,
    },

    #[error("[ENT-2102] `{command}` timed out after {timeout_secs}s")]
    ToolTimeout { command: String, timeout_secs: u64 },

    #[error("[ENT-2103] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[ENT-2201] safety veto for {path}: {reason}")]
    SafetyVeto { path: PathBuf, reason: String },

    #[error("[ENT-3001] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[ENT-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[ENT-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl EntropyError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "ENT-1001",
            Self::MissingConfig { .. } => "ENT-1002",
            Self::ConfigParse { .. } => "ENT-1003",
            Self::ParseFailure { .. } => "ENT-2001",
            Self::LiteralEval { .. } => "ENT-2002",
            Self::OverlappingEdits { .. } => "ENT-2003",
            Self::CoverageTool { .. } => "ENT-2101",
            Self::ToolTimeout { .. } => "ENT-2102",
            Self::Serialization { .. } => "ENT-2103",
            Self::SafetyVeto { .. } => "ENT-2201",
            Self::PermissionDenied { .. } => "ENT-3001",
            Self::Io { .. } => "ENT-3002",
            Self::Runtime { .. } => "ENT-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::CoverageTool { .. }
                | Self::ToolTimeout { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            return Self::PermissionDenied {
                path: path.as_ref().to_path_buf(),
            };
        }
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for EntropyError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for EntropyError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<quick_xml::Error> for EntropyError {
    fn from(value: quick_xml::Error) -> Self {
        Self::CoverageTool {
            context: "coverage xml",
            details: value.to_string(),
        }
    }
}
