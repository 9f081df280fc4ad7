//! Error types for the export/import engine.

use thiserror::Error;

/// How far an error is allowed to travel.
///
/// Entity errors are converted to ledger failures at the container/view
/// boundary. Config and structural errors propagate to the entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// A single container or view failed; the run continues.
    Entity,
    /// Invalid arguments or configuration; detected before any engine runs.
    Config,
    /// Environment or internal failure; aborts the remainder of the run.
    Structural,
}

/// Main error type for export/import operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// A single container or view failed to transfer.
    #[error("{entity}: {message}")]
    EntityFailure { entity: String, message: String },

    /// Configuration error (invalid YAML, missing fields, bad arguments, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A known client capability is not available in this build.
    #[error("Required capability is missing: {0}")]
    CapabilityMissing(String),

    /// Unexpected internal defect (panicked worker, broken invariant).
    #[error("Internal fault: {0}")]
    InternalFault(String),

    /// The archive root could not be interpreted at all.
    #[error("Archive is corrupt: {0}")]
    ArchiveCorrupt(String),

    /// Container store or data-source error.
    #[error("Store error: {0}")]
    Store(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run was cancelled (SIGINT, etc.)
    #[error("Run cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create an EntityFailure error.
    pub fn entity(entity: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::EntityFailure {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Create a Store error from any displayable driver error.
    pub fn store(err: impl std::fmt::Display) -> Self {
        MigrateError::Store(err.to_string())
    }

    /// Classify this error for the continue-on-error policy.
    pub fn severity(&self) -> Severity {
        match self {
            MigrateError::Config(_) => Severity::Config,
            MigrateError::CapabilityMissing(_)
            | MigrateError::InternalFault(_)
            | MigrateError::ArchiveCorrupt(_)
            | MigrateError::Cancelled => Severity::Structural,
            MigrateError::EntityFailure { .. }
            | MigrateError::Store(_)
            | MigrateError::Io(_)
            | MigrateError::Yaml(_)
            | MigrateError::Json(_) => Severity::Entity,
        }
    }

    /// True for errors that must abort the whole run.
    pub fn is_structural(&self) -> bool {
        self.severity() == Severity::Structural
    }

    /// User-facing headline that tells an installation problem apart from a defect.
    pub fn describe(&self) -> String {
        match self {
            MigrateError::CapabilityMissing(name) => format!(
                "A required capability is not available: {}. \
                 Install or enable the matching client and retry.",
                name
            ),
            MigrateError::InternalFault(detail) => format!(
                "Unexpected internal fault: {}. This is a defect, please report it.",
                detail
            ),
            other => other.to_string(),
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self.describe());

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for export/import operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
