//! Error types for the dedup-engine library.
//!
//! Errors are values, not panics: every fallible operation in the
//! duplication-detection and refactoring pipeline returns a `Result<T>`
//! carrying one of the closed [`DedupError`] variants. Panics are reserved
//! for invariant violations (byte offsets inconsistent with a file's
//! length after a re-read under lock).

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, DedupError>;

/// Closed error taxonomy, one variant per error kind in the engine's
/// error-handling design.
#[derive(Error, Debug)]
pub enum DedupError {
    /// Caller-supplied data violates a stated constraint.
    #[error("invalid input: {message}")]
    InvalidInput {
        message: String,
        field: Option<String>,
    },

    /// A source file exceeded `max_file_size_bytes` and was skipped.
    #[error("file too large: {path} ({size} bytes > {limit} bytes)")]
    FileTooLarge {
        path: PathBuf,
        size: u64,
        limit: u64,
    },

    /// The pattern executor could not parse a file; the file is excluded
    /// from the current run but the run continues.
    #[error("parse failure in {path}: {message}")]
    ParseFailure { path: PathBuf, message: String },

    /// The external pattern-matching executable crashed, timed out, or
    /// returned malformed output.
    #[error("pattern executor error ({kind:?}): {message}")]
    PatternExecutionError {
        kind: PatternErrorKind,
        message: String,
        stderr: Option<String>,
    },

    /// The variation analyzer determined a group cannot be merged. This is
    /// returned as a data result by most callers, not raised as an error,
    /// but is available for call sites that want it to short-circuit.
    #[error("group {group_id} is not mergeable: {reason}")]
    GroupNotMergeable { group_id: String, reason: String },

    /// A `RefactoringPlan` failed pre-validation; no mutation occurred.
    #[error("pre-validation failed: {0:?}")]
    PreValidationFailed(Vec<String>),

    /// A filesystem error occurred mid-write; triggers rollback.
    #[error("write failed for {path}: {message}")]
    WriteFailed {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<io::Error>,
    },

    /// The modified tree failed post-validation; triggers rollback.
    #[error("post-validation failed: {0:?}")]
    PostValidationFailed(Vec<String>),

    /// Rollback itself failed after a write or post-validation failure.
    /// The backup is still on disk and usable for manual recovery.
    #[error("rollback failed, backup {backup_id} requires manual recovery: {message}")]
    RollbackFailed { backup_id: String, message: String },

    /// The caller cancelled a long-running operation.
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error not otherwise classified above.
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: io::Error,
    },

    /// Cache-layer error (should be rare; the cache degrades to "miss" on
    /// most internal failures rather than propagating an error).
    #[error("cache error: {message}")]
    Cache { message: String },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// An internal invariant was violated.
    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Sub-kind of [`DedupError::PatternExecutionError`], distinguishing
/// retryable conditions from hard failures.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum PatternErrorKind {
    /// The executable could not be spawned at all (not found, permission).
    Spawn,
    /// The executable exceeded its wall-clock timeout and was killed.
    Timeout,
    /// The executable exited non-zero.
    NonZeroExit,
    /// Output could not be parsed as the expected structured format.
    MalformedOutput,
    /// A transient condition worth retrying once (e.g. a momentary spawn
    /// failure under process-table pressure).
    Transient,
}

impl DedupError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: None,
        }
    }

    pub fn invalid_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn pattern_execution(kind: PatternErrorKind, message: impl Into<String>) -> Self {
        Self::PatternExecutionError {
            kind,
            message: message.into(),
            stderr: None,
        }
    }

    pub fn pattern_execution_with_stderr(
        kind: PatternErrorKind,
        message: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::PatternExecutionError {
            kind,
            message: message.into(),
            stderr: Some(stderr.into()),
        }
    }

    /// Whether this error represents a transient matcher failure worth a
    /// single retry with backoff, per the error-handling design.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PatternExecutionError {
                kind: PatternErrorKind::Transient,
                ..
            }
        )
    }
}

impl From<io::Error> for DedupError {
    fn from(err: io::Error) -> Self {
        Self::io("I/O operation failed", err)
    }
}

impl From<serde_json::Error> for DedupError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: format!("JSON error: {err}"),
        }
    }
}

impl From<serde_yaml::Error> for DedupError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: format!("YAML error: {err}"),
        }
    }
}

impl fmt::Debug for PatternErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Spawn => "spawn",
            Self::Timeout => "timeout",
            Self::NonZeroExit => "non_zero_exit",
            Self::MalformedOutput => "malformed_output",
            Self::Transient => "transient",
        };
        f.write_str(name)
    }
}

/// Adds context to an error result, mirroring the teacher's `ResultExt`.
pub trait ResultExt<T> {
    fn context(self, msg: &'static str) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<DedupError>,
{
    fn context(self, msg: &'static str) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            match err {
                DedupError::Internal { message } => DedupError::Internal {
                    message: format!("{msg}: {message}"),
                },
                other => other,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_only_for_transient_kind() {
        let transient =
            DedupError::pattern_execution(PatternErrorKind::Transient, "flaked once");
        assert!(transient.is_retryable());

        let timeout = DedupError::pattern_execution(PatternErrorKind::Timeout, "too slow");
        assert!(!timeout.is_retryable());
    }

    #[test]
    fn invalid_field_carries_field_name() {
        let err = DedupError::invalid_field("must be >= 1", "min_lines");
        match err {
            DedupError::InvalidInput { field, .. } => assert_eq!(field.as_deref(), Some("min_lines")),
            _ => panic!("expected InvalidInput"),
        }
    }
}
