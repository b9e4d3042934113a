// ABOUTME: Error taxonomy for the transfer pipeline
// ABOUTME: Classifies failures as transient, validation, integrity, or config errors

use std::path::Path;
use thiserror::Error;

/// Errors produced by the chunk transfer pipeline.
///
/// The taxonomy matters for control flow: only [`TransferError::Transient`]
/// is retried by [`crate::retry::RetryPolicy`]. Validation and integrity
/// errors surface immediately (or downgrade to a per-unit skip at the
/// orchestration layer), and configuration errors abort before any work
/// starts.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Connection-level or operational failure that a retry may resolve.
    #[error("transient database error: {0}")]
    Transient(String),

    /// Backend error that retrying will not fix (constraint violation,
    /// syntax error in generated SQL, missing table, ...).
    #[error("database error: {0}")]
    Database(#[source] tokio_postgres::Error),

    /// Schema or input mismatch: unknown order-by column, malformed
    /// manifest, CSV header that does not match the live table.
    #[error("validation error: {0}")]
    Validation(String),

    /// A chunk file's recomputed digest differs from the manifest.
    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    Integrity {
        file: String,
        expected: String,
        actual: String,
    },

    /// Invalid or contradictory configuration, detected before any work.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON in a manifest or resume log.
    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl TransferError {
    /// True for errors the retry policy is allowed to re-attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransferError::Transient(_))
    }

    pub fn json(path: &Path, source: serde_json::Error) -> Self {
        TransferError::Json {
            path: path.display().to_string(),
            source,
        }
    }
}

/// SQLSTATE classes treated as retryable: 08 (connection exception),
/// 57 (operator intervention, e.g. admin shutdown), and 40001, the
/// serialization failure CockroachDB asks clients to retry.
fn is_retryable_sqlstate(code: &str) -> bool {
    code.starts_with("08") || code.starts_with("57") || code == "40001"
}

impl From<tokio_postgres::Error> for TransferError {
    fn from(err: tokio_postgres::Error) -> Self {
        // No DbError means the failure happened below the protocol layer
        // (socket closed mid-query, TLS teardown, timeout): retryable.
        let transient = err.is_closed()
            || match err.as_db_error() {
                Some(db_err) => is_retryable_sqlstate(db_err.code().code()),
                None => true,
            };
        if transient {
            TransferError::Transient(err.to_string())
        } else {
            TransferError::Database(err)
        }
    }
}
