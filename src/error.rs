//! Error types for Tessera.
//!
//! All errors are strongly typed using thiserror. Rejections and conflicts
//! are kept apart because callers treat them differently: a rejected
//! transaction will be rejected again, a conflicting one may succeed when
//! rebuilt against a fresh snapshot.

use thiserror::Error;

use crate::ident::Entid;
use crate::storage::StorageError;
use crate::value::ValueType;

/// Reasons a transaction is refused before anything is written.
///
/// A rejected transaction leaves the store exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Transaction contains no statements")]
    EmptyTransaction,

    #[error("Temporary id {tempid} was not declared by this transaction")]
    UndeclaredTempId {
        tempid: String,
    },

    #[error("Temporary id {tempid} cannot be used in a retraction or compare-and-swap")]
    TempIdInRetraction {
        tempid: String,
    },

    #[error("Unknown attribute {ident}")]
    UnknownAttribute {
        ident: String,
    },

    #[error("Attribute {ident} is maintained by the transactor and cannot be written")]
    ReservedAttribute {
        ident: String,
    },

    #[error("Attribute {ident} expects a {expected} value, got {actual}")]
    TypeMismatch {
        ident: String,
        expected: ValueType,
        actual: ValueType,
    },

    #[error("Entity {entid} does not exist")]
    UnknownEntity {
        entid: Entid,
    },

    #[error("Temporary id {tempid} upserts to both {first} and {second}")]
    ConflictingUpsert {
        tempid: String,
        first: Entid,
        second: Entid,
    },

    #[error("Value {value} of unique attribute {ident} already belongs to entity {owner}")]
    UniqueViolation {
        ident: String,
        value: String,
        owner: Entid,
    },

    #[error("Conflicting datoms for entity {entid} attribute {ident}")]
    DatomConflict {
        entid: Entid,
        ident: String,
    },

    #[error("Compare-and-swap needs a cardinality-one attribute, {ident} is cardinality many")]
    CasOnCardinalityMany {
        ident: String,
    },

    #[error("Basis t {basis_t} is ahead of the store (t = {current_t})")]
    BasisInFuture {
        basis_t: u64,
        current_t: u64,
    },
}

/// Write conflicts detected at commit time.
///
/// Conflicts are retryable: rebuild the transaction against a newer
/// snapshot and submit again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Conflict {
    #[error("Entity {entid} was written at t={t}, after basis t={basis_t}")]
    EntityWritten {
        entid: Entid,
        t: u64,
        basis_t: u64,
    },

    #[error("Attribute {ident} of entity {entid} was written at t={t}, after basis t={basis_t}")]
    AttributeWritten {
        entid: Entid,
        ident: String,
        t: u64,
        basis_t: u64,
    },

    #[error("Compare-and-swap failed on entity {entid} attribute {ident}: expected {expected}, found {found}")]
    CasFailed {
        entid: Entid,
        ident: String,
        expected: String,
        found: String,
    },
}

/// Errors raised while building or loading a schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("Invalid attribute ident '{ident}': expected :namespace/name")]
    InvalidIdent {
        ident: String,
    },

    #[error("Attribute {ident} is defined twice")]
    DuplicateAttribute {
        ident: String,
    },

    #[error("Attribute {ident} uses the reserved :db namespace")]
    ReservedNamespace {
        ident: String,
    },

    #[error("Failed to parse schema: {message}")]
    Parse {
        message: String,
    },

    #[error("Schema is incompatible with the stored schema: {reason}")]
    Incompatible {
        reason: String,
    },
}

/// Top-level error type for Tessera.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Transaction rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error("Transaction conflict: {0}")]
    Conflict(#[from] Conflict),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Temporary id {tempid} is not part of this transaction result")]
    UnknownTempId {
        tempid: String,
    },

    #[error("Tempid mapping was produced at t={mapping_t} and does not belong to the snapshot at t={snapshot_t}")]
    SnapshotMismatch {
        mapping_t: u64,
        snapshot_t: u64,
    },

    #[error("Unknown attribute {ident}")]
    UnknownAttribute {
        ident: String,
    },

    #[error("Basis t {requested} is ahead of snapshot t {basis_t}")]
    FutureBasis {
        requested: u64,
        basis_t: u64,
    },

    #[error("Transactor queue is full (capacity {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Transactor is no longer running")]
    Disconnected,

    #[error("Timed out after {duration_ms}ms waiting for the transaction result")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl DbError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true if the transaction was rejected.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// Returns true if the transaction hit a write conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Returns true if resubmitting may succeed.
    ///
    /// The transactor never retries on its own.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict(_) | Self::QueueFull { .. } | Self::Timeout { .. }
        )
    }
}

/// Result type alias for Tessera operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_display() {
        let err = Rejection::TypeMismatch {
            ident: ":person/age".to_string(),
            expected: ValueType::Long,
            actual: ValueType::String,
        };
        let msg = err.to_string();
        assert!(msg.contains(":person/age"));
        assert!(msg.contains("long"));
        assert!(msg.contains("string"));
    }

    #[test]
    fn test_conflict_display() {
        let err = Conflict::EntityWritten {
            entid: Entid::new(70_000),
            t: 4,
            basis_t: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("70000"));
        assert!(msg.contains("t=4"));
    }

    #[test]
    fn test_db_error_from_rejection() {
        let err: DbError = Rejection::EmptyTransaction.into();
        assert!(err.is_rejection());
        assert!(!err.is_conflict());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_db_error_from_conflict_is_retryable() {
        let err: DbError = Conflict::CasFailed {
            entid: Entid::new(65_536),
            ident: ":account/balance".to_string(),
            expected: "10".to_string(),
            found: "12".to_string(),
        }
        .into();
        assert!(err.is_conflict());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_db_error_retryable_matrix() {
        assert!(DbError::QueueFull { capacity: 8 }.is_retryable());
        assert!(DbError::Timeout { duration_ms: 5 }.is_retryable());
        assert!(!DbError::Disconnected.is_retryable());
        assert!(!DbError::internal("boom").is_retryable());
        assert!(!DbError::UnknownTempId {
            tempid: "#tmp[a]".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_internal_message() {
        let err = DbError::internal("unexpected state");
        assert!(err.to_string().contains("unexpected state"));
    }
}
