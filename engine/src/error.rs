//! Error types for the Splice engine.

use crate::TableName;
use thiserror::Error;

/// All possible errors from the Splice engine.
///
/// Only caller-contract violations and storage failures surface here.
/// Recoverable sync inconsistencies (duplicate creates, unresolved relation
/// references, missing mappings) are reported through the log sink and never
/// fail a call.
#[derive(Debug, Error)]
pub enum Error {
    /// A remote raw record violated the caller contract. Records must carry
    /// a non-empty string `id` and must not carry the reserved
    /// synchronization columns.
    #[error("malformed remote record for table '{table}': {detail}")]
    MalformedRemoteRecord { table: TableName, detail: String },

    /// A persisted identifier-mapping row could not be decoded.
    #[error("invalid id mapping row: {0}")]
    InvalidMapping(#[source] serde_json::Error),

    /// The storage collaborator failed. Atomic batch failures surface here;
    /// the storage contract guarantees no partial state is left behind.
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wrap a backend error as a storage failure.
    pub fn storage(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Storage(Box::new(err))
    }

    /// Storage failure from a plain message.
    pub fn storage_msg(message: impl Into<String>) -> Self {
        Error::Storage(message.into().into())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::MalformedRemoteRecord {
            table: "orders".into(),
            detail: "missing a non-empty 'id' field".into(),
        };
        assert_eq!(
            err.to_string(),
            "malformed remote record for table 'orders': missing a non-empty 'id' field"
        );

        let err = Error::storage_msg("connection lost");
        assert_eq!(err.to_string(), "storage error: connection lost");
    }
}
