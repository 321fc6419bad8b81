//! Error types for the ArtHub engine.

use crate::{LocalId, RecordId};
use thiserror::Error;

/// All possible errors from the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Row conversion errors
    #[error("invalid row: {0}")]
    InvalidRow(String),

    #[error("missing column '{column}' in {entity} row")]
    MissingColumn { entity: String, column: String },

    // Optimistic edit errors
    #[error("optimistic edit not found: {0}")]
    EditNotFound(LocalId),

    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("record has no server id")]
    MissingId,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::EditNotFound("node:1".into());
        assert_eq!(err.to_string(), "optimistic edit not found: node:1");

        let err = Error::MissingColumn {
            entity: "comments".into(),
            column: "artwork_id".into(),
        };
        assert_eq!(
            err.to_string(),
            "missing column 'artwork_id' in comments row"
        );
    }
}
