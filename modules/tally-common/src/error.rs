use thiserror::Error;

use crate::id::TweetId;

pub type Result<T> = std::result::Result<T, TallyError>;

#[derive(Error, Debug)]
pub enum TallyError {
    #[error("Invalid post id {0:?}: ids must be non-empty decimal strings")]
    InvalidId(String),

    #[error("Duplicate id {id} in {context}")]
    DuplicateId { id: TweetId, context: String },

    #[error("Malformed cutoff file {path}: {reason}")]
    CutoffFileMalformed { path: String, reason: String },

    #[error("Column mismatch in {path}: expected [{expected}], found [{found}]")]
    ColumnMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("Column {column} in {path}: {reason}")]
    ColumnType {
        path: String,
        column: String,
        reason: String,
    },

    #[error("Malformed record {id}: {reason}")]
    MalformedRecord { id: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}
