use thiserror::Error;

use crate::remote::RemoteError;

#[derive(Error, Debug)]
pub enum BlockdeckError {
    #[error("Block not found: {0}")]
    NotFound(String),

    #[error("Mutation failed while trying to {action}: {source}")]
    MutationFailed {
        action: String,
        #[source]
        source: RemoteError,
    },

    #[error("Nothing to undo or redo")]
    EmptyHistory,

    #[error("History desynchronized from the block store after '{label}': {source}")]
    Desynchronized {
        label: String,
        #[source]
        source: Box<BlockdeckError>,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Invalid password: {0}")]
    InvalidPassword(String),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Loro error: {0}")]
    Loro(#[from] loro::LoroError),

    #[error("Loro encode error: {0}")]
    LoroEncode(#[from] loro::LoroEncodeError),

    #[error("Mutation task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl BlockdeckError {
    /// Wrap a remote rejection observed while performing `action`.
    pub fn mutation_failed(action: impl Into<String>, source: RemoteError) -> Self {
        BlockdeckError::MutationFailed {
            action: action.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BlockdeckError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, BlockdeckError>;
