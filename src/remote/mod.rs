//! Remote service boundary.
//!
//! The [`Mutator`](crate::mutator::Mutator) treats whatever implements
//! [`RemoteClient`] as the authority: every snapshot it returns replaces the
//! optimistic copy in the block store.

mod loro_remote;
mod memory;
mod sqlite_remote;

pub use loro_remote::LoroRemote;
pub use memory::{MemoryRemote, RemoteCall, RemoteOp};
pub use sqlite_remote::SqliteRemote;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::admin::UserDirectory;
use crate::block::{Block, BlockPatch};
use crate::config::{Config, DbType};
use crate::error::Result;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("block not found on remote: {0}")]
    NotFound(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

impl RemoteError {
    pub(crate) fn backend(err: impl std::fmt::Display) -> Self {
        RemoteError::Backend(err.to_string())
    }
}

/// Network-facing half of every mutation.
///
/// Calls must be safe to repeat: creating an id that already exists
/// replaces it, deleting an absent id succeeds.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Persist a new block and return the confirmed snapshot.
    async fn create(&self, block: &Block) -> std::result::Result<Block, RemoteError>;

    /// Apply a property delta and return the confirmed snapshot.
    async fn patch(&self, id: &str, patch: &BlockPatch)
        -> std::result::Result<Block, RemoteError>;

    async fn delete(&self, id: &str) -> std::result::Result<(), RemoteError>;

    /// Global blocks plus the blocks of `workspace_id`, used to seed a session.
    async fn fetch_workspace(&self, workspace_id: &str)
        -> std::result::Result<Vec<Block>, RemoteError>;
}

/// A durable backend exposes both the block service and the user directory
/// the admin channel writes to.
#[derive(Clone)]
pub struct Backend {
    pub remote: Arc<dyn RemoteClient>,
    pub users: Arc<dyn UserDirectory>,
}

/// Open the backend selected by `dbtype`, rooted at `dbconfig`.
pub fn open_backend(config: &Config) -> Result<Backend> {
    match config.dbtype {
        DbType::Sqlite3 => {
            let sqlite = Arc::new(SqliteRemote::open(Path::new(&config.dbconfig))?);
            tracing::info!(path = %config.dbconfig, "opened sqlite3 backend");
            Ok(Backend {
                remote: sqlite.clone(),
                users: sqlite,
            })
        }
        DbType::Loro => {
            let loro = Arc::new(LoroRemote::open(Path::new(&config.dbconfig))?);
            tracing::info!(path = %config.dbconfig, "opened loro backend");
            Ok(Backend {
                remote: loro.clone(),
                users: loro,
            })
        }
    }
}
