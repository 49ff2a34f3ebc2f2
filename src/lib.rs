pub mod admin;
pub mod block;
pub mod cli;
pub mod config;
pub mod error;
pub mod history;
pub mod logging;
pub mod mutator;
pub mod remote;
pub mod selection;
pub mod store;
pub mod sync;

pub use block::{Block, BlockKind, BlockPatch, GLOBAL_WORKSPACE_ID};
pub use config::{Config, DbType};
pub use error::{BlockdeckError, Result};
pub use history::{Command, History};
pub use mutator::{DeleteHooks, Mutator, Navigation};
pub use remote::{MemoryRemote, RemoteClient, RemoteError};
pub use selection::ActiveSelection;
pub use store::{BlockStore, StoreEvent};
