//! Background synchronization.
//!
//! Remote-push updates land in the block store on their own task,
//! independently of any in-flight mutation verb. There is no isolation
//! between the two: the last `put` wins, and a verb's confirmed snapshot
//! overwrites whatever sync wrote before it resolved.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::block::{Block, GLOBAL_WORKSPACE_ID};
use crate::error::Result;
use crate::remote::RemoteClient;
use crate::store::BlockStore;

const FEED_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteUpdate {
    Upsert(Block),
    Delete(String),
}

/// Apply one pushed update if it belongs to `workspace_id` or the global
/// scope. Returns whether the store changed.
pub fn apply_update(store: &BlockStore, workspace_id: &str, update: RemoteUpdate) -> bool {
    match update {
        RemoteUpdate::Upsert(block) => {
            if block.workspace_id != workspace_id && block.workspace_id != GLOBAL_WORKSPACE_ID {
                tracing::trace!(block_id = %block.id, "ignoring update for foreign workspace");
                return false;
            }
            store.put(block);
            true
        }
        RemoteUpdate::Delete(id) => store.remove(&id).is_some(),
    }
}

/// Seed the store with everything the remote has for `workspace_id`.
pub async fn load_workspace(
    store: &BlockStore,
    remote: &dyn RemoteClient,
    workspace_id: &str,
) -> Result<usize> {
    let blocks = remote.fetch_workspace(workspace_id).await?;
    let count = blocks.len();
    for block in blocks {
        store.put(block);
    }
    tracing::info!(workspace_id, blocks = count, "loaded workspace");
    Ok(count)
}

/// Handle to a running sync task.
pub struct SyncFeed {
    sender: mpsc::Sender<RemoteUpdate>,
    cancel: CancellationToken,
    handle: JoinHandle<usize>,
}

impl SyncFeed {
    /// Spawn the task that drains pushed updates into `store`.
    pub fn spawn(store: Arc<BlockStore>, workspace_id: impl Into<String>) -> Self {
        let (sender, mut receiver) = mpsc::channel(FEED_CAPACITY);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let workspace_id = workspace_id.into();

        let handle = tokio::spawn(async move {
            let mut applied = 0;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    update = receiver.recv() => match update {
                        Some(update) => {
                            if apply_update(&store, &workspace_id, update) {
                                applied += 1;
                            }
                        }
                        None => break,
                    },
                }
            }
            tracing::debug!(applied, "sync feed stopped");
            applied
        });

        Self {
            sender,
            cancel,
            handle,
        }
    }

    /// Sender the transport pushes updates into.
    pub fn sender(&self) -> mpsc::Sender<RemoteUpdate> {
        self.sender.clone()
    }

    /// Stop the task; returns how many updates changed the store.
    pub async fn shutdown(self) -> usize {
        self.cancel.cancel();
        self.handle.await.unwrap_or_default()
    }

    /// Close the channel and wait until every queued update is applied.
    pub async fn drain(self) -> usize {
        drop(self.sender);
        self.handle.await.unwrap_or_default()
    }
}
