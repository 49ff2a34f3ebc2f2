//! Optimistic-then-confirm primitives shared by every verb.
//!
//! Each helper writes the expected result into the store first, then asks
//! the remote. A confirmed snapshot always replaces whatever the store holds
//! at that point, including values put by background sync in the meantime.
//! A rejection restores the pre-attempt values.

use crate::block::{Block, BlockPatch};
use crate::error::{BlockdeckError, Result};
use crate::remote::RemoteClient;
use crate::store::BlockStore;

/// Insert `blocks` (root first) locally and remotely.
pub(super) async fn create_blocks(
    store: &BlockStore,
    remote: &dyn RemoteClient,
    blocks: &[Block],
    action: &str,
) -> Result<()> {
    let previous: Vec<Option<Block>> = blocks.iter().map(|b| store.put(b.clone())).collect();

    let mut confirmed = Vec::with_capacity(blocks.len());
    for block in blocks {
        match remote.create(block).await {
            Ok(snapshot) => confirmed.push(snapshot),
            Err(e) => {
                for created in confirmed.iter().rev() {
                    if let Err(cleanup) = remote.delete(&created.id).await {
                        tracing::warn!(block_id = %created.id, error = %cleanup, "could not remove partially created block");
                    }
                }
                for (block, prev) in blocks.iter().zip(previous).rev() {
                    match prev {
                        Some(prev) => store.put(prev),
                        None => store.remove(&block.id),
                    };
                }
                tracing::warn!(action, block_id = %block.id, error = %e, "remote create rejected, rolled back");
                return Err(BlockdeckError::mutation_failed(action, e));
            }
        }
    }

    for snapshot in confirmed {
        store.put(snapshot);
    }
    Ok(())
}

/// Remove `ids` (root first) locally and remotely; children are deleted
/// remotely before their root.
pub(super) async fn remove_blocks(
    store: &BlockStore,
    remote: &dyn RemoteClient,
    ids: &[String],
    action: &str,
) -> Result<()> {
    let removed: Vec<Block> = ids.iter().filter_map(|id| store.remove(id)).collect();

    let mut deleted: Vec<&str> = Vec::with_capacity(ids.len());
    for id in ids.iter().rev() {
        if let Err(e) = remote.delete(id).await {
            for block in removed.iter().filter(|b| deleted.contains(&b.id.as_str())) {
                if let Err(cleanup) = remote.create(block).await {
                    tracing::warn!(block_id = %block.id, error = %cleanup, "could not recreate partially deleted block");
                }
            }
            for block in removed {
                store.put(block);
            }
            tracing::warn!(action, block_id = %id, error = %e, "remote delete rejected, rolled back");
            return Err(BlockdeckError::mutation_failed(action, e));
        }
        deleted.push(id);
    }

    // Background sync may have re-put a block while the delete was in flight.
    for id in ids {
        store.remove(id);
    }
    Ok(())
}

/// Apply `patch` to block `id` locally and remotely.
pub(super) async fn apply_patch(
    store: &BlockStore,
    remote: &dyn RemoteClient,
    id: &str,
    patch: &BlockPatch,
    action: &str,
) -> Result<()> {
    let current = store
        .get(id)
        .ok_or_else(|| BlockdeckError::NotFound(id.to_string()))?;
    store.put(patch.apply(&current));

    match remote.patch(id, patch).await {
        Ok(confirmed) => {
            store.put(confirmed);
            Ok(())
        }
        Err(e) => {
            store.put(current);
            tracing::warn!(action, block_id = %id, error = %e, "remote patch rejected, rolled back");
            Err(BlockdeckError::mutation_failed(action, e))
        }
    }
}
