use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{RemoteClient, RemoteError};
use crate::block::{now_millis, Block, BlockPatch, GLOBAL_WORKSPACE_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Create,
    Patch,
    Delete,
}

/// One recorded call against a [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub op: RemoteOp,
    pub id: String,
}

#[derive(Default)]
struct MemoryState {
    blocks: HashMap<String, Block>,
    failing: HashSet<RemoteOp>,
    calls: Vec<RemoteCall>,
}

/// Process-local remote service with fault injection.
///
/// Stands in for the real service in tests and offline demos. Operations
/// marked with [`MemoryRemote::fail`] are rejected until
/// [`MemoryRemote::heal`] is called.
#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the service, bypassing the call log.
    pub fn seed(&self, blocks: impl IntoIterator<Item = Block>) {
        self.with_state(|state| {
            for block in blocks {
                state.blocks.insert(block.id.clone(), block);
            }
        });
    }

    pub fn fail(&self, op: RemoteOp) {
        self.with_state(|state| {
            state.failing.insert(op);
        });
    }

    pub fn heal(&self, op: RemoteOp) {
        self.with_state(|state| {
            state.failing.remove(&op);
        });
    }

    pub fn get(&self, id: &str) -> Option<Block> {
        self.with_state(|state| state.blocks.get(id).cloned())
    }

    pub fn len(&self) -> usize {
        self.with_state(|state| state.blocks.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.with_state(|state| state.calls.clone())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    fn begin(state: &mut MemoryState, op: RemoteOp, id: &str) -> Result<(), RemoteError> {
        state.calls.push(RemoteCall {
            op,
            id: id.to_string(),
        });
        if state.failing.contains(&op) {
            return Err(RemoteError::Rejected(format!("{:?} {} refused", op, id)));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteClient for MemoryRemote {
    async fn create(&self, block: &Block) -> Result<Block, RemoteError> {
        self.with_state(|state| {
            Self::begin(state, RemoteOp::Create, &block.id)?;
            let mut confirmed = block.clone();
            confirmed.update_at = now_millis().max(block.update_at);
            state.blocks.insert(confirmed.id.clone(), confirmed.clone());
            Ok(confirmed)
        })
    }

    async fn patch(&self, id: &str, patch: &BlockPatch) -> Result<Block, RemoteError> {
        self.with_state(|state| {
            Self::begin(state, RemoteOp::Patch, id)?;
            let current = state
                .blocks
                .get(id)
                .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
            let confirmed = patch.apply(current);
            state.blocks.insert(id.to_string(), confirmed.clone());
            Ok(confirmed)
        })
    }

    async fn delete(&self, id: &str) -> Result<(), RemoteError> {
        self.with_state(|state| {
            Self::begin(state, RemoteOp::Delete, id)?;
            state.blocks.remove(id);
            Ok(())
        })
    }

    async fn fetch_workspace(&self, workspace_id: &str) -> Result<Vec<Block>, RemoteError> {
        self.with_state(|state| {
            Ok(state
                .blocks
                .values()
                .filter(|b| b.workspace_id == workspace_id || b.workspace_id == GLOBAL_WORKSPACE_ID)
                .cloned()
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockKind;

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let remote = MemoryRemote::new();
        let block = Block::new(BlockKind::Board, "Board", "ws1");

        remote.create(&block).await.unwrap();
        remote.create(&block).await.unwrap();

        assert_eq!(remote.len(), 1);
        assert_eq!(remote.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_op_is_rejected_until_healed() {
        let remote = MemoryRemote::new();
        let block = Block::new(BlockKind::Board, "Board", "ws1");

        remote.fail(RemoteOp::Create);
        let err = remote.create(&block).await.unwrap_err();
        assert!(matches!(err, RemoteError::Rejected(_)));
        assert!(remote.is_empty());

        remote.heal(RemoteOp::Create);
        remote.create(&block).await.unwrap();
        assert!(remote.get(&block.id).is_some());
    }

    #[tokio::test]
    async fn test_patch_unknown_block_is_not_found() {
        let remote = MemoryRemote::new();
        let err = remote
            .patch("missing", &BlockPatch::title("x"))
            .await
            .unwrap_err();
        assert_eq!(err, RemoteError::NotFound("missing".to_string()));
    }

    #[tokio::test]
    async fn test_fetch_workspace_includes_global_blocks() {
        let remote = MemoryRemote::new();
        let global = Block::new(BlockKind::Template, "G", GLOBAL_WORKSPACE_ID);
        let mine = Block::new(BlockKind::Template, "Mine", "ws1");
        let theirs = Block::new(BlockKind::Template, "Theirs", "ws2");
        remote.seed([global.clone(), mine.clone(), theirs]);

        let mut ids: Vec<String> = remote
            .fetch_workspace("ws1")
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        ids.sort();
        let mut expected = vec![global.id, mine.id];
        expected.sort();
        assert_eq!(ids, expected);
    }
}
