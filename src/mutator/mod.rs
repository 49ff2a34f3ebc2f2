//! The mutation command bus.
//!
//! Every verb builds exactly one [`Command`], runs it through the
//! [`History`] and returns once the remote has confirmed (or rejected) it.
//! Verbs, undo and redo hold the history lock for their whole duration, so
//! they are serialized; store reads are never blocked by them.
//!
//! Each verb runs on its own spawned task. A caller that stops awaiting
//! only stops waiting: the verb still commits or rolls back, and a
//! committed command is still recorded.

mod apply;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::block::{duplicate_tree, Block, BlockKind, BlockPatch};
use crate::error::{BlockdeckError, Result};
use crate::history::{ActionFuture, Command, History};
use crate::remote::RemoteClient;
use crate::store::BlockStore;

pub type Callback = Arc<dyn Fn() + Send + Sync>;
pub type NavigateTo = Arc<dyn Fn(&str) + Send + Sync>;

/// Where the UI goes after a block is created, and where it falls back to
/// when that block is undone away.
#[derive(Clone, Default)]
pub struct Navigation {
    navigate: Option<NavigateTo>,
    fallback: Option<Callback>,
}

impl Navigation {
    pub fn new(
        navigate: impl Fn(&str) + Send + Sync + 'static,
        fallback: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            navigate: Some(Arc::new(navigate)),
            fallback: Some(Arc::new(fallback)),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    fn navigate(&self, block_id: &str) {
        if let Some(ref navigate) = self.navigate {
            navigate(block_id);
        }
    }

    fn fallback(&self) {
        if let Some(ref fallback) = self.fallback {
            fallback();
        }
    }
}

/// Callbacks around a delete: one fires before the block leaves the store,
/// the other after an undo has put it back.
#[derive(Clone, Default)]
pub struct DeleteHooks {
    before_remove: Option<Callback>,
    after_restore: Option<Callback>,
}

impl DeleteHooks {
    pub fn new(
        before_remove: impl Fn() + Send + Sync + 'static,
        after_restore: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            before_remove: Some(Arc::new(before_remove)),
            after_restore: Some(Arc::new(after_restore)),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    fn before_remove(&self) {
        if let Some(ref hook) = self.before_remove {
            hook();
        }
    }

    fn after_restore(&self) {
        if let Some(ref hook) = self.after_restore {
            hook();
        }
    }
}

pub struct Mutator {
    lane: Lane,
}

/// Owned handles a spawned verb works with.
#[derive(Clone)]
struct Lane {
    store: Arc<BlockStore>,
    remote: Arc<dyn RemoteClient>,
    history: Arc<Mutex<History>>,
    workspace_id: Arc<str>,
}

impl Mutator {
    pub fn new(
        store: Arc<BlockStore>,
        remote: Arc<dyn RemoteClient>,
        workspace_id: impl Into<String>,
    ) -> Self {
        let workspace_id: String = workspace_id.into();
        Self {
            lane: Lane {
                store,
                remote,
                history: Arc::new(Mutex::new(History::new())),
                workspace_id: Arc::from(workspace_id),
            },
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.lane.history = Arc::new(Mutex::new(History::with_limit(limit)));
        self
    }

    pub fn store(&self) -> &Arc<BlockStore> {
        &self.lane.store
    }

    pub fn workspace_id(&self) -> &str {
        &self.lane.workspace_id
    }

    /// Delete a block, together with its cards and views when it is a board
    /// or template.
    ///
    /// Undo restores every removed block with its original id and
    /// `create_at`, so listings return it to the same position.
    pub async fn delete_block(&self, block: &Block, label: &str, hooks: DeleteHooks) -> Result<()> {
        let block_id = block.id.clone();
        let label = label.to_string();
        self.spawn(move |lane| async move { lane.delete_block(&block_id, &label, hooks).await })
            .await
    }

    /// Create a board from a template, cloning its property bag, cards and
    /// views into the caller's workspace. `global` names the template's
    /// scope: the template must be global when it is set and
    /// workspace-local otherwise. Returns the new board id.
    pub async fn add_board_from_template(
        &self,
        template_id: &str,
        global: bool,
        nav: Navigation,
    ) -> Result<String> {
        let template_id = template_id.to_string();
        self.spawn(move |lane| async move {
            let template = lane
                .store
                .get(&template_id)
                .filter(|t| t.is_template() && t.is_global() == global)
                .ok_or_else(|| BlockdeckError::NotFound(template_id.clone()))?;
            let children = lane.store.children_of(&template_id);

            let blocks = duplicate_tree(&template, &children, BlockKind::Board, &lane.workspace_id);
            lane.add_tree("Add board from template", blocks, nav).await
        })
        .await
    }

    /// Create an empty template in the caller's workspace.
    pub async fn add_empty_template(&self, nav: Navigation) -> Result<String> {
        self.spawn(move |lane| async move {
            let blocks = Block::empty_root(BlockKind::Template, lane.workspace_id.to_string());
            lane.add_tree("Add board template", blocks, nav).await
        })
        .await
    }

    /// Create an empty board in the caller's workspace.
    pub async fn add_empty_board(&self, nav: Navigation) -> Result<String> {
        self.spawn(move |lane| async move {
            let blocks = Block::empty_root(BlockKind::Board, lane.workspace_id.to_string());
            lane.add_tree("Add board", blocks, nav).await
        })
        .await
    }

    /// Save a board (with its cards and views) as a new workspace template.
    pub async fn duplicate_as_template(&self, board_id: &str, nav: Navigation) -> Result<String> {
        let board_id = board_id.to_string();
        self.spawn(move |lane| async move {
            let board = lane
                .store
                .get(&board_id)
                .ok_or_else(|| BlockdeckError::NotFound(board_id.clone()))?;
            let children = lane.store.children_of(&board_id);

            let blocks =
                duplicate_tree(&board, &children, BlockKind::Template, &lane.workspace_id);
            lane.add_tree("Duplicate as template", blocks, nav).await
        })
        .await
    }

    /// Change a block's title or properties.
    pub async fn patch_block(&self, block_id: &str, patch: BlockPatch, label: &str) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let block_id = block_id.to_string();
        let label = label.to_string();
        self.spawn(move |lane| async move { lane.patch_block(&block_id, patch, &label).await })
            .await
    }

    /// Reverse the most recent command; returns its label.
    pub async fn undo(&self) -> Result<String> {
        self.spawn(|lane| async move {
            let label = lane.history.lock().await.undo().await?;
            tracing::info!(label = %label, "undo");
            Ok(label)
        })
        .await
    }

    /// Re-apply the most recently undone command; returns its label.
    pub async fn redo(&self) -> Result<String> {
        self.spawn(|lane| async move {
            let label = lane.history.lock().await.redo().await?;
            tracing::info!(label = %label, "redo");
            Ok(label)
        })
        .await
    }

    pub async fn can_undo(&self) -> bool {
        self.lane.history.lock().await.can_undo()
    }

    pub async fn can_redo(&self) -> bool {
        self.lane.history.lock().await.can_redo()
    }

    pub async fn undo_label(&self) -> Option<String> {
        self.lane.history.lock().await.undo_label().map(str::to_string)
    }

    pub async fn redo_label(&self) -> Option<String> {
        self.lane.history.lock().await.redo_label().map(str::to_string)
    }

    /// Number of commands on the (undo, redo) stacks. Waits for any verb
    /// in flight.
    pub async fn history_depth(&self) -> (usize, usize) {
        let history = self.lane.history.lock().await;
        (history.undo_len(), history.redo_len())
    }

    async fn spawn<T, F, Fut>(&self, verb: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Lane) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        tokio::spawn(verb(self.lane.clone())).await?
    }
}

impl Lane {
    async fn delete_block(&self, block_id: &str, label: &str, hooks: DeleteHooks) -> Result<()> {
        let mut history = self.history.lock().await;

        let root = self
            .store
            .get(block_id)
            .ok_or_else(|| BlockdeckError::NotFound(block_id.to_string()))?;
        let mut snapshot = vec![root.clone()];
        if root.kind.is_root() {
            snapshot.extend(self.store.children_of(&root.id));
        }
        let ids: Arc<Vec<String>> = Arc::new(snapshot.iter().map(|b| b.id.clone()).collect());
        let snapshot = Arc::new(snapshot);

        let forward = {
            let store = Arc::clone(&self.store);
            let remote = Arc::clone(&self.remote);
            let ids = Arc::clone(&ids);
            let hooks = hooks.clone();
            move || {
                let store = Arc::clone(&store);
                let remote = Arc::clone(&remote);
                let ids = Arc::clone(&ids);
                let hooks = hooks.clone();
                async move {
                    if !store.contains(&ids[0]) {
                        return Err(BlockdeckError::NotFound(ids[0].clone()));
                    }
                    hooks.before_remove();
                    apply::remove_blocks(&store, remote.as_ref(), &ids, "delete block").await
                }
            }
        };

        let reverse = {
            let store = Arc::clone(&self.store);
            let remote = Arc::clone(&self.remote);
            let snapshot = Arc::clone(&snapshot);
            move || {
                let store = Arc::clone(&store);
                let remote = Arc::clone(&remote);
                let snapshot = Arc::clone(&snapshot);
                let hooks = hooks.clone();
                async move {
                    apply::create_blocks(&store, remote.as_ref(), &snapshot, "restore deleted block")
                        .await?;
                    hooks.after_restore();
                    Ok(())
                }
            }
        };

        history
            .execute(Command::new(label, root.id.clone(), forward, reverse))
            .await?;
        tracing::info!(block_id = %root.id, kind = %root.kind, removed = ids.len(), "deleted block");
        Ok(())
    }

    async fn patch_block(&self, block_id: &str, patch: BlockPatch, label: &str) -> Result<()> {
        let mut history = self.history.lock().await;

        let before = self
            .store
            .get(block_id)
            .ok_or_else(|| BlockdeckError::NotFound(block_id.to_string()))?;
        let inverse = Arc::new(patch.inverse(&before));
        let patch = Arc::new(patch);
        let id: Arc<str> = Arc::from(block_id);

        let forward = self.patch_action(Arc::clone(&id), patch, "patch block");
        let reverse = self.patch_action(Arc::clone(&id), inverse, "revert block patch");

        history
            .execute(Command::new(label, block_id, forward, reverse))
            .await?;
        tracing::info!(block_id, "patched block");
        Ok(())
    }

    /// Record one command creating `blocks` (root first).
    ///
    /// The ids are fixed here, so a redo re-creates the same blocks rather
    /// than minting new ones.
    async fn add_tree(&self, label: &str, blocks: Vec<Block>, nav: Navigation) -> Result<String> {
        let mut history = self.history.lock().await;

        let root_id = blocks[0].id.clone();
        let kind = blocks[0].kind;
        let ids: Arc<Vec<String>> = Arc::new(blocks.iter().map(|b| b.id.clone()).collect());
        let blocks = Arc::new(blocks);

        let forward = {
            let store = Arc::clone(&self.store);
            let remote = Arc::clone(&self.remote);
            let blocks = Arc::clone(&blocks);
            let nav = nav.clone();
            move || {
                let store = Arc::clone(&store);
                let remote = Arc::clone(&remote);
                let blocks = Arc::clone(&blocks);
                let nav = nav.clone();
                async move {
                    apply::create_blocks(&store, remote.as_ref(), &blocks, "create block").await?;
                    nav.navigate(&blocks[0].id);
                    Ok(())
                }
            }
        };

        let reverse = {
            let store = Arc::clone(&self.store);
            let remote = Arc::clone(&self.remote);
            move || {
                let store = Arc::clone(&store);
                let remote = Arc::clone(&remote);
                let ids = Arc::clone(&ids);
                let nav = nav.clone();
                async move {
                    apply::remove_blocks(&store, remote.as_ref(), &ids, "remove created block")
                        .await?;
                    nav.fallback();
                    Ok(())
                }
            }
        };

        history
            .execute(Command::new(label, root_id.clone(), forward, reverse))
            .await?;
        tracing::info!(block_id = %root_id, %kind, blocks = blocks.len(), "created block");
        Ok(root_id)
    }

    fn patch_action(
        &self,
        id: Arc<str>,
        patch: Arc<BlockPatch>,
        action: &'static str,
    ) -> impl Fn() -> ActionFuture + Send + Sync + 'static {
        let store = Arc::clone(&self.store);
        let remote = Arc::clone(&self.remote);
        move || -> ActionFuture {
            let store = Arc::clone(&store);
            let remote = Arc::clone(&remote);
            let id = Arc::clone(&id);
            let patch = Arc::clone(&patch);
            Box::pin(async move {
                apply::apply_patch(&store, remote.as_ref(), &id, &patch, action).await
            })
        }
    }
}
