//! In-memory block store.
//!
//! Holds the current snapshot of every block the session knows about.
//! Writers are the [`Mutator`](crate::mutator::Mutator) and the background
//! sync feed; the rendering layer only reads and listens for
//! [`StoreEvent`]s.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tokio::sync::broadcast;

use crate::block::{Block, BlockKind, GLOBAL_WORKSPACE_ID};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Change notification, fired once per successful `put` or `remove`.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Put(Block),
    Removed(Block),
}

impl StoreEvent {
    pub fn block(&self) -> &Block {
        match self {
            StoreEvent::Put(block) | StoreEvent::Removed(block) => block,
        }
    }
}

pub struct BlockStore {
    blocks: RwLock<HashMap<String, Block>>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for BlockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            blocks: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Listen for change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn get(&self, id: &str) -> Option<Block> {
        self.read(|blocks| blocks.get(id).cloned())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read(|blocks| blocks.contains_key(id))
    }

    /// Upsert the full block, replacing whatever was stored under its id.
    ///
    /// Returns the previous value.
    pub fn put(&self, block: Block) -> Option<Block> {
        let previous = self.write(|blocks| blocks.insert(block.id.clone(), block.clone()));
        // No receivers is fine; the rendering layer may not be attached.
        let _ = self.events.send(StoreEvent::Put(block));
        previous
    }

    /// Remove a block. Absent ids are a no-op and fire no notification.
    pub fn remove(&self, id: &str) -> Option<Block> {
        let removed = self.write(|blocks| blocks.remove(id));
        if let Some(ref block) = removed {
            let _ = self.events.send(StoreEvent::Removed(block.clone()));
        }
        removed
    }

    /// Blocks of one kind in one scope, oldest first, ties broken by id.
    pub fn list_by_kind_and_scope(&self, kind: BlockKind, workspace_id: &str) -> Vec<Block> {
        let mut matching: Vec<Block> = self.read(|blocks| {
            blocks
                .values()
                .filter(|b| b.kind == kind && b.workspace_id == workspace_id)
                .cloned()
                .collect()
        });
        matching.sort_by(display_order);
        matching
    }

    /// Template picker listing: global templates first, then the workspace's own.
    pub fn templates(&self, workspace_id: &str) -> Vec<Block> {
        let mut combined = self.list_by_kind_and_scope(BlockKind::Template, GLOBAL_WORKSPACE_ID);
        if workspace_id != GLOBAL_WORKSPACE_ID {
            combined.extend(self.list_by_kind_and_scope(BlockKind::Template, workspace_id));
        }
        combined
    }

    /// Cards and views belonging to a board or template.
    pub fn children_of(&self, root_id: &str) -> Vec<Block> {
        let mut children: Vec<Block> = self.read(|blocks| {
            blocks
                .values()
                .filter(|b| b.root_id == root_id && b.id != root_id)
                .cloned()
                .collect()
        });
        children.sort_by(display_order);
        children
    }

    /// Every block in display order.
    pub fn snapshot(&self) -> Vec<Block> {
        let mut all: Vec<Block> = self.read(|blocks| blocks.values().cloned().collect());
        all.sort_by(display_order);
        all
    }

    pub fn len(&self) -> usize {
        self.read(|blocks| blocks.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read<T>(&self, f: impl FnOnce(&HashMap<String, Block>) -> T) -> T {
        let guard = self.blocks.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<T>(&self, f: impl FnOnce(&mut HashMap<String, Block>) -> T) -> T {
        let mut guard = self.blocks.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

/// Ascending `create_at`, then id.
pub fn display_order(a: &Block, b: &Block) -> Ordering {
    a.create_at
        .cmp(&b.create_at)
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn template(id: &str, workspace_id: &str, create_at: i64) -> Block {
        let mut block = Block::new(BlockKind::Template, id, workspace_id);
        block.id = id.to_string();
        block.root_id = id.to_string();
        block.create_at = create_at;
        block.update_at = create_at;
        block
    }

    #[test]
    fn test_put_overwrites_without_merging() {
        let store = BlockStore::new();
        let mut block = template("t1", "ws1", 100);
        block.fields.insert("icon".to_string(), serde_json::json!("a"));
        store.put(block.clone());

        let mut replacement = template("t1", "ws1", 100);
        replacement.title = "Replaced".to_string();
        let previous = store.put(replacement);

        assert_eq!(previous, Some(block));
        let stored = store.get("t1").unwrap();
        assert_eq!(stored.title, "Replaced");
        assert!(stored.fields.is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let store = BlockStore::new();
        store.put(template("t1", "ws1", 100));

        assert!(store.remove("t1").is_some());
        assert!(store.remove("t1").is_none());
        assert!(store.remove("never-existed").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_listing_orders_by_create_at_then_id() {
        let store = BlockStore::new();
        store.put(template("t3", "ws1", 200));
        store.put(template("t2", "ws1", 100));
        store.put(template("t1", "ws1", 100));
        store.put(template("other", "ws2", 50));

        let ids: Vec<String> = store
            .list_by_kind_and_scope(BlockKind::Template, "ws1")
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn test_templates_lists_global_first() {
        let store = BlockStore::new();
        store.put(template("T1", "ws1", 100));
        store.put(template("T2", "ws1", 200));
        store.put(template("G1", GLOBAL_WORKSPACE_ID, 50));
        store.put(template("G2", GLOBAL_WORKSPACE_ID, 300));

        let ids: Vec<String> = store.templates("ws1").into_iter().map(|b| b.id).collect();
        assert_eq!(ids, vec!["G1", "G2", "T1", "T2"]);

        let global_only: Vec<String> = store
            .templates(GLOBAL_WORKSPACE_ID)
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(global_only, vec!["G1", "G2"]);
    }

    #[test]
    fn test_children_of_excludes_root() {
        let store = BlockStore::new();
        let root = template("t1", "ws1", 100);
        let card = Block::child_of(&root, BlockKind::Card, "Card");
        store.put(root.clone());
        store.put(card.clone());

        let children = store.children_of("t1");
        assert_eq!(children, vec![card]);
    }

    #[test]
    fn test_notifications_fire_once_per_change() {
        let store = BlockStore::new();
        let mut events = store.subscribe();

        store.put(template("t1", "ws1", 100));
        store.remove("t1");
        store.remove("t1");

        assert!(matches!(events.try_recv(), Ok(StoreEvent::Put(b)) if b.id == "t1"));
        assert!(matches!(events.try_recv(), Ok(StoreEvent::Removed(b)) if b.id == "t1"));
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }
}
