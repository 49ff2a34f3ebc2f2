//! Active template selection.
//!
//! The caller owns the selected id; this module only supplies the rule for
//! keeping it valid as the template listing changes.

use crate::block::Block;
use crate::store::{BlockStore, StoreEvent};

/// Keep `current` while it is still listed; otherwise fall back to the
/// first entry, or `None` for an empty listing.
pub fn resolve_active(current: Option<&str>, sequence: &[Block]) -> Option<String> {
    if let Some(id) = current {
        if sequence.iter().any(|b| b.id == id) {
            return Some(id.to_string());
        }
    }
    sequence.first().map(|b| b.id.clone())
}

/// Selected template for one picker instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveSelection {
    active: Option<String>,
}

impl ActiveSelection {
    /// Start on the first entry of `sequence`.
    pub fn new(sequence: &[Block]) -> Self {
        Self {
            active: resolve_active(None, sequence),
        }
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Explicit user choice. Ignored when `id` is not listed.
    pub fn select(&mut self, id: &str, sequence: &[Block]) -> bool {
        if sequence.iter().any(|b| b.id == id) {
            self.active = Some(id.to_string());
            true
        } else {
            false
        }
    }

    /// Re-derive after any change to the listing.
    pub fn refresh(&mut self, sequence: &[Block]) -> Option<&str> {
        self.active = resolve_active(self.active.as_deref(), sequence);
        self.active.as_deref()
    }

    /// Refresh against the store's template listing when `event` touched a
    /// template.
    pub fn on_store_event(
        &mut self,
        event: &StoreEvent,
        store: &BlockStore,
        workspace_id: &str,
    ) -> Option<&str> {
        if event.block().is_template() {
            self.refresh(&store.templates(workspace_id));
        }
        self.active.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockKind, GLOBAL_WORKSPACE_ID};

    fn template(id: &str, create_at: i64) -> Block {
        let mut block = Block::new(BlockKind::Template, id, "ws1");
        block.id = id.to_string();
        block.create_at = create_at;
        block
    }

    #[test]
    fn test_defaults_to_first() {
        let sequence = vec![template("A", 1), template("B", 2)];
        assert_eq!(resolve_active(None, &sequence), Some("A".to_string()));
        assert_eq!(ActiveSelection::new(&sequence).active(), Some("A"));
    }

    #[test]
    fn test_keeps_valid_selection() {
        let sequence = vec![template("A", 1), template("B", 2)];
        assert_eq!(resolve_active(Some("B"), &sequence), Some("B".to_string()));
    }

    #[test]
    fn test_invalid_selection_falls_back_to_first_or_none() {
        let remaining = vec![template("B", 2)];
        assert_eq!(resolve_active(Some("X"), &remaining), Some("B".to_string()));
        assert_eq!(resolve_active(Some("X"), &[]), None);
    }

    #[test]
    fn test_select_rejects_unknown_id() {
        let sequence = vec![template("A", 1), template("B", 2)];
        let mut selection = ActiveSelection::new(&sequence);
        assert!(!selection.select("Z", &sequence));
        assert_eq!(selection.active(), Some("A"));
        assert!(selection.select("B", &sequence));
        assert_eq!(selection.active(), Some("B"));
    }

    #[test]
    fn test_store_events_trigger_recomputation() {
        let store = BlockStore::new();
        let mut events = store.subscribe();
        let x = template("X", 100);
        let mut global = template("G", 50);
        global.workspace_id = GLOBAL_WORKSPACE_ID.to_string();
        store.put(global);
        store.put(x);

        let mut selection = ActiveSelection::default();
        selection.select("X", &store.templates("ws1"));

        store.remove("X");
        while let Ok(event) = events.try_recv() {
            selection.on_store_event(&event, &store, "ws1");
        }
        assert_eq!(selection.active(), Some("G"));

        store.remove("G");
        while let Ok(event) = events.try_recv() {
            selection.on_store_event(&event, &store, "ws1");
        }
        assert_eq!(selection.active(), None);
    }
}
