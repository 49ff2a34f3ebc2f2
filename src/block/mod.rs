mod patch;

pub use patch::BlockPatch;

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Scope id shared by every workspace.
pub const GLOBAL_WORKSPACE_ID: &str = "0";

/// Free-form property bag carried by every block.
pub type Fields = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Board,
    Template,
    Card,
    View,
}

impl BlockKind {
    /// Boards and templates own a tree of cards and views.
    pub fn is_root(self) -> bool {
        matches!(self, BlockKind::Board | BlockKind::Template)
    }

    fn id_prefix(self) -> char {
        match self {
            BlockKind::Board => 'b',
            BlockKind::Template => 't',
            BlockKind::Card => 'c',
            BlockKind::View => 'v',
        }
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockKind::Board => write!(f, "board"),
            BlockKind::Template => write!(f, "template"),
            BlockKind::Card => write!(f, "card"),
            BlockKind::View => write!(f, "view"),
        }
    }
}

impl std::str::FromStr for BlockKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "board" => Ok(BlockKind::Board),
            "template" => Ok(BlockKind::Template),
            "card" => Ok(BlockKind::Card),
            "view" => Ok(BlockKind::View),
            _ => Err(format!("Invalid block kind: {}", s)),
        }
    }
}

/// A persisted document-like object: board, template, card or view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: String,
    /// Direct parent; empty for boards and templates.
    #[serde(default)]
    pub parent_id: String,
    /// Board or template this block belongs to; its own id for roots.
    pub root_id: String,
    #[serde(rename = "type")]
    pub kind: BlockKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub fields: Fields,
    /// Creation time in epoch milliseconds; drives display ordering.
    pub create_at: i64,
    pub update_at: i64,
    pub workspace_id: String,
}

impl Block {
    pub fn new(kind: BlockKind, title: impl Into<String>, workspace_id: impl Into<String>) -> Self {
        let now = now_millis();
        let id = generate_id(kind);
        Self {
            root_id: id.clone(),
            id,
            parent_id: String::new(),
            kind,
            title: title.into(),
            fields: Fields::new(),
            create_at: now,
            update_at: now,
            workspace_id: workspace_id.into(),
        }
    }

    /// A card or view placed under `root`.
    pub fn child_of(root: &Block, kind: BlockKind, title: impl Into<String>) -> Self {
        let mut block = Block::new(kind, title, root.workspace_id.clone());
        block.parent_id = root.id.clone();
        block.root_id = root.id.clone();
        block
    }

    /// Empty board or template with the default property bag and one board view.
    pub fn empty_root(kind: BlockKind, workspace_id: impl Into<String>) -> Vec<Block> {
        let mut root = Block::new(kind, "", workspace_id);
        root.fields = default_root_fields();

        let mut view = Block::child_of(&root, BlockKind::View, "Board view");
        view.fields.insert("viewType".to_string(), json!("board"));
        view.create_at = root.create_at;
        view.update_at = root.update_at;

        vec![root, view]
    }

    pub fn is_global(&self) -> bool {
        self.workspace_id == GLOBAL_WORKSPACE_ID
    }

    pub fn is_template(&self) -> bool {
        self.kind == BlockKind::Template
    }
}

fn default_root_fields() -> Fields {
    let mut fields = Fields::new();
    fields.insert("icon".to_string(), json!(""));
    fields.insert("description".to_string(), json!(""));
    fields.insert("cardProperties".to_string(), json!([]));
    fields
}

/// Fresh block id: kind prefix followed by a v4 UUID in simple form.
pub fn generate_id(kind: BlockKind) -> String {
    format!("{}{}", kind.id_prefix(), Uuid::new_v4().simple())
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Copy a board or template together with its cards and views.
///
/// Every block gets a fresh id and `create_at`; parent links are remapped
/// onto the new ids so the copy is a self-contained tree. The root's
/// property bag is cloned verbatim.
pub fn duplicate_tree(
    root: &Block,
    children: &[Block],
    kind: BlockKind,
    workspace_id: &str,
) -> Vec<Block> {
    let now = now_millis();
    let mut id_map: HashMap<&str, String> = HashMap::new();

    let new_root_id = generate_id(kind);
    id_map.insert(root.id.as_str(), new_root_id.clone());
    for child in children {
        id_map.insert(child.id.as_str(), generate_id(child.kind));
    }

    let mut copy = Vec::with_capacity(children.len() + 1);
    copy.push(Block {
        id: new_root_id.clone(),
        parent_id: String::new(),
        root_id: new_root_id.clone(),
        kind,
        title: root.title.clone(),
        fields: root.fields.clone(),
        create_at: now,
        update_at: now,
        workspace_id: workspace_id.to_string(),
    });

    for child in children {
        let parent_id = id_map
            .get(child.parent_id.as_str())
            .cloned()
            .unwrap_or_else(|| new_root_id.clone());
        copy.push(Block {
            id: id_map[child.id.as_str()].clone(),
            parent_id,
            root_id: new_root_id.clone(),
            kind: child.kind,
            title: child.title.clone(),
            fields: child.fields.clone(),
            create_at: now,
            update_at: now,
            workspace_id: workspace_id.to_string(),
        });
    }

    copy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_kind_round_trips_through_strings() {
        for kind in [BlockKind::Board, BlockKind::Template, BlockKind::Card, BlockKind::View] {
            let parsed: BlockKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("column".parse::<BlockKind>().is_err());
    }

    #[test]
    fn test_generated_ids_are_prefixed_and_unique() {
        let a = generate_id(BlockKind::Template);
        let b = generate_id(BlockKind::Template);
        assert!(a.starts_with('t'));
        assert_eq!(a.len(), 33);
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_root_has_default_view() {
        let blocks = Block::empty_root(BlockKind::Board, "ws1");
        assert_eq!(blocks.len(), 2);
        let root = &blocks[0];
        let view = &blocks[1];
        assert_eq!(root.root_id, root.id);
        assert!(root.fields.contains_key("cardProperties"));
        assert_eq!(view.kind, BlockKind::View);
        assert_eq!(view.parent_id, root.id);
        assert_eq!(view.root_id, root.id);
        assert_eq!(view.workspace_id, "ws1");
    }

    #[test]
    fn test_duplicate_tree_remaps_ids() {
        let mut template = Block::new(BlockKind::Template, "Roadmap", GLOBAL_WORKSPACE_ID);
        template.fields.insert("icon".to_string(), json!("🗺"));
        let card = Block::child_of(&template, BlockKind::Card, "Milestone");
        let mut comment = Block::child_of(&template, BlockKind::Card, "Sub item");
        comment.parent_id = card.id.clone();

        let copy = duplicate_tree(
            &template,
            &[card.clone(), comment.clone()],
            BlockKind::Board,
            "ws1",
        );

        assert_eq!(copy.len(), 3);
        let root = &copy[0];
        assert_eq!(root.kind, BlockKind::Board);
        assert_ne!(root.id, template.id);
        assert_eq!(root.fields, template.fields);
        assert_eq!(root.workspace_id, "ws1");

        assert_eq!(copy[1].parent_id, root.id);
        assert_eq!(copy[2].parent_id, copy[1].id);
        assert!(copy.iter().all(|b| b.root_id == root.id));
        assert!(copy.iter().all(|b| b.id != card.id && b.id != comment.id));
    }

    #[test]
    fn test_block_serializes_camel_case() {
        let block = Block::new(BlockKind::Card, "Task", "ws1");
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "card");
        assert!(json.get("createAt").is_some());
        assert!(json.get("workspaceId").is_some());
    }
}
