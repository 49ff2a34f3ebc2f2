use serde::{Deserialize, Serialize};

use super::{now_millis, Block, Fields};

/// Property delta sent to the remote `patch` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub updated_fields: Fields,
    #[serde(default)]
    pub deleted_fields: Vec<String>,
}

impl BlockPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn set_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.updated_fields.insert(key.into(), value);
        self
    }

    pub fn delete_field(mut self, key: impl Into<String>) -> Self {
        self.deleted_fields.push(key.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.updated_fields.is_empty() && self.deleted_fields.is_empty()
    }

    /// Resulting block after applying this delta to `block`.
    pub fn apply(&self, block: &Block) -> Block {
        let mut next = block.clone();
        if let Some(ref title) = self.title {
            next.title = title.clone();
        }
        for key in &self.deleted_fields {
            next.fields.remove(key);
        }
        for (key, value) in &self.updated_fields {
            next.fields.insert(key.clone(), value.clone());
        }
        next.update_at = now_millis().max(block.update_at);
        next
    }

    /// Delta that takes a block patched by `self` back to `before`.
    pub fn inverse(&self, before: &Block) -> BlockPatch {
        let mut inverse = BlockPatch {
            title: self.title.as_ref().map(|_| before.title.clone()),
            ..Default::default()
        };

        let touched = self
            .updated_fields
            .keys()
            .chain(self.deleted_fields.iter());
        for key in touched {
            match before.fields.get(key) {
                Some(value) => {
                    inverse.updated_fields.insert(key.clone(), value.clone());
                }
                None => {
                    if !inverse.deleted_fields.contains(key) {
                        inverse.deleted_fields.push(key.clone());
                    }
                }
            }
        }
        inverse
    }
}
