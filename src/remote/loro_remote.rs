use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use loro::{LoroDoc, LoroMap, LoroValue};

use super::{RemoteClient, RemoteError};
use crate::admin::{hash_password, UserDirectory};
use crate::block::{now_millis, Block, BlockPatch, Fields, GLOBAL_WORKSPACE_ID};
use crate::error::{BlockdeckError, Result};

const BLOCKS: &str = "blocks";
const USERS: &str = "users";

struct LoroFile {
    doc: LoroDoc,
    path: PathBuf,
}

impl LoroFile {
    fn save(&self) -> Result<()> {
        let bytes = self.doc.export(loro::ExportMode::Snapshot)?;
        fs::write(&self.path, bytes)?;
        Ok(())
    }
}

/// Remote service persisted as a Loro document snapshot on disk.
pub struct LoroRemote {
    file: Arc<Mutex<LoroFile>>,
}

impl LoroRemote {
    /// Open the document at `path`, creating an empty one if absent.
    pub fn open(path: &Path) -> Result<Self> {
        let doc = LoroDoc::new();
        if path.exists() {
            let bytes = fs::read(path)?;
            doc.import(&bytes)?;
        } else if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = LoroFile {
            doc,
            path: path.to_path_buf(),
        };
        file.save()?;

        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn add_user(&self, username: &str, password: &str) -> Result<()> {
        let file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        write_user(&file.doc, username, &hash_password(password))?;
        file.doc.commit();
        file.save()
    }

    pub fn password_hash(&self, username: &str) -> Option<String> {
        let file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let users = file.doc.get_map(USERS).get_deep_value();
        if let LoroValue::Map(map) = users {
            if let Some(LoroValue::Map(user)) = map.get(username) {
                return string_field(user, "password");
            }
        }
        None
    }

    /// Run `f` against the document on the blocking pool, persisting after.
    async fn with_doc<T, F>(&self, f: F) -> std::result::Result<T, RemoteError>
    where
        T: Send + 'static,
        F: FnOnce(&LoroDoc) -> std::result::Result<T, RemoteError> + Send + 'static,
    {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || {
            let guard = file.lock().unwrap_or_else(PoisonError::into_inner);
            let value = f(&guard.doc)?;
            guard.doc.commit();
            guard.save().map_err(RemoteError::backend)?;
            Ok(value)
        })
        .await
        .map_err(|e| RemoteError::Unavailable(e.to_string()))?
    }
}

fn write_block(doc: &LoroDoc, block: &Block) -> std::result::Result<(), RemoteError> {
    let blocks = doc.get_map(BLOCKS);
    // The property bag is one JSON string, so a rewrite drops removed keys.
    let entry = blocks
        .get_or_create_container(&block.id, LoroMap::new())
        .map_err(RemoteError::backend)?;

    let fields = serde_json::to_string(&block.fields).map_err(RemoteError::backend)?;
    let insert = |key: &str, value: LoroValue| entry.insert(key, value);
    insert("id", block.id.clone().into())
        .and_then(|_| insert("parent_id", block.parent_id.clone().into()))
        .and_then(|_| insert("root_id", block.root_id.clone().into()))
        .and_then(|_| insert("type", block.kind.to_string().into()))
        .and_then(|_| insert("title", block.title.clone().into()))
        .and_then(|_| insert("fields", fields.into()))
        .and_then(|_| insert("create_at", block.create_at.into()))
        .and_then(|_| insert("update_at", block.update_at.into()))
        .and_then(|_| insert("workspace_id", block.workspace_id.clone().into()))
        .map_err(RemoteError::backend)
}

fn read_block(doc: &LoroDoc, id: &str) -> Option<Block> {
    let json = doc.get_map(BLOCKS).get_deep_value();
    if let LoroValue::Map(map) = json {
        if let Some(LoroValue::Map(entry)) = map.get(id) {
            return parse_block(entry);
        }
    }
    None
}

fn read_all_blocks(doc: &LoroDoc) -> Vec<Block> {
    let mut blocks = Vec::new();
    let json = doc.get_map(BLOCKS).get_deep_value();
    if let LoroValue::Map(map) = json {
        for (_, value) in map.iter() {
            if let LoroValue::Map(entry) = value {
                if let Some(block) = parse_block(entry) {
                    blocks.push(block);
                }
            }
        }
    }
    blocks
}

fn parse_block(map: &loro::LoroMapValue) -> Option<Block> {
    let kind = string_field(map, "type")?.parse().ok()?;
    let fields: Fields = serde_json::from_str(&string_field(map, "fields")?).ok()?;

    let create_at = match map.get("create_at")? {
        LoroValue::I64(n) => *n,
        _ => return None,
    };
    let update_at = match map.get("update_at")? {
        LoroValue::I64(n) => *n,
        _ => return None,
    };

    Some(Block {
        id: string_field(map, "id")?,
        parent_id: string_field(map, "parent_id").unwrap_or_default(),
        root_id: string_field(map, "root_id")?,
        kind,
        title: string_field(map, "title").unwrap_or_default(),
        fields,
        create_at,
        update_at,
        workspace_id: string_field(map, "workspace_id")?,
    })
}

fn string_field(map: &loro::LoroMapValue, key: &str) -> Option<String> {
    match map.get(key)? {
        LoroValue::String(s) => Some(s.to_string()),
        _ => None,
    }
}

fn write_user(doc: &LoroDoc, username: &str, password_hash: &str) -> Result<()> {
    let users = doc.get_map(USERS);
    let entry = users.get_or_create_container(username, LoroMap::new())?;
    entry.insert("username", username)?;
    entry.insert("password", password_hash)?;
    entry.insert("update_at", now_millis())?;
    Ok(())
}

#[async_trait]
impl RemoteClient for LoroRemote {
    async fn create(&self, block: &Block) -> std::result::Result<Block, RemoteError> {
        let mut confirmed = block.clone();
        confirmed.update_at = now_millis().max(block.update_at);
        self.with_doc(move |doc| {
            write_block(doc, &confirmed)?;
            Ok(confirmed)
        })
        .await
    }

    async fn patch(&self, id: &str, patch: &BlockPatch) -> std::result::Result<Block, RemoteError> {
        let id = id.to_string();
        let patch = patch.clone();
        self.with_doc(move |doc| {
            let current = read_block(doc, &id).ok_or_else(|| RemoteError::NotFound(id.clone()))?;
            let confirmed = patch.apply(&current);
            write_block(doc, &confirmed)?;
            Ok(confirmed)
        })
        .await
    }

    async fn delete(&self, id: &str) -> std::result::Result<(), RemoteError> {
        let id = id.to_string();
        self.with_doc(move |doc| {
            let blocks = doc.get_map(BLOCKS);
            if blocks.get(&id).is_some() {
                blocks.delete(&id).map_err(RemoteError::backend)?;
            }
            Ok(())
        })
        .await
    }

    async fn fetch_workspace(
        &self,
        workspace_id: &str,
    ) -> std::result::Result<Vec<Block>, RemoteError> {
        let workspace_id = workspace_id.to_string();
        self.with_doc(move |doc| {
            Ok(read_all_blocks(doc)
                .into_iter()
                .filter(|b| b.workspace_id == workspace_id || b.workspace_id == GLOBAL_WORKSPACE_ID)
                .collect())
        })
        .await
    }
}

#[async_trait]
impl UserDirectory for LoroRemote {
    async fn reset_password(&self, username: &str, password: &str) -> Result<()> {
        let name = username.to_string();
        let hash = hash_password(password);
        let found = self
            .with_doc(move |doc| {
                let exists = doc.get_map(USERS).get(&name).is_some();
                if exists {
                    write_user(doc, &name, &hash).map_err(RemoteError::backend)?;
                }
                Ok(exists)
            })
            .await?;

        if !found {
            return Err(BlockdeckError::UserNotFound(username.to_string()));
        }
        Ok(())
    }
}
