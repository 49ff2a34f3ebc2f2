use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{RemoteClient, RemoteError};
use crate::admin::{hash_password, UserDirectory};
use crate::block::{now_millis, Block, BlockPatch, Fields, GLOBAL_WORKSPACE_ID};
use crate::error::{BlockdeckError, Result};

const BLOCK_COLUMNS: &str =
    "id, parent_id, root_id, type, title, fields, create_at, update_at, workspace_id";

/// Remote service persisted in a SQLite database.
pub struct SqliteRemote {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRemote {
    /// Open or create the database file
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Register a user account (admin tooling and tests).
    pub fn add_user(&self, username: &str, password: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT INTO users (id, username, password, update_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                uuid::Uuid::new_v4().to_string(),
                username,
                hash_password(password),
                now_millis()
            ],
        )?;
        Ok(())
    }

    /// Stored password digest for `username`.
    pub fn password_hash(&self, username: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let hash = conn
            .query_row(
                "SELECT password FROM users WHERE username = ?1",
                [username],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> std::result::Result<T, RemoteError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> std::result::Result<T, RemoteError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&guard)
        })
        .await
        .map_err(|e| RemoteError::Unavailable(e.to_string()))?
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS blocks (
            id TEXT PRIMARY KEY,
            parent_id TEXT NOT NULL,
            root_id TEXT NOT NULL,
            type TEXT NOT NULL,
            title TEXT NOT NULL,
            fields TEXT NOT NULL,
            create_at INTEGER NOT NULL,
            update_at INTEGER NOT NULL,
            workspace_id TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_blocks_workspace ON blocks(workspace_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password TEXT NOT NULL,
            update_at INTEGER NOT NULL
        )",
        [],
    )?;

    Ok(())
}

type RawBlock = (String, String, String, String, String, String, i64, i64, String);

fn read_raw(row: &Row<'_>) -> rusqlite::Result<RawBlock> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn block_from_raw(raw: RawBlock) -> std::result::Result<Block, RemoteError> {
    let (id, parent_id, root_id, kind, title, fields, create_at, update_at, workspace_id) = raw;
    let kind = kind.parse().map_err(RemoteError::Backend)?;
    let fields: Fields = serde_json::from_str(&fields).map_err(RemoteError::backend)?;
    Ok(Block {
        id,
        parent_id,
        root_id,
        kind,
        title,
        fields,
        create_at,
        update_at,
        workspace_id,
    })
}

fn load_block(conn: &Connection, id: &str) -> std::result::Result<Option<Block>, RemoteError> {
    let raw = conn
        .query_row(
            &format!("SELECT {} FROM blocks WHERE id = ?1", BLOCK_COLUMNS),
            [id],
            read_raw,
        )
        .optional()
        .map_err(RemoteError::backend)?;
    raw.map(block_from_raw).transpose()
}

fn store_block(conn: &Connection, block: &Block) -> std::result::Result<(), RemoteError> {
    let fields = serde_json::to_string(&block.fields).map_err(RemoteError::backend)?;
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO blocks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            BLOCK_COLUMNS
        ),
        params![
            block.id,
            block.parent_id,
            block.root_id,
            block.kind.to_string(),
            block.title,
            fields,
            block.create_at,
            block.update_at,
            block.workspace_id,
        ],
    )
    .map_err(RemoteError::backend)?;
    Ok(())
}

#[async_trait]
impl RemoteClient for SqliteRemote {
    async fn create(&self, block: &Block) -> std::result::Result<Block, RemoteError> {
        let mut confirmed = block.clone();
        confirmed.update_at = now_millis().max(block.update_at);
        self.with_conn(move |conn| {
            store_block(conn, &confirmed)?;
            Ok(confirmed)
        })
        .await
    }

    async fn patch(&self, id: &str, patch: &BlockPatch) -> std::result::Result<Block, RemoteError> {
        let id = id.to_string();
        let patch = patch.clone();
        self.with_conn(move |conn| {
            let current = load_block(conn, &id)?.ok_or_else(|| RemoteError::NotFound(id.clone()))?;
            let confirmed = patch.apply(&current);
            store_block(conn, &confirmed)?;
            Ok(confirmed)
        })
        .await
    }

    async fn delete(&self, id: &str) -> std::result::Result<(), RemoteError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM blocks WHERE id = ?1", [&id])
                .map_err(RemoteError::backend)?;
            Ok(())
        })
        .await
    }

    async fn fetch_workspace(
        &self,
        workspace_id: &str,
    ) -> std::result::Result<Vec<Block>, RemoteError> {
        let workspace_id = workspace_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM blocks WHERE workspace_id = ?1 OR workspace_id = ?2
                     ORDER BY create_at, id",
                    BLOCK_COLUMNS
                ))
                .map_err(RemoteError::backend)?;
            let rows = stmt
                .query_map(params![workspace_id, GLOBAL_WORKSPACE_ID], read_raw)
                .map_err(RemoteError::backend)?;

            let mut blocks = Vec::new();
            for row in rows {
                blocks.push(block_from_raw(row.map_err(RemoteError::backend)?)?);
            }
            Ok(blocks)
        })
        .await
    }
}

#[async_trait]
impl UserDirectory for SqliteRemote {
    async fn reset_password(&self, username: &str, password: &str) -> Result<()> {
        let name = username.to_string();
        let hash = hash_password(password);
        let updated = self
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE users SET password = ?1, update_at = ?2 WHERE username = ?3",
                    params![hash, now_millis(), name],
                )
                .map_err(RemoteError::backend)
            })
            .await?;

        if updated == 0 {
            return Err(BlockdeckError::UserNotFound(username.to_string()));
        }
        Ok(())
    }
}
