use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::TryRecvError;
use tokio_util::sync::CancellationToken;

use crate::admin::AdminServer;
use crate::block::{Block, BlockKind, BlockPatch};
use crate::config::{Config, DbType};
use crate::error::{BlockdeckError, Result};
use crate::mutator::{DeleteHooks, Mutator, Navigation};
use crate::remote::{self, Backend};
use crate::selection::ActiveSelection;
use crate::store::BlockStore;
use crate::sync;

/// An opened backend with the workspace loaded into a fresh store.
pub struct Session {
    pub config: Config,
    pub mutator: Mutator,
}

impl Session {
    pub async fn open(config_path: &Path, workspace: Option<String>) -> Result<Self> {
        let config = load_config(config_path, workspace)?;
        let backend = remote::open_backend(&config)?;

        let store = Arc::new(BlockStore::new());
        sync::load_workspace(&store, backend.remote.as_ref(), &config.workspace_id).await?;

        let mutator = Mutator::new(store, backend.remote, config.workspace_id.clone())
            .with_history_limit(config.history_limit);
        Ok(Self { config, mutator })
    }

    fn store(&self) -> &BlockStore {
        self.mutator.store()
    }

    fn workspace_id(&self) -> &str {
        self.mutator.workspace_id()
    }
}

fn load_config(config_path: &Path, workspace: Option<String>) -> Result<Config> {
    if !config_path.exists() {
        return Err(BlockdeckError::Config(format!(
            "{} not found. Run 'blockdeck init' first.",
            config_path.display()
        )));
    }
    let mut config = Config::load(config_path)?;
    if let Some(workspace_id) = workspace {
        config.workspace_id = workspace_id;
    }
    Ok(config)
}

pub fn handle_init(
    config_path: &Path,
    dbtype: DbType,
    dbconfig: Option<String>,
    force: bool,
) -> Result<()> {
    if config_path.exists() && !force {
        return Err(BlockdeckError::Config(format!(
            "Already initialized: {} exists (use --force to overwrite)",
            config_path.display()
        )));
    }

    let dbconfig = dbconfig.unwrap_or_else(|| match dbtype {
        DbType::Sqlite3 => "./blockdeck.db".to_string(),
        DbType::Loro => "./blockdeck.loro".to_string(),
    });
    let config = Config {
        dbtype,
        dbconfig,
        ..Config::default()
    };
    config.validate()?;
    config.save(config_path)?;

    // Opening creates the schema (sqlite3) or the snapshot file (loro).
    remote::open_backend(&config)?;

    println!("Initialized blockdeck in {}", config_path.display());
    println!("  dbtype: {}", config.dbtype);
    println!("  dbconfig: {}", config.dbconfig);
    Ok(())
}

pub fn handle_templates(session: &Session, json: bool) -> Result<()> {
    let templates = session.store().templates(session.workspace_id());
    let selection = ActiveSelection::new(&templates);
    print_blocks("Templates", &templates, selection.active(), json)
}

pub fn handle_boards(session: &Session, json: bool) -> Result<()> {
    let boards = session
        .store()
        .list_by_kind_and_scope(BlockKind::Board, session.workspace_id());
    print_blocks("Boards", &boards, None, json)
}

pub async fn handle_add_template(session: &Session, json: bool) -> Result<()> {
    let id = session.mutator.add_empty_template(Navigation::none()).await?;
    print_created("template", &id, json);
    Ok(())
}

pub async fn handle_add_board(
    session: &Session,
    from: Option<String>,
    global: bool,
    json: bool,
) -> Result<()> {
    let id = match from {
        Some(template_id) => {
            session
                .mutator
                .add_board_from_template(&template_id, global, Navigation::none())
                .await?
        }
        None => session.mutator.add_empty_board(Navigation::none()).await?,
    };
    print_created("board", &id, json);
    Ok(())
}

pub async fn handle_save_template(session: &Session, board_id: &str, json: bool) -> Result<()> {
    let id = session
        .mutator
        .duplicate_as_template(board_id, Navigation::none())
        .await?;
    print_created("template", &id, json);
    Ok(())
}

pub async fn handle_rename(session: &Session, id: &str, title: String, json: bool) -> Result<()> {
    let block = find_block(session, id)?;
    session
        .mutator
        .patch_block(&block.id, BlockPatch::title(title), &format!("Rename {}", block.kind))
        .await?;
    if json {
        println!("{}", json!({ "renamed": block.id }));
    } else {
        println!("Renamed {}", block.id);
    }
    Ok(())
}

pub async fn handle_delete(session: &Session, id: &str, json: bool) -> Result<()> {
    let block = find_block(session, id)?;
    session
        .mutator
        .delete_block(&block, &format!("Delete {}", block.kind), DeleteHooks::none())
        .await?;
    if json {
        println!("{}", json!({ "deleted": block.id }));
    } else {
        println!("Deleted {} {}", block.kind, block.id);
    }
    Ok(())
}

pub async fn handle_serve_admin(
    config_path: &Path,
    workspace: Option<String>,
    socket: Option<std::path::PathBuf>,
) -> Result<()> {
    let config = load_config(config_path, workspace)?;
    let Backend { users, .. } = remote::open_backend(&config)?;

    let server = match socket {
        Some(path) => AdminServer::new(path, users),
        None => AdminServer::from_config(&config, users).ok_or_else(|| {
            BlockdeckError::Config(
                "local mode is disabled; set enableLocalMode or pass --socket".to_string(),
            )
        })?,
    };

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    println!("Admin channel listening on {}", server.socket_path().display());
    server.run(shutdown).await
}

/// Block the user is looking at; set by navigation, cleared when it goes away.
type CurrentBlock = Arc<Mutex<Option<String>>>;

fn set_current(current: &CurrentBlock, value: Option<String>) {
    *current.lock().unwrap_or_else(PoisonError::into_inner) = value;
}

fn get_current(current: &CurrentBlock) -> Option<String> {
    current.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Interactive session: one command per line on stdin. Errors are reported
/// and the session continues.
pub async fn handle_shell(session: Session, json: bool) -> Result<()> {
    let store = Arc::clone(session.mutator.store());
    let mut events = store.subscribe();
    let mut selection = ActiveSelection::new(&store.templates(session.workspace_id()));
    let current: CurrentBlock = Arc::new(Mutex::new(None));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line == "quit" || line == "exit" {
            break;
        }

        if let Err(e) = run_shell_line(&session, &mut selection, &current, line, json).await {
            if json {
                println!("{}", json!({ "error": e.to_string() }));
            } else {
                println!("Error: {}", e);
            }
        }

        loop {
            match events.try_recv() {
                Ok(event) => {
                    selection.on_store_event(&event, &store, session.workspace_id());
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "store events lagged, recomputing selection");
                    selection.refresh(&store.templates(session.workspace_id()));
                }
                Err(_) => break,
            }
        }
    }
    Ok(())
}

async fn run_shell_line(
    session: &Session,
    selection: &mut ActiveSelection,
    current: &CurrentBlock,
    line: &str,
    json: bool,
) -> Result<()> {
    let mut parts = line.split_whitespace();
    let verb = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();
    let mutator = &session.mutator;

    match verb {
        "templates" => {
            let templates = session.store().templates(session.workspace_id());
            print_blocks("Templates", &templates, selection.active(), json)?;
        }
        "boards" => handle_boards(session, json)?,
        "select" => {
            let id = required_arg(&args, 0, "select <template_id>")?;
            let templates = session.store().templates(session.workspace_id());
            if !selection.select(id, &templates) {
                return Err(BlockdeckError::NotFound(id.to_string()));
            }
            print_value("active", selection.active(), json);
        }
        "active" => print_value("active", selection.active(), json),
        "current" => print_value("current", get_current(current).as_deref(), json),
        "add-template" => {
            let id = mutator.add_empty_template(navigation(current)).await?;
            print_created("template", &id, json);
        }
        "add-board" => {
            let id = match args.iter().find(|a| **a != "--global") {
                Some(template_id) => {
                    let global = args.contains(&"--global");
                    mutator
                        .add_board_from_template(template_id, global, navigation(current))
                        .await?
                }
                None => mutator.add_empty_board(navigation(current)).await?,
            };
            print_created("board", &id, json);
        }
        "use-template" => {
            let template = selection
                .active()
                .and_then(|id| session.store().get(id))
                .ok_or_else(|| BlockdeckError::NotFound("no template selected".to_string()))?;
            let id = mutator
                .add_board_from_template(&template.id, template.is_global(), navigation(current))
                .await?;
            print_created("board", &id, json);
        }
        "save-template" => {
            let board_id = required_arg(&args, 0, "save-template <board_id>")?;
            let id = mutator
                .duplicate_as_template(board_id, navigation(current))
                .await?;
            print_created("template", &id, json);
        }
        "rename" => {
            let id = required_arg(&args, 0, "rename <id> <title>")?;
            let title = args[1..].join(" ");
            if title.is_empty() {
                return Err(usage("rename <id> <title>"));
            }
            let block = find_block(session, id)?;
            mutator
                .patch_block(&block.id, BlockPatch::title(title), &format!("Rename {}", block.kind))
                .await?;
            print_value("renamed", Some(block.id.as_str()), json);
        }
        "delete" => {
            let id = required_arg(&args, 0, "delete <id>")?;
            let block = find_block(session, id)?;
            mutator
                .delete_block(&block, &format!("Delete {}", block.kind), delete_hooks(current, &block.id))
                .await?;
            print_value("deleted", Some(block.id.as_str()), json);
        }
        "undo" => {
            let label = mutator.undo().await?;
            print_value("undone", Some(label.as_str()), json);
        }
        "redo" => {
            let label = mutator.redo().await?;
            print_value("redone", Some(label.as_str()), json);
        }
        "history" => {
            let (undo_len, redo_len) = mutator.history_depth().await;
            let undo_label = mutator.undo_label().await;
            let redo_label = mutator.redo_label().await;
            if json {
                println!(
                    "{}",
                    json!({
                        "undo": undo_len,
                        "redo": redo_len,
                        "undoLabel": undo_label,
                        "redoLabel": redo_label,
                    })
                );
            } else {
                println!(
                    "undo: {} ({})  redo: {} ({})",
                    undo_len,
                    undo_label.as_deref().unwrap_or("-"),
                    redo_len,
                    redo_label.as_deref().unwrap_or("-")
                );
            }
        }
        "help" => print_shell_help(),
        other => {
            return Err(BlockdeckError::Config(format!(
                "unknown command '{}' (try 'help')",
                other
            )))
        }
    }
    Ok(())
}

fn navigation(current: &CurrentBlock) -> Navigation {
    let on_navigate = Arc::clone(current);
    let on_fallback = Arc::clone(current);
    Navigation::new(
        move |id| set_current(&on_navigate, Some(id.to_string())),
        move || set_current(&on_fallback, None),
    )
}

/// Leave a deleted block if it is the current one; return to it when the
/// delete is undone. Redo re-checks against whatever is current by then.
fn delete_hooks(current: &CurrentBlock, block_id: &str) -> DeleteHooks {
    let was_current = Arc::new(AtomicBool::new(false));
    let (before, after) = (Arc::clone(current), Arc::clone(current));
    let (left, returning) = (Arc::clone(&was_current), was_current);
    let (id, restored_id) = (block_id.to_string(), block_id.to_string());
    DeleteHooks::new(
        move || {
            let is_current = get_current(&before).as_deref() == Some(id.as_str());
            left.store(is_current, Ordering::SeqCst);
            if is_current {
                set_current(&before, None);
            }
        },
        move || {
            if returning.load(Ordering::SeqCst) {
                set_current(&after, Some(restored_id.clone()));
            }
        },
    )
}

fn find_block(session: &Session, id: &str) -> Result<Block> {
    session
        .store()
        .get(id)
        .ok_or_else(|| BlockdeckError::NotFound(id.to_string()))
}

fn required_arg<'a>(args: &[&'a str], index: usize, usage_text: &str) -> Result<&'a str> {
    args.get(index).copied().ok_or_else(|| usage(usage_text))
}

fn usage(text: &str) -> BlockdeckError {
    BlockdeckError::Config(format!("usage: {}", text))
}

fn print_created(kind: &str, id: &str, json: bool) {
    if json {
        println!("{}", json!({ "created": kind, "id": id }));
    } else {
        println!("Created {} {}", kind, id);
    }
}

fn print_value(key: &str, value: Option<&str>, json: bool) {
    if json {
        println!("{}", json!({ key: value }));
    } else {
        println!("{}: {}", key, value.unwrap_or("(none)"));
    }
}

fn print_blocks(heading: &str, blocks: &[Block], active: Option<&str>, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(blocks)?);
        return Ok(());
    }
    if blocks.is_empty() {
        println!("No {} found.", heading.to_lowercase());
        return Ok(());
    }

    println!("{}:\n", heading);
    for block in blocks {
        let marker = if active == Some(block.id.as_str()) { "*" } else { " " };
        let scope = if block.is_global() {
            "global"
        } else {
            block.workspace_id.as_str()
        };
        println!("{} {} [{}] {}", marker, block.id, scope, block.title);
    }
    Ok(())
}

fn print_shell_help() {
    println!("Commands:");
    println!("  templates | boards | active | current | history");
    println!("  select <template_id>");
    println!("  add-template");
    println!("  add-board [<template_id>] [--global]");
    println!("  use-template [--global]");
    println!("  save-template <board_id>");
    println!("  rename <id> <title>");
    println!("  delete <id>");
    println!("  undo | redo | quit");
}
