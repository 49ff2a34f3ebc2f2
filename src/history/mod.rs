//! Undo/redo history.
//!
//! A [`Command`] pairs a forward and a reverse action under a display
//! label. [`History`] runs commands and keeps the two stacks: executing a
//! fresh command always empties the redo stack, and commands are never
//! reordered or merged.

use std::future::Future;
use std::pin::Pin;

use crate::error::{BlockdeckError, Result};

pub type ActionFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Re-runnable async action; redo runs the same forward action again.
pub type Action = Box<dyn Fn() -> ActionFuture + Send + Sync>;

const DEFAULT_LIMIT: usize = 100;

/// One user-intended mutation and its inverse.
pub struct Command {
    label: String,
    block_id: String,
    forward: Action,
    reverse: Action,
}

impl Command {
    pub fn new<F, FF, R, RF>(
        label: impl Into<String>,
        block_id: impl Into<String>,
        forward: F,
        reverse: R,
    ) -> Self
    where
        F: Fn() -> FF + Send + Sync + 'static,
        FF: Future<Output = Result<()>> + Send + 'static,
        R: Fn() -> RF + Send + Sync + 'static,
        RF: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            label: label.into(),
            block_id: block_id.into(),
            forward: Box::new(move || Box::pin(forward())),
            reverse: Box::new(move || Box::pin(reverse())),
        }
    }

    /// Text shown in the undo/redo menu.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Block principally affected, for logs.
    pub fn block_id(&self) -> &str {
        &self.block_id
    }

    async fn run_forward(&self) -> Result<()> {
        (self.forward)().await
    }

    async fn run_reverse(&self) -> Result<()> {
        (self.reverse)().await
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("label", &self.label)
            .field("block_id", &self.block_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct History {
    undo: Vec<Command>,
    redo: Vec<Command>,
    limit: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

impl History {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_LIMIT)
    }

    /// Keep at most `limit` undoable commands; the oldest are dropped first.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            limit: limit.max(1),
        }
    }

    /// Run `command` forward and record it.
    ///
    /// A failing forward action leaves both stacks untouched.
    pub async fn execute(&mut self, command: Command) -> Result<()> {
        command.run_forward().await?;

        tracing::debug!(label = command.label(), block_id = command.block_id(), "executed command");
        self.redo.clear();
        self.undo.push(command);
        if self.undo.len() > self.limit {
            let dropped = self.undo.remove(0);
            tracing::debug!(label = dropped.label(), "history limit reached, dropped oldest command");
        }
        Ok(())
    }

    /// Reverse the most recent command; returns its label.
    pub async fn undo(&mut self) -> Result<String> {
        let command = self.undo.pop().ok_or(BlockdeckError::EmptyHistory)?;
        match command.run_reverse().await {
            Ok(()) => {
                let label = command.label().to_string();
                tracing::debug!(label = %label, block_id = command.block_id(), "undid command");
                self.redo.push(command);
                Ok(label)
            }
            Err(e) => Err(desynchronized(command, e, "undo")),
        }
    }

    /// Re-apply the most recently undone command; returns its label.
    pub async fn redo(&mut self) -> Result<String> {
        let command = self.redo.pop().ok_or(BlockdeckError::EmptyHistory)?;
        match command.run_forward().await {
            Ok(()) => {
                let label = command.label().to_string();
                tracing::debug!(label = %label, block_id = command.block_id(), "redid command");
                self.undo.push(command);
                Ok(label)
            }
            Err(e) => Err(desynchronized(command, e, "redo")),
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_label(&self) -> Option<&str> {
        self.undo.last().map(Command::label)
    }

    pub fn redo_label(&self) -> Option<&str> {
        self.redo.last().map(Command::label)
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

// The command is dropped from both stacks: its recorded inverse no longer
// matches the store.
fn desynchronized(command: Command, cause: BlockdeckError, phase: &str) -> BlockdeckError {
    tracing::error!(
        label = command.label(),
        block_id = command.block_id(),
        phase,
        error = %cause,
        "history desynchronized from block store"
    );
    BlockdeckError::Desynchronized {
        label: command.label,
        source: Box::new(cause),
    }
}
