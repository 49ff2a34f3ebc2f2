use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{DbType, DEFAULT_CONFIG_FILE};

#[derive(Parser, Debug)]
#[command(name = "blockdeck")]
#[command(version, about = "Boards, templates and undoable block mutations")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the JSON config file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Workspace to operate in (overrides the config file)
    #[arg(long, global = true)]
    pub workspace: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default config file and create the database
    Init {
        /// Storage engine (sqlite3, loro)
        #[arg(long, default_value = "sqlite3")]
        dbtype: DbType,

        /// Database file
        #[arg(long)]
        dbconfig: Option<String>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// List templates, global ones first
    Templates,

    /// List boards in the workspace
    Boards,

    /// Create an empty template
    AddTemplate,

    /// Create a board, empty or from a template
    AddBoard {
        /// Template to clone
        #[arg(long = "from", value_name = "TEMPLATE_ID")]
        from: Option<String>,

        /// The template lives in the global scope
        #[arg(long, requires = "from")]
        global: bool,
    },

    /// Save a board as a new template
    SaveTemplate {
        /// Board to copy
        board_id: String,
    },

    /// Rename a block
    Rename {
        id: String,
        title: String,
    },

    /// Delete a block (boards and templates take their cards and views along)
    Delete {
        id: String,
    },

    /// Read commands from stdin, one per line, with undo/redo
    Shell,

    /// Serve the admin local control channel until interrupted
    ServeAdmin {
        /// Socket path (overrides localModeSocketLocation)
        #[arg(long)]
        socket: Option<PathBuf>,
    },
}
