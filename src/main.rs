use clap::Parser;
use blockdeck::cli::{
    handle_add_board, handle_add_template, handle_boards, handle_delete, handle_init,
    handle_rename, handle_save_template, handle_serve_admin, handle_shell, handle_templates, Cli,
    Commands, Session,
};
use blockdeck::logging::init_logging;
use blockdeck::{BlockdeckError, Result};

fn main() {
    let cli = Cli::parse();
    init_logging("info");

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(BlockdeckError::from)
        .and_then(|runtime| runtime.block_on(run(cli)));

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let Cli {
        config,
        workspace,
        json,
        command,
    } = cli;

    let open = || Session::open(&config, workspace.clone());

    match command {
        Commands::Init {
            dbtype,
            dbconfig,
            force,
        } => handle_init(&config, dbtype, dbconfig, force),
        Commands::Templates => handle_templates(&open().await?, json),
        Commands::Boards => handle_boards(&open().await?, json),
        Commands::AddTemplate => handle_add_template(&open().await?, json).await,
        Commands::AddBoard { from, global } => {
            handle_add_board(&open().await?, from, global, json).await
        }
        Commands::SaveTemplate { board_id } => {
            handle_save_template(&open().await?, &board_id, json).await
        }
        Commands::Rename { id, title } => handle_rename(&open().await?, &id, title, json).await,
        Commands::Delete { id } => handle_delete(&open().await?, &id, json).await,
        Commands::Shell => handle_shell(open().await?, json).await,
        Commands::ServeAdmin { socket } => {
            handle_serve_admin(&config, workspace.clone(), socket).await
        }
    }
}
