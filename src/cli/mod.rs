mod commands;
mod handlers;

pub use commands::{Cli, Commands};
pub use handlers::{
    handle_add_board, handle_add_template, handle_boards, handle_delete, handle_init,
    handle_rename, handle_save_template, handle_serve_admin, handle_shell, handle_templates,
    Session,
};
