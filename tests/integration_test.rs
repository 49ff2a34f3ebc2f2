use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

fn blockdeck_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_blockdeck"))
}

fn run(dir: &Path, args: &[&str]) -> Output {
    blockdeck_cmd()
        .current_dir(dir)
        .env("RUST_LOG", "warn")
        .args(args)
        .output()
        .unwrap()
}

fn run_ok(dir: &Path, args: &[&str]) -> String {
    let output = run(dir, args);
    assert!(
        output.status.success(),
        "blockdeck {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn run_shell(dir: &Path, script: &str) -> String {
    let mut child = blockdeck_cmd()
        .current_dir(dir)
        .env("RUST_LOG", "warn")
        .arg("shell")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(script.as_bytes())
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn created_id(stdout: &str) -> String {
    let value: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    value["id"].as_str().unwrap().to_string()
}

fn init(dir: &Path) {
    run_ok(dir, &["init"]);
}

#[test]
fn test_init_writes_config_and_database() {
    let tmp = TempDir::new().unwrap();

    let stdout = run_ok(tmp.path(), &["init"]);
    assert!(stdout.contains("Initialized blockdeck"));
    assert!(tmp.path().join("config.json").exists());
    assert!(tmp.path().join("blockdeck.db").exists());

    let raw = std::fs::read_to_string(tmp.path().join("config.json")).unwrap();
    let config: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(config["dbtype"], "sqlite3");
    assert_eq!(config["enableLocalMode"], false);
}

#[test]
fn test_init_twice_fails() {
    let tmp = TempDir::new().unwrap();
    init(tmp.path());

    let output = run(tmp.path(), &["init"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Already initialized"));

    run_ok(tmp.path(), &["init", "--force"]);
}

#[test]
fn test_command_without_init_fails() {
    let tmp = TempDir::new().unwrap();

    let output = run(tmp.path(), &["templates"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Run 'blockdeck init' first"));
}

#[test]
fn test_template_to_board_workflow() {
    let tmp = TempDir::new().unwrap();
    init(tmp.path());

    let stdout = run_ok(tmp.path(), &["templates"]);
    assert!(stdout.contains("No templates found."));

    let template_id = created_id(&run_ok(tmp.path(), &["add-template", "--json"]));
    run_ok(tmp.path(), &["rename", &template_id, "Sprint"]);

    let stdout = run_ok(tmp.path(), &["templates"]);
    assert!(stdout.contains(&format!("* {} [global] Sprint", template_id)));

    let board_id = created_id(&run_ok(
        tmp.path(),
        &["add-board", "--from", &template_id, "--global", "--json"],
    ));
    let boards: serde_json::Value =
        serde_json::from_str(&run_ok(tmp.path(), &["boards", "--json"])).unwrap();
    let boards = boards.as_array().unwrap();
    assert_eq!(boards.len(), 1);
    assert_eq!(boards[0]["id"], board_id.as_str());
    assert_eq!(boards[0]["title"], "Sprint");
    assert_eq!(boards[0]["type"], "board");

    // The template is global, so it is only found with --global.
    let output = run(tmp.path(), &["add-board", "--from", &template_id]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Block not found"));

    let stdout = run_ok(tmp.path(), &["delete", &board_id]);
    assert!(stdout.contains(&format!("Deleted board {}", board_id)));
    let stdout = run_ok(tmp.path(), &["boards"]);
    assert!(stdout.contains("No boards found."));
}

#[test]
fn test_delete_unknown_block_fails() {
    let tmp = TempDir::new().unwrap();
    init(tmp.path());

    let output = run(tmp.path(), &["delete", "bmissing"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Block not found: bmissing"));
}

#[test]
fn test_workspaces_are_isolated() {
    let tmp = TempDir::new().unwrap();
    init(tmp.path());

    run_ok(tmp.path(), &["--workspace", "alpha", "add-board"]);
    let global_template = created_id(&run_ok(tmp.path(), &["add-template", "--json"]));

    let stdout = run_ok(tmp.path(), &["--workspace", "alpha", "boards", "--json"]);
    let alpha: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(alpha.as_array().unwrap().len(), 1);

    let stdout = run_ok(tmp.path(), &["--workspace", "beta", "boards"]);
    assert!(stdout.contains("No boards found."));

    // Global templates are visible everywhere.
    let stdout = run_ok(tmp.path(), &["--workspace", "beta", "templates"]);
    assert!(stdout.contains(&global_template));
}

#[test]
fn test_loro_backend_persists() {
    let tmp = TempDir::new().unwrap();
    run_ok(tmp.path(), &["init", "--dbtype", "loro"]);
    assert!(tmp.path().join("blockdeck.loro").exists());

    let board_id = created_id(&run_ok(tmp.path(), &["add-board", "--json"]));
    let stdout = run_ok(tmp.path(), &["boards"]);
    assert!(stdout.contains(&board_id));
}

#[test]
fn test_shell_undo_redo_session() {
    let tmp = TempDir::new().unwrap();
    init(tmp.path());

    let stdout = run_shell(
        tmp.path(),
        "add-template\nhistory\nundo\ntemplates\nredo\nundo\nundo\nquit\n",
    );
    assert!(stdout.contains("Created template t"));
    assert!(stdout.contains("undo: 1 (Add board template)  redo: 0 (-)"));
    assert!(stdout.contains("undone: Add board template"));
    assert!(stdout.contains("No templates found."));
    assert!(stdout.contains("redone: Add board template"));
    assert!(stdout.contains("Error: Nothing to undo or redo"));

    // Each shell session starts with an empty history; the store survives.
    let stdout = run_ok(tmp.path(), &["templates"]);
    assert!(stdout.contains("No templates found."));
}

#[test]
fn test_shell_selection_follows_deletes() {
    let tmp = TempDir::new().unwrap();
    init(tmp.path());
    let first = created_id(&run_ok(tmp.path(), &["add-template", "--json"]));
    let second = created_id(&run_ok(tmp.path(), &["add-template", "--json"]));

    let script = format!(
        "select {second}\nactive\ndelete {second}\nactive\nuse-template\ncurrent\ndelete {first}\nactive\n",
        first = first,
        second = second
    );
    let stdout = run_shell(tmp.path(), &script);
    let lines: Vec<&str> = stdout.lines().collect();

    assert!(lines.contains(&format!("active: {}", second).as_str()));
    assert!(lines.contains(&format!("active: {}", first).as_str()));
    assert!(lines.contains(&"active: (none)"));
    assert!(stdout.contains("Created board b"));
    assert!(stdout.contains("current: b"));
}

#[test]
fn test_serve_admin_requires_local_mode() {
    let tmp = TempDir::new().unwrap();
    init(tmp.path());

    let output = run(tmp.path(), &["serve-admin"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("local mode is disabled"));
}
