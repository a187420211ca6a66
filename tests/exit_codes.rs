use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicU64, Ordering};

fn hostaudit_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_hostaudit"));
    cmd.env("HOME", home);
    cmd.env_remove("SUDO_UID");
    cmd.env_remove("HOSTAUDIT_CONFIG");
    cmd.env_remove("HOSTAUDIT_LOG");
    cmd.env_remove("HOSTAUDIT_UI_COLOR");
    cmd.env_remove("HOSTAUDIT_UI_MAX_TABLE_ROWS");
    cmd.env_remove("HOSTAUDIT_SCAN_TIMEOUT_SECS");
    cmd.env_remove("HOSTAUDIT_SCAN_PROTOCOLS");
    cmd.env_remove("HOSTAUDIT_SCAN_MIN_SEVERITY");
    cmd
}

fn run(home: &Path, args: &[&str]) -> Output {
    hostaudit_cmd(home).args(args).output().expect("run hostaudit")
}

fn make_temp_home() -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let home =
        std::env::temp_dir().join(format!("hostaudit-exit-test-{}-{seq}", std::process::id()));
    let _ = std::fs::remove_dir_all(&home);
    std::fs::create_dir_all(&home).expect("create home");
    home
}

fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("mkdirs");
    }
    std::fs::write(path, bytes).expect("write");
}

#[test]
fn completion_unknown_shell_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["completion", "nope"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn completion_bash_succeeds() {
    let home = make_temp_home();
    let out = run(&home, &["completion", "bash"]);
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("hostaudit"));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn timeout_out_of_range_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["--timeout", "0", "scan"]);
    assert_eq!(out.status.code(), Some(2));
    let out = run(&home, &["--timeout", "61", "scan"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn unparsable_severity_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["scan", "--fail-on", "severe"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn missing_explicit_config_exits_2() {
    let home = make_temp_home();
    let missing = home.join("nope.toml");
    let out = run(
        &home,
        &["--config", missing.to_string_lossy().as_ref(), "config", "--show"],
    );
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("config file not found"), "stderr={stderr}");
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn malformed_config_exits_2() {
    let home = make_temp_home();
    write_file(
        home.join(".config/hostaudit/config.toml").as_path(),
        b"[scan]\ntimeout_secs = \"soon\"\n",
    );
    let out = run(&home, &["config", "--show"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn invalid_user_glob_exits_2() {
    let home = make_temp_home();
    write_file(
        home.join(".config/hostaudit/config.toml").as_path(),
        br#"
[[classify.executables]]
glob = "[unclosed"
category = "Database"
"#,
    );
    let out = run(&home, &["rules"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn rules_lists_both_tables() {
    let home = make_temp_home();
    let out = run(&home, &["--no-color", "rules"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("classification rules"), "stdout={stdout}");
    assert!(stdout.contains("database-exposed-externally"), "stdout={stdout}");
    let _ = std::fs::remove_dir_all(&home);
}
