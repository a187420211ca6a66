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

fn show_config(cmd: &mut Command) -> serde_json::Value {
    let out: Output = cmd
        .args(["--json", "config", "--show"])
        .output()
        .expect("run hostaudit");
    assert!(
        out.status.success(),
        "stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).expect("parse json")
}

fn make_temp_home() -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);

    let temp = std::env::temp_dir();
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let uniq = format!("hostaudit-config-test-{}-{seq}", std::process::id());
    let home = temp.join(uniq);
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
fn defaults_apply_without_a_config_file() {
    let home = make_temp_home();
    let v = show_config(&mut hostaudit_cmd(&home));

    assert_eq!(v["ui"]["max_table_rows"], 50);
    assert_eq!(v["scan"]["timeout_secs"], 5);
    assert_eq!(v["scan"]["protocols"], serde_json::json!(["TCP", "UDP"]));
    assert_eq!(v["scan"]["min_severity"], "Info");
    assert!(v.get("config_path").is_none());

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn config_file_overrides_defaults() {
    let home = make_temp_home();
    write_file(
        home.join(".config/hostaudit/config.toml").as_path(),
        br#"
[scan]
timeout_secs = 9
protocols = ["tcp"]
min_severity = "high"

[[classify.ports]]
port = 9000
category = "WebServer"
service = "MyApp"
"#,
    );

    let v = show_config(&mut hostaudit_cmd(&home));
    assert_eq!(v["scan"]["timeout_secs"], 9);
    assert_eq!(v["scan"]["protocols"], serde_json::json!(["TCP"]));
    assert_eq!(v["scan"]["min_severity"], "High");
    assert_eq!(v["classify"]["ports"][0]["service"], "MyApp");
    assert!(
        v["config_path"]
            .as_str()
            .is_some_and(|p| p.ends_with("config.toml"))
    );

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn env_overrides_config_file() {
    let home = make_temp_home();
    write_file(
        home.join(".config/hostaudit/config.toml").as_path(),
        br#"
[ui]
max_table_rows = 5

[scan]
timeout_secs = 9
"#,
    );

    let mut cmd = hostaudit_cmd(&home);
    cmd.env("HOSTAUDIT_UI_MAX_TABLE_ROWS", "7");
    cmd.env("HOSTAUDIT_SCAN_TIMEOUT_SECS", "3");
    cmd.env("HOSTAUDIT_SCAN_PROTOCOLS", "udp");
    let v = show_config(&mut cmd);

    assert_eq!(v["ui"]["max_table_rows"], 7);
    assert_eq!(v["scan"]["timeout_secs"], 3);
    assert_eq!(v["scan"]["protocols"], serde_json::json!(["UDP"]));

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn timeout_flag_overrides_env() {
    let home = make_temp_home();
    let mut cmd = hostaudit_cmd(&home);
    cmd.env("HOSTAUDIT_SCAN_TIMEOUT_SECS", "3");
    cmd.args(["--timeout", "12"]);
    let v = show_config(&mut cmd);
    assert_eq!(v["scan"]["timeout_secs"], 12);

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn config_env_var_selects_the_file() {
    let home = make_temp_home();
    let path = home.join("elsewhere.toml");
    write_file(path.as_path(), b"[ui]\ncolor = false\n");

    let mut cmd = hostaudit_cmd(&home);
    cmd.env("HOSTAUDIT_CONFIG", &path);
    let v = show_config(&mut cmd);
    assert_eq!(v["ui"]["color"], false);

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn invalid_env_value_is_rejected() {
    let home = make_temp_home();
    let out = hostaudit_cmd(&home)
        .env("HOSTAUDIT_UI_COLOR", "maybe")
        .args(["config", "--show"])
        .output()
        .expect("run hostaudit");
    assert_eq!(out.status.code(), Some(2));

    let _ = std::fs::remove_dir_all(&home);
}
