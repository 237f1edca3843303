// CLI integration tests for discovery, settings and entry point flows.
use std::path::Path;
use std::process::{Command, Output};

use serde_json::{Value, json};

fn cmd(cwd: &Path) -> Command {
    let exe = env!("CARGO_BIN_EXE_spellbook");
    let mut command = Command::new(exe);
    command.current_dir(cwd).env("RUST_LOG", "warn");
    command
}

fn parse_json(value: &str) -> Value {
    serde_json::from_str(value).expect("valid json")
}

fn stdout_json(output: &Output) -> Value {
    parse_json(std::str::from_utf8(&output.stdout).expect("utf8").trim())
}

fn stderr_error(output: &Output) -> Value {
    let text = String::from_utf8_lossy(&output.stderr);
    let line = text
        .lines()
        .rev()
        .find(|line| line.starts_with("{\"error\""))
        .expect("error json line");
    parse_json(line)
}

fn write_manifest(dir: &Path, file: &str, body: Value) {
    std::fs::write(dir.join(file), body.to_string()).expect("write manifest");
}

fn app_spells(root: &Path) -> std::path::PathBuf {
    let spells = root.join("spells");
    std::fs::create_dir_all(&spells).expect("spells dir");
    write_manifest(
        &spells,
        "a_storage.json",
        json!({"spells": [{"name": "storage", "info": "session storage"}]}),
    );
    write_manifest(
        &spells,
        "b_sessions.json",
        json!({"spells": [{
            "name": "sessions",
            "deps": ["storage"],
            "capabilities": ["request"],
            "options": [
                {"key": "sessions.expiration_interval", "type": "int", "comment": "seconds"},
                {"key": "!tornado.port", "type": "int", "default": 8080}
            ]
        }]}),
    );
    spells
}

#[test]
fn check_reports_spells_in_dependency_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    let spells = app_spells(temp.path());
    std::fs::write(
        temp.path().join("settings.json"),
        r#"{"sessions": {"expiration_interval": 60}, "legacy": {"unused": 1}}"#,
    )
    .expect("settings");

    let output = cmd(temp.path())
        .args(["--spells-dir", &format!("{}=app", spells.display()), "check"])
        .output()
        .expect("check");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let report = stdout_json(&output);
    assert_eq!(
        report["spells"],
        json!(["spellbook_core", "spellbook_settings_sync", "storage", "sessions"])
    );
    assert_eq!(report["settings"], json!(6));
    let entry_points = report["entry_points"].as_array().expect("entry points");
    assert!(entry_points.contains(&json!("settings.sync_now")));
    assert!(entry_points.contains(&json!("spells.list")));
}

#[test]
fn settings_prints_loaded_tree_and_descriptors() {
    let temp = tempfile::tempdir().expect("tempdir");
    let spells = app_spells(temp.path());
    let config = temp.path().join("app.json");
    std::fs::write(&config, r#"{"sessions": {"expiration_interval": 90}}"#).expect("settings");
    let spells_arg = spells.display().to_string();
    let config_arg = config.display().to_string();

    let output = cmd(temp.path())
        .args(["--spells-dir", &spells_arg, "--config", &config_arg, "settings"])
        .output()
        .expect("settings");
    assert!(output.status.success());
    let tree = stdout_json(&output);
    assert_eq!(tree["sessions"]["expiration_interval"], json!(90));
    assert_eq!(tree["tornado"]["port"], json!(8080));
    assert_eq!(tree["core"]["debug"], json!(false));
    assert!(tree.get("legacy").is_none());

    let output = cmd(temp.path())
        .args([
            "--spells-dir",
            &spells_arg,
            "--config",
            &config_arg,
            "settings",
            "--descriptors",
        ])
        .output()
        .expect("descriptors");
    assert!(output.status.success());
    let descriptors = stdout_json(&output)["descriptors"]
        .as_array()
        .cloned()
        .expect("descriptors");
    let port = descriptors
        .iter()
        .find(|row| row["key"] == "tornado.port")
        .expect("port descriptor");
    assert_eq!(port["read_only"], json!(true));
    assert_eq!(port["type"], json!("int"));
}

#[test]
fn type_mismatch_fails_with_key_and_types() {
    let temp = tempfile::tempdir().expect("tempdir");
    let spells = app_spells(temp.path());
    std::fs::write(
        temp.path().join("settings.json"),
        r#"{"sessions": {"expiration_interval": "abc"}}"#,
    )
    .expect("settings");

    let output = cmd(temp.path())
        .args(["--spells-dir", &spells.display().to_string(), "check"])
        .output()
        .expect("check");
    assert_eq!(output.status.code(), Some(6));
    let err = stderr_error(&output);
    assert_eq!(err["error"]["kind"], "SettingType");
    assert_eq!(err["error"]["key"], "sessions.expiration_interval");
    assert_eq!(err["error"]["expected"], "int");
    assert_eq!(err["error"]["actual"], "string");
}

#[test]
fn cycles_fail_discovery_with_path() {
    let temp = tempfile::tempdir().expect("tempdir");
    let spells = temp.path().join("spells");
    std::fs::create_dir_all(&spells).expect("dir");
    write_manifest(
        &spells,
        "loop.json",
        json!({"spells": [
            {"name": "a", "deps": ["b"]},
            {"name": "b", "deps": ["a"]}
        ]}),
    );

    let output = cmd(temp.path())
        .args(["--spells-dir", &spells.display().to_string(), "check"])
        .output()
        .expect("check");
    assert_eq!(output.status.code(), Some(5));
    let err = stderr_error(&output);
    assert_eq!(err["error"]["kind"], "CircularDependency");
    assert_eq!(err["error"]["cycle"], json!(["a", "b", "a"]));
}

#[test]
fn run_invokes_entry_points_with_json_args() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(temp.path().join("settings.json"), r#"{"core": {"debug": true}}"#)
        .expect("settings");

    let output = cmd(temp.path())
        .args(["run", "settings.get", "--arg", "\"core.debug\""])
        .output()
        .expect("run");
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["result"], json!(true));

    let output = cmd(temp.path())
        .args(["run", "settings.get", "--kwarg", "key=\"sync.update_interval\""])
        .output()
        .expect("run kwarg");
    assert_eq!(stdout_json(&output)["result"], json!(30));

    let output = cmd(temp.path())
        .args(["run", "does.not_exist"])
        .output()
        .expect("unknown");
    assert_eq!(output.status.code(), Some(7));
    assert_eq!(stderr_error(&output)["error"]["kind"], "UnknownEntryPoint");

    let output = cmd(temp.path())
        .args(["run", "settings.get", "--arg", "not json"])
        .output()
        .expect("bad arg");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn publish_then_sync_now_picks_up_the_value() {
    let temp = tempfile::tempdir().expect("tempdir");
    let live = temp.path().join("live.json");
    let backend = format!("file+{}", live.display());
    std::fs::write(
        temp.path().join("settings.json"),
        json!({"sync": {"backend_uri": backend}}).to_string(),
    )
    .expect("settings");

    let output = cmd(temp.path())
        .args(["publish", "core.debug", "true", "--backend", &backend])
        .output()
        .expect("publish");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stored = parse_json(&std::fs::read_to_string(&live).expect("live file"));
    assert_eq!(stored["core"]["debug"], json!(true));

    let output = cmd(temp.path())
        .args(["run", "settings.sync_now"])
        .output()
        .expect("sync now");
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["result"]["updated"], json!(["core.debug"]));

    let output = cmd(temp.path())
        .args(["publish", "!core.debug", "true", "--backend", &backend])
        .output()
        .expect("publish read-only");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn publish_refuses_process_local_backends() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = cmd(temp.path())
        .args(["publish", "core.debug", "true", "--backend", "memory+shared"])
        .output()
        .expect("publish");
    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
    let err = stderr_error(&output);
    assert_eq!(err["error"]["kind"], "Usage");
    assert_eq!(err["error"]["key"], "core.debug");
}

#[test]
fn forbidding_a_dependency_is_fatal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = cmd(temp.path())
        .args(["--forbid", "spellbook_core", "check"])
        .output()
        .expect("check");
    assert_eq!(output.status.code(), Some(5));
    let err = stderr_error(&output);
    assert_eq!(err["error"]["kind"], "MissingDependency");
    assert_eq!(err["error"]["spell"], "spellbook_settings_sync");
}

#[test]
fn missing_explicit_config_is_io_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = cmd(temp.path())
        .args(["--config", "absent.json", "check"])
        .output()
        .expect("check");
    assert_eq!(output.status.code(), Some(3));
    assert_eq!(stderr_error(&output)["error"]["kind"], "Io");
}

#[test]
fn version_and_usage_errors() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = cmd(temp.path()).arg("version").output().expect("version");
    assert!(output.status.success());
    let version = stdout_json(&output);
    assert_eq!(version["name"], "spellbook");
    assert!(
        version["version"]
            .as_str()
            .expect("version")
            .starts_with(env!("CARGO_PKG_VERSION"))
    );

    let output = cmd(temp.path()).arg("conjure").output().expect("usage");
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(stderr_error(&output)["error"]["kind"], "Usage");
}
