// Multi-process lock smoke test for file backend writes.
use std::process::{Command, Stdio};

use serde_json::Value;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_spellbook");
    Command::new(exe)
}

#[test]
fn concurrent_publish_is_serialized() {
    let temp = tempfile::tempdir().expect("tempdir");
    let live = temp.path().join("live.json");
    let backend = format!("file+{}", live.display());

    let workers = 8;
    let mut children = Vec::new();
    for i in 0..workers {
        let child = cmd()
            .current_dir(temp.path())
            .args([
                "publish",
                &format!("load.worker_{i}"),
                &i.to_string(),
                "--backend",
                &backend,
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn");
        children.push(child);
    }

    for mut child in children {
        let status = child.wait().expect("wait");
        assert!(status.success());
    }

    let text = std::fs::read_to_string(&live).expect("live file");
    let document: Value = serde_json::from_str(&text).expect("json");
    let group = document["load"].as_object().expect("load group");
    assert_eq!(group.len(), workers);
    for i in 0..workers {
        assert_eq!(group[&format!("worker_{i}")], Value::from(i));
    }
}
