use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn cidx() -> Command {
    Command::cargo_bin("cidx").expect("cidx binary builds")
}

#[test]
fn init_creates_config() {
    let tmp = TempDir::new().unwrap();
    cidx()
        .arg("--path")
        .arg(tmp.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized"));
    assert!(tmp.path().join(".code-indexer/config.json").exists());
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let tmp = TempDir::new().unwrap();
    cidx().arg("--path").arg(tmp.path()).arg("init").assert().success();
    cidx()
        .arg("--path")
        .arg(tmp.path())
        .arg("init")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--force"));
    cidx()
        .arg("--path")
        .arg(tmp.path())
        .args(["init", "--force"])
        .assert()
        .success();
}

#[test]
fn fix_config_repairs_broken_values() {
    let tmp = TempDir::new().unwrap();
    let meta = tmp.path().join(".code-indexer");
    std::fs::create_dir_all(&meta).unwrap();
    std::fs::write(
        meta.join("config.json"),
        r#"{"chunk_size_chars": 0, "workers": 0}"#,
    )
    .unwrap();

    cidx()
        .arg("--path")
        .arg(tmp.path())
        .arg("fix-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("fixed:"));

    let raw = std::fs::read_to_string(meta.join("config.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed["chunk_size_chars"], serde_json::json!(1000));
}

#[test]
fn unsupported_proxy_command_exits_with_code_three() {
    let tmp = TempDir::new().unwrap();
    let meta = tmp.path().join(".code-indexer");
    std::fs::create_dir_all(&meta).unwrap();
    std::fs::write(
        meta.join("config.json"),
        r#"{"proxy": {"proxy_mode": true, "children": ["repos/a"]}}"#,
    )
    .unwrap();

    cidx()
        .arg("--path")
        .arg(tmp.path())
        .arg("index")
        .assert()
        .code(3)
        .stderr(
            predicate::str::contains("not supported in proxy mode")
                .and(predicate::str::contains("query, status, start, stop")),
        );
}

#[test]
fn proxy_without_children_fails_cleanly() {
    let tmp = TempDir::new().unwrap();
    let meta = tmp.path().join(".code-indexer");
    std::fs::create_dir_all(&meta).unwrap();
    // Config normalization would disable childless proxy mode; write the
    // raw state a user could produce by hand.
    std::fs::write(
        meta.join("config.json"),
        r#"{"proxy": {"proxy_mode": true, "children": []}}"#,
    )
    .unwrap();

    cidx()
        .arg("--path")
        .arg(tmp.path())
        .arg("status")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no child repositories"));
}

#[test]
fn uninstall_force_removes_metadata() {
    let tmp = TempDir::new().unwrap();
    cidx().arg("--path").arg(tmp.path()).arg("init").assert().success();
    assert!(tmp.path().join(".code-indexer").exists());

    cidx()
        .arg("--path")
        .arg(tmp.path())
        .args(["uninstall", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed"));
    assert!(!tmp.path().join(".code-indexer").exists());
}

#[test]
fn uninstall_on_clean_project_is_a_noop() {
    let tmp = TempDir::new().unwrap();
    cidx()
        .arg("--path")
        .arg(tmp.path())
        .args(["uninstall", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to uninstall"));
}
