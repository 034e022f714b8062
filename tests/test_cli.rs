extern crate assert_cmd;
extern crate predicates;

use assert_cmd::prelude::*;
use predicates::prelude::*;

use std::fs;
use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

/// Two local endpoints plus a config file wiring them together.
struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        for sub in ["source", "target", "logs"] {
            fs::create_dir_all(dir.path().join(sub)).unwrap();
        }

        let config = format!(
            r#"
[log]
level = "debug"
dir = "{logs}"

[sync]
source = "src"
target = "dst"
source_root = "/data"
target_root = "/data"
large_file_threshold = 16

[connections.src]
kind = "local"
root = "{source}"

[connections.dst]
kind = "local"
root = "{target}"
"#,
            logs = dir.path().join("logs").display(),
            source = dir.path().join("source").display(),
            target = dir.path().join("target").display(),
        );
        fs::write(dir.path().join("config.toml"), config).unwrap();

        Self { dir }
    }

    fn source(&self) -> std::path::PathBuf {
        self.dir.path().join("source")
    }

    fn target(&self) -> std::path::PathBuf {
        self.dir.path().join("target")
    }

    fn write(root: &Path, rel: &str, data: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("rust-sftpsync").expect("Calling binary failed");
        cmd.arg("--config").arg(self.dir.path().join("config.toml"));
        cmd
    }
}

#[test]
fn test_cli() {
    let mut cmd = Command::cargo_bin("rust-sftpsync").expect("Calling binary failed");
    cmd.assert().failure();
}

#[test]
fn test_version() {
    let expected_version = "rust-sftpsync 0.3.0\n";
    let mut cmd = Command::cargo_bin("rust-sftpsync").expect("Calling binary failed");
    cmd.arg("--version").assert().stdout(expected_version);
}

#[test]
fn test_missing_config_file() {
    let mut cmd = Command::cargo_bin("rust-sftpsync").expect("Calling binary failed");
    cmd.args(["--config", "/nonexistent/sftpsync.toml", "scan", "src"])
        .assert()
        .failure();
}

#[test]
fn test_sync_copies_new_files() {
    let fixture = Fixture::new();
    Fixture::write(&fixture.source(), "data/a.txt", b"alpha");
    Fixture::write(&fixture.source(), "data/nested/big.bin", &[9u8; 64]);
    Fixture::write(&fixture.target(), "data/only_on_target.txt", b"keep");

    fixture
        .cmd()
        .arg("sync")
        .assert()
        .success()
        .stdout(predicate::str::contains("Sync completed: 2 synced, 0 failed"));

    assert_eq!(fs::read(fixture.target().join("data/a.txt")).unwrap(), b"alpha");
    assert_eq!(
        fs::read(fixture.target().join("data/nested/big.bin")).unwrap(),
        vec![9u8; 64]
    );
    assert!(fixture.target().join("data/only_on_target.txt").exists());

    // 第二次运行没有新文件
    fixture
        .cmd()
        .args(["sync", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"diff\": []"));
}

#[test]
fn test_diff_json_groups() {
    let fixture = Fixture::new();
    Fixture::write(&fixture.source(), "data/small.txt", b"tiny");
    Fixture::write(&fixture.source(), "data/large.bin", &[1u8; 17]);

    let output = fixture.cmd().args(["diff", "--json"]).output().unwrap();
    assert!(output.status.success());

    let plan: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(plan["source_files"], 2);
    assert_eq!(plan["large_files"], serde_json::json!(["/data/large.bin"]));
    assert_eq!(plan["small_files"], serde_json::json!(["/data/small.txt"]));
    assert!(!fixture.target().join("data/small.txt").exists());
}

#[test]
fn test_scan_lists_files() {
    let fixture = Fixture::new();
    Fixture::write(&fixture.source(), "data/b.txt", b"b");
    Fixture::write(&fixture.source(), "data/sub/c.txt", b"c");

    fixture
        .cmd()
        .args(["scan", "src", "/data"])
        .assert()
        .success()
        .stdout("/data/b.txt\n/data/sub/c.txt\n");
}

#[test]
fn test_unknown_connection_fails() {
    let fixture = Fixture::new();
    fixture
        .cmd()
        .args(["sync", "--source", "nope"])
        .assert()
        .failure();
}

#[test]
fn test_sync_failure_sets_exit_status() {
    let fixture = Fixture::new();
    Fixture::write(&fixture.source(), "data/ok.txt", b"ok");
    Fixture::write(&fixture.source(), "data/clash", b"file on source");
    // a directory on the target is in the way of the source file
    Fixture::write(&fixture.target(), "data/clash/inner.txt", b"dir on target");

    fixture
        .cmd()
        .arg("sync")
        .assert()
        .failure()
        .stdout(predicate::str::contains("failed /data/clash"))
        .stdout(predicate::str::contains("Sync completed: 1 synced, 1 failed"));

    assert_eq!(fs::read(fixture.target().join("data/ok.txt")).unwrap(), b"ok");
    assert_eq!(
        fs::read(fixture.target().join("data/clash/inner.txt")).unwrap(),
        b"dir on target"
    );
}
