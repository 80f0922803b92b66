//! CLI integration tests for benchlog admin commands.
//!
//! Each test uses an isolated temp directory for the database, ensuring tests
//! can run in parallel safely.

#![allow(deprecated)] // Command::cargo_bin deprecation only affects custom build dirs

use std::path::Path;

use assert_cmd::Command;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use benchlog::store::{SqliteStore, Store};
use predicates::prelude::*;

struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    fn data_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    fn data_dir_str(&self) -> String {
        self.data_dir().to_string_lossy().to_string()
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("benchlog").expect("failed to find binary");
        cmd.env("NO_COLOR", "1");
        cmd
    }

    fn init(&self) -> assert_cmd::assert::Assert {
        self.cmd()
            .args([
                "admin",
                "init",
                "--data-dir",
                &self.data_dir_str(),
                "--non-interactive",
            ])
            .assert()
    }
}

#[test]
fn test_help() {
    let ctx = TestContext::new();
    ctx.cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("research experiment tracker"))
        .stdout(predicate::str::contains("serve"));
}

#[test]
fn test_init_creates_database_and_admin_token() {
    let ctx = TestContext::new();

    ctx.init()
        .success()
        .stdout(predicate::str::contains("Admin token"));

    ctx.temp_dir
        .child("benchlog.db")
        .assert(predicate::path::exists());

    let token_file = ctx.temp_dir.child(".admin_token");
    let token = std::fs::read_to_string(token_file.path()).expect("read token");
    assert!(token.starts_with("benchlog_"));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(token_file.path())
            .expect("token metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    let store = SqliteStore::new(ctx.data_dir().join("benchlog.db")).expect("open store");
    assert!(store.has_admin_token().expect("query admin token"));
}

#[test]
fn test_init_twice_fails() {
    let ctx = TestContext::new();
    ctx.init().success();

    let first = std::fs::read_to_string(ctx.data_dir().join(".admin_token")).expect("read token");

    ctx.init()
        .failure()
        .stderr(predicate::str::contains("already initialized"));

    let second = std::fs::read_to_string(ctx.data_dir().join(".admin_token")).expect("read token");
    assert_eq!(first, second);
}

#[test]
fn test_serve_requires_init() {
    let ctx = TestContext::new();

    ctx.cmd()
        .args(["serve", "--data-dir", &ctx.data_dir_str(), "--port", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

#[test]
fn test_serve_reads_config_file() {
    let ctx = TestContext::new();
    let config = ctx.temp_dir.child("benchlog.toml");
    config
        .write_str(&format!(
            "data_dir = {:?}\nport = 0\n",
            ctx.data_dir().join("elsewhere")
        ))
        .expect("write config");

    // The data dir named in the file is used, and it was never initialized.
    ctx.cmd()
        .args(["serve", "--config"])
        .arg(config.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

#[test]
fn test_serve_rejects_malformed_config() {
    let ctx = TestContext::new();
    let config = ctx.temp_dir.child("benchlog.toml");
    config.write_str("port = \"eighty\"\n").expect("write config");

    ctx.cmd()
        .args(["serve", "--config"])
        .arg(config.path())
        .assert()
        .failure();
}
