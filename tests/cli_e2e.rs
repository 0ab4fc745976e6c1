//! End-to-end CLI tests for the chat-backup binary.

// `Command::cargo_bin` is deprecated in assert_cmd >=2.0.17 in favor of
// `cargo::cargo_bin_cmd!` macro. Suppressed until migration to the new API.
#![allow(deprecated)]

mod support;
use support::socket_guard::start_mock_server_or_skip;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backup_cmd() -> Command {
    let mut cmd = Command::cargo_bin("chat-backup").unwrap();
    cmd.env_remove("CHAT_BACKUP_TOKEN")
        .env_remove("CHAT_BACKUP_BASE_URL")
        .env_remove("RUST_LOG");
    cmd
}

fn valid_detail(id: &str) -> serde_json::Value {
    json!({
        "conversation_id": id,
        "update_time": 50.0,
        "mapping": {
            "root": { "id": "root", "parent": null, "children": [] }
        }
    })
}

async fn mount_listing(server: &MockServer, ids: &[&str]) {
    let items: Vec<_> = ids
        .iter()
        .map(|id| json!({ "id": id, "update_time": 50.0 }))
        .collect();
    Mock::given(method("GET"))
        .and(path("/api/conversations"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": items,
            "total": ids.len(),
        })))
        .mount(server)
        .await;
}

#[test]
fn test_binary_help_lists_modes() {
    backup_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--files-only"))
        .stdout(predicate::str::contains("--retry-failed-files"))
        .stdout(predicate::str::contains("Exit status"));
}

#[test]
fn test_binary_requires_base_url() {
    backup_cmd()
        .args(["--token", "t"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No API base URL configured"));
}

#[test]
fn test_binary_requires_token() {
    backup_cmd()
        .args(["--base-url", "https://api.example/"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CHAT_BACKUP_TOKEN"));
}

#[test]
fn test_binary_rejects_retry_without_file_mode() {
    backup_cmd()
        .args([
            "--base-url",
            "https://api.example/",
            "--token",
            "t",
            "--retry-failed-files",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--retry-failed-files only applies"));
}

#[tokio::test]
async fn test_binary_backup_succeeds_with_env_credentials() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_listing(&server, &["c1"]).await;
    Mock::given(method("GET"))
        .and(path("/api/conversation/c1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(valid_detail("c1")))
        .mount(&server)
        .await;

    let tempdir = TempDir::new().unwrap();
    let output = tempdir.path().join("backup");

    backup_cmd()
        .env("CHAT_BACKUP_BASE_URL", format!("{}/api/", server.uri()))
        .env("CHAT_BACKUP_TOKEN", "secret-token")
        .args(["-q", "--page-delay", "0", "-o"])
        .arg(&output)
        .assert()
        .code(0);

    assert!(output.join("conversations").join("c1.json").exists());
    assert!(output.join("metadata.json").exists());
}

#[tokio::test]
async fn test_binary_exit_code_partial_success_is_one() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_listing(&server, &["ok", "missing"]).await;
    Mock::given(method("GET"))
        .and(path("/api/conversation/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(valid_detail("ok")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/conversation/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let tempdir = TempDir::new().unwrap();

    backup_cmd()
        .args(["--base-url", &format!("{}/api/", server.uri())])
        .args(["--token", "secret-token", "--page-delay", "0", "-r", "0", "-o"])
        .arg(tempdir.path())
        .assert()
        .code(1);
}

#[tokio::test]
async fn test_binary_rejected_token_explains_fix() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/api/conversations"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let tempdir = TempDir::new().unwrap();

    backup_cmd()
        .args(["--base-url", &format!("{}/api/", server.uri())])
        .args(["--token", "stale", "--page-delay", "0", "-o"])
        .arg(tempdir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("access token was rejected"));
}
