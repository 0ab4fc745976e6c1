//! Integration tests for conversation backup runs against a mock API.

mod support;
use support::socket_guard::start_mock_server_or_skip;

use std::path::Path;

use chat_backup_core::backup::{BackupEngine, BackupError, BackupOptions, Collection};
use chat_backup_core::{ApiClient, ConversationStore, DownloadEngine, RetryPolicy};
use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn summary(id: &str, update_time: f64) -> Value {
    json!({ "id": id, "title": format!("Chat {id}"), "update_time": update_time })
}

fn detail(id: &str, update_time: f64) -> Value {
    json!({
        "conversation_id": id,
        "title": format!("Chat {id}"),
        "create_time": 1_700_000_000.0,
        "update_time": update_time,
        "current_node": "a",
        "mapping": {
            "root": { "id": "root", "parent": null, "children": ["a"] },
            "a": {
                "id": "a",
                "parent": "root",
                "children": [],
                "message": {
                    "author": { "role": "user" },
                    "content": { "content_type": "text", "parts": ["hello"] }
                }
            }
        }
    })
}

fn broken_detail(id: &str) -> Value {
    json!({
        "conversation_id": id,
        "mapping": {
            "a": { "id": "a", "parent": "gone", "children": [] }
        }
    })
}

async fn mount_listing(server: &MockServer, items: Vec<Value>) {
    let total = items.len();
    Mock::given(method("GET"))
        .and(path("/api/conversations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": items,
            "total": total,
        })))
        .mount(server)
        .await;
}

async fn mount_detail(server: &MockServer, id: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/api/conversation/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn engine_for(server: &MockServer, output: &Path, options: BackupOptions) -> BackupEngine {
    engine_with_concurrency(server, output, options, 4)
}

fn engine_with_concurrency(
    server: &MockServer,
    output: &Path,
    options: BackupOptions,
    concurrency: usize,
) -> BackupEngine {
    let client = ApiClient::new(
        &format!("{}/api/", server.uri()),
        Some("test-token".to_string()),
        RetryPolicy::with_max_retries(0),
    )
    .unwrap();
    let engine = DownloadEngine::new(concurrency, std::time::Duration::ZERO).unwrap();
    BackupEngine::new(client, ConversationStore::new(output), engine, options)
}

fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_backup_stores_every_listed_conversation() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_listing(&server, vec![summary("c1", 100.0), summary("c2", 200.0)]).await;
    mount_detail(&server, "c1", detail("c1", 100.0)).await;
    mount_detail(&server, "c2", detail("c2", 200.0)).await;

    let temp = TempDir::new().unwrap();
    let backup = engine_for(&server, temp.path(), BackupOptions::default());
    let result = backup.run(&Collection::Default, None).await.unwrap();

    assert_eq!(result.total_items, 2);
    assert_eq!(result.downloaded, 2);
    assert_eq!(result.skipped, 0);
    assert_eq!(result.failed, 0);

    let stored = read_json(&temp.path().join("conversations").join("c1.json"));
    assert_eq!(stored, detail("c1", 100.0), "raw JSON should be kept as served");

    let index = read_json(&temp.path().join("conversations.json"));
    assert_eq!(index.as_array().unwrap().len(), 2);

    let metadata = read_json(&temp.path().join("metadata.json"));
    assert_eq!(metadata["downloaded"], 2);
    assert_eq!(metadata["incremental"], true);
}

#[tokio::test]
async fn test_second_incremental_run_skips_current_conversations() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_listing(&server, vec![summary("c1", 100.0), summary("c2", 200.0)]).await;
    mount_detail(&server, "c1", detail("c1", 100.0)).await;
    mount_detail(&server, "c2", detail("c2", 200.0)).await;

    let temp = TempDir::new().unwrap();
    let backup = engine_for(&server, temp.path(), BackupOptions::default());
    backup.run(&Collection::Default, None).await.unwrap();
    let second = backup.run(&Collection::Default, None).await.unwrap();

    assert_eq!(second.total_items, 2);
    assert_eq!(second.downloaded, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(second.failed, 0);

    let log = std::fs::read_to_string(temp.path().join("backup.log")).unwrap();
    assert_eq!(log.lines().filter(|l| l.contains("RUN")).count(), 2);
}

#[tokio::test]
async fn test_skip_compares_normalized_timestamps() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_listing(&server, vec![summary("same", 100.0), summary("newer", 150.0)]).await;
    mount_detail(&server, "same", detail("same", 100.0)).await;
    mount_detail(&server, "newer", detail("newer", 150.0)).await;

    let temp = TempDir::new().unwrap();
    let store = ConversationStore::new(temp.path());
    for id in ["same", "newer"] {
        let mut stored = detail(id, 0.0);
        stored["update_time"] = json!("1970-01-01T00:01:40.000Z");
        store.write_detail(id, &stored).await.unwrap();
    }

    let result = engine_for(&server, temp.path(), BackupOptions::default())
        .run(&Collection::Default, None)
        .await
        .unwrap();

    assert_eq!(result.skipped, 1);
    assert_eq!(result.downloaded, 1);
    let refreshed = read_json(&temp.path().join("conversations").join("newer.json"));
    assert_eq!(refreshed["update_time"], 150.0);
}

#[tokio::test]
async fn test_full_run_refetches_current_conversations() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_listing(&server, vec![summary("c1", 100.0)]).await;
    mount_detail(&server, "c1", detail("c1", 100.0)).await;

    let temp = TempDir::new().unwrap();
    engine_for(&server, temp.path(), BackupOptions::default())
        .run(&Collection::Default, None)
        .await
        .unwrap();

    let full = BackupOptions {
        incremental: false,
        ..BackupOptions::default()
    };
    let result = engine_for(&server, temp.path(), full)
        .run(&Collection::Default, None)
        .await
        .unwrap();
    assert_eq!(result.downloaded, 1);
    assert_eq!(result.skipped, 0);
}

#[tokio::test]
async fn test_invalid_graph_is_counted_and_not_written() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_listing(&server, vec![summary("good", 1.0), summary("bad", 2.0)]).await;
    mount_detail(&server, "good", detail("good", 1.0)).await;
    mount_detail(&server, "bad", broken_detail("bad")).await;

    let temp = TempDir::new().unwrap();
    let backup = engine_for(&server, temp.path(), BackupOptions::default());
    let result = backup.run(&Collection::Default, None).await.unwrap();

    assert_eq!(result.downloaded, 1);
    assert_eq!(result.failed, 1);
    assert_eq!(result.errors[0].item_id, "bad");
    assert!(result.errors[0].message.contains("invalid message graph"));
    assert!(!temp.path().join("conversations").join("bad.json").exists());

    let log = std::fs::read_to_string(temp.path().join("backup.log")).unwrap();
    assert!(log.contains("FAILED bad"));
}

#[tokio::test]
async fn test_missing_conversation_fails_only_that_item() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_listing(&server, vec![summary("c1", 1.0), summary("gone", 2.0)]).await;
    mount_detail(&server, "c1", detail("c1", 1.0)).await;
    Mock::given(method("GET"))
        .and(path("/api/conversation/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let result = engine_for(&server, temp.path(), BackupOptions::default())
        .run(&Collection::Default, None)
        .await
        .unwrap();

    assert_eq!(result.downloaded, 1);
    assert_eq!(result.failed, 1);
    assert!(result.errors[0].message.contains("404"));
}

#[tokio::test]
async fn test_rejected_token_aborts_listing() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/api/conversations"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let err = engine_for(&server, temp.path(), BackupOptions::default())
        .run(&Collection::Default, None)
        .await
        .unwrap_err();

    assert!(err.is_authentication());
    assert!(!temp.path().join("conversations.json").exists());
}

#[tokio::test]
async fn test_token_rejected_mid_batch_stops_run() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let ids = ["c1", "c2", "c3", "c4", "c5"];
    mount_listing(&server, ids.iter().map(|id| summary(id, 1.0)).collect()).await;
    for id in ids {
        Mock::given(method("GET"))
            .and(path(format!("/api/conversation/{id}")))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
    }

    let temp = TempDir::new().unwrap();
    let err = engine_with_concurrency(&server, temp.path(), BackupOptions::default(), 1)
        .run(&Collection::Default, None)
        .await
        .unwrap_err();

    assert!(err.is_authentication());
    assert!(matches!(
        &err,
        BackupError::Interrupted { conversation_id, .. } if conversation_id == "c1"
    ));
    let detail_requests = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|request| request.url.path().starts_with("/api/conversation/"))
        .count();
    assert_eq!(detail_requests, 1, "no conversation is fetched after the rejection");
    assert!(!temp.path().join("metadata.json").exists());
}

#[tokio::test]
async fn test_markdown_written_when_enabled() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_listing(&server, vec![summary("c1", 1.0)]).await;
    mount_detail(&server, "c1", detail("c1", 1.0)).await;

    let temp = TempDir::new().unwrap();
    let options = BackupOptions {
        markdown: true,
        ..BackupOptions::default()
    };
    engine_for(&server, temp.path(), options)
        .run(&Collection::Default, None)
        .await
        .unwrap();

    let markdown = std::fs::read_to_string(temp.path().join("markdown").join("c1.md")).unwrap();
    assert!(markdown.starts_with("# Chat c1"));
    assert!(markdown.contains("hello"));
}

// ==================== Project Tests ====================

#[tokio::test]
async fn test_projects_discovered_and_backed_up_into_own_folder() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_listing(&server, vec![summary("c1", 1.0)]).await;
    mount_detail(&server, "c1", detail("c1", 1.0)).await;
    mount_detail(&server, "p-c1", detail("p-c1", 5.0)).await;

    Mock::given(method("GET"))
        .and(path("/api/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "id": "p1", "name": "Research Notes" }],
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/projects/p1/conversations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [summary("p-c1", 5.0)],
        })))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let backup = engine_for(&server, temp.path(), BackupOptions::default());
    let projects = backup.discover_projects().await.unwrap();
    assert_eq!(
        projects,
        vec![Collection::project("p1", "Research Notes")]
    );

    let default = backup.run(&Collection::Default, None).await.unwrap();
    assert_eq!(default.downloaded, 1);
    let project = backup.run(&projects[0], None).await.unwrap();
    assert_eq!(project.downloaded, 1);

    let project_root = temp.path().join("projects").join("Research-Notes");
    assert!(project_root.join("conversations").join("p-c1.json").exists());
    assert!(project_root.join("metadata.json").exists());
    assert!(!temp.path().join("conversations").join("p-c1.json").exists());
}
