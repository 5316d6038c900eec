//! End-to-end webhook ingestion tests against a live gateway over SQLite.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use strata_gateway::{build_webhook_gateway_router, WebhookGatewayConfig, WebhookGatewayState};
use strata_store::{
    ActivityStore, NewGitEvent, SharedActivityStore, SqliteActivityStore, TaskState,
};
use strata_webhook::DeployHook;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const WEBHOOK_ENDPOINT: &str = "/api/github/webhook";

#[derive(Default)]
struct CountingDeployHook {
    calls: AtomicUsize,
}

#[async_trait]
impl DeployHook for CountingDeployHook {
    async fn handle_primary_push(&self, _event: &NewGitEvent) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn gateway_config(store: Option<SharedActivityStore>) -> WebhookGatewayConfig {
    WebhookGatewayConfig {
        bind: "127.0.0.1:0".to_string(),
        store,
        deploy_hook: None,
        source: "github".to_string(),
        primary_branch: "main".to_string(),
    }
}

async fn spawn_gateway(config: WebhookGatewayConfig) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral listener");
    let addr = listener.local_addr().expect("resolve listener addr");
    let app = build_webhook_gateway_router(Arc::new(WebhookGatewayState::new(config)));
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    (addr, handle)
}

fn repository_block() -> Value {
    json!({
        "id": 42,
        "name": "widgets",
        "full_name": "acme/widgets",
        "description": "widget factory",
        "private": false
    })
}

fn issues_payload(action: &str, number: i64) -> Value {
    json!({
        "action": action,
        "issue": {
            "number": number,
            "title": "Fix the flange",
            "body": "It rattles at speed",
            "assignee": {"login": "octocat"},
            "labels": [{"name": "bug", "color": "red"}]
        },
        "repository": repository_block()
    })
}

fn push_payload(sha: &str, git_ref: &str) -> Value {
    json!({
        "ref": git_ref,
        "head_commit": {
            "id": sha,
            "message": "tighten flange bolts",
            "author": {"name": "octocat", "email": "octocat@example.com"}
        },
        "repository": repository_block()
    })
}

async fn post_webhook(
    client: &reqwest::Client,
    addr: &SocketAddr,
    event_type: &str,
    delivery_id: &str,
    payload: &Value,
) -> reqwest::Response {
    client
        .post(format!("http://{addr}{WEBHOOK_ENDPOINT}"))
        .header("X-GitHub-Event", event_type)
        .header("X-GitHub-Delivery", delivery_id)
        .json(payload)
        .send()
        .await
        .expect("send webhook request")
}

async fn get_json(client: &reqwest::Client, addr: &SocketAddr, path: &str) -> Value {
    client
        .get(format!("http://{addr}{path}"))
        .send()
        .await
        .expect("send read request")
        .json::<Value>()
        .await
        .expect("parse response json")
}

#[tokio::test]
async fn issue_lifecycle_updates_task_ledger_end_to_end() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store: SharedActivityStore = Arc::new(
        SqliteActivityStore::new(temp.path().join("activity.sqlite")).expect("open store"),
    );
    let (addr, handle) = spawn_gateway(gateway_config(Some(store.clone()))).await;
    let client = reqwest::Client::new();

    let ack = post_webhook(&client, &addr, "issues", "d-1", &issues_payload("opened", 7))
        .await
        .json::<Value>()
        .await
        .expect("parse ack json");
    assert_eq!(ack["received"], json!(true));
    assert_eq!(ack["repository"], "acme/widgets");

    let open = get_json(&client, &addr, "/api/tasks?state=open").await;
    let open_tasks = open["tasks"].as_array().expect("tasks array");
    assert_eq!(open_tasks.len(), 1);
    assert_eq!(open_tasks[0]["task_id"], 7);
    assert_eq!(open_tasks[0]["repo_full_name"], "acme/widgets");
    assert_eq!(open_tasks[0]["status"], "pending");

    let labels = store.list_task_labels(7).await.expect("list labels");
    assert_eq!(labels.len(), 1);
    assert_eq!(labels[0].label_name, "bug");
    assert_eq!(labels[0].label_color, "red");

    post_webhook(&client, &addr, "issues", "d-2", &issues_payload("closed", 7)).await;
    let closed = get_json(&client, &addr, "/api/tasks?state=closed").await;
    let closed_tasks = closed["tasks"].as_array().expect("tasks array");
    assert_eq!(closed_tasks.len(), 1);
    assert_eq!(closed_tasks[0]["task_id"], 7);
    assert_eq!(closed_tasks[0]["status"], "done");
    assert!(!closed_tasks[0]["closed_at"].is_null());

    let task = store
        .get_task(7, "acme/widgets")
        .await
        .expect("get task")
        .expect("task row");
    assert_eq!(task.state, TaskState::Closed);

    handle.abort();
}

#[tokio::test]
async fn mixed_deliveries_shape_the_activity_snapshot() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store: SharedActivityStore = Arc::new(
        SqliteActivityStore::new(temp.path().join("activity.sqlite")).expect("open store"),
    );
    let (addr, handle) = spawn_gateway(gateway_config(Some(store))).await;
    let client = reqwest::Client::new();

    post_webhook(&client, &addr, "push", "d-1", &push_payload("abc123", "refs/heads/main")).await;
    post_webhook(&client, &addr, "issues", "d-2", &issues_payload("opened", 7)).await;
    post_webhook(
        &client,
        &addr,
        "release",
        "d-3",
        &json!({"release": {"tag_name": "v1.0"}, "repository": repository_block()}),
    )
    .await;
    post_webhook(&client, &addr, "ping", "d-4", &json!({"zen": "Mind the gap."})).await;

    let snapshot = get_json(&client, &addr, "/api/activity").await;
    assert_eq!(snapshot["repositories"], 1);
    assert_eq!(snapshot["open_tasks"], 1);
    assert_eq!(snapshot["webhook_events"], 4);

    let event_types: Vec<&str> = snapshot["event_types"]
        .as_array()
        .expect("event_types array")
        .iter()
        .map(|entry| entry["event_type"].as_str().expect("event_type string"))
        .collect();
    assert_eq!(event_types, vec!["issues", "ping", "push", "release"]);

    let recent = snapshot["recent_git_events"].as_array().expect("recent array");
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0]["event_id"], "abc123");

    handle.abort();
}

#[tokio::test]
async fn redelivered_webhooks_converge_on_the_same_state() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store: SharedActivityStore = Arc::new(
        SqliteActivityStore::new(temp.path().join("activity.sqlite")).expect("open store"),
    );
    let (addr, handle) = spawn_gateway(gateway_config(Some(store.clone()))).await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        post_webhook(&client, &addr, "issues", "d-1", &issues_payload("opened", 7)).await;
    }
    // Same commit redelivered under a fresh delivery id still collapses in
    // the git activity log.
    post_webhook(&client, &addr, "push", "d-2", &push_payload("abc123", "refs/heads/main")).await;
    post_webhook(&client, &addr, "push", "d-3", &push_payload("abc123", "refs/heads/main")).await;

    assert_eq!(store.count_webhook_events().await.expect("count events"), 3);
    assert_eq!(store.list_tasks(None).await.expect("list tasks").len(), 1);
    assert_eq!(store.list_task_labels(7).await.expect("list labels").len(), 1);
    assert_eq!(
        store.recent_git_events(10).await.expect("recent events").len(),
        1
    );

    handle.abort();
}

#[tokio::test]
async fn deploy_hook_sees_only_fresh_primary_branch_commits() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store: SharedActivityStore = Arc::new(
        SqliteActivityStore::new(temp.path().join("activity.sqlite")).expect("open store"),
    );
    let hook = Arc::new(CountingDeployHook::default());
    let mut config = gateway_config(Some(store));
    config.deploy_hook = Some(hook.clone());
    let (addr, handle) = spawn_gateway(config).await;
    let client = reqwest::Client::new();

    post_webhook(&client, &addr, "push", "d-1", &push_payload("abc123", "refs/heads/main")).await;
    post_webhook(&client, &addr, "push", "d-2", &push_payload("abc123", "refs/heads/main")).await;
    post_webhook(
        &client,
        &addr,
        "push",
        "d-3",
        &push_payload("def456", "refs/heads/feature"),
    )
    .await;
    assert_eq!(hook.calls.load(Ordering::SeqCst), 1);

    post_webhook(&client, &addr, "push", "d-4", &push_payload("fed789", "refs/heads/main")).await;
    assert_eq!(hook.calls.load(Ordering::SeqCst), 2);

    handle.abort();
}

#[tokio::test]
async fn persisted_state_survives_a_server_restart() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db_path = temp.path().join("activity.sqlite");

    let store: SharedActivityStore =
        Arc::new(SqliteActivityStore::new(&db_path).expect("open store"));
    let (addr, handle) = spawn_gateway(gateway_config(Some(store))).await;
    let client = reqwest::Client::new();
    post_webhook(&client, &addr, "push", "d-1", &push_payload("abc123", "refs/heads/main")).await;
    post_webhook(&client, &addr, "issues", "d-2", &issues_payload("opened", 7)).await;
    handle.abort();

    let reopened: SharedActivityStore =
        Arc::new(SqliteActivityStore::new(&db_path).expect("reopen store"));
    let (addr, handle) = spawn_gateway(gateway_config(Some(reopened))).await;
    let snapshot = get_json(&client, &addr, "/api/activity").await;
    assert_eq!(snapshot["webhook_events"], 2);
    assert_eq!(snapshot["repositories"], 1);
    assert_eq!(snapshot["open_tasks"], 1);
    let recent = snapshot["recent_git_events"].as_array().expect("recent array");
    assert_eq!(recent[0]["event_id"], "abc123");

    handle.abort();
}
