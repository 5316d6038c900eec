//! Durable activity store for webhook-driven project state.
//!
//! The store keeps four kinds of records: raw webhook event envelopes, the
//! repositories they reference, the task ledger derived from issue events, and
//! the per-commit git activity log. Every write is keyed so that redelivering
//! the same webhook converges on the same stored state.

mod sqlite;

pub use sqlite::SqliteActivityStore;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_core::{current_unix_timestamp_ms, short_payload_hash};
use tokio::sync::RwLock;

/// Result type for activity store operations.
pub type StoreResult<T> = Result<T, ActivityStoreError>;

/// Task status marker for tasks that are still open.
pub const TASK_STATUS_PENDING: &str = "pending";
/// Task status marker stamped when a task is closed.
pub const TASK_STATUS_DONE: &str = "done";

/// Errors returned by store implementations.
#[derive(Debug, thiserror::Error)]
pub enum ActivityStoreError {
    #[error("invalid persisted value for {field}: {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Lifecycle state of a ledger task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Open,
    Closed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Open => "open",
            TaskState::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(TaskState::Open),
            "closed" => Some(TaskState::Closed),
            _ => None,
        }
    }
}

/// Visibility of a registered repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoVisibility {
    Public,
    Private,
}

impl RepoVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoVisibility::Public => "public",
            RepoVisibility::Private => "private",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "public" => Some(RepoVisibility::Public),
            "private" => Some(RepoVisibility::Private),
            _ => None,
        }
    }
}

/// Outcome of a keyed insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

impl InsertOutcome {
    pub fn from_rows_changed(rows: usize) -> Self {
        if rows > 0 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::Duplicate
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted)
    }

    pub fn describe(&self) -> &'static str {
        match self {
            InsertOutcome::Inserted => "inserted",
            InsertOutcome::Duplicate => "duplicate",
        }
    }
}

/// Outcome of a keyed update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    NoMatchingRow,
}

impl UpdateOutcome {
    pub fn from_rows_changed(rows: usize) -> Self {
        if rows > 0 {
            UpdateOutcome::Updated
        } else {
            UpdateOutcome::NoMatchingRow
        }
    }

    pub fn was_updated(&self) -> bool {
        matches!(self, UpdateOutcome::Updated)
    }

    pub fn describe(&self) -> &'static str {
        match self {
            UpdateOutcome::Updated => "updated",
            UpdateOutcome::NoMatchingRow => "no_matching_row",
        }
    }
}

/// Incoming webhook event envelope before persistence.
#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    /// Provider-supplied delivery id. When absent the store synthesizes one.
    pub delivery_id: Option<String>,
    pub event_type: String,
    pub source: String,
    pub repo_full_name: Option<String>,
    pub payload: Value,
}

/// Stored webhook event envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEventRecord {
    pub delivery_id: String,
    pub event_type: String,
    pub source: String,
    pub repo_full_name: Option<String>,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

/// Repository registration extracted from a webhook payload.
#[derive(Debug, Clone)]
pub struct NewRepository {
    pub repo_id: i64,
    pub repo_name: String,
    pub repo_full_name: String,
    pub description: Option<String>,
    pub visibility: RepoVisibility,
}

/// Stored repository registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub repo_id: i64,
    pub repo_name: String,
    pub repo_full_name: String,
    pub description: Option<String>,
    pub visibility: RepoVisibility,
    pub created_at: DateTime<Utc>,
}

/// Task opened from an issue event.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_id: i64,
    pub repo_full_name: String,
    pub title: String,
    pub body: Option<String>,
    pub assignee: Option<String>,
}

/// Stored ledger task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: i64,
    pub repo_full_name: String,
    pub title: String,
    pub body: Option<String>,
    pub assignee: Option<String>,
    pub state: TaskState,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Label attached to a ledger task.
#[derive(Debug, Clone)]
pub struct NewTaskLabel {
    pub task_id: i64,
    pub label_name: String,
    pub label_color: String,
}

/// Stored task label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLabelRecord {
    pub task_id: i64,
    pub label_name: String,
    pub label_color: String,
    pub created_at: DateTime<Utc>,
}

/// Commit-level git activity extracted from a push event.
#[derive(Debug, Clone)]
pub struct NewGitEvent {
    pub commit_sha: String,
    pub repo_full_name: String,
    pub branch: String,
    pub commit_message: String,
    pub author: String,
    pub author_email: String,
}

/// Stored git activity record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitEventRecord {
    pub event_id: String,
    pub event_type: String,
    pub repo_full_name: String,
    pub branch: String,
    pub commit_message: String,
    pub author: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
}

/// Count of stored events for one event type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventTypeCount {
    pub event_type: String,
    pub count: u64,
}

/// Domain write derived from a classified webhook delivery.
#[derive(Debug, Clone)]
pub enum DeliveryAction {
    OpenTask {
        task: NewTask,
        labels: Vec<NewTaskLabel>,
    },
    CloseTask {
        task_id: i64,
        repo_full_name: String,
    },
    RecordPush(NewGitEvent),
}

/// Full set of writes for one webhook delivery.
#[derive(Debug, Clone)]
pub struct DeliveryWrites {
    pub repository: Option<NewRepository>,
    pub event: NewWebhookEvent,
    pub action: Option<DeliveryAction>,
}

/// Outcome of the optional domain write in a delivery.
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    TaskOpened {
        task: InsertOutcome,
        labels_inserted: usize,
    },
    TaskClosed(UpdateOutcome),
    PushRecorded(InsertOutcome),
}

/// Per-write outcomes for one ingested delivery.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub repository: Option<InsertOutcome>,
    pub event: InsertOutcome,
    pub action: Option<ActionOutcome>,
}

/// Render a single-line operator summary for an ingested delivery.
pub fn render_delivery_report(report: &DeliveryReport) -> String {
    let repository = match report.repository {
        Some(outcome) => outcome.describe(),
        None => "absent",
    };
    let action = match &report.action {
        Some(ActionOutcome::TaskOpened {
            task,
            labels_inserted,
        }) => format!("task_opened({}, labels={labels_inserted})", task.describe()),
        Some(ActionOutcome::TaskClosed(outcome)) => format!("task_closed({})", outcome.describe()),
        Some(ActionOutcome::PushRecorded(outcome)) => {
            format!("push_recorded({})", outcome.describe())
        }
        None => "none".to_string(),
    };
    format!("event={} repository={repository} action={action}", report.event.describe())
}

/// Resolve the dedup key for an event, synthesizing one when the provider
/// did not supply a delivery id.
pub fn effective_delivery_id(delivery_id: Option<&str>, payload: &Value) -> String {
    match delivery_id {
        Some(value) if !value.trim().is_empty() => value.to_string(),
        _ => format!(
            "delivery-{}-{}",
            current_unix_timestamp_ms(),
            short_payload_hash(payload.to_string().as_bytes())
        ),
    }
}

/// Async store contract shared by the SQLite and in-memory backends.
///
/// Inserts are keyed and report [`InsertOutcome::Duplicate`] instead of
/// failing when the key already exists, so callers can replay deliveries
/// without special-casing redelivery.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn record_event(&self, event: NewWebhookEvent) -> StoreResult<InsertOutcome>;
    async fn ensure_repository(&self, repository: NewRepository) -> StoreResult<InsertOutcome>;
    async fn open_task(&self, task: NewTask) -> StoreResult<InsertOutcome>;
    async fn add_task_label(&self, label: NewTaskLabel) -> StoreResult<InsertOutcome>;
    async fn close_task(&self, task_id: i64, repo_full_name: &str) -> StoreResult<UpdateOutcome>;
    async fn record_push(&self, event: NewGitEvent) -> StoreResult<InsertOutcome>;

    /// Apply every write for one delivery and report each outcome.
    async fn ingest_delivery(&self, writes: DeliveryWrites) -> StoreResult<DeliveryReport>;

    async fn count_repositories(&self) -> StoreResult<u64>;
    async fn count_open_tasks(&self) -> StoreResult<u64>;
    async fn count_webhook_events(&self) -> StoreResult<u64>;
    async fn webhook_event_type_counts(&self) -> StoreResult<Vec<EventTypeCount>>;
    async fn recent_git_events(&self, limit: u32) -> StoreResult<Vec<GitEventRecord>>;
    async fn list_tasks(&self, state: Option<TaskState>) -> StoreResult<Vec<TaskRecord>>;
    async fn get_task(
        &self,
        task_id: i64,
        repo_full_name: &str,
    ) -> StoreResult<Option<TaskRecord>>;
    async fn get_repository(&self, repo_id: i64) -> StoreResult<Option<RepositoryRecord>>;
    async fn list_task_labels(&self, task_id: i64) -> StoreResult<Vec<TaskLabelRecord>>;
    async fn get_webhook_event(
        &self,
        source: &str,
        delivery_id: &str,
    ) -> StoreResult<Option<WebhookEventRecord>>;
}

/// Shared handle to a store implementation.
pub type SharedActivityStore = Arc<dyn ActivityStore>;

#[derive(Debug, Default)]
struct StoreInner {
    events: HashMap<(String, String), WebhookEventRecord>,
    repositories: HashMap<i64, RepositoryRecord>,
    tasks: HashMap<(i64, String), TaskRecord>,
    task_labels: HashMap<(i64, String), TaskLabelRecord>,
    git_events: HashMap<String, GitEventRecord>,
}

/// In-memory implementation for tests and local experimentation.
#[derive(Debug, Default)]
pub struct InMemoryActivityStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_record_event(
    inner: &mut StoreInner,
    event: NewWebhookEvent,
    now: DateTime<Utc>,
) -> InsertOutcome {
    let delivery_id = effective_delivery_id(event.delivery_id.as_deref(), &event.payload);
    let key = (event.source.clone(), delivery_id.clone());
    if inner.events.contains_key(&key) {
        return InsertOutcome::Duplicate;
    }
    inner.events.insert(
        key,
        WebhookEventRecord {
            delivery_id,
            event_type: event.event_type,
            source: event.source,
            repo_full_name: event.repo_full_name,
            payload: event.payload,
            received_at: now,
        },
    );
    InsertOutcome::Inserted
}

fn apply_ensure_repository(
    inner: &mut StoreInner,
    repository: NewRepository,
    now: DateTime<Utc>,
) -> InsertOutcome {
    let full_name_taken = inner
        .repositories
        .values()
        .any(|existing| existing.repo_full_name == repository.repo_full_name);
    if inner.repositories.contains_key(&repository.repo_id) || full_name_taken {
        return InsertOutcome::Duplicate;
    }
    inner.repositories.insert(
        repository.repo_id,
        RepositoryRecord {
            repo_id: repository.repo_id,
            repo_name: repository.repo_name,
            repo_full_name: repository.repo_full_name,
            description: repository.description,
            visibility: repository.visibility,
            created_at: now,
        },
    );
    InsertOutcome::Inserted
}

fn apply_open_task(inner: &mut StoreInner, task: NewTask, now: DateTime<Utc>) -> InsertOutcome {
    let key = (task.task_id, task.repo_full_name.clone());
    if inner.tasks.contains_key(&key) {
        return InsertOutcome::Duplicate;
    }
    inner.tasks.insert(
        key,
        TaskRecord {
            task_id: task.task_id,
            repo_full_name: task.repo_full_name,
            title: task.title,
            body: task.body,
            assignee: task.assignee,
            state: TaskState::Open,
            status: TASK_STATUS_PENDING.to_string(),
            created_at: now,
            updated_at: None,
            closed_at: None,
        },
    );
    InsertOutcome::Inserted
}

fn apply_add_task_label(
    inner: &mut StoreInner,
    label: NewTaskLabel,
    now: DateTime<Utc>,
) -> InsertOutcome {
    let key = (label.task_id, label.label_name.clone());
    if inner.task_labels.contains_key(&key) {
        return InsertOutcome::Duplicate;
    }
    inner.task_labels.insert(
        key,
        TaskLabelRecord {
            task_id: label.task_id,
            label_name: label.label_name,
            label_color: label.label_color,
            created_at: now,
        },
    );
    InsertOutcome::Inserted
}

fn apply_close_task(
    inner: &mut StoreInner,
    task_id: i64,
    repo_full_name: &str,
    now: DateTime<Utc>,
) -> UpdateOutcome {
    match inner.tasks.get_mut(&(task_id, repo_full_name.to_string())) {
        Some(task) => {
            task.state = TaskState::Closed;
            task.status = TASK_STATUS_DONE.to_string();
            task.closed_at = Some(now);
            task.updated_at = Some(now);
            UpdateOutcome::Updated
        }
        None => UpdateOutcome::NoMatchingRow,
    }
}

fn apply_record_push(
    inner: &mut StoreInner,
    event: NewGitEvent,
    now: DateTime<Utc>,
) -> InsertOutcome {
    if inner.git_events.contains_key(&event.commit_sha) {
        return InsertOutcome::Duplicate;
    }
    inner.git_events.insert(
        event.commit_sha.clone(),
        GitEventRecord {
            event_id: event.commit_sha,
            event_type: "push".to_string(),
            repo_full_name: event.repo_full_name,
            branch: event.branch,
            commit_message: event.commit_message,
            author: event.author,
            author_email: event.author_email,
            timestamp: now,
        },
    );
    InsertOutcome::Inserted
}

fn apply_action(
    inner: &mut StoreInner,
    action: DeliveryAction,
    now: DateTime<Utc>,
) -> ActionOutcome {
    match action {
        DeliveryAction::OpenTask { task, labels } => {
            let task_outcome = apply_open_task(inner, task, now);
            let mut labels_inserted = 0usize;
            for label in labels {
                if apply_add_task_label(inner, label, now).is_inserted() {
                    labels_inserted = labels_inserted.saturating_add(1);
                }
            }
            ActionOutcome::TaskOpened {
                task: task_outcome,
                labels_inserted,
            }
        }
        DeliveryAction::CloseTask {
            task_id,
            repo_full_name,
        } => ActionOutcome::TaskClosed(apply_close_task(inner, task_id, &repo_full_name, now)),
        DeliveryAction::RecordPush(event) => {
            ActionOutcome::PushRecorded(apply_record_push(inner, event, now))
        }
    }
}

#[async_trait]
impl ActivityStore for InMemoryActivityStore {
    async fn record_event(&self, event: NewWebhookEvent) -> StoreResult<InsertOutcome> {
        let mut inner = self.inner.write().await;
        Ok(apply_record_event(&mut inner, event, Utc::now()))
    }

    async fn ensure_repository(&self, repository: NewRepository) -> StoreResult<InsertOutcome> {
        let mut inner = self.inner.write().await;
        Ok(apply_ensure_repository(&mut inner, repository, Utc::now()))
    }

    async fn open_task(&self, task: NewTask) -> StoreResult<InsertOutcome> {
        let mut inner = self.inner.write().await;
        Ok(apply_open_task(&mut inner, task, Utc::now()))
    }

    async fn add_task_label(&self, label: NewTaskLabel) -> StoreResult<InsertOutcome> {
        let mut inner = self.inner.write().await;
        Ok(apply_add_task_label(&mut inner, label, Utc::now()))
    }

    async fn close_task(&self, task_id: i64, repo_full_name: &str) -> StoreResult<UpdateOutcome> {
        let mut inner = self.inner.write().await;
        Ok(apply_close_task(&mut inner, task_id, repo_full_name, Utc::now()))
    }

    async fn record_push(&self, event: NewGitEvent) -> StoreResult<InsertOutcome> {
        let mut inner = self.inner.write().await;
        Ok(apply_record_push(&mut inner, event, Utc::now()))
    }

    async fn ingest_delivery(&self, writes: DeliveryWrites) -> StoreResult<DeliveryReport> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        let repository = writes
            .repository
            .map(|repository| apply_ensure_repository(&mut inner, repository, now));
        let event = apply_record_event(&mut inner, writes.event, now);
        let action = writes
            .action
            .map(|action| apply_action(&mut inner, action, now));
        Ok(DeliveryReport {
            repository,
            event,
            action,
        })
    }

    async fn count_repositories(&self) -> StoreResult<u64> {
        let inner = self.inner.read().await;
        Ok(inner.repositories.len() as u64)
    }

    async fn count_open_tasks(&self) -> StoreResult<u64> {
        let inner = self.inner.read().await;
        let open = inner
            .tasks
            .values()
            .filter(|task| task.state == TaskState::Open)
            .count();
        Ok(open as u64)
    }

    async fn count_webhook_events(&self) -> StoreResult<u64> {
        let inner = self.inner.read().await;
        Ok(inner.events.len() as u64)
    }

    async fn webhook_event_type_counts(&self) -> StoreResult<Vec<EventTypeCount>> {
        let inner = self.inner.read().await;
        let mut counts: std::collections::BTreeMap<String, u64> = std::collections::BTreeMap::new();
        for event in inner.events.values() {
            let entry = counts.entry(event.event_type.clone()).or_insert(0);
            *entry = entry.saturating_add(1);
        }
        Ok(counts
            .into_iter()
            .map(|(event_type, count)| EventTypeCount { event_type, count })
            .collect())
    }

    async fn recent_git_events(&self, limit: u32) -> StoreResult<Vec<GitEventRecord>> {
        let inner = self.inner.read().await;
        let mut events: Vec<GitEventRecord> = inner.git_events.values().cloned().collect();
        events.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.event_id.cmp(&a.event_id))
        });
        events.truncate(limit as usize);
        Ok(events)
    }

    async fn list_tasks(&self, state: Option<TaskState>) -> StoreResult<Vec<TaskRecord>> {
        let inner = self.inner.read().await;
        let mut tasks: Vec<TaskRecord> = inner
            .tasks
            .values()
            .filter(|task| state.map(|wanted| task.state == wanted).unwrap_or(true))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| {
            a.repo_full_name
                .cmp(&b.repo_full_name)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        Ok(tasks)
    }

    async fn get_task(
        &self,
        task_id: i64,
        repo_full_name: &str,
    ) -> StoreResult<Option<TaskRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.tasks.get(&(task_id, repo_full_name.to_string())).cloned())
    }

    async fn get_repository(&self, repo_id: i64) -> StoreResult<Option<RepositoryRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.repositories.get(&repo_id).cloned())
    }

    async fn list_task_labels(&self, task_id: i64) -> StoreResult<Vec<TaskLabelRecord>> {
        let inner = self.inner.read().await;
        let mut labels: Vec<TaskLabelRecord> = inner
            .task_labels
            .values()
            .filter(|label| label.task_id == task_id)
            .cloned()
            .collect();
        labels.sort_by(|a, b| a.label_name.cmp(&b.label_name));
        Ok(labels)
    }

    async fn get_webhook_event(
        &self,
        source: &str,
        delivery_id: &str,
    ) -> StoreResult<Option<WebhookEventRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .events
            .get(&(source.to_string(), delivery_id.to_string()))
            .cloned())
    }
}
