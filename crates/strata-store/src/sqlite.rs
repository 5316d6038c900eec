//! SQLite-backed activity store implementation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::{
    effective_delivery_id, ActionOutcome, ActivityStore, ActivityStoreError, DeliveryAction,
    DeliveryReport, DeliveryWrites, EventTypeCount, GitEventRecord, InsertOutcome, NewGitEvent,
    NewRepository, NewTask, NewTaskLabel, NewWebhookEvent, RepoVisibility, RepositoryRecord,
    StoreResult, TaskLabelRecord, TaskRecord, TaskState, UpdateOutcome, WebhookEventRecord,
    TASK_STATUS_DONE, TASK_STATUS_PENDING,
};

const TASK_COLUMNS: &str = "task_id, repo_full_name, title, body, assignee, state, status, \
                            created_at, updated_at, closed_at";
const GIT_EVENT_COLUMNS: &str =
    "event_id, event_type, repo_full_name, branch, commit_message, author, author_email, timestamp";

/// SQLite-backed activity store. One file holds the event log, the repository
/// registry, the task ledger and the git activity log.
#[derive(Debug, Clone)]
pub struct SqliteActivityStore {
    db_path: PathBuf,
}

impl SqliteActivityStore {
    /// Open (or create) the store at `db_path` and make sure the schema exists.
    pub fn new(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self { db_path };
        store.initialize_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.pragma_update(None, "journal_mode", "WAL")?;
        connection.pragma_update(None, "synchronous", "NORMAL")?;
        connection.pragma_update(None, "foreign_keys", "ON")?;
        Ok(connection)
    }

    fn initialize_schema(&self) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute_batch(
            "CREATE TABLE IF NOT EXISTS webhook_events (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 delivery_id TEXT NOT NULL,
                 event_type TEXT NOT NULL,
                 source TEXT NOT NULL,
                 repo_full_name TEXT REFERENCES github_repositories (repo_full_name),
                 payload TEXT NOT NULL,
                 received_at TEXT NOT NULL,
                 UNIQUE (source, delivery_id)
             );
             CREATE TABLE IF NOT EXISTS github_repositories (
                 repo_id INTEGER PRIMARY KEY,
                 repo_name TEXT NOT NULL,
                 repo_full_name TEXT NOT NULL UNIQUE,
                 description TEXT,
                 visibility TEXT NOT NULL,
                 created_at TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS project_tasks (
                 task_id INTEGER NOT NULL,
                 repo_full_name TEXT NOT NULL
                     REFERENCES github_repositories (repo_full_name),
                 title TEXT NOT NULL,
                 body TEXT,
                 assignee TEXT,
                 state TEXT NOT NULL,
                 status TEXT NOT NULL,
                 created_at TEXT NOT NULL,
                 updated_at TEXT,
                 closed_at TEXT,
                 PRIMARY KEY (task_id, repo_full_name)
             );
             CREATE TABLE IF NOT EXISTS project_task_labels (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 task_id INTEGER NOT NULL,
                 label_name TEXT NOT NULL,
                 label_color TEXT NOT NULL,
                 created_at TEXT NOT NULL,
                 UNIQUE (task_id, label_name)
             );
             CREATE TABLE IF NOT EXISTS git_events (
                 event_id TEXT PRIMARY KEY,
                 event_type TEXT NOT NULL,
                 repo_full_name TEXT NOT NULL
                     REFERENCES github_repositories (repo_full_name),
                 branch TEXT NOT NULL,
                 commit_message TEXT NOT NULL,
                 author TEXT NOT NULL,
                 author_email TEXT NOT NULL,
                 timestamp TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_webhook_events_event_type
                 ON webhook_events (event_type);
             CREATE INDEX IF NOT EXISTS idx_git_events_timestamp
                 ON git_events (timestamp);",
        )?;
        Ok(())
    }
}

fn insert_event(
    connection: &Connection,
    event: &NewWebhookEvent,
    now: DateTime<Utc>,
) -> StoreResult<InsertOutcome> {
    let delivery_id = effective_delivery_id(event.delivery_id.as_deref(), &event.payload);
    let payload = serde_json::to_string(&event.payload)?;
    let rows = connection.execute(
        "INSERT OR IGNORE INTO webhook_events \
         (delivery_id, event_type, source, repo_full_name, payload, received_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            delivery_id,
            event.event_type,
            event.source,
            event.repo_full_name,
            payload,
            timestamp_to_db(now),
        ],
    )?;
    Ok(InsertOutcome::from_rows_changed(rows))
}

fn insert_repository(
    connection: &Connection,
    repository: &NewRepository,
    now: DateTime<Utc>,
) -> StoreResult<InsertOutcome> {
    let rows = connection.execute(
        "INSERT OR IGNORE INTO github_repositories \
         (repo_id, repo_name, repo_full_name, description, visibility, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            repository.repo_id,
            repository.repo_name,
            repository.repo_full_name,
            repository.description,
            repository.visibility.as_str(),
            timestamp_to_db(now),
        ],
    )?;
    Ok(InsertOutcome::from_rows_changed(rows))
}

fn insert_task(
    connection: &Connection,
    task: &NewTask,
    now: DateTime<Utc>,
) -> StoreResult<InsertOutcome> {
    let rows = connection.execute(
        "INSERT OR IGNORE INTO project_tasks \
         (task_id, repo_full_name, title, body, assignee, state, status, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            task.task_id,
            task.repo_full_name,
            task.title,
            task.body,
            task.assignee,
            TaskState::Open.as_str(),
            TASK_STATUS_PENDING,
            timestamp_to_db(now),
        ],
    )?;
    Ok(InsertOutcome::from_rows_changed(rows))
}

fn insert_task_label(
    connection: &Connection,
    label: &NewTaskLabel,
    now: DateTime<Utc>,
) -> StoreResult<InsertOutcome> {
    let rows = connection.execute(
        "INSERT OR IGNORE INTO project_task_labels \
         (task_id, label_name, label_color, created_at) \
         VALUES (?1, ?2, ?3, ?4)",
        params![
            label.task_id,
            label.label_name,
            label.label_color,
            timestamp_to_db(now),
        ],
    )?;
    Ok(InsertOutcome::from_rows_changed(rows))
}

fn update_task_closed(
    connection: &Connection,
    task_id: i64,
    repo_full_name: &str,
    now: DateTime<Utc>,
) -> StoreResult<UpdateOutcome> {
    let stamp = timestamp_to_db(now);
    let rows = connection.execute(
        "UPDATE project_tasks SET state = ?1, status = ?2, closed_at = ?3, updated_at = ?4 \
         WHERE task_id = ?5 AND repo_full_name = ?6",
        params![
            TaskState::Closed.as_str(),
            TASK_STATUS_DONE,
            stamp,
            stamp,
            task_id,
            repo_full_name,
        ],
    )?;
    Ok(UpdateOutcome::from_rows_changed(rows))
}

fn insert_git_event(
    connection: &Connection,
    event: &NewGitEvent,
    now: DateTime<Utc>,
) -> StoreResult<InsertOutcome> {
    let rows = connection.execute(
        "INSERT OR IGNORE INTO git_events \
         (event_id, event_type, repo_full_name, branch, commit_message, author, author_email, \
          timestamp) \
         VALUES (?1, 'push', ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.commit_sha,
            event.repo_full_name,
            event.branch,
            event.commit_message,
            event.author,
            event.author_email,
            timestamp_to_db(now),
        ],
    )?;
    Ok(InsertOutcome::from_rows_changed(rows))
}

fn apply_delivery_action(
    connection: &Connection,
    action: &DeliveryAction,
    now: DateTime<Utc>,
) -> StoreResult<ActionOutcome> {
    match action {
        DeliveryAction::OpenTask { task, labels } => {
            let task_outcome = insert_task(connection, task, now)?;
            let mut labels_inserted = 0usize;
            for label in labels {
                if insert_task_label(connection, label, now)?.is_inserted() {
                    labels_inserted = labels_inserted.saturating_add(1);
                }
            }
            Ok(ActionOutcome::TaskOpened {
                task: task_outcome,
                labels_inserted,
            })
        }
        DeliveryAction::CloseTask {
            task_id,
            repo_full_name,
        } => Ok(ActionOutcome::TaskClosed(update_task_closed(
            connection,
            *task_id,
            repo_full_name,
            now,
        )?)),
        DeliveryAction::RecordPush(event) => Ok(ActionOutcome::PushRecorded(insert_git_event(
            connection, event, now,
        )?)),
    }
}

type TaskRow = (
    i64,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
);

fn read_task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn task_from_row(row: TaskRow) -> StoreResult<TaskRecord> {
    let (
        task_id,
        repo_full_name,
        title,
        body,
        assignee,
        state,
        status,
        created_at,
        updated_at,
        closed_at,
    ) = row;
    Ok(TaskRecord {
        task_id,
        repo_full_name,
        title,
        body,
        assignee,
        state: task_state_from_db(&state)?,
        status,
        created_at: timestamp_from_db(&created_at)?,
        updated_at: optional_timestamp_from_db(updated_at.as_deref())?,
        closed_at: optional_timestamp_from_db(closed_at.as_deref())?,
    })
}

type GitEventRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
);

fn read_git_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GitEventRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn git_event_from_row(row: GitEventRow) -> StoreResult<GitEventRecord> {
    let (
        event_id,
        event_type,
        repo_full_name,
        branch,
        commit_message,
        author,
        author_email,
        timestamp,
    ) = row;
    Ok(GitEventRecord {
        event_id,
        event_type,
        repo_full_name,
        branch,
        commit_message,
        author,
        author_email,
        timestamp: timestamp_from_db(&timestamp)?,
    })
}

#[async_trait]
impl ActivityStore for SqliteActivityStore {
    async fn record_event(&self, event: NewWebhookEvent) -> StoreResult<InsertOutcome> {
        let connection = self.open_connection()?;
        insert_event(&connection, &event, Utc::now())
    }

    async fn ensure_repository(&self, repository: NewRepository) -> StoreResult<InsertOutcome> {
        let connection = self.open_connection()?;
        insert_repository(&connection, &repository, Utc::now())
    }

    async fn open_task(&self, task: NewTask) -> StoreResult<InsertOutcome> {
        let connection = self.open_connection()?;
        insert_task(&connection, &task, Utc::now())
    }

    async fn add_task_label(&self, label: NewTaskLabel) -> StoreResult<InsertOutcome> {
        let connection = self.open_connection()?;
        insert_task_label(&connection, &label, Utc::now())
    }

    async fn close_task(&self, task_id: i64, repo_full_name: &str) -> StoreResult<UpdateOutcome> {
        let connection = self.open_connection()?;
        update_task_closed(&connection, task_id, repo_full_name, Utc::now())
    }

    async fn record_push(&self, event: NewGitEvent) -> StoreResult<InsertOutcome> {
        let connection = self.open_connection()?;
        insert_git_event(&connection, &event, Utc::now())
    }

    /// Applies the whole delivery inside one immediate transaction, so a
    /// failed write never leaves a partially recorded delivery behind.
    async fn ingest_delivery(&self, writes: DeliveryWrites) -> StoreResult<DeliveryReport> {
        let now = Utc::now();
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let repository = match &writes.repository {
            Some(repository) => Some(insert_repository(&transaction, repository, now)?),
            None => None,
        };
        let event = insert_event(&transaction, &writes.event, now)?;
        let action = match &writes.action {
            Some(action) => Some(apply_delivery_action(&transaction, action, now)?),
            None => None,
        };
        transaction.commit()?;
        Ok(DeliveryReport {
            repository,
            event,
            action,
        })
    }

    async fn count_repositories(&self) -> StoreResult<u64> {
        let connection = self.open_connection()?;
        let count: i64 =
            connection.query_row("SELECT COUNT(*) FROM github_repositories", [], |row| {
                row.get(0)
            })?;
        i64_to_u64("repository_count", count)
    }

    async fn count_open_tasks(&self) -> StoreResult<u64> {
        let connection = self.open_connection()?;
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM project_tasks WHERE state = ?1",
            params![TaskState::Open.as_str()],
            |row| row.get(0),
        )?;
        i64_to_u64("open_task_count", count)
    }

    async fn count_webhook_events(&self) -> StoreResult<u64> {
        let connection = self.open_connection()?;
        let count: i64 =
            connection.query_row("SELECT COUNT(*) FROM webhook_events", [], |row| row.get(0))?;
        i64_to_u64("webhook_event_count", count)
    }

    async fn webhook_event_type_counts(&self) -> StoreResult<Vec<EventTypeCount>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            "SELECT event_type, COUNT(*) FROM webhook_events \
             GROUP BY event_type ORDER BY event_type",
        )?;
        let rows = statement.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut counts = Vec::new();
        for row in rows {
            let (event_type, count) = row?;
            counts.push(EventTypeCount {
                event_type,
                count: i64_to_u64("event_type_count", count)?,
            });
        }
        Ok(counts)
    }

    async fn recent_git_events(&self, limit: u32) -> StoreResult<Vec<GitEventRecord>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {GIT_EVENT_COLUMNS} FROM git_events \
             ORDER BY timestamp DESC, event_id DESC LIMIT ?1"
        ))?;
        let rows = statement.query_map(params![i64::from(limit)], read_git_event_row)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(git_event_from_row(row?)?);
        }
        Ok(events)
    }

    async fn list_tasks(&self, state: Option<TaskState>) -> StoreResult<Vec<TaskRecord>> {
        let connection = self.open_connection()?;
        let mut tasks = Vec::new();
        match state {
            Some(state) => {
                let mut statement = connection.prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM project_tasks WHERE state = ?1 \
                     ORDER BY repo_full_name, task_id"
                ))?;
                let rows = statement.query_map(params![state.as_str()], read_task_row)?;
                for row in rows {
                    tasks.push(task_from_row(row?)?);
                }
            }
            None => {
                let mut statement = connection.prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM project_tasks ORDER BY repo_full_name, task_id"
                ))?;
                let rows = statement.query_map([], read_task_row)?;
                for row in rows {
                    tasks.push(task_from_row(row?)?);
                }
            }
        }
        Ok(tasks)
    }

    async fn get_task(
        &self,
        task_id: i64,
        repo_full_name: &str,
    ) -> StoreResult<Option<TaskRecord>> {
        let connection = self.open_connection()?;
        let row = connection
            .query_row(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM project_tasks \
                     WHERE task_id = ?1 AND repo_full_name = ?2"
                ),
                params![task_id, repo_full_name],
                read_task_row,
            )
            .optional()?;
        row.map(task_from_row).transpose()
    }

    async fn get_repository(&self, repo_id: i64) -> StoreResult<Option<RepositoryRecord>> {
        let connection = self.open_connection()?;
        let row = connection
            .query_row(
                "SELECT repo_id, repo_name, repo_full_name, description, visibility, created_at \
                 FROM github_repositories WHERE repo_id = ?1",
                params![repo_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;
        row.map(
            |(repo_id, repo_name, repo_full_name, description, visibility, created_at)| {
                Ok(RepositoryRecord {
                    repo_id,
                    repo_name,
                    repo_full_name,
                    description,
                    visibility: visibility_from_db(&visibility)?,
                    created_at: timestamp_from_db(&created_at)?,
                })
            },
        )
        .transpose()
    }

    async fn list_task_labels(&self, task_id: i64) -> StoreResult<Vec<TaskLabelRecord>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            "SELECT task_id, label_name, label_color, created_at FROM project_task_labels \
             WHERE task_id = ?1 ORDER BY label_name",
        )?;
        let rows = statement.query_map(params![task_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut labels = Vec::new();
        for row in rows {
            let (task_id, label_name, label_color, created_at) = row?;
            labels.push(TaskLabelRecord {
                task_id,
                label_name,
                label_color,
                created_at: timestamp_from_db(&created_at)?,
            });
        }
        Ok(labels)
    }

    async fn get_webhook_event(
        &self,
        source: &str,
        delivery_id: &str,
    ) -> StoreResult<Option<WebhookEventRecord>> {
        let connection = self.open_connection()?;
        let row = connection
            .query_row(
                "SELECT delivery_id, event_type, source, repo_full_name, payload, received_at \
                 FROM webhook_events WHERE source = ?1 AND delivery_id = ?2",
                params![source, delivery_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;
        row.map(
            |(delivery_id, event_type, source, repo_full_name, payload, received_at)| {
                Ok(WebhookEventRecord {
                    delivery_id,
                    event_type,
                    source,
                    repo_full_name,
                    payload: serde_json::from_str(&payload)?,
                    received_at: timestamp_from_db(&received_at)?,
                })
            },
        )
        .transpose()
    }
}

fn timestamp_to_db(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn timestamp_from_db(value: &str) -> StoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn optional_timestamp_from_db(value: Option<&str>) -> StoreResult<Option<DateTime<Utc>>> {
    value.map(timestamp_from_db).transpose()
}

fn i64_to_u64(field: &'static str, value: i64) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| ActivityStoreError::InvalidPersistedValue {
        field,
        value: value.to_string(),
    })
}

fn task_state_from_db(value: &str) -> StoreResult<TaskState> {
    TaskState::parse(value).ok_or_else(|| ActivityStoreError::InvalidPersistedValue {
        field: "state",
        value: value.to_string(),
    })
}

fn visibility_from_db(value: &str) -> StoreResult<RepoVisibility> {
    RepoVisibility::parse(value).ok_or_else(|| ActivityStoreError::InvalidPersistedValue {
        field: "visibility",
        value: value.to_string(),
    })
}
