//! Webhook delivery dispatcher.
//!
//! Every delivery follows the same path: validate the event type, parse the
//! body, upsert the repository the payload references, record the raw event,
//! then apply the handler for the classified kind. Handlers are best effort;
//! a payload that lacks the blocks a handler needs still ends up in the event
//! log and is acknowledged.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use strata_store::{
    render_delivery_report, ActionOutcome, ActivityStoreError, DeliveryAction, DeliveryReport,
    DeliveryWrites, InsertOutcome, NewGitEvent, NewRepository, NewTask, NewTaskLabel,
    NewWebhookEvent, RepoVisibility, SharedActivityStore,
};

use crate::webhook_payloads::{
    branch_from_ref, repository_from_payload, IssuesEventPayload, PushEventPayload,
    RepositoryPayload,
};

/// Event kinds with dedicated handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEventKind {
    Push,
    Issues,
    PullRequest,
    Ping,
    Unrecognized,
}

impl WebhookEventKind {
    pub fn classify(event_type: &str) -> Self {
        match event_type {
            "push" => WebhookEventKind::Push,
            "issues" => WebhookEventKind::Issues,
            "pull_request" => WebhookEventKind::PullRequest,
            "ping" => WebhookEventKind::Ping,
            _ => WebhookEventKind::Unrecognized,
        }
    }
}

/// Errors surfaced to the HTTP layer by [`WebhookDispatcher::dispatch`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("missing event type")]
    MissingEventType,
    #[error("payload is not valid JSON: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] ActivityStoreError),
}

/// Raw delivery handed over by the HTTP layer.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub event_type: Option<String>,
    pub delivery_id: Option<String>,
    pub body: Vec<u8>,
}

/// Acknowledgement echoed back to the provider.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryAck {
    pub received: bool,
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(rename = "deliveryId")]
    pub delivery_id: Option<String>,
    pub repository: Option<String>,
}

/// Result of dispatching one delivery. `report` is `None` when no store is
/// configured and the delivery was acknowledged without persistence.
#[derive(Debug)]
pub struct DeliveryOutcome {
    pub ack: DeliveryAck,
    pub report: Option<DeliveryReport>,
}

/// Callback raised after a fresh commit is logged on the primary branch.
#[async_trait]
pub trait DeployHook: Send + Sync {
    async fn handle_primary_push(&self, event: &NewGitEvent) -> anyhow::Result<()>;
}

/// Configuration for [`WebhookDispatcher`].
#[derive(Clone)]
pub struct WebhookDispatcherConfig {
    pub store: Option<SharedActivityStore>,
    pub deploy_hook: Option<Arc<dyn DeployHook>>,
    pub source: String,
    pub primary_branch: String,
}

/// Routes classified deliveries into the activity store.
pub struct WebhookDispatcher {
    store: Option<SharedActivityStore>,
    deploy_hook: Option<Arc<dyn DeployHook>>,
    source: String,
    primary_branch: String,
}

impl WebhookDispatcher {
    pub fn new(config: WebhookDispatcherConfig) -> Self {
        Self {
            store: config.store,
            deploy_hook: config.deploy_hook,
            source: config.source,
            primary_branch: config.primary_branch,
        }
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    pub fn store(&self) -> Option<&SharedActivityStore> {
        self.store.as_ref()
    }

    pub async fn dispatch(
        &self,
        delivery: WebhookDelivery,
    ) -> Result<DeliveryOutcome, DispatchError> {
        let event_type = delivery
            .event_type
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or(DispatchError::MissingEventType)?;
        let payload: Value = serde_json::from_slice(&delivery.body)?;

        let kind = WebhookEventKind::classify(&event_type);
        match kind {
            WebhookEventKind::Ping => {
                tracing::debug!(source = %self.source, "ping delivery acknowledged");
            }
            WebhookEventKind::PullRequest => {
                tracing::debug!("pull_request deliveries are acknowledged without state changes");
            }
            WebhookEventKind::Unrecognized => {
                tracing::debug!(
                    event_type = %event_type,
                    "no handler for event type, recording only"
                );
            }
            _ => {}
        }

        let repository = repository_from_payload(&payload);
        let repo_full_name = repository
            .as_ref()
            .map(|repository| repository.full_name.clone());
        let action = build_action(kind, &payload);
        let pending_push = match &action {
            Some(DeliveryAction::RecordPush(event)) => Some(event.clone()),
            _ => None,
        };

        let event = NewWebhookEvent {
            delivery_id: delivery.delivery_id.clone(),
            event_type: event_type.clone(),
            source: self.source.clone(),
            repo_full_name: repo_full_name.clone(),
            payload,
        };

        let report = match &self.store {
            Some(store) => {
                let writes = DeliveryWrites {
                    repository: repository.map(repository_write),
                    event,
                    action,
                };
                let report = match store.ingest_delivery(writes).await {
                    Ok(report) => report,
                    Err(error) => {
                        tracing::error!(
                            event_type = %event_type,
                            delivery_id = ?delivery.delivery_id,
                            repository = ?repo_full_name,
                            error = %error,
                            "failed to persist webhook delivery"
                        );
                        return Err(error.into());
                    }
                };
                tracing::info!(
                    event_type = %event_type,
                    outcome = %render_delivery_report(&report),
                    "webhook delivery ingested"
                );
                Some(report)
            }
            None => {
                tracing::debug!(
                    event_type = %event_type,
                    "no activity store configured, delivery acknowledged without persistence"
                );
                None
            }
        };

        if let (Some(hook), Some(push)) = (&self.deploy_hook, pending_push) {
            let fresh_commit = matches!(
                report.as_ref().and_then(|report| report.action.as_ref()),
                Some(ActionOutcome::PushRecorded(InsertOutcome::Inserted))
            );
            if fresh_commit && push.branch == self.primary_branch {
                if let Err(error) = hook.handle_primary_push(&push).await {
                    tracing::warn!(error = %error, branch = %push.branch, "deploy hook failed");
                }
            }
        }

        Ok(DeliveryOutcome {
            ack: DeliveryAck {
                received: true,
                event_type,
                delivery_id: delivery.delivery_id,
                repository: repo_full_name,
            },
            report,
        })
    }
}

fn repository_write(repository: RepositoryPayload) -> NewRepository {
    NewRepository {
        repo_id: repository.id,
        repo_name: repository.name,
        repo_full_name: repository.full_name,
        description: repository.description,
        visibility: if repository.private {
            RepoVisibility::Private
        } else {
            RepoVisibility::Public
        },
    }
}

fn build_action(kind: WebhookEventKind, payload: &Value) -> Option<DeliveryAction> {
    match kind {
        WebhookEventKind::Push => push_action(payload),
        WebhookEventKind::Issues => issues_action(payload),
        WebhookEventKind::PullRequest
        | WebhookEventKind::Ping
        | WebhookEventKind::Unrecognized => None,
    }
}

fn push_action(payload: &Value) -> Option<DeliveryAction> {
    let push: PushEventPayload = serde_json::from_value(payload.clone()).ok()?;
    let repository = repository_from_payload(payload)?;
    let head_commit = match push.head_commit {
        Some(commit) => commit,
        None => {
            tracing::debug!(git_ref = %push.git_ref, "push without head commit, nothing to log");
            return None;
        }
    };
    Some(DeliveryAction::RecordPush(NewGitEvent {
        commit_sha: head_commit.id,
        repo_full_name: repository.full_name,
        branch: branch_from_ref(&push.git_ref).to_string(),
        commit_message: head_commit.message,
        author: head_commit.author.name,
        author_email: head_commit.author.email,
    }))
}

fn issues_action(payload: &Value) -> Option<DeliveryAction> {
    let issues: IssuesEventPayload = serde_json::from_value(payload.clone()).ok()?;
    let repository = repository_from_payload(payload)?;
    let issue = issues.issue?;
    match issues.action.as_str() {
        "opened" => {
            let labels = issue
                .labels
                .iter()
                .map(|label| NewTaskLabel {
                    task_id: issue.number,
                    label_name: label.name.clone(),
                    label_color: label.color.clone(),
                })
                .collect();
            Some(DeliveryAction::OpenTask {
                task: NewTask {
                    task_id: issue.number,
                    repo_full_name: repository.full_name,
                    title: issue.title,
                    body: issue.body,
                    assignee: issue.assignee.map(|assignee| assignee.login),
                },
                labels,
            })
        }
        "closed" => Some(DeliveryAction::CloseTask {
            task_id: issue.number,
            repo_full_name: repository.full_name,
        }),
        other => {
            tracing::debug!(action = %other, "issue action outside the ledger state machine");
            None
        }
    }
}
