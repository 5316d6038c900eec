//! Webhook gateway server state, handlers and router wiring.
//!
//! The gateway exposes one ingestion endpoint for provider deliveries plus a
//! small read surface over the activity store. It runs with or without a
//! configured store: ingestion always acknowledges, while the read endpoints
//! report the store as unavailable.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use strata_store::{
    ActivityStore, EventTypeCount, GitEventRecord, SharedActivityStore, StoreResult, TaskState,
};
use strata_webhook::{
    DeployHook, DispatchError, WebhookDelivery, WebhookDispatcher, WebhookDispatcherConfig,
};
use tokio::net::TcpListener;

mod server_bootstrap;
mod types;

use types::GatewayApiError;

pub use server_bootstrap::{build_webhook_gateway_router, run_webhook_gateway};
pub use types::ActivitySnapshot;

const SERVICE_NAME: &str = "strata";
const GITHUB_WEBHOOK_ENDPOINT: &str = "/api/github/webhook";
const HEALTH_ENDPOINT: &str = "/";
const ACTIVITY_ENDPOINT: &str = "/api/activity";
const TASKS_ENDPOINT: &str = "/api/tasks";
const GITHUB_EVENT_HEADER: &str = "x-github-event";
const GITHUB_DELIVERY_HEADER: &str = "x-github-delivery";
const RECENT_GIT_EVENTS_LIMIT: u32 = 10;

/// Configuration for [`run_webhook_gateway`].
#[derive(Clone)]
pub struct WebhookGatewayConfig {
    pub bind: String,
    pub store: Option<SharedActivityStore>,
    pub deploy_hook: Option<Arc<dyn DeployHook>>,
    pub source: String,
    pub primary_branch: String,
}

/// Shared state behind every gateway handler.
pub struct WebhookGatewayState {
    dispatcher: WebhookDispatcher,
}

impl WebhookGatewayState {
    pub fn new(config: WebhookGatewayConfig) -> Self {
        let dispatcher = WebhookDispatcher::new(WebhookDispatcherConfig {
            store: config.store,
            deploy_hook: config.deploy_hook,
            source: config.source,
            primary_branch: config.primary_branch,
        });
        Self { dispatcher }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn handle_github_webhook(
    State(state): State<Arc<WebhookGatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let event_type = header_value(&headers, GITHUB_EVENT_HEADER);
    let delivery_id = header_value(&headers, GITHUB_DELIVERY_HEADER);
    let delivery = WebhookDelivery {
        event_type: event_type.clone(),
        delivery_id: delivery_id.clone(),
        body: body.to_vec(),
    };
    match state.dispatcher.dispatch(delivery).await {
        Ok(outcome) => Json(outcome.ack).into_response(),
        Err(DispatchError::MissingEventType) => {
            tracing::warn!(
                event_type = ?event_type,
                delivery_id = ?delivery_id,
                "webhook delivery rejected without an event type header"
            );
            GatewayApiError::bad_request("missing X-GitHub-Event header").into_response()
        }
        Err(DispatchError::MalformedPayload(error)) => {
            tracing::warn!(
                event_type = ?event_type,
                delivery_id = ?delivery_id,
                error = %error,
                "webhook delivery rejected with a malformed body"
            );
            GatewayApiError::bad_request(format!("request body is not valid JSON: {error}"))
                .into_response()
        }
        Err(DispatchError::Store(error)) => {
            tracing::error!(
                event_type = ?event_type,
                delivery_id = ?delivery_id,
                error = %error,
                "failed to persist webhook delivery"
            );
            GatewayApiError::internal("failed to persist webhook delivery").into_response()
        }
    }
}

async fn handle_health(State(state): State<Arc<WebhookGatewayState>>) -> Response {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "store_configured": state.dispatcher.has_store(),
    }))
    .into_response()
}

async fn collect_activity_snapshot(store: &dyn ActivityStore) -> StoreResult<ActivitySnapshot> {
    Ok(ActivitySnapshot {
        repositories: store.count_repositories().await?,
        open_tasks: store.count_open_tasks().await?,
        webhook_events: store.count_webhook_events().await?,
        event_types: store.webhook_event_type_counts().await?,
        recent_git_events: store.recent_git_events(RECENT_GIT_EVENTS_LIMIT).await?,
    })
}

async fn handle_activity(State(state): State<Arc<WebhookGatewayState>>) -> Response {
    let Some(store) = state.dispatcher.store() else {
        return GatewayApiError::store_unavailable().into_response();
    };
    match collect_activity_snapshot(store.as_ref()).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(error) => {
            tracing::error!(error = %error, "failed to collect activity snapshot");
            GatewayApiError::internal("failed to collect activity snapshot").into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct TasksQuery {
    state: Option<String>,
}

async fn handle_tasks(
    State(state): State<Arc<WebhookGatewayState>>,
    Query(query): Query<TasksQuery>,
) -> Response {
    let Some(store) = state.dispatcher.store() else {
        return GatewayApiError::store_unavailable().into_response();
    };
    let filter = match query.state.as_deref() {
        None => None,
        Some(value) => match TaskState::parse(value) {
            Some(parsed) => Some(parsed),
            None => {
                return GatewayApiError::bad_request(format!(
                    "unknown task state '{value}', expected 'open' or 'closed'"
                ))
                .into_response();
            }
        },
    };
    match store.list_tasks(filter).await {
        Ok(tasks) => Json(json!({ "tasks": tasks })).into_response(),
        Err(error) => {
            tracing::error!(error = %error, "failed to list tasks");
            GatewayApiError::internal("failed to list tasks").into_response()
        }
    }
}

async fn handle_not_found() -> Response {
    GatewayApiError::not_found(format!(
        "no route for this path; available endpoints: {HEALTH_ENDPOINT}, {ACTIVITY_ENDPOINT}, \
         {TASKS_ENDPOINT}, {GITHUB_WEBHOOK_ENDPOINT}"
    ))
    .into_response()
}
