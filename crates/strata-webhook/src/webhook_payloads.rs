//! Serde views of the webhook payload shapes the dispatcher reads.
//!
//! Only the fields the handlers consume are declared; unknown fields are
//! ignored so provider-side payload growth never breaks parsing.

use serde::Deserialize;
use serde_json::Value;

/// Repository block carried by most GitHub-shaped payloads.
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryPayload {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub private: bool,
}

/// Issue block of an `issues` event.
#[derive(Debug, Clone, Deserialize)]
pub struct IssuePayload {
    pub number: i64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub assignee: Option<AssigneePayload>,
    #[serde(default)]
    pub labels: Vec<LabelPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssigneePayload {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelPayload {
    pub name: String,
    #[serde(default)]
    pub color: String,
}

/// Top-level shape of an `issues` event.
#[derive(Debug, Clone, Deserialize)]
pub struct IssuesEventPayload {
    pub action: String,
    #[serde(default)]
    pub issue: Option<IssuePayload>,
}

/// Top-level shape of a `push` event.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEventPayload {
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub head_commit: Option<HeadCommitPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeadCommitPayload {
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author: CommitAuthorPayload,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommitAuthorPayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// Pull the repository block out of an arbitrary payload. A missing or
/// incomplete block is treated as absent rather than an error.
pub fn repository_from_payload(payload: &Value) -> Option<RepositoryPayload> {
    payload
        .get("repository")
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}

/// Derive the branch name from a raw git ref, e.g. `refs/heads/main` -> `main`.
pub fn branch_from_ref(git_ref: &str) -> &str {
    git_ref.strip_prefix("refs/heads/").unwrap_or(git_ref)
}
