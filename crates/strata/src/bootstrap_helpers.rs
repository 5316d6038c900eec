use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use strata_store::{NewGitEvent, SharedActivityStore, SqliteActivityStore};
use strata_webhook::DeployHook;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

pub(crate) fn build_activity_store(
    db_path: Option<&Path>,
) -> Result<Option<SharedActivityStore>> {
    match db_path {
        Some(path) => {
            let store = SqliteActivityStore::new(path)
                .with_context(|| format!("failed to open activity store at {}", path.display()))?;
            println!("activity store ready: db_path={}", store.db_path().display());
            Ok(Some(Arc::new(store)))
        }
        None => {
            println!(
                "activity store disabled: deliveries will be acknowledged without persistence"
            );
            Ok(None)
        }
    }
}

/// Announces fresh primary-branch commits. Actual deployment triggers are
/// left to embedders of the gateway library.
pub(crate) struct AnnouncePrimaryPushHook;

#[async_trait]
impl DeployHook for AnnouncePrimaryPushHook {
    async fn handle_primary_push(&self, event: &NewGitEvent) -> Result<()> {
        tracing::info!(
            commit = %event.commit_sha,
            branch = %event.branch,
            repo = %event.repo_full_name,
            "deployable commit logged"
        );
        Ok(())
    }
}
