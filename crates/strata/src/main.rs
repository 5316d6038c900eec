//! Strata server binary: a webhook ingestion gateway over a SQLite-backed
//! activity store.

mod bootstrap_helpers;
mod cli_args;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use strata_gateway::{run_webhook_gateway, WebhookGatewayConfig};

use crate::bootstrap_helpers::{build_activity_store, init_tracing, AnnouncePrimaryPushHook};
use crate::cli_args::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run_cli(cli).await
}

async fn run_cli(cli: Cli) -> Result<()> {
    let store = build_activity_store(cli.db_path.as_deref())?;
    run_webhook_gateway(WebhookGatewayConfig {
        bind: cli.bind,
        store,
        deploy_hook: Some(Arc::new(AnnouncePrimaryPushHook)),
        source: cli.source,
        primary_branch: cli.primary_branch,
    })
    .await
}
