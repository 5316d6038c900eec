use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "strata",
    about = "Webhook ingestion gateway with a SQLite-backed activity store",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "STRATA_BIND",
        default_value = "127.0.0.1:8787",
        help = "Socket address the webhook gateway listens on"
    )]
    pub bind: String,

    #[arg(
        long = "db-path",
        env = "STRATA_DB_PATH",
        help = "SQLite database path for the activity store; omit to acknowledge deliveries without persistence"
    )]
    pub db_path: Option<PathBuf>,

    #[arg(
        long,
        env = "STRATA_SOURCE",
        default_value = "github",
        help = "Source label recorded with every stored webhook event"
    )]
    pub source: String,

    #[arg(
        long = "primary-branch",
        env = "STRATA_PRIMARY_BRANCH",
        default_value = "main",
        help = "Branch whose fresh commits are announced through the deploy hook"
    )]
    pub primary_branch: String,
}
