//! # intake
//!
//! Command-line entry point. Owns the process lifecycle: loads configuration,
//! installs logging, opens the connection pool, runs one operation, prints the
//! result as JSON and closes the pool.

mod config;
mod logger;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use intake_core::{ErrorKind, IntakeError, IntakeService, ListRequest, DEFAULT_PAGE_SIZE};
use intake_postgres::PgReceptionStore;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::config::IntakeConfig;

#[derive(Debug, Parser)]
#[command(name = "intake")]
#[command(about = "Pickup-point reception management")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Enable verbose output")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create tables and indexes
    Migrate,

    /// Register a pickup point
    CreateSite {
        #[arg(long)]
        name: String,
        #[arg(long, env = "INTAKE_ROLE")]
        role: String,
    },

    /// Open a reception at a site
    Open {
        #[arg(long)]
        site: Uuid,
        #[arg(long, env = "INTAKE_ROLE")]
        role: String,
    },

    /// Close the site's reception in progress
    Close {
        #[arg(long)]
        site: Uuid,
        #[arg(long, env = "INTAKE_ROLE")]
        role: String,
    },

    /// Add an item to the site's reception in progress
    AddItem {
        #[arg(long)]
        site: Uuid,
        #[arg(long = "type")]
        item_type: String,
        #[arg(long, env = "INTAKE_ROLE")]
        role: String,
    },

    /// Remove the most recently added item
    PopItem {
        #[arg(long)]
        site: Uuid,
        #[arg(long, env = "INTAKE_ROLE")]
        role: String,
    },

    /// List sites with their receptions and items
    List {
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: i64,
        /// RFC 3339 lower bound on reception creation time
        #[arg(long)]
        start: Option<DateTime<Utc>>,
        /// RFC 3339 upper bound on reception creation time
        #[arg(long)]
        end: Option<DateTime<Utc>>,
        #[arg(long, env = "INTAKE_ROLE")]
        role: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match IntakeConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err:#}");
            return ExitCode::from(2);
        }
    };
    logger::init_logger(&config.logging, cli.verbose);

    match run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = match err.downcast_ref::<IntakeError>() {
                Some(intake) => exit_code(intake.kind()),
                None => 1,
            };
            tracing::error!(error = %format!("{err:#}"), "command failed");
            eprintln!("{err:#}");
            ExitCode::from(code)
        }
    }
}

async fn run(command: Command, config: &IntakeConfig) -> Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.acquire_timeout())
        .connect(&config.database.url)
        .await
        .context("failed to connect to database")?;
    tracing::debug!(max_connections = config.database.max_connections, "pool opened");

    let store = PgReceptionStore::new(pool.clone());
    let service = IntakeService::new(store).with_config(config.service_config());

    let outcome = execute(command, &service).await;

    pool.close().await;
    tracing::debug!("pool closed");
    outcome
}

async fn execute(command: Command, service: &IntakeService<PgReceptionStore>) -> Result<()> {
    match command {
        Command::Migrate => {
            service.store().migrate().await?;
            tracing::info!("schema is up to date");
            Ok(())
        }
        Command::CreateSite { name, role } => print(&service.create_site(&role, &name).await?),
        Command::Open { site, role } => print(&service.open_session(&role, site).await?),
        Command::Close { site, role } => print(&service.close_session(&role, site).await?),
        Command::AddItem {
            site,
            item_type,
            role,
        } => print(&service.append_item(&role, site, &item_type).await?),
        Command::PopItem { site, role } => {
            service.pop_last_item(&role, site).await?;
            print(&serde_json::json!({ "removed": true }))
        }
        Command::List {
            page,
            page_size,
            start,
            end,
            role,
        } => {
            let request = ListRequest::new(page, page_size).between(start, end);
            print(&service.list_sites(&role, request).await?)
        }
    }
}

fn print(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::InvalidInput => 2,
        ErrorKind::AccessDenied => 3,
        ErrorKind::SiteNotFound => 4,
        ErrorKind::ActiveSessionExists | ErrorKind::NoActiveSession | ErrorKind::EmptySession => 5,
        ErrorKind::Conflict => 6,
        ErrorKind::DeadlineExceeded => 7,
        ErrorKind::Infrastructure => 10,
    }
}
