use std::path::PathBuf;
use std::sync::Arc;

use alertwatch_common::{load_config, AppConfig, FileConfig};
use alertwatch_scout::notify::{NoopBackend, NotifyBackend, NotifyRouter};
use alertwatch_scout::scheduling::Scheduler;
use alertwatch_scout::source::GovUkSource;
use alertwatch_scout::{CoordinatorError, ScoutDeps};
use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "alertwatch", about = "MHRA safety alert monitor")]
struct Cli {
    /// Path to config TOML file
    #[arg(long, default_value = "./config/alertwatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until Ctrl-C
    Run,
    /// Run one incremental poll
    Poll,
    /// Ingest historical alerts, resuming any interrupted run
    Backfill {
        /// How many years back to start from (defaults to the configured span)
        #[arg(long)]
        years: Option<i64>,
        /// Discard the saved cursor and start over
        #[arg(long)]
        restart: bool,
    },
    /// List overdue alerts and send the overdue digest
    Overdue,
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let file_config = if cli.config.exists() {
        info!(config = %cli.config.display(), "Loading config");
        load_config(&cli.config)?
    } else {
        warn!(config = %cli.config.display(), "Config file not found, using defaults");
        FileConfig::default()
    };

    let config = AppConfig::from_env()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(8)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    alertwatch_store::migrate(&pool).await?;
    info!("Migrations complete");

    if matches!(cli.command, Command::Migrate) {
        return Ok(());
    }

    // Teams if configured, otherwise Noop
    let backend: Arc<dyn NotifyBackend> = match NotifyRouter::from_config(&config)? {
        Some(router) => {
            info!("Teams notifications enabled");
            Arc::new(router)
        }
        None => {
            info!("No TEAMS_WEBHOOK_URL set, notifications disabled");
            Arc::new(NoopBackend)
        }
    };

    let source = Arc::new(GovUkSource::from_config(&file_config.source)?);
    let deps = ScoutDeps::from_pool(pool, source, backend, file_config.clone());
    let coordinator = Arc::new(deps.coordinator());
    let reports = Arc::new(deps.reports());

    match cli.command {
        Command::Run => {
            Scheduler::new(coordinator, reports, file_config.schedule.clone())
                .run()
                .await?;
        }
        Command::Poll => match coordinator.poll(Utc::now()).await {
            Ok(stats) => info!("{stats}"),
            Err(CoordinatorError::Failed(e)) => {
                reports.report_error("Poll cycle", &e).await;
                return Err(e);
            }
            Err(e) => return Err(e.into()),
        },
        Command::Backfill { years, restart } => {
            let years = years.unwrap_or(file_config.schedule.backfill_years);
            let stats = coordinator.backfill(years, restart, Utc::now()).await?;
            info!("{stats}");
        }
        Command::Overdue => {
            let now = Utc::now();
            for alert in reports.overdue(now).await? {
                info!(
                    reference = %alert.reference,
                    priority = %alert.classification.priority,
                    status = %alert.status(),
                    created_at = %alert.created_at,
                    title = %alert.content.title,
                    "Overdue alert"
                );
            }
            let sent = reports.send_overdue_digest(now).await?;
            info!(count = sent, "Overdue check complete");
        }
        Command::Migrate => {}
    }

    Ok(())
}
