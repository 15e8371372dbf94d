use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use untissync::config::AppConfig;
use untissync::db::SqliteStore;
use untissync::scheduler::run_periodic_sync;
use untissync::server::create_router;
use untissync::sync::SchoolyearSyncer;
use untissync::types::AppState;
use untissync::webuntis::WebUntisClient;

#[derive(Debug, Parser)]
#[command(name = "untissync", version, about = "WebUntis school-year sync")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, env = "UNTISSYNC_CONFIG", default_value = "untissync.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server and the periodic sync job
    Serve,
    /// Sync once and print the reports as JSON
    Sync {
        /// Only sync the school with this id
        #[arg(long)]
        school: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load_from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.apply_env_overrides();

    let store = Arc::new(SqliteStore::open(&config.database_path)?);
    let client = WebUntisClient::new(&config.client)?;
    let state = Arc::new(AppState::new(
        config,
        SchoolyearSyncer::new(client, store),
    ));

    match cli.command {
        Command::Serve => serve(state).await,
        Command::Sync { school } => {
            let reports = match school {
                Some(school_id) => vec![state.sync_school(&school_id).await?],
                None => state.sync_all().await,
            };
            println!("{}", serde_json::to_string_pretty(&reports)?);

            let failed = reports.iter().filter(|r| !r.success).count();
            if failed > 0 {
                bail!("{failed} of {} school(s) failed to sync", reports.len());
            }
            Ok(())
        }
    }
}

async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    let interval_secs = state.config.sync_interval_secs;
    if interval_secs > 0 {
        tokio::spawn(run_periodic_sync(
            state.clone(),
            Duration::from_secs(interval_secs),
        ));
    } else {
        info!("Periodic sync disabled");
    }

    let address = format!("{}:{}", state.config.server.address, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;
    info!("Listening on http://{address}");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
