use std::{path::PathBuf, time::Duration};

use change_reaper::{
    config::{self, ReaperConfig},
    db::{self, ChangeStreamsParameter},
    observability,
    retention::{ExpiredChangeRemover, RemoverContext},
};
use chrono::{DateTime, Utc};
use clap::Parser;
use tokio_util::sync::CancellationToken;

/// How long shutdown waits for an in-progress sweep to wind down.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// CLI arguments for the change reaper
#[derive(Parser, Debug)]
#[command(version, about = "Expired change remover for per-tenant change collections", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (built-in defaults are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run the expired change remover until interrupted (default)
    Run,
    /// Run a single sweep over all tenants and print the result as JSON
    Sweep {
        /// Wall time to compute the cutoff from instead of the system clock (RFC 3339)
        #[arg(long)]
        now: Option<DateTime<Utc>>,
        /// Count expired documents without deleting them
        #[arg(long)]
        dry_run: bool,
    },
    /// Set the change streams retention window
    ///
    /// Omit the value to unset it. Zero or negative values disable expiry.
    SetParameter {
        #[arg(long, allow_negative_numbers = true)]
        expire_after_seconds: Option<i64>,
    },
    /// Validate the config file and print the effective configuration
    ConfigCheck,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = load_config(args.config.as_ref());

    match args.command {
        Some(Command::Sweep { now, dry_run }) => {
            run_sweep(config, now, dry_run).await;
        }
        Some(Command::SetParameter {
            expire_after_seconds,
        }) => {
            run_set_parameter(config, expire_after_seconds).await;
        }
        Some(Command::ConfigCheck) => {
            run_config_check(&config);
        }
        Some(Command::Run) | None => {
            run_remover(config).await;
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> ReaperConfig {
    let Some(path) = path else {
        return ReaperConfig::default();
    };

    match ReaperConfig::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn init_tracing(config: &ReaperConfig) {
    if let Err(e) = observability::init_tracing(&config.observability.logging) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Connect to the configured database, running migrations if enabled.
async fn connect_database(database: &config::DatabaseConfig) -> db::DbPool {
    if database.is_none() {
        eprintln!("Error: Database is not configured. Add a [database] section to the config file.");
        std::process::exit(1);
    }

    let pool = match db::DbPool::from_config(database).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            eprintln!("Error: Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if database.run_migrations()
        && let Err(e) = pool.run_migrations().await
    {
        tracing::error!(error = %e, "Database migrations failed");
        eprintln!("Error: Database migrations failed: {}", e);
        std::process::exit(1);
    }

    pool
}

/// Run the remover loop until Ctrl+C or SIGTERM.
async fn run_remover(config: ReaperConfig) {
    init_tracing(&config);

    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::error!(error = %e, "Failed to initialize metrics");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let db = connect_database(&config.database).await;

    if !config.remover.enabled {
        tracing::warn!("Expired change remover is disabled in config, no sweeps will run");
    }

    let handle = ExpiredChangeRemover::new(RemoverContext::from_db(&db), config.remover)
        .spawn(CancellationToken::new());

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, stopping expired change remover...");

    handle.shutdown();
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle.join()).await {
        Ok(Ok(())) => tracing::info!("Shutdown complete"),
        Ok(Err(e)) => tracing::error!(error = %e, "Expired change remover task failed"),
        Err(_) => tracing::warn!("Timeout waiting for expired change remover to stop"),
    }
}

/// Run one sweep and print its result.
async fn run_sweep(config: ReaperConfig, now: Option<DateTime<Utc>>, dry_run: bool) {
    init_tracing(&config);
    let db = connect_database(&config.database).await;

    let mut remover_config = config.remover;
    remover_config.dry_run |= dry_run;

    let remover = ExpiredChangeRemover::new(RemoverContext::from_db(&db), remover_config);
    if let Some(now) = now {
        remover.fail_points().inject_current_wall_time.enable_with(now);
    }

    match remover.run_sweep(&CancellationToken::new()).await {
        Ok(result) => match serde_json::to_string_pretty(&result) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: Failed to serialize sweep result: {}", e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Write the `changeStreams` cluster parameter.
async fn run_set_parameter(config: ReaperConfig, expire_after_seconds: Option<i64>) {
    init_tracing(&config);
    let db = connect_database(&config.database).await;

    let param = ChangeStreamsParameter {
        expire_after_seconds,
    };
    if let Err(e) = db.set_change_streams(&param).await {
        eprintln!("Error: Failed to set changeStreams parameter: {}", e);
        std::process::exit(1);
    }

    match expire_after_seconds {
        Some(seconds) => println!("changeStreams.expireAfterSeconds = {}", seconds),
        None => println!("changeStreams.expireAfterSeconds unset"),
    }
}

fn run_config_check(config: &ReaperConfig) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => print!("{}", rendered),
        Err(e) => {
            eprintln!("Error: Failed to render config: {}", e);
            std::process::exit(1);
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
