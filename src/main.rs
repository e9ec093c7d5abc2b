use std::{net::SocketAddr, path::PathBuf, process::ExitCode, time::Duration};

use clap::Parser;
use creditgate::{AppState, build_app, config::GatewayConfig, db::DbPool, jobs, observability};
use tokio_util::task::TaskTracker;

const DEFAULT_CONFIG_PATH: &str = "creditgate.toml";

#[derive(Parser, Debug)]
#[command(version, about = "Credit-aware streaming generation gateway", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the gateway server (default)
    Serve,
    /// Run database migrations and exit
    ///
    /// Useful for init containers and CI pipelines.
    Migrate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match GatewayConfig::from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", args.config.display());
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {e}");
        return ExitCode::FAILURE;
    }

    match args.command {
        Some(Command::Migrate) => run_migrate(&config).await,
        Some(Command::Serve) | None => run_server(config, &args.config).await,
    }
}

async fn run_migrate(config: &GatewayConfig) -> ExitCode {
    tracing::info!("Running database migrations");
    let result = match DbPool::from_config(&config.database).await {
        Ok(pool) => {
            let result = pool.run_migrations().await;
            pool.close().await;
            result
        }
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => {
            tracing::info!("Database migrations completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Database migrations failed");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(config: GatewayConfig, config_path: &std::path::Path) -> ExitCode {
    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics");
    }

    tracing::info!(config_file = %config_path.display(), "Starting creditgate");

    let state = match AppState::new(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize gateway");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        providers = state.providers.len(),
        models = state.pricing.snapshot().model_count(),
        "Gateway initialized"
    );

    // Apply database price overrides before serving, then keep them fresh.
    match jobs::refresh_pricing(&state.pricing, state.db.model_pricing().as_ref()).await {
        Ok(result) => tracing::info!(
            model_count = result.model_count,
            override_count = result.override_count,
            "Pricing catalog loaded"
        ),
        Err(e) => tracing::warn!(error = %e, "Initial pricing refresh failed, using config prices"),
    }
    let refresh_worker = tokio::spawn(jobs::start_pricing_refresh_worker(
        state.pricing.clone(),
        state.db.model_pricing(),
    ));

    let bind_addr = SocketAddr::new(config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, address = %bind_addr, "Failed to bind");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(address = %bind_addr, "Server listening");

    let task_tracker = state.task_tracker.clone();
    let db = state.db.clone();
    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    let app = build_app(&config, state);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(task_tracker, grace))
        .await;

    refresh_worker.abort();
    db.close().await;

    match served {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

/// Resolve on SIGINT or SIGTERM, then give in-flight generations `grace` to
/// settle and persist.
async fn shutdown_signal(task_tracker: TaskTracker, grace: Duration) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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

    tracing::info!(
        in_flight = task_tracker.len(),
        "Shutdown signal received, waiting for in-flight generations"
    );
    task_tracker.close();

    match tokio::time::timeout(grace, task_tracker.wait()).await {
        Ok(()) => tracing::info!("All generations completed"),
        Err(_) => tracing::warn!("Timeout waiting for generations, some may not have persisted"),
    }
}
