//! ca-ml - Customer analytics service
//!
//! Serves segmentation, purchase probability and churn risk over HTTP
//! (default port 8001) and runs scheduled retraining and prediction
//! refreshes in the background.

use anyhow::{Context, Result};
use ca_common::config::{resolve_root_folder, RootFolder, TomlConfig, ROOT_FOLDER_ENV};
use ca_common::db::init_database;
use ca_ml::models::{ModelStore, SharedModels};
use ca_ml::scheduler::Scheduler;
use ca_ml::AppState;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for ca-ml
#[derive(Parser, Debug)]
#[command(name = "ca-ml")]
#[command(about = "Customer analytics ML service")]
#[command(version)]
struct Args {
    /// Root folder holding the database and model files
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Address to bind (overrides config file)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config file)
    #[arg(short, long, env = "CA_ML_PORT")]
    port: Option<u16>,

    /// Do not start the background scheduler
    #[arg(long)]
    no_scheduler: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml = TomlConfig::load();

    let default_level = toml.logging.level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.into()))
        .init();

    info!(
        "Starting ca-ml (Customer Analytics) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    // Step 1: Resolve and prepare the root folder
    let root = RootFolder::new(resolve_root_folder(
        args.root_folder.as_deref(),
        ROOT_FOLDER_ENV,
        &toml,
    ));
    root.ensure_directories()
        .with_context(|| format!("Failed to initialize root folder {}", root.path().display()))?;
    info!("Root folder: {}", root.path().display());

    // Step 2: Open or create the database
    let db_path = root.database_path();
    info!("Database: {}", db_path.display());
    let db = init_database(&db_path)
        .await
        .context("Failed to open database")?;

    // Step 3: Load the persisted model bundle, if any
    let store = ModelStore::new(&root);
    let bundle = match store.load().await {
        Ok(Some(bundle)) => {
            info!("Loaded model {}", bundle.model_version);
            Some(Arc::new(bundle))
        }
        Ok(None) => {
            warn!("No trained model found; train via POST /api/models/train");
            None
        }
        Err(e) => {
            warn!("Ignoring unreadable model bundle: {}", e);
            None
        }
    };
    let models: SharedModels = Arc::new(RwLock::new(bundle));

    // Step 4: Scheduler
    let scheduler = Scheduler::new(db.clone(), store.clone(), models.clone())
        .await
        .context("Failed to initialize scheduler")?;
    if args.no_scheduler {
        info!("Background scheduler disabled");
    } else {
        scheduler.start();
    }

    // Step 5: HTTP server
    let state = AppState::new(db, store, models, scheduler.clone());
    let app = ca_ml::build_router(state);

    let host = args.host.unwrap_or(toml.host);
    let port = args.port.unwrap_or(toml.port);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    scheduler.stop();
    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
