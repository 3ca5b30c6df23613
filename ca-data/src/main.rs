//! ca-data - Synthetic data generator and data validator
//!
//! Works on the same root folder and database as ca-ml.

use anyhow::{Context, Result};
use ca_common::config::{resolve_root_folder, RootFolder, TomlConfig, ROOT_FOLDER_ENV};
use ca_common::db::init_database;
use ca_common::time::now;
use ca_data::generate::{generate, GenerateOptions};
use ca_data::validate::validate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ca-data")]
#[command(about = "Generate and validate customer analytics data")]
#[command(version)]
struct Cli {
    /// Root folder holding the database
    #[arg(long, global = true)]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replace the database contents with synthetic users, products and events
    Generate {
        #[arg(long, default_value_t = 1000)]
        users: usize,
        #[arg(long, default_value_t = 150)]
        products: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Spread registrations over this many days (at most 36500)
        #[arg(long, default_value_t = 730)]
        days: i64,
        /// Keep existing rows instead of clearing them first
        #[arg(long)]
        append: bool,
    },
    /// Check consistency and quality; exits non-zero on errors
    Validate {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let toml = TomlConfig::load();

    let default_level = toml.logging.level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.into()))
        .with_writer(std::io::stderr)
        .init();

    info!(
        "ca-data v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let root = RootFolder::new(resolve_root_folder(
        cli.root_folder.as_deref(),
        ROOT_FOLDER_ENV,
        &toml,
    ));
    root.ensure_directories()
        .with_context(|| format!("Failed to initialize root folder {}", root.path().display()))?;
    let pool = init_database(&root.database_path())
        .await
        .context("Failed to open database")?;

    match cli.command {
        Command::Generate {
            users,
            products,
            seed,
            days,
            append,
        } => {
            let options = GenerateOptions {
                users,
                products,
                seed,
                days,
                clear_existing: !append,
            };
            let summary = generate(&pool, &options).await?;

            println!("Generated data in {} ms", summary.duration_ms);
            println!("  users:    {} ({} active)", summary.users, summary.active_users);
            println!("  products: {}", summary.products);
            println!("  events:   {}", summary.events);
            for (kind, count) in &summary.events_by_type {
                println!("    {:<14} {}", kind, count);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate { json } => {
            let report = validate(&pool, now()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render_text());
            }

            if report.has_errors() {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}
