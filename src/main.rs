// Segmentry - customer classification engine for a tire service business
//
// Batch pipeline over a SQLite database: aggregates booking history into
// per-customer feature records, classifies lifecycle stages, scores a
// population-relative value tier and assigns segment-aware pyramid tiers.
//
// Architecture:
// - Store (rusqlite): single-writer WAL database with versioned schema
// - Engine: sequential classification stages, tracked in run_log
// - ReportQuery (r2d2): pooled read-only access for status/validation
// - CLI (clap): run / validate / status / seed-demo / config

mod cli;

use anyhow::Result;
use clap::Parser;
use segmentry::config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<()> {
    let args = cli::Cli::parse();

    // Ensure config template exists (helps users discover options)
    Config::ensure_config_exists();

    let config = Config::from_env();

    // Initialize tracing: stderr always, JSON file layer when enabled.
    // Precedence: RUST_LOG env var > config file > default "info"
    let default_filter = format!("segmentry={}", config.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    // The guard must be kept alive for the duration of the program to
    // ensure buffered file logs flush
    let _file_guard: Option<tracing_appender::non_blocking::WorkerGuard> =
        if config.logging.file_enabled {
            if let Err(e) = std::fs::create_dir_all(&config.logging.file_dir) {
                eprintln!(
                    "Warning: Could not create log directory {:?}: {}",
                    config.logging.file_dir, e
                );
                tracing_subscriber::registry()
                    .with(filter)
                    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                    .init();
                None
            } else {
                let file_appender =
                    tracing_appender::rolling::daily(&config.logging.file_dir, "segmentry.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                tracing_subscriber::registry()
                    .with(filter)
                    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(non_blocking)
                            .with_ansi(false),
                    )
                    .init();
                Some(guard)
            }
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
            None
        };

    cli::run(args, config)
}
