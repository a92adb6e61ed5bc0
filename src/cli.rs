// CLI module - command-line argument parsing and handlers
//
// Subcommands:
// - run: execute the full classification pipeline
// - validate: run data quality checks, print a JSON report
// - status: population overview and recent pipeline runs
// - seed-demo: load a deterministic demo population
// - config --show/--reset/--path: configuration management

use anyhow::Result;
use clap::{Parser, Subcommand};
use segmentry::config::{Config, VERSION};
use segmentry::demo;
use segmentry::engine::{validation, Engine};
use segmentry::model::CheckStatus;
use segmentry::store::report::ReportQuery;
use segmentry::store::Store;
use std::io::Write;
use std::path::PathBuf;

/// Segmentry - customer classification engine
#[derive(Parser)]
#[command(name = "segmentry")]
#[command(version = VERSION)]
#[command(about = "Customer classification engine", long_about = None)]
pub struct Cli {
    /// Override the database path (env: SEGMENTRY_DB)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full classification pipeline
    Run,

    /// Run the data quality checks and print a JSON report
    Validate,

    /// Show the classified population and recent pipeline runs
    Status,

    /// Seed a deterministic demo population into the database
    SeedDemo {
        /// Number of demo customers to generate
        #[arg(long, default_value_t = 200)]
        customers: usize,
    },

    /// Manage configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Reset config file to defaults
        #[arg(long)]
        reset: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },
}

/// Dispatch a parsed command against the effective configuration
pub fn run(cli: Cli, mut config: Config) -> Result<()> {
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    match cli.command {
        Commands::Run => handle_run(&config),
        Commands::Validate => handle_validate(&config),
        Commands::Status => handle_status(&config),
        Commands::SeedDemo { customers } => handle_seed_demo(&config, customers),
        Commands::Config { show, reset, path } => {
            handle_config(show, reset, path);
            Ok(())
        }
    }
}

fn handle_run(config: &Config) -> Result<()> {
    let store = Store::open(&config.db_path)?;
    let engine = Engine::new(store);
    let outcome = engine.run_classification(chrono::Utc::now())?;
    println!(
        "Classified {} customers in {:.2}s",
        outcome.processed_count, outcome.duration_seconds
    );
    Ok(())
}

fn handle_validate(config: &Config) -> Result<()> {
    // Open the write side first so migrations run, then query through
    // the read pool like any other reporting consumer would
    let _store = Store::open(&config.db_path)?;
    let query = ReportQuery::new(&config.db_path)?;
    let conn = query.conn()?;
    let report = validation::run_checks(&conn)?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.overall_status == CheckStatus::Fail {
        std::process::exit(1);
    }
    Ok(())
}

fn handle_status(config: &Config) -> Result<()> {
    let _store = Store::open(&config.db_path)?;
    let query = ReportQuery::new(&config.db_path)?;

    let overview = query.population_overview()?;
    println!("Database: {}", config.db_path.display());
    println!(
        "Customers: {} ({} with features)",
        overview.customers, overview.features.covered
    );
    if let Some(last_run) = &overview.last_run_at {
        println!("Last completed run: {last_run}");
    } else {
        println!("Last completed run: never");
    }

    if !overview.lifecycles.is_empty() {
        println!();
        println!("Lifecycle:");
        for entry in &overview.lifecycles {
            println!("  {:<10} {}", entry.lifecycle, entry.customers);
        }
    }

    if !overview.tiers.is_empty() {
        println!();
        println!("Pyramid:");
        for entry in &overview.tiers {
            println!(
                "  {:<10} {} (avg composite {:.2})",
                entry.tier, entry.customers, entry.avg_composite
            );
        }
        println!(
            "  {:<10} {} salvageable, {} transient",
            "Dormant", overview.dormant_salvageable, overview.dormant_transient
        );
    }

    let runs = query.recent_runs(10)?;
    if !runs.is_empty() {
        println!();
        println!("Recent stages:");
        for run in runs {
            match run.error {
                Some(error) => println!("  {:<12} {:<10} {}", run.stage, run.status, error),
                None => println!(
                    "  {:<12} {:<10} processed {} skipped {}",
                    run.stage, run.status, run.processed, run.skipped
                ),
            }
        }
    }
    Ok(())
}

fn handle_seed_demo(config: &Config, customers: usize) -> Result<()> {
    let store = Store::open(&config.db_path)?;
    let seeded = demo::seed(&store, customers, chrono::Utc::now())?;
    println!(
        "Seeded {} demo customers into {}",
        seeded,
        config.db_path.display()
    );
    Ok(())
}

fn handle_config(show: bool, reset: bool, path: bool) {
    if path {
        handle_config_path();
    } else if show {
        handle_config_show();
    } else if reset {
        handle_config_reset();
    } else {
        // No flag provided, show help
        println!("Usage: segmentry config [--show|--reset|--path]");
        println!();
        println!("Options:");
        println!("  --show    Display effective configuration");
        println!("  --reset   Reset config file to defaults");
        println!("  --path    Show config file path");
    }
}

fn handle_config_path() {
    match Config::config_path() {
        Some(path) => println!("{}", path.display()),
        None => {
            eprintln!("Error: Could not determine config path");
            std::process::exit(1);
        }
    }
}

fn handle_config_show() {
    let config = Config::from_env();

    println!("# Effective configuration (env > file > defaults)");
    println!();
    println!("db_path = {:?}", config.db_path.display().to_string());
    println!();
    println!("[logging]");
    println!("level = {:?}", config.logging.level);
    println!("file_enabled = {}", config.logging.file_enabled);
    println!("file_dir = {:?}", config.logging.file_dir.display().to_string());

    // Show source info
    println!();
    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("# Source: {}", path.display());
        } else {
            println!("# Source: defaults (no config file)");
        }
    }
}

fn handle_config_reset() {
    let Some(path) = Config::config_path() else {
        eprintln!("Error: Could not determine config path");
        std::process::exit(1);
    };

    // Confirm if file exists
    if path.exists() {
        eprint!(
            "Config file exists at {}. Overwrite? [y/N] ",
            path.display()
        );
        let _ = std::io::stderr().flush();

        let mut input = String::new();
        if std::io::stdin().read_line(&mut input).is_err() {
            eprintln!("Aborted.");
            return;
        }

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return;
        }
    }

    // Create parent directory
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!("Error creating directory: {}", e);
            std::process::exit(1);
        }
    }

    // Write the default config (using Config's single source of truth)
    if let Err(e) = std::fs::write(&path, Config::default().to_toml()) {
        eprintln!("Error writing config: {}", e);
        std::process::exit(1);
    }

    println!("Config reset to defaults: {}", path.display());
}
