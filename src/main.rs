//! # speedmap CLI
//!
//! Saves traffic speed-map XML into a SQLite store. Meant to be run
//! periodically (cron or similar), one pass per invocation.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `speedmap init` | Create the store and its schema |
//! | `speedmap fetch` | Download the current snapshot and ingest it |
//! | `speedmap import <PATH>` | Ingest an XML file or every file below a directory |
//! | `speedmap stats` | Summarize the store |
//!
//! ## Examples
//!
//! ```bash
//! speedmap --db ./data/speedmap.sqlite --log ./logs/speedmap.log fetch
//! speedmap --config ./config/speedmap.toml import ./archive/2020 --keep-going
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use speedmap::config::{self, Config};
use speedmap::error::{IngestError, CONFIG_EXIT_CODE, STORE_EXIT_CODE};
use speedmap::ingest::{self, PassOptions, PassReport};
use speedmap::logging;
use speedmap::schema;
use speedmap::source::{PathSource, UrlSource};
use speedmap::stats;

/// Traffic speed-map downloader: saves XML traffic snapshots into SQLite.
#[derive(Parser)]
#[command(name = "speedmap", version, about)]
struct Cli {
    /// Path to a TOML configuration file. Flags below override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the store (SQLite database file).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Path to the log file.
    #[arg(long, global = true)]
    log: Option<PathBuf>,

    /// Size in bytes at which the log file is archived (0 disables rotation).
    #[arg(long, global = true, value_name = "NUM")]
    log_max_bytes: Option<u64>,

    /// Network request timeout in seconds.
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    /// Write debug events to the log.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store and its schema. Idempotent.
    Init,

    /// Download the snapshot from the feed URL and ingest it.
    Fetch {
        /// Feed URL (defaults to `[source].url`).
        #[arg(long)]
        url: Option<String>,
    },

    /// Ingest an XML file, or every file below a directory.
    Import {
        /// File or directory to import.
        path: PathBuf,

        /// Skip documents that fail instead of aborting the whole import.
        #[arg(long)]
        keep_going: bool,
    },

    /// Summarize what the store holds.
    Stats,
}

impl Cli {
    fn resolve_config(&self) -> Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => config::load_config(path)?,
            None => Config::default(),
        };

        if let Some(db) = &self.db {
            cfg.store.path = db.clone();
        }
        if let Some(log) = &self.log {
            cfg.log.path = Some(log.clone());
        }
        if let Some(max_bytes) = self.log_max_bytes {
            cfg.log.max_bytes = max_bytes;
        }
        if let Some(timeout) = self.timeout {
            cfg.source.timeout_secs = timeout;
        }
        if self.debug {
            cfg.log.debug = true;
        }
        match &self.command {
            Commands::Fetch { url: Some(url) } => cfg.source.url = url.clone(),
            Commands::Import {
                keep_going: true, ..
            } => cfg.import.continue_on_error = true,
            _ => {}
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let cfg = match cli.resolve_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(CONFIG_EXIT_CODE);
        }
    };

    if let Err(e) = logging::init_logging(&cfg.log) {
        eprintln!("Error: {:#}", e);
        return ExitCode::from(CONFIG_EXIT_CODE);
    }

    match run(cli.command, &cfg).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

async fn run(command: Commands, cfg: &Config) -> Result<u8> {
    match command {
        Commands::Init => {
            schema::run_init(&cfg.store.path).await?;
            println!("Store initialized: {}", cfg.store.path.display());
            Ok(0)
        }
        Commands::Fetch { .. } => {
            let source = UrlSource::new(
                cfg.source.url.clone(),
                Duration::from_secs(cfg.source.timeout_secs),
            );
            let report = ingest::run_pass(&cfg.store.path, &source, &pass_options(cfg)).await?;
            print_report("fetch", &report);
            Ok(report.exit_code())
        }
        Commands::Import { path, .. } => {
            let source = PathSource::new(path, &cfg.import)?;
            let report = ingest::run_pass(&cfg.store.path, &source, &pass_options(cfg)).await?;
            print_report("import", &report);
            Ok(report.exit_code())
        }
        Commands::Stats => {
            stats::run_stats(&cfg.store.path).await?;
            Ok(0)
        }
    }
}

fn exit_code_for(e: &anyhow::Error) -> u8 {
    if let Some(ingest) = e.downcast_ref::<IngestError>() {
        ingest.exit_code()
    } else if e.downcast_ref::<sqlx::Error>().is_some() {
        STORE_EXIT_CODE
    } else {
        CONFIG_EXIT_CODE
    }
}

fn pass_options(cfg: &Config) -> PassOptions {
    PassOptions {
        continue_on_error: cfg.import.continue_on_error,
    }
}

fn print_report(label: &str, report: &PassReport) {
    println!("{}", label);
    println!(
        "  documents: {}/{}",
        report.documents_ingested, report.documents_seen
    );
    println!("  records: {}", report.totals.records);
    println!("  links inserted: {}", report.totals.links_inserted);
    println!("  captures inserted: {}", report.totals.captures_inserted);
    println!("  duplicate captures: {}", report.totals.duplicate_captures);
    for failure in &report.failures {
        println!("  failed: {}: {}", failure.origin, failure.error);
    }
    if report.failures.is_empty() {
        println!("ok");
    }
}
