//! Crawlpool main entry point
//!
//! This is the command-line interface for the crawlpool pipeline.

use clap::Parser;
use crawlpool::config::{load_config_with_hash, Config, StorageConfig};
use crawlpool::crawler::run_crawl;
use crawlpool::storage::open_storage;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Crawlpool: a threaded feeder → parser → downloader crawler
///
/// Crawlpool feeds seed pages to a pool of parser threads, extracts file
/// links from them and downloads the files into a directory or a SQLite
/// database.
#[derive(Parser, Debug)]
#[command(name = "crawlpool")]
#[command(version)]
#[command(about = "A threaded crawling pipeline", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show what the configured storage holds and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.dry_run {
        handle_dry_run(&config)?;
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_crawl(&config)?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("crawlpool=info,warn"),
            1 => EnvFilter::new("crawlpool=debug,info"),
            2 => EnvFilter::new("crawlpool=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    // worker threads are named feeder-001, parser-002, ...
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .with_file(false)
        .init();
}

fn describe_storage(storage: &StorageConfig) -> String {
    match storage {
        StorageConfig::FileSystem { root_dir } => format!("filesystem at {}", root_dir.display()),
        StorageConfig::Sqlite { path } => format!("sqlite at {}", path.display()),
    }
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Crawlpool Dry Run ===\n");

    println!("Threads:");
    println!("  Feeder: {}", config.feeder.threads);
    println!("  Parser: {}", config.parser.threads);
    println!("  Downloader: {}", config.downloader.threads);

    println!("\nStorage: {}", describe_storage(&config.storage));

    println!("\nSeeds:");
    match &config.feeder.template {
        Some(template) => {
            println!("  Template: {}", template);
            println!("  Keyword: {}", config.feeder.keyword);
            println!(
                "  Offsets: {}..{} step {}",
                config.feeder.offset,
                config.feeder.offset + config.feeder.max_num,
                config.feeder.page_step
            );
        }
        None => {
            for url in &config.feeder.urls {
                println!("  * {}", url);
            }
            if let Some(path) = &config.feeder.url_file {
                println!("  + every line of {}", path.display());
            }
        }
    }

    println!("\nParser:");
    println!("  Request timeout: {}s", config.parser.req_timeout);
    println!("  Max retry: {}", config.parser.max_retry);
    if !config.parser.extra.is_empty() {
        println!("  Extractor options: {}", config.parser.extra);
    }

    println!("\nDownloader:");
    if config.downloader.max_num == 0 {
        println!("  Max files: unlimited");
    } else {
        println!("  Max files: {}", config.downloader.max_num);
    }
    println!("  File index offset: {}", config.downloader.file_idx_offset);
    println!("  Overwrite: {}", config.downloader.overwrite);

    println!("\n✓ Configuration is valid");

    Ok(())
}

/// Handles the --stats mode: shows what the storage already holds
fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let storage = open_storage(&config.storage)?;

    println!("Storage: {}\n", storage.describe());
    println!("  Files: {}", storage.count()?);
    println!("  Highest file index: {}", storage.max_file_idx()?);

    Ok(())
}

/// Handles the main crawl operation
fn handle_crawl(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        "Threads: {} feeder, {} parser, {} downloader",
        config.feeder.threads,
        config.parser.threads,
        config.downloader.threads
    );

    match run_crawl(config) {
        Ok(()) => {
            tracing::info!("Crawl completed successfully");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
