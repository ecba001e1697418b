//! Crawlpool: a three-stage threaded crawling pipeline
//!
//! This crate moves work through a feeder, a parser and a downloader pool.
//! Each pool is a fixed set of OS threads sharing one bounded input queue;
//! pools are chained so that one pool's output is the next pool's input.
//! Stages coordinate only through the queues and a small set of atomic
//! signals, and shutdown is cooperative.

pub mod config;
pub mod crawler;
pub mod pool;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Crawlpool operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] pool::PoolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Crawler, Emitted, Extractor, Response, Task, Transport};
pub use pool::{Stage, Worker, WorkerPool, WorkQueue};
pub use state::{Signal, Signals};
