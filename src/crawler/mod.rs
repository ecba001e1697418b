//! Crawler module: the three pipeline stages and their orchestration
//!
//! This module contains the crawling logic, including:
//! - Seed feeding (`feeder`)
//! - Page fetching and item extraction (`parser`, `extract`)
//! - File downloading into storage (`downloader`)
//! - The shared HTTP transport (`fetcher`)
//! - Overall crawl coordination (`coordinator`)

mod coordinator;
mod downloader;
mod extract;
mod feeder;
mod fetcher;
mod parser;

pub use coordinator::{build_crawler, run_crawl, Crawler, DefaultCrawler, Threads};
pub use downloader::{DownloadRecord, Downloader, DownloaderOptions, FileIdxOffset};
pub use extract::{
    Emitted, Extractor, LinkExtractor, LinkOptions, Locator, Task, DEFAULT_EXTENSIONS,
};
pub use feeder::{push_locator, Feed, FeedOptions, Feeder, PagedFeeder, SeedFeed, UrlListFeeder};
pub use fetcher::{
    build_http_client, default_headers, referer_headers, FetchError, HttpSession, Response,
    Transport, DEFAULT_USER_AGENT,
};
pub use parser::{Parser, ParserOptions};
