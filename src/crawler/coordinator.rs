//! Crawler coordinator - pipeline orchestration
//!
//! This module wires the three pools together and supervises a crawl:
//! - Connecting feeder, parser and downloader queues
//! - Starting the pools in pipeline order
//! - Turning pool liveness into the `*_exited` signals
//! - Cleaning up whatever is left in the queues once the downloader stops

use crate::config::Config;
use crate::crawler::downloader::Downloader;
use crate::crawler::extract::{LinkExtractor, Locator, Task};
use crate::crawler::feeder::{Feeder, SeedFeed};
use crate::crawler::fetcher::{HttpSession, Transport};
use crate::crawler::parser::Parser;
use crate::pool::{Stage, WorkerPool};
use crate::state::{CrawlStats, Signal, Signals};
use crate::storage::open_storage;
use crate::CrawlError;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Worker count of each pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Threads {
    pub feeder: usize,
    pub parser: usize,
    pub downloader: usize,
}

impl Default for Threads {
    fn default() -> Self {
        Self {
            feeder: 1,
            parser: 1,
            downloader: 1,
        }
    }
}

/// The crawler assembled from a configuration file
pub type DefaultCrawler = Crawler<Feeder<SeedFeed>, Parser<LinkExtractor>, Downloader>;

/// Owns the signals and the three pools of one pipeline
pub struct Crawler<F, P, D>
where
    F: Stage<Input = Locator, Output = Locator>,
    P: Stage<Input = Locator, Output = Task>,
    D: Stage<Input = Task>,
{
    signals: Arc<Signals>,
    stats: Arc<CrawlStats>,
    poll_interval: Duration,
    feeder: WorkerPool<F>,
    parser: WorkerPool<P>,
    downloader: WorkerPool<D>,
}

impl<F, P, D> Crawler<F, P, D>
where
    F: Stage<Input = Locator, Output = Locator>,
    P: Stage<Input = Locator, Output = Task>,
    D: Stage<Input = Task>,
{
    /// Creates the pools and connects feeder → parser → downloader
    pub fn new(threads: Threads, feeder: F, parser: P, downloader: D) -> Self {
        let signals = Signals::shared();
        let mut feeder = WorkerPool::new("feeder", threads.feeder, feeder, Arc::clone(&signals));
        let mut parser = WorkerPool::new("parser", threads.parser, parser, Arc::clone(&signals));
        let mut downloader = WorkerPool::new(
            "downloader",
            threads.downloader,
            downloader,
            Arc::clone(&signals),
        );

        feeder.connect(&mut parser).connect(&mut downloader);

        Self {
            signals,
            stats: CrawlStats::shared(),
            poll_interval: Duration::from_secs(1),
            feeder,
            parser,
            downloader,
        }
    }

    /// Uses counters shared with the stages for the end-of-crawl summary
    pub fn with_stats(mut self, stats: Arc<CrawlStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn signals(&self) -> &Arc<Signals> {
        &self.signals
    }

    pub fn stats(&self) -> &Arc<CrawlStats> {
        &self.stats
    }

    pub fn feeder(&self) -> &WorkerPool<F> {
        &self.feeder
    }

    pub fn parser(&self) -> &WorkerPool<P> {
        &self.parser
    }

    pub fn downloader(&self) -> &WorkerPool<D> {
        &self.downloader
    }

    pub fn feeder_mut(&mut self) -> &mut WorkerPool<F> {
        &mut self.feeder
    }

    pub fn parser_mut(&mut self) -> &mut WorkerPool<P> {
        &mut self.parser
    }

    pub fn downloader_mut(&mut self) -> &mut WorkerPool<D> {
        &mut self.downloader
    }

    /// Runs one crawl and returns once the downloader pool has stopped
    ///
    /// Failed pages and files are logged, never returned. The only error
    /// is a pool that cannot spawn its threads, in which case the pools
    /// already started are told to wind down.
    pub fn crawl(
        &mut self,
        feeder_options: F::Options,
        parser_options: P::Options,
        downloader_options: D::Options,
    ) -> Result<(), CrawlError> {
        self.signals.reset();
        self.stats.reset();
        let start_time = Instant::now();
        tracing::info!("start crawling...");

        if let Err(e) = self.start_pools(feeder_options, parser_options, downloader_options) {
            tracing::error!("Failed to start crawl: {}", e);
            self.signals.set(Signal::ReachMaxNum, true);
            self.signals.set(Signal::FeederExited, true);
            self.signals.set(Signal::ParserExited, true);
            return Err(e);
        }

        loop {
            if !self.feeder.is_alive() && !self.signals.get(Signal::FeederExited) {
                tracing::debug!("all feeder threads exited");
                self.signals.set(Signal::FeederExited, true);
            }
            if !self.parser.is_alive() && !self.signals.get(Signal::ParserExited) {
                tracing::debug!("all parser threads exited");
                self.signals.set(Signal::ParserExited, true);
            }
            if !self.downloader.is_alive() {
                break;
            }
            thread::sleep(self.poll_interval);
        }

        self.clear_leftovers();

        self.feeder.reap();
        self.parser.reap();
        self.downloader.reap();

        let stats = self.stats.snapshot();
        tracing::info!(
            "Crawl summary: {} pages fetched, {} abandoned, {} links dropped, {} tasks, {} files written, {} skipped, {} failed",
            stats.pages_fetched,
            stats.pages_abandoned,
            stats.locators_dropped,
            stats.tasks_emitted,
            stats.files_written,
            stats.files_skipped,
            stats.downloads_failed
        );
        tracing::info!("Crawling task done in {:?}", start_time.elapsed());

        Ok(())
    }

    fn start_pools(
        &mut self,
        feeder_options: F::Options,
        parser_options: P::Options,
        downloader_options: D::Options,
    ) -> Result<(), CrawlError> {
        tracing::info!("starting {} feeder threads...", self.feeder.thread_num());
        self.feeder.start(feeder_options)?;

        tracing::info!("starting {} parser threads...", self.parser.thread_num());
        self.parser.start(parser_options)?;

        tracing::info!("starting {} downloader threads...", self.downloader.thread_num());
        self.downloader.start(downloader_options)?;

        Ok(())
    }

    fn clear_leftovers(&self) {
        if !self.feeder.in_queue().is_empty() {
            let left = self.feeder.clear_buffer(false);
            tracing::info!("{} seeds left in the feeder queue", left.len());
        }
        if !self.parser.in_queue().is_empty() {
            let left = self.parser.clear_buffer(false);
            tracing::info!("{} page urls left unparsed", left.len());
            for locator in left {
                tracing::debug!("unparsed: {}", locator);
            }
        }
        if !self.downloader.in_queue().is_empty() {
            self.downloader.clear_buffer(true);
        }
    }
}

/// Assembles the crawler described by `config`
///
/// Feeds the configured seeds (or template pages) into a
/// [`LinkExtractor`] parser, and downloads into the configured storage.
/// All HTTP traffic goes through one shared [`HttpSession`].
pub fn build_crawler(config: &Config) -> Result<DefaultCrawler, CrawlError> {
    let transport: Arc<dyn Transport> = Arc::new(HttpSession::new(
        config.crawler.user_agent.as_deref(),
        &config.crawler.headers,
    )?);
    let storage = open_storage(&config.storage)?;

    let stats = CrawlStats::shared();
    let feeder = Feeder::new(SeedFeed::from_config(&config.feeder)?);
    let parser =
        Parser::new(LinkExtractor::new(), Arc::clone(&transport)).with_stats(Arc::clone(&stats));
    let downloader = Downloader::new(storage, transport).with_stats(Arc::clone(&stats));

    let threads = Threads {
        feeder: config.feeder.threads,
        parser: config.parser.threads,
        downloader: config.downloader.threads,
    };

    Ok(Crawler::new(threads, feeder, parser, downloader)
        .with_stats(stats)
        .with_poll_interval(config.crawler.poll_interval()))
}

/// Builds the crawler for `config` and runs it to completion
pub fn run_crawl(config: &Config) -> Result<(), CrawlError> {
    let mut crawler = build_crawler(config)?;
    crawler.crawl(
        config.feeder.to_options(),
        config.parser.to_options(),
        config.downloader.to_options(),
    )
}
