//! Seed locator producers
//!
//! The feeder pool is the head of the pipeline. Its workers push page
//! locators into the parser's input queue and exit; the crawler notices
//! and raises `feeder_exited`.

use crate::config::FeederConfig;
use crate::crawler::extract::Locator;
use crate::pool::{Emission, Stage, Worker};
use crate::state::{Signal, Signals};
use crate::CrawlError;
use std::fs;
use std::path::Path;
use std::time::Duration;
use toml::Table;

/// Per-run feeder settings
#[derive(Debug, Clone, PartialEq)]
pub struct FeedOptions {
    /// Index of the first seed to feed
    pub offset: usize,
    /// Number of seeds to feed, 0 for all of them
    pub max_num: usize,
    /// Sleep between two attempts to push onto a full queue
    pub backoff: Duration,
    /// Free-form options for custom feeds
    pub extra: Table,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            offset: 0,
            max_num: 0,
            backoff: Duration::from_secs(1),
            extra: Table::new(),
        }
    }
}

/// Source of seed locators
pub trait Feed: Send + Sync + 'static {
    fn feed(&self, worker: &Worker<Locator, Locator>, options: &FeedOptions);
}

impl<F> Feed for F
where
    F: Fn(&Worker<Locator, Locator>, &FeedOptions) + Send + Sync + 'static,
{
    fn feed(&self, worker: &Worker<Locator, Locator>, options: &FeedOptions) {
        self(worker, options)
    }
}

/// Stops feeding once nobody downstream wants more pages
fn feeding_stopped(signals: &Signals) -> bool {
    signals.quota_reached() || signals.get(Signal::ParserExited)
}

/// Pushes one locator, returning `false` when the worker should stop
pub fn push_locator(
    worker: &Worker<Locator, Locator>,
    locator: Locator,
    options: &FeedOptions,
) -> bool {
    tracing::debug!("{} put url {} into url queue", worker.name(), locator);
    match worker.emit_output(locator, options.backoff, feeding_stopped) {
        Emission::Delivered | Emission::Dropped => true,
        Emission::Stopped => false,
    }
}

/// Pool stage wrapping a [`Feed`]
pub struct Feeder<F: Feed> {
    feed: F,
}

impl<F: Feed> Feeder<F> {
    pub fn new(feed: F) -> Self {
        Self { feed }
    }

    pub fn feed(&self) -> &F {
        &self.feed
    }
}

impl<F: Feed> Stage for Feeder<F> {
    type Input = Locator;
    type Output = Locator;
    type Options = FeedOptions;

    fn work(&self, worker: &Worker<Locator, Locator>, options: &FeedOptions) {
        self.feed.feed(worker, options);
        tracing::info!("{} finished feeding", worker.name());
    }
}

/// Yields the items of `items` assigned to worker `index` of `pool_size`
fn partition<T>(
    items: impl Iterator<Item = T>,
    index: usize,
    pool_size: usize,
) -> impl Iterator<Item = T> {
    let pool_size = pool_size.max(1);
    items
        .enumerate()
        .filter(move |(i, _)| i % pool_size == index)
        .map(|(_, item)| item)
}

fn take_count(max_num: usize) -> usize {
    if max_num == 0 {
        usize::MAX
    } else {
        max_num
    }
}

/// Feeds a fixed list of page URLs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlListFeeder {
    urls: Vec<String>,
}

impl UrlListFeeder {
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
        }
    }

    /// Reads one URL per line, skipping blank lines and `#` comments
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::new(parse_url_lines(&content)))
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// The URLs selected by `offset` and `max_num`, in feeding order
    pub fn selection<'a>(&'a self, options: &FeedOptions) -> impl Iterator<Item = &'a String> {
        self.urls
            .iter()
            .skip(options.offset)
            .take(take_count(options.max_num))
    }
}

impl Feed for UrlListFeeder {
    fn feed(&self, worker: &Worker<Locator, Locator>, options: &FeedOptions) {
        let share = partition(self.selection(options), worker.index(), worker.pool_size());
        for url in share {
            if !push_locator(worker, url.clone(), options) {
                tracing::info!("{} stops feeding early", worker.name());
                return;
            }
        }
    }
}

fn parse_url_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Generates result page URLs from a template
///
/// `{keyword}` is replaced by the URL-encoded keyword and `{offset}` by
/// every value of `offset..offset + max_num` stepping by `page_step`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagedFeeder {
    template: String,
    keyword: String,
    page_step: usize,
}

impl PagedFeeder {
    pub fn new(template: impl Into<String>, keyword: impl Into<String>, page_step: usize) -> Self {
        Self {
            template: template.into(),
            keyword: keyword.into(),
            page_step: page_step.max(1),
        }
    }

    fn render(&self, offset: usize) -> String {
        let keyword: String = url::form_urlencoded::byte_serialize(self.keyword.as_bytes()).collect();
        self.template
            .replace("{keyword}", &keyword)
            .replace("{offset}", &offset.to_string())
    }

    /// Every locator this feeder produces for `options`
    pub fn locators(&self, options: &FeedOptions) -> Vec<String> {
        let end = options.offset.saturating_add(options.max_num);
        (options.offset..end)
            .step_by(self.page_step)
            .map(|offset| self.render(offset))
            .collect()
    }
}

impl Feed for PagedFeeder {
    fn feed(&self, worker: &Worker<Locator, Locator>, options: &FeedOptions) {
        if options.max_num == 0 {
            tracing::warn!("{}: max_num is 0, no page to generate", worker.name());
            return;
        }
        let pages = self.locators(options);
        for url in partition(pages.into_iter(), worker.index(), worker.pool_size()) {
            if !push_locator(worker, url, options) {
                tracing::info!("{} stops feeding early", worker.name());
                return;
            }
        }
    }
}

/// The feeds selectable from a configuration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedFeed {
    List(UrlListFeeder),
    Paged(PagedFeeder),
}

impl SeedFeed {
    /// A paged feed when a template is set, otherwise the inline URLs
    /// followed by those of `url-file`
    pub fn from_config(config: &FeederConfig) -> Result<Self, CrawlError> {
        if let Some(template) = &config.template {
            return Ok(Self::Paged(PagedFeeder::new(
                template.as_str(),
                config.keyword.as_str(),
                config.page_step,
            )));
        }

        let mut urls = config.urls.clone();
        if let Some(path) = &config.url_file {
            urls.extend(UrlListFeeder::from_file(path)?.urls);
        }
        Ok(Self::List(UrlListFeeder::new(urls)))
    }
}

impl Feed for SeedFeed {
    fn feed(&self, worker: &Worker<Locator, Locator>, options: &FeedOptions) {
        match self {
            Self::List(feed) => feed.feed(worker, options),
            Self::Paged(feed) => feed.feed(worker, options),
        }
    }
}
