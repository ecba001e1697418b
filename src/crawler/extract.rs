//! Work items produced by page extraction
//!
//! An [`Extractor`] turns one fetched page into a lazy sequence of
//! [`Emitted`] items. Structured [`Task`]s are forwarded to the downloader;
//! bare locators are pushed back onto the parser's own queue, which is how
//! paginated or link-following sources expand themselves.

use crate::crawler::fetcher::Response;
use crate::url::{file_extension, in_domains, resolve_link};
use scraper::{Html, Selector};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use toml::Table;
use url::Url;

/// An opaque page reference fed to the parser
pub type Locator = String;

/// A resource for the downloader to fetch and persist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Absolute URL of the file
    pub file_url: String,
    /// Free-form metadata carried alongside the task
    pub meta: BTreeMap<String, String>,
}

impl Task {
    pub fn new(file_url: impl Into<String>) -> Self {
        Self {
            file_url: file_url.into(),
            meta: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

/// One item yielded by an extractor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emitted {
    /// Forward to the downloader
    Task(Task),
    /// Re-feed to the parser itself
    Locator(Locator),
}

impl From<Task> for Emitted {
    fn from(task: Task) -> Self {
        Self::Task(task)
    }
}

/// Site-specific extraction logic plugged into the parser
///
/// `options` is the parser's free-form option table, passed through
/// untouched. The returned iterator is consumed lazily: the parser stops
/// pulling from it as soon as the download quota is reached.
pub trait Extractor: Send + Sync + 'static {
    fn parse<'a>(
        &'a self,
        response: &'a Response,
        options: &'a Table,
    ) -> Box<dyn Iterator<Item = Emitted> + 'a>;

    /// Called before every crawl; clears state carried over from a
    /// previous run
    fn reset(&self) {}
}

impl<F, I> Extractor for F
where
    F: Fn(&Response, &Table) -> I + Send + Sync + 'static,
    I: IntoIterator<Item = Emitted>,
    I::IntoIter: 'static,
{
    fn parse<'a>(
        &'a self,
        response: &'a Response,
        options: &'a Table,
    ) -> Box<dyn Iterator<Item = Emitted> + 'a> {
        Box::new(self(response, options).into_iter())
    }
}

/// File extensions collected when no `extensions` option is given
pub const DEFAULT_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "tiff"];

/// Settings read from the parser's option table on every page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOptions {
    /// Host patterns whose pages are followed (`*.example.com` allowed)
    pub domains: Vec<String>,
    /// Whether `<a href>` links are re-fed to the parser
    pub follow_links: bool,
    /// File extensions turned into download tasks
    pub extensions: Vec<String>,
}

impl LinkOptions {
    /// Reads `domains`, `follow-links` and `extensions` from the table
    ///
    /// Missing keys fall back to the page's own host, `true`, and
    /// [`DEFAULT_EXTENSIONS`]. Values of the wrong type are ignored.
    pub fn from_table(options: &Table, page: &Url) -> Self {
        let strings = |key: &str| -> Option<Vec<String>> {
            options.get(key)?.as_array().map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.to_lowercase())
                    .collect()
            })
        };

        let domains = strings("domains")
            .filter(|d| !d.is_empty())
            .or_else(|| crate::url::extract_domain(page).map(|host| vec![host]))
            .unwrap_or_default();

        let follow_links = options
            .get("follow-links")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let extensions = strings("extensions")
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect());

        Self {
            domains,
            follow_links,
            extensions,
        }
    }
}

/// Collects images and follows same-site links
///
/// Every `<img src>` whose file extension is accepted becomes a [`Task`].
/// With link following enabled, every `<a href>` inside the allowed
/// domains becomes a locator for the parser to visit. Pages and files are
/// emitted at most once per extractor.
#[derive(Debug, Default)]
pub struct LinkExtractor {
    seen_pages: Mutex<HashSet<String>>,
    seen_files: Mutex<HashSet<String>>,
}

impl LinkExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extracts tasks and locators from an HTML page
    pub fn extract(&self, response: &Response, options: &Table) -> Vec<Emitted> {
        let page = match Url::parse(&response.url) {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!("Cannot resolve links on {}: {}", response.url, e);
                return Vec::new();
            }
        };
        let settings = LinkOptions::from_table(options, &page);
        let document = Html::parse_document(&response.text());

        let mut emitted = Vec::new();
        self.collect_files(&document, &page, &settings, &mut emitted);
        if settings.follow_links {
            self.collect_pages(&document, &page, &settings, &mut emitted);
        }
        emitted
    }

    fn collect_files(
        &self,
        document: &Html,
        page: &Url,
        settings: &LinkOptions,
        emitted: &mut Vec<Emitted>,
    ) {
        let Ok(selector) = Selector::parse("img[src]") else {
            return;
        };
        let Ok(mut seen) = self.seen_files.lock() else {
            return;
        };

        for element in document.select(&selector) {
            let Some(url) = element.value().attr("src").and_then(|src| resolve_link(src, page))
            else {
                continue;
            };
            let accepted = file_extension(url.as_str())
                .map(|ext| settings.extensions.iter().any(|e| *e == ext))
                .unwrap_or(false);
            if accepted && seen.insert(url.to_string()) {
                emitted.push(Emitted::Task(
                    Task::new(url.as_str()).with_meta("page_url", page.as_str()),
                ));
            }
        }
    }

    fn collect_pages(
        &self,
        document: &Html,
        page: &Url,
        settings: &LinkOptions,
        emitted: &mut Vec<Emitted>,
    ) {
        let Ok(selector) = Selector::parse("a[href]") else {
            return;
        };
        let Ok(mut seen) = self.seen_pages.lock() else {
            return;
        };
        seen.insert(page.to_string());

        for element in document.select(&selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            let Some(url) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, page))
            else {
                continue;
            };
            if in_domains(&url, &settings.domains) && seen.insert(url.to_string()) {
                emitted.push(Emitted::Locator(url.to_string()));
            }
        }
    }
}

impl Extractor for LinkExtractor {
    fn parse<'a>(
        &'a self,
        response: &'a Response,
        options: &'a Table,
    ) -> Box<dyn Iterator<Item = Emitted> + 'a> {
        Box::new(self.extract(response, options).into_iter())
    }

    /// Forgets every page and file emitted so far
    fn reset(&self) {
        if let Ok(mut pages) = self.seen_pages.lock() {
            pages.clear();
        }
        if let Ok(mut files) = self.seen_files.lock() {
            files.clear();
        }
    }
}
