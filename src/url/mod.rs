//! URL helpers shared by the pipeline stages
//!
//! Locators travel through the queues as plain strings; these helpers parse
//! them when a stage needs structure (referer headers, domain filters,
//! relative link resolution, file extensions).

mod domain;
mod resolve;

// Re-export main functions
pub use domain::{extract_domain, in_domains, matches_domain, referer_for};
pub use resolve::{file_extension, resolve_link};
