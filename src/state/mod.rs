//! State shared between the stages of a crawl
//!
//! # Components
//!
//! - `Signals`: the coordination flags every pool reads and writes
//! - `CrawlStats`: informational counters updated by the stages

mod signals;
mod stats;

// Re-export main types
pub use signals::{Signal, Signals};
pub use stats::{CrawlStats, StatsSnapshot};
