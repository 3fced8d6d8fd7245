//! State module for tracking crawl health
//!
//! # Components
//!
//! - `HostState`: in-memory request pacing per network host
//! - `CrawlStateStore`: persisted per-source runtime state and snapshot-diff observations
//! - `CrawlLogStore`: capped per-source history of crawl outcomes

mod host_state;
mod log;
mod runtime;

// Re-export main types
pub use host_state::HostState;
pub use log::{CrawlLogEntry, CrawlLogStore};
pub use runtime::{CrawlStateStore, SnapshotObservation, SourceRuntimeState};
