//! Integration tests for Tidewatch
//!
//! HTTP sources are served by wiremock; browser sources run against an
//! in-memory backend, so no Chrome is launched.

mod browser_tests;
mod common;
mod crawl_tests;
mod fetch_tests;
mod pipeline_tests;
mod scheduler_tests;
