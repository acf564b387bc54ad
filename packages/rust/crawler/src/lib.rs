//! Invocation of the external decisions crawler.
//!
//! The crawler is an opaque program: it receives a date range and a
//! partition label, writes raw records and landed files to the stores, and
//! exits with a status code. This crate provides:
//! - [`CrawlArgs`] — the immutable per-invocation crawl parameters
//! - [`CrawlInvoker`] — spawns the crawler, streams its output, maps the exit status
//! - [`CrawlOutputSink`] — where streamed output lines go ([`TracingSink`] by default)

pub mod invoker;

pub use invoker::{
    CrawlArgs, CrawlInvoker, CrawlOutcome, CrawlOutputSink, OutputStream, TracingSink,
};
