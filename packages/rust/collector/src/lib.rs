//! Remote table collection for the index composition page.
//!
//! This crate provides:
//! - [`PagedTableSource`]: the capability every fetch engine implements
//!   (`setup`, `goto_page`, `read_table`)
//! - [`walk`]: lazy, failure-tolerant pagination over a source
//! - [`BrowserTableSource`] (headless Chrome) and [`HttpTableSource`] (static HTML)
//! - [`Collector`]: constituents + sectors passes joined into a cycle dataset

#[cfg(feature = "browser")]
pub mod browser;
pub mod collector;
pub mod http;
pub mod source;
pub mod walker;

#[cfg(feature = "browser")]
pub use browser::{BrowserSession, BrowserTableSource};
pub use collector::{Collector, join_on_code};
pub use http::HttpTableSource;
pub use source::{PagedTableSource, SourceFactory, TableSourceFactory};
pub use walker::{FnSource, PageWalk, walk, walk_fns};
