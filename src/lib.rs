//! Seihon - Comic Downloader and Book Binder
//!
//! This crate downloads serialized comics chapter by chapter through a
//! [`SiteAdapter`](source::SiteAdapter), normalizes the pages and binds them
//! into PDF, EPUB or CBZ volumes. Runs are resumable: every chapter that
//! finished packaging is marked in a temporary workspace, and a later run
//! with identical parameters picks up where the last one stopped.
//!
//! # Getting Started
//!
//! ```rust,no_run
//! use seihon::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> seihon::error::Result<()> {
//!     // 1. Describe the run
//!     let config = RunConfig::builder()
//!         .series_url("file:///comics/My Series")
//!         .output_format(OutputFormat::Cbz)
//!         .groups(vec!["Favourite Scans".to_string()])
//!         .split("10ch")
//!         .output_dir(PathBuf::from("./books"))
//!         .build()?;
//!
//!     // 2. Pick the adapter for the URL and run
//!     let registry = AdapterRegistry::with_defaults();
//!     let report = run_with_registry(config, &registry).await?;
//!
//!     for path in &report.outputs {
//!         println!("Wrote {}", path.display());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! The building blocks are public as well: [`fetch::ImageFetcher`] for
//! downloads with URL variant fallback, [`layout::LayoutPlan`] for page
//! composition, [`text`] for rendering prose chapters, and
//! [`generator::build_for_format`] for the archive builders.

pub mod book;
pub mod error;
pub mod fetch;
pub mod generator;
pub mod layout;
pub mod logging;
pub mod path_utils;
pub mod pipeline;
pub mod select;
pub mod source;
pub mod state;
pub mod text;
pub mod types;

// Publicly expose the run configuration and its builder
pub use pipeline::{RunConfig, RunConfigBuilder, RunController, RunReport, run_with_registry};

// Re-export core types for direct access
pub use types::{
    ChapterRecord, ContentItem, ContentKind, EpubLayout, MediaEntry, OutputFormat,
    SeriesMetadata, TextBlock,
};

/// Prelude module for convenient imports.
///
/// Re-exports the most commonly used types and traits so a single
/// `use seihon::prelude::*;` is enough to configure and run a download.
pub mod prelude {
    pub use super::{
        ChapterRecord, ContentItem, ContentKind, EpubLayout, MediaEntry, OutputFormat, RunConfig,
        RunConfigBuilder, RunController, RunReport, SeriesMetadata, TextBlock, error, generator,
        run_with_registry, types,
    };
    pub use crate::book::SplitPolicy;
    pub use crate::fetch::{ImageFetcher, RetryPolicy, Transport};
    pub use crate::logging::{LogConfig, LogLevel};
    pub use crate::source::{AdapterRegistry, LocalSource, SiteAdapter};
    pub use std::path::{Path, PathBuf};
    pub use std::sync::Arc;
}
