//! Archive builders.
//!
//! Every output format implements [`Generator`]: it is created for one output
//! file, fed [`ContentItem`]s in reading order, given the book metadata, and
//! finally saved. Items of a kind the format cannot hold are skipped, e.g.
//! a CBZ only takes image items and a PDF only takes PDF items.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::{ContentItem, EpubLayout, OutputFormat, SeriesMetadata};

pub mod cbz;
pub mod epub;
pub mod pdf;

pub use cbz::Cbz;
pub use epub::Epub;
pub use pdf::{PdfBook, merge_pdf_files, write_image_pdf};

/// A table-of-contents entry pointing at the first page document of a chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterMarker {
    pub label: String,
    /// Index into the book's page documents (images and text documents).
    pub page_index: usize,
}

impl ChapterMarker {
    pub fn chapter(chap: &str, page_index: usize) -> Self {
        Self {
            label: format!("Chapter {chap}"),
            page_index,
        }
    }
}

/// Everything a builder needs besides the content itself.
#[derive(Debug, Clone)]
pub struct BookMetadata {
    /// Title of this file, e.g. `"Series (Ch_1-10)"`.
    pub title: String,
    pub language: String,
    pub series: SeriesMetadata,
    /// Scan groups credited in this file.
    pub scan_groups: Vec<String>,
    pub cover: Option<PathBuf>,
    pub epub_layout: EpubLayout,
    pub chapter_markers: Vec<ChapterMarker>,
    pub modified: DateTime<Utc>,
}

impl BookMetadata {
    pub fn new(title: impl Into<String>, series: SeriesMetadata) -> Self {
        Self {
            title: title.into(),
            language: "en".to_string(),
            series,
            scan_groups: Vec::new(),
            cover: None,
            epub_layout: EpubLayout::default(),
            chapter_markers: Vec::new(),
            modified: Utc::now(),
        }
    }

    /// Authors joined for single-valued fields.
    pub fn author_line(&self) -> String {
        self.series.authors.join(", ")
    }
}

/// Common interface for all archive builders.
#[async_trait]
pub trait Generator {
    /// Creates a builder writing to `output_path`; parent directories are
    /// created as needed.
    fn new(output_path: &Path) -> Result<Self>
    where
        Self: Sized;

    /// Adds one content item. Order of calls is reading order.
    async fn add_item(&mut self, item: &ContentItem) -> Result<&mut Self>
    where
        Self: Sized;

    /// Sets the book metadata. Called once, after the last item.
    async fn set_metadata(&mut self, metadata: &BookMetadata) -> Result<&mut Self>
    where
        Self: Sized;

    /// Finalizes the archive and returns its path.
    async fn save(self) -> Result<PathBuf>;
}

/// Feeds `items` and `metadata` through a fresh `G` writing `output_path`.
pub async fn build_archive<G>(
    output_path: &Path,
    items: &[ContentItem],
    metadata: &BookMetadata,
) -> Result<PathBuf>
where
    G: Generator + Send,
{
    let mut generator = G::new(output_path)?;
    for item in items {
        generator.add_item(item).await?;
    }
    generator.set_metadata(metadata).await?;
    generator.save().await
}

/// Builds `items` in the given format. `OutputFormat::None` builds nothing.
pub async fn build_for_format(
    format: OutputFormat,
    output_path: &Path,
    items: &[ContentItem],
    metadata: &BookMetadata,
) -> Result<Option<PathBuf>> {
    let path = match format {
        OutputFormat::Cbz => build_archive::<Cbz>(output_path, items, metadata).await?,
        OutputFormat::Epub => build_archive::<Epub>(output_path, items, metadata).await?,
        OutputFormat::Pdf => build_archive::<PdfBook>(output_path, items, metadata).await?,
        OutputFormat::None => return Ok(None),
    };
    info!(
        "{} saved → {}",
        format.extension().to_uppercase(),
        crate::path_utils::get_file_name_lossy(&path)
    );
    Ok(Some(path))
}

pub(crate) fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
