use crate::error::{Error, Result};
use crate::generator::{BookMetadata, Generator, ensure_parent_dir};
use crate::text::escape_xml;
use crate::types::{ContentItem, ContentKind};
use async_trait::async_trait;
use log::debug;
use memmap2::MmapOptions;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::task::spawn_blocking;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// A generator for creating CBZ (Comic Book ZIP) files.
///
/// Pages are stored as `0000.<ext>`, `0001.<ext>`, ... in the order they are
/// added, followed by a `ComicInfo.xml` whose `PageCount` equals the number
/// of pages written.
pub struct Cbz {
    zip: Option<ZipWriter<File>>,
    options: SimpleFileOptions,
    output_path: PathBuf,
    page_index: usize,
}

impl Cbz {
    pub fn page_count(&self) -> usize {
        self.page_index
    }

    fn writer(&mut self) -> Result<&mut ZipWriter<File>> {
        self.zip
            .as_mut()
            .ok_or_else(|| Error::Unsupported("Zip writer not available".to_string()))
    }
}

/// Renders the fixed ComicInfo.xml element set.
pub fn build_comic_info_xml(metadata: &BookMetadata, page_count: usize) -> String {
    let series = &metadata.series;
    let publisher = metadata.scan_groups.join(", ");
    let series_title = if series.title.is_empty() {
        &metadata.title
    } else {
        &series.title
    };

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<ComicInfo xmlns:xsd="http://www.w3.org/2001/XMLSchema" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
    <Title>{title}</Title>
    <Series>{series}</Series>
    <Summary>{summary}</Summary>
    <Writer>{writer}</Writer>
    <Penciller>{penciller}</Penciller>
    <Publisher>{publisher}</Publisher>
    <Genre>{genre}</Genre>
    <LanguageISO>{language}</LanguageISO>
    <PageCount>{page_count}</PageCount>
    <ScanInformation>{publisher}</ScanInformation>
</ComicInfo>
"#,
        title = escape_xml(&metadata.title),
        series = escape_xml(series_title),
        summary = escape_xml(series.description.as_deref().unwrap_or("")),
        writer = escape_xml(&series.authors.join(", ")),
        penciller = escape_xml(&series.artists.join(", ")),
        publisher = escape_xml(&publisher),
        genre = escape_xml(&series.tags().join(", ")),
        language = escape_xml(&metadata.language),
        page_count = page_count,
    )
}

#[async_trait]
impl Generator for Cbz {
    fn new(output_path: &Path) -> Result<Self> {
        let options: SimpleFileOptions = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644);

        ensure_parent_dir(output_path)?;
        let file = File::create(output_path).map_err(|e| {
            Error::InvalidPath(
                output_path.to_path_buf(),
                format!("Failed to create archive: {}", e),
            )
        })?;

        Ok(Cbz {
            zip: Some(ZipWriter::new(file)),
            options,
            output_path: output_path.to_path_buf(),
            page_index: 0,
        })
    }

    async fn add_item(&mut self, item: &ContentItem) -> Result<&mut Self> {
        if item.kind != ContentKind::Image {
            debug!("CBZ skips non-image item {}", item.path.display());
            return Ok(self);
        }

        let file = fs::File::open(&item.path).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to open image file '{}': {}", item.path.display(), e),
            ))
        })?;
        let file_std = file.into_std().await;

        let extension = item
            .path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let file_name = format!("{:04}{}", self.page_index, extension);
        let options = self.options;

        // Page bytes go into the archive straight from the mapping.
        let mmap = spawn_blocking(move || unsafe { MmapOptions::new().map(&file_std) })
            .await
            .map_err(|e| Error::AsyncTaskError(e.to_string()))??;

        let zip = self.writer()?;
        zip.start_file(file_name, options)?;
        zip.write_all(&mmap[..])?;

        self.page_index += 1;
        Ok(self)
    }

    async fn set_metadata(&mut self, metadata: &BookMetadata) -> Result<&mut Self> {
        let xml = build_comic_info_xml(metadata, self.page_index);
        let options = self.options;

        let zip = self.writer()?;
        zip.start_file("ComicInfo.xml", options)?;
        zip.write_all(xml.as_bytes())?;

        Ok(self)
    }

    async fn save(mut self) -> Result<PathBuf> {
        let zip = self
            .zip
            .take()
            .ok_or_else(|| Error::Unsupported("Zip writer not available".to_string()))?;

        // Central directory write.
        spawn_blocking(move || zip.finish().map(|_| ()).map_err(Error::Zip))
            .await
            .map_err(|e| Error::AsyncTaskError(e.to_string()))??;

        Ok(self.output_path)
    }
}
