//! Reads a series from a local directory tree.
//!
//! ```text
//! My Series/
//! ├── series.json        optional SeriesMetadata
//! ├── cover.jpg          optional
//! ├── Chapter 1/
//! │   ├── 001.jpg
//! │   └── 002.png
//! └── Chapter 1.5/
//!     └── notes.txt      one paragraph per line
//! ```
//!
//! Every visible sub-directory is a chapter whose number is the last number
//! in its name; a directory without one is listed with its name as label.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use tokio::fs::{ReadDir, read_dir};

use crate::error::{Error, Result};
use crate::path_utils::{
    compare_paths_by_number, dotted_extension, extract_number_from_filename,
    format_chapter_number, get_file_name_lossy, is_hidden_file, sanitize_filename,
};
use crate::source::SiteAdapter;
use crate::types::{ChapterRecord, MediaEntry, SeriesMetadata, TextBlock};

lazy_static! {
    /// Matches "001", "1", "1.5" etc.
    pub static ref NUMBER_REGEX: Regex = Regex::new(r"\d+(?:\.\d+)?").unwrap();
}

const METADATA_FILE: &str = "series.json";
const COVER_NAMES: [&str; 4] = ["cover.jpg", "cover.jpeg", "cover.png", "cover.webp"];
const IMAGE_EXTENSIONS: [&str; 7] = [".jpg", ".jpeg", ".png", ".webp", ".gif", ".bmp", ".avif"];

/// Adapter for `file://` URLs and plain directory paths.
#[derive(Debug, Default)]
pub struct LocalSource {
    /// Root of the series resolved by the last metadata fetch.
    root: Mutex<Option<PathBuf>>,
}

impl LocalSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn root(&self) -> Result<PathBuf> {
        self.root
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or_else(|| Error::adapter("local", "series metadata has not been fetched"))
    }
}

/// Turns a `file://` URL or a plain path into a directory path.
pub fn resolve_root(url: &str) -> Result<PathBuf> {
    let path = if url.starts_with("file://") {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.to_file_path().ok())
            .ok_or_else(|| Error::InvalidPath(PathBuf::from(url), "not a local file URL".into()))?
    } else {
        PathBuf::from(url)
    };
    if !path.is_dir() {
        return Err(Error::InvalidPath(path, "not a directory".into()));
    }
    Ok(path)
}

/// Lists the visible entries of `directory`, either only sub-directories or
/// only files.
async fn collect_entries(directory: &Path, only_dirs: bool) -> Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = Vec::new();
    let mut paths: ReadDir = read_dir(directory).await?;

    while let Some(entry) = paths.next_entry().await? {
        let path = entry.path();
        if is_hidden_file(&path) {
            continue;
        }
        if path.is_dir() == only_dirs {
            entries.push(path);
        }
    }

    entries.sort_by(|a, b| compare_paths_by_number(a, b, &NUMBER_REGEX));
    Ok(entries)
}

fn file_url(path: &Path) -> Option<String> {
    let absolute = std::fs::canonicalize(path).ok()?;
    url::Url::from_file_path(absolute).ok().map(String::from)
}

fn text_paragraphs(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.trim_end().to_string())
        .collect()
}

#[async_trait]
impl SiteAdapter for LocalSource {
    fn name(&self) -> &'static str {
        "local"
    }

    fn matches(&self, url: &str) -> bool {
        url.starts_with("file://") || (!url.contains("://") && Path::new(url).is_dir())
    }

    async fn fetch_series_metadata(&self, url: &str) -> Result<SeriesMetadata> {
        let root = resolve_root(url)?;
        let dir_name = get_file_name_lossy(&root);

        let metadata_path = root.join(METADATA_FILE);
        let mut series = if metadata_path.is_file() {
            let raw = tokio::fs::read_to_string(&metadata_path).await?;
            serde_json::from_str::<SeriesMetadata>(&raw)?
        } else {
            SeriesMetadata::default()
        };

        if series.title.trim().is_empty() {
            series.title = dir_name.clone();
        }
        if series.id.trim().is_empty() {
            series.id = sanitize_filename(&dir_name);
        }
        if series.cover_url.is_none() {
            series.cover_url = COVER_NAMES
                .iter()
                .map(|name| root.join(name))
                .find(|p| p.is_file())
                .and_then(|p| file_url(&p));
        }

        if let Ok(mut guard) = self.root.lock() {
            *guard = Some(root);
        }
        Ok(series)
    }

    async fn list_chapters(
        &self,
        _series: &SeriesMetadata,
        _language: &str,
    ) -> Result<Vec<ChapterRecord>> {
        let root = self.root()?;
        let chapters = collect_entries(&root, true)
            .await?
            .into_iter()
            .map(|dir| {
                let name = get_file_name_lossy(&dir);
                let chap = extract_number_from_filename(&dir, &NUMBER_REGEX)
                    .map(format_chapter_number)
                    .unwrap_or_else(|| name.clone());
                ChapterRecord {
                    hid: name.clone(),
                    chap,
                    title: Some(name),
                    url: dir.to_string_lossy().into_owned(),
                    ..Default::default()
                }
            })
            .collect::<Vec<_>>();
        debug!("Found {} chapter directories in {}", chapters.len(), root.display());
        Ok(chapters)
    }

    async fn fetch_chapter_media(&self, chapter: &ChapterRecord) -> Result<Vec<MediaEntry>> {
        let dir = PathBuf::from(&chapter.url);
        let mut media = Vec::new();

        for file in collect_entries(&dir, false).await? {
            let extension = dotted_extension(&file);
            if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
                media.push(MediaEntry::BinaryImage {
                    data: tokio::fs::read(&file).await?,
                    extension,
                    name: file
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned()),
                });
            } else if extension == ".txt" {
                let content = tokio::fs::read_to_string(&file).await?;
                media.push(MediaEntry::Text(TextBlock::new(text_paragraphs(&content), None)));
            } else {
                debug!("Ignoring {}", file.display());
            }
        }
        Ok(media)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_keep_blank_lines() {
        assert_eq!(
            text_paragraphs("one\r\n\ntwo  \n"),
            vec!["one".to_string(), String::new(), "two".to_string()]
        );
    }

    #[test]
    fn urls_are_not_directories() {
        let source = LocalSource::new();
        assert!(!source.matches("https://example.com/comic"));
        assert!(source.matches("file:///tmp"));
    }
}
