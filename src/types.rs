//! Core data types shared by the download, layout and packaging stages.
//!
//! - Adapter output (`MediaEntry`, `TextBlock`, `ChapterRecord`, `SeriesMetadata`)
//! - Packaging input (`ContentItem`, `ContentKind`)
//! - Output settings (`OutputFormat`, `EpubLayout`)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Prose content delivered by an adapter instead of page images.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub paragraphs: Vec<String>,
    pub title: Option<String>,
}

impl TextBlock {
    pub fn new(paragraphs: Vec<String>, title: Option<String>) -> Self {
        Self { paragraphs, title }
    }

    /// A block with neither paragraphs nor a title renders to nothing.
    pub fn is_empty(&self) -> bool {
        self.paragraphs.is_empty() && self.title.as_deref().is_none_or(str::is_empty)
    }
}

/// One unit of chapter content before processing.
///
/// A chapter's list of entries is treated as immutable once fetched; the
/// pipeline only ever writes derived files next to the raw downloads.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEntry {
    /// Remote image reference to fetch.
    ImageUrl { url: String },
    /// Bytes the adapter already fetched (e.g. after descrambling).
    BinaryImage {
        data: Vec<u8>,
        extension: String,
        name: Option<String>,
    },
    /// Prose content, no images.
    Text(TextBlock),
}

impl MediaEntry {
    pub fn url(url: impl Into<String>) -> Self {
        MediaEntry::ImageUrl { url: url.into() }
    }
}

/// Kind of a packaging item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentKind {
    Image,
    Xhtml,
    Pdf,
    TextFile,
}

/// The unit consumed by the archive builders. List order is reading order.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentItem {
    pub kind: ContentKind,
    pub path: PathBuf,
    pub title: Option<String>,
}

impl ContentItem {
    pub fn image(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: ContentKind::Image,
            path: path.into(),
            title: None,
        }
    }

    pub fn xhtml(path: impl Into<PathBuf>, title: Option<String>) -> Self {
        Self {
            kind: ContentKind::Xhtml,
            path: path.into(),
            title,
        }
    }

    pub fn pdf(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: ContentKind::Pdf,
            path: path.into(),
            title: None,
        }
    }

    pub fn text_file(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: ContentKind::TextFile,
            path: path.into(),
            title: None,
        }
    }
}

/// A chapter as listed by a site adapter. Never mutated after creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub hid: String,
    /// Chapter number as published; the sole ordering and selection key.
    pub chap: String,
    pub title: Option<String>,
    pub url: String,
    pub uploaded: Option<String>,
    pub group_name: Option<String>,
    #[serde(default)]
    pub up_count: u64,
}

impl ChapterRecord {
    /// Parses `chap` as a finite float.
    pub fn number(&self) -> Option<f64> {
        self.chap
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
    }

    /// True for numbers with a fractional part (e.g. 1.5, 60.1).
    pub fn is_partial(&self) -> bool {
        self.number().is_some_and(|n| n.fract() != 0.0)
    }
}

/// Series-level metadata, used for ComicInfo.xml, OPF metadata and file names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesMetadata {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub cover_url: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub formats: Vec<String>,
}

impl SeriesMetadata {
    /// Creates metadata with just an id and a title.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    /// Union of genre, theme and format tags, first occurrence wins.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for tag in self
            .genres
            .iter()
            .chain(self.themes.iter())
            .chain(self.formats.iter())
        {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
        tags
    }
}

/// Defines the output file format for the generated archive(s).
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Pdf,
    #[default]
    Epub,
    Cbz,
    /// Download and process only; keep the images, build nothing.
    None,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Pdf => "pdf",
            OutputFormat::Epub => "epub",
            OutputFormat::Cbz => "cbz",
            OutputFormat::None => "none",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(OutputFormat::Pdf),
            "epub" => Ok(OutputFormat::Epub),
            "cbz" => Ok(OutputFormat::Cbz),
            "none" => Ok(OutputFormat::None),
            other => Err(Error::invalid_option(
                "format",
                format!("expected pdf, epub, cbz or none, got '{other}'"),
            )),
        }
    }
}

/// EPUB reading layout.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum EpubLayout {
    /// One fixed-layout page per screen.
    Page,
    /// Continuous scrolling strip.
    #[default]
    Vertical,
}

impl FromStr for EpubLayout {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "page" => Ok(EpubLayout::Page),
            "vertical" => Ok(EpubLayout::Vertical),
            other => Err(Error::invalid_option(
                "epub-layout",
                format!("expected page or vertical, got '{other}'"),
            )),
        }
    }
}

/// Utility function: Determines file type and MIME type from a file path
///
/// # Supported formats
///
/// - JPEG/JPG: image/jpeg
/// - PNG: image/png
/// - WebP: image/webp
/// - GIF: image/gif
/// - AVIF: image/avif
pub fn get_file_info(image_path: &Path) -> Result<(&'static str, &'static str)> {
    let ext = image_path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => Ok(("jpg", "image/jpeg")),
        Some("png") => Ok(("png", "image/png")),
        Some("webp") => Ok(("webp", "image/webp")),
        Some("gif") => Ok(("gif", "image/gif")),
        Some("avif") => Ok(("avif", "image/avif")),
        _ => Err(Error::Unsupported(format!("Image format {:#?}", ext))),
    }
}

/// Lenient media type lookup; anything unknown is assumed to be JPEG.
pub fn media_type(path: &Path) -> &'static str {
    get_file_info(path).map(|(_, mime)| mime).unwrap_or("image/jpeg")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(chap: &str) -> ChapterRecord {
        ChapterRecord {
            chap: chap.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn chapter_numbers() {
        assert_eq!(chapter("12").number(), Some(12.0));
        assert_eq!(chapter(" 2.5 ").number(), Some(2.5));
        assert_eq!(chapter("Extra").number(), None);
        assert_eq!(chapter("inf").number(), None);
        assert!(chapter("1.5").is_partial());
        assert!(!chapter("3").is_partial());
        assert!(!chapter("Omake").is_partial());
    }

    #[test]
    fn tags_are_a_union_in_order() {
        let meta = SeriesMetadata {
            genres: vec!["Action".into(), "Drama".into()],
            themes: vec!["Drama".into(), "School".into()],
            formats: vec!["Long Strip".into()],
            ..Default::default()
        };
        assert_eq!(meta.tags(), vec!["Action", "Drama", "School", "Long Strip"]);
    }

    #[test]
    fn file_info_is_case_insensitive() {
        assert_eq!(
            get_file_info(Path::new("a/B.JPEG")).unwrap(),
            ("jpg", "image/jpeg")
        );
        assert!(get_file_info(Path::new("notes.txt")).is_err());
        assert_eq!(media_type(Path::new("x.bin")), "image/jpeg");
    }

    #[test]
    fn output_format_parsing() {
        assert_eq!("CBZ".parse::<OutputFormat>().unwrap(), OutputFormat::Cbz);
        assert!("mobi".parse::<OutputFormat>().is_err());
        assert_eq!("page".parse::<EpubLayout>().unwrap(), EpubLayout::Page);
    }
}
