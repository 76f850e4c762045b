//! Book parts and volume splitting.

use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{Error, Result};
use crate::generator::ChapterMarker;
use crate::types::{ChapterRecord, ContentItem, ContentKind};

lazy_static! {
    static ref SIZE_REGEX: Regex = Regex::new(r"^([\d.]+)\s*([KMGT]?B?)$").unwrap();
    static ref CHAPTER_COUNT_REGEX: Regex = Regex::new(r"^(\d+)\s*CH$").unwrap();
}

/// Parses a human-readable size such as `"400MB"`, `"1.5G"` or `"512"`
/// into bytes (1024-based multipliers).
pub fn parse_size(size: &str) -> Result<u64> {
    let normalized = size.trim().to_uppercase();
    if normalized.is_empty() {
        return Ok(0);
    }
    let invalid = || Error::invalid_option("split", format!("Invalid size format: {size}"));

    let caps = SIZE_REGEX.captures(&normalized).ok_or_else(invalid)?;
    let value: f64 = caps[1].parse().map_err(|_| invalid())?;
    let multiplier: u64 = match caps[2].trim_end_matches('B') {
        "K" => 1 << 10,
        "M" => 1 << 20,
        "G" => 1 << 30,
        "T" => 1 << 40,
        _ => 1,
    };
    Ok((value * multiplier as f64) as u64)
}

/// When a book part is closed and a new one started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitPolicy {
    /// One book for the whole run.
    #[default]
    Never,
    /// Close the part before a chapter would push it past this many bytes.
    Size(u64),
    /// Close the part once it holds this many chapters.
    Chapters(usize),
}

impl SplitPolicy {
    pub fn is_active(&self) -> bool {
        !matches!(self, SplitPolicy::Never | SplitPolicy::Size(0) | SplitPolicy::Chapters(0))
    }
}

impl FromStr for SplitPolicy {
    type Err = Error;

    /// `"10ch"` splits by chapter count, anything else is a size.
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_uppercase();
        if normalized.is_empty() {
            return Ok(SplitPolicy::Never);
        }
        if let Some(caps) = CHAPTER_COUNT_REGEX.captures(&normalized) {
            let count: usize = caps[1]
                .parse()
                .map_err(|_| Error::invalid_option("split", format!("Invalid chapter count: {s}")))?;
            return Ok(SplitPolicy::Chapters(count));
        }
        Ok(SplitPolicy::Size(parse_size(s)?))
    }
}

/// Number of EPUB page documents the items produce.
pub fn epub_page_count(items: &[ContentItem]) -> usize {
    items
        .iter()
        .filter(|i| matches!(i.kind, ContentKind::Image | ContentKind::Xhtml))
        .count()
}

/// Content accumulated for one output file.
#[derive(Debug, Clone, Default)]
pub struct BookPart {
    items: Vec<ContentItem>,
    chapters: Vec<ChapterRecord>,
    scan_groups: Vec<String>,
    size: u64,
    markers: Vec<ChapterMarker>,
}

impl BookPart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[ContentItem] {
        &self.items
    }

    pub fn chapters(&self) -> &[ChapterRecord] {
        &self.chapters
    }

    /// Groups credited in this part, in order of first appearance.
    pub fn scan_groups(&self) -> &[String] {
        &self.scan_groups
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn markers(&self) -> &[ChapterMarker] {
        &self.markers
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Puts a cover page in front; it counts toward the part size.
    pub fn add_cover(&mut self, cover: ContentItem, size: u64) {
        self.items.insert(0, cover);
        self.size += size;
    }

    /// Whether adding a chapter of `next_size` bytes must first close this part.
    pub fn should_split(&self, policy: SplitPolicy, next_size: u64) -> bool {
        match policy {
            SplitPolicy::Never => false,
            SplitPolicy::Size(limit) => {
                limit > 0 && !self.chapters.is_empty() && self.size + next_size > limit
            }
            SplitPolicy::Chapters(limit) => limit > 0 && self.chapters.len() >= limit,
        }
    }

    /// Appends one chapter's items. A table-of-contents marker pointing at
    /// the chapter's first page document is recorded when it has one.
    pub fn add_chapter(
        &mut self,
        chapter: &ChapterRecord,
        group: Option<String>,
        content: Vec<ContentItem>,
        size: u64,
    ) {
        let start_page_index = epub_page_count(&self.items);
        if epub_page_count(&content) > 0 {
            self.markers
                .push(ChapterMarker::chapter(&chapter.chap, start_page_index));
        }
        self.items.extend(content);
        self.chapters.push(chapter.clone());
        if let Some(group) = group.filter(|g| !g.is_empty()) {
            if !self.scan_groups.contains(&group) {
                self.scan_groups.push(group);
            }
        }
        self.size += size;
    }

    /// `Ch_<first>-<last>` over the chapters in this part.
    pub fn range_suffix(&self) -> Option<String> {
        let first = self.chapters.first()?;
        let last = self.chapters.last()?;
        Some(format!("Ch_{}-{}", first.chap, last.chap))
    }

    /// Returns the accumulated part and leaves an empty one behind.
    pub fn take(&mut self) -> BookPart {
        std::mem::take(self)
    }
}
