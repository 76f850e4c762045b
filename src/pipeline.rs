//! Run configuration and the chapter-by-chapter controller.
//!
//! A run resolves the series through its [`SiteAdapter`], selects chapters,
//! then drives every chapter through download, processing and packaging,
//! strictly one after the other and in ascending chapter order. Finished
//! chapters are marked in the [`Workspace`] so an interrupted run can resume.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::task::spawn_blocking;

use crate::book::{BookPart, SplitPolicy};
use crate::error::{Error, Result};
use crate::fetch::{ImageFetcher, RetryPolicy, store_bytes};
use crate::generator::{
    BookMetadata, ChapterMarker, build_for_format, merge_pdf_files, write_image_pdf,
};
use crate::layout::{LayoutPlan, save_pages};
use crate::logging::LogConfig;
use crate::path_utils::{get_file_name_lossy, output_base_name, sanitize_filename};
use crate::select::{SelectionCriteria, flatten_groups, select_chapters};
use crate::source::{AdapterRegistry, SiteAdapter};
use crate::state::{
    PAGE_PREFIX, RunParameters, StartMode, Workspace, collect_processed_pages,
    collect_raw_pages,
};
use crate::text::{TextRasterizer, write_pdf, write_text_file, write_xhtml};
use crate::types::{
    ChapterRecord, ContentItem, EpubLayout, MediaEntry, OutputFormat, SeriesMetadata, TextBlock,
};

const COVER_FILE: &str = "cover_orig.jpg";
const DEFAULT_WIDTH: u32 = 1500;
const VERTICAL_EPUB_WIDTH: u32 = 2000;

/// Converts `"W:H"` or a plain `H/W` number into the height/width ratio.
pub fn parse_aspect_ratio(spec: &str) -> Result<f64> {
    let spec = spec.trim();
    let invalid = |why: &str| Error::invalid_option("aspect-ratio", format!("'{spec}': {why}"));

    let ratio = if let Some((w, h)) = spec.split_once(':') {
        let w: f64 = w.trim().parse().map_err(|_| invalid("width is not a number"))?;
        let h: f64 = h.trim().parse().map_err(|_| invalid("height is not a number"))?;
        if w == 0.0 {
            return Err(invalid("width must not be zero"));
        }
        h / w
    } else {
        spec.parse().map_err(|_| invalid("expected W:H or a number"))?
    };

    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(invalid("ratio must be positive"));
    }
    Ok(ratio)
}

/// Configuration of one download-and-build run.
///
/// ```rust,no_run
/// # use seihon::prelude::*;
/// let config = RunConfig::builder()
///     .series_url("file:///comics/My Series")
///     .output_format(OutputFormat::Cbz)
///     .split("10ch")
///     .build()
///     .expect("Invalid configuration");
/// ```
#[derive(Debug, Clone, derive_builder::Builder)]
#[builder(setter(into, strip_option), build_fn(validate = "Self::validate"))]
pub struct RunConfig {
    /// Series page URL handed to the adapter.
    pub series_url: String,

    /// Adapter name; auto-detected from the URL when unset.
    #[builder(default)]
    pub site: Option<String>,

    #[builder(default = "\"en\".to_string()")]
    pub language: String,

    #[builder(default)]
    pub output_format: OutputFormat,

    #[builder(default)]
    pub epub_layout: EpubLayout,

    /// Page width in pixels; the format default when unset.
    #[builder(default)]
    pub width: Option<u32>,

    /// `"W:H"` or an `H/W` number; the format default when unset.
    #[builder(default)]
    pub aspect_ratio: Option<String>,

    /// JPEG quality of processed pages (1-100).
    #[builder(default = "85")]
    pub quality: u8,

    /// Final scale in percent (1-100).
    #[builder(default = "100")]
    pub scaling: u8,

    /// Chapter range spec, e.g. `"1-5,7"`.
    #[builder(default = "\"all\".to_string()")]
    pub chapters: String,

    /// Preferred scan groups in priority order; comma-separated entries are
    /// flattened.
    #[builder(default)]
    pub groups: Vec<String>,

    #[builder(default)]
    pub mix_by_upvote: bool,

    #[builder(default)]
    pub no_partials: bool,

    /// Package raw downloads without resizing, composing or scaling.
    #[builder(default)]
    pub no_processing: bool,

    /// `"400MB"` or `"10ch"`.
    #[builder(default)]
    pub split: Option<String>,

    #[builder(default)]
    pub keep_images: bool,

    #[builder(default)]
    pub keep_chapters: bool,

    #[builder(default)]
    pub no_cleanup: bool,

    /// Reuse the processing settings persisted by an earlier run.
    #[builder(default)]
    pub restore_parameters: bool,

    #[builder(default = "PathBuf::from(\"comics\")")]
    pub output_dir: PathBuf,

    /// Directory that holds the `tmp_<id>` workspace.
    #[builder(default = "PathBuf::from(\".\")")]
    pub work_dir: PathBuf,

    #[builder(default)]
    pub retry: RetryPolicy,

    #[builder(default)]
    pub log: LogConfig,
}

impl RunConfigBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(url) = &self.series_url {
            if url.trim().is_empty() {
                return Err("series_url must not be empty".to_string());
            }
        }
        if let Some(quality) = self.quality {
            if !(1..=100).contains(&quality) {
                return Err("quality must be between 1 and 100".to_string());
            }
        }
        if let Some(Some(0)) = self.width {
            return Err("width must be at least 1".to_string());
        }
        if let Some(scaling) = self.scaling {
            if !(1..=100).contains(&scaling) {
                return Err("scaling must be between 1 and 100".to_string());
            }
        }
        if let Some(Some(split)) = &self.split {
            split.parse::<SplitPolicy>().map_err(|e| e.to_string())?;
        }
        if let Some(Some(ratio)) = &self.aspect_ratio {
            parse_aspect_ratio(ratio).map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

/// Page geometry after format defaults are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLayout {
    pub width: u32,
    pub aspect_ratio: Option<String>,
    /// 0 when pages keep their own aspect ratio.
    pub target_height: u32,
}

impl RunConfig {
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }

    /// Width and aspect ratio defaults for the output format.
    fn format_defaults(&self) -> (u32, Option<&'static str>) {
        match (self.output_format, self.epub_layout) {
            (OutputFormat::Epub, EpubLayout::Page) => (DEFAULT_WIDTH, Some("2.5")),
            (OutputFormat::Epub, EpubLayout::Vertical) => (VERTICAL_EPUB_WIDTH, Some("4:3")),
            (OutputFormat::Cbz, _) => (DEFAULT_WIDTH, Some("2.5")),
            (OutputFormat::Pdf, _) | (OutputFormat::None, _) => (DEFAULT_WIDTH, None),
        }
    }

    pub fn resolved_layout(&self) -> Result<ResolvedLayout> {
        let (default_width, default_ratio) = self.format_defaults();
        let width = self.width.unwrap_or(default_width);

        let aspect_ratio = match self.output_format {
            OutputFormat::Pdf | OutputFormat::None => None,
            _ if self.no_processing => None,
            _ => self
                .aspect_ratio
                .clone()
                .or_else(|| default_ratio.map(String::from)),
        };
        let target_height = match &aspect_ratio {
            Some(ratio) => (width as f64 * parse_aspect_ratio(ratio)?) as u32,
            None => 0,
        };

        Ok(ResolvedLayout {
            width,
            aspect_ratio,
            target_height,
        })
    }

    pub fn split_policy(&self) -> Result<SplitPolicy> {
        match &self.split {
            Some(split) => split.parse(),
            None => Ok(SplitPolicy::Never),
        }
    }

    pub fn preferred_groups(&self) -> Vec<String> {
        flatten_groups(&self.groups)
    }

    pub fn selection_criteria(&self) -> SelectionCriteria {
        SelectionCriteria {
            groups: self.preferred_groups(),
            mix_by_upvote: self.mix_by_upvote,
            no_partials: self.no_partials,
            chapters: self.chapters.clone(),
        }
    }

    /// Format `none` always keeps the raw images.
    pub fn keeps_images(&self) -> bool {
        self.keep_images || self.output_format == OutputFormat::None
    }

    pub fn run_parameters(&self, layout: &ResolvedLayout) -> RunParameters {
        RunParameters {
            width: layout.width,
            aspect_ratio: layout.aspect_ratio.clone(),
            quality: self.quality,
            scaling: self.scaling,
            chapters: self.chapters.clone(),
            group: self.preferred_groups(),
            mix_by_upvote: self.mix_by_upvote,
            no_partials: self.no_partials,
            no_processing: self.no_processing,
        }
    }

    /// Overrides the processing settings with persisted ones. Output format
    /// and EPUB layout stay as configured.
    pub fn apply_restored(&mut self, params: RunParameters) {
        self.width = Some(params.width);
        self.aspect_ratio = params.aspect_ratio;
        self.quality = params.quality;
        self.scaling = params.scaling;
        self.chapters = params.chapters;
        self.groups = params.group;
        self.mix_by_upvote = params.mix_by_upvote;
        self.no_partials = params.no_partials;
        self.no_processing = params.no_processing;
    }
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub series: SeriesMetadata,
    pub start_mode: StartMode,
    /// Book files, then per-chapter files, in the order they were written.
    pub outputs: Vec<PathBuf>,
    /// Chapters that ended up in a book.
    pub packaged: Vec<String>,
    /// Chapters that produced nothing or failed.
    pub skipped: Vec<String>,
    /// Non-numeric chapters left out of selection.
    pub specials: Vec<String>,
    pub workspace: PathBuf,
}

/// A chapter ready to be added to a book part.
struct ChapterContent {
    items: Vec<ContentItem>,
    size: u64,
}

/// Series-wide values fixed before the chapter loop starts.
struct RunContext {
    series: SeriesMetadata,
    title: String,
    base_name: String,
    workspace: Workspace,
    layout: ResolvedLayout,
    start_mode: StartMode,
    cover: Option<PathBuf>,
}

/// Drives one run.
pub struct RunController<'a> {
    config: RunConfig,
    adapter: &'a dyn SiteAdapter,
    fetcher: ImageFetcher,
    rasterizer: Arc<TextRasterizer>,
}

impl<'a> RunController<'a> {
    pub fn new(config: RunConfig, adapter: &'a dyn SiteAdapter, fetcher: ImageFetcher) -> Self {
        Self {
            config,
            adapter,
            fetcher,
            rasterizer: Arc::new(TextRasterizer::with_system_font()),
        }
    }

    pub fn with_rasterizer(mut self, rasterizer: TextRasterizer) -> Self {
        self.rasterizer = Arc::new(rasterizer);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub async fn run(mut self) -> Result<RunReport> {
        let series = self
            .adapter
            .fetch_series_metadata(&self.config.series_url)
            .await?;
        if series.title.trim().is_empty() {
            return Err(Error::adapter(self.adapter.name(), "series has no title"));
        }
        let workspace = Workspace::new(&self.config.work_dir, &series.id);

        if self.config.restore_parameters {
            info!("Attempting to restore parameters from: {}", workspace.params_path().display());
            let params = workspace.load_parameters()?;
            self.config.apply_restored(params);
            info!(
                "  Successfully restored parameters. New output format will be: {}",
                self.config.output_format.extension().to_uppercase()
            );
        }

        let layout = self.config.resolved_layout()?;
        let split = self.config.split_policy()?;
        if !self.config.no_processing {
            if layout.target_height > 0 {
                debug!(
                    "  Processing images at {}px width (~{}px height)",
                    layout.width, layout.target_height
                );
            } else {
                debug!("  Processing images at {}px width (original aspect ratio)", layout.width);
            }
        }

        let pool = self
            .adapter
            .list_chapters(&series, &self.config.language)
            .await?;
        let selection =
            select_chapters(self.adapter, pool, &self.config.selection_criteria()).require_chapters()?;
        info!("Selected {} chapters of '{}'", selection.chapters.len(), series.title);

        std::fs::create_dir_all(&self.config.output_dir)?;
        let start_mode = workspace.prepare(&self.config.run_parameters(&layout))?;

        let mut context = RunContext {
            title: series.title.clone(),
            base_name: output_base_name(
                &series.title,
                self.adapter.name(),
                &self.config.preferred_groups(),
            ),
            series,
            workspace,
            layout,
            start_mode,
            cover: None,
        };

        let mut part = BookPart::new();
        context.cover = self.fetch_cover(&context).await?;
        if self.config.output_format == OutputFormat::Cbz {
            if let Some(cover) = &context.cover {
                part.add_cover(ContentItem::image(cover), file_size(cover));
            }
        }

        let mut report = RunReport {
            series: context.series.clone(),
            start_mode,
            outputs: Vec::new(),
            packaged: Vec::new(),
            skipped: Vec::new(),
            specials: selection.specials.iter().map(|c| c.chap.clone()).collect(),
            workspace: context.workspace.root().to_path_buf(),
        };

        for chapter in &selection.chapters {
            let content = match self.chapter_content(&context, chapter).await {
                Ok(Some(content)) => content,
                Ok(None) => {
                    report.skipped.push(chapter.chap.clone());
                    continue;
                }
                Err(e) => {
                    warn!("Chapter {} failed: {}", chapter.chap, e);
                    report.skipped.push(chapter.chap.clone());
                    continue;
                }
            };

            if self.config.keep_chapters {
                match self.save_chapter_file(&context, chapter, &content).await {
                    Ok(Some(path)) => report.outputs.push(path),
                    Ok(None) => {}
                    Err(e) => warn!("Could not save chapter file for {}: {}", chapter.chap, e),
                }
            }

            if part.should_split(split, content.size) {
                if let Some(path) = self.build_part(&context, part.take()).await? {
                    report.outputs.push(path);
                }
            }

            part.add_chapter(
                chapter,
                self.adapter.group_name(chapter),
                content.items,
                content.size,
            );
            report.packaged.push(chapter.chap.clone());
        }

        if !part.chapters().is_empty() && self.config.output_format != OutputFormat::None {
            let path = if split.is_active() {
                self.build_part(&context, part.take()).await?
            } else {
                info!("Building final file...");
                self.build_whole(&context, part.take()).await?
            };
            report.outputs.extend(path);
        }

        if self.config.no_cleanup {
            info!("Done. Temporary files kept at: {}", context.workspace.root().display());
        } else {
            context.workspace.remove()?;
            info!("Done.");
        }
        Ok(report)
    }

    async fn fetch_cover(&self, context: &RunContext) -> Result<Option<PathBuf>> {
        if !matches!(self.config.output_format, OutputFormat::Epub | OutputFormat::Cbz) {
            return Ok(None);
        }
        let Some(url) = context.series.cover_url.as_deref().filter(|u| !u.is_empty()) else {
            return Ok(None);
        };

        let existing = context.workspace.root().join(COVER_FILE);
        if context.start_mode.is_resume() && existing.is_file() {
            debug!("  Reusing downloaded cover");
            return Ok(Some(existing));
        }
        self.fetcher.fetch(url, context.workspace.root(), COVER_FILE).await
    }

    /// Produces one chapter's packaging items, reusing a packaged chapter
    /// when resuming. `None` means the chapter yielded nothing.
    async fn chapter_content(
        &self,
        context: &RunContext,
        chapter: &ChapterRecord,
    ) -> Result<Option<ChapterContent>> {
        let n = sanitize_filename(&chapter.chap);
        let workspace = &context.workspace;
        let no_processing = self.config.no_processing;

        if context.start_mode.is_resume() && workspace.has_marker(&n, no_processing) {
            info!("Chapter {} (already processed, collecting files)", chapter.chap);
            if self.config.output_format != OutputFormat::Cbz {
                debug!("  Resume mode not supported for this format; re-processing.");
                workspace.reset_chapter(&n)?;
            } else {
                let pages = workspace
                    .packaged_files(&n, no_processing)
                    .unwrap_or_else(|| {
                        if no_processing {
                            collect_raw_pages(workspace, &n)
                        } else {
                            collect_processed_pages(workspace, &n)
                        }
                    });
                if !pages.is_empty() {
                    let items: Vec<ContentItem> = pages.into_iter().map(ContentItem::image).collect();
                    let size = items_size(&items);
                    return Ok(Some(ChapterContent { items, size }));
                }
                debug!("  Warning: Found process marker for Ch {} but no images. Re-processing.", n);
                workspace.reset_chapter(&n)?;
            }
        }

        let chapter_dir = workspace.chapter_dir(&n);
        if chapter_dir.is_dir() {
            debug!("  Found incomplete temporary directory for Ch {}. Cleaning before re-download.", n);
            workspace.reset_chapter(&n)?;
        }

        info!(
            "Chapter {} ({})",
            chapter.chap,
            self.adapter.group_name(chapter).as_deref().unwrap_or("No Group")
        );
        let media = self.adapter.fetch_chapter_media(chapter).await?;
        debug!("  Fetching {} media item(s)...", media.len());
        let (raw_images, text_blocks) = self.download_media(chapter, &n, &chapter_dir, media).await?;

        if raw_images.is_empty() && text_blocks.is_empty() {
            warn!("No media downloaded for Chapter {}. Skipping.", chapter.chap);
            return Ok(None);
        }

        if self.config.keeps_images() && !raw_images.is_empty() {
            let dest = self
                .config
                .output_dir
                .join(sanitize_filename(&context.title))
                .join(format!("Chapter_{n}"));
            debug!("  Copying original images to: {}", dest.display());
            let source = chapter_dir.clone();
            spawn_blocking(move || copy_dir_recursive(&source, &dest))
                .await
                .map_err(|e| Error::AsyncTaskError(e.to_string()))??;
        }

        let downloaded_images = !raw_images.is_empty();
        let processed_dir = workspace.processed_dir(&n);
        std::fs::create_dir_all(&processed_dir)?;
        let pages = self
            .process_images(context, &n, &processed_dir, raw_images, text_blocks.is_empty())
            .await?;

        let items = self
            .package_chapter(context, chapter, &n, &processed_dir, pages, &text_blocks)
            .await?;
        if items.is_empty() {
            if self.config.output_format == OutputFormat::None && downloaded_images {
                debug!("  Chapter {} kept as images only", chapter.chap);
                return Ok(Some(ChapterContent { items, size: 0 }));
            }
            return Ok(None);
        }

        let packaged: Vec<PathBuf> = items.iter().map(|item| item.path.clone()).collect();
        workspace.write_marker(&n, no_processing, &packaged)?;
        let size = items_size(&items);
        Ok(Some(ChapterContent { items, size }))
    }

    /// Materialises media entries as raw image files and collects text.
    async fn download_media(
        &self,
        chapter: &ChapterRecord,
        n: &str,
        chapter_dir: &Path,
        media: Vec<MediaEntry>,
    ) -> Result<(Vec<PathBuf>, Vec<TextBlock>)> {
        let mut raw_images = Vec::new();
        let mut text_blocks = Vec::new();
        let mut counter = 1usize;

        for entry in media {
            match entry {
                MediaEntry::Text(block) => {
                    let title = block
                        .title
                        .clone()
                        .or_else(|| chapter.title.clone())
                        .filter(|t| !t.trim().is_empty());
                    let block = TextBlock::new(block.paragraphs, title);
                    if !block.is_empty() {
                        text_blocks.push(block);
                    }
                }
                MediaEntry::BinaryImage {
                    data,
                    extension,
                    name,
                } => {
                    if data.is_empty() {
                        continue;
                    }
                    let extension = normalize_extension(&extension);
                    let custom = name
                        .map(|name| sanitize_filename(&name))
                        .filter(|name| !name.is_empty());
                    let filename = match custom {
                        Some(name)
                            if name.to_lowercase().ends_with(&extension.to_lowercase()) =>
                        {
                            name
                        }
                        Some(name) => format!("{name}{extension}"),
                        None => format!("{n}_{counter:04}{extension}"),
                    };
                    raw_images.push(store_bytes(&data, chapter_dir, &filename).await?);
                    counter += 1;
                }
                MediaEntry::ImageUrl { url } => {
                    if url.trim().is_empty() {
                        continue;
                    }
                    let filename = format!("{n}_{counter:04}.jpg");
                    if let Some(path) = self.fetcher.fetch(&url, chapter_dir, &filename).await? {
                        raw_images.push(path);
                        counter += 1;
                    }
                }
            }
        }
        Ok((raw_images, text_blocks))
    }

    /// Turns raw downloads into final page files.
    async fn process_images(
        &self,
        context: &RunContext,
        n: &str,
        processed_dir: &Path,
        raw_images: Vec<PathBuf>,
        images_only: bool,
    ) -> Result<Vec<PathBuf>> {
        if raw_images.is_empty() || self.config.no_processing {
            return Ok(raw_images);
        }
        debug!("  Processing {} downloaded images...", raw_images.len());

        let format = self.config.output_format;
        let plan = LayoutPlan {
            width: context.layout.width,
            target_height: context.layout.target_height,
            fill_gap: format == OutputFormat::Cbz || (format == OutputFormat::Epub && images_only),
            scale_factor: f64::from(self.config.scaling) / 100.0,
            recombine: matches!(format, OutputFormat::Epub | OutputFormat::Cbz),
        };
        let quality = self.config.quality;
        let dir = processed_dir.to_path_buf();
        let prefix = format!("{PAGE_PREFIX}{n}");

        spawn_blocking(move || {
            let pages = plan.run(&raw_images);
            save_pages(&pages, &dir, &prefix, quality)
        })
        .await
        .map_err(|e| Error::AsyncTaskError(e.to_string()))?
    }

    /// Renders text blocks and assembles the chapter's items for the format.
    async fn package_chapter(
        &self,
        context: &RunContext,
        chapter: &ChapterRecord,
        n: &str,
        processed_dir: &Path,
        mut pages: Vec<PathBuf>,
        text_blocks: &[TextBlock],
    ) -> Result<Vec<ContentItem>> {
        let items = match self.config.output_format {
            OutputFormat::Cbz => {
                for (idx, block) in text_blocks.iter().enumerate() {
                    let rasterizer = Arc::clone(&self.rasterizer);
                    let block = block.clone();
                    let dir = processed_dir.to_path_buf();
                    let prefix = format!("{n}_text_{idx:02}");
                    let start_index = pages.len() + 1;
                    let rendered = spawn_blocking(move || {
                        rasterizer.render(
                            &block.paragraphs,
                            block.title.as_deref(),
                            &dir,
                            &prefix,
                            start_index,
                        )
                    })
                    .await
                    .map_err(|e| Error::AsyncTaskError(e.to_string()))??;
                    pages.extend(rendered);
                }
                pages.into_iter().map(ContentItem::image).collect()
            }
            OutputFormat::Epub => {
                let mut items: Vec<ContentItem> = pages.into_iter().map(ContentItem::image).collect();
                for (idx, block) in text_blocks.iter().enumerate() {
                    let path = processed_dir.join(format!("{n}_text_{idx:02}.xhtml"));
                    write_xhtml(
                        &block.paragraphs,
                        &path,
                        block.title.as_deref(),
                        &self.config.language,
                    )?;
                    items.push(ContentItem::xhtml(path, block.title.clone()));
                }
                items
            }
            OutputFormat::Pdf => {
                let mut parts: Vec<PathBuf> = Vec::new();
                if !pages.is_empty() {
                    let path = processed_dir.join(format!("{n}_images.pdf"));
                    let input = pages.clone();
                    let out = path.clone();
                    spawn_blocking(move || write_image_pdf(&input, &out))
                        .await
                        .map_err(|e| Error::AsyncTaskError(e.to_string()))??;
                    parts.push(path);
                }
                for (idx, block) in text_blocks.iter().enumerate() {
                    let path = processed_dir.join(format!("{n}_text_{idx:02}.pdf"));
                    write_pdf(&block.paragraphs, &path, block.title.as_deref())?;
                    parts.push(path);
                }

                match parts.len() {
                    0 => Vec::new(),
                    1 => vec![ContentItem::pdf(parts.remove(0))],
                    _ => {
                        let merged = context
                            .workspace
                            .root()
                            .join(format!("{}_Ch_{n}.pdf", context.base_name));
                        let inputs = parts.clone();
                        let out = merged.clone();
                        spawn_blocking(move || merge_pdf_files(&inputs, &out, None))
                            .await
                            .map_err(|e| Error::AsyncTaskError(e.to_string()))??;
                        for part in &parts {
                            if let Err(e) = std::fs::remove_file(part) {
                                debug!("  Could not remove {}: {}", part.display(), e);
                            }
                        }
                        vec![ContentItem::pdf(merged)]
                    }
                }
            }
            OutputFormat::None => {
                if text_blocks.is_empty() {
                    Vec::new()
                } else {
                    let mut combined: Vec<String> = Vec::new();
                    for (idx, block) in text_blocks.iter().enumerate() {
                        if idx == 0 {
                            if let Some(title) = &block.title {
                                combined.push(title.clone());
                            }
                        }
                        combined.extend(block.paragraphs.iter().cloned());
                        combined.push(String::new());
                    }
                    let path = processed_dir.join(format!("{n}.txt"));
                    write_text_file(&combined, &path, None)?;
                    vec![ContentItem::text_file(path)]
                }
            }
        };

        debug!("  Chapter {} packaged as {} item(s)", chapter.chap, items.len());
        Ok(items)
    }

    fn book_metadata(
        &self,
        context: &RunContext,
        title: String,
        scan_groups: Vec<String>,
        chapter_markers: Vec<ChapterMarker>,
    ) -> BookMetadata {
        let mut metadata = BookMetadata::new(title, context.series.clone());
        metadata.language = self.config.language.clone();
        metadata.scan_groups = scan_groups;
        metadata.epub_layout = self.config.epub_layout;
        metadata.chapter_markers = chapter_markers;
        if self.config.output_format == OutputFormat::Epub {
            metadata.cover = context.cover.clone();
        }
        metadata
    }

    /// Writes `<base>_Ch_<n>.<ext>` next to the books.
    async fn save_chapter_file(
        &self,
        context: &RunContext,
        chapter: &ChapterRecord,
        content: &ChapterContent,
    ) -> Result<Option<PathBuf>> {
        let format = self.config.output_format;
        let suffix = format!("Ch_{}", sanitize_filename(&chapter.chap));
        let path = self.config.output_dir.join(format!(
            "{}_{}.{}",
            context.base_name,
            suffix,
            format.extension()
        ));
        debug!("  Saving individual chapter file...");

        match format {
            OutputFormat::None => Ok(None),
            OutputFormat::Pdf => {
                let Some(first) = content.items.first() else {
                    return Ok(None);
                };
                tokio::fs::copy(&first.path, &path).await?;
                info!("PDF Chapter saved → {}", get_file_name_lossy(&path));
                Ok(Some(path))
            }
            OutputFormat::Epub | OutputFormat::Cbz => {
                let metadata = self.book_metadata(
                    context,
                    format!("{} ({})", context.title, suffix),
                    self.adapter.group_name(chapter).into_iter().collect(),
                    vec![ChapterMarker::chapter(&chapter.chap, 0)],
                );
                build_for_format(format, &path, &content.items, &metadata).await
            }
        }
    }

    /// Builds one split part as `<base>_Ch_<first>-<last>.<ext>`.
    async fn build_part(&self, context: &RunContext, part: BookPart) -> Result<Option<PathBuf>> {
        let Some(suffix) = part.range_suffix() else {
            return Ok(None);
        };
        let format = self.config.output_format;
        let path = self.config.output_dir.join(format!(
            "{}_{}.{}",
            context.base_name,
            sanitize_filename(&suffix),
            format.extension()
        ));
        info!("Building book part {}...", suffix);
        let metadata = self.book_metadata(
            context,
            format!("{} ({})", context.title, suffix),
            part.scan_groups().to_vec(),
            part.markers().to_vec(),
        );
        build_for_format(format, &path, part.items(), &metadata).await
    }

    /// Builds the single book of an unsplit run as `<base>.<ext>`.
    async fn build_whole(&self, context: &RunContext, part: BookPart) -> Result<Option<PathBuf>> {
        let format = self.config.output_format;
        let path = self
            .config
            .output_dir
            .join(format!("{}.{}", context.base_name, format.extension()));
        let metadata = self.book_metadata(
            context,
            context.title.clone(),
            part.scan_groups().to_vec(),
            part.markers().to_vec(),
        );
        build_for_format(format, &path, part.items(), &metadata).await
    }
}

/// Resolves the adapter for `config` from `registry` and runs over HTTP.
pub async fn run_with_registry(config: RunConfig, registry: &AdapterRegistry) -> Result<RunReport> {
    let adapter = registry.resolve(&config.series_url, config.site.as_deref())?;
    let fetcher = ImageFetcher::http(config.retry, config.log)?;
    RunController::new(config, adapter, fetcher).run().await
}

fn normalize_extension(extension: &str) -> String {
    let extension = extension.trim();
    if extension.is_empty() {
        ".jpg".to_string()
    } else if extension.starts_with('.') {
        extension.to_string()
    } else {
        format!(".{extension}")
    }
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn items_size(items: &[ContentItem]) -> u64 {
    items.iter().map(|item| file_size(&item.path)).sum()
}

fn copy_dir_recursive(source: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}
