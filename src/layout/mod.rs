//! Page layout: turning an ordered set of raw images with arbitrary heights
//! into uniformly proportioned pages.
//!
//! Both the "fill the gap" compositor and the scale recombiner are built on
//! one height-packing primitive, [`HeightPacker`], which only differs in its
//! [`FlushPolicy`]:
//!
//! - [`FlushPolicy::FillExact`] slices images so every page but the last is
//!   exactly the target height.
//! - [`FlushPolicy::WouldExceed`] never slices; it closes the current strip
//!   when the next image would push it past the target height.
//!
//! All functions here are synchronous and CPU bound. Async callers run them
//! inside `tokio::task::spawn_blocking`.

use image::imageops::{self, FilterType};
use image::{ImageReader, Rgb, RgbImage};
use log::{debug, trace, warn};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub mod compositor;
pub mod recombine;

pub use compositor::{compose, resize_only};
pub use recombine::{recombine, scale_pages};

/// Resampling filter used for every resize.
pub const RESAMPLE_FILTER: FilterType = FilterType::Lanczos3;

/// When a [`HeightPacker`] closes the page it is filling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Crop the incoming image to fill the remaining space exactly, flush,
    /// and carry the rest of the image over to the next page.
    FillExact,
    /// Flush before appending an image that would overflow a non-empty page.
    WouldExceed,
}

/// Fragments pending vertical concatenation into one output page.
///
/// `height_filled` always equals the sum of the fragment heights.
#[derive(Debug, Default)]
pub struct PageBuffer {
    fragments: Vec<RgbImage>,
    height_filled: u32,
}

impl PageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: RgbImage) {
        self.height_filled += fragment.height();
        self.fragments.push(fragment);
    }

    pub fn height_filled(&self) -> u32 {
        self.height_filled
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Stacks the fragments into a single page of the given width and empties
    /// the buffer. `None` if there is nothing with a non-zero area to stack.
    pub fn take_page(&mut self, width: u32) -> Option<RgbImage> {
        let fragments = std::mem::take(&mut self.fragments);
        self.height_filled = 0;
        stack_vertically(&fragments, width)
    }
}

/// Packs a stream of images into pages no taller than `target_height`.
#[derive(Debug)]
pub struct HeightPacker {
    target_height: u32,
    policy: FlushPolicy,
    width: Option<u32>,
    buffer: PageBuffer,
    pages: Vec<RgbImage>,
}

impl HeightPacker {
    pub fn new(target_height: u32, policy: FlushPolicy) -> Self {
        Self {
            target_height,
            policy,
            width: None,
            buffer: PageBuffer::new(),
            pages: Vec::new(),
        }
    }

    /// Number of pages closed so far.
    pub fn pages_emitted(&self) -> usize {
        self.pages.len()
    }

    pub fn push(&mut self, image: RgbImage) {
        // The page width is fixed by the first image seen.
        let width = *self.width.get_or_insert(image.width());
        match self.policy {
            FlushPolicy::FillExact => self.push_fill_exact(image, width),
            FlushPolicy::WouldExceed => self.push_would_exceed(image, width),
        }
    }

    fn push_fill_exact(&mut self, mut image: RgbImage, width: u32) {
        if self.target_height == 0 {
            // Nothing to fill: every image is a page of its own.
            self.buffer.push(image);
            self.flush(width);
            return;
        }

        loop {
            let space_left = self.target_height - self.buffer.height_filled();
            if image.height() <= space_left {
                self.buffer.push(image);
                trace!(
                    "    Buffering image (fill: {}/{})",
                    self.buffer.height_filled(),
                    self.target_height
                );
                break;
            }

            if space_left > 0 {
                trace!("    Buffer full. Filling gap of {}px.", space_left);
                let w = image.width();
                let h = image.height();
                let top = imageops::crop_imm(&image, 0, 0, w, space_left).to_image();
                let rest = imageops::crop_imm(&image, 0, space_left, w, h - space_left).to_image();
                self.buffer.push(top);
                image = rest;
            }
            self.flush(width);
        }

        if self.buffer.height_filled() == self.target_height {
            self.flush(width);
        }
    }

    fn push_would_exceed(&mut self, image: RgbImage, width: u32) {
        if !self.buffer.is_empty()
            && self.buffer.height_filled() + image.height() > self.target_height
        {
            self.flush(width);
        }
        self.buffer.push(image);
    }

    fn flush(&mut self, width: u32) {
        if let Some(page) = self.buffer.take_page(width) {
            self.pages.push(page);
            trace!("      Finalized page {} in memory.", self.pages.len());
        }
    }

    /// Flushes any remaining fragments as a final, possibly shorter page.
    pub fn finish(mut self) -> Vec<RgbImage> {
        if !self.buffer.is_empty() {
            let width = self.width.unwrap_or(0);
            self.flush(width);
        }
        self.pages
    }
}

/// Stacks images top to bottom on a black canvas of the given width.
/// Wider fragments are clipped on the right.
pub fn stack_vertically(fragments: &[RgbImage], width: u32) -> Option<RgbImage> {
    let total_height: u32 = fragments.iter().map(|f| f.height()).sum();
    if width == 0 || total_height == 0 {
        return None;
    }

    let mut canvas = RgbImage::from_pixel(width, total_height, Rgb([0, 0, 0]));
    let mut y_offset: i64 = 0;
    for fragment in fragments {
        imageops::replace(&mut canvas, fragment, 0, y_offset);
        y_offset += i64::from(fragment.height());
    }
    Some(canvas)
}

/// Decodes an image into RGB, sniffing the real format from its bytes.
///
/// Undecodable files are logged and skipped (`None`); a corrupt page must
/// never stop a chapter.
pub fn load_rgb(path: &Path) -> Option<RgbImage> {
    let decoded = ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(image::ImageError::from)
        .and_then(|reader| reader.decode());

    match decoded {
        Ok(image) => Some(image.to_rgb8()),
        Err(e) => {
            warn!("Skipping corrupted image {}: {}", path.display(), e);
            None
        }
    }
}

/// Resizes to `target_width`, keeping the aspect ratio (height truncated).
pub fn resize_to_width(image: RgbImage, target_width: u32) -> RgbImage {
    if image.width() == target_width || image.width() == 0 || target_width == 0 {
        return image;
    }
    let scale = f64::from(target_width) / f64::from(image.width());
    let height = ((f64::from(image.height()) * scale) as u32).max(1);
    imageops::resize(&image, target_width, height, RESAMPLE_FILTER)
}

/// Scales both dimensions by `factor` (truncated, at least one pixel).
pub fn scale_image(image: &RgbImage, factor: f64) -> RgbImage {
    let width = ((f64::from(image.width()) * factor) as u32).max(1);
    let height = ((f64::from(image.height()) * factor) as u32).max(1);
    if width == image.width() && height == image.height() {
        return image.clone();
    }
    imageops::resize(image, width, height, RESAMPLE_FILTER)
}

/// Encodes one image as JPEG at the given quality.
pub fn save_jpeg(image: &RgbImage, path: &Path, quality: u8) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(writer, quality.clamp(1, 100));
    image.write_with_encoder(encoder)?;
    Ok(())
}

/// Saves pages as `<prefix>_<NNNN>.jpg` (1-based) in `output_dir`.
pub fn save_pages(
    images: &[RgbImage],
    output_dir: &Path,
    prefix: &str,
    quality: u8,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir)?;
    debug!("  Saving {} final pages...", images.len());

    let mut paths = Vec::with_capacity(images.len());
    for (i, image) in images.iter().enumerate() {
        let path = output_dir.join(format!("{}_{:04}.jpg", prefix, i + 1));
        save_jpeg(image, &path, quality)?;
        trace!("    Saved -> {}", path.display());
        paths.push(path);
    }
    Ok(paths)
}

/// How one chapter's raw images become final pages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutPlan {
    pub width: u32,
    /// Page height for composition and recombination; 0 keeps aspect ratios.
    pub target_height: u32,
    /// Fill-the-gap composition instead of plain width normalisation.
    pub fill_gap: bool,
    /// Uniform scale applied after composition (1.0 = unchanged).
    pub scale_factor: f64,
    /// Re-stack scaled pages into strips of `target_height`.
    pub recombine: bool,
}

impl LayoutPlan {
    /// Runs the whole plan over the images at `paths`, in order.
    pub fn run(&self, paths: &[PathBuf]) -> Vec<RgbImage> {
        let pages = if self.fill_gap && self.target_height > 0 {
            compose(paths, self.width, self.target_height)
        } else {
            resize_only(paths, self.width)
        };

        if (self.scale_factor - 1.0).abs() < f64::EPSILON {
            return pages;
        }

        debug!("  Applying {:.0}% scaling...", self.scale_factor * 100.0);
        let scaled = scale_pages(pages, self.scale_factor);
        if self.recombine && self.scale_factor < 1.0 && self.target_height > 0 {
            recombine(scaled, self.target_height)
        } else {
            scaled
        }
    }
}
