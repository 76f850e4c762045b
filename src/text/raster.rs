//! Rasterisation of text chapters into JPEG pages.
//!
//! Fonts are probed once per process, in order: DejaVuSans, Arial, then
//! Helvetica, looked up in the usual system font directories. When none can
//! be loaded a built-in 5x7 bitmap font is used, so rendering never fails
//! for lack of a font.

use image::{Rgb, RgbImage};
use lazy_static::lazy_static;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::wrap_text;
use crate::error::{Error, Result};
use crate::layout::save_jpeg;

const FONT_CANDIDATES: [&str; 3] = ["DejaVuSans.ttf", "Arial.ttf", "Helvetica.ttf"];

const FONT_DIRS: [&str; 10] = [
    ".",
    "fonts",
    "/usr/share/fonts/truetype/dejavu",
    "/usr/share/fonts/dejavu",
    "/usr/share/fonts/TTF",
    "/usr/share/fonts/truetype/msttcorefonts",
    "/usr/share/fonts",
    "/Library/Fonts",
    "/System/Library/Fonts",
    "C:\\Windows\\Fonts",
];

lazy_static! {
    static ref SYSTEM_FONT: Option<Arc<fontdue::Font>> = probe_system_font();
}

fn probe_system_font() -> Option<Arc<fontdue::Font>> {
    for name in FONT_CANDIDATES {
        for dir in FONT_DIRS {
            let path = Path::new(dir).join(name);
            match load_font_file(&path) {
                Ok(font) => {
                    debug!("Using font {}", path.display());
                    return Some(Arc::new(font));
                }
                Err(_) => continue,
            }
        }
    }
    warn!("No TrueType font found, falling back to the built-in bitmap font");
    None
}

/// Loads a TrueType/OpenType font file.
pub fn load_font_file(path: &Path) -> Result<fontdue::Font> {
    let bytes = std::fs::read(path)?;
    fontdue::Font::from_bytes(bytes, fontdue::FontSettings::default())
        .map_err(|e| Error::Font(format!("{}: {}", path.display(), e)))
}

/// Column-major 5x7 glyphs for ASCII 0x20..=0x7E; bit 0 is the top row.
const BITMAP_GLYPHS: [[u8; 5]; 95] = [
    [0x00, 0x00, 0x00, 0x00, 0x00], // ' '
    [0x00, 0x00, 0x5F, 0x00, 0x00], // !
    [0x00, 0x07, 0x00, 0x07, 0x00], // "
    [0x14, 0x7F, 0x14, 0x7F, 0x14], // #
    [0x24, 0x2A, 0x7F, 0x2A, 0x12], // $
    [0x23, 0x13, 0x08, 0x64, 0x62], // %
    [0x36, 0x49, 0x56, 0x20, 0x50], // &
    [0x00, 0x05, 0x03, 0x00, 0x00], // '
    [0x00, 0x1C, 0x22, 0x41, 0x00], // (
    [0x00, 0x41, 0x22, 0x1C, 0x00], // )
    [0x14, 0x08, 0x3E, 0x08, 0x14], // *
    [0x08, 0x08, 0x3E, 0x08, 0x08], // +
    [0x00, 0x50, 0x30, 0x00, 0x00], // ,
    [0x08, 0x08, 0x08, 0x08, 0x08], // -
    [0x00, 0x60, 0x60, 0x00, 0x00], // .
    [0x20, 0x10, 0x08, 0x04, 0x02], // /
    [0x3E, 0x51, 0x49, 0x45, 0x3E], // 0
    [0x00, 0x42, 0x7F, 0x40, 0x00], // 1
    [0x42, 0x61, 0x51, 0x49, 0x46], // 2
    [0x21, 0x41, 0x45, 0x4B, 0x31], // 3
    [0x18, 0x14, 0x12, 0x7F, 0x10], // 4
    [0x27, 0x45, 0x45, 0x45, 0x39], // 5
    [0x3C, 0x4A, 0x49, 0x49, 0x30], // 6
    [0x01, 0x71, 0x09, 0x05, 0x03], // 7
    [0x36, 0x49, 0x49, 0x49, 0x36], // 8
    [0x06, 0x49, 0x49, 0x29, 0x1E], // 9
    [0x00, 0x36, 0x36, 0x00, 0x00], // :
    [0x00, 0x56, 0x36, 0x00, 0x00], // ;
    [0x08, 0x14, 0x22, 0x41, 0x00], // <
    [0x14, 0x14, 0x14, 0x14, 0x14], // =
    [0x00, 0x41, 0x22, 0x14, 0x08], // >
    [0x02, 0x01, 0x51, 0x09, 0x06], // ?
    [0x32, 0x49, 0x79, 0x41, 0x3E], // @
    [0x7E, 0x11, 0x11, 0x11, 0x7E], // A
    [0x7F, 0x49, 0x49, 0x49, 0x36], // B
    [0x3E, 0x41, 0x41, 0x41, 0x22], // C
    [0x7F, 0x41, 0x41, 0x22, 0x1C], // D
    [0x7F, 0x49, 0x49, 0x49, 0x41], // E
    [0x7F, 0x09, 0x09, 0x09, 0x01], // F
    [0x3E, 0x41, 0x49, 0x49, 0x7A], // G
    [0x7F, 0x08, 0x08, 0x08, 0x7F], // H
    [0x00, 0x41, 0x7F, 0x41, 0x00], // I
    [0x20, 0x40, 0x41, 0x3F, 0x01], // J
    [0x7F, 0x08, 0x14, 0x22, 0x41], // K
    [0x7F, 0x40, 0x40, 0x40, 0x40], // L
    [0x7F, 0x02, 0x0C, 0x02, 0x7F], // M
    [0x7F, 0x04, 0x08, 0x10, 0x7F], // N
    [0x3E, 0x41, 0x41, 0x41, 0x3E], // O
    [0x7F, 0x09, 0x09, 0x09, 0x06], // P
    [0x3E, 0x41, 0x51, 0x21, 0x5E], // Q
    [0x7F, 0x09, 0x19, 0x29, 0x46], // R
    [0x46, 0x49, 0x49, 0x49, 0x31], // S
    [0x01, 0x01, 0x7F, 0x01, 0x01], // T
    [0x3F, 0x40, 0x40, 0x40, 0x3F], // U
    [0x1F, 0x20, 0x40, 0x20, 0x1F], // V
    [0x3F, 0x40, 0x38, 0x40, 0x3F], // W
    [0x63, 0x14, 0x08, 0x14, 0x63], // X
    [0x07, 0x08, 0x70, 0x08, 0x07], // Y
    [0x61, 0x51, 0x49, 0x45, 0x43], // Z
    [0x00, 0x7F, 0x41, 0x41, 0x00], // [
    [0x02, 0x04, 0x08, 0x10, 0x20], // backslash
    [0x00, 0x41, 0x41, 0x7F, 0x00], // ]
    [0x04, 0x02, 0x01, 0x02, 0x04], // ^
    [0x40, 0x40, 0x40, 0x40, 0x40], // _
    [0x00, 0x01, 0x02, 0x04, 0x00], // `
    [0x20, 0x54, 0x54, 0x54, 0x78], // a
    [0x7F, 0x48, 0x44, 0x44, 0x38], // b
    [0x38, 0x44, 0x44, 0x44, 0x20], // c
    [0x38, 0x44, 0x44, 0x48, 0x7F], // d
    [0x38, 0x54, 0x54, 0x54, 0x18], // e
    [0x08, 0x7E, 0x09, 0x01, 0x02], // f
    [0x0C, 0x52, 0x52, 0x52, 0x3E], // g
    [0x7F, 0x08, 0x04, 0x04, 0x78], // h
    [0x00, 0x44, 0x7D, 0x40, 0x00], // i
    [0x20, 0x40, 0x44, 0x3D, 0x00], // j
    [0x7F, 0x10, 0x28, 0x44, 0x00], // k
    [0x00, 0x41, 0x7F, 0x40, 0x00], // l
    [0x7C, 0x04, 0x18, 0x04, 0x78], // m
    [0x7C, 0x08, 0x04, 0x04, 0x78], // n
    [0x38, 0x44, 0x44, 0x44, 0x38], // o
    [0x7C, 0x14, 0x14, 0x14, 0x08], // p
    [0x08, 0x14, 0x14, 0x18, 0x7C], // q
    [0x7C, 0x08, 0x04, 0x04, 0x08], // r
    [0x48, 0x54, 0x54, 0x54, 0x20], // s
    [0x04, 0x3F, 0x44, 0x40, 0x20], // t
    [0x3C, 0x40, 0x40, 0x20, 0x7C], // u
    [0x1C, 0x20, 0x40, 0x20, 0x1C], // v
    [0x3C, 0x40, 0x30, 0x40, 0x3C], // w
    [0x44, 0x28, 0x10, 0x28, 0x44], // x
    [0x0C, 0x50, 0x50, 0x50, 0x3C], // y
    [0x44, 0x64, 0x54, 0x4C, 0x44], // z
    [0x00, 0x08, 0x36, 0x41, 0x00], // {
    [0x00, 0x00, 0x7F, 0x00, 0x00], // |
    [0x00, 0x41, 0x36, 0x08, 0x00], // }
    [0x10, 0x08, 0x08, 0x10, 0x08], // ~
];

fn bitmap_glyph(ch: char) -> &'static [u8; 5] {
    let code = ch as u32;
    let index = if (0x20..=0x7E).contains(&code) {
        (code - 0x20) as usize
    } else {
        ('?' as u32 - 0x20) as usize
    };
    &BITMAP_GLYPHS[index]
}

/// A font ready to measure and draw text at one pixel size.
#[derive(Clone)]
pub enum Typeface {
    TrueType { font: Arc<fontdue::Font>, px: f32 },
    /// Built-in 5x7 font, every cell scaled by an integer factor.
    Bitmap { scale: u32 },
}

impl Typeface {
    /// The first system font of the probe list, or the bitmap fallback.
    pub fn system(font_size: u32) -> Self {
        match SYSTEM_FONT.as_ref() {
            Some(font) => Typeface::TrueType {
                font: Arc::clone(font),
                px: font_size as f32,
            },
            None => Typeface::builtin(font_size),
        }
    }

    /// Bitmap font whose cell height is closest to `font_size`.
    pub fn builtin(font_size: u32) -> Self {
        Typeface::Bitmap {
            scale: (font_size / 8).max(1),
        }
    }

    pub fn from_file(path: &Path, font_size: u32) -> Result<Self> {
        Ok(Typeface::TrueType {
            font: Arc::new(load_font_file(path)?),
            px: font_size as f32,
        })
    }

    /// Advance width of `text` in pixels.
    pub fn measure(&self, text: &str) -> f32 {
        match self {
            Typeface::TrueType { font, px } => text
                .chars()
                .map(|c| font.metrics(c, *px).advance_width)
                .sum(),
            Typeface::Bitmap { scale } => (text.chars().count() as u32 * 6 * scale) as f32,
        }
    }

    /// Ink height of "Hy": top of the capital to the bottom of the descender.
    pub fn line_height(&self) -> u32 {
        match self {
            Typeface::TrueType { font, px } => {
                let h = font.metrics('H', *px);
                let y = font.metrics('y', *px);
                let top = (h.ymin + h.height as i32).max(y.ymin + y.height as i32);
                let bottom = h.ymin.min(y.ymin);
                (top - bottom).max(1) as u32
            }
            Typeface::Bitmap { scale } => 7 * scale,
        }
    }

    fn ascent(&self) -> i32 {
        match self {
            Typeface::TrueType { font, px } => font
                .horizontal_line_metrics(*px)
                .map(|m| m.ascent.ceil() as i32)
                .unwrap_or(*px as i32),
            Typeface::Bitmap { .. } => 0,
        }
    }

    /// Draws `text` in black with its top edge at `y`.
    pub fn draw(&self, canvas: &mut RgbImage, x: i32, y: i32, text: &str) {
        match self {
            Typeface::TrueType { font, px } => {
                let baseline = y + self.ascent();
                let mut pen_x = x as f32;
                for ch in text.chars() {
                    let (metrics, coverage) = font.rasterize(ch, *px);
                    let left = pen_x.round() as i32 + metrics.xmin;
                    let top = baseline - metrics.height as i32 - metrics.ymin;
                    for row in 0..metrics.height {
                        for col in 0..metrics.width {
                            let alpha = coverage[row * metrics.width + col];
                            darken(canvas, left + col as i32, top + row as i32, alpha);
                        }
                    }
                    pen_x += metrics.advance_width;
                }
            }
            Typeface::Bitmap { scale } => {
                let s = *scale as i32;
                for (i, ch) in text.chars().enumerate() {
                    let cell_x = x + i as i32 * 6 * s;
                    for (col, bits) in bitmap_glyph(ch).iter().enumerate() {
                        for row in 0..7 {
                            if bits & (1 << row) == 0 {
                                continue;
                            }
                            for dy in 0..s {
                                for dx in 0..s {
                                    darken(
                                        canvas,
                                        cell_x + col as i32 * s + dx,
                                        y + row * s + dy,
                                        255,
                                    );
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Blends black over the pixel with the given coverage.
fn darken(canvas: &mut RgbImage, x: i32, y: i32, alpha: u8) {
    if alpha == 0 || x < 0 || y < 0 {
        return;
    }
    let (x, y) = (x as u32, y as u32);
    if x >= canvas.width() || y >= canvas.height() {
        return;
    }
    let keep = 255 - u32::from(alpha);
    let pixel = canvas.get_pixel_mut(x, y);
    for channel in pixel.0.iter_mut() {
        *channel = (u32::from(*channel) * keep / 255) as u8;
    }
}

/// Page geometry for rasterised text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextPageStyle {
    pub width: u32,
    pub height: u32,
    pub font_size: u32,
    pub margin: u32,
    pub quality: u8,
}

impl Default for TextPageStyle {
    fn default() -> Self {
        Self {
            width: 1400,
            height: 2000,
            font_size: 42,
            margin: 100,
            quality: 95,
        }
    }
}

/// Lays text out onto fixed-size white pages.
#[derive(Clone)]
pub struct TextRasterizer {
    typeface: Typeface,
    style: TextPageStyle,
}

/// Mutable state of one rendering pass.
struct PageCursor<'a> {
    style: TextPageStyle,
    folder: &'a Path,
    prefix: &'a str,
    canvas: RgbImage,
    y: u32,
    page_index: usize,
    has_content: bool,
    written: Vec<PathBuf>,
}

impl PageCursor<'_> {
    fn blank(style: &TextPageStyle) -> RgbImage {
        RgbImage::from_pixel(style.width, style.height, Rgb([255, 255, 255]))
    }

    fn commit(&mut self) -> Result<()> {
        if self.has_content {
            let path = self
                .folder
                .join(format!("{}_{:04}.jpg", self.prefix, self.page_index));
            save_jpeg(&self.canvas, &path, self.style.quality)?;
            self.written.push(path);
            self.page_index += 1;
            self.canvas = Self::blank(&self.style);
            self.has_content = false;
        }
        self.y = self.style.margin;
        Ok(())
    }

    fn ensure_space(&mut self, needed: u32) -> Result<()> {
        if self.y + needed > self.style.height.saturating_sub(self.style.margin) {
            self.commit()?;
        }
        Ok(())
    }
}

impl TextRasterizer {
    pub fn new(typeface: Typeface, style: TextPageStyle) -> Self {
        Self { typeface, style }
    }

    /// Rasterizer using the probed system font and default geometry.
    pub fn with_system_font() -> Self {
        let style = TextPageStyle::default();
        Self::new(Typeface::system(style.font_size), style)
    }

    pub fn style(&self) -> &TextPageStyle {
        &self.style
    }

    /// Renders `paragraphs` (and an optional title) into
    /// `<folder>/<prefix>_<NNNN>.jpg`, numbering from `start_index` so the
    /// pages can follow a chapter's image pages without collisions.
    pub fn render(
        &self,
        paragraphs: &[String],
        title: Option<&str>,
        folder: &Path,
        prefix: &str,
        start_index: usize,
    ) -> Result<Vec<PathBuf>> {
        let title = title.map(str::trim).filter(|t| !t.is_empty());
        if paragraphs.is_empty() && title.is_none() {
            return Ok(Vec::new());
        }
        std::fs::create_dir_all(folder)?;

        let style = self.style;
        let max_width = style.width.saturating_sub(style.margin * 2) as f32;
        let line_height = self.typeface.line_height();
        let line_gap = ((line_height as f32 * 0.35) as u32).max(8);
        let measure = |s: &str| self.typeface.measure(s);

        let mut cursor = PageCursor {
            style,
            folder,
            prefix,
            canvas: PageCursor::blank(&style),
            y: style.margin,
            page_index: start_index,
            has_content: false,
            written: Vec::new(),
        };

        let add_line = |cursor: &mut PageCursor<'_>, line: &str| -> Result<()> {
            cursor.ensure_space(line_height)?;
            self.typeface
                .draw(&mut cursor.canvas, style.margin as i32, cursor.y as i32, line);
            cursor.y += line_height + line_gap;
            cursor.has_content = true;
            Ok(())
        };

        if let Some(title) = title {
            for line in wrap_text(title, max_width, measure) {
                add_line(&mut cursor, &line)?;
            }
            cursor.y += line_gap;
        }

        for paragraph in paragraphs {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                cursor.ensure_space(line_height)?;
                cursor.y += line_height;
                continue;
            }
            let lines = wrap_text(paragraph, max_width, measure);
            if lines.is_empty() {
                continue;
            }
            for line in &lines {
                add_line(&mut cursor, line)?;
            }
            cursor.y += line_gap;
        }

        if cursor.has_content {
            cursor.commit()?;
        }
        Ok(cursor.written)
    }
}
