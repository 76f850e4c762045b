//! Rendering of prose chapters.
//!
//! Some sources deliver chapters as paragraphs instead of page images. The
//! active output format decides which renderer a [`TextBlock`] goes through:
//!
//! - [`raster`]: JPEG pages, so text can sit between comic pages in a CBZ
//! - [`markup`]: an XHTML document for EPUB
//! - [`pdf`]: a minimal hand-written PDF
//! - [`write_text_file`]: plain UTF-8 text when no archive is built
//!
//! [`TextBlock`]: crate::types::TextBlock

use std::path::Path;

use crate::error::Result;

pub mod markup;
pub mod pdf;
pub mod raster;

pub use markup::{escape_xml, render_xhtml, write_xhtml};
pub use pdf::{render_pdf, write_pdf};
pub use raster::{TextPageStyle, TextRasterizer, Typeface};

/// Greedy word wrap. `measure` returns the width of a candidate line in the
/// same unit as `max_width` (pixels for raster output, characters for PDF).
///
/// Words wider than a line on their own are hard-split between characters.
pub fn wrap_text<F>(text: &str, max_width: f32, measure: F) -> Vec<String>
where
    F: Fn(&str) -> f32,
{
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{current} {word}")
        };
        if measure(&candidate) <= max_width {
            current = candidate;
            continue;
        }

        if !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if measure(word) <= max_width {
            current = word.to_string();
            continue;
        }

        let mut segments = split_long_word(word, max_width, &measure);
        current = segments.pop().unwrap_or_default();
        lines.extend(segments);
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Splits one word into the fewest segments that each fit `max_width`.
/// A single character wider than the line still gets a segment of its own.
pub fn split_long_word<F>(word: &str, max_width: f32, measure: &F) -> Vec<String>
where
    F: Fn(&str) -> f32,
{
    let mut segments = Vec::new();
    let mut buffer = String::new();

    for ch in word.chars() {
        let mut trial = buffer.clone();
        trial.push(ch);
        if buffer.is_empty() || measure(&trial) <= max_width {
            buffer = trial;
        } else {
            segments.push(std::mem::take(&mut buffer));
            buffer.push(ch);
        }
    }
    if !buffer.is_empty() {
        segments.push(buffer);
    }
    if segments.is_empty() {
        segments.push(word.to_string());
    }
    segments
}

/// Writes a block as plain UTF-8 text: the title and a blank line, then one
/// paragraph per line, then a trailing blank line.
pub fn write_text_file(paragraphs: &[String], path: &Path, title: Option<&str>) -> Result<()> {
    let mut out = String::new();
    if let Some(title) = title.filter(|t| !t.trim().is_empty()) {
        out.push_str(title.trim());
        out.push_str("\n\n");
    }
    for paragraph in paragraphs {
        out.push_str(paragraph.trim());
        out.push('\n');
    }
    out.push('\n');
    std::fs::write(path, out)?;
    Ok(())
}
