//! Minimal PDF 1.4 writer for text chapters.
//!
//! Written by hand rather than through the PDF object library: the document
//! is a catalog, a page tree, one Type1 Helvetica font and a content stream
//! plus page object per page, followed by a cross-reference table with the
//! byte offset of every object.

use std::path::Path;

use super::wrap_text;
use crate::error::Result;

const PAGE_WIDTH: u32 = 595;
const PAGE_HEIGHT: u32 = 842;
const MARGIN: u32 = 72;
const FONT_SIZE: u32 = 12;
const MAX_CHARS_PER_LINE: usize = 90;

/// Escapes `\`, `(` and `)` for a PDF string literal.
pub fn pdf_escape(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('(', "\\(")
        .replace(')', "\\)")
}

fn leading() -> u32 {
    (FONT_SIZE as f64 * 1.6) as u32
}

fn max_lines_per_page() -> usize {
    (((PAGE_HEIGHT - 2 * MARGIN) / leading()) as usize).max(1)
}

/// Flattens title and paragraphs into wrapped lines. Every paragraph is
/// followed by a blank line, except the last.
fn layout_lines(paragraphs: &[String], title: Option<&str>) -> Vec<String> {
    let by_chars = |s: &str| s.chars().count() as f32;
    let width = MAX_CHARS_PER_LINE as f32;

    let mut lines: Vec<String> = Vec::new();
    if let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) {
        lines.extend(wrap_text(title, width, by_chars));
        lines.push(String::new());
    }
    for paragraph in paragraphs {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            lines.push(String::new());
            continue;
        }
        lines.extend(wrap_text(paragraph, width, by_chars));
        lines.push(String::new());
    }
    if lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

/// PDF strings here are Latin-1; anything outside it becomes `?`.
fn to_latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| if (c as u32) < 256 { c as u32 as u8 } else { b'?' })
        .collect()
}

fn content_stream(lines: &[String]) -> Vec<u8> {
    let mut ops: Vec<String> = vec![
        "BT".to_string(),
        format!("/F1 {} Tf", FONT_SIZE),
        format!("{} TL", leading()),
        format!("1 0 0 1 {} {} Tm", MARGIN, PAGE_HEIGHT - MARGIN),
    ];
    for line in lines {
        if !line.is_empty() {
            ops.push(format!("({}) Tj", pdf_escape(line)));
        }
        ops.push("T*".to_string());
    }
    ops.push("ET".to_string());
    to_latin1(&ops.join("\n"))
}

/// Renders a text block into the bytes of a complete PDF document.
pub fn render_pdf(paragraphs: &[String], title: Option<&str>) -> Vec<u8> {
    let lines = layout_lines(paragraphs, title);
    let pages: Vec<&[String]> = lines.chunks(max_lines_per_page()).collect();

    // Object numbers: 1 catalog, 2 pages, 3 font, then stream/page pairs.
    let catalog_id = 1usize;
    let pages_id = 2usize;
    let font_id = 3usize;
    let mut objects: Vec<Vec<u8>> = vec![
        Vec::new(),
        Vec::new(),
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_vec(),
    ];

    let mut page_ids = Vec::with_capacity(pages.len());
    for page_lines in &pages {
        let stream = content_stream(page_lines);
        let mut stream_obj = format!("<< /Length {} >>\nstream\n", stream.len()).into_bytes();
        stream_obj.extend_from_slice(&stream);
        stream_obj.extend_from_slice(b"\nendstream");
        objects.push(stream_obj);
        let stream_id = objects.len();

        objects.push(
            format!(
                "<< /Type /Page /Parent {pages_id} 0 R /MediaBox [0 0 {PAGE_WIDTH} {PAGE_HEIGHT}] \
                 /Resources << /Font << /F1 {font_id} 0 R >> >> /Contents {stream_id} 0 R >>"
            )
            .into_bytes(),
        );
        page_ids.push(objects.len());
    }

    let kids = page_ids
        .iter()
        .map(|id| format!("{id} 0 R"))
        .collect::<Vec<_>>()
        .join(" ");
    objects[pages_id - 1] =
        format!("<< /Type /Pages /Kids [{kids}] /Count {} >>", page_ids.len()).into_bytes();
    objects[catalog_id - 1] = format!("<< /Type /Catalog /Pages {pages_id} 0 R >>").into_bytes();

    let mut out: Vec<u8> = b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (index, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n", index + 1).as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
    }

    let size = objects.len() + 1;
    let xref_pos = out.len();
    out.extend_from_slice(format!("xref\n0 {size}\n").as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in offsets {
        out.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    out.extend_from_slice(format!("trailer\n<< /Size {size} /Root {catalog_id} 0 R >>\n").as_bytes());
    out.extend_from_slice(format!("startxref\n{xref_pos}\n%%EOF").as_bytes());
    out
}

/// Renders and writes a text PDF.
pub fn write_pdf(paragraphs: &[String], path: &Path, title: Option<&str>) -> Result<()> {
    std::fs::write(path, render_pdf(paragraphs, title))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }

    #[test]
    fn escapes_string_delimiters() {
        assert_eq!(pdf_escape(r"a\b(c)"), r"a\\b\(c\)");
    }

    #[test]
    fn single_page_structure() {
        let pdf = render_pdf(&["Hello (world)".into()], Some("Title"));
        let s = text(&pdf);
        assert!(s.starts_with("%PDF-1.4\n"));
        assert!(s.contains("/BaseFont /Helvetica"));
        assert!(s.contains("/Count 1"));
        assert!(s.contains(r"(Hello \(world\)) Tj"));
        assert!(s.contains("1 0 0 1 72 770 Tm"));
        assert!(s.contains("19 TL"));
        assert!(s.contains("xref\n0 6\n"));
        assert!(s.contains("trailer\n<< /Size 6 /Root 1 0 R >>"));
        assert!(s.ends_with("%%EOF"));
    }

    #[test]
    fn xref_offsets_point_at_objects() {
        let pdf = render_pdf(&["x".into()], None);
        let xref_start = pdf
            .windows(5)
            .position(|w| w == b"xref\n")
            .unwrap();
        // Everything from the xref table on is plain ASCII.
        let tail = std::str::from_utf8(&pdf[xref_start..]).unwrap();
        let entries: Vec<usize> = tail
            .lines()
            .skip(3)
            .take_while(|l| l.ends_with(" n "))
            .map(|l| l[..10].parse().unwrap())
            .collect();
        assert_eq!(entries.len(), 5);
        for (i, offset) in entries.iter().enumerate() {
            assert!(pdf[*offset..].starts_with(format!("{} 0 obj", i + 1).as_bytes()));
        }
        let startxref: usize = tail
            .rsplit("startxref\n")
            .next()
            .and_then(|rest| rest.lines().next())
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(startxref, xref_start);
    }

    #[test]
    fn paginates_long_text() {
        // 36 lines fit on a page; 50 one-line paragraphs produce 99 lines.
        let paragraphs: Vec<String> = (0..50).map(|i| format!("line {i}")).collect();
        let s = text(&render_pdf(&paragraphs, None));
        assert!(s.contains("/Count 3"));
    }
}
