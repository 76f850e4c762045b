//! Path utilities: output file naming and helpers for scanning directories
//! of numbered files.

use std::cmp::Ordering;
use std::path::Path;

use regex::Regex;

/// Characters removed from any name that becomes part of an output path.
const FORBIDDEN_CHARS: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

/// Sanitizes a name for use in an output file name.
///
/// Strips `\ / * ? : " < > |` and replaces spaces with underscores.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !FORBIDDEN_CHARS.contains(c))
        .map(|c| if c == ' ' { '_' } else { c })
        .collect()
}

/// Builds the base name shared by every output file of a run:
/// `<title>[_<site>][_<group>_<group>...]`, each part sanitized.
pub fn output_base_name(title: &str, site: &str, groups: &[String]) -> String {
    let safe_site = sanitize_filename(site);
    let mut base = if safe_site.is_empty() {
        sanitize_filename(title)
    } else {
        format!("{}_{}", sanitize_filename(title), safe_site)
    };
    if !groups.is_empty() {
        let joined = groups
            .iter()
            .map(|g| sanitize_filename(g))
            .collect::<Vec<_>>()
            .join("_");
        base.push('_');
        base.push_str(&joined);
    }
    base
}

/// Formats a chapter number for file names: `3.0` → `3`, `2.5` → `2.5`.
pub fn format_chapter_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Gets the file name from a path with fallback to lossy conversion.
pub fn get_file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Lower-cased extension including the leading dot, or an empty string.
pub fn dotted_extension(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Checks if a filename starts with a dot (hidden file or marker).
pub fn is_hidden_file(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

/// Extracts the last number in a file name using `regex`.
///
/// The first capture group is used when present, otherwise the whole match.
pub fn extract_number_from_filename(path: &Path, regex: &Regex) -> Option<f64> {
    let file_name = get_file_name_lossy(path);

    regex
        .captures_iter(&file_name)
        .last()
        .and_then(|cap| {
            let capture = cap.get(1).or_else(|| cap.get(0))?.as_str();
            capture.parse::<f64>().ok()
        })
}

/// Orders two paths by the number in their file names. Paths without a
/// number sort after numbered ones, and ties fall back to the file name.
pub fn compare_paths_by_number(a: &Path, b: &Path, regex: &Regex) -> Ordering {
    let a_num = extract_number_from_filename(a, regex);
    let b_num = extract_number_from_filename(b, regex);

    let by_number = match (a_num, b_num) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_number.then_with(|| get_file_name_lossy(a).cmp(&get_file_name_lossy(b)))
}
