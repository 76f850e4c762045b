//! XHTML rendering of text chapters and the XML escaping shared with the
//! archive builders.

use std::path::Path;

use crate::error::Result;

/// Escapes the five XML special characters.
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Renders a text block as a standalone XHTML document linking `text.css`.
///
/// The title becomes an `<h2>`, every paragraph a `<p>`, and blank
/// paragraphs a `<p>&#160;</p>` spacer.
pub fn render_xhtml(paragraphs: &[String], title: Option<&str>, lang: &str) -> String {
    let title = title.map(str::trim).filter(|t| !t.is_empty());

    let mut body: Vec<String> = Vec::new();
    if let Some(title) = title {
        body.push(format!("<h2>{}</h2>", escape_xml(title)));
    }
    for paragraph in paragraphs {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            body.push("<p>&#160;</p>".to_string());
        } else {
            body.push(format!("<p>{}</p>", escape_xml(paragraph)));
        }
    }
    let body = if body.is_empty() {
        "<p></p>".to_string()
    } else {
        body.join("\n    ")
    };

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="{lang}" lang="{lang}">
<head>
  <meta charset="utf-8"/>
  <title>{title}</title>
  <link rel="stylesheet" type="text/css" href="text.css"/>
</head>
<body>
    {body}
</body>
</html>
"#,
        lang = escape_xml(lang),
        title = escape_xml(title.unwrap_or("Text")),
        body = body,
    )
}

/// Renders and writes an XHTML document.
pub fn write_xhtml(paragraphs: &[String], path: &Path, title: Option<&str>, lang: &str) -> Result<()> {
    std::fs::write(path, render_xhtml(paragraphs, title, lang))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_xml(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&apos;");
    }

    #[test]
    fn renders_title_paragraphs_and_spacers() {
        let doc = render_xhtml(
            &["Tom & Jerry".into(), "  ".into(), "<end>".into()],
            Some("Chapter 1"),
            "en",
        );
        assert!(doc.contains("<h2>Chapter 1</h2>"));
        assert!(doc.contains("<p>Tom &amp; Jerry</p>"));
        assert!(doc.contains("<p>&#160;</p>"));
        assert!(doc.contains("<p>&lt;end&gt;</p>"));
        assert!(doc.contains("<title>Chapter 1</title>"));
        assert!(doc.contains(r#"href="text.css""#));
    }

    #[test]
    fn untitled_documents_get_a_default_title() {
        let doc = render_xhtml(&[], None, "fr");
        assert!(doc.contains("<title>Text</title>"));
        assert!(doc.contains(r#"lang="fr""#));
        assert!(doc.contains("<p></p>"));
    }
}
