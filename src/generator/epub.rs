use std::collections::HashSet;
use std::fs::File;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::generator::{BookMetadata, ChapterMarker, Generator, ensure_parent_dir};
use crate::path_utils::{dotted_extension, get_file_name_lossy};
use crate::text::escape_xml;
use crate::types::{ContentItem, ContentKind, EpubLayout, media_type};
use async_trait::async_trait;
use log::{debug, warn};
use memmap2::MmapOptions;
use tokio::task::spawn_blocking;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const DEFAULT_VIEWPORT: (u32, u32) = (1200, 1920);
const COVER_QUALITY: u8 = 90;

const IMAGE_STYLE: &str = r#"@charset "UTF-8";
body, html { padding: 0; margin: 0; height: 100%; width: 100%; text-align: center; }
svg, img { max-width: 100vw; max-height: 100vh; object-fit: contain; display: block; margin: auto; }
"#;

const TEXT_STYLE: &str = r#"@charset "UTF-8";
body {
    font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, Helvetica, Arial, sans-serif;
    margin: 1.75em;
    line-height: 1.5;
    color: #111;
}
h1, h2, h3 { margin: 0 0 0.6em 0; }
p { margin: 0 0 0.8em 0; text-align: justify; }
"#;

const NAV_STYLE: &str = r#"@charset "UTF-8";
html, body { height: 100%; margin: 0; padding: 0; }
body {
    font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, Helvetica, Arial, sans-serif;
    background-color: #fff;
    color: #000;
    padding: 2em;
    box-sizing: border-box;
    text-align: left;
    column-count: 3;
    column-gap: 2em;
}
h1 { text-align: center; column-span: all; margin-top: 0; }
ol { list-style-type: none; padding: 0; margin: 0; }
li { padding: 0.1em 0; break-inside: avoid-column; }
a { text-decoration: none; color: #005a9c; }
"#;

/// A page document in spine order.
#[derive(Debug, Clone)]
enum PageDoc {
    /// Generated wrapper page around `images/<image_file>`.
    Image {
        image_file: String,
        image_id: String,
        media_type: &'static str,
    },
    /// A copied XHTML text document.
    Text { href: String, id: String },
}

impl PageDoc {
    fn href(&self, index: usize) -> String {
        match self {
            PageDoc::Image { .. } => format!("page_{index}.xhtml"),
            PageDoc::Text { href, .. } => href.clone(),
        }
    }
}

/// A generator for EPUB 3 files built directly as an OCF zip container.
///
/// Image files are streamed into the archive as they are added; the page
/// wrappers, navigation document and package document are written on
/// [`save`](Generator::save), once the metadata is known.
pub struct Epub {
    zip: Option<ZipWriter<File>>,
    options: SimpleFileOptions,
    output_path: PathBuf,
    docs: Vec<PageDoc>,
    used_names: HashSet<String>,
    image_counter: usize,
    text_counter: usize,
    viewport: Option<(u32, u32)>,
    metadata: Option<BookMetadata>,
}

impl Epub {
    fn writer(&mut self) -> Result<&mut ZipWriter<File>> {
        self.zip
            .as_mut()
            .ok_or_else(|| Error::Unsupported("Zip writer not available".to_string()))
    }

    fn write_entry(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let options = self.options;
        let zip = self.writer()?;
        zip.start_file(name, options)?;
        zip.write_all(bytes)?;
        Ok(())
    }

    async fn add_image(&mut self, path: &Path) -> Result<()> {
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to open image file '{}': {}", path.display(), e),
            ))
        })?;
        let file_std = file.into_std().await;
        let mmap = spawn_blocking(move || unsafe { MmapOptions::new().map(&file_std) })
            .await
            .map_err(|e| Error::AsyncTaskError(e.to_string()))??;

        if self.viewport.is_none() {
            self.viewport = Some(match image::image_dimensions(path) {
                Ok(dims) => dims,
                Err(e) => {
                    debug!("Cannot probe viewport from {}: {}", path.display(), e);
                    DEFAULT_VIEWPORT
                }
            });
        }

        let image_file = format!("img_{}{}", self.image_counter, dotted_extension(path));
        self.write_entry(&format!("EPUB/images/{image_file}"), &mmap[..])?;

        self.docs.push(PageDoc::Image {
            image_file,
            image_id: format!("img_{}", self.image_counter),
            media_type: media_type(path),
        });
        self.image_counter += 1;
        Ok(())
    }

    async fn add_text(&mut self, path: &Path) -> Result<()> {
        let content = tokio::fs::read(path).await?;

        let mut href = get_file_name_lossy(path);
        if !href.to_lowercase().ends_with(".xhtml") || self.used_names.contains(&href) {
            href = format!("text_{}.xhtml", self.text_counter);
        }
        self.write_entry(&format!("EPUB/{href}"), &content)?;
        self.used_names.insert(href.clone());

        self.docs.push(PageDoc::Text {
            href,
            id: format!("text_{}", self.text_counter),
        });
        self.text_counter += 1;
        Ok(())
    }

    fn viewport_meta(&self) -> String {
        let (w, h) = self.viewport.unwrap_or(DEFAULT_VIEWPORT);
        format!(r#"<meta name="viewport" content="width={w}, height={h}"/>"#)
    }
}

/// Re-encodes the cover as JPEG; `None` if it cannot be decoded.
fn encode_cover(path: &Path) -> Option<Vec<u8>> {
    let image = match image::open(path) {
        Ok(image) => image.to_rgb8(),
        Err(e) => {
            warn!("Could not process cover image {}: {}", path.display(), e);
            return None;
        }
    };
    let mut bytes = Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, COVER_QUALITY);
    match image.write_with_encoder(encoder) {
        Ok(()) => Some(bytes.into_inner()),
        Err(e) => {
            warn!("Could not encode cover image {}: {}", path.display(), e);
            None
        }
    }
}

fn render_container_xml() -> &'static str {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="EPUB/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#
}

fn render_image_page(title: &str, lang: &str, viewport: &str, image_file: &str, number: usize) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" xml:lang="{lang}" lang="{lang}">
<head>
  <meta charset="utf-8"/>
  <title>{title} - Page {number}</title>
  {viewport}
  <link rel="stylesheet" type="text/css" href="style.css"/>
</head>
<body>
  <img src="images/{image_file}" alt="Page {number}"/>
</body>
</html>
"#,
        lang = escape_xml(lang),
        title = escape_xml(title),
    )
}

fn render_cover_page(viewport: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head>
  <meta charset="utf-8"/>
  <title>Cover</title>
  {viewport}
  <link rel="stylesheet" type="text/css" href="style.css"/>
</head>
<body>
  <img src="images/cover.jpg" alt="Cover"/>
</body>
</html>
"#
    )
}

fn render_nav_xhtml(entries: &[(String, String)]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<!DOCTYPE html>\n");
    out.push_str("<html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\">\n");
    out.push_str("<head>\n");
    out.push_str("  <meta charset=\"utf-8\"/>\n");
    out.push_str("  <title>Table of Contents</title>\n");
    out.push_str("  <link rel=\"stylesheet\" type=\"text/css\" href=\"nav_style.css\"/>\n");
    out.push_str("</head>\n");
    out.push_str("<body>\n");
    out.push_str("  <nav epub:type=\"toc\" id=\"toc\">\n");
    out.push_str("    <h1>Table of Contents</h1>\n");
    out.push_str("    <ol>\n");
    for (href, label) in entries {
        out.push_str(&format!(
            "      <li><a href=\"{}\">{}</a></li>\n",
            escape_xml(href),
            escape_xml(label)
        ));
    }
    out.push_str("    </ol>\n");
    out.push_str("  </nav>\n");
    out.push_str("</body>\n");
    out.push_str("</html>\n");
    out
}

/// Resolves chapter markers to `(href, label)` pairs, dropping markers that
/// point past the last page document.
fn nav_entries(markers: &[ChapterMarker], docs: &[PageDoc]) -> Vec<(String, String)> {
    markers
        .iter()
        .filter(|m| m.page_index < docs.len())
        .map(|m| (docs[m.page_index].href(m.page_index), m.label.clone()))
        .collect()
}

/// `(rendition:layout, rendition:flow)` for the book.
pub fn rendition(has_text: bool, layout: EpubLayout) -> (&'static str, &'static str) {
    if has_text {
        ("reflowable", "auto")
    } else {
        match layout {
            EpubLayout::Vertical => ("pre-paginated", "scrolled-continuous"),
            EpubLayout::Page => ("pre-paginated", "paginated"),
        }
    }
}

struct PackageParts<'a> {
    metadata: &'a BookMetadata,
    manifest: Vec<String>,
    spine: Vec<String>,
    has_cover: bool,
    has_text: bool,
}

fn render_content_opf(parts: &PackageParts<'_>) -> String {
    let meta = parts.metadata;
    let series = &meta.series;

    let mut metadata: Vec<String> = Vec::new();
    metadata.push(format!(
        r#"<dc:identifier id="bookid">series-{}</dc:identifier>"#,
        escape_xml(&series.id)
    ));
    metadata.push(format!("<dc:title>{}</dc:title>", escape_xml(&meta.title)));
    metadata.push(format!("<dc:language>{}</dc:language>", escape_xml(&meta.language)));
    metadata.push(format!(
        r#"<meta property="dcterms:modified">{}</meta>"#,
        meta.modified.format("%Y-%m-%dT%H:%M:%SZ")
    ));
    for author in &series.authors {
        metadata.push(format!("<dc:creator>{}</dc:creator>", escape_xml(author)));
    }
    for artist in &series.artists {
        metadata.push(format!("<dc:contributor>{}</dc:contributor>", escape_xml(artist)));
    }
    for group in &meta.scan_groups {
        metadata.push(format!("<dc:publisher>{}</dc:publisher>", escape_xml(group)));
    }
    if let Some(description) = series.description.as_deref().filter(|d| !d.is_empty()) {
        metadata.push(format!("<dc:description>{}</dc:description>", escape_xml(description)));
    }
    for tag in series.tags() {
        metadata.push(format!("<dc:subject>{}</dc:subject>", escape_xml(&tag)));
    }
    if parts.has_cover {
        metadata.push(r#"<meta name="cover" content="cover-image"/>"#.to_string());
    }

    let (layout, flow) = rendition(parts.has_text, meta.epub_layout);
    metadata.push(format!(r#"<meta property="rendition:layout">{layout}</meta>"#));
    metadata.push(r#"<meta property="rendition:spread">none</meta>"#.to_string());
    metadata.push(format!(r#"<meta property="rendition:flow">{flow}</meta>"#));

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="bookid" version="3.0" prefix="rendition: http://www.idpf.org/vocab/rendition/#">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" xmlns:opf="http://www.idpf.org/2007/opf">
    {metadata}
  </metadata>
  <manifest>
    {manifest}
  </manifest>
  <spine>
    {spine}
  </spine>
</package>
"#,
        metadata = metadata.join("\n    "),
        manifest = parts.manifest.join("\n    "),
        spine = parts.spine.join("\n    "),
    )
}

#[async_trait]
impl Generator for Epub {
    fn new(output_path: &Path) -> Result<Self> {
        ensure_parent_dir(output_path)?;
        let file = File::create(output_path).map_err(|e| {
            Error::InvalidPath(
                output_path.to_path_buf(),
                format!("Failed to create archive: {}", e),
            )
        })?;
        let mut zip = ZipWriter::new(file);

        // `mimetype` must be the first entry and stored uncompressed.
        let stored = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .unix_permissions(0o644);
        zip.start_file("mimetype", stored)?;
        zip.write_all(b"application/epub+zip")?;

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644);
        zip.start_file("META-INF/container.xml", options)?;
        zip.write_all(render_container_xml().as_bytes())?;

        Ok(Epub {
            zip: Some(zip),
            options,
            output_path: output_path.to_path_buf(),
            docs: Vec::new(),
            used_names: HashSet::new(),
            image_counter: 0,
            text_counter: 0,
            viewport: None,
            metadata: None,
        })
    }

    async fn add_item(&mut self, item: &ContentItem) -> Result<&mut Self> {
        match item.kind {
            ContentKind::Image => self.add_image(&item.path).await?,
            ContentKind::Xhtml => self.add_text(&item.path).await?,
            ContentKind::Pdf | ContentKind::TextFile => {
                debug!("EPUB skips item {}", item.path.display());
            }
        }
        Ok(self)
    }

    async fn set_metadata(&mut self, metadata: &BookMetadata) -> Result<&mut Self> {
        self.metadata = Some(metadata.clone());
        Ok(self)
    }

    async fn save(mut self) -> Result<PathBuf> {
        let metadata = self
            .metadata
            .take()
            .ok_or_else(|| Error::Other("EPUB metadata was never set".to_string()))?;
        let viewport = self.viewport_meta();

        self.write_entry("EPUB/style.css", IMAGE_STYLE.as_bytes())?;
        self.write_entry("EPUB/text.css", TEXT_STYLE.as_bytes())?;
        self.write_entry("EPUB/nav_style.css", NAV_STYLE.as_bytes())?;

        let mut manifest: Vec<String> = vec![
            r#"<item id="css" href="style.css" media-type="text/css"/>"#.to_string(),
            r#"<item id="text_css" href="text.css" media-type="text/css"/>"#.to_string(),
            r#"<item id="nav_css" href="nav_style.css" media-type="text/css"/>"#.to_string(),
        ];
        let mut spine: Vec<String> = Vec::new();

        let cover_bytes = match metadata.cover.clone().filter(|p| p.exists()) {
            Some(path) => spawn_blocking(move || encode_cover(&path))
                .await
                .map_err(|e| Error::AsyncTaskError(e.to_string()))?,
            None => None,
        };
        let has_cover = cover_bytes.is_some();
        if let Some(bytes) = cover_bytes {
            self.write_entry("EPUB/images/cover.jpg", &bytes)?;
            self.write_entry("EPUB/cover.xhtml", render_cover_page(&viewport).as_bytes())?;
            manifest.push(
                r#"<item id="cover-image" href="images/cover.jpg" media-type="image/jpeg" properties="cover-image"/>"#
                    .to_string(),
            );
            manifest.push(r#"<item id="cover" href="cover.xhtml" media-type="application/xhtml+xml"/>"#.to_string());
            spine.push(r#"<itemref idref="cover"/>"#.to_string());
        }

        let docs = std::mem::take(&mut self.docs);
        let mut first_image = true;
        for (index, doc) in docs.iter().enumerate() {
            match doc {
                PageDoc::Image {
                    image_file,
                    image_id,
                    media_type,
                } => {
                    // Without a dedicated cover, the first page doubles as the cover image.
                    let properties = if first_image && !has_cover {
                        r#" properties="cover-image""#
                    } else {
                        ""
                    };
                    first_image = false;
                    manifest.push(format!(
                        r#"<item id="{image_id}" href="images/{image_file}" media-type="{media_type}"{properties}/>"#
                    ));

                    let page = render_image_page(
                        &metadata.title,
                        &metadata.language,
                        &viewport,
                        image_file,
                        index + 1,
                    );
                    let href = doc.href(index);
                    self.write_entry(&format!("EPUB/{href}"), page.as_bytes())?;
                    manifest.push(format!(
                        r#"<item id="page_{index}" href="{href}" media-type="application/xhtml+xml"/>"#
                    ));
                    spine.push(format!(r#"<itemref idref="page_{index}"/>"#));
                }
                PageDoc::Text { href, id } => {
                    manifest.push(format!(
                        r#"<item id="{id}" href="{}" media-type="application/xhtml+xml"/>"#,
                        escape_xml(href)
                    ));
                    spine.push(format!(r#"<itemref idref="{id}"/>"#));
                }
            }
        }

        let entries = nav_entries(&metadata.chapter_markers, &docs);
        if !metadata.chapter_markers.is_empty() {
            self.write_entry("EPUB/nav.xhtml", render_nav_xhtml(&entries).as_bytes())?;
            manifest.push(
                r#"<item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>"#
                    .to_string(),
            );
        }

        let has_text = docs.iter().any(|d| matches!(d, PageDoc::Text { .. }));
        let opf = render_content_opf(&PackageParts {
            metadata: &metadata,
            manifest,
            spine,
            has_cover,
            has_text,
        });
        self.write_entry("EPUB/content.opf", opf.as_bytes())?;

        let zip = self
            .zip
            .take()
            .ok_or_else(|| Error::Unsupported("Zip writer not available".to_string()))?;
        spawn_blocking(move || zip.finish().map(|_| ()).map_err(Error::Zip))
            .await
            .map_err(|e| Error::AsyncTaskError(e.to_string()))??;

        Ok(self.output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendition_follows_content() {
        assert_eq!(rendition(true, EpubLayout::Page), ("reflowable", "auto"));
        assert_eq!(
            rendition(false, EpubLayout::Vertical),
            ("pre-paginated", "scrolled-continuous")
        );
        assert_eq!(rendition(false, EpubLayout::Page), ("pre-paginated", "paginated"));
    }

    #[test]
    fn nav_entries_skip_out_of_range_markers() {
        let docs = vec![
            PageDoc::Image {
                image_file: "img_0.jpg".into(),
                image_id: "img_0".into(),
                media_type: "image/jpeg",
            },
            PageDoc::Text {
                href: "3_text_00.xhtml".into(),
                id: "text_0".into(),
            },
        ];
        let markers = vec![
            ChapterMarker::chapter("1", 0),
            ChapterMarker::chapter("2", 1),
            ChapterMarker::chapter("3", 5),
        ];
        let entries = nav_entries(&markers, &docs);
        assert_eq!(
            entries,
            vec![
                ("page_0.xhtml".to_string(), "Chapter 1".to_string()),
                ("3_text_00.xhtml".to_string(), "Chapter 2".to_string()),
            ]
        );
    }
}
