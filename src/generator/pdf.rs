//! PDF assembly on top of `lopdf`.
//!
//! Image chapters become one page per image with the JPEG data embedded
//! as-is. Chapter and part PDFs are joined by [`merge_pdf_files`], which tries
//! a list of [`MergeStrategy`]s in order and keeps the first that succeeds.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::{ColorType, ImageDecoder, ImageFormat, ImageReader};
use log::{debug, warn};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tokio::task::spawn_blocking;

use crate::error::{Error, Result};
use crate::generator::{BookMetadata, Generator, ensure_parent_dir};
use crate::types::{ContentItem, ContentKind};

const REENCODE_QUALITY: u8 = 95;
/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];
const MAX_TREE_DEPTH: usize = 64;

/// JPEG bytes plus what the image XObject dictionary needs.
struct JpegPage {
    data: Vec<u8>,
    width: u32,
    height: u32,
    color_space: &'static str,
}

fn load_jpeg_page(path: &Path) -> Result<JpegPage> {
    let bytes = std::fs::read(path)?;
    let reader = ImageReader::new(Cursor::new(&bytes)).with_guessed_format()?;

    if reader.format() == Some(ImageFormat::Jpeg) {
        let (width, height, color_type) = {
            let decoder = reader.into_decoder()?;
            let (width, height) = decoder.dimensions();
            (width, height, decoder.color_type())
        };
        let color_space = match color_type {
            ColorType::L8 => Some("DeviceGray"),
            ColorType::Rgb8 => Some("DeviceRGB"),
            _ => None,
        };
        if let Some(color_space) = color_space {
            return Ok(JpegPage {
                data: bytes,
                width,
                height,
                color_space,
            });
        }
    }

    debug!("Re-encoding {} as JPEG for PDF embedding", path.display());
    let image = image::load_from_memory(&bytes)?.to_rgb8();
    let mut data = Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut data, REENCODE_QUALITY);
    image.write_with_encoder(encoder)?;
    Ok(JpegPage {
        data: data.into_inner(),
        width: image.width(),
        height: image.height(),
        color_space: "DeviceRGB",
    })
}

/// Writes one page per image, each page exactly the image's pixel size.
pub fn write_image_pdf(pages: &[PathBuf], output_path: &Path) -> Result<()> {
    if pages.is_empty() {
        return Err(Error::Other("No pages to write into PDF".to_string()));
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());

    for path in pages {
        let page = load_jpeg_page(path)?;
        let (w, h) = (page.width as i64, page.height as i64);

        let mut image_dict = Dictionary::new();
        image_dict.set("Type", Object::Name(b"XObject".to_vec()));
        image_dict.set("Subtype", Object::Name(b"Image".to_vec()));
        image_dict.set("Width", Object::Integer(w));
        image_dict.set("Height", Object::Integer(h));
        image_dict.set("ColorSpace", Object::Name(page.color_space.as_bytes().to_vec()));
        image_dict.set("BitsPerComponent", Object::Integer(8));
        image_dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));
        let image_id = doc.add_object(Stream::new(image_dict, page.data));

        let content = format!("q {w} 0 0 {h} 0 0 cm /Im0 Do Q");
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));

        let mut xobjects = Dictionary::new();
        xobjects.set("Im0", Object::Reference(image_id));
        let mut resources = Dictionary::new();
        resources.set("XObject", Object::Dictionary(xobjects));

        let mut page_dict = Dictionary::new();
        page_dict.set("Type", Object::Name(b"Page".to_vec()));
        page_dict.set("Parent", Object::Reference(pages_id));
        page_dict.set(
            "MediaBox",
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(w),
                Object::Integer(h),
            ]),
        );
        page_dict.set("Resources", Object::Dictionary(resources));
        page_dict.set("Contents", Object::Reference(content_id));
        kids.push(Object::Reference(doc.add_object(page_dict)));
    }

    finish_document(&mut doc, pages_id, kids);
    ensure_parent_dir(output_path)?;
    doc.save(output_path)?;
    Ok(())
}

/// Installs the page tree root and catalog.
fn finish_document(doc: &mut Document, pages_id: ObjectId, kids: Vec<Object>) {
    let mut pages = Dictionary::new();
    pages.set("Type", Object::Name(b"Pages".to_vec()));
    pages.set("Count", Object::Integer(kids.len() as i64));
    pages.set("Kids", Object::Array(kids));
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog.set("Pages", Object::Reference(pages_id));
    let catalog_id = doc.add_object(catalog);
    doc.trailer.set("Root", Object::Reference(catalog_id));
}

/// Looks up `key` on the page's ancestors.
fn inherited_attribute(doc: &Document, page: &Dictionary, key: &[u8]) -> Option<Object> {
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    for _ in 0..MAX_TREE_DEPTH {
        let node = doc.get_object(parent?).and_then(Object::as_dict).ok()?;
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
    None
}

/// The page dictionary with inherited attributes made explicit.
fn flattened_page(doc: &Document, page_id: ObjectId) -> Result<Dictionary> {
    let mut page = doc.get_object(page_id)?.as_dict()?.clone();
    for key in INHERITABLE {
        if !page.has(key) {
            if let Some(value) = inherited_attribute(doc, &page, key) {
                page.set(key.to_vec(), value);
            }
        }
    }
    Ok(page)
}

fn object_type(object: &Object) -> Option<&[u8]> {
    object.as_dict().ok()?.get(b"Type").ok()?.as_name().ok()
}

/// A way of concatenating the pages of several documents.
pub trait MergeStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Produces one document with every page of `documents`, in order.
    fn merge(&self, documents: &[Document]) -> Result<Document>;
}

/// Renumbers each source so ids don't collide, pools all objects, then
/// rebuilds a single page tree and catalog.
pub struct ObjectGraphMerge;

impl MergeStrategy for ObjectGraphMerge {
    fn name(&self) -> &'static str {
        "object-graph"
    }

    fn merge(&self, documents: &[Document]) -> Result<Document> {
        let mut next_id = 1;
        let mut pages: Vec<(ObjectId, Dictionary)> = Vec::new();
        let mut objects: Vec<(ObjectId, Object)> = Vec::new();

        for source in documents {
            let mut source = source.clone();
            source.renumber_objects_with(next_id);
            next_id = source.max_id + 1;

            for page_id in source.get_pages().into_values() {
                pages.push((page_id, flattened_page(&source, page_id)?));
            }
            objects.extend(source.objects);
        }
        if pages.is_empty() {
            return Err(Error::Other("Merged documents contain no pages".to_string()));
        }

        let mut merged = Document::with_version("1.5");
        merged.max_id = next_id;
        for (id, object) in objects {
            match object_type(&object) {
                Some(b"Catalog") | Some(b"Pages") | Some(b"Page") | Some(b"Outlines")
                | Some(b"Outline") => {}
                _ => {
                    merged.objects.insert(id, object);
                }
            }
        }

        let pages_id = merged.new_object_id();
        let mut kids = Vec::with_capacity(pages.len());
        for (id, mut page) in pages {
            page.set("Parent", Object::Reference(pages_id));
            merged.objects.insert(id, Object::Dictionary(page));
            kids.push(Object::Reference(id));
        }
        finish_document(&mut merged, pages_id, kids);
        merged.renumber_objects();
        Ok(merged)
    }
}

/// Deep-copies each page and everything it references into a fresh
/// document. Slower, but tolerant of sources with broken object graphs.
pub struct PageByPageMerge;

struct PageImporter<'a> {
    source: &'a Document,
    ids: HashMap<ObjectId, ObjectId>,
}

impl<'a> PageImporter<'a> {
    fn new(source: &'a Document) -> Self {
        Self {
            source,
            ids: HashMap::new(),
        }
    }

    fn import_reference(&mut self, dest: &mut Document, id: ObjectId) -> Object {
        if let Some(mapped) = self.ids.get(&id) {
            return Object::Reference(*mapped);
        }
        let Ok(object) = self.source.get_object(id) else {
            warn!("Dropping dangling reference {} {} R", id.0, id.1);
            return Object::Null;
        };
        let object = object.clone();
        let new_id = dest.new_object_id();
        self.ids.insert(id, new_id);
        let copied = self.copy(dest, object);
        dest.objects.insert(new_id, copied);
        Object::Reference(new_id)
    }

    fn copy_dictionary(&mut self, dest: &mut Document, dict: Dictionary) -> Dictionary {
        let mut out = Dictionary::new();
        for (key, value) in dict.iter() {
            if key.as_slice() == b"Parent" {
                continue;
            }
            let value = self.copy(dest, value.clone());
            out.set(key.clone(), value);
        }
        out
    }

    fn copy(&mut self, dest: &mut Document, object: Object) -> Object {
        match object {
            Object::Reference(id) => self.import_reference(dest, id),
            Object::Array(items) => {
                Object::Array(items.into_iter().map(|o| self.copy(dest, o)).collect())
            }
            Object::Dictionary(dict) => Object::Dictionary(self.copy_dictionary(dest, dict)),
            Object::Stream(mut stream) => {
                stream.dict = self.copy_dictionary(dest, stream.dict);
                Object::Stream(stream)
            }
            other => other,
        }
    }
}

impl MergeStrategy for PageByPageMerge {
    fn name(&self) -> &'static str {
        "page-by-page"
    }

    fn merge(&self, documents: &[Document]) -> Result<Document> {
        let mut merged = Document::with_version("1.5");
        let pages_id = merged.new_object_id();
        let mut kids = Vec::new();

        for source in documents {
            let mut importer = PageImporter::new(source);
            for page_id in source.get_pages().into_values() {
                let page = flattened_page(source, page_id)?;
                let mut copied = importer.copy_dictionary(&mut merged, page);
                copied.set("Parent", Object::Reference(pages_id));
                kids.push(Object::Reference(merged.add_object(copied)));
            }
        }
        if kids.is_empty() {
            return Err(Error::Other("Merged documents contain no pages".to_string()));
        }

        finish_document(&mut merged, pages_id, kids);
        Ok(merged)
    }
}

/// Strategies tried by [`merge_pdf_files`], in order.
pub fn default_strategies() -> Vec<Box<dyn MergeStrategy>> {
    vec![Box::new(ObjectGraphMerge), Box::new(PageByPageMerge)]
}

/// A PDF text string: plain literal for ASCII, UTF-16BE with BOM otherwise.
fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        Object::String(text.as_bytes().to_vec(), StringFormat::Literal)
    } else {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        Object::String(bytes, StringFormat::Hexadecimal)
    }
}

fn set_info(doc: &mut Document, title: &str, author: &str) {
    let mut info = Dictionary::new();
    info.set("Title", text_string(title));
    if !author.is_empty() {
        info.set("Author", text_string(author));
    }
    let info_id = doc.add_object(info);
    doc.trailer.set("Info", Object::Reference(info_id));
}

/// Concatenates `inputs` into `output_path`, optionally setting the
/// document title and author.
pub fn merge_pdf_files(
    inputs: &[PathBuf],
    output_path: &Path,
    info: Option<(&str, &str)>,
) -> Result<()> {
    merge_with(&default_strategies(), inputs, output_path, info)
}

pub fn merge_with(
    strategies: &[Box<dyn MergeStrategy>],
    inputs: &[PathBuf],
    output_path: &Path,
    info: Option<(&str, &str)>,
) -> Result<()> {
    let mut documents = Vec::with_capacity(inputs.len());
    for input in inputs {
        documents.push(Document::load(input)?);
    }

    let mut last_error = String::from("no strategy available");
    for strategy in strategies {
        match strategy.merge(&documents) {
            Ok(mut merged) => {
                debug!(
                    "Merged {} PDFs with {} strategy",
                    documents.len(),
                    strategy.name()
                );
                if let Some((title, author)) = info {
                    set_info(&mut merged, title, author);
                }
                ensure_parent_dir(output_path)?;
                merged.save(output_path)?;
                return Ok(());
            }
            Err(e) => {
                warn!("PDF merge strategy {} failed: {}", strategy.name(), e);
                last_error = e.to_string();
            }
        }
    }

    Err(Error::PdfMerge {
        attempted: strategies.len(),
        last_error,
    })
}

/// Generator that merges PDF items into one document.
///
/// Input files are deleted once the merged document is written.
pub struct PdfBook {
    output_path: PathBuf,
    inputs: Vec<PathBuf>,
    info: Option<(String, String)>,
}

#[async_trait]
impl Generator for PdfBook {
    fn new(output_path: &Path) -> Result<Self> {
        ensure_parent_dir(output_path)?;
        Ok(PdfBook {
            output_path: output_path.to_path_buf(),
            inputs: Vec::new(),
            info: None,
        })
    }

    async fn add_item(&mut self, item: &ContentItem) -> Result<&mut Self> {
        if item.kind == ContentKind::Pdf {
            self.inputs.push(item.path.clone());
        } else {
            debug!("PDF skips non-PDF item {}", item.path.display());
        }
        Ok(self)
    }

    async fn set_metadata(&mut self, metadata: &BookMetadata) -> Result<&mut Self> {
        self.info = Some((metadata.title.clone(), metadata.author_line()));
        Ok(self)
    }

    async fn save(self) -> Result<PathBuf> {
        if self.inputs.is_empty() {
            return Err(Error::Other(format!(
                "No PDF items for {}",
                self.output_path.display()
            )));
        }

        let inputs = self.inputs.clone();
        let output = self.output_path.clone();
        let info = self.info.clone();
        spawn_blocking(move || {
            let info = info.as_ref().map(|(t, a)| (t.as_str(), a.as_str()));
            merge_pdf_files(&inputs, &output, info)
        })
        .await
        .map_err(|e| Error::AsyncTaskError(e.to_string()))??;

        for input in &self.inputs {
            if input != &self.output_path {
                if let Err(e) = tokio::fs::remove_file(input).await {
                    debug!("Could not remove merged input {}: {}", input.display(), e);
                }
            }
        }
        Ok(self.output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_titles_stay_literal() {
        match text_string("Plain") {
            Object::String(bytes, StringFormat::Literal) => assert_eq!(bytes, b"Plain".to_vec()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn non_ascii_titles_use_utf16_with_bom() {
        match text_string("é") {
            Object::String(bytes, StringFormat::Hexadecimal) => {
                assert_eq!(bytes, vec![0xFE, 0xFF, 0x00, 0xE9]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    struct Failing;

    impl MergeStrategy for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn merge(&self, _documents: &[Document]) -> Result<Document> {
            Err(Error::Other("boom".to_string()))
        }
    }

    #[test]
    fn reports_every_failed_strategy() {
        let strategies: Vec<Box<dyn MergeStrategy>> = vec![Box::new(Failing), Box::new(Failing)];
        let out = std::env::temp_dir().join("seihon_never_written.pdf");
        match merge_with(&strategies, &[], &out, None) {
            Err(Error::PdfMerge {
                attempted,
                last_error,
            }) => {
                assert_eq!(attempted, 2);
                assert!(last_error.contains("boom"));
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        assert!(!out.exists());
    }
}
