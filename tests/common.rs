//! Common test utilities for the Seihon crate.
//!
//! Provides unique temporary directories, synthetic images, an in-memory
//! [`Transport`] that counts requests, and a scripted [`SiteAdapter`].

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use rand::{Rng, distributions::Alphanumeric};
use seihon::error::{Error, Result};
use seihon::fetch::Transport;
use seihon::prelude::*;
use seihon::text::{TextPageStyle, TextRasterizer, Typeface};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::fs;

#[allow(dead_code)]
pub const TEST_TMP_DIR: &str = "tests/tmp";
#[allow(dead_code)]
pub const LONG_TEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-test directory layout.
#[allow(dead_code)]
pub struct TestDirs {
    pub base: PathBuf,
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    pub work_dir: PathBuf,
}

/// Creates a clean, uniquely named test directory with `source`, `output`
/// and `work` subdirectories.
#[allow(dead_code)]
pub async fn setup_test_dirs(sub_path: &str) -> TestDirs {
    let rand_string: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let base = PathBuf::from(TEST_TMP_DIR).join(format!("{}-{}", sub_path, rand_string));
    if base.exists() {
        fs::remove_dir_all(&base).await.unwrap();
    }
    let dirs = TestDirs {
        source_dir: base.join("source"),
        output_dir: base.join("output"),
        work_dir: base.join("work"),
        base,
    };
    for dir in [&dirs.source_dir, &dirs.output_dir, &dirs.work_dir] {
        fs::create_dir_all(dir).await.unwrap();
    }
    dirs
}

/// JPEG bytes of a solid `width`x`height` image.
#[allow(dead_code)]
pub fn jpeg_bytes(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([shade, shade, shade]));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, image::ImageFormat::Jpeg)
        .unwrap();
    out.into_inner()
}

/// Writes a solid JPEG image at `path`.
#[allow(dead_code)]
pub async fn create_dummy_image(path: &Path, width: u32, height: u32, shade: u8) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, jpeg_bytes(width, height, shade)).await?;
    Ok(())
}

/// Rasterizer using the built-in bitmap font on small pages, independent of
/// the fonts installed on the machine.
#[allow(dead_code)]
pub fn test_rasterizer() -> TextRasterizer {
    let style = TextPageStyle {
        width: 400,
        height: 600,
        font_size: 16,
        margin: 20,
        quality: 90,
    };
    TextRasterizer::new(Typeface::builtin(style.font_size), style)
}

/// In-memory [`Transport`]: serves scripted bodies and fails every other URL.
#[derive(Default)]
pub struct ScriptedTransport {
    bodies: HashMap<String, Vec<u8>>,
    requests: Mutex<Vec<String>>,
    count: AtomicUsize,
}

#[allow(dead_code)]
impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(mut self, url: &str, body: Vec<u8>) -> Self {
        self.bodies.insert(url.to_string(), body);
        self
    }

    pub fn request_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(url.to_string());
        match self.bodies.get(url) {
            Some(body) => {
                fs::write(dest, body).await?;
                Ok(body.len() as u64)
            }
            None => Err(Error::NotFound(format!("404 {url}"))),
        }
    }
}

/// Fetcher over a shared [`ScriptedTransport`] without retry delays.
#[allow(dead_code)]
pub fn scripted_fetcher(transport: &Arc<ScriptedTransport>) -> ImageFetcher {
    ImageFetcher::new(
        Arc::clone(transport) as Arc<dyn Transport>,
        RetryPolicy::new(2, Duration::ZERO),
        LogConfig::default(),
    )
}

/// Adapter serving a fixed series, chapter pool and per-chapter media.
pub struct ScriptedAdapter {
    pub series: SeriesMetadata,
    pub chapters: Vec<ChapterRecord>,
    pub media: HashMap<String, Vec<MediaEntry>>,
    media_calls: AtomicUsize,
}

#[allow(dead_code)]
impl ScriptedAdapter {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            series: SeriesMetadata::new(id, title),
            chapters: Vec::new(),
            media: HashMap::new(),
            media_calls: AtomicUsize::new(0),
        }
    }

    /// Adds a chapter version whose media are `entries`.
    pub fn chapter(mut self, chap: &str, group: &str, entries: Vec<MediaEntry>) -> Self {
        let hid = format!("{chap}-{group}");
        self.chapters.push(ChapterRecord {
            hid: hid.clone(),
            chap: chap.to_string(),
            title: Some(format!("Chapter {chap}")),
            url: format!("scripted://series/{hid}"),
            group_name: Some(group.to_string()),
            ..Default::default()
        });
        self.media.insert(hid, entries);
        self
    }

    pub fn media_calls(&self) -> usize {
        self.media_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SiteAdapter for ScriptedAdapter {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn matches(&self, url: &str) -> bool {
        url.starts_with("scripted://")
    }

    async fn fetch_series_metadata(&self, _url: &str) -> Result<SeriesMetadata> {
        Ok(self.series.clone())
    }

    async fn list_chapters(
        &self,
        _series: &SeriesMetadata,
        _language: &str,
    ) -> Result<Vec<ChapterRecord>> {
        Ok(self.chapters.clone())
    }

    async fn fetch_chapter_media(&self, chapter: &ChapterRecord) -> Result<Vec<MediaEntry>> {
        self.media_calls.fetch_add(1, Ordering::SeqCst);
        self.media
            .get(&chapter.hid)
            .cloned()
            .ok_or_else(|| Error::adapter("scripted", format!("no media for {}", chapter.hid)))
    }
}

/// Names of all entries of a zip file, in archive order.
#[allow(dead_code)]
pub fn zip_entry_names(path: &Path) -> Vec<String> {
    let file = std::fs::File::open(path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

/// Bytes of one zip entry.
#[allow(dead_code)]
pub fn read_zip_entry(path: &Path, name: &str) -> Vec<u8> {
    let file = std::fs::File::open(path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut content = Vec::new();
    entry.read_to_end(&mut content).unwrap();
    content
}

#[allow(dead_code)]
pub fn read_zip_text(path: &Path, name: &str) -> String {
    String::from_utf8(read_zip_entry(path, name)).unwrap()
}
