//! Integration tests for the Seihon crate.
//!
//! These tests run whole downloads against a scripted adapter and an
//! in-memory transport, from chapter selection to the finished books.

use seihon::error::{Error, Result};
use seihon::prelude::*;
use seihon::state::StartMode;
use std::time::Duration;
use tokio::time::timeout;

mod common;
use common::{
    LONG_TEST_TIMEOUT, ScriptedAdapter, ScriptedTransport, TestDirs, create_dummy_image,
    jpeg_bytes, read_zip_entry, read_zip_text, scripted_fetcher, setup_test_dirs,
    test_rasterizer, zip_entry_names,
};

const CDN: &str = "https://cdn.example.com";

fn base_config(dirs: &TestDirs, format: OutputFormat) -> RunConfigBuilder {
    let mut builder = RunConfig::builder();
    builder
        .series_url("scripted://series/test")
        .output_format(format)
        .output_dir(dirs.output_dir.clone())
        .work_dir(dirs.work_dir.clone())
        .retry(RetryPolicy::new(1, Duration::ZERO));
    builder
}

fn binary(width: u32, height: u32, shade: u8) -> MediaEntry {
    MediaEntry::BinaryImage {
        data: jpeg_bytes(width, height, shade),
        extension: "jpg".to_string(),
        name: None,
    }
}

fn text(paragraphs: &[&str], title: Option<&str>) -> MediaEntry {
    MediaEntry::Text(TextBlock::new(
        paragraphs.iter().map(|p| p.to_string()).collect(),
        title.map(String::from),
    ))
}

async fn run(
    config: RunConfig,
    adapter: &ScriptedAdapter,
    transport: &Arc<ScriptedTransport>,
) -> Result<RunReport> {
    let controller = RunController::new(config, adapter, scripted_fetcher(transport))
        .with_rasterizer(test_rasterizer());
    timeout(LONG_TEST_TIMEOUT, controller.run())
        .await
        .expect("Test timed out")
}

/// Two URL-backed chapters and a cover, all served by the transport.
fn served_series() -> (ScriptedAdapter, ScriptedTransport) {
    let mut adapter = ScriptedAdapter::new("777", "Test Series")
        .chapter(
            "1",
            "Scans",
            vec![
                MediaEntry::url(format!("{CDN}/1/001.jpg")),
                MediaEntry::url(format!("{CDN}/1/002.jpg")),
            ],
        )
        .chapter("2", "Scans", vec![MediaEntry::url(format!("{CDN}/2/001.jpg"))]);
    adapter.series.cover_url = Some(format!("{CDN}/cover.jpg"));

    let transport = ScriptedTransport::new()
        .serve(&format!("{CDN}/cover.jpg"), jpeg_bytes(200, 300, 10))
        .serve(&format!("{CDN}/1/001.jpg"), jpeg_bytes(200, 300, 60))
        .serve(&format!("{CDN}/1/002.jpg"), jpeg_bytes(200, 300, 120))
        .serve(&format!("{CDN}/2/001.jpg"), jpeg_bytes(200, 300, 180));
    (adapter, transport)
}

fn zip_contents(path: &Path) -> Vec<(String, Vec<u8>)> {
    zip_entry_names(path)
        .into_iter()
        .map(|name| {
            let bytes = read_zip_entry(path, &name);
            (name, bytes)
        })
        .collect()
}

#[tokio::test]
async fn test_full_pipeline_cbz_with_cover() -> Result<()> {
    let test_dirs = setup_test_dirs("pipeline_cbz").await;
    let (adapter, transport) = served_series();
    let transport = Arc::new(transport);

    let config = base_config(&test_dirs, OutputFormat::Cbz)
        .width(200u32)
        .aspect_ratio("2")
        .build()?;
    let report = run(config, &adapter, &transport).await?;

    let expected = test_dirs.output_dir.join("Test_Series_scripted.cbz");
    assert_eq!(report.outputs, vec![expected.clone()]);
    assert_eq!(report.packaged, vec!["1", "2"]);
    assert_eq!(report.start_mode, StartMode::Fresh);

    // Cover, chapter 1 composed into 400 + 200 rows, chapter 2 as one page.
    assert_eq!(
        zip_entry_names(&expected),
        vec!["0000.jpg", "0001.jpg", "0002.jpg", "0003.jpg", "ComicInfo.xml"]
    );
    let comic_info = read_zip_text(&expected, "ComicInfo.xml");
    assert!(comic_info.contains("<PageCount>4</PageCount>"));
    assert!(comic_info.contains("<Publisher>Scans</Publisher>"));

    let first_page = image::load_from_memory(&read_zip_entry(&expected, "0001.jpg"))?;
    assert_eq!((first_page.width(), first_page.height()), (200, 400));

    assert!(!report.workspace.exists(), "workspace should be cleaned up");
    Ok(())
}

#[tokio::test]
async fn test_split_by_chapter_count_builds_three_parts() -> Result<()> {
    let test_dirs = setup_test_dirs("split_chapters").await;
    let mut adapter = ScriptedAdapter::new("split", "Split Series");
    for chap in ["1", "2", "3", "4", "5"] {
        adapter = adapter.chapter(chap, "G", vec![binary(100, 100, 50)]);
    }
    let transport = Arc::new(ScriptedTransport::new());

    let config = base_config(&test_dirs, OutputFormat::Cbz)
        .width(100u32)
        .split("2ch")
        .build()?;
    let report = run(config, &adapter, &transport).await?;

    let names: Vec<String> = report
        .outputs
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec![
            "Split_Series_scripted_Ch_1-2.cbz",
            "Split_Series_scripted_Ch_3-4.cbz",
            "Split_Series_scripted_Ch_5-5.cbz",
        ]
    );

    let page_counts: Vec<String> = report
        .outputs
        .iter()
        .map(|p| read_zip_text(p, "ComicInfo.xml"))
        .collect();
    assert!(page_counts[0].contains("<PageCount>2</PageCount>"));
    assert!(page_counts[0].contains("<Title>Split Series (Ch_1-2)</Title>"));
    assert!(page_counts[1].contains("<PageCount>2</PageCount>"));
    assert!(page_counts[2].contains("<PageCount>1</PageCount>"));
    assert_eq!(transport.request_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_split_by_size_closes_part_before_overflow() -> Result<()> {
    let test_dirs = setup_test_dirs("split_size").await;
    let mut adapter = ScriptedAdapter::new("sized", "Sized");
    for chap in ["1", "2", "3"] {
        adapter = adapter.chapter(chap, "G", vec![binary(100, 100, 90)]);
    }
    let transport = Arc::new(ScriptedTransport::new());

    // Any single processed page is far below 1 MB but above 1 byte.
    let config = base_config(&test_dirs, OutputFormat::Cbz)
        .width(100u32)
        .split("1B")
        .build()?;
    let report = run(config, &adapter, &transport).await?;

    assert_eq!(report.outputs.len(), 3);
    assert!(report.outputs[2].ends_with("Sized_scripted_Ch_3-3.cbz"));
    Ok(())
}

#[tokio::test]
async fn test_resume_reuses_packaged_chapters_without_requests() -> Result<()> {
    let test_dirs = setup_test_dirs("resume_cbz").await;

    let (adapter, transport) = served_series();
    let transport = Arc::new(transport);
    let config = base_config(&test_dirs, OutputFormat::Cbz)
        .width(200u32)
        .aspect_ratio("2")
        .no_cleanup(true)
        .build()?;
    let first = run(config.clone(), &adapter, &transport).await?;
    assert!(transport.request_count() > 0);
    assert!(first.workspace.join("run_params.json").is_file());
    assert!(first.workspace.join("ch_1").join(".processed_complete").is_file());
    let first_book = zip_contents(&first.outputs[0]);

    let (adapter, _) = served_series();
    let silent = Arc::new(ScriptedTransport::new());
    let second = run(config, &adapter, &silent).await?;

    assert_eq!(second.start_mode, StartMode::Resumed);
    assert_eq!(silent.request_count(), 0);
    assert_eq!(adapter.media_calls(), 0);
    assert_eq!(second.outputs, first.outputs);
    assert_eq!(zip_contents(&second.outputs[0]), first_book);
    Ok(())
}

fn mixed_raw_series() -> ScriptedAdapter {
    ScriptedAdapter::new("mixed", "Mixed Series").chapter(
        "1",
        "G",
        vec![
            MediaEntry::BinaryImage {
                data: jpeg_bytes(120, 90, 30),
                extension: "jpg".to_string(),
                name: Some("splash art".to_string()),
            },
            binary(100, 100, 70),
            text(&["hello world"], None),
        ],
    )
}

#[tokio::test]
async fn test_resume_without_processing_keeps_text_and_named_pages() -> Result<()> {
    let test_dirs = setup_test_dirs("resume_raw_mixed").await;
    let transport = Arc::new(ScriptedTransport::new());
    let config = base_config(&test_dirs, OutputFormat::Cbz)
        .no_processing(true)
        .no_cleanup(true)
        .build()?;

    let first = run(config.clone(), &mixed_raw_series(), &transport).await?;
    let first_book = zip_contents(&first.outputs[0]);
    assert_eq!(
        first_book.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>(),
        vec!["0000.jpg", "0001.jpg", "0002.jpg", "ComicInfo.xml"]
    );
    assert!(first.workspace.join("ch_1").join(".download_complete").is_file());

    let adapter = mixed_raw_series();
    let second = run(config, &adapter, &transport).await?;

    assert_eq!(second.start_mode, StartMode::Resumed);
    assert_eq!(adapter.media_calls(), 0);
    assert_eq!(zip_contents(&second.outputs[0]), first_book);
    Ok(())
}

#[tokio::test]
async fn test_changed_parameters_restart_from_scratch() -> Result<()> {
    let test_dirs = setup_test_dirs("resume_mismatch").await;

    let (adapter, transport) = served_series();
    let transport = Arc::new(transport);
    let config = base_config(&test_dirs, OutputFormat::Cbz)
        .width(200u32)
        .no_cleanup(true)
        .build()?;
    run(config, &adapter, &transport).await?;
    let after_first = transport.request_count();

    let config = base_config(&test_dirs, OutputFormat::Cbz)
        .width(200u32)
        .quality(70u8)
        .no_cleanup(true)
        .build()?;
    let report = run(config, &adapter, &transport).await?;

    assert_eq!(report.start_mode, StartMode::Restarted);
    assert!(transport.request_count() > after_first);
    Ok(())
}

#[tokio::test]
async fn test_restore_parameters() -> Result<()> {
    let test_dirs = setup_test_dirs("restore_params").await;
    let adapter = ScriptedAdapter::new("restore", "Restore")
        .chapter("1", "G", vec![binary(100, 250, 40)])
        .chapter("2", "G", vec![binary(100, 250, 80)]);
    let transport = Arc::new(ScriptedTransport::new());

    let missing = base_config(&test_dirs, OutputFormat::Cbz)
        .restore_parameters(true)
        .build()?;
    let result = run(missing, &adapter, &transport).await;
    assert!(matches!(result, Err(Error::NotFound(_))));

    let config = base_config(&test_dirs, OutputFormat::Cbz)
        .width(100u32)
        .quality(60u8)
        .chapters("1")
        .no_cleanup(true)
        .build()?;
    run(config, &adapter, &transport).await?;

    // Only the output format comes from this invocation.
    let restored = base_config(&test_dirs, OutputFormat::Epub)
        .restore_parameters(true)
        .build()?;
    let report = run(restored, &adapter, &transport).await?;

    assert_eq!(report.start_mode, StartMode::Resumed);
    assert_eq!(report.packaged, vec!["1"]);
    assert!(test_dirs.output_dir.join("Restore_scripted.epub").is_file());
    Ok(())
}

#[tokio::test]
async fn test_epub_with_text_chapter_cover_and_chapter_files() -> Result<()> {
    let test_dirs = setup_test_dirs("pipeline_epub").await;
    let mut adapter = ScriptedAdapter::new("ep", "Epub Series")
        .chapter("1", "G", vec![binary(200, 300, 70), binary(200, 300, 140)])
        .chapter("2", "G", vec![text(&["First line.", "", "Second & last."], None)]);
    adapter.series.cover_url = Some(format!("{CDN}/cover.jpg"));
    let transport = Arc::new(
        ScriptedTransport::new().serve(&format!("{CDN}/cover.jpg"), jpeg_bytes(120, 180, 5)),
    );

    let config = base_config(&test_dirs, OutputFormat::Epub)
        .width(200u32)
        .keep_chapters(true)
        .build()?;
    let report = run(config, &adapter, &transport).await?;

    let book = test_dirs.output_dir.join("Epub_Series_scripted.epub");
    assert_eq!(report.outputs.last(), Some(&book));
    assert!(test_dirs.output_dir.join("Epub_Series_scripted_Ch_1.epub").is_file());
    assert!(test_dirs.output_dir.join("Epub_Series_scripted_Ch_2.epub").is_file());

    let names = zip_entry_names(&book);
    assert_eq!(names[0], "mimetype");
    // 600 rows at the vertical default of 4:3 over 200px make 4 pages.
    for page in ["EPUB/page_0.xhtml", "EPUB/page_3.xhtml", "EPUB/2_text_00.xhtml"] {
        assert!(names.iter().any(|n| n == page), "missing {page}");
    }
    assert!(names.iter().any(|n| n == "EPUB/images/cover.jpg"));

    let opf = read_zip_text(&book, "EPUB/content.opf");
    let cover = opf.find(r#"<itemref idref="cover"/>"#).unwrap();
    let first_page = opf.find(r#"<itemref idref="page_0"/>"#).unwrap();
    assert!(cover < first_page);
    assert!(opf.contains("reflowable"));

    let nav = read_zip_text(&book, "EPUB/nav.xhtml");
    assert!(nav.contains("Chapter 1"));
    assert!(nav.contains(r#"href="2_text_00.xhtml""#));

    let chapter_text = read_zip_text(&book, "EPUB/2_text_00.xhtml");
    assert!(chapter_text.contains("<h2>Chapter 2</h2>"));
    assert!(chapter_text.contains("Second &amp; last."));
    Ok(())
}

fn pdf_page_widths(path: &Path) -> Vec<i64> {
    let doc = lopdf::Document::load(path).unwrap();
    doc.get_pages()
        .values()
        .map(|id| {
            let page = doc.get_object(*id).unwrap().as_dict().unwrap();
            let media_box = page.get(b"MediaBox").unwrap().as_array().unwrap();
            media_box[2].as_i64().unwrap()
        })
        .collect()
}

#[tokio::test]
async fn test_pdf_merges_chapters_in_order() -> Result<()> {
    let test_dirs = setup_test_dirs("pipeline_pdf").await;
    let adapter = ScriptedAdapter::new("pdf", "PDF Series")
        .chapter(
            "1",
            "G",
            vec![
                binary(400, 200, 30),
                text(&["An afterword."], Some("Notes")),
                binary(400, 600, 90),
            ],
        )
        .chapter("2", "G", vec![binary(400, 400, 150)]);
    let transport = Arc::new(ScriptedTransport::new());

    let config = base_config(&test_dirs, OutputFormat::Pdf)
        .width(200u32)
        .build()?;
    let report = run(config, &adapter, &transport).await?;

    let book = test_dirs.output_dir.join("PDF_Series_scripted.pdf");
    assert_eq!(report.outputs, vec![book.clone()]);
    // Image pages of chapter 1, its text page, then chapter 2.
    assert_eq!(pdf_page_widths(&book), vec![200, 200, 595, 200]);

    let doc = lopdf::Document::load(&book)?;
    let info_id = doc.trailer.get(b"Info")?.as_reference()?;
    match doc.get_object(info_id)?.as_dict()?.get(b"Title")? {
        lopdf::Object::String(bytes, _) => assert_eq!(bytes.as_slice(), b"PDF Series"),
        other => panic!("unexpected title object {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_format_none_keeps_images_and_builds_nothing() -> Result<()> {
    let test_dirs = setup_test_dirs("pipeline_none").await;
    let adapter = ScriptedAdapter::new("none", "None Series").chapter(
        "1",
        "G",
        vec![binary(100, 100, 20), text(&["Only words."], None)],
    );
    let transport = Arc::new(ScriptedTransport::new());

    let config = base_config(&test_dirs, OutputFormat::None)
        .width(100u32)
        .build()?;
    let report = run(config, &adapter, &transport).await?;

    assert!(report.outputs.is_empty());
    assert_eq!(report.packaged, vec!["1"]);
    let kept = test_dirs
        .output_dir
        .join("None_Series")
        .join("Chapter_1")
        .join("1_0001.jpg");
    assert!(kept.is_file());
    Ok(())
}

#[tokio::test]
async fn test_format_none_image_only_chapter_counts_as_packaged() -> Result<()> {
    let test_dirs = setup_test_dirs("pipeline_none_images").await;
    let adapter = ScriptedAdapter::new("pics", "Pictures")
        .chapter("1", "G", vec![binary(100, 100, 20), binary(100, 100, 40)]);
    let transport = Arc::new(ScriptedTransport::new());

    let config = base_config(&test_dirs, OutputFormat::None)
        .width(100u32)
        .build()?;
    let report = run(config, &adapter, &transport).await?;

    assert!(report.outputs.is_empty());
    assert!(report.skipped.is_empty());
    assert_eq!(report.packaged, vec!["1"]);
    let kept = test_dirs.output_dir.join("Pictures").join("Chapter_1");
    assert!(kept.join("1_0001.jpg").is_file());
    assert!(kept.join("1_0002.jpg").is_file());
    Ok(())
}

#[tokio::test]
async fn test_empty_chapters_are_skipped_and_specials_reported() -> Result<()> {
    let test_dirs = setup_test_dirs("pipeline_skips").await;
    let adapter = ScriptedAdapter::new("skip", "Skip")
        .chapter("1", "G", vec![MediaEntry::url(format!("{CDN}/missing.jpg"))])
        .chapter("2", "G", vec![binary(100, 100, 99)])
        .chapter("Extra", "G", vec![binary(100, 100, 99)]);
    let transport = Arc::new(ScriptedTransport::new());

    let config = base_config(&test_dirs, OutputFormat::Cbz)
        .width(100u32)
        .build()?;
    let report = run(config, &adapter, &transport).await?;

    assert_eq!(report.skipped, vec!["1"]);
    assert_eq!(report.packaged, vec!["2"]);
    assert_eq!(report.specials, vec!["Extra"]);
    let comic_info = read_zip_text(&report.outputs[0], "ComicInfo.xml");
    assert!(comic_info.contains("<PageCount>1</PageCount>"));
    Ok(())
}

#[tokio::test]
async fn test_local_directory_through_registry() -> Result<()> {
    let test_dirs = setup_test_dirs("pipeline_local").await;
    let series = test_dirs.source_dir.join("My Local Series");
    create_dummy_image(&series.join("cover.jpg"), 80, 120, 10).await?;
    create_dummy_image(&series.join("Chapter 1").join("001.jpg"), 100, 150, 60).await?;
    create_dummy_image(&series.join("Chapter 1").join("002.jpg"), 100, 150, 90).await?;
    create_dummy_image(&series.join("Chapter 2").join("001.jpg"), 100, 150, 120).await?;

    let config = RunConfig::builder()
        .series_url(series.to_string_lossy().into_owned())
        .output_format(OutputFormat::Cbz)
        .width(100u32)
        .output_dir(test_dirs.output_dir.clone())
        .work_dir(test_dirs.work_dir.clone())
        .build()?;
    let registry = AdapterRegistry::with_defaults();
    let report = timeout(LONG_TEST_TIMEOUT, run_with_registry(config, &registry))
        .await
        .expect("Test timed out")?;

    let book = test_dirs.output_dir.join("My_Local_Series_local.cbz");
    assert_eq!(report.outputs, vec![book.clone()]);
    // Cover, 300 rows of chapter 1 as 250 + 50, and chapter 2.
    let comic_info = read_zip_text(&book, "ComicInfo.xml");
    assert!(comic_info.contains("<PageCount>4</PageCount>"));
    assert!(comic_info.contains("<Title>My Local Series</Title>"));
    Ok(())
}
