use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use log::{debug, info};

use seihon::error::Result;
use seihon::prelude::*;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Series URL, `file://` URL or local series directory.
    url: String,

    /// Site adapter to use instead of detecting it from the URL.
    #[arg(long)]
    site: Option<String>,

    /// Chapter language.
    #[arg(long, default_value = "en")]
    language: String,

    /// Output format.
    #[arg(long, default_value = "epub", value_parser = ["pdf", "epub", "cbz", "none"])]
    format: String,

    /// EPUB reading layout.
    #[arg(long, default_value = "vertical", value_parser = ["page", "vertical"])]
    epub_layout: String,

    /// Page width in pixels (format default when omitted).
    #[arg(long)]
    width: Option<u32>,

    /// Page aspect ratio as `W:H` or a height/width number.
    #[arg(long)]
    aspect_ratio: Option<String>,

    /// JPEG quality of processed pages (1-100).
    #[arg(long, default_value_t = 85)]
    quality: u8,

    /// Final scale in percent (1-100).
    #[arg(long, default_value_t = 100)]
    scaling: u8,

    /// Chapters to download, e.g. `1-5,7,9.5`.
    #[arg(long, default_value = "all")]
    chapters: String,

    /// Preferred scan groups, highest priority first. Repeatable or
    /// comma-separated.
    #[arg(long = "group")]
    groups: Vec<String>,

    /// Among preferred groups pick the most upvoted version.
    #[arg(long)]
    mix_by_upvote: bool,

    /// Skip fractional chapters such as 10.5.
    #[arg(long)]
    no_partials: bool,

    /// Package the downloads without resizing or composing.
    #[arg(long)]
    no_processing: bool,

    /// Split books by size (`400MB`) or chapter count (`10ch`).
    #[arg(long)]
    split: Option<String>,

    /// Also copy the raw downloads to the output directory.
    #[arg(long)]
    keep_images: bool,

    /// Also write one file per chapter.
    #[arg(long)]
    keep_chapters: bool,

    /// Keep the temporary workspace after the run.
    #[arg(long)]
    no_cleanup: bool,

    /// Reuse the processing settings saved by an earlier run.
    #[arg(long)]
    restore_parameters: bool,

    /// Where books are written.
    #[arg(long, default_value = "comics")]
    output_dir: PathBuf,

    /// Where the temporary workspace is created.
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,

    /// Tries per image URL variant.
    #[arg(long, default_value_t = 2)]
    retries: u32,

    /// Pause between tries, in milliseconds.
    #[arg(long, default_value_t = 500)]
    retry_delay_ms: u64,

    /// Only print warnings and errors.
    #[arg(short, long)]
    quiet: bool,

    /// Print per-chapter details.
    #[arg(short, long)]
    verbose: bool,

    /// Print every fetch attempt.
    #[arg(long)]
    debug: bool,
}

impl Cli {
    fn into_config(self) -> Result<RunConfig> {
        let log = LogConfig::from_flags(self.quiet, self.verbose, self.debug);
        let mut builder = RunConfig::builder();
        builder
            .series_url(self.url)
            .language(self.language)
            .output_format(self.format.parse::<OutputFormat>()?)
            .epub_layout(self.epub_layout.parse::<EpubLayout>()?)
            .quality(self.quality)
            .scaling(self.scaling)
            .chapters(self.chapters)
            .groups(self.groups)
            .mix_by_upvote(self.mix_by_upvote)
            .no_partials(self.no_partials)
            .no_processing(self.no_processing)
            .keep_images(self.keep_images)
            .keep_chapters(self.keep_chapters)
            .no_cleanup(self.no_cleanup)
            .restore_parameters(self.restore_parameters)
            .output_dir(self.output_dir)
            .work_dir(self.work_dir)
            .retry(RetryPolicy::new(
                self.retries,
                Duration::from_millis(self.retry_delay_ms),
            ))
            .log(log);

        if let Some(site) = self.site {
            builder.site(site);
        }
        if let Some(width) = self.width {
            builder.width(width);
        }
        if let Some(ratio) = self.aspect_ratio {
            builder.aspect_ratio(ratio);
        }
        if let Some(split) = self.split {
            builder.split(split);
        }
        Ok(builder.build()?)
    }
}

async fn try_main() -> Result<()> {
    let cli = Cli::parse();
    LogConfig::from_flags(cli.quiet, cli.verbose, cli.debug).init_logger()?;
    debug!("{cli:?}");

    let config = cli.into_config()?;
    let registry = AdapterRegistry::with_defaults();
    let report = run_with_registry(config, &registry).await?;

    if !report.specials.is_empty() {
        info!("Not downloaded (non-numeric): {}", report.specials.join(", "));
    }
    if !report.skipped.is_empty() {
        info!("Skipped chapters: {}", report.skipped.join(", "));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("seihon: {err}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
