//! Image fetching with URL-variant fallback.
//!
//! Image hosts frequently serve the same page under a different extension or
//! a `-m` suffixed name than the one advertised. [`ImageFetcher`] probes an
//! ordered, de-duplicated list of such variants, retrying each a bounded
//! number of times, and reports an image that never arrives as `Ok(None)`
//! rather than an error.

use async_trait::async_trait;
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::logging::LogConfig;
use crate::path_utils::get_file_name_lossy;

/// Extensions substituted into every candidate URL, in probe order.
pub const VARIANT_EXTENSIONS: [&str; 5] = [".webp", ".png", ".jpg", ".jpeg", ".avif"];

/// Suffix of the alternate ("modified") image name some hosts use.
const MODIFIER_SUFFIX: &str = "-m";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("seihon/", env!("CARGO_PKG_VERSION"));

/// Bounded retry discipline for a single candidate URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Tries per candidate, at least one.
    pub attempts: u32,
    /// Pause between two tries of the same candidate.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }
}

/// Moves bytes from a URL into a local file.
///
/// Any error means the attempt failed; the caller decides whether to retry.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Streams `url` into `dest`, returning the number of bytes written.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// [`Transport`] backed by a `reqwest` client.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    /// Wraps an already configured client (cookies, headers, proxies).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        if url.starts_with("file://") {
            let source = url::Url::parse(url)
                .ok()
                .and_then(|u| u.to_file_path().ok())
                .ok_or_else(|| Error::InvalidPath(PathBuf::from(url), "not a local file URL".into()))?;
            return Ok(fs::copy(&source, dest).await?);
        }

        let mut response = self.client.get(url).send().await?.error_for_status()?;

        let mut file = fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

/// Splits `url` into `(base, extension)` the way a file path would be split:
/// the extension starts at the last dot of the last path segment, unless
/// that dot leads the segment.
fn split_extension(url: &str) -> (&str, &str) {
    let segment_start = url.rfind('/').map(|i| i + 1).unwrap_or(0);
    let segment = &url[segment_start..];
    let trimmed = segment.trim_start_matches('.');
    let leading = segment.len() - trimmed.len();
    match trimmed.rfind('.') {
        Some(dot) => url.split_at(segment_start + leading + dot),
        None => (url, ""),
    }
}

/// Builds the ordered, de-duplicated list of URLs to probe for one image:
/// the URL itself, its base with each known extension, the `-m` variant with
/// the original extension, then the `-m` variant with each known extension.
pub fn candidate_urls(url: &str) -> Vec<String> {
    let (base, original_ext) = split_extension(url);
    let modified = format!("{base}{MODIFIER_SUFFIX}");

    let mut candidates: Vec<String> = Vec::with_capacity(2 + 2 * VARIANT_EXTENSIONS.len());
    candidates.push(url.to_string());
    candidates.extend(VARIANT_EXTENSIONS.iter().map(|ext| format!("{base}{ext}")));
    candidates.push(format!("{modified}{original_ext}"));
    candidates.extend(VARIANT_EXTENSIONS.iter().map(|ext| format!("{modified}{ext}")));

    let mut unique: Vec<String> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !unique.contains(&candidate) {
            unique.push(candidate);
        }
    }
    unique
}

fn url_file_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// Downloads images through a [`Transport`] with variant fallback and retries.
#[derive(Clone)]
pub struct ImageFetcher {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    log: LogConfig,
}

impl ImageFetcher {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryPolicy, log: LogConfig) -> Self {
        Self {
            transport,
            retry,
            log,
        }
    }

    /// Fetcher over a fresh [`HttpTransport`].
    pub fn http(retry: RetryPolicy, log: LogConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new()?), retry, log))
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// Fetches `url` into `dest_folder/filename`.
    ///
    /// Returns `Ok(None)` when every candidate exhausted its retries; the
    /// image is then considered permanently missing. Errors are reserved for
    /// local failures such as being unable to create `dest_folder`.
    pub async fn fetch(
        &self,
        url: &str,
        dest_folder: &Path,
        filename: &str,
    ) -> Result<Option<PathBuf>> {
        fs::create_dir_all(dest_folder).await?;
        let dest = dest_folder.join(filename);

        let candidates = candidate_urls(url);
        let mut failed_a_variant = false;

        for candidate in &candidates {
            if failed_a_variant {
                debug!("  Trying next variant: {}", url_file_name(candidate));
            } else {
                trace!("  Trying URL variant: {}", url_file_name(candidate));
            }

            if self.try_candidate(candidate, &dest, filename).await {
                if failed_a_variant && self.log.is_verbose() {
                    info!("  Downloaded {} using variant {}", filename, url_file_name(candidate));
                } else {
                    debug!("  Downloaded {} using variant {}", filename, url_file_name(candidate));
                }
                return Ok(Some(dest));
            }
            failed_a_variant = true;
        }

        warn!(
            "Skipping image {} after trying all {} URL variants",
            filename,
            candidates.len()
        );
        Ok(None)
    }

    async fn try_candidate(&self, candidate: &str, dest: &Path, filename: &str) -> bool {
        let attempts = self.retry.attempts.max(1);
        for attempt in 1..=attempts {
            match self.transport.download(candidate, dest).await {
                Ok(_) => return true,
                Err(e) => {
                    debug!(
                        "  Attempt {}/{} failed for {} ({}): {}",
                        attempt,
                        attempts,
                        filename,
                        url_file_name(candidate),
                        e
                    );
                    if attempt < attempts && !self.retry.delay.is_zero() {
                        tokio::time::sleep(self.retry.delay).await;
                    }
                }
            }
        }
        if fs::try_exists(dest).await.unwrap_or(false) {
            let _ = fs::remove_file(dest).await;
        }
        false
    }
}

/// Writes bytes an adapter already fetched, the counterpart of
/// [`ImageFetcher::fetch`] for `binary_image` entries.
pub async fn store_bytes(data: &[u8], dest_folder: &Path, filename: &str) -> Result<PathBuf> {
    fs::create_dir_all(dest_folder).await?;
    let dest = dest_folder.join(filename);
    fs::write(&dest, data).await.map_err(|e| {
        Error::InvalidPath(
            dest.clone(),
            format!("Failed to write {}: {}", get_file_name_lossy(&dest), e),
        )
    })?;
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_follow_probe_order() {
        let c = candidate_urls("https://cdn.example/p/01.jpg");
        assert_eq!(
            c,
            vec![
                "https://cdn.example/p/01.jpg",
                "https://cdn.example/p/01.webp",
                "https://cdn.example/p/01.png",
                "https://cdn.example/p/01.jpeg",
                "https://cdn.example/p/01.avif",
                "https://cdn.example/p/01-m.jpg",
                "https://cdn.example/p/01-m.webp",
                "https://cdn.example/p/01-m.png",
                "https://cdn.example/p/01-m.jpeg",
                "https://cdn.example/p/01-m.avif",
            ]
        );
    }

    #[test]
    fn candidates_without_extension() {
        let c = candidate_urls("https://cdn.example/p/page");
        assert_eq!(c.len(), 12);
        assert_eq!(c[0], "https://cdn.example/p/page");
        assert_eq!(c[6], "https://cdn.example/p/page-m");
        assert_eq!(c[11], "https://cdn.example/p/page-m.avif");
    }

    #[test]
    fn split_extension_ignores_dots_in_host_and_leading_dots() {
        assert_eq!(split_extension("https://a.b/x/y.png"), ("https://a.b/x/y", ".png"));
        assert_eq!(split_extension("https://a.b/x/.hidden"), ("https://a.b/x/.hidden", ""));
        assert_eq!(split_extension("img.tar.gz"), ("img.tar", ".gz"));
    }

    #[test]
    fn retry_policy_keeps_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts, 1);
        assert_eq!(RetryPolicy::default().attempts, 2);
    }
}
