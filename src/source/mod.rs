//! Site adapters and their registry.
//!
//! An adapter translates one website into series metadata, a chapter list
//! and per-chapter media entries. The pipeline only talks to the
//! [`SiteAdapter`] trait; the [`AdapterRegistry`] picks the adapter once per
//! run from an explicit site name or the series URL.

use std::collections::HashMap;

use async_trait::async_trait;
use log::debug;

use crate::error::{Error, Result};
use crate::select::best_version;
use crate::types::{ChapterRecord, MediaEntry, SeriesMetadata};

pub mod local;

pub use local::LocalSource;

/// Capability contract of a site adapter.
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    /// Short lowercase identifier, also used in output file names.
    fn name(&self) -> &'static str;

    /// Whether this adapter handles `url`.
    fn matches(&self, url: &str) -> bool;

    async fn fetch_series_metadata(&self, url: &str) -> Result<SeriesMetadata>;

    /// Every listed chapter version, in any order.
    async fn list_chapters(
        &self,
        series: &SeriesMetadata,
        language: &str,
    ) -> Result<Vec<ChapterRecord>>;

    /// Media entries of one chapter in reading order.
    async fn fetch_chapter_media(&self, chapter: &ChapterRecord) -> Result<Vec<MediaEntry>>;

    /// Scan group credited for a chapter version.
    fn group_name(&self, chapter: &ChapterRecord) -> Option<String> {
        chapter.group_name.clone()
    }

    /// Reduces competing versions of one chapter number to one.
    fn select_best_version<'a>(
        &self,
        versions: &'a [ChapterRecord],
        preferred_groups: &[String],
        mix_by_upvote: bool,
    ) -> Option<&'a ChapterRecord> {
        best_version(versions, preferred_groups, mix_by_upvote, |c| {
            self.group_name(c)
        })
    }
}

/// True if the host of `url` contains any of `domains`.
pub fn host_matches(url: &str, domains: &[&str]) -> bool {
    let Ok(parsed) = url::Url::parse(url) else {
        return false;
    };
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    !host.is_empty() && domains.iter().any(|d| host.contains(d))
}

/// Adapters by name, in registration order.
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn SiteAdapter>>,
    by_name: HashMap<String, usize>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Registry with the bundled adapters.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.add(LocalSource::new());
        registry
    }

    /// Registers an adapter; a later adapter with the same name replaces the
    /// lookup entry of the earlier one.
    pub fn add(&mut self, adapter: impl SiteAdapter + 'static) -> &mut Self {
        self.add_boxed(Box::new(adapter))
    }

    pub fn add_boxed(&mut self, adapter: Box<dyn SiteAdapter>) -> &mut Self {
        let name = adapter.name().to_ascii_lowercase();
        self.by_name.insert(name, self.adapters.len());
        self.adapters.push(adapter);
        self
    }

    pub fn get(&self, name: &str) -> Option<&dyn SiteAdapter> {
        self.by_name
            .get(&name.to_ascii_lowercase())
            .and_then(|&index| self.adapters.get(index))
            .map(|a| a.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// An explicit `site` wins; otherwise the first adapter whose
    /// [`matches`](SiteAdapter::matches) accepts `url`.
    pub fn resolve(&self, url: &str, site: Option<&str>) -> Result<&dyn SiteAdapter> {
        if let Some(site) = site.filter(|s| !s.trim().is_empty()) {
            return self
                .get(site.trim())
                .ok_or_else(|| Error::NotFound(format!("Unknown site adapter: {site}")));
        }

        let adapter = self
            .adapters
            .iter()
            .find(|a| a.matches(url))
            .map(|a| a.as_ref())
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "Unable to auto-detect a site adapter for {url}; known adapters: {}",
                    self.names().join(", ")
                ))
            })?;
        debug!("Resolved adapter '{}' for {}", adapter.name(), url);
        Ok(adapter)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
