//! Persisted run state.
//!
//! Every run works inside `tmp_<series-id>/` under the working directory:
//!
//! ```text
//! tmp_<id>/
//! ├── run_params.json          RunParameters of the run that created it
//! ├── cover_orig.jpg
//! └── ch_<n>/
//!     ├── <n>_0001.jpg ...     raw downloads
//!     ├── .processed_complete  or .download_complete with no_processing
//!     └── processed/           final pages and rendered text
//! ```
//!
//! A workspace left by an earlier run is resumed only when its parameters
//! equal the current ones. Anything else (missing, unreadable or different
//! parameters) discards the whole directory.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::path_utils::{get_file_name_lossy, sanitize_filename};

pub const PARAMS_FILE: &str = "run_params.json";
pub const PROCESSED_MARKER: &str = ".processed_complete";
pub const DOWNLOADED_MARKER: &str = ".download_complete";
const PROCESSED_DIR: &str = "processed";
/// File name prefix of composed pages inside `processed/`.
pub const PAGE_PREFIX: &str = "p_";

/// Every option that changes downloaded or processed bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    pub width: u32,
    pub aspect_ratio: Option<String>,
    pub quality: u8,
    pub scaling: u8,
    pub chapters: String,
    pub group: Vec<String>,
    pub mix_by_upvote: bool,
    pub no_partials: bool,
    pub no_processing: bool,
}

/// How a run starts relative to what is on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// No earlier workspace existed.
    Fresh,
    /// An earlier workspace was discarded.
    Restarted,
    /// An earlier workspace with identical parameters is reused.
    Resumed,
}

impl StartMode {
    pub fn is_resume(self) -> bool {
        self == StartMode::Resumed
    }
}

/// The `tmp_<id>` directory of one series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(work_dir: &Path, series_id: &str) -> Self {
        Self {
            root: work_dir.join(format!("tmp_{}", sanitize_filename(series_id))),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn params_path(&self) -> PathBuf {
        self.root.join(PARAMS_FILE)
    }

    pub fn chapter_dir(&self, chap: &str) -> PathBuf {
        self.root.join(format!("ch_{}", sanitize_filename(chap)))
    }

    pub fn processed_dir(&self, chap: &str) -> PathBuf {
        self.chapter_dir(chap).join(PROCESSED_DIR)
    }

    pub fn marker_path(&self, chap: &str, no_processing: bool) -> PathBuf {
        let name = if no_processing {
            DOWNLOADED_MARKER
        } else {
            PROCESSED_MARKER
        };
        self.chapter_dir(chap).join(name)
    }

    pub fn has_marker(&self, chap: &str, no_processing: bool) -> bool {
        self.marker_path(chap, no_processing).is_file()
    }

    /// Writes the marker declaring a chapter packaged. The marker lists the
    /// packaged files in order, relative to the workspace root.
    pub fn write_marker(&self, chap: &str, no_processing: bool, packaged: &[PathBuf]) -> Result<()> {
        let path = self.marker_path(chap, no_processing);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let entries: Vec<PathBuf> = packaged
            .iter()
            .map(|p| p.strip_prefix(&self.root).unwrap_or(p).to_path_buf())
            .collect();
        std::fs::write(path, serde_json::to_vec(&entries)?)?;
        Ok(())
    }

    /// Files recorded in a chapter's marker, in packaging order.
    ///
    /// `None` when the marker is missing, empty, unreadable, or names a file
    /// that no longer exists.
    pub fn packaged_files(&self, chap: &str, no_processing: bool) -> Option<Vec<PathBuf>> {
        let raw = std::fs::read(self.marker_path(chap, no_processing)).ok()?;
        let entries: Vec<PathBuf> = match serde_json::from_slice(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("  Marker for Ch {} has no file list ({})", chap, e);
                return None;
            }
        };
        let files: Vec<PathBuf> = entries.into_iter().map(|p| self.root.join(p)).collect();
        if files.is_empty() || files.iter().any(|f| !f.is_file()) {
            return None;
        }
        Some(files)
    }

    /// Reads the parameters persisted by an earlier run.
    pub fn load_parameters(&self) -> Result<RunParameters> {
        let path = self.params_path();
        if !path.is_file() {
            return Err(Error::NotFound(format!(
                "parameters file {}",
                path.display()
            )));
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save_parameters(&self, params: &RunParameters) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let json = serde_json::to_string_pretty(params)?;
        std::fs::write(self.params_path(), json)?;
        Ok(())
    }

    /// Decides between resuming and starting clean, and leaves the
    /// workspace ready for `current`.
    pub fn prepare(&self, current: &RunParameters) -> Result<StartMode> {
        let mut mode = StartMode::Fresh;

        if self.root.is_dir() {
            info!("Temporary directory found. Checking for resume compatibility...");
            match self.load_parameters() {
                Ok(previous) if &previous == current => {
                    info!("  Parameters match. Resuming download.");
                    return Ok(StartMode::Resumed);
                }
                Ok(_) => info!("  Mismatched parameters. Cleaning up and starting fresh."),
                Err(Error::NotFound(_)) => {
                    info!("  No parameters file found. Cleaning up and starting fresh.")
                }
                Err(e) => info!("  Could not read parameters file ({e}). Cleaning up and starting fresh."),
            }
            self.remove()?;
            mode = StartMode::Restarted;
        }

        self.save_parameters(current)?;
        Ok(mode)
    }

    /// Deletes the whole workspace.
    pub fn remove(&self) -> Result<()> {
        remove_dir_if_exists(&self.root)
    }

    /// Deletes one chapter directory.
    pub fn reset_chapter(&self, chap: &str) -> Result<()> {
        remove_dir_if_exists(&self.chapter_dir(chap))
    }
}

pub(crate) fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => {
            debug!("  Cleaning up temporary directory: {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            warn!("Could not remove {}: {}", path.display(), e);
            Err(e.into())
        }
    }
}

fn jpgs_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case("jpg"))
        })
        .collect()
}

/// Final pages of a packaged chapter in reading order: composed pages first,
/// then rendered text pages, each by name.
pub fn collect_processed_pages(workspace: &Workspace, chap: &str) -> Vec<PathBuf> {
    let mut pages = jpgs_in(&workspace.processed_dir(chap));
    pages.sort_by(|a, b| {
        let (a_name, b_name) = (get_file_name_lossy(a), get_file_name_lossy(b));
        match (a_name.starts_with(PAGE_PREFIX), b_name.starts_with(PAGE_PREFIX)) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => a_name.cmp(&b_name),
        }
    });
    pages
}

/// Raw downloads of a chapter (`<n>_<counter>.jpg`) ordered by counter.
pub fn collect_raw_pages(workspace: &Workspace, chap: &str) -> Vec<PathBuf> {
    let prefix = format!("{}_", sanitize_filename(chap));
    let counter = |p: &PathBuf| -> Option<u64> {
        p.file_stem()?
            .to_string_lossy()
            .rsplit('_')
            .next()?
            .parse()
            .ok()
    };

    let mut pages: Vec<PathBuf> = jpgs_in(&workspace.chapter_dir(chap))
        .into_iter()
        .filter(|p| get_file_name_lossy(p).starts_with(&prefix))
        .collect();
    pages.sort_by(|a, b| {
        counter(a)
            .cmp(&counter(b))
            .then_with(|| get_file_name_lossy(a).cmp(&get_file_name_lossy(b)))
    });
    pages
}
