//! Custom error types and result handling for Seihon operations.
//!
//! All fallible operations return a [`Result<T>`], a type alias for
//! `std::result::Result<T, Error>`. Per-image problems (an exhausted fetch,
//! an undecodable download) are deliberately *not* represented here: the
//! fetcher reports them as `Ok(None)` and the layout stage logs and skips
//! them, so a single bad page never aborts a chapter.
//!
use std::path::PathBuf;

/// Type alias for Results with Seihon errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all Seihon operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O errors from the standard library
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Regular expression parsing errors
    #[error(transparent)]
    Regex(#[from] regex::Error),
    /// Image decoding/encoding errors
    #[error(transparent)]
    Image(#[from] image::ImageError),
    /// ZIP file operation errors
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    /// HTTP transport errors
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// JSON (de)serialisation errors, mostly from the persisted run state
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// PDF object model errors
    #[error(transparent)]
    Pdf(#[from] lopdf::Error),
    /// Async task join errors
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    RunConfigBuilder(#[from] crate::pipeline::RunConfigBuilderError),
    /// Error for invalid file or directory paths
    #[error("The given path '{0:?}' is invalid: {1}")]
    InvalidPath(PathBuf, String),
    /// Error for failed asynchronous tasks
    #[error("Asynchronous task failed: {0}")]
    AsyncTaskError(String),
    /// Error for unsupported operations or formats (e.g., unknown image extension)
    #[error("Unsupported: {0}")]
    Unsupported(String),
    /// Error for resources that couldn't be found (e.g., adapter, parameters file)
    #[error("Not found: {0}")]
    NotFound(String),
    /// Nothing survived chapter selection
    #[error("No chapters selected: {0}")]
    NoChapters(String),
    /// A site adapter failed to produce required data
    #[error("Adapter '{adapter}' failed: {message}")]
    Adapter { adapter: String, message: String },
    /// No usable font could be loaded for text rasterisation
    #[error("Font error: {0}")]
    Font(String),
    /// Every PDF merge strategy failed
    #[error("PDF merge failed after trying {attempted} strategies: {last_error}")]
    PdfMerge { attempted: usize, last_error: String },
    /// Invalid user-supplied option value
    #[error("Invalid option '{option}': {message}")]
    InvalidOption { option: &'static str, message: String },
    /// Other errors that don't fit into specific categories
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Shorthand for an [`Error::Adapter`].
    pub fn adapter(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Adapter {
            adapter: adapter.into(),
            message: message.into(),
        }
    }

    /// Shorthand for an [`Error::InvalidOption`].
    pub fn invalid_option(option: &'static str, message: impl Into<String>) -> Self {
        Error::InvalidOption {
            option,
            message: message.into(),
        }
    }
}

// Basic From<String> conversion for convenience
impl From<String> for Error {
    fn from(error: String) -> Self {
        Error::Other(error)
    }
}

impl From<&str> for Error {
    fn from(error: &str) -> Self {
        Error::Other(error.to_string())
    }
}
