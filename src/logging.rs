//! Logging configuration.
//!
//! The library only ever talks to the `log` facade. A [`LogConfig`] is built
//! once (usually from command-line flags) and handed to the components that
//! need to decide how loudly to report things, e.g. the image fetcher logs a
//! success-after-fallback at `info` only when the level is verbose.

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Named verbosity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum LogLevel {
    /// Warnings and errors only.
    Quiet,
    #[default]
    Normal,
    /// Per-chapter and per-fallback details.
    Verbose,
    /// Everything, including every fetch attempt.
    Debug,
}

impl LogLevel {
    pub fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Quiet => LevelFilter::Warn,
            LogLevel::Normal => LevelFilter::Info,
            LogLevel::Verbose => LevelFilter::Debug,
            LogLevel::Debug => LevelFilter::Trace,
        }
    }
}

/// Logging configuration injected into the pipeline components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
}

impl LogConfig {
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }

    /// Picks a level from the usual `--quiet` / `--verbose` / `--debug` flags.
    /// `debug` wins over `verbose`, which wins over `quiet`.
    pub fn from_flags(quiet: bool, verbose: bool, debug: bool) -> Self {
        let level = if debug {
            LogLevel::Debug
        } else if verbose {
            LogLevel::Verbose
        } else if quiet {
            LogLevel::Quiet
        } else {
            LogLevel::Normal
        };
        Self { level }
    }

    pub fn is_verbose(&self) -> bool {
        self.level >= LogLevel::Verbose
    }

    pub fn is_debug(&self) -> bool {
        self.level >= LogLevel::Debug
    }

    /// Installs `env_logger` with this configuration's filter. `RUST_LOG`,
    /// when set, takes precedence.
    pub fn init_logger(&self) -> Result<()> {
        let default_filter = self.level.filter().to_string().to_lowercase();
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
            .format_timestamp(None)
            .format_target(false)
            .try_init()
            .map_err(|e| Error::Other(format!("Logger already initialised: {e}")))
    }
}
