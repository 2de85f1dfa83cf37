// SPDX-License-Identifier: Apache-2.0

//! Configuration for the tailing engine.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Environment variable consulted when no sincedb path is configured.
pub const SINCEDB_PATH_ENV: &str = "SINCEDB_PATH";

/// Environment variable overriding how often failed opens are warned about (seconds).
pub const OPEN_WARN_INTERVAL_ENV: &str = "FILEWATCH_OPEN_WARN_INTERVAL";

/// File name used under `$HOME` when neither an explicit path nor `SINCEDB_PATH` is set.
pub const DEFAULT_SINCEDB_FILE_NAME: &str = ".sincedb";

pub const DEFAULT_SINCEDB_WRITE_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_STAT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_DISCOVER_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_OPEN_WARN_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_DELIMITER: &str = "\n";

/// Where to start reading a file that has no recorded position when it is
/// found by the initial discovery pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartAt {
    /// Start reading from the beginning of the file
    Beginning,
    /// Start reading from the end of the file (only new content)
    #[default]
    End,
}

impl std::str::FromStr for StartAt {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "beginning" => Ok(StartAt::Beginning),
            "end" => Ok(StartAt::End),
            _ => Err(format!(
                "Invalid start position '{}'. Valid options: beginning, end",
                s
            )),
        }
    }
}

/// Configuration for [`Tail`](crate::Tail).
#[derive(Debug, Clone)]
pub struct TailConfig {
    /// Where file positions are persisted
    pub sincedb_path: PathBuf,
    /// Minimum time between two unforced sincedb writes
    pub sincedb_write_interval: Duration,
    /// How often discovery stats the tracked files
    pub stat_interval: Duration,
    /// How often discovery re-expands the watched patterns
    pub discover_interval: Duration,
    /// Basename glob patterns discovery must ignore
    pub exclude: Vec<String>,
    /// Start policy for files found at startup without a recorded position
    pub start_new_files_at: StartAt,
    /// Track paths only, ignoring identity changes under the same name
    pub follow_only_path: bool,
    /// Record delimiter
    pub delimiter: String,
    /// Minimum time between two open-failure warnings for the same path
    pub open_warn_interval: Duration,
}

impl TailConfig {
    /// Build a configuration with default settings, resolving the sincedb path
    /// and the open warning interval from the process environment.
    pub fn new(sincedb_path: Option<PathBuf>) -> Result<Self> {
        Self::with_env(sincedb_path, |key| std::env::var_os(key))
    }

    /// Same as [`TailConfig::new`] with an explicit environment lookup.
    pub fn with_env<F>(sincedb_path: Option<PathBuf>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        Ok(Self {
            sincedb_path: resolve_sincedb_path(sincedb_path, &env)?,
            sincedb_write_interval: DEFAULT_SINCEDB_WRITE_INTERVAL,
            stat_interval: DEFAULT_STAT_INTERVAL,
            discover_interval: DEFAULT_DISCOVER_INTERVAL,
            exclude: Vec::new(),
            start_new_files_at: StartAt::End,
            follow_only_path: false,
            delimiter: DEFAULT_DELIMITER.to_string(),
            open_warn_interval: open_warn_interval_from_env(&env),
        })
    }

    /// Set the start policy for initially discovered files
    pub fn with_start_at(mut self, start_at: StartAt) -> Self {
        self.start_new_files_at = start_at;
        self
    }

    /// Set the minimum interval between unforced sincedb writes
    pub fn with_write_interval(mut self, interval: Duration) -> Self {
        self.sincedb_write_interval = interval;
        self
    }

    /// Set the record delimiter
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.sincedb_path.as_os_str().is_empty() {
            return Err(Error::NoSinceDbPath);
        }

        if self.delimiter.is_empty() {
            return Err(Error::Config("delimiter must not be empty".to_string()));
        }

        if self.stat_interval.is_zero() {
            return Err(Error::Config("stat_interval must be positive".to_string()));
        }

        for pattern in &self.exclude {
            glob::Pattern::new(pattern)
                .map_err(|e| Error::InvalidGlob(format!("{}: {}", pattern, e)))?;
        }

        Ok(())
    }
}

/// Resolve the sincedb location: an explicit value wins, then `SINCEDB_PATH`,
/// then `$HOME/.sincedb`.
pub fn resolve_sincedb_path<F>(explicit: Option<PathBuf>, env: F) -> Result<PathBuf>
where
    F: Fn(&str) -> Option<OsString>,
{
    if let Some(path) = explicit.filter(|p| !p.as_os_str().is_empty()) {
        return Ok(path);
    }

    if let Some(path) = env(SINCEDB_PATH_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }

    match env("HOME").filter(|p| !p.is_empty()) {
        Some(home) => Ok(PathBuf::from(home).join(DEFAULT_SINCEDB_FILE_NAME)),
        None => Err(Error::NoSinceDbPath),
    }
}

/// Read the open warning interval override, falling back to the default when
/// unset or not a whole number of seconds.
pub fn open_warn_interval_from_env<F>(env: F) -> Duration
where
    F: Fn(&str) -> Option<OsString>,
{
    env(OPEN_WARN_INTERVAL_ENV)
        .and_then(|v| v.into_string().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_OPEN_WARN_INTERVAL)
}
