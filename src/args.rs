// SPDX-License-Identifier: Apache-2.0

//! Command line / config file surface for embedding agents.
//!
//! `TailArgs` is meant to be flattened into the host agent's own `clap` parser
//! or deserialized from its config file, then turned into a [`TailConfig`].

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};
use serde::Deserialize;

use crate::config::{
    DEFAULT_DELIMITER, StartAt, TailConfig, open_warn_interval_from_env, resolve_sincedb_path,
};
use crate::error::Result;

/// Where to start reading files found at startup
#[derive(Copy, Clone, Debug, Default, ValueEnum, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StartAtArg {
    /// Start at the beginning of the file
    Beginning,
    /// Start at the end of the file (tail mode)
    #[default]
    End,
}

impl From<StartAtArg> for StartAt {
    fn from(s: StartAtArg) -> Self {
        match s {
            StartAtArg::Beginning => StartAt::Beginning,
            StartAtArg::End => StartAt::End,
        }
    }
}

#[derive(Debug, Args, Clone, Deserialize)]
#[serde(default)]
pub struct TailArgs {
    /// Path of the since-database recording how far each file has been read.
    /// Falls back to $HOME/.sincedb when unset.
    #[arg(long, env = "SINCEDB_PATH")]
    pub sincedb_path: Option<PathBuf>,

    /// Minimum number of seconds between two sincedb writes
    #[arg(long, env = "TAIL_SINCEDB_WRITE_INTERVAL_SECS", default_value = "10")]
    pub sincedb_write_interval_secs: u64,

    /// How often, in seconds, tracked files are checked for changes
    #[arg(long, env = "TAIL_STAT_INTERVAL_SECS", default_value = "1")]
    pub stat_interval_secs: u64,

    /// How often, in seconds, watched patterns are expanded to find new files
    #[arg(long, env = "TAIL_DISCOVER_INTERVAL_SECS", default_value = "5")]
    pub discover_interval_secs: u64,

    /// Comma-separated basename glob patterns to exclude (e.g., "*.gz,*.old")
    #[arg(long, env = "TAIL_EXCLUDE", value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Where to start reading files found at startup: beginning or end
    #[arg(value_enum, long, env = "TAIL_START_NEW_FILES_AT", default_value = "end")]
    pub start_new_files_at: StartAtArg,

    /// Only follow paths, ignoring file identity changes under the same name
    #[arg(long, env = "TAIL_FOLLOW_ONLY_PATH")]
    pub follow_only_path: bool,

    /// Record delimiter
    #[arg(long, env = "TAIL_DELIMITER", default_value = DEFAULT_DELIMITER)]
    pub delimiter: String,

    /// Seconds between two warnings about the same unreadable file
    #[arg(long, env = "FILEWATCH_OPEN_WARN_INTERVAL")]
    pub open_warn_interval_secs: Option<u64>,
}

impl Default for TailArgs {
    fn default() -> Self {
        Self {
            sincedb_path: None,
            sincedb_write_interval_secs: 10,
            stat_interval_secs: 1,
            discover_interval_secs: 5,
            exclude: Vec::new(),
            start_new_files_at: StartAtArg::End,
            follow_only_path: false,
            delimiter: DEFAULT_DELIMITER.to_string(),
            open_warn_interval_secs: None,
        }
    }
}

impl TailArgs {
    /// Build a validated [`TailConfig`], resolving unset values from the process environment.
    pub fn to_config(&self) -> Result<TailConfig> {
        let env = |key: &str| std::env::var_os(key);

        let config = TailConfig {
            sincedb_path: resolve_sincedb_path(self.sincedb_path.clone(), env)?,
            sincedb_write_interval: Duration::from_secs(self.sincedb_write_interval_secs),
            stat_interval: Duration::from_secs(self.stat_interval_secs),
            discover_interval: Duration::from_secs(self.discover_interval_secs),
            exclude: self.exclude.clone(),
            start_new_files_at: self.start_new_files_at.into(),
            follow_only_path: self.follow_only_path,
            delimiter: self.delimiter.clone(),
            open_warn_interval: match self.open_warn_interval_secs {
                Some(secs) => Duration::from_secs(secs),
                None => open_warn_interval_from_env(env),
            },
        };

        config.validate()?;
        Ok(config)
    }
}
