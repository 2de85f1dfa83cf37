// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

use crate::watcher::WatcherError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(
        "No sincedb path given: set sincedb_path, or SINCEDB_PATH or HOME in the environment \
         so followed file positions can be tracked"
    )]
    NoSinceDbPath,

    #[error("Malformed sincedb entry on line {line}: {reason}")]
    MalformedEntry { line: usize, reason: String },

    #[error("Invalid glob pattern: {0}")]
    InvalidGlob(String),

    #[error("Watcher error: {0}")]
    Watcher(#[from] WatcherError),
}

pub type Result<T> = std::result::Result<T, Error>;
