// SPDX-License-Identifier: Apache-2.0

//! Traits and types for file discovery.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Error type for watcher operations
#[derive(Error, Debug)]
pub enum WatcherError {
    /// A watch pattern could not be parsed
    #[error("invalid watch pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// Kind of file event delivered to the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// File appeared while running
    Create,
    /// File found by the first discovery pass at startup
    CreateInitial,
    /// File grew
    Modify,
    /// File is gone, or was replaced under the same path
    Delete,
    /// Nothing changed since the last stat
    NoUpdate,
    /// Catch-all for kinds the dispatcher does not handle
    Other,
}

impl FileEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileEventKind::Create => "create",
            FileEventKind::CreateInitial => "create_initial",
            FileEventKind::Modify => "modify",
            FileEventKind::Delete => "delete",
            FileEventKind::NoUpdate => "noupdate",
            FileEventKind::Other => "other",
        }
    }
}

impl std::fmt::Display for FileEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The discovery collaborator driving the tail.
///
/// Implementations find files matching the watched patterns, track their
/// identity and size, and report changes by calling back into the dispatcher
/// synchronously, one event at a time.
pub trait Discovery {
    /// Add a glob pattern of files to follow.
    fn watch(&mut self, pattern: &str) -> Result<(), WatcherError>;

    /// Basename patterns of files to ignore.
    fn exclude(&mut self, patterns: &[String]) -> Result<(), WatcherError>;

    /// Track paths only, ignoring identity changes under the same name.
    fn follow_only_path(&mut self, follow_only_path: bool);

    /// Deliver events to `on_event` until `cancel` is cancelled.
    fn subscribe(
        &mut self,
        stat_interval: Duration,
        discover_interval: Duration,
        cancel: &CancellationToken,
        on_event: &mut dyn FnMut(FileEventKind, &Path),
    ) -> Result<(), WatcherError>;
}
