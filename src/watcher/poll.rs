// SPDX-License-Identifier: Apache-2.0

//! Polling-based discovery: glob the watched patterns periodically and stat
//! every tracked file on each tick.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::traits::{Discovery, FileEventKind, WatcherError};
use crate::input::FileId;

/// Longest uninterrupted sleep between cancellation checks
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// What was last seen at a tracked path
#[derive(Debug, Clone, Copy)]
struct FileState {
    file_id: FileId,
    size: u64,
}

impl FileState {
    fn from_metadata(metadata: &fs::Metadata) -> Option<Self> {
        Some(Self {
            file_id: FileId::from_metadata(metadata).ok()?,
            size: metadata.len(),
        })
    }
}

/// Polling discovery collaborator.
///
/// Files matched when a pattern is first watched are announced as
/// `CreateInitial`; files matched by later discovery passes as `Create`.
/// On every stat tick each tracked path yields exactly one outcome: `Delete`
/// when it can no longer be stat'ed, `Delete` then `Create` when it was
/// replaced or shrank, `Modify` when it grew, `NoUpdate` otherwise.
#[derive(Debug, Default)]
pub struct PollWatcher {
    patterns: Vec<String>,
    exclude: Vec<glob::Pattern>,
    follow_only_path: bool,
    /// Tracked paths, in a stable order
    files: BTreeMap<PathBuf, FileState>,
    /// Events found outside `subscribe`, delivered when it starts
    pending_events: Vec<(FileEventKind, PathBuf)>,
}

impl PollWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of paths currently tracked
    pub fn tracked(&self) -> usize {
        self.files.len()
    }

    fn is_excluded(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.exclude.iter().any(|p| p.matches(name))
    }

    /// Expand one pattern, queueing `kind` for every path not yet tracked.
    fn discover_pattern(
        &mut self,
        pattern: &str,
        kind: FileEventKind,
    ) -> Result<(), WatcherError> {
        let paths = glob::glob(pattern).map_err(|source| WatcherError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;

        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    debug!("Error reading glob entry for {}: {}", pattern, e);
                    continue;
                }
            };

            // Already tracked, or filtered out by basename
            if self.files.contains_key(&path) || self.is_excluded(&path) {
                continue;
            }

            // Anything but directories: regular files, pipes and devices
            let state = match fs::metadata(&path) {
                Ok(m) if !m.is_dir() => FileState::from_metadata(&m),
                _ => None,
            };
            let Some(state) = state else {
                continue;
            };

            debug!(path = ?path, kind = %kind, "discovered file");
            self.files.insert(path.clone(), state);
            self.pending_events.push((kind, path));
        }

        Ok(())
    }

    /// Re-expand every watched pattern, queueing `Create` for new paths.
    fn discover(&mut self) {
        let patterns = self.patterns.clone();
        for pattern in &patterns {
            if let Err(e) = self.discover_pattern(pattern, FileEventKind::Create) {
                debug!("Error discovering {}: {}", pattern, e);
            }
        }
    }

    /// Stat every tracked path and queue what changed.
    fn stat_tracked(&mut self) {
        let follow_only_path = self.follow_only_path;
        let events = &mut self.pending_events;

        self.files.retain(|path, state| {
            let current = match fs::metadata(path).ok().and_then(|m| FileState::from_metadata(&m)) {
                Some(current) => current,
                // Gone, or no longer readable: stop tracking it
                None => {
                    events.push((FileEventKind::Delete, path.clone()));
                    return false;
                }
            };

            // A new file under the same name, or the old one cut short, is
            // reported as the old file going away and a new one appearing
            let replaced = current.file_id != state.file_id && !follow_only_path;
            if replaced || current.size < state.size {
                debug!(
                    path = ?path,
                    old_size = state.size,
                    new_size = current.size,
                    replaced,
                    "file rotated"
                );
                events.push((FileEventKind::Delete, path.clone()));
                events.push((FileEventKind::Create, path.clone()));
            } else if current.size > state.size {
                events.push((FileEventKind::Modify, path.clone()));
            } else {
                events.push((FileEventKind::NoUpdate, path.clone()));
            }

            *state = current;
            true
        });
    }

    fn deliver(&mut self, on_event: &mut dyn FnMut(FileEventKind, &Path)) {
        for (kind, path) in std::mem::take(&mut self.pending_events) {
            on_event(kind, &path);
        }
    }
}

impl Discovery for PollWatcher {
    fn watch(&mut self, pattern: &str) -> Result<(), WatcherError> {
        if self.patterns.iter().any(|p| p == pattern) {
            return Ok(());
        }

        self.discover_pattern(pattern, FileEventKind::CreateInitial)?;
        self.patterns.push(pattern.to_string());
        Ok(())
    }

    fn exclude(&mut self, patterns: &[String]) -> Result<(), WatcherError> {
        self.exclude = patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p).map_err(|source| WatcherError::Pattern {
                    pattern: p.clone(),
                    source,
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    fn follow_only_path(&mut self, follow_only_path: bool) {
        self.follow_only_path = follow_only_path;
    }

    fn subscribe(
        &mut self,
        stat_interval: Duration,
        discover_interval: Duration,
        cancel: &CancellationToken,
        on_event: &mut dyn FnMut(FileEventKind, &Path),
    ) -> Result<(), WatcherError> {
        let mut last_discover = Instant::now();

        loop {
            // Events queued by watch() or the previous tick
            self.deliver(on_event);
            if cancel.is_cancelled() {
                break;
            }

            let tick_start = Instant::now();

            self.stat_tracked();
            if last_discover.elapsed() >= discover_interval {
                self.discover();
                last_discover = Instant::now();
            }

            // Sleep out the rest of the tick in short slices so quit() is
            // noticed promptly
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let remaining = stat_interval.saturating_sub(tick_start.elapsed());
                if remaining.is_zero() {
                    break;
                }
                std::thread::sleep(remaining.min(CANCEL_CHECK_INTERVAL));
            }
        }

        debug!("poll watcher stopped");
        Ok(())
    }
}
