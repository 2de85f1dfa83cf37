// SPDX-License-Identifier: Apache-2.0

//! The event dispatcher.
//!
//! A [`Tail`] turns discovery events into opens, drains and closes of file
//! sessions, and keeps the since-database in step with what has been
//! delivered. Every path is either untracked or open; each event is handled
//! to completion before the next one arrives.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TailConfig;
use crate::error::Result;
use crate::input::{FileId, FileSessions};
use crate::persistence::{FlushStatus, SinceDb};
use crate::sink::RecordSink;
use crate::watcher::{Discovery, FileEventKind};

/// Stops a running [`Tail`] and requests checkpoint writes from outside its
/// event loop, e.g. from a signal handler thread.
#[derive(Debug, Clone)]
pub struct TailHandle {
    sincedb: Arc<SinceDb>,
    cancel: CancellationToken,
}

impl TailHandle {
    /// Write the since-database now, then tell discovery to stop.
    pub fn quit(&self) {
        info!("tail stopping");
        self.sincedb.flush(true);
        self.cancel.cancel();
    }

    /// Write the since-database now, bypassing the write interval.
    pub fn sincedb_write(&self, reason: &str) -> FlushStatus {
        debug!(reason, "sincedb write requested");
        self.sincedb.flush(true)
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub struct Tail {
    config: TailConfig,
    sincedb: Arc<SinceDb>,
    sessions: FileSessions,
    /// Identity each path was last opened with
    path_ids: HashMap<PathBuf, FileId>,
    cancel: CancellationToken,
}

impl Tail {
    /// Validate `config` and load the since-database it points at.
    pub fn new(config: TailConfig) -> Result<Self> {
        config.validate()?;

        let sincedb = Arc::new(SinceDb::open(
            &config.sincedb_path,
            config.sincedb_write_interval,
        ));
        let sessions = FileSessions::new(
            config.delimiter.as_bytes().to_vec(),
            config.start_new_files_at,
            config.open_warn_interval,
        );

        Ok(Self {
            config,
            sincedb,
            sessions,
            path_ids: HashMap::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &TailConfig {
        &self.config
    }

    pub fn sincedb(&self) -> &SinceDb {
        &self.sincedb
    }

    pub fn handle(&self) -> TailHandle {
        TailHandle {
            sincedb: self.sincedb.clone(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn is_open(&self, path: &Path) -> bool {
        self.sessions.is_open(path)
    }

    /// Number of open sessions
    pub fn open_files(&self) -> usize {
        self.sessions.len()
    }

    /// Apply the exclude and follow-only-path settings to `discovery`. Call
    /// this before watching any pattern.
    pub fn configure_discovery<D>(&self, discovery: &mut D) -> Result<()>
    where
        D: Discovery + ?Sized,
    {
        discovery.exclude(&self.config.exclude)?;
        discovery.follow_only_path(self.config.follow_only_path);
        Ok(())
    }

    /// Handle events from `discovery` until [`Tail::quit`] or
    /// [`TailHandle::quit`] is called.
    pub fn subscribe<D, S>(&mut self, discovery: &mut D, sink: &mut S) -> Result<()>
    where
        D: Discovery + ?Sized,
        S: RecordSink + ?Sized,
    {
        let cancel = self.cancel.clone();
        let stat_interval = self.config.stat_interval;
        let discover_interval = self.config.discover_interval;

        info!(
            sincedb_path = ?self.config.sincedb_path,
            stat_interval = ?stat_interval,
            discover_interval = ?discover_interval,
            "tail started"
        );

        discovery.subscribe(
            stat_interval,
            discover_interval,
            &cancel,
            &mut |kind: FileEventKind, path: &Path| self.handle_event(kind, path, &mut *sink),
        )?;

        // Records may have been delivered after quit()'s write
        if self.sincedb.is_pending() {
            self.sincedb.flush(true);
        }

        info!(open_files = self.sessions.len(), "tail stopped");
        Ok(())
    }

    /// Route one discovery event.
    pub fn handle_event<S>(&mut self, kind: FileEventKind, path: &Path, sink: &mut S)
    where
        S: RecordSink + ?Sized,
    {
        match kind {
            FileEventKind::Create | FileEventKind::CreateInitial => {
                if self.sessions.is_open(path) {
                    debug!(path = ?path, %kind, "already open");
                    return;
                }
                if self.open(path, kind) {
                    self.drain(path, sink, true);
                }
            }
            FileEventKind::Modify => {
                if !self.sessions.is_open(path) {
                    debug!(path = ?path, %kind, "modify for a file that is not open");
                    if !self.open(path, kind) {
                        return;
                    }
                }
                self.drain(path, sink, true);
            }
            FileEventKind::Delete => {
                debug!(path = ?path, "file deleted");
                if self.sessions.is_open(path) {
                    // Read the old handle to its end only. Content that
                    // replaced it arrives with the next create.
                    self.drain(path, sink, false);
                    self.sessions.close(path);
                }
                if let Some(file_id) = self.path_ids.remove(path) {
                    self.sincedb.forget(file_id);
                }
            }
            FileEventKind::NoUpdate => {
                self.sincedb.flush_if_pending();
            }
            FileEventKind::Other => {
                warn!(path = ?path, %kind, "unknown event type");
            }
        }
    }

    /// Request a since-database write now, bypassing the write interval.
    pub fn sincedb_write(&self, reason: &str) -> FlushStatus {
        self.handle().sincedb_write(reason)
    }

    /// Write the since-database and stop discovery.
    pub fn quit(&self) {
        self.handle().quit()
    }

    fn open(&mut self, path: &Path, kind: FileEventKind) -> bool {
        if !self.sessions.open(path, kind, &self.sincedb) {
            return false;
        }
        if let Some(file_id) = self.sessions.file_id(path) {
            self.path_ids.insert(path.to_path_buf(), file_id);
        }
        true
    }

    fn drain<S>(&mut self, path: &Path, sink: &mut S, rewind_on_shrink: bool)
    where
        S: RecordSink + ?Sized,
    {
        match self
            .sessions
            .drain(path, &self.sincedb, sink, rewind_on_shrink)
        {
            Ok(true) => {
                self.sincedb.flush(false);
            }
            Ok(false) => {}
            Err(e) => {
                warn!(path = ?path, "read failed, closing file: {}", e);
                self.sessions.close(path);
            }
        }
    }
}
