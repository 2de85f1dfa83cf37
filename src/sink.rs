// SPDX-License-Identifier: Apache-2.0

//! Where complete records go.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::warn;

use crate::bounded_channel::{BoundedReceiver, BoundedSender, bounded};

/// Receives every complete record, in file order, tagged with the path it
/// was read from.
pub trait RecordSink {
    fn on_record(&mut self, path: &Path, data: Bytes);
}

impl<F> RecordSink for F
where
    F: FnMut(&Path, Bytes),
{
    fn on_record(&mut self, path: &Path, data: Bytes) {
        self(path, data)
    }
}

/// A record and the path it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailRecord {
    pub path: PathBuf,
    pub data: Bytes,
}

/// Sends records over a bounded channel, blocking the tail loop while the
/// consumer is behind.
#[derive(Clone)]
pub struct ChannelSink {
    tx: BoundedSender<TailRecord>,
}

impl ChannelSink {
    /// Create a sink and the receiver its records arrive on.
    pub fn new(capacity: usize) -> (Self, BoundedReceiver<TailRecord>) {
        let (tx, rx) = bounded(capacity);
        (Self { tx }, rx)
    }
}

impl RecordSink for ChannelSink {
    fn on_record(&mut self, path: &Path, data: Bytes) {
        let record = TailRecord {
            path: path.to_path_buf(),
            data,
        };
        if self.tx.send_blocking(record).is_err() {
            warn!(path = ?path, "record receiver closed, dropping record");
        }
    }
}
