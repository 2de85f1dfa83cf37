// SPDX-License-Identifier: Apache-2.0

//! Follow growing files, deliver their contents as delimited records, and
//! remember how far each file has been read across restarts.
//!
//! ```no_run
//! use filetail::{ChannelSink, Discovery, PollWatcher, Tail, TailConfig};
//!
//! # fn main() -> filetail::Result<()> {
//! let mut tail = Tail::new(TailConfig::new(None)?)?;
//! let mut watcher = PollWatcher::new();
//! tail.configure_discovery(&mut watcher)?;
//! watcher.watch("/var/log/*.log")?;
//!
//! let (mut sink, records) = ChannelSink::new(1024);
//! std::thread::spawn(move || {
//!     while let Some(record) = records.recv_blocking() {
//!         println!("{:?}: {:?}", record.path, record.data);
//!     }
//! });
//!
//! tail.subscribe(&mut watcher, &mut sink)?;
//! # Ok(())
//! # }
//! ```

pub mod args;
pub mod bounded_channel;
pub mod config;
pub mod error;
pub mod input;
pub mod persistence;
pub mod sink;
pub mod tail;
pub mod watcher;

#[cfg(all(test, unix))]
mod test_util;

pub use config::{StartAt, TailConfig};
pub use error::{Error, Result};
pub use input::{BufferedTokenizer, FileId};
pub use persistence::{FlushStatus, SinceDb};
pub use sink::{ChannelSink, RecordSink, TailRecord};
pub use tail::{Tail, TailHandle};
pub use watcher::{Discovery, FileEventKind, PollWatcher, WatcherError};
