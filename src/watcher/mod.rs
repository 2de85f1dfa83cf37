// SPDX-License-Identifier: Apache-2.0

//! File discovery for the tail.
//!
//! The dispatcher does not find files itself. A [`Discovery`] implementation
//! expands watch patterns, stats what it found, and calls back with one
//! [`FileEventKind`] per path and tick. [`PollWatcher`] does this by periodic
//! globbing and `stat`, which works the same on local and network filesystems.

mod poll;
mod traits;

pub use poll::PollWatcher;
pub use traits::{Discovery, FileEventKind, WatcherError};
