// SPDX-License-Identifier: Apache-2.0

//! The since-database: how many bytes of each file have been delivered.
//!
//! One line per file identity, `<ino> <dev-major> <dev-minor> <offset>`,
//! rewritten wholesale on every flush. Regular files are replaced atomically
//! (write to a temp file in the same directory, then rename); device targets
//! such as `/dev/null` are overwritten in place.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::input::FileId;

/// Outcome of a flush request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    /// The table was written to disk
    Written,
    /// Too soon after the last write; the write is pending
    Throttled,
    /// Another flush holds the write lock; nothing was done
    InProgress,
    /// Writing failed; the pending state is unchanged
    Failed,
}

#[derive(Debug)]
struct WriteState {
    last_write: Instant,
    pending: bool,
}

/// Thread-safe position table with throttled, crash-safe persistence.
#[derive(Debug)]
pub struct SinceDb {
    path: PathBuf,
    write_interval: Duration,
    positions: Mutex<BTreeMap<FileId, u64>>,
    state: Mutex<WriteState>,
    /// Held for the duration of a write
    write_lock: Mutex<()>,
}

impl SinceDb {
    /// Create an empty table persisted at `path`.
    pub fn new(path: impl Into<PathBuf>, write_interval: Duration) -> Self {
        Self {
            path: path.into(),
            write_interval,
            positions: Mutex::new(BTreeMap::new()),
            state: Mutex::new(WriteState {
                last_write: Instant::now(),
                pending: true,
            }),
            write_lock: Mutex::new(()),
        }
    }

    /// Create a table and load whatever is already persisted at `path`.
    pub fn open(path: impl Into<PathBuf>, write_interval: Duration) -> Self {
        let db = Self::new(path, write_interval);
        let path = db.path.clone();
        let loaded = db.load(&path);
        info!(path = ?path, entries = loaded, "sincedb opened");
        db
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Merge the entries persisted at `path` into the table, returning how
    /// many were loaded. A missing or unreadable file loads nothing, and
    /// malformed lines are skipped.
    pub fn load(&self, path: &Path) -> usize {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                debug!(path = ?path, "no existing sincedb to load: {}", e);
                return 0;
            }
        };

        let mut positions = self.lock_positions();
        let mut loaded = 0;

        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            // One bad line must not cost the rest of the table
            match parse_line(index + 1, line) {
                Ok((file_id, offset)) => {
                    debug!(file_id = %file_id, offset, "sincedb: loaded position");
                    positions.insert(file_id, offset);
                    loaded += 1;
                }
                Err(e) => warn!(path = ?path, "skipping sincedb entry: {}", e),
            }
        }

        loaded
    }

    /// Set the delivered offset for `file_id`.
    pub fn record(&self, file_id: FileId, offset: u64) {
        self.lock_positions().insert(file_id, offset);
    }

    /// Move the delivered offset for `file_id` forward by `len` bytes.
    pub fn advance(&self, file_id: FileId, len: u64) -> u64 {
        let mut positions = self.lock_positions();
        let offset = positions.entry(file_id).or_insert(0);
        *offset += len;
        *offset
    }

    pub fn get(&self, file_id: FileId) -> Option<u64> {
        self.lock_positions().get(&file_id).copied()
    }

    /// Drop the entry for `file_id`, returning the offset it had.
    pub fn forget(&self, file_id: FileId) -> Option<u64> {
        self.lock_positions().remove(&file_id)
    }

    pub fn len(&self) -> usize {
        self.lock_positions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_positions().is_empty()
    }

    /// Whether a throttled write is still owed.
    pub fn is_pending(&self) -> bool {
        self.lock_state().pending
    }

    /// Persist the table.
    ///
    /// Unforced flushes within `write_interval` of the last successful write
    /// only mark the write as pending, and give up if another flush is
    /// running. Forced flushes wait for a running flush to finish and always
    /// write.
    pub fn flush(&self, force: bool) -> FlushStatus {
        // Forced writes come from quit() or an external request and must not
        // be lost, so they wait for a running write. Unforced writes come from
        // the event loop and are retried on a later tick via the pending flag.
        let _write_guard = if force {
            self.write_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
        } else {
            match self.write_lock.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    warn!(path = ?self.path, "sincedb write already in progress");
                    return FlushStatus::InProgress;
                }
            }
        };

        // Too soon since the last write: remember that one is owed
        let since_last_write = self.lock_state().last_write.elapsed();
        if !force && since_last_write < self.write_interval {
            self.lock_state().pending = true;
            return FlushStatus::Throttled;
        }

        debug!(
            path = ?self.path,
            since_last_write = ?since_last_write,
            force,
            "writing sincedb"
        );

        // Snapshot the table so the positions lock is not held during I/O
        let contents = self.serialize();
        if let Err(e) = write_sincedb(&self.path, contents.as_bytes()) {
            // Leave pending as it was so the write is retried
            warn!(path = ?self.path, "sincedb write failed: {}", e);
            return FlushStatus::Failed;
        }

        let mut state = self.lock_state();
        state.last_write = Instant::now();
        state.pending = false;
        FlushStatus::Written
    }

    /// Satisfy a previously throttled write, if one is owed and allowed now.
    pub fn flush_if_pending(&self) -> Option<FlushStatus> {
        if self.is_pending() {
            Some(self.flush(false))
        } else {
            None
        }
    }

    /// Render the table in the persisted line format.
    pub fn serialize(&self) -> String {
        let positions = self.lock_positions();
        let mut out = String::with_capacity(positions.len() * 32);
        for (file_id, offset) in positions.iter() {
            out.push_str(&format!("{} {}\n", file_id, offset));
        }
        out
    }

    fn lock_positions(&self) -> MutexGuard<'_, BTreeMap<FileId, u64>> {
        self.positions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_state(&self) -> MutexGuard<'_, WriteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Parse one `<ino> <major> <minor> <offset>` line.
pub fn parse_line(line_number: usize, line: &str) -> Result<(FileId, u64)> {
    let malformed = |reason: String| Error::MalformedEntry {
        line: line_number,
        reason,
    };

    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 4 {
        return Err(malformed(format!(
            "expected 4 fields, found {}",
            fields.len()
        )));
    }

    let ino = fields[0]
        .parse::<u64>()
        .map_err(|e| malformed(format!("inode '{}': {}", fields[0], e)))?;
    let dev_major = fields[1]
        .parse::<u32>()
        .map_err(|e| malformed(format!("device major '{}': {}", fields[1], e)))?;
    let dev_minor = fields[2]
        .parse::<u32>()
        .map_err(|e| malformed(format!("device minor '{}': {}", fields[2], e)))?;
    let offset = fields[3]
        .parse::<u64>()
        .map_err(|e| malformed(format!("offset '{}': {}", fields[3], e)))?;

    Ok((FileId::new(ino, dev_major, dev_minor), offset))
}

/// Write `contents` to `path`: in place for device targets, otherwise
/// through an atomic temp-file-and-rename.
fn write_sincedb(path: &Path, contents: &[u8]) -> Result<()> {
    // Devices and pipes cannot be renamed over; overwrite them from the start
    if is_device(path) {
        let mut file = open_device(path)
            .map_err(|e| Error::Persistence(format!("failed to open sincedb device: {}", e)))?;
        file.write_all(contents)
            .map_err(|e| Error::Persistence(format!("failed to write sincedb device: {}", e)))?;
        return Ok(());
    }

    atomic_write(path, contents)
}

/// Open a device target for writing. Non-blocking on Unix so a pipe with no
/// reader fails with ENXIO instead of stalling the caller.
fn open_device(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags(libc::O_NONBLOCK);
    }

    options.open(path)
}

#[cfg(unix)]
fn is_device(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;

    fs::metadata(path)
        .map(|m| {
            let file_type = m.file_type();
            file_type.is_char_device() || file_type.is_block_device() || file_type.is_fifo()
        })
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_device(_path: &Path) -> bool {
    false
}

/// Write to a unique temp file next to `path`, sync it, then rename over `path`.
fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Persistence(format!("failed to create parent directory: {}", e))
            })?;
        }
    }

    // Process ID plus a counter keeps concurrent writers off each other's temp file
    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let result = (|| {
        let file = File::create(&temp_path)
            .map_err(|e| Error::Persistence(format!("failed to create temp file: {}", e)))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(contents)
            .map_err(|e| Error::Persistence(format!("failed to write sincedb: {}", e)))?;
        let file = writer
            .into_inner()
            .map_err(|e| Error::Persistence(format!("failed to flush sincedb: {}", e)))?;
        // Data must be on disk before the rename makes it visible
        file.sync_all()
            .map_err(|e| Error::Persistence(format!("failed to sync sincedb: {}", e)))?;
        drop(file);

        // Rename temp to final (atomic on most filesystems)
        fs::rename(&temp_path, path)
            .map_err(|e| Error::Persistence(format!("failed to rename sincedb file: {}", e)))
    })();

    // Don't leave a stray temp file behind
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }

    result
}
