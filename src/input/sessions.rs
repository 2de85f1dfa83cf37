// SPDX-License-Identifier: Apache-2.0

//! Open file sessions: the open/seek decision on first sight of a path and
//! the read-until-drained loop.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::file_id::FileId;
use super::reader::{FileReader, ReadOutcome, open_for_tail};
use crate::config::StartAt;
use crate::persistence::SinceDb;
use crate::sink::RecordSink;
use crate::watcher::FileEventKind;

/// Size of each read performed by a drain
pub const READ_CHUNK_SIZE: usize = 32 * 1024;

/// Owns one [`FileReader`] per open path.
#[derive(Debug)]
pub struct FileSessions {
    sessions: HashMap<PathBuf, FileReader>,
    /// When an open failure was last warned about, per path
    last_open_warning: HashMap<PathBuf, Instant>,
    read_buf: Vec<u8>,
    delimiter: Vec<u8>,
    start_at: StartAt,
    open_warn_interval: Duration,
}

impl FileSessions {
    pub fn new(
        delimiter: impl Into<Vec<u8>>,
        start_at: StartAt,
        open_warn_interval: Duration,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            last_open_warning: HashMap::new(),
            read_buf: vec![0u8; READ_CHUNK_SIZE],
            delimiter: delimiter.into(),
            start_at,
            open_warn_interval,
        }
    }

    pub fn is_open(&self, path: &Path) -> bool {
        self.sessions.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Identity of the file open at `path`
    pub fn file_id(&self, path: &Path) -> Option<FileId> {
        self.sessions.get(path).map(FileReader::file_id)
    }

    /// Open `path` and position it according to what `sincedb` knows about
    /// its identity. Returns false, after logging, if the file cannot be
    /// opened or positioned.
    pub fn open(&mut self, path: &Path, kind: FileEventKind, sincedb: &SinceDb) -> bool {
        match self.try_open(path, kind, sincedb) {
            Ok(reader) => {
                self.last_open_warning.remove(path);
                self.sessions.insert(path.to_path_buf(), reader);
                true
            }
            Err(e) => {
                self.sessions.remove(path);
                self.report_open_failure(path, &e);
                false
            }
        }
    }

    fn try_open(
        &self,
        path: &Path,
        kind: FileEventKind,
        sincedb: &SinceDb,
    ) -> io::Result<FileReader> {
        let file = open_for_tail(path)?;
        let metadata = file.metadata()?;
        let file_id = FileId::from_metadata(&metadata)?;
        let size = metadata.len();

        let offset = match sincedb.get(file_id) {
            Some(recorded) if recorded <= size => {
                debug!(path = ?path, file_id = %file_id, offset = recorded, "resuming file");
                recorded
            }
            Some(recorded) => {
                debug!(
                    path = ?path,
                    file_id = %file_id,
                    recorded,
                    size,
                    "file shrank below recorded offset, reading from start"
                );
                sincedb.record(file_id, 0);
                0
            }
            None if kind == FileEventKind::CreateInitial && self.start_at == StartAt::End => {
                debug!(
                    path = ?path,
                    file_id = %file_id,
                    offset = size,
                    "new file, starting at end"
                );
                sincedb.record(file_id, size);
                size
            }
            None => {
                debug!(path = ?path, file_id = %file_id, "new file, starting at beginning");
                sincedb.record(file_id, 0);
                0
            }
        };

        FileReader::new(file, file_id, offset, &self.delimiter)
    }

    fn report_open_failure(&mut self, path: &Path, error: &io::Error) {
        let now = Instant::now();
        let due = match self.last_open_warning.get(path) {
            Some(last) => now.duration_since(*last) >= self.open_warn_interval,
            None => true,
        };

        if due {
            warn!(path = ?path, "failed to open file: {}", error);
            self.last_open_warning.insert(path.to_path_buf(), now);
        } else {
            debug!(path = ?path, "failed to open file: {}", error);
        }
    }

    /// Read everything currently available at `path`, handing each complete
    /// record to `sink` and advancing the file's offset past it.
    ///
    /// With `rewind_on_shrink`, a regular file found shorter than the read
    /// position is read again from byte 0. The final drain before a close
    /// passes false: the old handle is only read to its end, and whatever
    /// replaced the content is picked up by the next open of the path.
    ///
    /// Returns whether any bytes were read. Would-block, interrupted and
    /// end-of-stream all end the loop normally; any other read failure is
    /// returned and leaves the session as it was.
    pub fn drain<S>(
        &mut self,
        path: &Path,
        sincedb: &SinceDb,
        sink: &mut S,
        rewind_on_shrink: bool,
    ) -> io::Result<bool>
    where
        S: RecordSink + ?Sized,
    {
        let Some(reader) = self.sessions.get_mut(path) else {
            return Ok(false);
        };
        let file_id = reader.file_id();
        let delimiter_len = reader.delimiter_len() as u64;

        if rewind_on_shrink && reader.was_truncated()? {
            debug!(
                path = ?path,
                file_id = %file_id,
                position = reader.position(),
                "file truncated, reading from start"
            );
            reader.rewind()?;
            sincedb.record(file_id, 0);
        }

        let mut did_read = false;
        loop {
            match reader.read_chunk(&mut self.read_buf) {
                ReadOutcome::Data(n) => {
                    did_read = true;
                    for record in reader.extract(&self.read_buf[..n]) {
                        let consumed = record.len() as u64 + delimiter_len;
                        sink.on_record(path, record);
                        sincedb.advance(file_id, consumed);
                    }
                }
                ReadOutcome::Error(e) => return Err(e),
                outcome => {
                    debug!(path = ?path, ?outcome, did_read, "drain finished");
                    break;
                }
            }
        }

        Ok(did_read)
    }

    /// Close the session for `path`, returning the identity it had open.
    pub fn close(&mut self, path: &Path) -> Option<FileId> {
        let reader = self.sessions.remove(path)?;
        if reader.buffered_len() > 0 {
            debug!(
                path = ?path,
                discarded = reader.buffered_len(),
                "closing with a partial record"
            );
        }
        Some(reader.file_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        sincedb: SinceDb,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let sincedb = SinceDb::new(dir.path().join("sincedb"), Duration::from_secs(10));
            Self { dir, sincedb }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }
    }

    fn sessions(start_at: StartAt) -> FileSessions {
        FileSessions::new(b"\n".to_vec(), start_at, Duration::from_secs(300))
    }

    fn collect(
        sessions: &mut FileSessions,
        path: &Path,
        sincedb: &SinceDb,
    ) -> (bool, Vec<String>) {
        let mut records = Vec::new();
        let mut sink = |_: &Path, data: Bytes| {
            records.push(String::from_utf8(data.to_vec()).unwrap());
        };
        let did_read = sessions.drain(path, sincedb, &mut sink, true).unwrap();
        (did_read, records)
    }

    #[test]
    fn test_initial_file_starts_at_end_by_default() {
        let fx = Fixture::new();
        let path = fx.path("app.log");
        fs::write(&path, b"old line\n").unwrap();

        let mut sessions = sessions(StartAt::End);
        assert!(sessions.open(&path, FileEventKind::CreateInitial, &fx.sincedb));

        let id = FileId::from_path(&path).unwrap();
        assert_eq!(fx.sincedb.get(id), Some(9));

        let (did_read, records) = collect(&mut sessions, &path, &fx.sincedb);
        assert!(!did_read);
        assert!(records.is_empty());
    }

    #[test]
    fn test_initial_file_from_beginning() {
        let fx = Fixture::new();
        let path = fx.path("app.log");
        fs::write(&path, b"one\ntwo\n").unwrap();

        let mut sessions = sessions(StartAt::Beginning);
        assert!(sessions.open(&path, FileEventKind::CreateInitial, &fx.sincedb));

        let (did_read, records) = collect(&mut sessions, &path, &fx.sincedb);
        assert!(did_read);
        assert_eq!(records, vec!["one", "two"]);
        assert_eq!(fx.sincedb.get(FileId::from_path(&path).unwrap()), Some(8));
    }

    #[test]
    fn test_runtime_created_file_reads_from_start() {
        let fx = Fixture::new();
        let path = fx.path("app.log");
        fs::write(&path, b"first\n").unwrap();

        let mut sessions = sessions(StartAt::End);
        assert!(sessions.open(&path, FileEventKind::Create, &fx.sincedb));

        let (_, records) = collect(&mut sessions, &path, &fx.sincedb);
        assert_eq!(records, vec!["first"]);
    }

    #[test]
    fn test_resume_from_recorded_offset() {
        let fx = Fixture::new();
        let path = fx.path("app.log");
        fs::write(&path, b"seen\nunseen\n").unwrap();
        let id = FileId::from_path(&path).unwrap();
        fx.sincedb.record(id, 5);

        let mut sessions = sessions(StartAt::End);
        assert!(sessions.open(&path, FileEventKind::CreateInitial, &fx.sincedb));

        let (_, records) = collect(&mut sessions, &path, &fx.sincedb);
        assert_eq!(records, vec!["unseen"]);
        assert_eq!(fx.sincedb.get(id), Some(12));
    }

    #[test]
    fn test_recorded_offset_past_end_resets() {
        let fx = Fixture::new();
        let path = fx.path("app.log");
        fs::write(&path, b"short\n").unwrap();
        let id = FileId::from_path(&path).unwrap();
        fx.sincedb.record(id, 500);

        let mut sessions = sessions(StartAt::End);
        assert!(sessions.open(&path, FileEventKind::Modify, &fx.sincedb));
        assert_eq!(fx.sincedb.get(id), Some(0));

        let (_, records) = collect(&mut sessions, &path, &fx.sincedb);
        assert_eq!(records, vec!["short"]);
        assert_eq!(fx.sincedb.get(id), Some(6));
    }

    #[test]
    fn test_partial_record_not_counted_until_complete() {
        let fx = Fixture::new();
        let path = fx.path("app.log");
        fs::write(&path, b"done\nhalf").unwrap();

        let mut sessions = sessions(StartAt::Beginning);
        sessions.open(&path, FileEventKind::Create, &fx.sincedb);
        let id = FileId::from_path(&path).unwrap();

        let (_, records) = collect(&mut sessions, &path, &fx.sincedb);
        assert_eq!(records, vec!["done"]);
        assert_eq!(fx.sincedb.get(id), Some(5));

        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"-way\n").unwrap();

        let (_, records) = collect(&mut sessions, &path, &fx.sincedb);
        assert_eq!(records, vec!["half-way"]);
        assert_eq!(fx.sincedb.get(id), Some(14));
    }

    #[test]
    fn test_multibyte_delimiter_accounting() {
        let fx = Fixture::new();
        let path = fx.path("app.log");
        fs::write(&path, b"a\r\nbb\r\n").unwrap();

        let mut sessions = FileSessions::new(b"\r\n".to_vec(), StartAt::Beginning, Duration::ZERO);
        sessions.open(&path, FileEventKind::Create, &fx.sincedb);

        let (_, records) = collect(&mut sessions, &path, &fx.sincedb);
        assert_eq!(records, vec!["a", "bb"]);
        assert_eq!(fx.sincedb.get(FileId::from_path(&path).unwrap()), Some(7));
    }

    #[test]
    fn test_drain_larger_than_one_chunk() {
        let fx = Fixture::new();
        let path = fx.path("big.log");
        let line = "x".repeat(999);
        let contents: String = (0..100).map(|_| format!("{}\n", line)).collect();
        fs::write(&path, contents.as_bytes()).unwrap();

        let mut sessions = sessions(StartAt::Beginning);
        sessions.open(&path, FileEventKind::Create, &fx.sincedb);

        let (_, records) = collect(&mut sessions, &path, &fx.sincedb);
        assert_eq!(records.len(), 100);
        assert_eq!(
            fx.sincedb.get(FileId::from_path(&path).unwrap()),
            Some(100_000)
        );
    }

    #[test]
    fn test_truncation_while_open_rewinds() {
        let fx = Fixture::new();
        let path = fx.path("app.log");
        fs::write(&path, b"before truncation\n").unwrap();

        let mut sessions = sessions(StartAt::Beginning);
        sessions.open(&path, FileEventKind::Create, &fx.sincedb);
        collect(&mut sessions, &path, &fx.sincedb);

        fs::write(&path, b"after\n").unwrap();
        let (_, records) = collect(&mut sessions, &path, &fx.sincedb);
        assert_eq!(records, vec!["after"]);
        assert_eq!(fx.sincedb.get(FileId::from_path(&path).unwrap()), Some(6));
    }

    #[test]
    fn test_final_drain_does_not_rewind() {
        let fx = Fixture::new();
        let path = fx.path("app.log");
        fs::write(&path, b"before truncation\n").unwrap();
        let id = FileId::from_path(&path).unwrap();

        let mut sessions = sessions(StartAt::Beginning);
        sessions.open(&path, FileEventKind::Create, &fx.sincedb);
        collect(&mut sessions, &path, &fx.sincedb);

        fs::write(&path, b"after\n").unwrap();
        let mut records = Vec::new();
        let mut sink = |_: &Path, data: Bytes| records.push(data);
        let did_read = sessions
            .drain(&path, &fx.sincedb, &mut sink, false)
            .unwrap();

        assert!(!did_read);
        assert!(records.is_empty());
        assert_eq!(fx.sincedb.get(id), Some(18));
    }

    #[cfg(unix)]
    #[test]
    fn test_fifo_session_reads_without_seeking() {
        let fx = Fixture::new();
        let fifo = fx.path("pipe");
        crate::test_util::make_fifo(&fifo);

        let mut sessions = sessions(StartAt::End);
        assert!(sessions.open(&fifo, FileEventKind::CreateInitial, &fx.sincedb));

        let mut writer = fs::OpenOptions::new().write(true).open(&fifo).unwrap();
        writer.write_all(b"one\ntwo\n").unwrap();

        let (did_read, records) = collect(&mut sessions, &fifo, &fx.sincedb);
        assert!(did_read);
        assert_eq!(records, vec!["one", "two"]);

        // A pipe reports length 0; that is not a truncation
        writer.write_all(b"three\n").unwrap();
        let (_, records) = collect(&mut sessions, &fifo, &fx.sincedb);
        assert_eq!(records, vec!["three"]);
        assert!(sessions.is_open(&fifo));
    }

    #[test]
    fn test_open_failure_removes_stale_session() {
        let fx = Fixture::new();
        let path = fx.path("app.log");
        fs::write(&path, b"x\n").unwrap();

        let mut sessions = sessions(StartAt::Beginning);
        assert!(sessions.open(&path, FileEventKind::Create, &fx.sincedb));
        assert!(sessions.is_open(&path));

        fs::remove_file(&path).unwrap();
        assert!(!sessions.open(&path, FileEventKind::Create, &fx.sincedb));
        assert!(!sessions.is_open(&path));
        assert!(sessions.last_open_warning.contains_key(&path));
    }

    #[test]
    fn test_open_failure_warning_is_throttled() {
        let fx = Fixture::new();
        let path = fx.path("missing.log");

        let mut sessions = sessions(StartAt::Beginning);
        assert!(!sessions.open(&path, FileEventKind::Create, &fx.sincedb));
        let first = sessions.last_open_warning[&path];

        assert!(!sessions.open(&path, FileEventKind::Create, &fx.sincedb));
        assert_eq!(sessions.last_open_warning[&path], first);
    }

    #[test]
    fn test_close_returns_identity() {
        let fx = Fixture::new();
        let path = fx.path("app.log");
        fs::write(&path, b"x\n").unwrap();
        let id = FileId::from_path(&path).unwrap();

        let mut sessions = sessions(StartAt::Beginning);
        sessions.open(&path, FileEventKind::Create, &fx.sincedb);
        assert_eq!(sessions.file_id(&path), Some(id));

        assert_eq!(sessions.close(&path), Some(id));
        assert_eq!(sessions.close(&path), None);
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_drain_unknown_path_reads_nothing() {
        let fx = Fixture::new();
        let mut sessions = sessions(StartAt::Beginning);
        let (did_read, records) = collect(&mut sessions, &fx.path("nope"), &fx.sincedb);
        assert!(!did_read);
        assert!(records.is_empty());
    }
}
