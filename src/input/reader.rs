// SPDX-License-Identifier: Apache-2.0

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Bytes;

use super::file_id::FileId;
use super::tokenizer::BufferedTokenizer;

/// Outcome of a single read from a tailed file.
#[derive(Debug)]
pub enum ReadOutcome {
    /// This many bytes were read into the buffer
    Data(usize),
    /// The descriptor is non-blocking and has nothing ready
    WouldBlock,
    /// The read was interrupted by a signal
    Interrupted,
    /// No more bytes right now; more may be appended later
    EndOfStream,
    /// Any other read failure
    Error(io::Error),
}

/// Open a file for tailing. On Unix the descriptor is non-blocking so that a
/// FIFO without a writer never stalls the event loop.
pub fn open_for_tail(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags(libc::O_NONBLOCK);
    }

    options.open(path)
}

/// Runtime state for one open path: the handle, the identity it was opened
/// with, the tokenizer holding any partial record, and the read position.
#[derive(Debug)]
pub struct FileReader {
    file: File,
    file_id: FileId,
    tokenizer: BufferedTokenizer,
    /// Byte position of the handle (bytes handed to the tokenizer so far)
    position: u64,
    /// Pipes and devices cannot seek and always report a length of 0
    is_regular: bool,
}

impl FileReader {
    /// Wrap an open handle positioned at `offset`.
    pub fn new(
        mut file: File,
        file_id: FileId,
        offset: u64,
        delimiter: &[u8],
    ) -> io::Result<Self> {
        let is_regular = file.metadata()?.is_file();

        // A fresh handle is already at 0, and seeking a pipe fails with ESPIPE
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))?;
        }

        Ok(Self {
            file,
            file_id,
            tokenizer: BufferedTokenizer::new(delimiter.to_vec()),
            position: offset,
            is_regular,
        })
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Byte position of the next read
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn delimiter_len(&self) -> usize {
        self.tokenizer.delimiter().len()
    }

    /// Bytes read but not yet part of a complete record
    pub fn buffered_len(&self) -> usize {
        self.tokenizer.buffered_len()
    }

    /// Whether the handle refers to a regular file
    pub fn is_regular(&self) -> bool {
        self.is_regular
    }

    /// Current size of the file behind the handle.
    pub fn file_len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Whether the file is now shorter than what has been read from it.
    /// Never true for pipes and devices.
    pub fn was_truncated(&self) -> io::Result<bool> {
        if !self.is_regular {
            return Ok(false);
        }
        Ok(self.file_len()? < self.position)
    }

    /// Read once into `buf`.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> ReadOutcome {
        match self.file.read(buf) {
            Ok(0) => ReadOutcome::EndOfStream,
            Ok(n) => {
                self.position += n as u64;
                ReadOutcome::Data(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => ReadOutcome::WouldBlock,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => ReadOutcome::Interrupted,
            Err(e) => ReadOutcome::Error(e),
        }
    }

    /// Feed bytes just read through the tokenizer.
    pub fn extract(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.tokenizer.extract(data)
    }

    /// Start over from byte 0 after the file shrank underneath the handle.
    /// Any partial record is discarded.
    pub fn rewind(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.tokenizer = BufferedTokenizer::new(self.tokenizer.delimiter().to_vec());
        self.position = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn reader_for(file: &NamedTempFile, offset: u64) -> FileReader {
        let handle = open_for_tail(file.path()).unwrap();
        let file_id = FileId::from_file(&handle).unwrap();
        FileReader::new(handle, file_id, offset, b"\n").unwrap()
    }

    #[test]
    fn test_read_chunk_until_end_of_stream() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"line 1\nline 2\n").unwrap();
        file.flush().unwrap();

        let mut reader = reader_for(&file, 0);
        let mut buf = [0u8; 64];

        match reader.read_chunk(&mut buf) {
            ReadOutcome::Data(n) => assert_eq!(n, 14),
            other => panic!("expected data, got {:?}", other),
        }
        assert_eq!(reader.position(), 14);
        assert!(matches!(
            reader.read_chunk(&mut buf),
            ReadOutcome::EndOfStream
        ));
    }

    #[test]
    fn test_reader_starts_at_offset() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"skip\nkeep\n").unwrap();
        file.flush().unwrap();

        let mut reader = reader_for(&file, 5);
        let mut buf = [0u8; 64];

        let n = match reader.read_chunk(&mut buf) {
            ReadOutcome::Data(n) => n,
            other => panic!("expected data, got {:?}", other),
        };
        let records = reader.extract(&buf[..n]);
        assert_eq!(records.len(), 1);
        assert_eq!(&records[0][..], b"keep");
    }

    #[test]
    fn test_rewind_discards_partial_record() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"partial").unwrap();
        file.flush().unwrap();

        let mut reader = reader_for(&file, 0);
        let mut buf = [0u8; 64];
        if let ReadOutcome::Data(n) = reader.read_chunk(&mut buf) {
            assert!(reader.extract(&buf[..n]).is_empty());
        }
        assert_eq!(reader.buffered_len(), 7);

        reader.rewind().unwrap();
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.buffered_len(), 0);
    }

    #[test]
    fn test_truncation_detected_for_regular_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"0123456789\n").unwrap();
        file.flush().unwrap();

        let reader = reader_for(&file, 11);
        assert!(reader.is_regular());
        assert!(!reader.was_truncated().unwrap());

        file.as_file().set_len(2).unwrap();
        assert!(reader.was_truncated().unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_fifo_opens_without_seeking() {
        let dir = tempfile::TempDir::new().unwrap();
        let fifo = dir.path().join("pipe");
        crate::test_util::make_fifo(&fifo);

        let handle = open_for_tail(&fifo).unwrap();
        let file_id = FileId::from_file(&handle).unwrap();
        let mut reader = FileReader::new(handle, file_id, 0, b"\n").unwrap();
        assert!(!reader.is_regular());

        // No writer: reads end without blocking
        let mut buf = [0u8; 16];
        assert!(matches!(
            reader.read_chunk(&mut buf),
            ReadOutcome::EndOfStream | ReadOutcome::WouldBlock
        ));
        assert!(!reader.was_truncated().unwrap());
    }

    #[test]
    fn test_open_missing_file_fails() {
        assert!(open_for_tail(Path::new("/nonexistent/for/sure.log")).is_err());
    }
}
