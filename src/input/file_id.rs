// SPDX-License-Identifier: Apache-2.0

//! File identity based on inode and device numbers.
//!
//! This allows tracking files across renames/rotations, since the inode
//! remains stable even when the file is renamed.

use std::fs::{File, Metadata};
use std::io;
use std::path::Path;

/// A unique identifier for a physical file: inode number plus the major and
/// minor numbers of the device holding it.
///
/// Two paths may share a `FileId` (hardlinks), and a path may change `FileId`
/// when a file is rotated away and replaced under the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId {
    ino: u64,
    dev_major: u32,
    dev_minor: u32,
}

impl FileId {
    /// Create a FileId from raw values.
    /// Used for loading persisted state.
    pub fn new(ino: u64, dev_major: u32, dev_minor: u32) -> Self {
        Self {
            ino,
            dev_major,
            dev_minor,
        }
    }

    /// Create a FileId from stat metadata.
    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> io::Result<Self> {
        use std::os::unix::fs::MetadataExt;

        let dev = metadata.dev() as libc::dev_t;
        // major/minor are safe fns on some targets and unsafe on others
        #[allow(unused_unsafe)]
        let (dev_major, dev_minor) = unsafe { (libc::major(dev) as u32, libc::minor(dev) as u32) };

        Ok(Self {
            ino: metadata.ino(),
            dev_major,
            dev_minor,
        })
    }

    #[cfg(not(unix))]
    pub fn from_metadata(_metadata: &Metadata) -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "file identity requires inode and device numbers",
        ))
    }

    /// Create a FileId from an open file handle.
    pub fn from_file(file: &File) -> io::Result<Self> {
        Self::from_metadata(&file.metadata()?)
    }

    /// Create a FileId from a path, following symlinks.
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::from_metadata(&std::fs::metadata(path)?)
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    pub fn dev_major(&self) -> u32 {
        self.dev_major
    }

    pub fn dev_minor(&self) -> u32 {
        self.dev_minor
    }
}

/// Formats as the sincedb key columns: `<ino> <major> <minor>`.
impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.ino, self.dev_major, self.dev_minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_file_id_same_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"test content").unwrap();
        file.flush().unwrap();

        let id1 = FileId::from_path(file.path()).unwrap();
        let id2 = FileId::from_file(&file.reopen().unwrap()).unwrap();

        assert_eq!(id1, id2);
        assert!(id1.ino() > 0);
    }

    #[test]
    fn test_file_id_different_files() {
        let file1 = NamedTempFile::new().unwrap();
        let file2 = NamedTempFile::new().unwrap();

        let id1 = FileId::from_path(file1.path()).unwrap();
        let id2 = FileId::from_path(file2.path()).unwrap();

        assert_ne!(id1, id2);
    }

    #[test]
    fn test_file_id_stable_across_rename() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"line\n").unwrap();

        let before = FileId::from_path(&path).unwrap();
        let rotated = dir.path().join("app.log.1");
        std::fs::rename(&path, &rotated).unwrap();
        std::fs::write(&path, b"fresh\n").unwrap();

        assert_eq!(before, FileId::from_path(&rotated).unwrap());
        assert_ne!(before, FileId::from_path(&path).unwrap());
    }

    #[test]
    fn test_file_id_shared_by_hardlink() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let link = dir.path().join("app.link");
        std::fs::write(&path, b"line\n").unwrap();
        std::fs::hard_link(&path, &link).unwrap();

        assert_eq!(
            FileId::from_path(&path).unwrap(),
            FileId::from_path(&link).unwrap()
        );
    }

    #[test]
    fn test_file_id_display() {
        let id = FileId::new(456, 8, 1);
        assert_eq!(format!("{}", id), "456 8 1");
    }
}
