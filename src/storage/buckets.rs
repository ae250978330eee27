//! # Tree File
//!
//! One file holds the whole tree: the header, the root flag, and every leaf
//! and node page. Pages are addressed by absolute byte offset, never move
//! once written, and new pages are only ever allocated by appending at
//! end-of-file during splits.
//!
//! Access is plain buffered-free `File` I/O with explicit seeks: the page
//! sizes are format-dependent rather than OS-page aligned, and the decode
//! caches above this layer absorb repeated reads, so memory mapping buys
//! nothing here. The file length is tracked in memory to keep `append` from
//! issuing a seek-to-end per call.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{IndexError, Result};

#[derive(Debug)]
pub struct BucketsFile {
    file: File,
    len: u64,
    path: PathBuf,
}

impl BucketsFile {
    /// Creates the backing file, refusing to touch one that already exists.
    pub fn create(path: &Path) -> Result<Self> {
        match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => Ok(Self {
                file,
                len: 0,
                path: path.to_owned(),
            }),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(IndexError::AlreadyExists(path.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => {
                let len = file.metadata()?.len();
                Ok(Self {
                    file,
                    len,
                    path: path.to_owned(),
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(IndexError::DoesNotExist(path.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_at(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.write_all(data)?;
        self.len = self.len.max(offset as u64 + data.len() as u64);
        Ok(())
    }

    /// Writes `data` at end-of-file and returns the offset it landed on.
    pub fn append(&mut self, data: &[u8]) -> Result<u32> {
        let offset = self.len;
        if offset + data.len() as u64 > u32::MAX as u64 {
            return Err(IndexError::Format(
                "tree file exceeds the 4 GiB pointer range".to_string(),
            ));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.len += data.len() as u64;
        Ok(offset as u32)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx_buck");

        BucketsFile::create(&path).unwrap();

        assert!(matches!(
            BucketsFile::create(&path),
            Err(IndexError::AlreadyExists(_))
        ));
    }

    #[test]
    fn open_missing_file_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope_buck");

        assert!(matches!(
            BucketsFile::open(&path),
            Err(IndexError::DoesNotExist(_))
        ));
    }

    #[test]
    fn append_returns_sequential_offsets() {
        let dir = tempdir().unwrap();
        let mut file = BucketsFile::create(&dir.path().join("idx_buck")).unwrap();

        assert_eq!(file.append(&[1, 2, 3]).unwrap(), 0);
        assert_eq!(file.append(&[4, 5]).unwrap(), 3);
        assert_eq!(file.len(), 5);
    }

    #[test]
    fn write_and_read_round_trip() {
        let dir = tempdir().unwrap();
        let mut file = BucketsFile::create(&dir.path().join("idx_buck")).unwrap();

        file.write_at(10, b"hello").unwrap();
        let mut buf = [0u8; 5];
        file.read_at(10, &mut buf).unwrap();

        assert_eq!(&buf, b"hello");
        assert_eq!(file.len(), 15);
    }

    #[test]
    fn overwrite_does_not_shrink_len() {
        let dir = tempdir().unwrap();
        let mut file = BucketsFile::create(&dir.path().join("idx_buck")).unwrap();

        file.append(&[0u8; 100]).unwrap();
        file.write_at(10, &[1u8; 4]).unwrap();

        assert_eq!(file.len(), 100);
    }

    #[test]
    fn reopen_recovers_length() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx_buck");
        {
            let mut file = BucketsFile::create(&path).unwrap();
            file.append(&[7u8; 42]).unwrap();
            file.flush().unwrap();
        }

        let reopened = BucketsFile::open(&path).unwrap();
        assert_eq!(reopened.len(), 42);
    }
}
