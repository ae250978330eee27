//! # Value Storage
//!
//! The companion `_stor` file: an append-only byte log holding the
//! variable-length payload of every record. Leaf records address payloads by
//! `(start, size)`; nothing is ever rewritten or deleted in place, so space
//! held by dead payloads is reclaimed only when compaction copies the live
//! ones into a fresh store.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use zerocopy::IntoBytes;

use super::headers::{ValueFileHeader, VALUES_HEADER_SIZE};
use crate::error::{IndexError, Result};

#[derive(Debug)]
pub struct ValueStorage {
    file: File,
    len: u64,
    path: PathBuf,
}

impl ValueStorage {
    pub fn create(path: &Path) -> Result<Self> {
        match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(mut file) => {
                file.write_all(ValueFileHeader::new().as_bytes())?;
                Ok(Self {
                    file,
                    len: VALUES_HEADER_SIZE as u64,
                    path: path.to_owned(),
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(IndexError::AlreadyExists(path.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let mut file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(IndexError::DoesNotExist(path.to_owned()))
            }
            Err(e) => return Err(e.into()),
        };
        let mut header = [0u8; VALUES_HEADER_SIZE];
        file.read_exact(&mut header)
            .map_err(|_| IndexError::Corrupted("value store header truncated".to_string()))?;
        ValueFileHeader::from_bytes(&header)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            len,
            path: path.to_owned(),
        })
    }

    /// Appends `data` and returns its `(start, size)` address.
    pub fn append(&mut self, data: &[u8]) -> Result<(u32, u32)> {
        let start = self.len;
        if start + data.len() as u64 > u32::MAX as u64 {
            return Err(IndexError::Format(
                "value store exceeds the 4 GiB pointer range".to_string(),
            ));
        }
        self.file.seek(SeekFrom::Start(start))?;
        self.file.write_all(data)?;
        self.len += data.len() as u64;
        Ok((start as u32, data.len() as u32))
    }

    pub fn read(&mut self, start: u32, size: u32) -> Result<Vec<u8>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        if start as u64 + size as u64 > self.len {
            return Err(IndexError::Corrupted(format!(
                "value at {start}+{size} lies beyond the store"
            )));
        }
        self.file.seek(SeekFrom::Start(start as u64))?;
        let mut buf = vec![0u8; size as usize];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
