//! Seek-based random access without a mapping.
//!
//! [`SeekEditor`] serves the same offset-addressed contract as
//! [`crate::RegionEditor`] through plain positioned reads and writes.
//! Useful when mapping is undesirable (very small edits, filesystems
//! with poor mmap behavior); it shares the [`RandomAccess`] seam so
//! callers can swap strategies without code changes.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::access::RandomAccess;
use crate::error::EditorError;
use crate::region::AccessMode;

/// Positioned-I/O editor over an open file.
#[derive(Debug)]
pub struct SeekEditor {
    file: File,
    path: PathBuf,
    mode: AccessMode,
}

impl SeekEditor {
    /// Open `path` for read-write positioned access.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EditorError> {
        Self::open_with(path, AccessMode::ReadWrite)
    }

    /// Open `path` with an explicit access mode.
    pub fn open_with(path: impl AsRef<Path>, mode: AccessMode) -> Result<Self, EditorError> {
        let path = path.as_ref().to_path_buf();
        let file = match mode {
            AccessMode::ReadOnly => File::open(&path),
            AccessMode::ReadWrite => OpenOptions::new().read(true).write(true).open(&path),
        }
        .map_err(|e| EditorError::io(&path, e))?;
        Ok(Self { file, path, mode })
    }

    /// Current file size in bytes.
    pub fn len(&self) -> Result<usize, EditorError> {
        let meta = self
            .file
            .metadata()
            .map_err(|e| EditorError::io(&self.path, e))?;
        Ok(meta.len() as usize)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), EditorError> {
        let size = self.len()?;
        let end = offset.checked_add(len).unwrap_or(usize::MAX);
        if end > size {
            return Err(EditorError::OutOfRange { offset, len, size });
        }
        Ok(())
    }

    /// Read `len` bytes starting at `offset`.
    pub fn read_at(&mut self, offset: usize, len: usize) -> Result<Vec<u8>, EditorError> {
        self.check_range(offset, len)?;
        self.file
            .seek(SeekFrom::Start(offset as u64))
            .map_err(|e| EditorError::io(&self.path, e))?;
        let mut buf = vec![0u8; len];
        self.file
            .read_exact(&mut buf)
            .map_err(|e| EditorError::io(&self.path, e))?;
        Ok(buf)
    }

    /// Overwrite `data.len()` bytes starting at `offset`.
    ///
    /// Matches the region editor's contract: never extends the file.
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<(), EditorError> {
        if self.mode == AccessMode::ReadOnly {
            return Err(EditorError::ReadOnly {
                path: self.path.clone(),
            });
        }
        self.check_range(offset, data.len())?;
        if data.is_empty() {
            return Ok(());
        }
        self.file
            .seek(SeekFrom::Start(offset as u64))
            .map_err(|e| EditorError::io(&self.path, e))?;
        self.file
            .write_all(data)
            .map_err(|e| EditorError::io(&self.path, e))
    }

    /// Truncate or extend the file to `new_size` (extension zero-pads).
    pub fn truncate(&mut self, new_size: usize) -> Result<(), EditorError> {
        if self.mode == AccessMode::ReadOnly {
            return Err(EditorError::ReadOnly {
                path: self.path.clone(),
            });
        }
        self.file
            .set_len(new_size as u64)
            .map_err(|e| EditorError::io(&self.path, e))
    }

    /// Flush written data to stable storage.
    pub fn sync(&mut self) -> Result<(), EditorError> {
        self.file
            .sync_all()
            .map_err(|e| EditorError::io(&self.path, e))
    }
}

impl RandomAccess for SeekEditor {
    fn read_slice(&mut self, offset: usize, len: usize) -> Result<Vec<u8>, EditorError> {
        self.read_at(offset, len)
    }

    fn write_slice(&mut self, offset: usize, data: &[u8]) -> Result<(), EditorError> {
        self.write_at(offset, data)
    }

    fn flush(&mut self) -> Result<(), EditorError> {
        self.sync()
    }
}
