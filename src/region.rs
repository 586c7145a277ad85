//! Memory-mapped random access editing.
//!
//! [`RegionEditor`] maps a file and edits it in place: slice reads and
//! writes, byte-pattern search, fixed-length replacement, and
//! variable-length [`RegionEditor::replace_range`] built on resize +
//! remap. The mapping always covers the whole file; resizing drops the
//! old mapping and creates a fresh one, so a stale view can never be
//! touched after the file changes size.
//!
//! Every mutating operation makes any [`crate::LineIndex`] built for the
//! same file stale; callers must rebuild the index before trusting it
//! again.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use log::debug;
use memmap2::{Mmap, MmapMut};

use crate::access::RandomAccess;
use crate::error::EditorError;

/// How the backing file was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug)]
enum Mapping {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl Mapping {
    fn as_slice(&self) -> &[u8] {
        match self {
            Mapping::ReadOnly(m) => m,
            Mapping::ReadWrite(m) => m,
        }
    }
}

/// Random-access editor over a memory-mapped file.
///
/// The mapping is only created for non-empty files; a zero-length file
/// behaves as an empty region until the first growing resize.
#[derive(Debug)]
pub struct RegionEditor {
    // Must outlive the mapping; dropped last by field order.
    map: Option<Mapping>,
    file: File,
    path: PathBuf,
    mode: AccessMode,
}

impl RegionEditor {
    /// Open `path` for read-write region editing.
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

        let mut editor = Self {
            map: None,
            file,
            path,
            mode,
        };
        editor.remap()?;
        Ok(editor)
    }

    /// Drop any existing mapping and map the file at its current size.
    fn remap(&mut self) -> Result<(), EditorError> {
        self.map = None;

        let size = self
            .file
            .metadata()
            .map_err(|e| EditorError::io(&self.path, e))?
            .len();
        if size == 0 {
            // Zero-length mappings are rejected on some platforms; an
            // empty file simply has no mapping until it grows.
            debug!("{} is empty, mapping deferred", self.path.display());
            return Ok(());
        }

        let mapping = match self.mode {
            AccessMode::ReadOnly => {
                // SAFETY:
                // - the file handle stays alive in `self` next to the map
                // - callers only ever see immutable `&[u8]`
                // - cooperating writers serialize through the gate
                let map = unsafe { Mmap::map(&self.file) };
                Mapping::ReadOnly(map.map_err(|e| EditorError::io(&self.path, e))?)
            }
            AccessMode::ReadWrite => {
                // SAFETY: as above, and mutation goes through bounds-checked
                // slices of the map while `self` is exclusively borrowed.
                let map = unsafe { MmapMut::map_mut(&self.file) };
                Mapping::ReadWrite(map.map_err(|e| EditorError::io(&self.path, e))?)
            }
        };
        self.map = Some(mapping);
        Ok(())
    }

    /// Current file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.as_ref().map_or(0, |m| m.as_slice().len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn as_slice(&self) -> &[u8] {
        self.map.as_ref().map_or(&[], |m| m.as_slice())
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), EditorError> {
        let size = self.len();
        let end = offset.checked_add(len).unwrap_or(usize::MAX);
        if end > size {
            return Err(EditorError::OutOfRange { offset, len, size });
        }
        Ok(())
    }

    fn writable(&mut self) -> Result<&mut MmapMut, EditorError> {
        if self.mode == AccessMode::ReadOnly {
            return Err(EditorError::ReadOnly {
                path: self.path.clone(),
            });
        }
        match self.map.as_mut() {
            Some(Mapping::ReadWrite(m)) => Ok(m),
            // check_range rejects any non-empty write before we get here
            _ => unreachable!("writable mapping requested for empty file"),
        }
    }

    /// Read `len` bytes starting at `offset`.
    ///
    /// The returned slice borrows the mapping; the borrow checker
    /// prevents holding it across a resize.
    pub fn read_slice(&self, offset: usize, len: usize) -> Result<&[u8], EditorError> {
        self.check_range(offset, len)?;
        Ok(&self.as_slice()[offset..offset + len])
    }

    /// Overwrite `data.len()` bytes in place starting at `offset`.
    ///
    /// Never changes the file length; writing past the current end fails
    /// with [`EditorError::OutOfRange`].
    pub fn write_slice(&mut self, offset: usize, data: &[u8]) -> Result<(), EditorError> {
        if self.mode == AccessMode::ReadOnly {
            return Err(EditorError::ReadOnly {
                path: self.path.clone(),
            });
        }
        self.check_range(offset, data.len())?;
        if data.is_empty() {
            return Ok(());
        }
        let map = self.writable()?;
        map[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Find the first occurrence of `pattern` at or after `from`.
    ///
    /// An empty pattern matches nothing.
    #[must_use]
    pub fn find_from(&self, pattern: &[u8], from: usize) -> Option<usize> {
        let hay = self.as_slice();
        if pattern.is_empty() || from >= hay.len() || pattern.len() > hay.len() - from {
            return None;
        }
        hay[from..]
            .windows(pattern.len())
            .position(|w| w == pattern)
            .map(|rel| from + rel)
    }

    /// Find the first occurrence of `pattern`.
    #[must_use]
    pub fn find(&self, pattern: &[u8]) -> Option<usize> {
        self.find_from(pattern, 0)
    }

    /// Offsets of all non-overlapping occurrences of `pattern`.
    #[must_use]
    pub fn find_all(&self, pattern: &[u8]) -> Vec<usize> {
        let mut hits = Vec::new();
        let mut pos = 0;
        while let Some(at) = self.find_from(pattern, pos) {
            hits.push(at);
            pos = at + pattern.len();
        }
        hits
    }

    /// Replace the first occurrence of `old` with `new` (same length).
    ///
    /// Returns the offset of the replacement, or `None` if `old` does
    /// not occur.
    pub fn replace(&mut self, old: &[u8], new: &[u8]) -> Result<Option<usize>, EditorError> {
        if old.len() != new.len() {
            return Err(EditorError::LengthMismatch {
                old: old.len(),
                new: new.len(),
            });
        }
        match self.find(old) {
            Some(at) => {
                self.write_slice(at, new)?;
                Ok(Some(at))
            }
            None => Ok(None),
        }
    }

    /// Replace all non-overlapping occurrences of `old` with `new`
    /// (same length). Returns the number of replacements.
    pub fn replace_all(&mut self, old: &[u8], new: &[u8]) -> Result<usize, EditorError> {
        if old.len() != new.len() {
            return Err(EditorError::LengthMismatch {
                old: old.len(),
                new: new.len(),
            });
        }
        let hits = self.find_all(old);
        for &at in &hits {
            self.write_slice(at, new)?;
        }
        Ok(hits.len())
    }

    /// Truncate or extend the file to `new_size`, remapping the region.
    ///
    /// Extension pads with zero bytes. Any slice previously taken from
    /// this editor is invalidated (the borrow checker enforces this).
    pub fn resize(&mut self, new_size: usize) -> Result<(), EditorError> {
        if self.mode == AccessMode::ReadOnly {
            return Err(EditorError::ReadOnly {
                path: self.path.clone(),
            });
        }
        self.flush()?;
        // Unmap before changing the file length; a stale mapping must
        // never survive a resize.
        self.map = None;
        self.file
            .set_len(new_size as u64)
            .map_err(|e| EditorError::io(&self.path, e))?;
        debug!("resized {} to {} bytes", self.path.display(), new_size);
        self.remap()
    }

    /// Replace byte range `[start, end)` with `new_content`, resizing
    /// the file as needed.
    ///
    /// The tail segment `[end, old_size)` is snapshotted before the
    /// resize, then written back in a direction-aware order: when
    /// growing, the tail is relocated before the gap is filled; when
    /// shrinking, the head is written before the file is truncated. No
    /// byte is ever read from a region that has already been
    /// overwritten.
    pub fn replace_range(
        &mut self,
        start: usize,
        end: usize,
        new_content: &[u8],
    ) -> Result<(), EditorError> {
        let old_size = self.len();
        if start > end || end > old_size {
            return Err(EditorError::OutOfRange {
                offset: start,
                len: end.saturating_sub(start),
                size: old_size,
            });
        }
        if self.mode == AccessMode::ReadOnly {
            return Err(EditorError::ReadOnly {
                path: self.path.clone(),
            });
        }

        let tail = self.read_slice(end, old_size - end)?.to_vec();
        let new_size = old_size - (end - start) + new_content.len();

        if new_content.len() >= end - start {
            // Growing (or same length): make room first, then write
            // tail-to-head so the relocated tail lands before the gap
            // is overwritten.
            self.resize(new_size)?;
            self.write_slice(start + new_content.len(), &tail)?;
            self.write_slice(start, new_content)?;
        } else {
            // Shrinking: write head-to-tail inside the old bounds, then
            // truncate.
            self.write_slice(start, new_content)?;
            self.write_slice(start + new_content.len(), &tail)?;
            self.resize(new_size)?;
        }
        Ok(())
    }

    /// Insert `data` at `offset`, shifting existing content.
    pub fn insert(&mut self, offset: usize, data: &[u8]) -> Result<(), EditorError> {
        self.replace_range(offset, offset, data)
    }

    /// Delete byte range `[start, end)`, shifting remaining content.
    pub fn delete_range(&mut self, start: usize, end: usize) -> Result<(), EditorError> {
        self.replace_range(start, end, &[])
    }

    /// Force pending mapped writes to stable storage.
    ///
    /// A no-op when nothing is mapped or the mapping is read-only.
    pub fn flush(&mut self) -> Result<(), EditorError> {
        if let Some(Mapping::ReadWrite(m)) = self.map.as_ref() {
            m.flush().map_err(|e| EditorError::io(&self.path, e))?;
        }
        Ok(())
    }
}

impl RandomAccess for RegionEditor {
    fn read_slice(&mut self, offset: usize, len: usize) -> Result<Vec<u8>, EditorError> {
        RegionEditor::read_slice(self, offset, len).map(<[u8]>::to_vec)
    }

    fn write_slice(&mut self, offset: usize, data: &[u8]) -> Result<(), EditorError> {
        RegionEditor::write_slice(self, offset, data)
    }

    fn flush(&mut self) -> Result<(), EditorError> {
        RegionEditor::flush(self)
    }
}

/// One-shot in-place write at an offset.
pub fn quick_write(
    path: impl AsRef<Path>,
    offset: usize,
    data: &[u8],
) -> Result<(), EditorError> {
    let mut editor = RegionEditor::open(path)?;
    editor.write_slice(offset, data)?;
    editor.flush()
}

/// One-shot fixed-length find-and-replace; returns the replacement count.
pub fn quick_find_replace(
    path: impl AsRef<Path>,
    old: &[u8],
    new: &[u8],
) -> Result<usize, EditorError> {
    let mut editor = RegionEditor::open(path)?;
    let count = editor.replace_all(old, new)?;
    editor.flush()?;
    Ok(count)
}
