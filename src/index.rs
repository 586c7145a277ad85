//! Line-boundary index for O(1) line addressing.
//!
//! [`LineIndex`] records the byte offset of every line start in a single
//! buffered scan. It is a derived cache, never authoritative: the
//! instant the underlying file is mutated the index is stale and must be
//! rebuilt with [`LineIndex::rebuild`] before being trusted again. A
//! stale index does not fail loudly, it returns wrong offsets, which is
//! why rebuild-on-write is mandatory for every caller that mutates the
//! file.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::commit;
use crate::error::EditorError;

/// Byte offsets of line starts, strictly increasing, `offsets[0] == 0`
/// for any non-empty file.
#[derive(Debug, Clone)]
pub struct LineIndex {
    path: PathBuf,
    offsets: Vec<u64>,
    file_size: u64,
}

impl LineIndex {
    /// Build the index with a single forward scan of `path`.
    pub fn build(path: impl AsRef<Path>) -> Result<Self, EditorError> {
        let path = path.as_ref().to_path_buf();
        let (offsets, file_size) = scan(&path)?;
        Ok(Self {
            path,
            offsets,
            file_size,
        })
    }

    /// Re-scan the file, replacing the cached offsets.
    ///
    /// Must be called after any mutation of the underlying file.
    pub fn rebuild(&mut self) -> Result<(), EditorError> {
        let (offsets, file_size) = scan(&self.path)?;
        self.offsets = offsets;
        self.file_size = file_size;
        Ok(())
    }

    /// Number of lines in the file (0 for an empty file).
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.offsets.len()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset of the start of line `index` (0-based).
    pub fn line_offset(&self, index: usize) -> Result<u64, EditorError> {
        self.offsets
            .get(index)
            .copied()
            .ok_or(EditorError::IndexOutOfRange {
                index,
                count: self.offsets.len(),
            })
    }

    /// Line number (0-based) containing byte `offset`.
    ///
    /// Offsets are sorted, so this is a binary search over the cached
    /// line starts.
    pub fn line_at_offset(&self, offset: u64) -> Result<usize, EditorError> {
        if offset >= self.file_size {
            return Err(EditorError::OutOfRange {
                offset: offset as usize,
                len: 1,
                size: self.file_size as usize,
            });
        }
        let upper = self.offsets.partition_point(|&o| o <= offset);
        Ok(upper - 1)
    }

    /// Bytes of line `index`, without the trailing newline.
    pub fn get_line(&self, index: usize) -> Result<Vec<u8>, EditorError> {
        let mut file = File::open(&self.path).map_err(|e| EditorError::io(&self.path, e))?;
        self.read_line(&mut file, index)
    }

    /// Lines `start..=end` inclusive, each without its trailing newline.
    ///
    /// Both bounds must be valid line numbers; `start > end` yields an
    /// empty result.
    pub fn get_lines(&self, start: usize, end: usize) -> Result<Vec<Vec<u8>>, EditorError> {
        let count = self.offsets.len();
        for bound in [start, end] {
            if bound >= count {
                return Err(EditorError::IndexOutOfRange {
                    index: bound,
                    count,
                });
            }
        }
        if start > end {
            return Ok(Vec::new());
        }
        let mut file = File::open(&self.path).map_err(|e| EditorError::io(&self.path, e))?;
        let mut lines = Vec::with_capacity(end - start + 1);
        for i in start..=end {
            lines.push(self.read_line(&mut file, i)?);
        }
        Ok(lines)
    }

    /// Replace line `index` with `new_content`, atomically.
    ///
    /// A trailing newline is appended to `new_content` when missing. The
    /// edit runs through the transaction layer (lock, backup, rollback on
    /// failure) and the index is rebuilt before returning, so offsets are
    /// valid for the new content.
    pub fn replace_line(
        &mut self,
        index: usize,
        new_content: &[u8],
        timeout: Duration,
    ) -> Result<(), EditorError> {
        let start = self.line_offset(index)? as usize;
        let end = self
            .offsets
            .get(index + 1)
            .copied()
            .unwrap_or(self.file_size) as usize;

        let mut line = new_content.to_vec();
        if line.last() != Some(&b'\n') {
            line.push(b'\n');
        }

        commit::with_region(&self.path, timeout, |editor| {
            editor.replace_range(start, end, &line)
        })?;
        self.rebuild()
    }

    /// Iterate over all lines using the cached offsets.
    pub fn iter_lines(&self) -> Result<LineIter, EditorError> {
        let file = File::open(&self.path).map_err(|e| EditorError::io(&self.path, e))?;
        Ok(LineIter {
            path: self.path.clone(),
            reader: BufReader::new(file),
            remaining: self.offsets.len(),
        })
    }

    fn read_line(&self, file: &mut File, index: usize) -> Result<Vec<u8>, EditorError> {
        let start = self.line_offset(index)?;
        let end = self
            .offsets
            .get(index + 1)
            .copied()
            .unwrap_or(self.file_size);
        file.seek(SeekFrom::Start(start))
            .map_err(|e| EditorError::io(&self.path, e))?;
        let mut buf = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buf)
            .map_err(|e| EditorError::io(&self.path, e))?;
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        Ok(buf)
    }
}

/// Forward iterator over indexed lines.
pub struct LineIter {
    path: PathBuf,
    reader: BufReader<File>,
    remaining: usize,
}

impl Iterator for LineIter {
    type Item = Result<Vec<u8>, EditorError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let mut buf = Vec::new();
        match self.reader.read_until(b'\n', &mut buf) {
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                Some(Ok(buf))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(EditorError::io(&self.path, e)))
            }
        }
    }
}

fn scan(path: &Path) -> Result<(Vec<u64>, u64), EditorError> {
    let file = File::open(path).map_err(|e| EditorError::io(path, e))?;
    let file_size = file
        .metadata()
        .map_err(|e| EditorError::io(path, e))?
        .len();

    let mut offsets = Vec::new();
    if file_size > 0 {
        offsets.push(0);
    }

    let mut reader = BufReader::new(file);
    let mut pos: u64 = 0;
    loop {
        let buf = reader.fill_buf().map_err(|e| EditorError::io(path, e))?;
        if buf.is_empty() {
            break;
        }
        for (i, &b) in buf.iter().enumerate() {
            if b == b'\n' {
                let next = pos + i as u64 + 1;
                // A newline at EOF terminates the last line rather than
                // starting an empty one.
                if next < file_size {
                    offsets.push(next);
                }
            }
        }
        let n = buf.len();
        pos += n as u64;
        reader.consume(n);
    }

    Ok((offsets, file_size))
}
