//! Capability traits shared by the editing strategies.
//!
//! Callers pick a strategy by access pattern: [`RandomAccess`] for
//! offset-addressed reads and writes ([`crate::RegionEditor`],
//! [`crate::SeekEditor`]), [`Streaming`] for forward-only bounded-memory
//! passes ([`crate::StreamEditor`]).

use crate::error::EditorError;

/// Offset-addressed access to a file's current contents.
///
/// Implementations must reject any access where `offset + data.len()`
/// exceeds the current file size with [`EditorError::OutOfRange`];
/// `write_slice` never changes the file length.
pub trait RandomAccess {
    /// Read `len` bytes starting at `offset`.
    fn read_slice(&mut self, offset: usize, len: usize) -> Result<Vec<u8>, EditorError>;

    /// Overwrite `data.len()` bytes starting at `offset`.
    fn write_slice(&mut self, offset: usize, data: &[u8]) -> Result<(), EditorError>;

    /// Force pending writes to stable storage.
    fn flush(&mut self) -> Result<(), EditorError>;
}

/// Forward-only, memory-bounded access.
pub trait Streaming {
    type Chunks: Iterator<Item = Result<Vec<u8>, EditorError>>;
    type Lines: Iterator<Item = Result<String, EditorError>>;

    /// Iterate over the file in blocks of at most `chunk_size` bytes.
    fn read_chunks(&self, chunk_size: usize) -> Result<Self::Chunks, EditorError>;

    /// Iterate over the file line by line.
    fn read_lines(&self) -> Result<Self::Lines, EditorError>;
}
