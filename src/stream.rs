//! Streaming sequential access with bounded memory.
//!
//! [`StreamEditor`] never materializes more than one chunk or one line
//! at a time, whatever the file size. Rewrites ([`StreamEditor::process_lines`])
//! go to a sibling temp file so a failed transform can never damage the
//! original; publishing the result atomically is the commit layer's job
//! ([`crate::commit`]).

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::access::Streaming;
use crate::error::EditorError;

/// Default chunk size for internal scans (8 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Forward-only, memory-bounded editor over a file path.
#[derive(Debug, Clone)]
pub struct StreamEditor {
    path: PathBuf,
    chunk_size: usize,
}

impl StreamEditor {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_chunk_size(path, DEFAULT_CHUNK_SIZE)
    }

    /// Use `chunk_size` for internal scans (`count_lines`, `tail`).
    pub fn with_chunk_size(path: impl AsRef<Path>, chunk_size: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            chunk_size: chunk_size.max(1),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<File, EditorError> {
        File::open(&self.path).map_err(|e| EditorError::io(&self.path, e))
    }

    /// Iterate over the file in blocks of at most `chunk_size` bytes.
    pub fn read_chunks(&self, chunk_size: usize) -> Result<ChunkIter, EditorError> {
        Ok(ChunkIter {
            path: self.path.clone(),
            file: self.open()?,
            chunk_size: chunk_size.max(1),
            done: false,
        })
    }

    /// Iterate over the file line by line (newlines stripped).
    pub fn read_lines(&self) -> Result<LineIter, EditorError> {
        Ok(LineIter {
            path: self.path.clone(),
            lines: BufReader::new(self.open()?).lines(),
        })
    }

    /// Rewrite the file line by line into a sibling temp file.
    ///
    /// `transform` returns the replacement line, or `None` to drop the
    /// line. Each emitted line is written with a trailing newline. The
    /// original file is never touched; the returned path is meant to be
    /// published over it through [`crate::commit::Transaction::publish`].
    pub fn process_lines<F>(&self, mut transform: F) -> Result<PathBuf, EditorError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut temp = self.scratch_in_parent()?;
        for line in self.read_lines()? {
            let line = line?;
            if let Some(out) = transform(&line) {
                temp.write_all(out.as_bytes())
                    .and_then(|()| temp.write_all(b"\n"))
                    .map_err(|e| EditorError::io(temp.path(), e))?;
            }
        }
        self.seal_scratch(temp)
    }

    /// Rewrite the file chunk by chunk into a sibling temp file.
    ///
    /// The binary counterpart of [`Self::process_lines`]: chunks are read
    /// at the configured chunk size, `transform` returns the replacement
    /// bytes for each chunk or `None` to drop it. Emitted bytes are
    /// written as-is, with no delimiter handling.
    pub fn process_chunks<F>(&self, mut transform: F) -> Result<PathBuf, EditorError>
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>>,
    {
        let mut temp = self.scratch_in_parent()?;
        for chunk in self.read_chunks(self.chunk_size)? {
            let chunk = chunk?;
            if let Some(out) = transform(&chunk) {
                temp.write_all(&out)
                    .map_err(|e| EditorError::io(temp.path(), e))?;
            }
        }
        self.seal_scratch(temp)
    }

    fn scratch_in_parent(&self) -> Result<tempfile::NamedTempFile, EditorError> {
        let parent = self.path.parent().ok_or_else(|| {
            EditorError::io(
                &self.path,
                io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory"),
            )
        })?;
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "stream".to_string());
        tempfile::Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(".tmp")
            .tempfile_in(parent)
            .map_err(|e| EditorError::io(parent, e))
    }

    fn seal_scratch(&self, temp: tempfile::NamedTempFile) -> Result<PathBuf, EditorError> {
        temp.as_file()
            .sync_all()
            .map_err(|e| EditorError::io(temp.path(), e))?;
        let (_file, out_path) = temp.keep().map_err(|e| EditorError::io(&self.path, e.error))?;
        debug!(
            "processed {} into scratch {}",
            self.path.display(),
            out_path.display()
        );
        Ok(out_path)
    }

    /// Keep only the lines matching `predicate`; see [`Self::process_lines`].
    pub fn filter_lines<F>(&self, mut predicate: F) -> Result<PathBuf, EditorError>
    where
        F: FnMut(&str) -> bool,
    {
        self.process_lines(|line| predicate(line).then(|| line.to_string()))
    }

    /// Count lines without holding more than one chunk in memory.
    ///
    /// A final line without a trailing newline still counts.
    pub fn count_lines(&self) -> Result<usize, EditorError> {
        let mut count = 0;
        let mut last_byte = None;
        for chunk in self.read_chunks(self.chunk_size)? {
            let chunk = chunk?;
            count += chunk.iter().filter(|&&b| b == b'\n').count();
            last_byte = chunk.last().copied().or(last_byte);
        }
        if matches!(last_byte, Some(b) if b != b'\n') {
            count += 1;
        }
        Ok(count)
    }

    /// First `n` lines. `n == 0` yields an empty result.
    pub fn head(&self, n: usize) -> Result<Vec<String>, EditorError> {
        self.read_lines()?.take(n).collect()
    }

    /// Last `n` lines, found by scanning backwards from end-of-file in
    /// fixed-size chunks; the file is never loaded in full.
    pub fn tail(&self, n: usize) -> Result<Vec<String>, EditorError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut file = self.open()?;
        let size = file
            .metadata()
            .map_err(|e| EditorError::io(&self.path, e))?
            .len();
        if size == 0 {
            return Ok(Vec::new());
        }

        let mut pos = size;
        let mut newlines = 0usize;
        let mut pieces: Vec<Vec<u8>> = Vec::new();

        // n+1 newlines guarantee n complete lines above the cut.
        while pos > 0 && newlines <= n {
            let step = (self.chunk_size as u64).min(pos);
            pos -= step;
            file.seek(SeekFrom::Start(pos))
                .map_err(|e| EditorError::io(&self.path, e))?;
            let mut buf = vec![0u8; step as usize];
            file.read_exact(&mut buf)
                .map_err(|e| EditorError::io(&self.path, e))?;
            newlines += buf.iter().filter(|&&b| b == b'\n').count();
            pieces.push(buf);
        }

        let mut bytes = Vec::with_capacity(pieces.iter().map(Vec::len).sum());
        for piece in pieces.into_iter().rev() {
            bytes.extend_from_slice(&piece);
        }
        if bytes.last() == Some(&b'\n') {
            bytes.pop();
        }

        let mut lines: Vec<String> = Vec::new();
        for raw in bytes.split(|&b| b == b'\n') {
            let s = String::from_utf8(raw.to_vec()).map_err(|e| {
                EditorError::io(
                    &self.path,
                    io::Error::new(io::ErrorKind::InvalidData, e),
                )
            })?;
            lines.push(s);
        }
        let keep = lines.len().saturating_sub(n);
        Ok(lines.split_off(keep))
    }

    /// Lines containing `pattern`, with their 1-based line numbers.
    pub fn grep(&self, pattern: &str) -> Result<Vec<(usize, String)>, EditorError> {
        let mut hits = Vec::new();
        for (i, line) in self.read_lines()?.enumerate() {
            let line = line?;
            if line.contains(pattern) {
                hits.push((i + 1, line));
            }
        }
        Ok(hits)
    }
}

impl Streaming for StreamEditor {
    type Chunks = ChunkIter;
    type Lines = LineIter;

    fn read_chunks(&self, chunk_size: usize) -> Result<ChunkIter, EditorError> {
        StreamEditor::read_chunks(self, chunk_size)
    }

    fn read_lines(&self) -> Result<LineIter, EditorError> {
        StreamEditor::read_lines(self)
    }
}

/// Iterator over fixed-size byte blocks.
pub struct ChunkIter {
    path: PathBuf,
    file: File,
    chunk_size: usize,
    done: bool,
}

impl Iterator for ChunkIter {
    type Item = Result<Vec<u8>, EditorError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        // Fill the chunk fully unless EOF lands mid-chunk.
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => {
                    self.done = true;
                    return Some(Err(EditorError::io(&self.path, e)));
                }
            }
        }
        if filled == 0 {
            self.done = true;
            return None;
        }
        buf.truncate(filled);
        Some(Ok(buf))
    }
}

/// Iterator over lines with newlines stripped.
pub struct LineIter {
    path: PathBuf,
    lines: io::Lines<BufReader<File>>,
}

impl Iterator for LineIter {
    type Item = Result<String, EditorError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.lines
            .next()
            .map(|r| r.map_err(|e| EditorError::io(&self.path, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture(content: &[u8]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.txt");
        fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_chunks_bounded_and_complete() {
        let content: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let (_dir, path) = fixture(&content);
        let editor = StreamEditor::new(&path);

        let mut total = Vec::new();
        for chunk in editor.read_chunks(512).unwrap() {
            let chunk = chunk.unwrap();
            assert!(chunk.len() <= 512);
            total.extend_from_slice(&chunk);
        }
        assert_eq!(total, content);
    }

    #[test]
    fn test_read_lines() {
        let (_dir, path) = fixture(b"a\nbb\nccc");
        let editor = StreamEditor::new(&path);
        let lines: Vec<String> = editor.read_lines().unwrap().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["a", "bb", "ccc"]);
    }

    #[test]
    fn test_empty_file_everywhere() {
        let (_dir, path) = fixture(b"");
        let editor = StreamEditor::new(&path);
        assert_eq!(editor.read_chunks(64).unwrap().count(), 0);
        assert_eq!(editor.count_lines().unwrap(), 0);
        assert!(editor.head(5).unwrap().is_empty());
        assert!(editor.tail(5).unwrap().is_empty());
    }

    #[test]
    fn test_count_lines_trailing_newline_variants() {
        let (_dir, path) = fixture(b"a\nb\nc\n");
        assert_eq!(StreamEditor::new(&path).count_lines().unwrap(), 3);
        fs::write(&path, b"a\nb\nc").unwrap();
        assert_eq!(StreamEditor::new(&path).count_lines().unwrap(), 3);
    }

    #[test]
    fn test_head_and_zero() {
        let (_dir, path) = fixture(b"1\n2\n3\n4\n");
        let editor = StreamEditor::new(&path);
        assert_eq!(editor.head(2).unwrap(), vec!["1", "2"]);
        assert!(editor.head(0).unwrap().is_empty());
        assert_eq!(editor.head(99).unwrap().len(), 4);
    }

    #[test]
    fn test_tail_small_chunks() {
        let body: String = (0..100).map(|i| format!("line-{i}\n")).collect();
        let (_dir, path) = fixture(body.as_bytes());
        // Chunk far smaller than the file forces multiple reverse reads.
        let editor = StreamEditor::with_chunk_size(&path, 16);
        assert_eq!(editor.tail(3).unwrap(), vec!["line-97", "line-98", "line-99"]);
        assert!(editor.tail(0).unwrap().is_empty());
        assert_eq!(editor.tail(1000).unwrap().len(), 100);
    }

    #[test]
    fn test_tail_without_trailing_newline() {
        let (_dir, path) = fixture(b"a\nb\nc");
        let editor = StreamEditor::new(&path);
        assert_eq!(editor.tail(2).unwrap(), vec!["b", "c"]);
    }

    #[test]
    fn test_process_lines_writes_sibling_scratch() {
        let (dir, path) = fixture(b"keep\ndrop\nkeep\n");
        let editor = StreamEditor::new(&path);
        let out = editor
            .process_lines(|line| (line != "drop").then(|| line.to_uppercase()))
            .unwrap();

        assert_eq!(out.parent().unwrap(), dir.path());
        assert_eq!(fs::read_to_string(&out).unwrap(), "KEEP\nKEEP\n");
        // Original untouched.
        assert_eq!(fs::read_to_string(&path).unwrap(), "keep\ndrop\nkeep\n");
        fs::remove_file(out).unwrap();
    }

    #[test]
    fn test_process_chunks_binary_transform() {
        let content: Vec<u8> = (0..1000u16).flat_map(|i| i.to_le_bytes()).collect();
        let (dir, path) = fixture(&content);
        // Chunk smaller than the file so the transform sees several chunks.
        let editor = StreamEditor::with_chunk_size(&path, 128);
        let out = editor
            .process_chunks(|chunk| Some(chunk.iter().map(|b| b ^ 0xFF).collect()))
            .unwrap();

        assert_eq!(out.parent().unwrap(), dir.path());
        let expected: Vec<u8> = content.iter().map(|b| b ^ 0xFF).collect();
        assert_eq!(fs::read(&out).unwrap(), expected);
        assert_eq!(fs::read(&path).unwrap(), content);
        fs::remove_file(out).unwrap();
    }

    #[test]
    fn test_process_chunks_can_drop_chunks() {
        let (_dir, path) = fixture(b"aaaabbbbcccc");
        let editor = StreamEditor::with_chunk_size(&path, 4);
        let out = editor
            .process_chunks(|chunk| (chunk != b"bbbb").then(|| chunk.to_vec()))
            .unwrap();
        assert_eq!(fs::read(&out).unwrap(), b"aaaacccc");
        fs::remove_file(out).unwrap();
    }

    #[test]
    fn test_filter_lines() {
        let (_dir, path) = fixture(b"apple\nbanana\navocado\n");
        let out = StreamEditor::new(&path)
            .filter_lines(|line| line.starts_with('a'))
            .unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "apple\navocado\n");
        fs::remove_file(out).unwrap();
    }

    #[test]
    fn test_grep_line_numbers() {
        let (_dir, path) = fixture(b"x\nneedle here\ny\nanother needle\n");
        let hits = StreamEditor::new(&path).grep("needle").unwrap();
        assert_eq!(
            hits,
            vec![
                (2, "needle here".to_string()),
                (4, "another needle".to_string())
            ]
        );
    }
}
