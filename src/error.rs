use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Transaction phase in which a failure occurred.
///
/// Attached to propagated errors so callers can tell a failure that
/// happened before any mutation (backup) from one that triggered a
/// rollback (edit, commit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Backup,
    Edit,
    Commit,
    Rollback,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Backup => "backup",
            Phase::Edit => "edit",
            Phase::Commit => "commit",
            Phase::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum EditorError {
    #[error("byte range at offset {offset} (len {len}) out of bounds (file size {size})")]
    OutOfRange {
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("fixed-length replace requires equal operand lengths (old {old}, new {new})")]
    LengthMismatch { old: usize, new: usize },

    #[error("line {index} out of range ({count} lines)")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("file opened read-only: {path}")]
    ReadOnly { path: PathBuf },

    #[error("backup failed for {path} (original untouched): {source}")]
    BackupFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not acquire lock on {path} within {waited:?}")]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("commit failed for {path} (rolled back): {source}")]
    CommitFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("edit failed during {phase} phase for {path}: {source}")]
    Failed {
        path: PathBuf,
        phase: Phase,
        #[source]
        source: Box<EditorError>,
    },
}

impl EditorError {
    /// Attach path context to a raw I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EditorError::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap an error with the transaction phase it occurred in.
    ///
    /// Lock timeouts and backup failures already carry their phase in
    /// the variant itself and are passed through unchanged.
    pub(crate) fn in_phase(self, path: impl Into<PathBuf>, phase: Phase) -> Self {
        match self {
            e @ (EditorError::LockTimeout { .. } | EditorError::BackupFailed { .. }) => e,
            other => EditorError::Failed {
                path: path.into(),
                phase,
                source: Box::new(other),
            },
        }
    }
}
