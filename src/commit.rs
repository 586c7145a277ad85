//! Atomic commit / rollback around a single edit.
//!
//! Every mutation of a target file goes through a [`Transaction`]:
//!
//! ```text
//! Idle -> BackedUp -> Editing -> { Committed | RolledBack }
//! ```
//!
//! The lock is taken before anything else, the backup is written before
//! any mutation, and the publish step is an atomic rename, so a reader
//! observing the target at any instant sees either the pre-edit content
//! in full or the post-edit content in full, never a mixture. Both
//! terminal states release the lock.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use filetime::FileTime;
use log::{debug, error, info, warn};
use xxhash_rust::xxh3::Xxh3;

use crate::error::{EditorError, Phase};
use crate::gate::{ConcurrencyGate, PathLock};
use crate::region::RegionEditor;

/// Suffix of the transient backup sidecar next to the target file.
pub const BACKUP_SUFFIX: &str = ".backup";

/// Default lock timeout for the convenience wrappers.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Path of the backup sidecar for `path`.
pub fn backup_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(BACKUP_SUFFIX);
    PathBuf::from(os)
}

/// Transaction lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    BackedUp,
    Editing,
    Committed,
    RolledBack,
}

/// The unit of atomicity: lock + backup + one edit + commit or rollback.
///
/// A transaction never outlives a single logical edit; the consuming
/// `run_*` / `publish` methods drive it to a terminal state. Dropping a
/// live transaction rolls it back.
#[must_use = "a transaction does nothing until run_scratch/run_in_place/publish is called"]
pub struct Transaction {
    path: PathBuf,
    backup_path: PathBuf,
    /// xxh3 of the snapshot, verified before any restore.
    backup_digest: Option<u64>,
    /// Whether the target existed when the transaction began.
    had_target: bool,
    lock: Option<PathLock>,
    state: TxState,
}

impl Transaction {
    /// Acquire the path lock and snapshot the target.
    ///
    /// Fails with [`EditorError::LockTimeout`] if the gate cannot be
    /// taken in time, and with [`EditorError::BackupFailed`] if the
    /// snapshot cannot be completed; in both cases the target has not
    /// been touched.
    pub fn begin(path: impl AsRef<Path>, timeout: Duration) -> Result<Self, EditorError> {
        let path = path.as_ref().to_path_buf();
        let lock = ConcurrencyGate::acquire(&path, timeout)?;
        let mut tx = Self {
            backup_path: backup_path_for(&path),
            path,
            backup_digest: None,
            had_target: false,
            lock: Some(lock),
            state: TxState::Idle,
        };
        tx.back_up()?;
        Ok(tx)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TxState {
        self.state
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    fn back_up(&mut self) -> Result<(), EditorError> {
        if self.backup_path.exists() {
            // A leftover backup means an earlier transaction never
            // reached a terminal state; never clobber the only
            // known-good snapshot.
            return Err(EditorError::BackupFailed {
                path: self.path.clone(),
                source: io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("stale backup present: {}", self.backup_path.display()),
                ),
            });
        }

        self.had_target = self.path.exists();
        if self.had_target {
            fs::copy(&self.path, &self.backup_path).map_err(|e| EditorError::BackupFailed {
                path: self.path.clone(),
                source: e,
            })?;
            match hash_file(&self.backup_path) {
                Ok(digest) => self.backup_digest = Some(digest),
                Err(e) => {
                    let _ = fs::remove_file(&self.backup_path);
                    return Err(EditorError::BackupFailed {
                        path: self.path.clone(),
                        source: io::Error::other(e.to_string()),
                    });
                }
            }
            debug!("created backup {}", self.backup_path.display());
        }
        self.state = TxState::BackedUp;
        Ok(())
    }

    /// Run `edit` against a scratch file, then publish it atomically.
    ///
    /// `edit` receives the (untouched) target path for reading and the
    /// open scratch file for writing. On success the scratch replaces
    /// the target via atomic rename; on failure the scratch is discarded
    /// and the backup restored.
    pub fn run_scratch<T, F>(mut self, edit: F) -> Result<T, EditorError>
    where
        F: FnOnce(&Path, &mut File) -> Result<T, EditorError>,
    {
        self.state = TxState::Editing;
        let parent = match self.path.parent() {
            Some(p) => p.to_path_buf(),
            None => {
                let e = EditorError::io(
                    &self.path,
                    io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory"),
                );
                self.rollback_or_log();
                return Err(e.in_phase(&self.path, Phase::Edit));
            }
        };

        // Same directory as the target so the final rename stays on one
        // filesystem.
        let mut scratch = match tempfile::NamedTempFile::new_in(&parent) {
            Ok(t) => t,
            Err(e) => {
                self.rollback_or_log();
                return Err(
                    EditorError::io(&parent, e).in_phase(&self.path, Phase::Edit)
                );
            }
        };

        let value = match edit(&self.path, scratch.as_file_mut()) {
            Ok(v) => v,
            Err(e) => {
                // Scratch is discarded when it drops.
                self.rollback_or_log();
                return Err(e.in_phase(&self.path, Phase::Edit));
            }
        };

        if let Err(e) = scratch.as_file().sync_all() {
            self.rollback_or_log();
            return Err(EditorError::CommitFailed {
                path: self.path.clone(),
                source: e,
            });
        }
        if let Err(e) = scratch.persist(&self.path) {
            // The rename itself failed: retry the rollback path before
            // propagating, never leave the scratch state ambiguous.
            self.rollback_or_log();
            return Err(EditorError::CommitFailed {
                path: self.path.clone(),
                source: e.error,
            });
        }

        self.finish_commit()?;
        Ok(value)
    }

    /// Run `edit` in place through a [`RegionEditor`], guarded by the
    /// backup.
    ///
    /// Faster than the scratch path for small byte/region edits; any
    /// error restores the snapshot.
    pub fn run_in_place<T, F>(mut self, edit: F) -> Result<T, EditorError>
    where
        F: FnOnce(&mut RegionEditor) -> Result<T, EditorError>,
    {
        self.state = TxState::Editing;
        let mut editor = match RegionEditor::open(&self.path) {
            Ok(ed) => ed,
            Err(e) => {
                self.rollback_or_log();
                return Err(e.in_phase(&self.path, Phase::Edit));
            }
        };

        match edit(&mut editor) {
            Ok(v) => {
                if let Err(e) = editor.flush() {
                    drop(editor);
                    self.rollback_or_log();
                    return Err(EditorError::CommitFailed {
                        path: self.path.clone(),
                        source: io::Error::other(e.to_string()),
                    });
                }
                drop(editor);
                self.finish_commit()?;
                Ok(v)
            }
            Err(e) => {
                drop(editor);
                self.rollback_or_log();
                Err(e.in_phase(&self.path, Phase::Edit))
            }
        }
    }

    /// Atomically publish an externally staged file over the target.
    ///
    /// Pairs with [`crate::StreamEditor::process_lines`] and
    /// [`crate::StreamEditor::process_chunks`], which stage their output
    /// as a sibling file.
    pub fn publish(mut self, staged: &Path) -> Result<(), EditorError> {
        self.state = TxState::Editing;

        let sync_result = File::open(staged).and_then(|f| f.sync_all());
        if let Err(e) = sync_result {
            let _ = fs::remove_file(staged);
            self.rollback_or_log();
            return Err(EditorError::CommitFailed {
                path: self.path.clone(),
                source: e,
            });
        }
        if let Err(e) = fs::rename(staged, &self.path) {
            let _ = fs::remove_file(staged);
            self.rollback_or_log();
            return Err(EditorError::CommitFailed {
                path: self.path.clone(),
                source: e,
            });
        }

        self.finish_commit()
    }

    fn finish_commit(&mut self) -> Result<(), EditorError> {
        if let Err(e) = filetime::set_file_mtime(&self.path, FileTime::now()) {
            warn!("could not touch mtime of {}: {e}", self.path.display());
        }

        // The rename already made the new content durable; this state is
        // terminal either way. But a backup left behind reads as a crashed
        // transaction and blocks the next one, so a failed removal is a
        // commit error, not a warning.
        let mut cleanup = Ok(());
        if self.had_target {
            if let Err(first) = fs::remove_file(&self.backup_path) {
                if first.kind() != io::ErrorKind::NotFound {
                    warn!(
                        "could not remove backup {}: {first}, retrying",
                        self.backup_path.display()
                    );
                    match fs::remove_file(&self.backup_path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => {
                            cleanup = Err(EditorError::CommitFailed {
                                path: self.path.clone(),
                                source: io::Error::new(
                                    e.kind(),
                                    format!(
                                        "edit committed, but backup {} could not be removed: {e}",
                                        self.backup_path.display()
                                    ),
                                ),
                            });
                        }
                    }
                }
            }
        }

        self.state = TxState::Committed;
        self.lock = None;
        if cleanup.is_ok() {
            info!("committed edit to {}", self.path.display());
        }
        cleanup
    }

    fn rollback(&mut self) -> Result<(), EditorError> {
        if self.had_target {
            if let Some(expected) = self.backup_digest {
                let actual = hash_file(&self.backup_path)?;
                if actual != expected {
                    return Err(EditorError::CommitFailed {
                        path: self.path.clone(),
                        source: io::Error::new(
                            io::ErrorKind::InvalidData,
                            "backup digest mismatch, refusing to restore corrupt snapshot",
                        ),
                    });
                }
            }
            // Move, not copy: a second copy would be a second point of
            // failure.
            fs::rename(&self.backup_path, &self.path)
                .map_err(|e| EditorError::io(&self.path, e))?;
            warn!("rolled back {} from backup", self.path.display());
        } else {
            match fs::remove_file(&self.path) {
                Ok(()) => warn!("rolled back newly created {}", self.path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(EditorError::io(&self.path, e)),
            }
        }
        self.state = TxState::RolledBack;
        self.lock = None;
        Ok(())
    }

    fn rollback_or_log(&mut self) {
        if let Err(e) = self.rollback() {
            error!("rollback of {} failed: {e}", self.path.display());
            self.state = TxState::RolledBack;
            self.lock = None;
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if matches!(self.state, TxState::BackedUp | TxState::Editing) {
            warn!(
                "transaction on {} dropped before commit, rolling back",
                self.path.display()
            );
            self.rollback_or_log();
        }
    }
}

/// Run `edit` against a scratch copy of `path` and publish atomically.
pub fn with_scratch<T, F>(
    path: impl AsRef<Path>,
    timeout: Duration,
    edit: F,
) -> Result<T, EditorError>
where
    F: FnOnce(&Path, &mut File) -> Result<T, EditorError>,
{
    Transaction::begin(path, timeout)?.run_scratch(edit)
}

/// Run `edit` in place on `path`, guarded by a backup.
pub fn with_region<T, F>(
    path: impl AsRef<Path>,
    timeout: Duration,
    edit: F,
) -> Result<T, EditorError>
where
    F: FnOnce(&mut RegionEditor) -> Result<T, EditorError>,
{
    Transaction::begin(path, timeout)?.run_in_place(edit)
}

fn hash_file(path: &Path) -> Result<u64, EditorError> {
    let mut file = File::open(path).map_err(|e| EditorError::io(path, e))?;
    let mut hasher = Xxh3::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| EditorError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.digest())
}
