//! Per-path mutual exclusion for cooperating editors.
//!
//! Serialization happens at two levels: threads of this process queue
//! on a per-path mutex/condvar looked up in a shared registry, and
//! other processes are excluded through a `<path>.lock` marker file
//! created with `O_EXCL`. The lock is advisory: a writer that does not
//! go through the gate is not stopped by it.
//!
//! [`PathLock`] is an RAII guard; release happens exactly once, on drop,
//! on every exit path of the guarded operation.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::error::EditorError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Suffix of the sidecar lock marker next to the target file.
pub const LOCK_SUFFIX: &str = ".lock";

struct GateState {
    busy: Mutex<bool>,
    freed: Condvar,
}

static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Arc<GateState>>>> = OnceLock::new();

fn gate_for(path: &Path) -> Arc<GateState> {
    let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = registry.lock().unwrap_or_else(|e| e.into_inner());
    map.entry(path.to_path_buf())
        .or_insert_with(|| {
            Arc::new(GateState {
                busy: Mutex::new(false),
                freed: Condvar::new(),
            })
        })
        .clone()
}

/// Path of the lock marker for `path`.
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(LOCK_SUFFIX);
    PathBuf::from(os)
}

/// Per-path gate serializing conflicting operations on the same target.
pub struct ConcurrencyGate;

impl ConcurrencyGate {
    /// Block until the path-scoped lock is free, up to `timeout`.
    ///
    /// Fails with [`EditorError::LockTimeout`] when the deadline elapses
    /// before both the in-process gate and the on-disk marker could be
    /// taken.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<PathLock, EditorError> {
        let deadline = Instant::now() + timeout;
        let state = gate_for(path);

        // In-process turn first; cheaper than spinning on the filesystem.
        {
            let mut busy = state.busy.lock().unwrap_or_else(|e| e.into_inner());
            while *busy {
                let now = Instant::now();
                if now >= deadline {
                    return Err(EditorError::LockTimeout {
                        path: path.to_path_buf(),
                        waited: timeout,
                    });
                }
                let (guard, res) = state
                    .freed
                    .wait_timeout(busy, deadline - now)
                    .unwrap_or_else(|e| e.into_inner());
                busy = guard;
                if res.timed_out() && *busy {
                    return Err(EditorError::LockTimeout {
                        path: path.to_path_buf(),
                        waited: timeout,
                    });
                }
            }
            *busy = true;
        }

        let lock_path = lock_path_for(path);
        match Self::take_marker(path, &lock_path, deadline, timeout) {
            Ok(()) => {
                debug!("acquired lock for {}", path.display());
                Ok(PathLock {
                    path: path.to_path_buf(),
                    lock_path,
                    state,
                })
            }
            Err(e) => {
                // Give back the in-process turn before reporting failure.
                let mut busy = state.busy.lock().unwrap_or_else(|p| p.into_inner());
                *busy = false;
                state.freed.notify_one();
                Err(e)
            }
        }
    }

    fn take_marker(
        path: &Path,
        lock_path: &Path,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<(), EditorError> {
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(lock_path)
            {
                Ok(mut file) => {
                    // Holder PID, for diagnostics only.
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(EditorError::LockTimeout {
                            path: path.to_path_buf(),
                            waited: timeout,
                        });
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(EditorError::io(lock_path, e)),
            }
        }
    }
}

/// Exclusive hold on a path; released exactly once, on drop.
#[must_use = "dropping the lock releases it immediately"]
pub struct PathLock {
    path: PathBuf,
    lock_path: PathBuf,
    state: Arc<GateState>,
}

impl PathLock {
    /// The guarded target path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.lock_path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(
                    "failed to remove lock marker {}: {e}",
                    self.lock_path.display()
                );
            }
        }
        let mut busy = self.state.busy.lock().unwrap_or_else(|e| e.into_inner());
        *busy = false;
        self.state.freed.notify_one();
        debug!("released lock for {}", self.path.display());
    }
}
