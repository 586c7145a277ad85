//! Filespan: partial file editing without whole-file loads
//!
//! An engine for reading and mutating parts of a file — byte ranges,
//! line ranges — with the guarantee that a crash, error, or concurrent
//! access never leaves the file half-written.
//!
//! # Architecture
//!
//! Three access strategies cover the common patterns: [`RegionEditor`]
//! (memory-mapped random access), [`SeekEditor`] (positioned I/O without
//! a mapping), and [`StreamEditor`] (forward-only, memory-bounded).
//! [`LineIndex`] gives O(1) line addressing after a single scan. All
//! mutation runs inside a [`Transaction`]: lock, backup, edit, then
//! atomic publish or rollback.
//!
//! # Safety
//!
//! - Backup written before any mutation; restored by rename on failure
//! - Atomic publish (tempfile + fsync + rename), never copy-then-delete
//! - Per-path advisory locking across threads and processes
//! - Bounds-checked slice access; resize invalidates stale regions
//! - No silent failures: every error rolls back and propagates
//!
//! # Example
//!
//! ```no_run
//! use filespan::{commit, EditorError};
//! use std::time::Duration;
//!
//! fn main() -> Result<(), EditorError> {
//!     // "AAABBBCCC" -> "AAAZZZZZCCC", atomically.
//!     commit::with_region("data.bin", Duration::from_secs(30), |editor| {
//!         editor.replace_range(3, 6, b"ZZZZZ")
//!     })
//! }
//! ```

pub mod access;
pub mod commit;
pub mod error;
pub mod gate;
pub mod index;
pub mod region;
pub mod seek;
pub mod stream;

// Re-exports
pub use access::{RandomAccess, Streaming};
pub use commit::{with_region, with_scratch, Transaction, TxState, BACKUP_SUFFIX};
pub use error::{EditorError, Phase};
pub use gate::{ConcurrencyGate, PathLock, LOCK_SUFFIX};
pub use index::LineIndex;
pub use region::{quick_find_replace, quick_write, AccessMode, RegionEditor};
pub use seek::SeekEditor;
pub use stream::{StreamEditor, DEFAULT_CHUNK_SIZE};
