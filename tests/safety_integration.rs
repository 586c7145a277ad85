//! End-to-end safety tests
//!
//! Exercises the full edit pipeline:
//! 1. Acquire the gate
//! 2. Snapshot the target
//! 3. Edit (in place or via scratch/stream)
//! 4. Atomic publish or rollback
//! 5. Verify sidecar cleanup

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use filespan::{
    commit::{self, backup_path_for, Transaction},
    gate::lock_path_for,
    EditorError, LineIndex, Phase, StreamEditor,
};
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(5);

fn setup(content: &[u8]) -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("target.txt");
    fs::write(&path, content).unwrap();
    (dir, path)
}

fn no_sidecars(path: &std::path::Path) -> bool {
    !backup_path_for(path).exists() && !lock_path_for(path).exists()
}

#[test]
fn replace_range_scenario_chain() {
    // The two concrete scenarios, run through the transaction layer.
    let (_dir, path) = setup(b"AAABBBCCC");

    commit::with_region(&path, TIMEOUT, |editor| editor.replace_range(3, 6, b"ZZZZZ")).unwrap();
    assert_eq!(fs::read(&path).unwrap(), b"AAAZZZZZCCC");

    commit::with_region(&path, TIMEOUT, |editor| editor.replace_range(0, 3, b"")).unwrap();
    assert_eq!(fs::read(&path).unwrap(), b"ZZZZZCCC");

    assert!(no_sidecars(&path));
}

#[test]
fn injected_failure_after_mutation_restores_pre_edit_bytes() {
    let original: Vec<u8> = (0..1000u32).flat_map(|i| i.to_le_bytes()).collect();
    let (_dir, path) = setup(&original);

    let res: Result<(), EditorError> = commit::with_region(&path, TIMEOUT, |editor| {
        // Mutate heavily, flush to disk, then fail: the on-disk state is
        // post-mutation when the rollback machinery kicks in.
        editor.replace_range(100, 900, b"corrupted beyond recognition")?;
        editor.flush()?;
        Err(EditorError::OutOfRange {
            offset: 0,
            len: 0,
            size: 0,
        })
    });

    assert!(matches!(
        res,
        Err(EditorError::Failed {
            phase: Phase::Edit,
            ..
        })
    ));
    assert_eq!(fs::read(&path).unwrap(), original);
    assert!(no_sidecars(&path));
}

#[test]
fn scratch_failure_never_touches_target() {
    let (_dir, path) = setup(b"pristine");

    let res: Result<(), EditorError> = commit::with_scratch(&path, TIMEOUT, |_src, out| {
        use std::io::Write;
        out.write_all(b"partial junk").unwrap();
        Err(EditorError::LengthMismatch { old: 1, new: 2 })
    });

    assert!(res.is_err());
    assert_eq!(fs::read(&path).unwrap(), b"pristine");
    assert!(no_sidecars(&path));
}

#[test]
fn stale_backup_fails_backup_phase_and_leaves_target() {
    let (_dir, path) = setup(b"untouchable");
    fs::write(backup_path_for(&path), b"leftover from a crash").unwrap();

    let res = commit::with_region(&path, TIMEOUT, |editor| editor.write_slice(0, b"X"));
    assert!(matches!(res, Err(EditorError::BackupFailed { .. })));
    assert_eq!(fs::read(&path).unwrap(), b"untouchable");
    // The stale backup is preserved for manual inspection.
    assert_eq!(
        fs::read(backup_path_for(&path)).unwrap(),
        b"leftover from a crash"
    );
    assert!(!lock_path_for(&path).exists());
}

#[test]
fn stream_rewrite_publishes_atomically() {
    let (_dir, path) = setup(b"keep 1\ndrop 2\nkeep 3\n");

    let tx = Transaction::begin(&path, TIMEOUT).unwrap();
    let staged = StreamEditor::new(&path)
        .process_lines(|line| line.starts_with("keep").then(|| line.to_string()))
        .unwrap();
    tx.publish(&staged).unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap(), "keep 1\nkeep 3\n");
    assert!(!staged.exists());
    assert!(no_sidecars(&path));
}

#[test]
fn concurrent_editors_serialize_and_lose_no_updates() {
    // Each thread reads a fixed-width counter, increments it, writes it
    // back. Serialization through the gate means no update is lost.
    let (_dir, path) = setup(b"00000000");
    static EDITING: AtomicUsize = AtomicUsize::new(0);
    const THREADS: usize = 8;

    std::thread::scope(|s| {
        for _ in 0..THREADS {
            let path = path.clone();
            s.spawn(move || {
                commit::with_region(&path, Duration::from_secs(30), |editor| {
                    assert_eq!(EDITING.fetch_add(1, Ordering::SeqCst), 0, "two editors in Editing state");
                    let current = editor.read_slice(0, 8)?;
                    let value: u64 = String::from_utf8_lossy(current).parse().unwrap();
                    let next = format!("{:08}", value + 1);
                    std::thread::sleep(Duration::from_millis(5));
                    editor.write_slice(0, next.as_bytes())?;
                    EDITING.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
            });
        }
    });

    assert_eq!(fs::read(&path).unwrap(), format!("{THREADS:08}").as_bytes());
    assert!(no_sidecars(&path));
}

#[test]
fn index_rebuild_after_transactional_edit() {
    let (_dir, path) = setup(b"alpha\nbeta\ngamma\n");
    let mut index = LineIndex::build(&path).unwrap();
    assert_eq!(index.get_line(1).unwrap(), b"beta");

    commit::with_region(&path, TIMEOUT, |editor| {
        let at = editor.find(b"beta\n").unwrap();
        editor.replace_range(at, at + 5, b"beta prime\nbeta second\n")
    })
    .unwrap();

    // The index is stale now; rebuild before trusting it.
    index.rebuild().unwrap();
    assert_eq!(index.line_count(), 4);
    assert_eq!(index.get_line(1).unwrap(), b"beta prime");
    assert_eq!(index.get_line(2).unwrap(), b"beta second");
}

#[test]
fn readers_between_edits_see_full_states_only() {
    let (_dir, path) = setup(b"state-a");

    // Writer commits b, then c; a reader taking the gate between edits
    // must observe a complete state, never a mixture.
    commit::with_scratch(&path, TIMEOUT, |_src, out| {
        use std::io::Write;
        out.write_all(b"state-b").map_err(|e| EditorError::io("out", e))
    })
    .unwrap();
    let mid = fs::read(&path).unwrap();
    assert!(mid == b"state-b");

    commit::with_region(&path, TIMEOUT, |editor| editor.write_slice(6, b"c")).unwrap();
    assert_eq!(fs::read(&path).unwrap(), b"state-c");
}

#[test]
fn second_caller_blocks_until_first_terminal() {
    use std::sync::atomic::AtomicBool;

    let (_dir, path) = setup(b"0");
    static FIRST_INSIDE: AtomicBool = AtomicBool::new(false);
    let start = std::time::Instant::now();

    std::thread::scope(|s| {
        let p1 = path.clone();
        s.spawn(move || {
            commit::with_region(&p1, TIMEOUT, |editor| {
                FIRST_INSIDE.store(true, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
                editor.write_slice(0, b"1")
            })
            .unwrap();
        });
        // Only start the second edit once the first holds the lock.
        while !FIRST_INSIDE.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }
        let p2 = path.clone();
        s.spawn(move || {
            commit::with_region(&p2, Duration::from_secs(30), |editor| {
                editor.write_slice(0, b"2")
            })
            .unwrap();
        });
    });

    // Second edit waited for the first to finish.
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert_eq!(fs::read(&path).unwrap(), b"2");
}

#[test]
fn lock_timeout_surfaces_without_retry() {
    let (_dir, path) = setup(b"held");
    let _tx = Transaction::begin(&path, TIMEOUT).unwrap();

    let waited = std::time::Instant::now();
    let res = commit::with_region(&path, Duration::from_millis(80), |editor| {
        editor.write_slice(0, b"X")
    });
    assert!(matches!(res, Err(EditorError::LockTimeout { .. })));
    // No built-in retry or backoff beyond the requested timeout.
    assert!(waited.elapsed() < Duration::from_secs(2));
}
