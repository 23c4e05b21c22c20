//! Atomic replacement of the live store file.
//!
//! The swap is a single rename so no observer ever sees a half-written
//! store. The platform may hold a fugitive lock on the live file, so the
//! rename is retried a bounded number of times with a fixed delay before
//! falling back to an explicit delete-then-move. The policy itself is a
//! pure function over the failed-attempt count so it can be tested
//! without filesystem timing.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

pub const MAX_RENAME_ATTEMPTS: u32 = 5;
pub const RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapAction {
    Retry,
    FallbackToCopy,
    GiveUp,
}

/// Decide what to do after `failed_attempts` failed renames.
pub fn next_action(failed_attempts: u32) -> SwapAction {
    if failed_attempts < MAX_RENAME_ATTEMPTS {
        SwapAction::Retry
    } else if failed_attempts == MAX_RENAME_ATTEMPTS {
        SwapAction::FallbackToCopy
    } else {
        SwapAction::GiveUp
    }
}

/// Rename `staged` over `live`, retrying per [`next_action`].
pub fn swap_into_place(staged: &Path, live: &Path) -> io::Result<()> {
    swap_with(staged, live, &|from, to| fs::rename(from, to), RETRY_DELAY)
}

/// Swap with an injectable rename operation, used by fault-injection
/// tests to simulate a locked live file.
pub fn swap_with(
    staged: &Path,
    live: &Path,
    rename: &dyn Fn(&Path, &Path) -> io::Result<()>,
    delay: Duration,
) -> io::Result<()> {
    let mut failed = 0u32;
    let mut last_err: Option<io::Error> = None;

    loop {
        match next_action(failed) {
            SwapAction::Retry => match rename(staged, live) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    last_err = Some(err);
                    failed += 1;
                    if next_action(failed) == SwapAction::Retry {
                        std::thread::sleep(delay);
                    }
                }
            },
            SwapAction::FallbackToCopy => {
                if let Err(err) = fs::remove_file(live) {
                    if err.kind() != io::ErrorKind::NotFound {
                        return Err(err);
                    }
                }
                match rename(staged, live) {
                    Ok(()) => return Ok(()),
                    Err(err) => {
                        last_err = Some(err);
                        failed += 1;
                    }
                }
            }
            SwapAction::GiveUp => {
                return Err(last_err.unwrap_or_else(|| {
                    io::Error::new(io::ErrorKind::Other, "swap failed with no recorded error")
                }))
            }
        }
    }
}

/// Remove stale `-wal`/`-shm` sidecar files next to a store so they never
/// block the swap or shadow the replacement's contents.
pub fn remove_sidecars(store: &Path) -> io::Result<()> {
    for suffix in ["-wal", "-shm"] {
        let mut os = store.as_os_str().to_os_string();
        os.push(suffix);
        match fs::remove_file(Path::new(&os)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
