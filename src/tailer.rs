//! Per-file incremental tailing: watch a file, emit the bytes appended to it.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::TailerError;
use crate::event::FileEvent;

/// Bytes read per notification. A single read returning exactly this many
/// bytes means more data is waiting and will be picked up on the next event.
const BUFFER_SIZE: usize = 32 * 1024;

/// Handle to a running tailer task.
pub struct TailerHandle {
    pub ended: Arc<AtomicBool>,
    pub task: tokio::task::JoinHandle<()>,
}

/// Spawns a tailer for `path`, sending [`FileEvent`]s to `out` as they occur.
///
/// `rewatch_on_remove` controls whether the tailer reattaches after the file
/// disappears (classic servers do; dynamic instances are reaped by the
/// discoverer instead and should pass `false`).
pub fn spawn(
    path: PathBuf,
    out: mpsc::UnboundedSender<FileEvent>,
    rewatch_on_remove: bool,
    delay_before_rewatch: Duration,
) -> TailerHandle {
    let ended = Arc::new(AtomicBool::new(false));
    let ended_flag = ended.clone();

    let task = tokio::spawn(async move {
        // Only the very first attach starts the cursor at the file's current
        // size (tail from now); every reattach after a rename/remove starts
        // fresh at byte 0 since it is, from the tailer's perspective, a new file.
        let mut start_cursor = None;
        loop {
            match run_once(&path, &out, start_cursor).await {
                RunOutcome::Stopped => break,
                // Rotation (rename) and removal are treated identically: both
                // reattach only when the caller opted into it.
                RunOutcome::ShouldRewatch | RunOutcome::Removed => {
                    if !rewatch_on_remove {
                        break;
                    }
                    start_cursor = Some(0);
                    tokio::time::sleep(delay_before_rewatch).await;
                    continue;
                }
            }
        }
        ended_flag.store(true, Ordering::SeqCst);
    });

    TailerHandle { ended, task }
}

#[derive(Debug, PartialEq, Eq)]
enum RunOutcome {
    /// A fatal error occurred; give up on this file entirely.
    Stopped,
    /// File was renamed away (rotation).
    ShouldRewatch,
    /// File was removed.
    Removed,
}

async fn run_once(
    path: &Path,
    out: &mpsc::UnboundedSender<FileEvent>,
    start_cursor: Option<u64>,
) -> RunOutcome {
    let mut cursor = match start_cursor {
        Some(c) => c,
        None => match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(source) => {
                let err = TailerError::Stat {
                    path: path.to_path_buf(),
                    source,
                };
                warn!(error = %err, "tailer: initial stat failed");
                return RunOutcome::Stopped;
            }
        },
    };

    let (notify_tx, mut notify_rx) = mpsc::channel::<notify::Event>(100);
    let mut watcher = match notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
        if let Ok(event) = res {
            let _ = notify_tx.try_send(event);
        }
    }) {
        Ok(w) => w,
        Err(source) => {
            let err = TailerError::Watch {
                path: path.to_path_buf(),
                source,
            };
            warn!(error = %err, "tailer: failed to create watcher");
            return RunOutcome::Stopped;
        }
    };

    let watch_target = path.parent().unwrap_or_else(|| Path::new("."));
    if let Err(source) = watcher.watch(watch_target, RecursiveMode::NonRecursive) {
        let err = TailerError::Watch {
            path: path.to_path_buf(),
            source,
        };
        warn!(error = %err, "tailer: failed to install watcher");
        return RunOutcome::Stopped;
    }

    loop {
        let Some(event) = notify_rx.recv().await else {
            return RunOutcome::Stopped;
        };
        if !event.paths.iter().any(|p| p == path) {
            continue;
        }

        if let Some(outcome) = handle_event(&event, path, &mut cursor, out) {
            return outcome;
        }
    }
}

/// Decides what a single filesystem notification means for this tailer.
/// Returns `None` to keep watching; `Some(outcome)` to end this attach.
///
/// Rename must be checked before the catch-all write branch: `ModifyKind::Name`
/// is itself a `Modify(_)` variant, so a generic `Modify(_) | Create(_)` arm
/// ahead of it would swallow every rotation as a (failing) read attempt.
fn handle_event(
    event: &notify::Event,
    path: &Path,
    cursor: &mut u64,
    out: &mpsc::UnboundedSender<FileEvent>,
) -> Option<RunOutcome> {
    match event.kind {
        EventKind::Modify(notify::event::ModifyKind::Name(_)) => {
            debug!(path = %path.display(), "tailer: file renamed");
            Some(RunOutcome::ShouldRewatch)
        }
        EventKind::Modify(_) | EventKind::Create(_) => match read_new_bytes(path, cursor) {
            Ok(Some(bytes)) => {
                if bytes.is_empty() {
                    return None;
                }
                if out.send(FileEvent::Append(bytes)).is_err() {
                    return Some(RunOutcome::Stopped);
                }
                None
            }
            Ok(None) => {
                *cursor = 0;
                if out.send(FileEvent::Reset).is_err() {
                    return Some(RunOutcome::Stopped);
                }
                None
            }
            Err(err) => {
                debug!(error = %err, "tailer: read failed, ignoring");
                None
            }
        },
        EventKind::Remove(_) => {
            debug!(path = %path.display(), "tailer: file removed");
            Some(RunOutcome::Removed)
        }
        _ => None,
    }
}

/// Reads newly-appended bytes starting at `*cursor`, advancing it.
/// Returns `Ok(None)` when the file has shrunk below `*cursor` (a reset).
fn read_new_bytes(path: &Path, cursor: &mut u64) -> Result<Option<Vec<u8>>, TailerError> {
    let mut file = File::open(path).map_err(|source| TailerError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let size = file
        .metadata()
        .map_err(|source| TailerError::Stat {
            path: path.to_path_buf(),
            source,
        })?
        .len();

    if size < *cursor {
        return Ok(None);
    }

    file.seek(SeekFrom::Start(*cursor)).map_err(|source| TailerError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut buf = vec![0u8; BUFFER_SIZE];
    let n = file.read(&mut buf).map_err(|source| TailerError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    buf.truncate(n);
    *cursor += n as u64;

    if n >= BUFFER_SIZE {
        warn!(path = %path.display(), "tailer: read filled the buffer, more data pending");
    }

    Ok(Some(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn read_new_bytes_returns_appended_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, b"hello\n").unwrap();

        let mut cursor = 0u64;
        let first = read_new_bytes(&path, &mut cursor).unwrap().unwrap();
        assert_eq!(first, b"hello\n");
        assert_eq!(cursor, 6);

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"world\n").unwrap();

        let second = read_new_bytes(&path, &mut cursor).unwrap().unwrap();
        assert_eq!(second, b"world\n");
        assert_eq!(cursor, 12);
    }

    #[test]
    fn rename_event_triggers_rewatch_not_a_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, b"hello\n").unwrap();

        let (out, mut rx) = mpsc::unbounded_channel();
        let mut cursor = 6u64;
        let event = notify::Event::new(notify::EventKind::Modify(
            notify::event::ModifyKind::Name(notify::event::RenameMode::Both),
        ))
        .add_path(path.clone());

        let outcome = handle_event(&event, &path, &mut cursor, &out);
        assert_eq!(outcome, Some(RunOutcome::ShouldRewatch));
        // No read was attempted, so the cursor is untouched and nothing was sent.
        assert_eq!(cursor, 6);
        drop(out);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn read_new_bytes_detects_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut cursor = 10u64;
        std::fs::write(&path, b"short").unwrap();
        let result = read_new_bytes(&path, &mut cursor).unwrap();
        assert!(result.is_none());
    }
}
