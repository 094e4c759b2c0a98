//! Recursive filesystem watcher over the configured root, emitting
//! [`FileEvent`]s for `.jsonl` transcript files.

use crate::transcript::{FileEvent, FileEventKind};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("failed to start filesystem watcher: {0}")]
    Start(#[from] notify::Error),
    #[error("watch root does not exist: {0}")]
    MissingRoot(PathBuf),
}

/// Current health of the filesystem watcher component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentStatus {
    Ok,
    Degraded,
    Unavailable,
}

pub struct FileWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
    status: Arc<std::sync::atomic::AtomicU8>,
}

const STATUS_OK: u8 = 0;
const STATUS_DEGRADED: u8 = 1;
const STATUS_UNAVAILABLE: u8 = 2;

impl FileWatcher {
    /// Starts watching `root` recursively, creating it if missing, and
    /// returns the watcher handle plus a channel of [`FileEvent`]s.
    pub async fn start(root: PathBuf) -> Result<(Self, mpsc::Receiver<FileEvent>), WatcherError> {
        if !root.exists() {
            tokio::fs::create_dir_all(&root)
                .await
                .map_err(|_| WatcherError::MissingRoot(root.clone()))?;
        }

        let (tx, rx) = mpsc::channel(256);
        let status = Arc::new(std::sync::atomic::AtomicU8::new(STATUS_OK));
        let status_for_cb = status.clone();
        let pending_renames: Arc<Mutex<HashMap<usize, PathBuf>>> = Arc::new(Mutex::new(HashMap::new()));

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    status_for_cb.store(STATUS_OK, std::sync::atomic::Ordering::Relaxed);
                    for file_event in to_file_events(&event, &pending_renames) {
                        if tx.blocking_send(file_event).is_err() {
                            debug!("file watcher receiver dropped, discarding event");
                        }
                    }
                }
                Err(err) => {
                    warn!(%err, "filesystem watch error");
                    status_for_cb.store(STATUS_DEGRADED, std::sync::atomic::Ordering::Relaxed);
                }
            }
        })?;

        watcher.watch(&root, RecursiveMode::Recursive)?;
        info!(root = %root.display(), "filesystem watcher started");

        Ok((
            Self {
                root,
                _watcher: watcher,
                status,
            },
            rx,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn status(&self) -> ComponentStatus {
        match self.status.load(std::sync::atomic::Ordering::Relaxed) {
            STATUS_OK => ComponentStatus::Ok,
            STATUS_DEGRADED => ComponentStatus::Degraded,
            _ => ComponentStatus::Unavailable,
        }
    }

    pub fn mark_unavailable(&self) {
        self.status
            .store(STATUS_UNAVAILABLE, std::sync::atomic::Ordering::Relaxed);
    }
}

fn is_transcript_path(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("jsonl")
}

fn to_file_events(
    event: &Event,
    pending_renames: &Mutex<HashMap<usize, PathBuf>>,
) -> Vec<FileEvent> {
    let now = chrono::Utc::now();
    match &event.kind {
        EventKind::Create(_) => event
            .paths
            .iter()
            .filter(|p| is_transcript_path(p))
            .filter_map(|p| FileEvent::new(p.clone(), FileEventKind::Created, None, now).ok())
            .collect(),
        EventKind::Modify(ModifyKind::Name(rename_mode)) => {
            to_rename_events(*rename_mode, event, pending_renames, now)
        }
        EventKind::Modify(_) => event
            .paths
            .iter()
            .filter(|p| is_transcript_path(p))
            .filter_map(|p| FileEvent::new(p.clone(), FileEventKind::Modified, None, now).ok())
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .filter(|p| is_transcript_path(p))
            .filter_map(|p| FileEvent::new(p.clone(), FileEventKind::Deleted, None, now).ok())
            .collect(),
        EventKind::Other | EventKind::Any | EventKind::Access(_) => Vec::new(),
    }
}

/// Turns a rename/move notification into a [`FileEventKind::Moved`] event.
///
/// `notify` reports renames two ways depending on platform: a single `Both`
/// event carrying `[from, to]` in `event.paths`, or a separate `From` event
/// followed later by a `To` event, paired via `event.attrs.tracker()`. Only
/// the source or destination side being a watched `.jsonl` path is enough to
/// emit a moved event; if neither side is a transcript path, nothing is
/// emitted.
fn to_rename_events(
    mode: RenameMode,
    event: &Event,
    pending_renames: &Mutex<HashMap<usize, PathBuf>>,
    now: chrono::DateTime<chrono::Utc>,
) -> Vec<FileEvent> {
    match mode {
        RenameMode::Both => {
            let (Some(from), Some(to)) = (event.paths.first(), event.paths.get(1)) else {
                return Vec::new();
            };
            if !is_transcript_path(from) && !is_transcript_path(to) {
                return Vec::new();
            }
            FileEvent::new(from.clone(), FileEventKind::Moved, Some(to.clone()), now)
                .ok()
                .into_iter()
                .collect()
        }
        RenameMode::From => {
            if let (Some(tracker), Some(from)) = (event.attrs.tracker(), event.paths.first()) {
                pending_renames.lock().unwrap().insert(tracker, from.clone());
            }
            Vec::new()
        }
        RenameMode::To => {
            let Some(to) = event.paths.first() else {
                return Vec::new();
            };
            let from = event
                .attrs
                .tracker()
                .and_then(|tracker| pending_renames.lock().unwrap().remove(&tracker));
            match from {
                Some(from) if is_transcript_path(&from) || is_transcript_path(to) => {
                    FileEvent::new(from, FileEventKind::Moved, Some(to.clone()), now)
                        .ok()
                        .into_iter()
                        .collect()
                }
                _ => Vec::new(),
            }
        }
        RenameMode::Any | RenameMode::Other => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_and_creates_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("projects");
        let (watcher, _rx) = FileWatcher::start(root.clone()).await.unwrap();
        assert!(root.exists());
        assert_eq!(watcher.status(), ComponentStatus::Ok);
        assert_eq!(watcher.root(), root.as_path());
    }

    #[test]
    fn ignores_non_jsonl_paths() {
        assert!(!is_transcript_path(Path::new("/a/b.txt")));
        assert!(is_transcript_path(Path::new("/a/b.jsonl")));
    }

    #[test]
    fn rename_both_produces_moved_event() {
        let mut event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)));
        event.paths = vec![
            PathBuf::from("/a/old.jsonl"),
            PathBuf::from("/a/new.jsonl"),
        ];
        let pending = Mutex::new(HashMap::new());
        let events = to_file_events(&event, &pending);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), FileEventKind::Moved);
        assert_eq!(events[0].path(), &PathBuf::from("/a/old.jsonl"));
        assert_eq!(events[0].dest_path(), Some(&PathBuf::from("/a/new.jsonl")));
    }

    #[test]
    fn rename_from_to_pair_produces_moved_event() {
        let pending = Mutex::new(HashMap::new());

        let mut from_event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .set_tracker(7);
        from_event.paths = vec![PathBuf::from("/a/old.jsonl")];
        assert!(to_file_events(&from_event, &pending).is_empty());

        let mut to_event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .set_tracker(7);
        to_event.paths = vec![PathBuf::from("/a/new.jsonl")];
        let events = to_file_events(&to_event, &pending);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), FileEventKind::Moved);
        assert_eq!(events[0].path(), &PathBuf::from("/a/old.jsonl"));
        assert_eq!(events[0].dest_path(), Some(&PathBuf::from("/a/new.jsonl")));
    }

    #[test]
    fn rename_ignored_when_neither_side_is_transcript_path() {
        let mut event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)));
        event.paths = vec![PathBuf::from("/a/old.txt"), PathBuf::from("/a/new.txt")];
        let pending = Mutex::new(HashMap::new());
        assert!(to_file_events(&event, &pending).is_empty());
    }
}
