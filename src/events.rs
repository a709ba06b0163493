//! Event pipeline: native notifications → debounce → engine channel
//!
//! The notifier is non-recursive, so the pipeline holds one
//! subscription per watched directory and the engine grows the set
//! when directories are created. Between the notifier callback and
//! the engine worker sits a bounded channel; when it is full the
//! event is dropped with a warning. Capture is content-hash
//! idempotent, so the next write or the next initial scan converges
//! to the same state after a drop.

use crate::error::Result;
use crate::types::{EventKind, FsEvent};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use notify::event::ModifyKind;
use notify::{EventKind as NotifyKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// Capacity of the channel between the notifier and the engine
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Window within which repeat (path, kind) events are suppressed
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

/// Map size that triggers bulk eviction
const DEBOUNCE_MAX_KEYS: usize = 1000;

/// Age past which entries are evicted during cleanup
const DEBOUNCE_EVICT_AGE: Duration = Duration::from_secs(5);

/// Suppresses duplicate events for the same (path, kind) pair
pub struct Debouncer {
    seen: Mutex<HashMap<(PathBuf, EventKind), Instant>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Debouncer {
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Admit an event unless an equal one was seen within the window
    pub fn should_process(&self, path: &Path, kind: EventKind) -> bool {
        self.admit_at(path, kind, Instant::now())
    }

    fn admit_at(&self, path: &Path, kind: EventKind, now: Instant) -> bool {
        let mut seen = self.seen.lock();
        let key = (path.to_path_buf(), kind);

        if let Some(last) = seen.get(&key) {
            if now.duration_since(*last) < DEBOUNCE_WINDOW {
                return false;
            }
        }
        seen.insert(key, now);

        // Bound the map: once it grows past the cap, drop stale keys
        // in bulk rather than tracking ages per admit.
        if seen.len() > DEBOUNCE_MAX_KEYS {
            let before = seen.len();
            seen.retain(|_, last| now.duration_since(*last) < DEBOUNCE_EVICT_AGE);
            debug!(evicted = before - seen.len(), "debounce map cleaned");
        }

        true
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.seen.lock().len()
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify a native notifier event into one of the five kinds
///
/// Unknown kinds (access notifications and the like) are not admitted.
fn classify(kind: &NotifyKind) -> Option<EventKind> {
    match kind {
        NotifyKind::Create(_) => Some(EventKind::Create),
        NotifyKind::Modify(ModifyKind::Name(_)) => Some(EventKind::Rename),
        NotifyKind::Modify(ModifyKind::Metadata(_)) => Some(EventKind::Chmod),
        NotifyKind::Modify(_) => Some(EventKind::Write),
        NotifyKind::Remove(_) => Some(EventKind::Remove),
        _ => None,
    }
}

/// Owns the native watcher and the bounded event channel
pub struct EventPipeline {
    watcher: Mutex<RecommendedWatcher>,
    tx: Sender<FsEvent>,
    rx: Receiver<FsEvent>,
}

impl EventPipeline {
    /// Create the pipeline with its debouncer and bounded channel
    pub fn new() -> Result<Self> {
        let (tx, rx) = bounded(EVENT_CHANNEL_CAPACITY);
        let debouncer = Arc::new(Debouncer::new());

        let callback_tx = tx.clone();
        let callback_debouncer = Arc::clone(&debouncer);

        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    let kind = match classify(&event.kind) {
                        Some(kind) => kind,
                        None => return,
                    };
                    for path in event.paths {
                        if !callback_debouncer.should_process(&path, kind) {
                            trace!(path = %path.display(), %kind, "event debounced");
                            continue;
                        }
                        match callback_tx.try_send(FsEvent { kind, path }) {
                            Ok(()) => {}
                            Err(TrySendError::Full(ev)) => {
                                warn!(path = %ev.path.display(), kind = %ev.kind,
                                      "event channel full, dropping event");
                            }
                            Err(TrySendError::Disconnected(_)) => {}
                        }
                    }
                }
                Err(e) => error!(error = %e, "file system watcher error"),
            }
        })?;

        Ok(EventPipeline {
            watcher: Mutex::new(watcher),
            tx,
            rx,
        })
    }

    /// Receiver end consumed by the engine worker
    pub fn receiver(&self) -> Receiver<FsEvent> {
        self.rx.clone()
    }

    /// Events currently buffered in the channel
    pub fn channel_len(&self) -> usize {
        self.rx.len()
    }

    /// Channel capacity
    pub fn channel_capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(EVENT_CHANNEL_CAPACITY)
    }

    /// Subscribe the notifier to a single directory
    pub fn subscribe(&self, dir: &Path) -> Result<()> {
        self.watcher
            .lock()
            .watch(dir, RecursiveMode::NonRecursive)?;
        debug!(dir = %dir.display(), "subscribed directory");
        Ok(())
    }

    /// Unsubscribe the notifier from a single directory
    pub fn unsubscribe(&self, dir: &Path) -> Result<()> {
        self.watcher.lock().unwatch(dir)?;
        debug!(dir = %dir.display(), "unsubscribed directory");
        Ok(())
    }

    /// Subscribe a batch of directories
    ///
    /// Errors on individual directories are logged and do not fail
    /// the batch. Returns how many subscriptions succeeded.
    pub fn add_project_dirs(&self, dirs: &[PathBuf]) -> usize {
        let mut added = 0;
        for dir in dirs {
            match self.subscribe(dir) {
                Ok(()) => added += 1,
                Err(e) => warn!(dir = %dir.display(), error = %e,
                                "failed to subscribe directory"),
            }
        }
        added
    }

    /// Unsubscribe a batch of directories, best-effort
    pub fn remove_project_dirs(&self, dirs: &[PathBuf]) -> usize {
        let mut removed = 0;
        for dir in dirs {
            match self.unsubscribe(dir) {
                Ok(()) => removed += 1,
                Err(e) => warn!(dir = %dir.display(), error = %e,
                                "failed to unsubscribe directory"),
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_debouncer_window() {
        let debouncer = Debouncer::new();
        let path = Path::new("/p/a.txt");
        let t0 = Instant::now();

        assert!(debouncer.admit_at(path, EventKind::Write, t0));
        // Same key inside the window is suppressed.
        assert!(!debouncer.admit_at(path, EventKind::Write, t0 + Duration::from_millis(50)));
        // A different kind for the same path is its own key.
        assert!(debouncer.admit_at(path, EventKind::Create, t0 + Duration::from_millis(50)));
        // Past the window the key is admitted again.
        assert!(debouncer.admit_at(path, EventKind::Write, t0 + Duration::from_millis(150)));
    }

    #[test]
    fn test_debouncer_eviction() {
        let debouncer = Debouncer::new();
        let t0 = Instant::now();

        for i in 0..DEBOUNCE_MAX_KEYS {
            let path = PathBuf::from(format!("/p/file{}.txt", i));
            assert!(debouncer.admit_at(&path, EventKind::Write, t0));
        }
        assert_eq!(debouncer.tracked_keys(), DEBOUNCE_MAX_KEYS);

        // The admit that pushes the map past the cap, arriving after
        // the eviction age, flushes the stale entries in bulk.
        let late = t0 + DEBOUNCE_EVICT_AGE + Duration::from_secs(1);
        assert!(debouncer.admit_at(Path::new("/p/overflow.txt"), EventKind::Write, late));
        assert_eq!(debouncer.tracked_keys(), 1);
    }

    #[test]
    fn test_classify() {
        use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind, RenameMode};

        assert_eq!(
            classify(&NotifyKind::Create(CreateKind::File)),
            Some(EventKind::Create)
        );
        assert_eq!(
            classify(&NotifyKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(EventKind::Write)
        );
        assert_eq!(
            classify(&NotifyKind::Modify(ModifyKind::Name(RenameMode::To))),
            Some(EventKind::Rename)
        );
        assert_eq!(
            classify(&NotifyKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions))),
            Some(EventKind::Chmod)
        );
        assert_eq!(
            classify(&NotifyKind::Remove(RemoveKind::File)),
            Some(EventKind::Remove)
        );
        assert_eq!(classify(&NotifyKind::Access(AccessKind::Read)), None);
    }

    #[test]
    fn test_pipeline_delivers_events() {
        let temp = TempDir::new().unwrap();
        let pipeline = EventPipeline::new().unwrap();
        pipeline.subscribe(temp.path()).unwrap();

        // Give the native watcher a moment to establish the watch.
        std::thread::sleep(Duration::from_millis(100));
        fs::write(temp.path().join("hello.txt"), "hi").unwrap();

        let rx = pipeline.receiver();
        let event = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("no event delivered");
        assert!(event.path.ends_with("hello.txt"));

        pipeline.unsubscribe(temp.path()).unwrap();
    }

    #[test]
    fn test_add_project_dirs_continues_on_error() {
        let temp = TempDir::new().unwrap();
        let pipeline = EventPipeline::new().unwrap();

        let dirs = vec![
            temp.path().to_path_buf(),
            PathBuf::from("/nonexistent/for/sure"),
        ];
        assert_eq!(pipeline.add_project_dirs(&dirs), 1);
    }
}
