//! Debounced filesystem observation of the sync directory.
//!
//! Raw notify events are collapsed per path by the debouncer so editor
//! write bursts settle into a single event. Writes performed by the daemon
//! itself are flagged ahead of time in [`SuppressedPaths`] and the matching
//! event is discarded by the coordinator, which is the only cross-component
//! coordination in the whole pipeline.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use crossbeam_channel::Receiver;
use notify::RecommendedWatcher;
use notify_debouncer_full::{
    new_debouncer,
    notify::{event::ModifyKind, EventKind, RecursiveMode},
    DebounceEventResult, Debouncer, RecommendedCache,
};

/// How long an expected-write flag stays valid. Long enough to cover the
/// debounce interval plus delivery, short enough that a real edit racing a
/// daemon write is only ever missed once.
const EXPECTED_WRITE_TTL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Added(PathBuf),
    Changed(PathBuf),
    Removed(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Added(path) | WatchEvent::Changed(path) | WatchEvent::Removed(path) => path,
        }
    }
}

/// Paths the daemon is about to touch itself. The writer flags each target
/// before the filesystem operation; the coordinator consumes the flag when
/// the echoed watcher event arrives.
#[derive(Debug, Clone, Default)]
pub struct SuppressedPaths {
    inner: Arc<Mutex<HashMap<PathBuf, Instant>>>,
}

impl SuppressedPaths {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flags `path` so its next watcher event is discarded.
    pub fn expect_write(&self, path: &Path) {
        let mut inner = self.inner.lock().unwrap();
        inner.insert(Self::key(path), Instant::now());
    }

    /// Returns true (and clears the flag) if `path` was recently written by
    /// the daemon itself. Expired flags are dropped as they are seen.
    pub fn consume(&self, path: &Path) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let key = Self::key(path);
        match inner.get(&key) {
            Some(flagged_at) if flagged_at.elapsed() <= EXPECTED_WRITE_TTL => {
                inner.remove(&key);
                true
            }
            Some(_) => {
                inner.remove(&key);
                false
            }
            None => false,
        }
    }

    /// Canonicalizes for map keying. The file itself may not exist yet (or
    /// anymore), in which case the parent is canonicalized and the file name
    /// re-joined, matching how the watcher reports the same path.
    fn key(path: &Path) -> PathBuf {
        if let Ok(canonical) = std::fs::canonicalize(path) {
            return canonical;
        }
        if let (Some(parent), Some(file_name)) = (path.parent(), path.file_name()) {
            if let Ok(canonical_parent) = std::fs::canonicalize(parent) {
                return canonical_parent.join(file_name);
            }
        }
        path.to_path_buf()
    }
}

/// Recursive watch over the sync directory. Events arrive on a crossbeam
/// channel so the change processor can select over them alongside editor
/// messages.
pub struct SyncWatcher {
    /// Held for its side effects; dropping it stops the watch.
    #[allow(unused)]
    debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    receiver: Receiver<WatchEvent>,
}

impl SyncWatcher {
    pub fn new(base_dir: &Path, debounce: Duration) -> Result<Self, notify::Error> {
        let (sender, receiver) = crossbeam_channel::unbounded();

        let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for debounced in events {
                        for event in translate(&debounced.event) {
                            if sender.send(event).is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        log::warn!("File watcher error: {}", error);
                    }
                }
            }
        })?;

        debouncer.watch(base_dir, RecursiveMode::Recursive)?;
        log::debug!(
            "Watching {} with a {}ms debounce",
            base_dir.display(),
            debounce.as_millis()
        );

        Ok(SyncWatcher {
            debouncer,
            receiver,
        })
    }

    pub fn event_receiver(&self) -> Receiver<WatchEvent> {
        self.receiver.clone()
    }
}

/// Maps one notify event to our event vocabulary. Renames carry both ends
/// in `paths` and are split into a removal and an addition.
fn translate(event: &notify::Event) -> Vec<WatchEvent> {
    match &event.kind {
        EventKind::Create(_) => event.paths.iter().cloned().map(WatchEvent::Added).collect(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .cloned()
            .map(WatchEvent::Removed)
            .collect(),
        EventKind::Modify(ModifyKind::Name(_)) => match event.paths.as_slice() {
            [from, to] => vec![
                WatchEvent::Removed(from.clone()),
                WatchEvent::Added(to.clone()),
            ],
            [only] if only.exists() => vec![WatchEvent::Added(only.clone())],
            [only] => vec![WatchEvent::Removed(only.clone())],
            _ => Vec::new(),
        },
        EventKind::Modify(_) => event
            .paths
            .iter()
            .cloned()
            .map(WatchEvent::Changed)
            .collect(),
        _ => Vec::new(),
    }
}
