use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::WatchError;

#[derive(Debug, Default)]
struct StaleFlag {
    stale: AtomicBool,
    events: AtomicU64,
}

/// Watches a scanned root and flags the snapshot stale on any change below it.
/// The host polls [`SnapshotWatcher::take_stale`] and rescans when it fires.
pub struct SnapshotWatcher {
    root: PathBuf,
    flag: Arc<StaleFlag>,
    _watcher: RecommendedWatcher,
}

impl SnapshotWatcher {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, WatchError> {
        let root = root.as_ref().to_path_buf();
        let flag = Arc::new(StaleFlag::default());
        let handler_flag = Arc::clone(&flag);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Access(_)) {
                    return;
                }
                handler_flag.events.fetch_add(1, Ordering::Relaxed);
                if !handler_flag.stale.swap(true, Ordering::AcqRel) {
                    tracing::info!(paths = ?event.paths, "snapshot is stale");
                }
            }
            Err(err) => tracing::warn!(%err, "watch error"),
        })
        .map_err(WatchError::Init)?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::Watch {
                path: root.display().to_string(),
                source,
            })?;
        tracing::debug!(root = %root.display(), "watching snapshot root");

        Ok(Self {
            root,
            flag,
            _watcher: watcher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_stale(&self) -> bool {
        self.flag.stale.load(Ordering::Acquire)
    }

    /// Read and clear the stale flag.
    pub fn take_stale(&self) -> bool {
        self.flag.stale.swap(false, Ordering::AcqRel)
    }

    /// Change events seen since the watcher started.
    pub fn event_count(&self) -> u64 {
        self.flag.events.load(Ordering::Relaxed)
    }
}
