//! Filesystem watching for the dev loop.

use crate::DevError;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error};

const IGNORED_DIRS: &[&str] = &["node_modules", ".git"];

/// Decides which changed paths reach the dev loop.
#[derive(Debug, Clone, Default)]
pub struct WatchFilter {
    /// Output and cache directories; the build writes there itself.
    ignored: Vec<PathBuf>,
}

impl WatchFilter {
    #[must_use]
    pub fn new(ignored: Vec<PathBuf>) -> Self {
        Self { ignored }
    }

    #[must_use]
    pub fn is_ignored(&self, path: &Path) -> bool {
        path.components()
            .any(|c| IGNORED_DIRS.iter().any(|d| c.as_os_str() == *d))
            || self.ignored.iter().any(|dir| path.starts_with(dir))
    }

    /// Relevant paths of `event`; access events carry none.
    #[must_use]
    pub fn changed_paths(&self, event: &Event) -> Vec<PathBuf> {
        if event.kind.is_access() || event.kind.is_other() {
            return Vec::new();
        }
        event
            .paths
            .iter()
            .filter(|p| !self.is_ignored(p))
            .cloned()
            .collect()
    }
}

/// Keeps the watcher alive; dropping it stops watching.
#[derive(Debug)]
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
}

/// Watch `root` recursively and forward changed paths to `changes`.
///
/// The notify callback runs on the watcher's own thread, so it uses
/// `blocking_send`; once the dev loop is gone events are dropped.
pub fn watch(
    root: &Path,
    filter: WatchFilter,
    changes: mpsc::Sender<Vec<PathBuf>>,
) -> Result<FileWatcher, DevError> {
    let mut watcher =
        notify::recommended_watcher(move |event: notify::Result<Event>| match event {
            Ok(event) => {
                let paths = filter.changed_paths(&event);
                if paths.is_empty() {
                    return;
                }
                debug!(count = paths.len(), "files changed");
                if changes.blocking_send(paths).is_err() {
                    debug!("dev loop stopped, dropping file events");
                }
            }
            Err(e) => error!(code = crate::codes::PACKLINE_DEV_WATCH_FAILED, "watch error: {e}"),
        })?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    debug!(root = %root.display(), "watching");
    Ok(FileWatcher { _watcher: watcher })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, EventKind, ModifyKind};

    fn filter() -> WatchFilter {
        WatchFilter::new(vec![PathBuf::from("/app/dist"), PathBuf::from("/app/.packline/cache")])
    }

    #[test]
    fn test_ignores_vendor_vcs_and_generated_dirs() {
        let filter = filter();
        assert!(filter.is_ignored(Path::new("/app/node_modules/react/index.js")));
        assert!(filter.is_ignored(Path::new("/app/.git/HEAD")));
        assert!(filter.is_ignored(Path::new("/app/dist/main.js")));
        assert!(filter.is_ignored(Path::new("/app/.packline/cache/manifest.json")));
        assert!(!filter.is_ignored(Path::new("/app/src/index.js")));
        assert!(!filter.is_ignored(Path::new("/app/distance.js")));
    }

    #[test]
    fn test_changed_paths_skip_access_events() {
        let filter = filter();
        let modify = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/app/src/a.js"))
            .add_path(PathBuf::from("/app/dist/a.js"));
        assert_eq!(filter.changed_paths(&modify), vec![PathBuf::from("/app/src/a.js")]);

        let create = Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/app/src/b.js"));
        assert_eq!(filter.changed_paths(&create).len(), 1);

        let access = Event::new(EventKind::Access(AccessKind::Any)).add_path(PathBuf::from("/app/src/a.js"));
        assert!(filter.changed_paths(&access).is_empty());
    }
}
