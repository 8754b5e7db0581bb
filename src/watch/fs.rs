//! Filesystem notifications for the working tree.

use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::error::WatchError;

/// Keeps the underlying watcher alive; dropping it stops notifications.
pub struct RepoWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl RepoWatcher {
    /// Watch `root` recursively, sending one trigger per relevant event.
    ///
    /// Activity inside the repository's own `.git` directory is ignored so
    /// the engine's commits do not wake the loop again.
    pub fn start(root: &Path, triggers: UnboundedSender<()>) -> Result<Self, WatchError> {
        let root = root.canonicalize().map_err(|source| WatchError::Root {
            path: root.to_path_buf(),
            source,
        })?;
        let git_dir = root.join(".git");

        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            match event {
                Ok(event) if is_relevant(&event, &git_dir) => {
                    if triggers.send(()).is_err() {
                        debug!("watch event dropped because the loop has stopped");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Watch backend error: {}", e),
            }
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;
        debug!("Watching {}", root.display());

        Ok(Self {
            _watcher: watcher,
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn is_relevant(event: &Event, git_dir: &Path) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    event.paths.iter().any(|p| !p.starts_with(git_dir))
}
