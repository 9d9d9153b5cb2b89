//! Reload-on-save for the shader and prompt files.

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use tracing::{error, info, warn};

/// Watches one file and yields its contents whenever they change.
///
/// The parent directory is watched rather than the file, so editors that save
/// by renaming a temporary file over the original are still picked up.
pub struct FileWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    last_contents: Option<String>,
}

impl FileWatcher {
    /// Start watching `path`. Returns `None` (after logging) if the watch cannot be set up.
    pub fn new(path: impl AsRef<Path>) -> Option<Self> {
        let path = match fs::canonicalize(path.as_ref()) {
            Ok(path) => path,
            Err(e) => {
                warn!("Cannot watch {:?}: {}", path.as_ref(), e);
                return None;
            }
        };
        let dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        let (tx, rx) = channel();

        match RecommendedWatcher::new(tx, notify::Config::default()) {
            Ok(mut watcher) => {
                if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
                    warn!("Failed to watch {:?}: {}", path, e);
                    return None;
                }
                info!("Watching {:?} for changes", path);
                let last_contents = fs::read_to_string(&path).ok();
                Some(Self {
                    path,
                    _watcher: watcher,
                    rx,
                    last_contents,
                })
            }
            Err(e) => {
                warn!("Failed to create file watcher: {}", e);
                None
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The contents as of the last reported change (or startup).
    pub fn contents(&self) -> Option<&str> {
        self.last_contents.as_deref()
    }

    /// Drain pending events. Returns the new contents if the file changed since the last call.
    pub fn check_for_changes(&mut self) -> Option<String> {
        let mut touched = false;
        while let Ok(res) = self.rx.try_recv() {
            match res {
                Ok(event) => {
                    let relevant = matches!(
                        event.kind,
                        notify::EventKind::Modify(_) | notify::EventKind::Create(_)
                    );
                    if relevant && event.paths.iter().any(|p| p.file_name() == self.path.file_name()) {
                        touched = true;
                    }
                }
                Err(e) => warn!("Watch error on {:?}: {}", self.path, e),
            }
        }

        if !touched {
            return None;
        }

        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                if self.last_contents.as_deref() == Some(contents.as_str()) {
                    return None;
                }
                info!("{:?} changed", self.path);
                self.last_contents = Some(contents.clone());
                Some(contents)
            }
            Err(e) => {
                error!("Failed to read {:?}: {}", self.path, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_for_change(watcher: &mut FileWatcher) -> Option<String> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(contents) = watcher.check_for_changes() {
                return Some(contents);
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        None
    }

    #[test]
    fn test_reports_new_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("effect.frag");
        fs::write(&path, "void main() {}").unwrap();

        let mut watcher = FileWatcher::new(&path).unwrap();
        assert_eq!(watcher.contents(), Some("void main() {}"));
        assert_eq!(watcher.check_for_changes(), None);

        fs::write(&path, "void main() { /* v2 */ }").unwrap();
        assert_eq!(wait_for_change(&mut watcher).as_deref(), Some("void main() { /* v2 */ }"));
        assert_eq!(watcher.contents(), Some("void main() { /* v2 */ }"));
    }

    #[test]
    fn test_ignores_sibling_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt.txt");
        fs::write(&path, "waves").unwrap();

        let mut watcher = FileWatcher::new(&path).unwrap();
        fs::write(dir.path().join("other.txt"), "noise").unwrap();
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(watcher.check_for_changes(), None);
    }

    #[test]
    fn test_missing_file_is_not_watched() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileWatcher::new(dir.path().join("absent.frag")).is_none());
    }
}
