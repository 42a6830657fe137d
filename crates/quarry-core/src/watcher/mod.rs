//! Debounced filesystem watching.
//!
//! Two debouncers over the same tree: code-file events settle after
//! `debounce_ms` and trigger a single-file re-index; dependency-manifest
//! events settle after the longer `dep_debounce_ms` and trigger a
//! project-wide doc refresh. Ignored directories are filtered before
//! events reach either channel.
//!
//! Concurrent re-index invocations for one project are serialised by a
//! pid-file lock in the index directory; locks from dead processes are
//! cleared.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use tokio::sync::mpsc;

use crate::config::WatcherConfig;
use crate::error::{QuarryError, QuarryResult};
use crate::types::Language;

/// Dependency manifests that trigger a project-wide doc refresh.
pub const DEPENDENCY_MANIFESTS: &[&str] = &[
    "package.json",
    "requirements.txt",
    "pyproject.toml",
    "go.mod",
    "Cargo.toml",
];

/// Directories never watched or ingested.
pub const IGNORED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "build",
    "__pycache__",
    ".next",
    ".nuxt",
    "coverage",
    ".cache",
    ".quarry",
];

/// Events the watcher emits after debouncing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A tracked code file changed; re-index just that file.
    FileChanged(PathBuf),
    /// A dependency manifest changed; refresh project docs.
    ManifestChanged(PathBuf),
}

/// Running watcher; dropping it stops both debouncers.
pub struct Watcher {
    _code: Debouncer<notify::RecommendedWatcher>,
    _deps: Debouncer<notify::RecommendedWatcher>,
}

impl Watcher {
    /// Watch `root` recursively, sending debounced events to `tx`.
    pub fn spawn(
        root: &Path,
        config: &WatcherConfig,
        extra_extensions: &[String],
        tx: mpsc::Sender<WatchEvent>,
    ) -> QuarryResult<Self> {
        let code_tx = tx.clone();
        let extra: Vec<String> = extra_extensions.to_vec();
        let mut code = new_debouncer(
            Duration::from_millis(config.debounce_ms),
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for event in events {
                        if is_ignored(&event.path) || !is_code_file(&event.path, &extra) {
                            continue;
                        }
                        if code_tx
                            .blocking_send(WatchEvent::FileChanged(event.path.clone()))
                            .is_err()
                        {
                            return;
                        }
                    }
                }
                Err(e) => tracing::warn!(error = ?e, "watch error on code channel"),
            },
        )
        .map_err(|e| QuarryError::Internal(format!("watcher init failed: {e}")))?;

        let dep_tx = tx;
        let mut deps = new_debouncer(
            Duration::from_millis(config.dep_debounce_ms),
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for event in events {
                        if is_ignored(&event.path) || !is_manifest(&event.path) {
                            continue;
                        }
                        if dep_tx
                            .blocking_send(WatchEvent::ManifestChanged(event.path.clone()))
                            .is_err()
                        {
                            return;
                        }
                    }
                }
                Err(e) => tracing::warn!(error = ?e, "watch error on manifest channel"),
            },
        )
        .map_err(|e| QuarryError::Internal(format!("watcher init failed: {e}")))?;

        code.watcher()
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| QuarryError::Internal(format!("watch failed: {e}")))?;
        deps.watcher()
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| QuarryError::Internal(format!("watch failed: {e}")))?;

        tracing::info!(root = %root.display(), "file watcher started");
        Ok(Self { _code: code, _deps: deps })
    }
}

/// Whether any path component is an ignored directory.
pub fn is_ignored(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .is_some_and(|s| IGNORED_DIRS.contains(&s))
    })
}

fn is_code_file(path: &Path, extra_extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    Language::from_extension(ext).is_some() || extra_extensions.iter().any(|e| e == ext)
}

fn is_manifest(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| DEPENDENCY_MANIFESTS.contains(&name))
}

// ---------------------------------------------------------------------------
// Re-index lock
// ---------------------------------------------------------------------------

const LOCK_FILE: &str = ".reindex-lock";
const TIMESTAMP_FILE: &str = ".reindex-timestamp";
const STALE_LOCK_AGE: Duration = Duration::from_secs(3600);

/// Pid-file lock serialising re-index runs for one project.
pub struct ReindexLock {
    path: PathBuf,
}

impl ReindexLock {
    /// Try to take the lock. Returns `None` when another live process
    /// holds it; stale locks (dead pid or very old file) are cleared.
    pub fn acquire(index_dir: &Path) -> QuarryResult<Option<Self>> {
        std::fs::create_dir_all(index_dir)?;
        let path = index_dir.join(LOCK_FILE);

        if path.exists() {
            if lock_is_stale(&path) {
                tracing::warn!(path = %path.display(), "clearing stale reindex lock");
                let _ = std::fs::remove_file(&path);
            } else {
                return Ok(None);
            }
        }

        std::fs::write(&path, std::process::id().to_string())?;
        Ok(Some(Self { path }))
    }

    /// Record the completion time of a re-index.
    pub fn touch_timestamp(index_dir: &Path) -> QuarryResult<()> {
        std::fs::write(
            index_dir.join(TIMESTAMP_FILE),
            crate::types::now_ms().to_string(),
        )?;
        Ok(())
    }
}

impl Drop for ReindexLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn lock_is_stale(path: &Path) -> bool {
    let pid: Option<u32> = std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok());

    if let Some(pid) = pid {
        if pid == std::process::id() {
            return true;
        }
        #[cfg(target_os = "linux")]
        {
            return !Path::new(&format!("/proc/{pid}")).exists();
        }
    }

    // No readable pid (or no /proc): fall back to file age.
    match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => modified
            .elapsed()
            .map(|age| age > STALE_LOCK_AGE)
            .unwrap_or(false),
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignored_directories_filtered() {
        assert!(is_ignored(Path::new("proj/node_modules/lib/index.js")));
        assert!(is_ignored(Path::new("proj/.git/HEAD")));
        assert!(is_ignored(Path::new("proj/.quarry/index.db")));
        assert!(!is_ignored(Path::new("proj/src/main.rs")));
    }

    #[test]
    fn code_and_manifest_classification() {
        assert!(is_code_file(Path::new("src/a.ts"), &[]));
        assert!(is_code_file(Path::new("src/a.rs"), &[]));
        assert!(!is_code_file(Path::new("README.md"), &[]));
        assert!(is_code_file(Path::new("conf.vue"), &["vue".to_string()]));

        assert!(is_manifest(Path::new("proj/package.json")));
        assert!(is_manifest(Path::new("proj/sub/Cargo.toml")));
        assert!(!is_manifest(Path::new("proj/tsconfig.json")));
    }

    #[test]
    fn lock_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let lock = ReindexLock::acquire(dir.path()).expect("acquire");
            assert!(lock.is_some());
            // Same-process pid counts as stale, so re-acquisition succeeds.
            let again = ReindexLock::acquire(dir.path()).expect("acquire again");
            assert!(again.is_some());
        }
        // Dropped locks leave no file behind.
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn stale_lock_is_cleared() {
        let dir = tempfile::tempdir().expect("tempdir");
        // A pid far beyond pid_max is never alive.
        std::fs::write(dir.path().join(LOCK_FILE), "999999999").expect("write");
        let lock = ReindexLock::acquire(dir.path()).expect("acquire");
        assert!(lock.is_some());
    }

    #[test]
    fn timestamp_written() {
        let dir = tempfile::tempdir().expect("tempdir");
        ReindexLock::touch_timestamp(dir.path()).expect("touch");
        let content =
            std::fs::read_to_string(dir.path().join(TIMESTAMP_FILE)).expect("read");
        assert!(content.parse::<i64>().expect("parse") > 0);
    }

    #[tokio::test]
    async fn watcher_emits_code_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, mut rx) = mpsc::channel(64);
        let config = WatcherConfig { debounce_ms: 50, dep_debounce_ms: 100 };
        let _watcher = Watcher::spawn(dir.path(), &config, &[], tx).expect("spawn");

        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::write(dir.path().join("a.rs"), "fn a() {}").expect("write");

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event within timeout")
            .expect("channel open");
        match event {
            WatchEvent::FileChanged(path) => {
                assert!(path.ends_with("a.rs"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn watcher_routes_manifests_separately() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, mut rx) = mpsc::channel(64);
        let config = WatcherConfig { debounce_ms: 50, dep_debounce_ms: 100 };
        let _watcher = Watcher::spawn(dir.path(), &config, &[], tx).expect("spawn");

        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::write(dir.path().join("package.json"), "{}").expect("write");

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event within timeout")
            .expect("channel open");
        assert!(matches!(event, WatchEvent::ManifestChanged(_)));
    }
}
