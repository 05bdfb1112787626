//! File access, cancellation and rollback for patch batches

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, warn};

use super::PatchError;

/// Where patched sources are read from and written to.
///
/// Paths are project-relative.
pub trait SourceFs: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<String>;

    fn write(&self, path: &Path, content: &str) -> io::Result<()>;
}

/// The real filesystem under a project root.
#[derive(Debug, Clone)]
pub struct DiskFs {
    root: PathBuf,
}

impl DiskFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DiskFs { root: root.into() }
    }
}

impl SourceFs for DiskFs {
    fn read(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(self.root.join(path))
    }

    /// Writes through a sibling temp file so a crash never leaves a torn source file.
    fn write(&self, path: &Path, content: &str) -> io::Result<()> {
        let target = self.root.join(path);
        let mut tmp = target.clone().into_os_string();
        tmp.push(".codelens-tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &target)
    }
}

/// Cooperative cancellation flag shared with the caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// New content for one file, with the snapshot taken before any write.
#[derive(Debug, Clone)]
pub struct FilePlan {
    pub path: PathBuf,
    pub original: String,
    pub updated: String,
    /// Lowest batch index among the edits to this file.
    pub first_index: usize,
}

/// Write every plan, restoring all touched files if a write fails or the
/// batch is cancelled part-way.
pub fn write_all(fs: &dyn SourceFs, plans: &[FilePlan], cancel: &CancelToken) -> Result<(), PatchError> {
    for (written, plan) in plans.iter().enumerate() {
        if cancel.is_cancelled() {
            let rolled_back = if written > 0 {
                warn!("Batch cancelled after {} write(s), rolling back", written);
                rollback(fs, &plans[..written])
            } else {
                false
            };
            return Err(PatchError::Cancelled { rolled_back });
        }
        if let Err(source) = fs.write(&plan.path, &plan.updated) {
            error!("Write to {:?} failed: {}; rolling back {} file(s)", plan.path, source, written);
            let rolled_back = rollback(fs, &plans[..written]);
            return Err(PatchError::Io { index: plan.first_index, path: plan.path.clone(), source, rolled_back });
        }
        debug!("Wrote {:?}", plan.path);
    }
    Ok(())
}

/// Put snapshots back, newest write first. Returns whether every restore succeeded.
pub fn rollback(fs: &dyn SourceFs, plans: &[FilePlan]) -> bool {
    let mut ok = true;
    for plan in plans.iter().rev() {
        if let Err(e) = fs.write(&plan.path, &plan.original) {
            error!("Rollback of {:?} failed: {}", plan.path, e);
            ok = false;
        }
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory files; writes to `fail_on` error once.
    #[derive(Default)]
    struct MemFs {
        files: Mutex<HashMap<PathBuf, String>>,
        fail_on: Option<PathBuf>,
        failed: AtomicBool,
    }

    impl SourceFs for MemFs {
        fn read(&self, path: &Path) -> io::Result<String> {
            self.files.lock().unwrap().get(path).cloned().ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }

        fn write(&self, path: &Path, content: &str) -> io::Result<()> {
            if self.fail_on.as_deref() == Some(path) && !self.failed.swap(true, Ordering::SeqCst) {
                return Err(io::Error::other("disk full"));
            }
            self.files.lock().unwrap().insert(path.to_path_buf(), content.to_string());
            Ok(())
        }
    }

    /// Cancels the batch from inside its first write.
    struct CancellingFs {
        inner: MemFs,
        cancel: CancelToken,
        /// Refuse writes once cancelled, so the rollback fails too.
        refuse_after_cancel: bool,
    }

    impl SourceFs for CancellingFs {
        fn read(&self, path: &Path) -> io::Result<String> {
            self.inner.read(path)
        }

        fn write(&self, path: &Path, content: &str) -> io::Result<()> {
            if self.refuse_after_cancel && self.cancel.is_cancelled() {
                return Err(io::Error::other("read-only file"));
            }
            self.inner.write(path, content)?;
            self.cancel.cancel();
            Ok(())
        }
    }

    fn cancelling_fs(refuse_after_cancel: bool) -> CancellingFs {
        let inner = MemFs::default();
        for p in ["a.py", "b.py"] {
            inner.files.lock().unwrap().insert(p.into(), format!("old {}", p));
        }
        CancellingFs { inner, cancel: CancelToken::new(), refuse_after_cancel }
    }

    fn plan(path: &str, index: usize) -> FilePlan {
        FilePlan { path: path.into(), original: format!("old {}", path), updated: format!("new {}", path), first_index: index }
    }

    #[test]
    fn test_failed_write_restores_every_file() {
        let fs = MemFs { fail_on: Some("b.py".into()), ..Default::default() };
        for p in ["a.py", "b.py"] {
            fs.files.lock().unwrap().insert(p.into(), format!("old {}", p));
        }
        let err = write_all(&fs, &[plan("a.py", 0), plan("b.py", 1)], &CancelToken::new()).unwrap_err();
        assert!(matches!(err, PatchError::Io { index: 1, rolled_back: true, .. }));
        assert_eq!(fs.read(Path::new("a.py")).unwrap(), "old a.py");
        assert_eq!(fs.read(Path::new("b.py")).unwrap(), "old b.py");
    }

    #[test]
    fn test_cancel_before_first_write_touches_nothing() {
        let fs = MemFs::default();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = write_all(&fs, &[plan("a.py", 0)], &cancel).unwrap_err();
        assert!(matches!(err, PatchError::Cancelled { rolled_back: false }));
        assert!(fs.files.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cancel_between_writes_restores_written_files() {
        let fs = cancelling_fs(false);
        let err = write_all(&fs, &[plan("a.py", 0), plan("b.py", 1)], &fs.cancel).unwrap_err();
        assert!(matches!(err, PatchError::Cancelled { rolled_back: true }));
        assert_eq!(fs.read(Path::new("a.py")).unwrap(), "old a.py");
        assert_eq!(fs.read(Path::new("b.py")).unwrap(), "old b.py");
    }

    #[test]
    fn test_cancel_reports_failed_restore() {
        let fs = cancelling_fs(true);
        let err = write_all(&fs, &[plan("a.py", 0), plan("b.py", 1)], &fs.cancel).unwrap_err();
        assert!(matches!(err, PatchError::Cancelled { rolled_back: false }));
        assert_eq!(fs.read(Path::new("a.py")).unwrap(), "new a.py");
        assert_eq!(fs.read(Path::new("b.py")).unwrap(), "old b.py");
    }

    #[test]
    fn test_disk_fs_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let fs = DiskFs::new(dir.path());
        std::fs::write(dir.path().join("m.py"), "x = 1\n").unwrap();
        fs.write(Path::new("m.py"), "x = 2\n").unwrap();
        assert_eq!(fs.read(Path::new("m.py")).unwrap(), "x = 2\n");
        assert!(!dir.path().join("m.py.codelens-tmp").exists());
    }
}
