//! Filesystem watcher implementation

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use codelens_core::config::SKIP_DIRS;
use codelens_engine::ProjectContext;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use crate::debounce::Debouncer;

/// Events emitted by the file watcher. Paths are project-relative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Created(p) | WatchEvent::Modified(p) | WatchEvent::Removed(p) => p,
        }
    }
}

/// Counters for one watch session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WatchStats {
    pub events: usize,
    pub resyncs: usize,
    /// Full refreshes forced by dropped events.
    pub refreshes: usize,
    pub files: usize,
    pub failures: usize,
}

/// File system watcher feeding a bounded channel.
///
/// When the channel is full, events are dropped and the overflow flag is
/// set; the consumer then refreshes the whole tree instead.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    event_rx: mpsc::Receiver<WatchEvent>,
    overflowed: Arc<AtomicBool>,
    root_path: PathBuf,
}

impl FileWatcher {
    pub fn new(root_path: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        let root_path = root_path.as_ref();
        let root_path = root_path.canonicalize().unwrap_or_else(|_| root_path.to_path_buf());
        let (event_tx, event_rx) = mpsc::channel(capacity.max(1));
        let overflowed = Arc::new(AtomicBool::new(false));

        let root = root_path.clone();
        let flag = Arc::clone(&overflowed);
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                debug!("File system event: {:?}", event);
                for change in convert_event(&root, event) {
                    match event_tx.try_send(change) {
                        Ok(()) | Err(TrySendError::Closed(_)) => {}
                        Err(TrySendError::Full(_)) => {
                            if !flag.swap(true, Ordering::SeqCst) {
                                warn!("Watch channel full, dropping events until the next refresh");
                            }
                        }
                    }
                }
            }
            Err(e) => error!("File system watch error: {}", e),
        })?;

        Ok(FileWatcher { watcher, event_rx, overflowed, root_path })
    }

    pub fn root(&self) -> &Path {
        &self.root_path
    }

    /// Watch the root directory recursively
    pub fn watch(&mut self) -> Result<()> {
        info!("Watching directory: {:?}", self.root_path);
        self.watcher.watch(&self.root_path, RecursiveMode::Recursive)?;
        Ok(())
    }

    pub fn event_receiver(&mut self) -> &mut mpsc::Receiver<WatchEvent> {
        &mut self.event_rx
    }

    pub fn overflow_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.overflowed)
    }
}

/// Watches a project and keeps its graph in sync with the files on disk.
pub struct WatcherService {
    ctx: Arc<ProjectContext>,
    watcher: FileWatcher,
    debounce: Duration,
}

impl WatcherService {
    pub fn new(ctx: Arc<ProjectContext>) -> Result<Self> {
        let config = &ctx.config().watch;
        let watcher = FileWatcher::new(ctx.root(), config.channel_capacity)?;
        let debounce = Duration::from_millis(config.debounce_ms);
        Ok(WatcherService { ctx, watcher, debounce })
    }

    /// Watch until `shutdown` resolves. Pending changes are flushed before returning.
    pub async fn run<F>(mut self, shutdown: F) -> Result<WatchStats>
    where
        F: Future<Output = ()>,
    {
        self.watcher.watch()?;
        let overflowed = self.watcher.overflow_flag();
        let FileWatcher { watcher: _watcher, event_rx, .. } = self.watcher;
        Ok(process_events(&self.ctx, event_rx, overflowed, self.debounce, shutdown).await)
    }
}

/// Debounce `events` and resync each quiet batch of paths.
///
/// Returns when `shutdown` resolves or the channel closes.
pub async fn process_events<F>(
    ctx: &ProjectContext,
    mut events: mpsc::Receiver<WatchEvent>,
    overflowed: Arc<AtomicBool>,
    debounce: Duration,
    shutdown: F,
) -> WatchStats
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut debouncer = Debouncer::new(debounce);
    let mut stats = WatchStats::default();

    loop {
        let deadline = debouncer.next_deadline();
        tokio::select! {
            _ = &mut shutdown => {
                info!("Watcher shutting down");
                break;
            }
            event = events.recv() => match event {
                Some(event) => {
                    debug!("Processing watch event: {:?}", event);
                    stats.events += 1;
                    debouncer.push(event.path().to_path_buf(), Instant::now());
                }
                None => {
                    debug!("Watch channel closed");
                    break;
                }
            },
            _ = sleep_until(deadline), if deadline.is_some() => {
                let ready = debouncer.take_ready(Instant::now());
                flush(ctx, ready, &overflowed, &mut stats).await;
            }
        }
    }

    let remaining = debouncer.take_all();
    flush(ctx, remaining, &overflowed, &mut stats).await;
    stats
}

async fn sleep_until(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
    }
}

async fn flush(ctx: &ProjectContext, paths: Vec<PathBuf>, overflowed: &AtomicBool, stats: &mut WatchStats) {
    if overflowed.swap(false, Ordering::SeqCst) {
        info!("Events were dropped, refreshing the whole tree");
        match ctx.refresh().await {
            Ok(report) => {
                stats.refreshes += 1;
                stats.files += report.files.len();
                persist(ctx);
            }
            Err(e) => {
                error!("Refresh failed: {}", e);
                stats.failures += 1;
            }
        }
        return;
    }

    let paths: Vec<PathBuf> = paths.into_iter().filter(|p| ctx.coordinator().is_indexable(p)).collect();
    if paths.is_empty() {
        return;
    }
    match ctx.resync_files(&paths).await {
        Ok(report) => {
            info!(
                "Resynced {} file(s): {} added, {} removed, {} modified units (version {})",
                report.files.len(),
                report.units_added,
                report.units_removed,
                report.units_modified,
                report.sequence
            );
            stats.resyncs += 1;
            stats.files += report.files.len();
            persist(ctx);
        }
        Err(e) => {
            error!("Resync of {:?} failed: {}", paths, e);
            stats.failures += 1;
        }
    }
}

fn persist(ctx: &ProjectContext) {
    if let Err(e) = ctx.save() {
        warn!("Could not persist state: {}", e);
    }
}

/// Convert a notify event into project-relative watch events
fn convert_event(root: &Path, event: notify::Event) -> Vec<WatchEvent> {
    let make: fn(PathBuf) -> WatchEvent = match event.kind {
        EventKind::Create(_) => WatchEvent::Created,
        EventKind::Modify(_) => WatchEvent::Modified,
        EventKind::Remove(_) => WatchEvent::Removed,
        _ => return Vec::new(),
    };
    event
        .paths
        .iter()
        .filter_map(|path| path.strip_prefix(root).ok())
        .filter(|path| !should_ignore_path(path))
        .map(|path| make(path.to_path_buf()))
        .collect()
}

fn should_ignore_path(path: &Path) -> bool {
    if path.extension().is_some_and(|ext| ext == "codelens-tmp") {
        return true;
    }
    path.components().any(|c| c.as_os_str().to_str().is_some_and(|name| SKIP_DIRS.contains(&name)))
}
