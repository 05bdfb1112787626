//! Codelens Watcher: debounced filesystem watching and incremental resync

pub mod debounce;
pub mod watcher;

pub use debounce::Debouncer;
pub use watcher::{FileWatcher, WatchEvent, WatchStats, WatcherService, process_events};
