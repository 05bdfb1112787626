//! Per-path debouncing of file change notifications

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Coalesces bursts of changes per path.
///
/// A path is ready once `window` has passed without another change to it.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: BTreeMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Debouncer { window, pending: BTreeMap::new() }
    }

    /// Record a change, pushing the path's deadline back.
    pub fn push(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path, now + self.window);
    }

    /// Earliest deadline among pending paths.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    /// Remove and return every path whose deadline has passed, sorted.
    pub fn take_ready(&mut self, now: Instant) -> Vec<PathBuf> {
        let ready: Vec<PathBuf> = self.pending.iter().filter(|(_, deadline)| **deadline <= now).map(|(p, _)| p.clone()).collect();
        for path in &ready {
            self.pending.remove(path);
        }
        ready
    }

    pub fn take_all(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.pending).into_keys().collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_coalesces_to_one_path() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        for i in 0..5 {
            debouncer.push("a.py".into(), start + Duration::from_millis(i * 10));
        }
        assert_eq!(debouncer.len(), 1);
        assert!(debouncer.take_ready(start + Duration::from_millis(100)).is_empty());
        assert_eq!(debouncer.take_ready(start + Duration::from_millis(140)), vec![PathBuf::from("a.py")]);
        assert!(debouncer.is_empty());
    }

    #[test]
    fn test_paths_become_ready_independently() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(50));
        debouncer.push("b.ts".into(), start);
        debouncer.push("a.py".into(), start + Duration::from_millis(30));
        assert_eq!(debouncer.next_deadline(), Some(start + Duration::from_millis(50)));

        assert_eq!(debouncer.take_ready(start + Duration::from_millis(60)), vec![PathBuf::from("b.ts")]);
        assert_eq!(debouncer.next_deadline(), Some(start + Duration::from_millis(80)));
        assert_eq!(debouncer.take_all(), vec![PathBuf::from("a.py")]);
        assert_eq!(debouncer.next_deadline(), None);
    }
}
