//! Durable project state under `.codelens/`
//!
//! The directory is a cache: deleting it only costs a full re-index.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::graph::GraphSnapshot;
use crate::symbols::FileSymbols;

/// Cache directory: .codelens/
pub const CACHE_DIR: &str = ".codelens";

/// Graph, symbols and resolution cache.
pub const STATE_FILE: &str = "state.bin";

/// Applied patch log, one JSON record per line.
pub const HISTORY_FILE: &str = "history.jsonl";

/// Bumped whenever the persisted layout or parser output changes.
pub const STATE_FORMAT: u32 = 2;

#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedState<R> {
    pub format: u32,
    pub tool_version: String,
    pub saved_at: String,
    pub graph: GraphSnapshot,
    pub symbols: Vec<FileSymbols>,
    pub resolutions: R,
}

impl<R> PersistedState<R> {
    pub fn new(graph: GraphSnapshot, symbols: Vec<FileSymbols>, resolutions: R) -> Self {
        PersistedState {
            format: STATE_FORMAT,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            saved_at: chrono::Utc::now().to_rfc3339(),
            graph,
            symbols,
            resolutions,
        }
    }
}

/// Get cache directory path
pub fn cache_dir(root: &Path) -> PathBuf {
    root.join(CACHE_DIR)
}

pub fn state_path(root: &Path) -> PathBuf {
    cache_dir(root).join(STATE_FILE)
}

pub fn history_path(root: &Path) -> PathBuf {
    cache_dir(root).join(HISTORY_FILE)
}

/// Ensure cache directory exists
pub fn ensure_cache_dir(root: &Path) -> Result<PathBuf, CoreError> {
    let cache = cache_dir(root);
    if !cache.exists() {
        std::fs::create_dir_all(&cache).map_err(|e| CoreError::io(&cache, e))?;
    }
    Ok(cache)
}

/// Serialize state with bincode, writing through a temp file so readers never see a torn file.
pub fn save_state<R: Serialize>(root: &Path, state: &PersistedState<R>) -> Result<(), CoreError> {
    ensure_cache_dir(root)?;
    let path = state_path(root);
    let tmp = path.with_extension("bin.tmp");
    let bytes = bincode::serialize(state)?;
    std::fs::write(&tmp, &bytes).map_err(|e| CoreError::io(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| CoreError::io(&path, e))?;
    debug!("Saved state ({} bytes) to {}", bytes.len(), path.display());
    Ok(())
}

/// Load persisted state. Missing, stale or corrupt state yields `None`.
pub fn load_state<R: DeserializeOwned>(root: &Path) -> Result<Option<PersistedState<R>>, CoreError> {
    let path = state_path(root);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(&path).map_err(|e| CoreError::io(&path, e))?;
    match bincode::deserialize::<PersistedState<R>>(&bytes) {
        Ok(state) if state.format == STATE_FORMAT => {
            debug!("Loaded state saved at {} from {}", state.saved_at, path.display());
            Ok(Some(state))
        }
        Ok(state) => {
            warn!("Ignoring state with format {} (expected {})", state.format, STATE_FORMAT);
            Ok(None)
        }
        Err(e) => {
            warn!("Ignoring unreadable state at {}: {}", path.display(), e);
            Ok(None)
        }
    }
}

/// Clear cache directory
pub fn clear_cache(root: &Path) -> Result<(), CoreError> {
    let cache = cache_dir(root);
    if cache.exists() {
        std::fs::remove_dir_all(&cache).map_err(|e| CoreError::io(&cache, e))?;
    }
    Ok(())
}
