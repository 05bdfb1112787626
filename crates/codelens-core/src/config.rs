//! Project configuration loaded from `.codelens.toml`

use std::collections::BTreeMap;
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::impact::SeverityPolicy;

/// Config file name, looked up in the project root.
pub const CONFIG_FILE: &str = ".codelens.toml";

/// Directories never walked, regardless of configuration.
pub const SKIP_DIRS: &[&str] = &[
    ".git",
    ".codelens",
    "__pycache__",
    ".mypy_cache",
    ".pytest_cache",
    ".ruff_cache",
    ".tox",
    ".eggs",
    ".venv",
    "venv",
    "env",
    "node_modules",
    "site-packages",
    "dist",
    "build",
    "target",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LensConfig {
    pub index: IndexConfig,
    pub resolver: ResolverConfig,
    pub impact: ImpactConfig,
    pub patch: PatchConfig,
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Glob patterns (relative to the root) excluded from indexing.
    pub exclude: Vec<String>,
    /// Directory names treated as third-party code.
    pub vendor_dirs: Vec<String>,
    /// Directories stripped from the front of module ids (`src` layouts).
    pub source_roots: Vec<String>,
    pub respect_gitignore: bool,
    /// Files larger than this are skipped.
    pub max_file_bytes: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            exclude: Vec::new(),
            vendor_dirs: ["node_modules", "site-packages", "vendor", "third_party"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            source_roots: Vec::new(),
            respect_gitignore: true,
            max_file_bytes: 2 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Maximum number of alias hops followed per reference.
    pub max_alias_depth: usize,
    /// Import specifier prefix → project-relative directory (`"@/" = "src/"`).
    pub path_aliases: BTreeMap<String, String>,
    pub external: Option<ExternalResolverConfig>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig { max_alias_depth: 15, path_aliases: BTreeMap::new(), external: None }
    }
}

/// An out-of-process resolver speaking line-delimited JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalResolverConfig {
    pub command: Vec<String>,
    /// Extensions whose weak references are sent to the external resolver.
    pub extensions: Vec<String>,
    /// Concurrent subprocess calls.
    pub workers: usize,
    pub timeout_ms: u64,
    pub batch_size: usize,
}

impl Default for ExternalResolverConfig {
    fn default() -> Self {
        ExternalResolverConfig {
            command: Vec::new(),
            extensions: vec!["ts".into(), "tsx".into(), "js".into(), "jsx".into()],
            workers: 2,
            timeout_ms: 60_000,
            batch_size: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactConfig {
    pub default_depth: usize,
    pub severity: SeverityPolicy,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        ImpactConfig { default_depth: 3, severity: SeverityPolicy::default() }
    }
}

/// What to do when a patch changes a signature incompatibly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignaturePolicy {
    #[default]
    Warn,
    Reject,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    pub signature_policy: SignaturePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub debounce_ms: u64,
    pub channel_capacity: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig { debounce_ms: 300, channel_capacity: 1024 }
    }
}

impl LensConfig {
    /// Load `<root>/.codelens.toml`, falling back to defaults, then apply env overrides.
    pub fn load(root: &Path) -> Result<Self, CoreError> {
        let path = root.join(CONFIG_FILE);
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(|e| CoreError::io(&path, e))?;
            Self::from_toml(&text).map_err(|message| CoreError::Config { path: path.clone(), message })?
        } else {
            LensConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    fn apply_env_overrides(&mut self) {
        if let Some(depth) = env_number("CODELENS_MAX_ALIAS_DEPTH") {
            self.resolver.max_alias_depth = depth as usize;
        }
        if let Some(ms) = env_number("CODELENS_DEBOUNCE_MS") {
            self.watch.debounce_ms = ms;
        }
        if let Some(ms) = env_number("CODELENS_RESOLVER_TIMEOUT_MS") {
            if let Some(external) = self.resolver.external.as_mut() {
                external.timeout_ms = ms;
            }
        }
    }

    /// Compiled exclusion globs.
    pub fn exclude_set(&self) -> Result<GlobSet, CoreError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.index.exclude {
            let glob = Glob::new(pattern).map_err(|e| CoreError::Config {
                path: CONFIG_FILE.into(),
                message: format!("bad exclude pattern {:?}: {}", pattern, e),
            })?;
            builder.add(glob);
        }
        builder.build().map_err(|e| CoreError::Config {
            path: CONFIG_FILE.into(),
            message: e.to_string(),
        })
    }
}

fn env_number(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = LensConfig::load(dir.path()).unwrap();
        assert_eq!(config.resolver.max_alias_depth, 15);
        assert_eq!(config.watch.debounce_ms, 300);
        assert_eq!(config.patch.signature_policy, SignaturePolicy::Warn);
    }

    #[test]
    fn test_partial_toml() {
        let config = LensConfig::from_toml(
            r#"
[resolver]
max_alias_depth = 4

[resolver.path_aliases]
"@/" = "src/"

[patch]
signature_policy = "reject"
"#,
        )
        .unwrap();
        assert_eq!(config.resolver.max_alias_depth, 4);
        assert_eq!(config.resolver.path_aliases.get("@/").map(String::as_str), Some("src/"));
        assert_eq!(config.patch.signature_policy, SignaturePolicy::Reject);
        assert_eq!(config.impact.default_depth, 3);
    }

    #[test]
    fn test_bad_exclude_pattern() {
        let mut config = LensConfig::default();
        config.index.exclude.push("[".to_string());
        assert!(config.exclude_set().is_err());
    }
}
