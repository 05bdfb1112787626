//! Project layout: module ids, project boundary and import path aliases

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::config::LensConfig;

/// Workspace flavor detected from manifest files in the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceType {
    Python,
    Npm,
    Mixed,
}

/// Detect the workspace flavor from manifests in `root`.
pub fn detect_workspace(root: &Path) -> Option<WorkspaceType> {
    let python = ["pyproject.toml", "setup.py", "setup.cfg", "requirements.txt"]
        .iter()
        .any(|f| root.join(f).exists());
    let npm = root.join("package.json").exists();
    match (python, npm) {
        (true, true) => Some(WorkspaceType::Mixed),
        (true, false) => Some(WorkspaceType::Python),
        (false, true) => Some(WorkspaceType::Npm),
        (false, false) => None,
    }
}

/// Whether a file belongs to the project or to a vendored dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Project,
    Vendored { package: String },
}

/// Path conventions shared by parsers and the resolver.
#[derive(Debug, Clone, Default)]
pub struct ProjectLayout {
    source_roots: Vec<PathBuf>,
    vendor_dirs: Vec<String>,
    /// (specifier prefix, project-relative directory), longest prefix first.
    path_aliases: Vec<(String, PathBuf)>,
}

impl ProjectLayout {
    pub fn new(source_roots: Vec<PathBuf>, vendor_dirs: Vec<String>, mut path_aliases: Vec<(String, PathBuf)>) -> Self {
        path_aliases.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        ProjectLayout { source_roots, vendor_dirs, path_aliases }
    }

    /// Build the layout for `root` from config plus tsconfig/jsconfig path mappings.
    pub fn discover(root: &Path, config: &LensConfig) -> Self {
        let mut source_roots: Vec<PathBuf> = config.index.source_roots.iter().map(PathBuf::from).collect();
        if source_roots.is_empty()
            && matches!(detect_workspace(root), Some(WorkspaceType::Python) | Some(WorkspaceType::Mixed))
            && root.join("src").is_dir()
            && !root.join("src").join("__init__.py").exists()
        {
            source_roots.push(PathBuf::from("src"));
        }

        let mut aliases: Vec<(String, PathBuf)> = config
            .resolver
            .path_aliases
            .iter()
            .map(|(prefix, dir)| (prefix.clone(), PathBuf::from(dir)))
            .collect();
        aliases.extend(read_tsconfig_aliases(root));
        debug!("Project layout: roots={:?} aliases={:?}", source_roots, aliases);

        ProjectLayout::new(source_roots, config.index.vendor_dirs.clone(), aliases)
    }

    /// Dotted module id for a project-relative path.
    ///
    /// `pkg/__init__.py` and `src/utils/index.ts` collapse to their directory.
    pub fn module_id(&self, path: &Path) -> String {
        let relative = self
            .source_roots
            .iter()
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.components().count())
            .and_then(|root| path.strip_prefix(root).ok())
            .unwrap_or(path);

        let mut parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        if let Some(last) = parts.pop() {
            let stem = strip_source_extension(&last);
            let collapses = stem == "__init__" || stem == "index";
            if !collapses || parts.is_empty() {
                parts.push(stem.to_string());
            }
        }
        parts.join(".")
    }

    /// Classify a project-relative path against the vendored directories.
    pub fn origin(&self, path: &Path) -> Origin {
        let components: Vec<String> = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        for (i, component) in components.iter().enumerate() {
            if self.vendor_dirs.iter().any(|v| v == component) {
                let is_last = |idx: usize| idx + 1 == components.len();
                let package_part = |idx: usize, name: &String| {
                    if is_last(idx) { strip_source_extension(name).to_string() } else { name.clone() }
                };
                let package = match components.get(i + 1) {
                    Some(scope) if scope.starts_with('@') => match components.get(i + 2) {
                        Some(name) => format!("{}/{}", scope, package_part(i + 2, name)),
                        None => scope.clone(),
                    },
                    Some(name) => package_part(i + 1, name),
                    None => component.clone(),
                };
                return Origin::Vendored { package };
            }
        }
        Origin::Project
    }

    /// Rewrite an aliased import specifier to a project-relative path.
    pub fn alias_target(&self, specifier: &str) -> Option<PathBuf> {
        self.path_aliases.iter().find_map(|(prefix, dir)| {
            let rest = specifier.strip_prefix(prefix.as_str())?;
            Some(normalize(&dir.join(rest)))
        })
    }
}

/// Strip `.py`, `.ts`, `.d.ts` and friends from a file name.
pub fn strip_source_extension(name: &str) -> &str {
    for ext in [".d.ts", ".d.mts", ".d.cts"] {
        if let Some(stem) = name.strip_suffix(ext) {
            return stem;
        }
    }
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

/// Whether a path is a type-declaration-only file.
pub fn is_declaration_file(path: &Path) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    name.ends_with(".d.ts") || name.ends_with(".d.mts") || name.ends_with(".d.cts") || name.ends_with(".pyi")
}

/// Lexically resolve `.` and `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.last(), Some(Component::Normal(_))) {
                    out.pop();
                }
            }
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// `compilerOptions.paths` entries from tsconfig.json / jsconfig.json.
fn read_tsconfig_aliases(root: &Path) -> Vec<(String, PathBuf)> {
    let mut aliases = Vec::new();
    for name in ["tsconfig.json", "jsconfig.json"] {
        let Ok(text) = std::fs::read_to_string(root.join(name)) else {
            continue;
        };
        let Ok(json) = serde_json::from_str::<serde_json::Value>(&text) else {
            debug!("Skipping unparseable {}", name);
            continue;
        };
        let options = &json["compilerOptions"];
        let base = options["baseUrl"].as_str().map(PathBuf::from).unwrap_or_default();
        if let Some(paths) = options["paths"].as_object() {
            for (pattern, targets) in paths {
                let Some(target) = targets.as_array().and_then(|t| t.first()).and_then(|t| t.as_str()) else {
                    continue;
                };
                let prefix = pattern.trim_end_matches('*').to_string();
                let dir = normalize(&base.join(target.trim_end_matches('*')));
                aliases.push((prefix, dir));
            }
        }
    }
    aliases
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_ids() {
        let layout = ProjectLayout::default();
        assert_eq!(layout.module_id(Path::new("user.py")), "user");
        assert_eq!(layout.module_id(Path::new("pkg/sub/mod.py")), "pkg.sub.mod");
        assert_eq!(layout.module_id(Path::new("pkg/__init__.py")), "pkg");
        assert_eq!(layout.module_id(Path::new("src/utils/index.ts")), "src.utils");
        assert_eq!(layout.module_id(Path::new("types/api.d.ts")), "types.api");
        assert_eq!(layout.module_id(Path::new("index.ts")), "index");
    }

    #[test]
    fn test_source_roots_are_stripped() {
        let layout = ProjectLayout::new(vec![PathBuf::from("src")], vec![], vec![]);
        assert_eq!(layout.module_id(Path::new("src/app/models.py")), "app.models");
    }

    #[test]
    fn test_vendored_origin() {
        let layout = ProjectLayout::new(vec![], vec!["node_modules".into()], vec![]);
        assert_eq!(layout.origin(Path::new("src/a.ts")), Origin::Project);
        assert_eq!(
            layout.origin(Path::new("node_modules/@scope/pkg/index.js")),
            Origin::Vendored { package: "@scope/pkg".into() }
        );
        assert_eq!(
            layout.origin(Path::new("node_modules/lodash/get.js")),
            Origin::Vendored { package: "lodash".into() }
        );
    }

    #[test]
    fn test_alias_target() {
        let layout = ProjectLayout::new(vec![], vec![], vec![("@/".into(), PathBuf::from("src"))]);
        assert_eq!(layout.alias_target("@/lib/db"), Some(PathBuf::from("src/lib/db")));
        assert_eq!(layout.alias_target("react"), None);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("src/a/../b/./c")), PathBuf::from("src/b/c"));
    }
}
