//! Unit tests for codelens-indexer

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use codelens_core::{Confidence, Edge, EdgeKind, FileUpdate, LensConfig, ReasonCode, UnitKind};
use codelens_resolve::{ExternalResolver, ExternalResult, RequestBatch, ResolveError, ResolverPool, ResponseBatch};
use tempfile::TempDir;

use crate::coordinator::{Coordinator, IndexOutcome};

fn write_project(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (path, content) in files {
        let full = dir.path().join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }
    dir
}

fn coordinator(dir: &TempDir) -> Coordinator {
    Coordinator::new(dir.path(), LensConfig::load(dir.path()).unwrap()).unwrap()
}

fn update<'a>(outcome: &'a IndexOutcome, path: &str) -> &'a FileUpdate {
    outcome.updates.iter().find(|u| u.path == Path::new(path)).unwrap()
}

fn edge<'a>(outcome: &'a IndexOutcome, from: &str, symbol: &str) -> &'a Edge {
    outcome
        .updates
        .iter()
        .flat_map(|u| &u.edges)
        .find(|e| e.from.as_str() == from && e.symbol == symbol && e.kind != EdgeKind::Contains)
        .unwrap_or_else(|| panic!("no edge {} -> {}", from, symbol))
}

const USER_PY: &str = "import re\n\n\ndef validate_email(email):\n    return re.match(r\"[^@]+@[^@]+\", email) is not None\n";

const SIGNUP_PY: &str = "from user import validate_email\n\n\ndef signup(email):\n    if not validate_email(email):\n        raise ValueError(\"invalid email\")\n    return True\n";

const TEST_SIGNUP_PY: &str = "from signup import signup\n\n\ndef test_signup():\n    assert signup(\"a@b.c\")\n";

#[tokio::test]
async fn test_index_python_signup_chain() {
    let dir = write_project(&[("user.py", USER_PY), ("signup.py", SIGNUP_PY), ("test_signup.py", TEST_SIGNUP_PY)]);
    let outcome = coordinator(&dir).index_all().await.unwrap();

    assert_eq!(outcome.stats.files_parsed, 3);
    assert!(outcome.diagnostics.is_empty());

    let call = edge(&outcome, "signup.signup", "validate_email");
    assert_eq!(call.kind, EdgeKind::Calls);
    assert_eq!(call.to.as_ref().map(|t| t.as_str()), Some("user.validate_email"));
    assert_eq!(call.confidence, Confidence::Resolved);
    assert_eq!(call.file, PathBuf::from("signup.py"));
    assert_eq!(call.line, 5);

    let test_call = edge(&outcome, "test_signup.test_signup", "signup");
    assert_eq!(test_call.to.as_ref().map(|t| t.as_str()), Some("signup.signup"));

    let builtin = edge(&outcome, "signup.signup", "ValueError");
    assert_eq!(builtin.confidence, Confidence::External);

    let user = update(&outcome, "user.py");
    let ids: Vec<&str> = user.units.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["user", "user.validate_email"]);
    assert!(!user.content_hash.is_empty());
    assert!(user.edges.iter().any(|e| e.kind == EdgeKind::Contains
        && e.from.as_str() == "user"
        && e.to.as_ref().map(|t| t.as_str()) == Some("user.validate_email")));
}

#[tokio::test]
async fn test_index_typescript_reexport_chain() {
    let dir = write_project(&[
        ("src/util/format.ts", "export function format(value: string): string {\n  return value.trim();\n}\n"),
        ("src/util/index.ts", "export { format } from './format';\n"),
        ("src/app.ts", "import { format } from './util';\n\nexport function main() {\n  return format(' x ');\n}\n"),
    ]);
    let outcome = coordinator(&dir).index_all().await.unwrap();

    let call = edge(&outcome, "src.app.main", "format");
    assert_eq!(call.to.as_ref().map(|t| t.as_str()), Some("src.util.format.format"));
    assert_eq!(call.confidence, Confidence::Resolved);
}

#[tokio::test]
async fn test_dynamic_calls_stay_unresolved() {
    let dir = write_project(&[("plugins.py", "def load(obj, name):\n    return getattr(obj, name)()\n")]);
    let outcome = coordinator(&dir).index_all().await.unwrap();

    let dynamic = edge(&outcome, "plugins.load", "getattr");
    assert!(dynamic.to.is_none());
    assert_eq!(dynamic.confidence, Confidence::Unresolved);
    assert_eq!(dynamic.reason, Some(ReasonCode::UnsupportedReferenceShape));
    assert_eq!(outcome.stats.unresolved, 1);
}

#[tokio::test]
async fn test_discovery_respects_ignores() {
    let dir = write_project(&[
        ("app.py", "x = 1\n"),
        ("node_modules/pkg/index.js", "module.exports = {};\n"),
        ("generated/models.py", "y = 2\n"),
        ("legacy/old.py", "z = 3\n"),
        ("README.md", "# readme\n"),
        (".gitignore", "generated/\n"),
        (".codelens.toml", "[index]\nexclude = [\"legacy/**\"]\n"),
    ]);
    let files = coordinator(&dir).discover();
    assert_eq!(files, vec![PathBuf::from("app.py")]);
}

#[tokio::test]
async fn test_reindex_touched_files() {
    let dir = write_project(&[("user.py", USER_PY), ("signup.py", SIGNUP_PY), ("test_signup.py", TEST_SIGNUP_PY)]);
    let coordinator = coordinator(&dir);
    coordinator.index_all().await.unwrap();

    fs::write(
        dir.path().join("user.py"),
        "def validate_email(email):\n    return \"@\" in email\n\n\ndef normalize(email):\n    return email.lower()\n",
    )
    .unwrap();
    fs::remove_file(dir.path().join("test_signup.py")).unwrap();

    let outcome = coordinator
        .reindex(&[PathBuf::from("user.py"), PathBuf::from("test_signup.py"), PathBuf::from("notes.txt")])
        .await
        .unwrap();
    assert_eq!(outcome.stats.files_parsed, 1);
    assert_eq!(outcome.stats.files_removed, 1);

    let removal = update(&outcome, "test_signup.py");
    assert!(removal.units.is_empty() && removal.edges.is_empty());
    assert!(!coordinator.symbols().contains_file(Path::new("test_signup.py")));

    let user = update(&outcome, "user.py");
    assert!(user.units.iter().any(|u| u.id.as_str() == "user.normalize" && u.kind == UnitKind::Function));
}

#[tokio::test]
async fn test_unreadable_file_is_counted_and_skipped() {
    let dir = write_project(&[("user.py", USER_PY)]);
    fs::write(dir.path().join("latin1.py"), b"name = '\xe9t\xe9'\n").unwrap();
    let coordinator = coordinator(&dir);

    let outcome = coordinator.index_all().await.unwrap();
    assert_eq!(outcome.stats.files_parsed, 1);
    assert_eq!(outcome.stats.files_failed, 1);
    assert!(outcome.updates.iter().all(|u| u.path != Path::new("latin1.py")));
    assert!(!coordinator.symbols().contains_file(Path::new("latin1.py")));
}

#[tokio::test]
async fn test_links_span_files() {
    let dir = write_project(&[
        ("routes.py", "@app.post(\"/api/orders\")\ndef create_order(body):\n    db.execute(\"INSERT INTO orders VALUES (?)\", body)\n"),
        ("shop.js", "export function order(item) {\n  return fetch('/api/orders', { method: 'POST', body: item });\n}\n"),
    ]);
    let coordinator = coordinator(&dir);
    coordinator.index_all().await.unwrap();

    let links = coordinator.links();
    let http = links.iter().find(|e| e.kind == EdgeKind::CallsHttp).unwrap();
    assert_eq!(http.from.as_str(), "shop.order");
    assert_eq!(http.to.as_ref().map(|t| t.as_str()), Some("routes.create_order"));
    assert_eq!(http.file, Path::new("shop.js"));
    let write = links.iter().find(|e| e.kind == EdgeKind::WritesStorage).unwrap();
    assert_eq!(write.confidence, Confidence::External);
    assert_eq!(write.to.as_ref().map(|t| t.as_str()), Some("db.table.orders"));
}

/// Resolves every request to `lib.<symbol>` and counts calls.
struct PrefixResolver {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl ExternalResolver for PrefixResolver {
    async fn resolve(&self, batch: &RequestBatch) -> Result<ResponseBatch, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let results = batch
            .requests
            .iter()
            .map(|r| ExternalResult {
                id: r.id.clone(),
                node_id: Some("lib.mystery".to_string()),
                confidence: "resolved".to_string(),
                reason: None,
            })
            .collect();
        Ok(ResponseBatch { results })
    }

    fn name(&self) -> &str {
        "prefix"
    }
}

#[tokio::test]
async fn test_external_resolver_strengthens_weak_edges() {
    let dir = write_project(&[("app.ts", "export function run() {\n  mystery();\n}\n")]);
    let resolver = Arc::new(PrefixResolver { calls: AtomicUsize::new(0) });
    let pool = ResolverPool::new(resolver.clone(), 1, Duration::from_secs(5), 50);
    let coordinator = coordinator(&dir).with_external(pool);

    let outcome = coordinator.index_all().await.unwrap();
    let call = edge(&outcome, "app.run", "mystery");
    assert_eq!(call.confidence, Confidence::Resolved);
    assert_eq!(call.to.as_ref().map(|t| t.as_str()), Some("lib.mystery"));
    assert_eq!(outcome.stats.external_requests, 1);

    // Unchanged content is answered from the resolution cache.
    let outcome = coordinator.reindex(&[PathBuf::from("app.ts")]).await.unwrap();
    assert_eq!(outcome.stats.cache_hits, 1);
    assert_eq!(outcome.stats.external_requests, 0);
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
}
