//! Integration tests for Codelens
//!
//! These tests verify that multiple systems work together correctly.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use std::sync::Arc;

use codelens_core::{CycleKind, ReasonCode, UnitId};
use codelens_engine::{CancelToken, PatchRequest, ProjectContext, api};
use tempfile::TempDir;

const USER_PY: &str = "import re\n\n\ndef validate_email(email):\n    return re.match(r\"[^@]+@[^@]+\", email) is not None\n";

const SIGNUP_PY: &str = "from user import validate_email\n\n\ndef signup(email):\n    if not validate_email(email):\n        raise ValueError(\"invalid email\")\n    return True\n";

const TEST_SIGNUP_PY: &str = "from signup import signup\n\n\ndef test_signup():\n    assert signup(\"a@b.c\")\n";

fn write_project(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (path, content) in files {
        let full = dir.path().join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }
    dir
}

fn signup_project() -> TempDir {
    write_project(&[("user.py", USER_PY), ("signup.py", SIGNUP_PY), ("test_signup.py", TEST_SIGNUP_PY)])
}

fn codelens(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_codelens"))
        .arg("--root")
        .arg(root)
        .args(args)
        .env("CODELENS_LOG", "off")
        .output()
        .expect("Failed to execute codelens")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout is not JSON")
}

/// Test that the CLI can be invoked
#[test]
fn test_cli_invocation() {
    let output = Command::new(env!("CARGO_BIN_EXE_codelens")).arg("--help").output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("codelens"));
    assert!(stdout.contains("impact"));
    assert!(stdout.contains("dead-code"));
}

#[test]
fn test_cli_index_then_impact() {
    let dir = signup_project();

    let output = codelens(dir.path(), &["index"]);
    assert!(output.status.success());
    let report = stdout_json(&output);
    assert_eq!(report["stats"]["files_parsed"], 3);
    assert!(dir.path().join(".codelens/state.bin").exists());

    let output = codelens(dir.path(), &["impact", "user.validate_email"]);
    assert!(output.status.success());
    let response = stdout_json(&output);
    assert_eq!(response["success"], true);
    assert_eq!(response["data"]["direct_dependents"], serde_json::json!(["signup.signup"]));
    assert_eq!(response["data"]["has_test_coverage"], true);
}

#[test]
fn test_cli_unknown_unit_fails_with_suggestions() {
    let dir = signup_project();

    let output = codelens(dir.path(), &["usages", "signup.sign"]);
    assert!(!output.status.success());
    let response = stdout_json(&output);
    assert_eq!(response["success"], false);
    assert_eq!(response["error"]["code"], "unit_not_found");
    assert_eq!(response["error"]["details"]["suggestions"][0], "signup.signup");
}

#[test]
fn test_cli_patch_and_clear() {
    let dir = signup_project();
    let batch = dir.path().join("batch.json");
    fs::write(
        &batch,
        r#"[{ "unit_id": "user.validate_email", "new_source": "def validate_email(email):\n    return \"@\" in email\n" }]"#,
    )
    .unwrap();

    let output = codelens(dir.path(), &["patch", batch.to_str().unwrap(), "--dry-run"]);
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)[0]["data"]["state"], "validated");
    assert_eq!(fs::read_to_string(dir.path().join("user.py")).unwrap(), USER_PY);

    let output = codelens(dir.path(), &["patch", batch.to_str().unwrap()]);
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["data"]["state"], "resynced");
    assert!(fs::read_to_string(dir.path().join("user.py")).unwrap().contains("return \"@\" in email"));
    assert!(dir.path().join(".codelens/history.jsonl").exists());

    let output = codelens(dir.path(), &["clear"]);
    assert!(output.status.success());
    assert!(!dir.path().join(".codelens").exists());
}

#[test]
fn test_cli_merge_trace() {
    let dir = signup_project();
    let trace = dir.path().join("trace.json");
    fs::write(
        &trace,
        r#"[
            { "from": "signup.signup", "to": "user.validate_email", "kind": "calls" },
            { "from": "test_signup.test_signup", "to": "user.validate_email", "kind": "calls" }
        ]"#,
    )
    .unwrap();

    let output = codelens(dir.path(), &["merge-trace", trace.to_str().unwrap()]);
    assert!(output.status.success());
    let response = stdout_json(&output);
    assert_eq!(response["data"]["reconciled"], 1);
    assert_eq!(response["data"]["added"], 1);

    let output = codelens(dir.path(), &["usages", "user.validate_email"]);
    let usages = stdout_json(&output);
    let observed = usages["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|u| u["from"] == "test_signup.test_signup")
        .unwrap();
    assert_eq!(observed["provenance"], "observed");
}

#[test]
fn test_cli_merge_trace_rejects_malformed_trace() {
    let dir = signup_project();
    let trace = dir.path().join("trace.json");
    fs::write(&trace, r#"[{ "from": "signup.signup" }]"#).unwrap();

    let output = codelens(dir.path(), &["merge-trace", trace.to_str().unwrap()]);
    assert!(!output.status.success());
}

/// Python and TypeScript side by side, through the library API
#[tokio::test]
async fn test_mixed_language_project() {
    let dir = write_project(&[
        ("user.py", USER_PY),
        ("web/a.ts", "import { b } from './b';\n\nexport function a(): number {\n  return b();\n}\n"),
        ("web/b.ts", "import { a } from './a';\n\nexport function b(): number {\n  return a();\n}\n"),
        ("web/dispatch.js", "export function dispatch(handlers, name) {\n  return handlers[name]();\n}\n"),
    ]);
    let ctx = ProjectContext::open(dir.path()).await.unwrap();

    let cycles = ctx.cycles();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].kind, CycleKind::Import);
    assert_eq!(cycles[0].members, vec!["web.a".to_string(), "web.b".to_string()]);

    let unresolved = ctx.unresolved();
    assert!(unresolved.iter().any(|e| e.from.as_str() == "web.dispatch.dispatch"
        && e.reason == Some(ReasonCode::UnsupportedReferenceShape)));

    let usages = api::find_usages(&ctx, "web.b.b");
    assert!(usages.success);
    assert!(usages.data.unwrap().iter().any(|u| u.from == UnitId::new("web.a.a")));
}

/// A patch through the library API is visible to a fresh context opened from saved state
#[tokio::test]
async fn test_patch_survives_reopen() {
    let dir = signup_project();
    {
        let ctx = ProjectContext::open(dir.path()).await.unwrap();
        let request = PatchRequest::new("signup.signup", "def signup(email, notify=False):\n    return validate_email(email)\n");
        let response = api::apply_batch(&ctx, vec![request], &CancelToken::new()).await;
        assert!(response.success, "{:?}", response.error);
    }

    let ctx = ProjectContext::open(dir.path()).await.unwrap();
    let unit = ctx.get_unit("signup.signup").unwrap();
    assert!(unit.signature.unwrap_or_default().contains("notify"));
    assert_eq!(ctx.history().entries().unwrap().len(), 1);
}

/// Test that the watcher service can be built for an open project
#[tokio::test]
async fn test_watcher_service() {
    let dir = signup_project();
    let ctx = Arc::new(ProjectContext::open(dir.path()).await.unwrap());
    let watcher = codelens_watcher::WatcherService::new(ctx);
    assert!(watcher.is_ok());
}
