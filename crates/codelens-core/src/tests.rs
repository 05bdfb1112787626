//! Unit tests for codelens-core

use std::path::Path;

use crate::test_utils::*;
use crate::*;

#[test]
fn test_unit_id_navigation() {
    let id = UnitId::new("pkg.models.User.save");
    assert_eq!(id.local_name(), "save");
    assert_eq!(id.parent(), Some(UnitId::new("pkg.models.User")));
    assert_eq!(UnitId::new("pkg").child("models").as_str(), "pkg.models");
    assert_eq!(UnitId::new("top").parent(), None);
}

#[test]
fn test_confidence_ordering() {
    assert!(Confidence::Resolved > Confidence::Inferred);
    assert!(Confidence::Inferred > Confidence::External);
    assert!(Confidence::External > Confidence::Unresolved);
}

#[test]
fn test_reconcile_never_decreases_confidence() {
    for c in [Confidence::Unresolved, Confidence::External, Confidence::Inferred, Confidence::Resolved] {
        assert!(c.reconcile_observed() >= c, "{} decreased", c);
    }
    assert_eq!(Confidence::Resolved.reconcile_observed(), Confidence::Resolved);
    assert_eq!(Provenance::Static.merge(Provenance::Observed), Provenance::Both);
    assert_eq!(Provenance::Both.merge(Provenance::Static), Provenance::Both);
}

#[test]
fn test_edge_target_invariant() {
    let ok = call("a.f", "b.g", "a.py");
    assert!(ok.validate().is_ok());

    let unresolved = unresolved_call("a.f", "getattr", "a.py");
    assert!(unresolved.to.is_none());
    assert!(unresolved.validate().is_ok());

    let mut broken = call("a.f", "b.g", "a.py");
    broken.to = None;
    assert!(broken.validate().is_err());

    // from_resolution drops a stray target on unresolved results
    let forced = Edge::from_resolution(
        UnitId::new("a.f"),
        EdgeKind::Calls,
        Resolution { target: Some(UnitId::new("x")), confidence: Confidence::Unresolved, reason: None },
        "x",
        "a.py".into(),
        1,
        0,
    );
    assert!(forced.to.is_none());
}

#[test]
fn test_upsert_and_reverse_index() {
    let store = GraphStore::new();
    store
        .upsert_file(Path::new("b.py"), vec![module("b.py"), function("b.g", "b.py", 1)], vec![])
        .unwrap();
    store
        .upsert_file(
            Path::new("a.py"),
            vec![module("a.py"), function("a.f", "a.py", 1)],
            vec![call("a.f", "b.g", "a.py")],
        )
        .unwrap();

    let incoming = store.edges_to("b.g");
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].from.as_str(), "a.f");
    assert_eq!(store.edges_from("a.f").len(), 1);

    // Re-upserting a.py without the call removes the stale edge from both indexes.
    store
        .upsert_file(Path::new("a.py"), vec![module("a.py"), function("a.f", "a.py", 1)], vec![])
        .unwrap();
    assert!(store.edges_to("b.g").is_empty());
    assert!(store.edges_from("a.f").is_empty());
}

#[test]
fn test_upsert_isolation() {
    let store = GraphStore::new();
    store
        .upsert_files(vec![
            update("a.py", vec![module("a.py"), function("a.f", "a.py", 1)], vec![call("a.f", "b.g", "a.py")]),
            update("b.py", vec![module("b.py"), function("b.g", "b.py", 1)], vec![]),
        ])
        .unwrap();

    let before = store.snapshot();
    let b_units_before: Vec<UnitId> = before.units_in_file(Path::new("b.py")).iter().map(|u| u.id.clone()).collect();

    let delta = store
        .upsert_file(
            Path::new("a.py"),
            vec![module("a.py"), function("a.h", "a.py", 5)],
            vec![call("a.h", "b.g", "a.py")],
        )
        .unwrap();
    assert_eq!(delta.added, vec![UnitId::new("a.h")]);
    assert_eq!(delta.removed, vec![UnitId::new("a.f")]);

    // The old snapshot is untouched.
    assert!(before.contains("a.f"));
    assert!(!before.contains("a.h"));

    // Units and edges attributed to b.py are identical.
    let after = store.snapshot();
    let b_units_after: Vec<UnitId> = after.units_in_file(Path::new("b.py")).iter().map(|u| u.id.clone()).collect();
    assert_eq!(b_units_before, b_units_after);
    assert_eq!(after.unit("b.g"), before.unit("b.g"));
    assert!(after.version() > before.version());
}

/// Version `tag` of m.py: two functions, one calling the other and one calling out.
fn tagged_update(tag: &str) -> FileUpdate {
    let f = format!("m.f_{}", tag);
    let g = format!("m.g_{}", tag);
    update(
        "m.py",
        vec![module("m.py"), function(&f, "m.py", 1), function(&g, "m.py", 5)],
        vec![call(&f, "b.g", "m.py"), call(&g, &f, "m.py")],
    )
}

#[test]
fn test_concurrent_readers_see_whole_file_versions() {
    use std::sync::atomic::{AtomicBool, Ordering};

    let store = GraphStore::new();
    store
        .upsert_files(vec![tagged_update("v1"), update("b.py", vec![module("b.py"), function("b.g", "b.py", 1)], vec![])])
        .unwrap();
    let done = AtomicBool::new(false);
    let path = Path::new("m.py");

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let mut reads = 0;
                while !done.load(Ordering::Acquire) || reads == 0 {
                    let snapshot = store.snapshot();
                    let entry = snapshot.file(path).unwrap();
                    let tags: Vec<&str> =
                        entry.units.iter().filter_map(|id| id.as_str().rsplit_once('_')).map(|(_, tag)| tag).collect();
                    assert_eq!(tags.len(), 2);
                    assert_eq!(tags[0], tags[1], "units from two versions: {:?}", entry.units);
                    let tag = tags[0];

                    let edges: Vec<&Edge> = snapshot.edges_in_file(path).collect();
                    assert_eq!(edges.len(), 2);
                    for edge in edges {
                        assert!(entry.units.contains(&edge.from), "{} not in {:?}", edge.from, entry.units);
                        assert!(edge.from.as_str().ends_with(tag));
                        assert!(snapshot.contains(edge.from.as_str()));
                    }
                    reads += 1;
                }
            });
        }

        for i in 0..200 {
            let tag = if i % 2 == 0 { "v2" } else { "v1" };
            store.upsert_files(vec![tagged_update(tag)]).unwrap();
        }
        done.store(true, Ordering::Release);
    });
    assert_eq!(store.version(), 201);
}

#[test]
fn test_upsert_reports_modified_units() {
    let store = GraphStore::new();
    store.upsert_file(Path::new("a.py"), vec![function("a.f", "a.py", 1)], vec![]).unwrap();
    let mut changed = function("a.f", "a.py", 1);
    changed.content_hash = content_hash(b"def f(): return 2");
    let delta = store.upsert_file(Path::new("a.py"), vec![changed], vec![]).unwrap();
    assert_eq!(delta.modified, vec![UnitId::new("a.f")]);
    assert!(delta.added.is_empty());
}

#[test]
fn test_upsert_rejects_invalid_edges_atomically() {
    let store = GraphStore::new();
    store.upsert_file(Path::new("a.py"), vec![function("a.f", "a.py", 1)], vec![]).unwrap();
    let version = store.version();

    let mut bad = call("a.f", "b.g", "a.py");
    bad.to = None;
    let result = store.upsert_files(vec![
        update("a.py", vec![], vec![]),
        update("c.py", vec![function("c.k", "c.py", 1)], vec![bad]),
    ]);
    assert!(result.is_err());
    assert_eq!(store.version(), version);
    assert!(store.snapshot().contains("a.f"));
}

#[test]
fn test_duplicate_ids_across_files_are_conflicts() {
    let store = GraphStore::new();
    store.upsert_file(Path::new("a.py"), vec![function("shared.f", "a.py", 1)], vec![]).unwrap();
    let delta = store.upsert_file(Path::new("b.py"), vec![function("shared.f", "b.py", 1)], vec![]).unwrap();
    assert_eq!(delta.conflicts, vec![UnitId::new("shared.f")]);
    assert_eq!(store.get_unit("shared.f").unwrap().location.file, Path::new("a.py"));

    // Removing b.py must not remove the unit owned by a.py.
    store.remove_file(Path::new("b.py")).unwrap();
    assert!(store.get_unit("shared.f").is_ok());
}

#[test]
fn test_merge_observed_edges() {
    let store = GraphStore::new();
    store
        .upsert_files(vec![
            update(
                "a.py",
                vec![module("a.py"), function("a.f", "a.py", 1)],
                vec![
                    call("a.f", "b.g", "a.py"),
                    edge("a.f", "b.h", EdgeKind::Calls, Confidence::Inferred, "a.py"),
                ],
            ),
            update(
                "b.py",
                vec![module("b.py"), function("b.g", "b.py", 1), function("b.h", "b.py", 5), function("b.k", "b.py", 9)],
                vec![],
            ),
        ])
        .unwrap();

    let stats = store
        .merge_observed(vec![
            ObservedEdge { from: "a.f".into(), to: "b.g".into(), kind: EdgeKind::Calls },
            ObservedEdge { from: "a.f".into(), to: "b.h".into(), kind: EdgeKind::Calls },
            ObservedEdge { from: "a.f".into(), to: "b.k".into(), kind: EdgeKind::Calls },
            ObservedEdge { from: "ghost.x".into(), to: "b.k".into(), kind: EdgeKind::Calls },
        ])
        .unwrap();
    assert_eq!(stats, MergeStats { reconciled: 2, added: 1, skipped: 1 });

    let edges = store.edges_from("a.f");
    let to_g = edges.iter().find(|e| e.to == Some("b.g".into())).unwrap();
    assert_eq!(to_g.provenance, Provenance::Both);
    assert_eq!(to_g.confidence, Confidence::Resolved);

    let to_h = edges.iter().find(|e| e.to == Some("b.h".into())).unwrap();
    assert_eq!(to_h.confidence, Confidence::Resolved);

    let to_k = edges.iter().find(|e| e.to == Some("b.k".into())).unwrap();
    assert_eq!(to_k.provenance, Provenance::Observed);
    assert_eq!(store.snapshot().file(Path::new("a.py")).unwrap().edges.len(), 3);
}

#[test]
fn test_observation_at_unresolved_site_adds_edge() {
    let store = GraphStore::new();
    store
        .upsert_files(vec![
            update("a.py", vec![module("a.py"), function("a.f", "a.py", 1)], vec![unresolved_call("a.f", "getattr", "a.py")]),
            update("b.py", vec![module("b.py"), function("b.g", "b.py", 1)], vec![]),
        ])
        .unwrap();

    let stats = store
        .merge_observed(vec![ObservedEdge { from: "a.f".into(), to: "b.g".into(), kind: EdgeKind::Calls }])
        .unwrap();
    assert_eq!(stats, MergeStats { reconciled: 0, added: 1, skipped: 0 });

    let edges = store.edges_from("a.f");
    assert_eq!(edges.len(), 2);
    assert!(edges.iter().any(|e| e.is_unresolved() && e.provenance == Provenance::Static));
    let observed = edges.iter().find(|e| e.to == Some("b.g".into())).unwrap();
    assert_eq!(observed.confidence, Confidence::Resolved);
    assert_eq!(observed.provenance, Provenance::Observed);
}

fn signup_graph() -> GraphStore {
    let store = GraphStore::new();
    store
        .upsert_files(vec![
            update("user.py", vec![module("user.py"), function("user.validate_email", "user.py", 1)], vec![]),
            update(
                "signup.py",
                vec![module("signup.py"), function("signup.signup", "signup.py", 3)],
                vec![
                    edge("signup", "user.validate_email", EdgeKind::Imports, Confidence::Resolved, "signup.py"),
                    call("signup.signup", "user.validate_email", "signup.py"),
                ],
            ),
            update(
                "test_signup.py",
                vec![module("test_signup.py"), function("test_signup.test_signup", "test_signup.py", 3)],
                vec![
                    edge("test_signup", "signup.signup", EdgeKind::Imports, Confidence::Resolved, "test_signup.py"),
                    call("test_signup.test_signup", "signup.signup", "test_signup.py"),
                ],
            ),
        ])
        .unwrap();
    store
}

#[test]
fn test_dependents_and_impact() {
    let store = signup_graph();
    let snapshot = store.snapshot();

    assert_eq!(direct_dependents(&snapshot, "user.validate_email"), vec![UnitId::new("signup.signup")]);

    let transitive = transitive_dependents(&snapshot, "user.validate_email", 3);
    assert_eq!(
        transitive,
        vec![
            Dependent { id: "signup.signup".into(), depth: 1 },
            Dependent { id: "test_signup.test_signup".into(), depth: 2 },
        ]
    );
    assert_eq!(transitive_dependents(&snapshot, "user.validate_email", 1).len(), 1);

    let report = check_impact(&snapshot, "user.validate_email", 3, &SeverityPolicy::default()).unwrap();
    assert!(report.has_test_coverage);
    assert!(report.crosses_module_boundary);
    assert!(report.severity < Severity::Critical);

    assert!(check_impact(&snapshot, "user.missing", 3, &SeverityPolicy::default()).is_err());
}

#[test]
fn test_shallowest_depth_wins() {
    let store = GraphStore::new();
    store
        .upsert_file(
            Path::new("m.py"),
            vec![
                function("m.target", "m.py", 1),
                function("m.a", "m.py", 5),
                function("m.b", "m.py", 9),
            ],
            vec![call("m.a", "m.target", "m.py"), call("m.b", "m.a", "m.py"), call("m.b", "m.target", "m.py")],
        )
        .unwrap();
    let deps = transitive_dependents(&store.snapshot(), "m.target", 5);
    assert!(deps.contains(&Dependent { id: "m.b".into(), depth: 1 }));
    assert_eq!(deps.len(), 2);
}

#[test]
fn test_unresolved_edges_are_not_dependents() {
    let store = GraphStore::new();
    store
        .upsert_file(
            Path::new("m.py"),
            vec![function("m.target", "m.py", 1), function("m.caller", "m.py", 5)],
            vec![unresolved_call("m.caller", "target", "m.py")],
        )
        .unwrap();
    let snapshot = store.snapshot();
    assert!(direct_dependents(&snapshot, "m.target").is_empty());
    assert_eq!(snapshot.unresolved_edges().count(), 1);
}

#[test]
fn test_severity_policy_is_monotone() {
    let policy = SeverityPolicy::default();
    let base = SeverityInputs { direct_count: 3, transitive_count: 4, has_test_coverage: true, crosses_module_boundary: false };
    let (low, _) = policy.assess(&base);

    let more = SeverityInputs { direct_count: 30, transitive_count: 40, ..base };
    let untested = SeverityInputs { has_test_coverage: false, ..base };
    let crossing = SeverityInputs { crosses_module_boundary: true, ..base };
    for other in [more, untested, crossing] {
        assert!(policy.assess(&other).0 >= low);
    }

    let critical = SeverityInputs { direct_count: 12, transitive_count: 12, has_test_coverage: false, crosses_module_boundary: true };
    assert_eq!(policy.assess(&critical).0, Severity::Critical);
    let covered = SeverityInputs { has_test_coverage: true, ..critical };
    assert!(policy.assess(&covered).0 < Severity::Critical);
}

#[test]
fn test_dead_code_ignores_unresolved_edges() {
    let store = GraphStore::new();
    store
        .upsert_file(
            Path::new("app.py"),
            vec![
                function("app.main", "app.py", 1),
                function("app.used", "app.py", 5),
                function("app.only_dynamic", "app.py", 9),
            ],
            vec![call("app.main", "app.used", "app.py"), unresolved_call("app.main", "only_dynamic", "app.py")],
        )
        .unwrap();
    let dead = dead_code(&store.snapshot(), &[UnitId::new("app.main")]);
    assert_eq!(dead, vec![UnitId::new("app.only_dynamic")]);
}

#[test]
fn test_dead_code_keeps_members_of_live_classes() {
    let store = GraphStore::new();
    store
        .upsert_file(
            Path::new("svc.py"),
            vec![
                function("svc.main", "svc.py", 1),
                unit("svc.Service", UnitKind::Class, "svc.py", 5, 20),
                unit("svc.Service.run", UnitKind::Method, "svc.py", 6, 8),
                unit("svc.Orphan", UnitKind::Class, "svc.py", 22, 30),
            ],
            vec![call("svc.main", "svc.Service", "svc.py")],
        )
        .unwrap();
    let dead = dead_code(&store.snapshot(), &[UnitId::new("svc.main")]);
    assert_eq!(dead, vec![UnitId::new("svc.Orphan")]);
}

#[test]
fn test_cycles_over_imports_and_inheritance() {
    let store = GraphStore::new();
    store
        .upsert_files(vec![
            update(
                "a.py",
                vec![module("a.py"), function("a.f", "a.py", 1), unit("a.Base", UnitKind::Class, "a.py", 5, 9)],
                vec![
                    edge("a", "b.g", EdgeKind::Imports, Confidence::Resolved, "a.py"),
                    edge("a.Base", "b.Child", EdgeKind::Inherits, Confidence::Resolved, "a.py"),
                    call("a.f", "b.g", "a.py"),
                ],
            ),
            update(
                "b.py",
                vec![module("b.py"), function("b.g", "b.py", 1), unit("b.Child", UnitKind::Class, "b.py", 5, 9)],
                vec![
                    edge("b", "a.f", EdgeKind::Imports, Confidence::Resolved, "b.py"),
                    edge("b.Child", "a.Base", EdgeKind::Inherits, Confidence::Resolved, "b.py"),
                    call("b.g", "a.f", "b.py"),
                ],
            ),
            update(
                "c.py",
                vec![module("c.py"), function("c.x", "c.py", 1), function("c.y", "c.py", 5)],
                vec![call("c.x", "c.y", "c.py"), call("c.y", "c.x", "c.py")],
            ),
        ])
        .unwrap();

    let found = cycles(&store.snapshot());
    assert_eq!(
        found,
        vec![
            Cycle { kind: CycleKind::Import, members: vec!["a".into(), "b".into()] },
            Cycle { kind: CycleKind::Inheritance, members: vec!["a.Base".into(), "b.Child".into()] },
        ]
    );
}

#[test]
fn test_find_usages_includes_imports() {
    let store = signup_graph();
    let usages = find_usages(&store.snapshot(), "user.validate_email");
    assert_eq!(usages.len(), 2);
    assert!(usages.iter().any(|u| u.kind == EdgeKind::Imports));
}

#[test]
fn test_entry_point_detection() {
    let store = signup_graph();
    let entries = detect_entry_points(&store.snapshot());
    assert!(entries.contains(&UnitId::new("test_signup.test_signup")));
    assert!(entries.contains(&UnitId::new("signup")));
    assert!(!entries.contains(&UnitId::new("user.validate_email")));
}

#[test]
fn test_state_persistence() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = signup_graph();
    let state = cache::PersistedState::new((*store.snapshot()).clone(), Vec::new(), vec![1u32, 2, 3]);
    cache::save_state(dir.path(), &state).unwrap();

    let loaded: cache::PersistedState<Vec<u32>> = cache::load_state(dir.path()).unwrap().unwrap();
    assert_eq!(loaded.resolutions, vec![1, 2, 3]);
    assert_eq!(loaded.graph.unit_count(), store.snapshot().unit_count());
    assert_eq!(loaded.graph.edges_to("user.validate_email").count(), 2);

    cache::clear_cache(dir.path()).unwrap();
    assert!(cache::load_state::<Vec<u32>>(dir.path()).unwrap().is_none());
}

#[test]
fn test_corrupt_state_is_ignored() {
    let dir = create_repo_with_structure(&[(".codelens/state.bin", "not bincode")]);
    assert!(cache::load_state::<Vec<u32>>(dir.path()).unwrap().is_none());
}
