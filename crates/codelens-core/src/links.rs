//! Cross-file links that no import expresses
//!
//! Adapters record per-file facts: HTTP routes a handler serves, HTTP calls
//! a client makes, storage tables a model maps and the reads and writes a
//! function performs on them. [`link_edges`] matches those facts across the
//! whole project. The resulting edges are always `inferred` or `external`.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::{Edge, EdgeKind, Resolution, UnitId};

/// Method used for routes and calls that accept any verb.
pub const ANY_METHOD: &str = "ANY";

/// A backend route and the unit that handles it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRoute {
    pub method: String,
    /// Normalized with [`normalize_route`].
    pub path: String,
    pub handler: UnitId,
    pub line: u32,
}

/// An HTTP request made from client code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpCall {
    pub method: String,
    /// Normalized with [`normalize_route`].
    pub path: String,
    pub caller: UnitId,
    pub line: u32,
}

/// A storage table mapped by a model class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageTable {
    pub name: String,
    pub model: UnitId,
    pub line: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageAccess {
    Read,
    Write,
}

/// A read or write of a table, found in a query string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageOp {
    pub access: StorageAccess,
    pub table: String,
    pub caller: UnitId,
    pub line: u32,
}

/// A test double installed over a dotted target, e.g. `patch("user.send_mail")`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockTarget {
    pub target: String,
    pub caller: UnitId,
    pub line: u32,
}

/// Link facts for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkFacts {
    pub routes: Vec<HttpRoute>,
    pub calls: Vec<HttpCall>,
    pub tables: Vec<StorageTable>,
    pub storage: Vec<StorageOp>,
    pub mocks: Vec<MockTarget>,
}

impl LinkFacts {
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
            && self.calls.is_empty()
            && self.tables.is_empty()
            && self.storage.is_empty()
            && self.mocks.is_empty()
    }
}

/// `/users/{id}`, `/users/${userId}` and `/users/:id/` all become `/users/:param`.
pub fn normalize_route(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<&str> = path
        .split('/')
        .map(|segment| {
            let dynamic = segment.starts_with(':')
                || (segment.starts_with('{') && segment.ends_with('}'))
                || segment.contains("${");
            if dynamic { ":param" } else { segment }
        })
        .collect();
    let joined = segments.join("/");
    let trimmed = joined.trim_end_matches('/');
    if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() }
}

/// Segment-wise comparison where `:param` matches any one segment.
pub fn routes_match(call: &str, route: &str) -> bool {
    if call == route {
        return true;
    }
    let call: Vec<&str> = call.trim_matches('/').split('/').collect();
    let route: Vec<&str> = route.trim_matches('/').split('/').collect();
    call.len() == route.len() && call.iter().zip(&route).all(|(c, r)| c == r || *c == ":param" || *r == ":param")
}

pub fn methods_match(call: &str, route: &str) -> bool {
    call == ANY_METHOD || route == ANY_METHOD || call.eq_ignore_ascii_case(route)
}

/// Id standing in for a table no model class maps.
pub fn table_id(name: &str) -> String {
    format!("db.table.{}", name)
}

/// Match facts across files into edges attributed to the caller's file.
///
/// Calls link to every matching route; a storage op links to the model
/// mapping its table when one is known and to a `db.table.*` id otherwise.
pub fn link_edges(files: &[(PathBuf, LinkFacts)]) -> Vec<Edge> {
    let routes: Vec<&HttpRoute> = files.iter().flat_map(|(_, facts)| &facts.routes).collect();
    let models: HashMap<String, &UnitId> = files
        .iter()
        .flat_map(|(_, facts)| &facts.tables)
        .map(|table| (table.name.to_ascii_lowercase(), &table.model))
        .collect();

    let mut edges = Vec::new();
    let mut seen: BTreeSet<(UnitId, EdgeKind, UnitId)> = BTreeSet::new();
    let mut push = |edge: Edge| {
        let key = (edge.from.clone(), edge.kind.clone(), edge.to.clone().unwrap_or_else(|| UnitId::new("")));
        if seen.insert(key) {
            edges.push(edge);
        }
    };

    for (path, facts) in files {
        for call in &facts.calls {
            for route in routes.iter().filter(|r| routes_match(&call.path, &r.path) && methods_match(&call.method, &r.method)) {
                if route.handler == call.caller {
                    continue;
                }
                let symbol = format!("{} {}", call.method, call.path);
                push(Edge::from_resolution(
                    call.caller.clone(),
                    EdgeKind::CallsHttp,
                    Resolution::inferred(route.handler.clone()),
                    symbol,
                    path.clone(),
                    call.line,
                    0,
                ));
            }
        }

        for op in &facts.storage {
            let kind = match op.access {
                StorageAccess::Read => EdgeKind::ReadsStorage,
                StorageAccess::Write => EdgeKind::WritesStorage,
            };
            let resolution = match models.get(&op.table.to_ascii_lowercase()) {
                Some(model) => Resolution::inferred((*model).clone()),
                None => Resolution::external(table_id(&op.table)),
            };
            push(Edge::from_resolution(op.caller.clone(), kind, resolution, op.table.clone(), path.clone(), op.line, 0));
        }

        for mock in &facts.mocks {
            push(Edge::from_resolution(
                mock.caller.clone(),
                EdgeKind::Mocks,
                Resolution::inferred(mock.target.as_str()),
                mock.target.clone(),
                path.clone(),
                mock.line,
                0,
            ));
        }
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Confidence;

    #[test]
    fn test_normalize_route() {
        assert_eq!(normalize_route("/api/users/{user_id}"), "/api/users/:param");
        assert_eq!(normalize_route("/api/users/${id}/posts/"), "/api/users/:param/posts");
        assert_eq!(normalize_route("/api/users/:id?full=1"), "/api/users/:param");
        assert_eq!(normalize_route("/"), "/");
    }

    #[test]
    fn test_route_and_method_matching() {
        assert!(routes_match("/api/users/:param", "/api/users/:param"));
        assert!(routes_match("/api/users/42", "/api/users/:param"));
        assert!(!routes_match("/api/users", "/api/users/:param"));
        assert!(methods_match("post", "POST"));
        assert!(methods_match(ANY_METHOD, "DELETE"));
        assert!(!methods_match("GET", "POST"));
    }

    #[test]
    fn test_link_edges_across_files() {
        let backend = LinkFacts {
            routes: vec![HttpRoute {
                method: "GET".into(),
                path: "/api/users/:param".into(),
                handler: UnitId::new("api.get_user"),
                line: 4,
            }],
            tables: vec![StorageTable { name: "users".into(), model: UnitId::new("models.User"), line: 2 }],
            storage: vec![
                StorageOp {
                    access: StorageAccess::Read,
                    table: "users".into(),
                    caller: UnitId::new("api.get_user"),
                    line: 6,
                },
                StorageOp {
                    access: StorageAccess::Write,
                    table: "audit_log".into(),
                    caller: UnitId::new("api.get_user"),
                    line: 7,
                },
            ],
            ..LinkFacts::default()
        };
        let frontend = LinkFacts {
            calls: vec![
                HttpCall { method: "GET".into(), path: "/api/users/:param".into(), caller: UnitId::new("web.load"), line: 3 },
                HttpCall { method: "POST".into(), path: "/api/users/:param".into(), caller: UnitId::new("web.save"), line: 9 },
            ],
            ..LinkFacts::default()
        };
        let edges = link_edges(&[("api.py".into(), backend), ("web.ts".into(), frontend)]);

        let http: Vec<&Edge> = edges.iter().filter(|e| e.kind == EdgeKind::CallsHttp).collect();
        assert_eq!(http.len(), 1);
        assert_eq!(http[0].from, UnitId::new("web.load"));
        assert_eq!(http[0].to, Some(UnitId::new("api.get_user")));
        assert_eq!(http[0].file, PathBuf::from("web.ts"));
        assert_eq!(http[0].confidence, Confidence::Inferred);

        let read = edges.iter().find(|e| e.kind == EdgeKind::ReadsStorage).unwrap();
        assert_eq!(read.to, Some(UnitId::new("models.User")));
        let write = edges.iter().find(|e| e.kind == EdgeKind::WritesStorage).unwrap();
        assert_eq!(write.to, Some(UnitId::new("db.table.audit_log")));
        assert_eq!(write.confidence, Confidence::External);
    }
}
