//! Text-level extraction of HTTP routes, HTTP calls, storage tables and mocks
//!
//! These facts live in decorators, string literals and query text that the
//! syntax adapters do not model. Each fact is attributed to the unit that
//! encloses it (or, for decorators, to the definition it decorates).

use std::sync::LazyLock;

use codelens_core::impact::is_test_file;
use codelens_core::links::{ANY_METHOD, normalize_route};
use codelens_core::{
    HttpCall, HttpRoute, Language, LinkFacts, MockTarget, SourceFile, SourceUnit, StorageAccess, StorageOp,
    StorageTable, UnitId, UnitKind,
};
use regex::{Captures, Regex};

fn pattern(source: &str) -> Regex {
    Regex::new(source).expect("invalid link pattern")
}

// Python routes: @app.get("/x"), @router.route("/x", methods=["POST"])
static DECORATOR_ROUTE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r#"(?i)@\w+\.(get|post|put|delete|patch|head|options)\s*\(\s*["']([^"']+)["']"#));
static ROUTE_DECORATOR: LazyLock<Regex> = LazyLock::new(|| pattern(r#"@\w+\.route\s*\(\s*["']([^"']+)["']"#));
static ROUTE_METHODS: LazyLock<Regex> = LazyLock::new(|| pattern(r#"methods\s*=\s*\[\s*["'](\w+)["']"#));
static ROUTER_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r#"(?:APIRouter|Blueprint)\s*\([^)]*?\b(?:url_prefix|prefix)\s*=\s*["']([^"']+)["']"#)
});

// Client calls
static FETCH: LazyLock<Regex> = LazyLock::new(|| pattern(r#"\bfetch\s*\(\s*[`"']([^`"']+)[`"']"#));
static CLIENT_CALL: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r#"(?i)\b(?:axios|client|api|http)\.(get|post|put|delete|patch)\s*(?:<[^>]+>)?\s*\(\s*[`"']([^`"']+)[`"']"#)
});
static FETCH_METHOD: LazyLock<Regex> =
    LazyLock::new(|| pattern(r#"(?i)\bmethod\s*:\s*['"](GET|POST|PUT|DELETE|PATCH)['"]"#));

// Storage
static TABLENAME: LazyLock<Regex> = LazyLock::new(|| pattern(r#"__tablename__\s*=\s*["']([^"']+)["']"#));
static DB_TABLE: LazyLock<Regex> = LazyLock::new(|| pattern(r#"\bdb_table\s*=\s*["']([^"']+)["']"#));
static SQL_READS: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        pattern(r#"(?i)\bSELECT\b[^;"'`]*?\bFROM\s+[`"\[]?(\w+)"#),
        pattern(r#"(?i)\bJOIN\s+[`"\[]?(\w+)[`"\]]?\s+(?:AS\s+\w+\s+)?ON\b"#),
    ]
});
static SQL_WRITES: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        pattern(r#"(?i)\bINSERT\s+INTO\s+[`"\[]?(\w+)"#),
        pattern(r#"(?i)\bUPDATE\s+[`"\[]?(\w+)[`"\]]?\s+SET\b"#),
        pattern(r#"(?i)\bDELETE\s+FROM\s+[`"\[]?(\w+)"#),
    ]
});

// Mocks: patch("pkg.mod.fn"), mock.patch("pkg.mod.fn")
static MOCK_PATCH: LazyLock<Regex> = LazyLock::new(|| pattern(r#"\bpatch\s*\(\s*["']([A-Za-z_][\w.]*)["']"#));

/// Extract link facts from one parsed file.
pub fn extract(file: &SourceFile, units: &[SourceUnit]) -> LinkFacts {
    let text = Text { src: &file.content, units };
    let mut facts = LinkFacts::default();
    match file.language() {
        Language::Python => {
            if !is_test_file(&file.path) {
                python_routes(&text, &mut facts);
            }
            python_tables(&text, &mut facts);
            python_mocks(&text, &mut facts);
        }
        Language::TypeScript | Language::JavaScript => client_calls(&text, &mut facts),
        Language::Other => return facts,
    }
    sql_ops(&text, &mut facts);
    facts
}

struct Text<'a> {
    src: &'a str,
    units: &'a [SourceUnit],
}

impl Text<'_> {
    fn line_of(&self, offset: usize) -> u32 {
        self.src[..offset].bytes().filter(|b| *b == b'\n').count() as u32 + 1
    }

    fn line_prefix(&self, offset: usize) -> &str {
        let start = self.src[..offset].rfind('\n').map_or(0, |i| i + 1);
        &self.src[start..offset]
    }

    fn line_at(&self, offset: usize) -> &str {
        let start = self.src[..offset].rfind('\n').map_or(0, |i| i + 1);
        let end = self.src[offset..].find('\n').map_or(self.src.len(), |i| offset + i);
        &self.src[start..end]
    }

    fn in_comment(&self, offset: usize) -> bool {
        let prefix = self.line_prefix(offset).trim_start();
        prefix.starts_with('#') || prefix.starts_with("//")
    }

    fn is_decorator(&self, offset: usize) -> bool {
        self.line_prefix(offset).trim_start().starts_with('@')
    }

    /// Smallest unit whose span contains `offset`.
    fn enclosing(&self, offset: usize, kinds: &[UnitKind]) -> Option<&SourceUnit> {
        self.units
            .iter()
            .filter(|u| kinds.is_empty() || kinds.contains(&u.kind))
            .filter(|u| u.location.start_byte <= offset && offset < u.location.end_byte)
            .min_by_key(|u| u.location.end_byte - u.location.start_byte)
    }

    /// First function or method starting at or after `offset`.
    fn decorated(&self, offset: usize) -> Option<&SourceUnit> {
        self.units
            .iter()
            .filter(|u| matches!(u.kind, UnitKind::Function | UnitKind::Method))
            .filter(|u| u.location.start_byte >= offset)
            .min_by_key(|u| u.location.start_byte)
    }

    /// The unit a match at `offset` belongs to.
    fn owner(&self, offset: usize) -> Option<UnitId> {
        let unit = if self.is_decorator(offset) { self.decorated(offset) } else { self.enclosing(offset, &[]) };
        unit.map(|u| u.id.clone())
    }
}

fn python_routes(text: &Text<'_>, facts: &mut LinkFacts) {
    let prefix = ROUTER_PREFIX
        .captures(text.src)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches('/').to_string())
        .unwrap_or_default();

    let mut push = |offset: usize, method: String, path: &str| {
        if text.in_comment(offset) {
            return;
        }
        let Some(handler) = text.decorated(offset) else { return };
        facts.routes.push(HttpRoute {
            method,
            path: normalize_route(&format!("{}{}", prefix, path)),
            handler: handler.id.clone(),
            line: text.line_of(offset),
        });
    };

    for caps in DECORATOR_ROUTE.captures_iter(text.src) {
        let offset = start(&caps);
        push(offset, caps[1].to_ascii_uppercase(), &caps[2]);
    }
    for caps in ROUTE_DECORATOR.captures_iter(text.src) {
        let offset = start(&caps);
        let method = ROUTE_METHODS
            .captures(text.line_at(offset))
            .map_or_else(|| ANY_METHOD.to_string(), |m| m[1].to_ascii_uppercase());
        push(offset, method, &caps[1]);
    }
}

fn python_tables(text: &Text<'_>, facts: &mut LinkFacts) {
    for caps in TABLENAME.captures_iter(text.src) {
        let offset = start(&caps);
        if let Some(class) = text.enclosing(offset, &[UnitKind::Class]) {
            facts.tables.push(StorageTable { name: caps[1].to_string(), model: class.id.clone(), line: text.line_of(offset) });
        }
    }
    for caps in DB_TABLE.captures_iter(text.src) {
        let offset = start(&caps);
        let Some(class) = text.enclosing(offset, &[UnitKind::Class]) else { continue };
        // Django declares the table on the nested `Meta` class.
        let model = match (&class.parent, class.name.as_str()) {
            (Some(parent), "Meta") => parent.clone(),
            _ => class.id.clone(),
        };
        facts.tables.push(StorageTable { name: caps[1].to_string(), model, line: text.line_of(offset) });
    }
}

fn python_mocks(text: &Text<'_>, facts: &mut LinkFacts) {
    for caps in MOCK_PATCH.captures_iter(text.src) {
        let offset = start(&caps);
        if text.in_comment(offset) {
            continue;
        }
        let Some(caller) = text.owner(offset) else { continue };
        facts.mocks.push(MockTarget { target: caps[1].to_string(), caller, line: text.line_of(offset) });
    }
}

fn client_calls(text: &Text<'_>, facts: &mut LinkFacts) {
    let mut push = |offset: usize, method: String, url: &str| {
        if text.in_comment(offset) {
            return;
        }
        let Some(path) = url_path(url) else { return };
        let Some(caller) = text.owner(offset) else { return };
        facts.calls.push(HttpCall { method, path: normalize_route(&path), caller, line: text.line_of(offset) });
    };

    for caps in FETCH.captures_iter(text.src) {
        let offset = start(&caps);
        let end = caps.get(0).map_or(offset, |m| m.end());
        let method = FETCH_METHOD
            .captures(options_window(text.src, end))
            .map_or_else(|| "GET".to_string(), |m| m[1].to_ascii_uppercase());
        push(offset, method, &caps[1]);
    }
    for caps in CLIENT_CALL.captures_iter(text.src) {
        let offset = start(&caps);
        if text.is_decorator(offset) {
            continue;
        }
        push(offset, caps[1].to_ascii_uppercase(), &caps[2]);
    }
}

fn sql_ops(text: &Text<'_>, facts: &mut LinkFacts) {
    let groups: [(StorageAccess, &[Regex]); 2] =
        [(StorageAccess::Read, &SQL_READS[..]), (StorageAccess::Write, &SQL_WRITES[..])];
    for (access, patterns) in groups {
        for re in patterns {
            for caps in re.captures_iter(text.src) {
                let offset = start(&caps);
                if text.in_comment(offset) {
                    continue;
                }
                let Some(caller) = text.owner(offset) else { continue };
                facts.storage.push(StorageOp { access, table: caps[1].to_string(), caller, line: text.line_of(offset) });
            }
        }
    }
}

fn start(caps: &Captures<'_>) -> usize {
    caps.get(0).map_or(0, |m| m.start())
}

/// The options argument that may follow a `fetch(url` match: the next three lines.
fn options_window(src: &str, from: usize) -> &str {
    let rest = &src[from..];
    let end = rest.match_indices('\n').nth(2).map_or(rest.len(), |(i, _)| i);
    let window = &rest[..end];
    // Stop at the next request so its options are not borrowed.
    match window.find("fetch(") {
        Some(i) => &window[..i],
        None => window,
    }
}

/// Path part of a request URL. Absolute URLs lose their origin and a
/// leading `${base}` template segment is dropped; anything else that does
/// not start with `/` is not a path.
fn url_path(url: &str) -> Option<String> {
    let url = url.trim();
    let path = if let Some((_, rest)) = url.split_once("://") {
        rest.find('/').map_or("/", |i| &rest[i..])
    } else if url.starts_with("${") {
        let close = url.find('}')?;
        &url[close + 1..]
    } else {
        url
    };
    path.starts_with('/').then(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::AdapterRegistry;
    use crate::parser_pool::create_parser_pool;

    fn facts(path: &str, content: &str) -> LinkFacts {
        let registry = AdapterRegistry::new(create_parser_pool());
        let module_id = path.rsplit_once('.').map_or(path, |(stem, _)| stem).replace('/', ".");
        let file = SourceFile::new(path, module_id, content);
        let output = registry.for_path(file.path.as_path()).unwrap().parse(&file).unwrap();
        extract(&file, &output.units)
    }

    #[test]
    fn test_fastapi_routes_with_prefix() {
        let facts = facts(
            "api/users.py",
            r#"router = APIRouter(prefix="/api/users")

@router.get("/{user_id}")
async def get_user(user_id: int):
    return db.execute("SELECT * FROM users WHERE id = ?", user_id)

# @router.delete("/{user_id}")
@router.route("/", methods=["POST"])
def create_user(body):
    db.execute("INSERT INTO users (name) VALUES (?)", body.name)
"#,
        );
        assert_eq!(facts.routes.len(), 2);
        assert_eq!(facts.routes[0].method, "GET");
        assert_eq!(facts.routes[0].path, "/api/users/:param");
        assert_eq!(facts.routes[0].handler, UnitId::new("api.users.get_user"));
        assert_eq!(facts.routes[1].method, "POST");
        assert_eq!(facts.routes[1].path, "/api/users");
        assert_eq!(facts.routes[1].handler, UnitId::new("api.users.create_user"));

        let read = facts.storage.iter().find(|op| op.access == StorageAccess::Read).unwrap();
        assert_eq!(read.table, "users");
        assert_eq!(read.caller, UnitId::new("api.users.get_user"));
        let write = facts.storage.iter().find(|op| op.access == StorageAccess::Write).unwrap();
        assert_eq!(write.caller, UnitId::new("api.users.create_user"));
    }

    #[test]
    fn test_client_calls() {
        let facts = facts(
            "web/client.ts",
            r#"export async function loadUser(id: string) {
  return fetch(`${API_URL}/api/users/${id}`);
}

export async function saveUser(user: User) {
  await fetch("/api/users", {
    method: "POST",
    body: JSON.stringify(user),
  });
}

export function removeUser(id: string) {
  // fetch("/api/legacy")
  return axios.delete(`https://example.com/api/users/${id}`);
}
"#,
        );
        let calls: Vec<(&str, &str, &str)> =
            facts.calls.iter().map(|c| (c.method.as_str(), c.path.as_str(), c.caller.as_str())).collect();
        assert_eq!(
            calls,
            vec![
                ("GET", "/api/users/:param", "web.client.loadUser"),
                ("POST", "/api/users", "web.client.saveUser"),
                ("DELETE", "/api/users/:param", "web.client.removeUser"),
            ]
        );
    }

    #[test]
    fn test_model_tables_and_mocks() {
        let facts = facts(
            "app/models.py",
            r#"class User(Base):
    __tablename__ = "users"

class Order(models.Model):
    class Meta:
        db_table = "orders"

def test_signup():
    with patch("app.mail.send_welcome"):
        pass
"#,
        );
        let tables: Vec<(&str, &str)> = facts.tables.iter().map(|t| (t.name.as_str(), t.model.as_str())).collect();
        assert_eq!(tables, vec![("users", "app.models.User"), ("orders", "app.models.Order")]);
        assert_eq!(facts.mocks.len(), 1);
        assert_eq!(facts.mocks[0].target, "app.mail.send_welcome");
        assert_eq!(facts.mocks[0].caller, UnitId::new("app.models.test_signup"));
    }

    #[test]
    fn test_routes_in_test_files_are_ignored() {
        let facts = facts("tests/test_api.py", "@app.get(\"/health\")\ndef health():\n    return 1\n");
        assert!(facts.routes.is_empty());
    }
}
