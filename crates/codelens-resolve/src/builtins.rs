//! Names provided by the language runtime rather than the project

use codelens_core::Language;

const PYTHON_BUILTINS: &[&str] = &[
    "abs", "all", "any", "ascii", "bin", "bool", "breakpoint", "bytearray", "bytes", "callable", "chr",
    "classmethod", "compile", "complex", "dict", "dir", "divmod", "enumerate", "filter", "float", "format",
    "frozenset", "hasattr", "hash", "help", "hex", "id", "input", "int", "isinstance", "issubclass", "iter",
    "len", "list", "map", "max", "memoryview", "min", "next", "object", "oct", "open", "ord", "pow", "print",
    "property", "range", "repr", "reversed", "round", "set", "slice", "sorted", "staticmethod", "str", "sum",
    "super", "tuple", "type", "vars", "zip", "BaseException", "Exception", "ArithmeticError", "AssertionError",
    "AttributeError", "EOFError", "ImportError", "IndexError", "KeyError", "KeyboardInterrupt", "LookupError",
    "MemoryError", "NameError", "NotImplementedError", "OSError", "OverflowError", "RecursionError",
    "RuntimeError", "StopIteration", "SyntaxError", "SystemExit", "TypeError", "ValueError",
    "ZeroDivisionError", "FileNotFoundError", "PermissionError", "TimeoutError", "NotImplemented", "Ellipsis",
];

const SCRIPT_GLOBALS: &[&str] = &[
    "Array", "ArrayBuffer", "BigInt", "Boolean", "Buffer", "Date", "Error", "Function", "Intl", "JSON", "Map",
    "Math", "Number", "Object", "Promise", "Proxy", "RangeError", "Reflect", "RegExp", "Set", "String",
    "Symbol", "SyntaxError", "TypeError", "Uint8Array", "URL", "URLSearchParams", "WeakMap", "WeakSet",
    "clearInterval", "clearTimeout", "console", "decodeURIComponent", "document", "encodeURIComponent",
    "fetch", "globalThis", "isFinite", "isNaN", "parseFloat", "parseInt", "process", "queueMicrotask",
    "require", "setInterval", "setTimeout", "structuredClone", "window",
];

/// External pseudo-id for a runtime-provided name, if `name` is one.
pub fn builtin_id(language: Language, name: &str) -> Option<String> {
    match language {
        Language::Python if PYTHON_BUILTINS.contains(&name) => Some(format!("builtins.{}", name)),
        Language::TypeScript | Language::JavaScript if SCRIPT_GLOBALS.contains(&name) => {
            Some(format!("globalThis.{}", name))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_ids() {
        assert_eq!(builtin_id(Language::Python, "len").as_deref(), Some("builtins.len"));
        assert_eq!(builtin_id(Language::TypeScript, "console").as_deref(), Some("globalThis.console"));
        assert_eq!(builtin_id(Language::Python, "console"), None);
        assert_eq!(builtin_id(Language::Other, "len"), None);
    }
}
