//! Path/data access scoping: which paths a delegatee may touch, and
//! recursive redaction of sensitive fields before data crosses a trust
//! boundary.

use serde_json::Value;

const MAX_REDACTION_DEPTH: usize = 20;

/// Keys that must never be recursed into or copied verbatim, regardless of
/// allow/deny rules — these are prototype-pollution vectors in the original
/// JSON-object sense and carry no legitimate application data.
const SKIPPED_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

/// Path-scoped allow/deny guard. Deny always wins over allow; both lists
/// support a trailing `*` wildcard segment.
#[derive(Debug, Clone, Default)]
pub struct DataAccessGuard {
    allow: Vec<String>,
    deny: Vec<String>,
    max_size_bytes: Option<usize>,
}

impl DataAccessGuard {
    pub fn new(allow: Vec<String>, deny: Vec<String>, max_size_bytes: Option<usize>) -> Self {
        Self { allow, deny, max_size_bytes }
    }

    /// Whether `path` is permitted: denied if any deny rule matches
    /// (deny wins), otherwise permitted only if the allow list is empty or a
    /// rule matches.
    pub fn is_allowed(&self, path: &str) -> bool {
        if self.deny.iter().any(|rule| path_matches(rule, path)) {
            return false;
        }
        self.allow.is_empty() || self.allow.iter().any(|rule| path_matches(rule, path))
    }

    /// Reject a payload whose serialized size exceeds the configured
    /// ceiling.
    pub fn within_size_limit(&self, value: &Value) -> bool {
        match self.max_size_bytes {
            None => true,
            Some(limit) => serde_json::to_vec(value).map(|v| v.len() <= limit).unwrap_or(false),
        }
    }

    /// Recursively redact sensitive field names in `value`, returning a
    /// redacted copy. Recursion stops at `MAX_REDACTION_DEPTH`; keys on
    /// [`SKIPPED_KEYS`] are dropped entirely rather than traversed.
    pub fn redact(&self, value: &Value, sensitive_keys: &[&str]) -> Value {
        redact_inner(value, sensitive_keys, 0)
    }
}

fn path_matches(rule: &str, path: &str) -> bool {
    let rule_segs: Vec<&str> = rule.split('/').filter(|s| !s.is_empty()).collect();
    let path_segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    if rule_segs.last() == Some(&"*") {
        let prefix = &rule_segs[..rule_segs.len() - 1];
        path_segs.len() >= prefix.len() && path_segs[..prefix.len()] == *prefix
    } else {
        rule_segs == path_segs
    }
}

fn redact_inner(value: &Value, sensitive_keys: &[&str], depth: usize) -> Value {
    if depth >= MAX_REDACTION_DEPTH {
        return Value::String("[max depth reached]".to_string());
    }
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if SKIPPED_KEYS.contains(&k.as_str()) {
                    continue;
                }
                if sensitive_keys.iter().any(|s| s.eq_ignore_ascii_case(k)) {
                    out.insert(k.clone(), Value::String("[redacted]".to_string()));
                } else {
                    out.insert(k.clone(), redact_inner(v, sensitive_keys, depth + 1));
                }
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(|v| redact_inner(v, sensitive_keys, depth + 1)).collect()),
        other => other.clone(),
    }
}
