//! Comparators used by match rules.
//!
//! A comparator is a shared closure returning `Ok(true)` on a match. Pattern
//! errors are reported when the comparator runs so that rule construction
//! itself stays infallible.

use super::RuleError;
use regex::Regex;
use serde_json::Value;
use serde_json_path::JsonPath;
use std::sync::Arc;

/// A predicate over a borrowed value.
pub type Compare<T> = Arc<dyn Fn(&T) -> Result<bool, RuleError> + Send + Sync>;

pub fn exactly(expected: impl Into<String>) -> Compare<str> {
    let expected = expected.into();
    Arc::new(move |actual: &str| Ok(actual == expected))
}

pub fn has_prefix(prefix: impl Into<String>) -> Compare<str> {
    let prefix = prefix.into();
    Arc::new(move |actual: &str| Ok(actual.starts_with(&prefix)))
}

pub fn contains(needle: impl Into<String>) -> Compare<str> {
    let needle = needle.into();
    Arc::new(move |actual: &str| Ok(actual.contains(&needle)))
}

/// Shell-style wildcard match over the whole value.
///
/// Supports `*`, `?`, character classes (`[abc]`, `[a-z]`, `[!abc]`),
/// alternatives (`{png,jpg}`) and `\` escapes.
pub fn glob(pattern: impl Into<String>) -> Compare<str> {
    let pattern = pattern.into();
    let compiled =
        glob_to_regex(&pattern).and_then(|re| Regex::new(&re).map_err(|e| e.to_string()));
    match compiled {
        Ok(regex) => Arc::new(move |actual: &str| Ok(regex.is_match(actual))),
        Err(reason) => Arc::new(move |_: &str| {
            Err(RuleError::InvalidPattern {
                pattern: pattern.clone(),
                reason: reason.clone(),
            })
        }),
    }
}

fn glob_to_regex(pattern: &str) -> Result<String, String> {
    let mut out = String::from("(?s)^");
    let mut chars = pattern.chars();
    let mut brace_depth = 0usize;

    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                None => return Err("trailing escape".to_string()),
            },
            '[' => {
                out.push('[');
                let mut first = true;
                let mut closed = false;
                for class_char in chars.by_ref() {
                    match class_char {
                        ']' if !first => {
                            closed = true;
                            break;
                        }
                        '!' if first => out.push('^'),
                        '-' => out.push('-'),
                        other => out.push_str(&regex::escape(&other.to_string())),
                    }
                    first = false;
                }
                if !closed {
                    return Err("unclosed character class".to_string());
                }
                out.push(']');
            }
            '{' => {
                brace_depth += 1;
                out.push_str("(?:");
            }
            ',' if brace_depth > 0 => out.push('|'),
            '}' if brace_depth > 0 => {
                brace_depth -= 1;
                out.push(')');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    if brace_depth > 0 {
        return Err("unclosed alternative group".to_string());
    }
    out.push('$');
    Ok(out)
}

/// Types a JSON value can be viewed as for [`json`].
pub trait JsonType {
    fn with_json<R>(value: &Value, f: impl FnOnce(&Self) -> R) -> Option<R>;
}

impl JsonType for str {
    fn with_json<R>(value: &Value, f: impl FnOnce(&Self) -> R) -> Option<R> {
        value.as_str().map(f)
    }
}

impl JsonType for f64 {
    fn with_json<R>(value: &Value, f: impl FnOnce(&Self) -> R) -> Option<R> {
        value.as_f64().map(|n| f(&n))
    }
}

impl JsonType for bool {
    fn with_json<R>(value: &Value, f: impl FnOnce(&Self) -> R) -> Option<R> {
        value.as_bool().map(|b| f(&b))
    }
}

impl JsonType for Value {
    fn with_json<R>(value: &Value, f: impl FnOnce(&Self) -> R) -> Option<R> {
        Some(f(value))
    }
}

/// Parse the body as JSON and compare the value at `path`.
///
/// `path` is either dotted (`user.name`, `items.0.id`) or a `$`-rooted
/// JSONPath. Invalid JSON, a missing value, or a value of another type is a
/// non-match.
pub fn json<T>(path: impl Into<String>, compare: Compare<T>) -> Compare<[u8]>
where
    T: JsonType + ?Sized + 'static,
{
    let path = path.into();
    let compiled = JsonPath::parse(&to_json_path(&path));

    Arc::new(move |body: &[u8]| {
        let json_path = compiled.as_ref().map_err(|e| RuleError::InvalidJsonPath {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let Ok(document) = serde_json::from_slice::<Value>(body) else {
            return Ok(false);
        };
        let nodes = json_path.query(&document);
        let Some(value) = nodes.first() else {
            return Ok(false);
        };

        T::with_json(value, |typed| compare(typed)).unwrap_or(Ok(false))
    })
}

/// Convert a dotted path into JSONPath; `$`-rooted paths pass through.
pub fn to_json_path(path: &str) -> String {
    if path.starts_with('$') {
        return path.to_string();
    }

    let mut out = String::from("$");
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        if segment.bytes().all(|b| b.is_ascii_digit()) {
            out.push_str(&format!("[{segment}]"));
        } else {
            out.push_str(&format!("['{}']", segment.replace('\\', "\\\\").replace('\'', "\\'")));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_comparators() {
        assert!(exactly("GET")("GET").unwrap());
        assert!(!exactly("GET")("get").unwrap());
        assert!(has_prefix("/api")("/api/users").unwrap());
        assert!(!has_prefix("/api")("/v1/api").unwrap());
        assert!(contains("json")("application/json; charset=utf-8").unwrap());
        assert!(!contains("xml")("application/json").unwrap());
    }

    #[test]
    fn test_glob() {
        assert!(glob("/users/*")("/users/42").unwrap());
        assert!(glob("/users/*")("/users/42/posts").unwrap());
        assert!(!glob("/users/*")("/accounts/42").unwrap());
        assert!(glob("file-?.txt")("file-a.txt").unwrap());
        assert!(!glob("file-?.txt")("file-ab.txt").unwrap());
        assert!(glob("img.{png,jpg}")("img.jpg").unwrap());
        assert!(!glob("img.{png,jpg}")("img.gif").unwrap());
        assert!(glob("v[0-9]")("v7").unwrap());
        assert!(glob("v[!0-9]")("vx").unwrap());
        assert!(!glob("v[!0-9]")("v7").unwrap());
        assert!(glob("a.b")("a.b").unwrap());
        assert!(!glob("a.b")("axb").unwrap());
        assert!(glob(r"literal\*")("literal*").unwrap());
    }

    #[test]
    fn test_glob_invalid_pattern_errors_at_match_time() {
        let cmp = glob("[unclosed");
        let err = cmp("anything").unwrap_err();
        assert!(matches!(err, RuleError::InvalidPattern { .. }));
        assert!(glob("{a,b")("a").is_err());
    }

    #[test]
    fn test_to_json_path() {
        assert_eq!(to_json_path("user.name"), "$['user']['name']");
        assert_eq!(to_json_path("items.0.id"), "$['items'][0]['id']");
        assert_eq!(to_json_path("$.items[0]"), "$.items[0]");
    }

    #[test]
    fn test_json_string_value() {
        let body = br#"{"user":{"name":"ada","age":36},"items":[{"id":"x1"}]}"#;
        assert!(json("user.name", exactly("ada"))(body).unwrap());
        assert!(!json("user.name", exactly("bob"))(body).unwrap());
        assert!(json("items.0.id", exactly("x1"))(body).unwrap());
        assert!(json("$.items[0].id", has_prefix("x"))(body).unwrap());
    }

    #[test]
    fn test_json_typed_values() {
        let body = br#"{"age":36,"active":true}"#;
        let adult: Compare<f64> = Arc::new(|age: &f64| Ok(*age >= 18.0));
        assert!(json("age", adult)(body).unwrap());

        let active: Compare<bool> = Arc::new(|b: &bool| Ok(*b));
        assert!(json("active", active)(body).unwrap());
    }

    #[test]
    fn test_json_non_matches() {
        // type mismatch
        assert!(!json("age", exactly("36"))(br#"{"age":36}"#).unwrap());
        // invalid document
        assert!(!json("age", exactly("36"))(b"not json").unwrap());
        // missing value
        assert!(!json("name", exactly(""))(br#"{}"#).unwrap());
    }

    #[test]
    fn test_json_invalid_path() {
        let cmp = json("$[", exactly("x"));
        assert!(matches!(
            cmp(b"{}"),
            Err(RuleError::InvalidJsonPath { .. })
        ));
    }
}
