//! Structured-path lookup against JSON message bodies.
//!
//! Supports the subset of JSONPath that bus payloads need in practice:
//!
//! | Syntax | Meaning |
//! |--------|---------|
//! | `$` | the whole document |
//! | `.key` / `['key']` | object member |
//! | `[2]` / `[-1]` | array element, negative counts from the end |
//! | `.*` / `[*]` | every member or element |
//! | `[1:3]` | array slice, either bound optional |
//!
//! A path containing a wildcard or slice always yields an array.

use std::fmt;

use serde_json::Value;

/// Errors raised while parsing or applying a path.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("invalid path {path:?}: {reason}")]
    Syntax { path: String, reason: &'static str },

    #[error("key {0:?} not found")]
    KeyNotFound(String),

    #[error("index {0} out of range")]
    IndexOutOfRange(i64),

    #[error("cannot apply {segment} to a {found}")]
    TypeMismatch { segment: String, found: &'static str },

    #[error("document is not valid JSON")]
    InvalidDocument(#[source] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(i64),
    Wildcard,
    Slice(Option<i64>, Option<i64>),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "['{key}']"),
            Self::Index(index) => write!(f, "[{index}]"),
            Self::Wildcard => f.write_str("[*]"),
            Self::Slice(start, end) => {
                f.write_str("[")?;
                if let Some(start) = start {
                    write!(f, "{start}")?;
                }
                f.write_str(":")?;
                if let Some(end) = end {
                    write!(f, "{end}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// A parsed path, reusable across documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    segments: Vec<Segment>,
}

impl JsonPath {
    /// Parse a path such as `$.sensors[0].value`.
    ///
    /// # Errors
    ///
    /// Returns [`PathError::Syntax`] when the path does not start with `$`
    /// or contains an unterminated or malformed segment.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let syntax = |reason| PathError::Syntax {
            path: path.to_string(),
            reason,
        };

        let rest = path
            .trim()
            .strip_prefix('$')
            .ok_or_else(|| syntax("must start with '$'"))?;
        let chars: Vec<char> = rest.chars().collect();
        let mut segments = Vec::new();
        let mut pos = 0;

        while pos < chars.len() {
            match chars[pos] {
                '.' => {
                    pos += 1;
                    if chars.get(pos) == Some(&'*') {
                        segments.push(Segment::Wildcard);
                        pos += 1;
                        continue;
                    }
                    let start = pos;
                    while pos < chars.len() && chars[pos] != '.' && chars[pos] != '[' {
                        pos += 1;
                    }
                    if start == pos {
                        return Err(syntax("empty member name"));
                    }
                    segments.push(Segment::Key(chars[start..pos].iter().collect()));
                }
                '[' => {
                    let close = chars[pos..]
                        .iter()
                        .position(|c| *c == ']')
                        .map(|offset| pos + offset)
                        .ok_or_else(|| syntax("unterminated '['"))?;
                    let inner: String = chars[pos + 1..close].iter().collect();
                    segments.push(parse_bracket(inner.trim()).ok_or_else(|| syntax("bad bracket"))?);
                    pos = close + 1;
                }
                _ => return Err(syntax("expected '.' or '['")),
            }
        }

        Ok(Self { segments })
    }

    /// Apply the path to a parsed document.
    ///
    /// # Errors
    ///
    /// Returns a lookup error when a member or index is missing on a
    /// single-valued path, or when a segment meets the wrong JSON type.
    pub fn select(&self, document: &Value) -> Result<Value, PathError> {
        let mut current: Vec<&Value> = vec![document];
        let mut many = false;

        for segment in &self.segments {
            let mut next = Vec::new();
            for node in current {
                match segment {
                    Segment::Key(key) => match node {
                        Value::Object(map) => match map.get(key) {
                            Some(child) => next.push(child),
                            None if many => {}
                            None => return Err(PathError::KeyNotFound(key.clone())),
                        },
                        _ if many => {}
                        other => return Err(mismatch(segment, other)),
                    },
                    Segment::Index(index) => match node {
                        Value::Array(items) => match resolve_index(*index, items.len()) {
                            Some(at) => next.push(&items[at]),
                            None if many => {}
                            None => return Err(PathError::IndexOutOfRange(*index)),
                        },
                        _ if many => {}
                        other => return Err(mismatch(segment, other)),
                    },
                    Segment::Wildcard => match node {
                        Value::Array(items) => next.extend(items.iter()),
                        Value::Object(map) => next.extend(map.values()),
                        _ => {}
                    },
                    Segment::Slice(start, end) => {
                        if let Value::Array(items) = node {
                            let len = items.len();
                            let from = clamp_bound(start.unwrap_or(0), len);
                            let to = end.map_or(len, |end| clamp_bound(end, len));
                            if from < to {
                                next.extend(items[from..to].iter());
                            }
                        }
                    }
                }
            }
            if matches!(segment, Segment::Wildcard | Segment::Slice(..)) {
                many = true;
            }
            current = next;
        }

        if many {
            return Ok(Value::Array(current.into_iter().cloned().collect()));
        }
        current
            .first()
            .map(|value| (*value).clone())
            .ok_or_else(|| PathError::KeyNotFound(String::new()))
    }
}

/// Parse `document` as JSON and select `path` from it.
///
/// # Errors
///
/// Returns [`PathError::InvalidDocument`] for non-JSON input, or any error
/// from [`JsonPath::parse`] and [`JsonPath::select`].
pub fn lookup(document: &str, path: &str) -> Result<Value, PathError> {
    let path = JsonPath::parse(path)?;
    let document: Value = serde_json::from_str(document).map_err(PathError::InvalidDocument)?;
    path.select(&document)
}

fn parse_bracket(inner: &str) -> Option<Segment> {
    if inner == "*" {
        return Some(Segment::Wildcard);
    }
    for quote in ['\'', '"'] {
        if let Some(key) = inner
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return Some(Segment::Key(key.to_string()));
        }
    }
    if let Some((start, end)) = inner.split_once(':') {
        let bound = |text: &str| -> Option<Option<i64>> {
            let text = text.trim();
            if text.is_empty() {
                Some(None)
            } else {
                text.parse().ok().map(Some)
            }
        };
        return Some(Segment::Slice(bound(start)?, bound(end)?));
    }
    inner.parse().ok().map(Segment::Index)
}

fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let at = if index < 0 { len + index } else { index };
    if (0..len).contains(&at) {
        usize::try_from(at).ok()
    } else {
        None
    }
}

fn clamp_bound(bound: i64, len: usize) -> usize {
    let signed_len = i64::try_from(len).unwrap_or(i64::MAX);
    let at = if bound < 0 { signed_len + bound } else { bound };
    usize::try_from(at.clamp(0, signed_len)).unwrap_or(len)
}

fn mismatch(segment: &Segment, found: &Value) -> PathError {
    let found = match found {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    PathError::TypeMismatch {
        segment: segment.to_string(),
        found,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "value": 99,
            "state": {"power": "on", "brightness": 0.75},
            "sensors": [
                {"name": "hall", "temp": 19.5},
                {"name": "kitchen", "temp": 22.0},
                {"name": "attic", "temp": 14.25}
            ],
            "odd key": true
        })
    }

    #[test]
    fn should_return_whole_document_for_root() {
        let path = JsonPath::parse("$").unwrap();
        assert_eq!(path.select(&doc()).unwrap(), doc());
    }

    #[test]
    fn should_select_top_level_member() {
        assert_eq!(lookup(r#"{"value":99}"#, "$.value").unwrap(), json!(99));
    }

    #[test]
    fn should_select_nested_member() {
        let path = JsonPath::parse("$.state.power").unwrap();
        assert_eq!(path.select(&doc()).unwrap(), json!("on"));
    }

    #[test]
    fn should_select_quoted_member() {
        let path = JsonPath::parse("$['odd key']").unwrap();
        assert_eq!(path.select(&doc()).unwrap(), json!(true));
    }

    #[test]
    fn should_select_array_element_by_index() {
        let path = JsonPath::parse("$.sensors[1].name").unwrap();
        assert_eq!(path.select(&doc()).unwrap(), json!("kitchen"));
    }

    #[test]
    fn should_count_negative_index_from_end() {
        let path = JsonPath::parse("$.sensors[-1].temp").unwrap();
        assert_eq!(path.select(&doc()).unwrap(), json!(14.25));
    }

    #[test]
    fn should_collect_wildcard_matches_into_array() {
        let path = JsonPath::parse("$.sensors[*].name").unwrap();
        assert_eq!(
            path.select(&doc()).unwrap(),
            json!(["hall", "kitchen", "attic"])
        );
    }

    #[test]
    fn should_collect_slice_matches_into_array() {
        let path = JsonPath::parse("$.sensors[0:2].temp").unwrap();
        assert_eq!(path.select(&doc()).unwrap(), json!([19.5, 22.0]));
    }

    #[test]
    fn should_fail_when_member_missing() {
        let err = lookup(r#"{"other":1}"#, "$.value").unwrap_err();
        assert!(matches!(err, PathError::KeyNotFound(key) if key == "value"));
    }

    #[test]
    fn should_fail_when_index_out_of_range() {
        let path = JsonPath::parse("$.sensors[7]").unwrap();
        assert!(matches!(
            path.select(&doc()),
            Err(PathError::IndexOutOfRange(7))
        ));
    }

    #[test]
    fn should_fail_when_member_applied_to_scalar() {
        let path = JsonPath::parse("$.value.deeper").unwrap();
        assert!(matches!(
            path.select(&doc()),
            Err(PathError::TypeMismatch { found: "number", .. })
        ));
    }

    #[test]
    fn should_fail_on_invalid_document() {
        assert!(matches!(
            lookup("not json", "$.value"),
            Err(PathError::InvalidDocument(_))
        ));
    }

    #[test]
    fn should_reject_path_without_root() {
        assert!(matches!(
            JsonPath::parse("value"),
            Err(PathError::Syntax { .. })
        ));
    }

    #[test]
    fn should_reject_unterminated_bracket() {
        assert!(matches!(
            JsonPath::parse("$.sensors[0"),
            Err(PathError::Syntax { .. })
        ));
    }
}
