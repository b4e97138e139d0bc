//! Payload templates with embedded `${expression}` spans.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\$\{(.*?)\}").expect("span pattern is a valid regex"));

/// Replace every `${...}` span in `template` with `substitute(inner_text)`.
///
/// Spans are matched leftmost and shortest, so `${a}${b}` holds two spans
/// and `${a{b}` is the single span `a{b`. A span may cross line breaks.
/// Substituted text is never scanned again.
pub fn expand<F>(template: &str, mut substitute: F) -> String
where
    F: FnMut(&str) -> String,
{
    SPAN.replace_all(template, |caps: &Captures<'_>| substitute(&caps[1]))
        .into_owned()
}
