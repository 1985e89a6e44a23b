//! Route path composition and validation.

use std::sync::LazyLock;

use regex::Regex;

/// A `:` that opens a named parameter: followed by an identifier start.
static PARAM_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":[A-Za-z_]").expect("Invalid regex"));

/// Joins path parts into one normalized path.
///
/// Each part is trimmed of leading and trailing slashes, empty parts are
/// dropped, and any part containing a scheme separator (`://`) is dropped
/// entirely. The result always starts with `/`.
#[must_use]
pub fn normalize_path<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let kept: Vec<String> = parts
        .into_iter()
        .filter(|part| !part.as_ref().contains("://"))
        .map(|part| part.as_ref().trim_matches('/').to_string())
        .filter(|part| !part.is_empty())
        .collect();
    format!("/{}", kept.join("/"))
}

/// Whether `path` may be installed as a route.
///
/// Rejects empty paths, paths not starting with `/`, scheme separators,
/// doubled slashes, and named-parameter markers not followed by an
/// identifier (`::`, trailing `:`, `:-x`).
#[must_use]
pub fn is_valid_path(path: &str) -> bool {
    if path.is_empty() || !path.starts_with('/') || path.contains("://") || path.contains("//") {
        return false;
    }
    path.matches(':').count() == PARAM_MARKER.find_iter(path).count()
}
