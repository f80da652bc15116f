//! Path normalization for model-reported file references.
//!
//! Models cite files in many shapes: markdown links, URLs into a code
//! browser, git's `a/`/`b/` prefixes, backslashes. All of them should
//! resolve to the path as it appears in the diff.

/// Normalize a model-reported path into diff form.
pub fn normalize_path(raw: &str) -> String {
    let mut path = raw.trim();

    // Markdown link: take the target, [label](target)
    if let Some(open) = path.find("](") {
        if path.starts_with('[') && path.ends_with(')') {
            path = &path[open + 2..path.len() - 1];
        }
    }

    let mut path = path.replace('\\', "/");

    // URL into a code browser: keep everything after the tree/blob
    // segment and its ref, or after the host for plain file URLs.
    if path.starts_with("http://") || path.starts_with("https://") {
        path = strip_url(&path);
    }

    let mut p = path.as_str();
    p = p.trim_start_matches("./");
    if let Some(stripped) = p.strip_prefix("a/").or_else(|| p.strip_prefix("b/")) {
        p = stripped;
    }
    p = p.trim_start_matches('/');

    p.to_string()
}

/// Strip a repository-browser URL down to the in-repo path.
fn strip_url(url: &str) -> String {
    let without_scheme = url
        .trim_start_matches("https://")
        .trim_start_matches("http://");

    let mut segments = without_scheme.split('/');
    let _host = segments.next();
    let rest: Vec<&str> = segments.collect();

    // host/org/repo/{blob|tree}/<ref>/path...
    if rest.len() > 4 && matches!(rest[2], "blob" | "tree") {
        return rest[4..].join("/");
    }
    rest.join("/")
}

/// Find the diff file that `normalized` refers to, by exact match first
/// and then by unambiguous suffix match on path components.
///
/// Suffix matching lets `handler.rs` or `api/handler.rs` resolve to
/// `src/api/handler.rs`. An ambiguous suffix (two diff files share it)
/// resolves to nothing.
pub fn resolve_path<'a, I>(normalized: &str, diff_paths: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str> + Clone,
{
    if normalized.is_empty() {
        return None;
    }

    for candidate in diff_paths.clone() {
        if candidate == normalized {
            return Some(candidate.to_string());
        }
    }

    let wanted: Vec<&str> = normalized.split('/').collect();
    let mut matched: Option<&str> = None;
    for candidate in diff_paths {
        let parts: Vec<&str> = candidate.split('/').collect();
        if parts.len() >= wanted.len() && parts[parts.len() - wanted.len()..] == wanted[..] {
            if matched.is_some() {
                // Ambiguous, refuse to guess
                return None;
            }
            matched = Some(candidate);
        }
    }
    matched.map(str::to_string)
}
