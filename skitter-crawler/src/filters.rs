//! Scope, path, and content-type filtering.

use regex::Regex;
use tracing::warn;

/// Content-type prefixes the crawler stores flows for. Everything else is
/// dropped after the fetch.
const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "text/",
    "application/json",
    "application/xml",
    "application/javascript",
    "application/x-javascript",
];

/// Empty content types are allowed so HTML pages served without an explicit
/// type still get captured.
pub fn is_allowed_content_type(ct: &str) -> bool {
    if ct.is_empty() {
        return true;
    }
    let ct = ct.to_lowercase();
    ALLOWED_CONTENT_TYPES
        .iter()
        .any(|allowed| ct.starts_with(allowed))
}

/// Compiles glob patterns (`*` and `?` are the only meta-characters) into
/// regexes. An invalid pattern is logged and skipped rather than failing
/// the session: patterns come from config defaults the user cannot easily
/// fix at runtime.
pub fn globs_to_regexes(patterns: &[String]) -> Vec<Regex> {
    let mut result = Vec::with_capacity(patterns.len());
    for p in patterns {
        let escaped = regex::escape(p).replace("\\*", ".*").replace("\\?", ".");
        match Regex::new(&escaped) {
            Ok(re) => result.push(re),
            Err(e) => warn!("ignoring invalid path pattern {:?}: {}", p, e),
        }
    }
    result
}

pub fn matches_any_regex(s: &str, regexes: &[Regex]) -> bool {
    regexes.iter().any(|re| re.is_match(s))
}

/// Builds URL filters that match a domain and any subdomain of it.
/// "example.com" matches example.com, sub.example.com, a.b.example.com,
/// with an optional port.
pub fn build_domain_filters(domains: &[String]) -> Vec<Regex> {
    let mut filters = Vec::with_capacity(domains.len());
    for d in domains {
        let escaped = regex::escape(d);
        let pattern = format!(r"^https?://(([^/]+\.)*{})(:[0-9]+)?(/|$)", escaped);
        match Regex::new(&pattern) {
            Ok(re) => filters.push(re),
            Err(e) => warn!("ignoring invalid domain filter {:?}: {}", d, e),
        }
    }
    filters
}

/// Simple glob match used by flow listing filters.
pub fn matches_glob(s: &str, pattern: &str) -> bool {
    let escaped = regex::escape(pattern)
        .replace("\\*", ".*")
        .replace("\\?", ".");
    match Regex::new(&format!("^{}$", escaped)) {
        Ok(re) => re.is_match(s),
        Err(_) => false,
    }
}
