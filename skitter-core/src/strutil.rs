/// Maximum path length shown in summary aggregate output.
pub const MAX_PATH_LENGTH: usize = 80;

/// Ensures the returned string is at most `max_len` characters, truncating
/// and adding a "..." suffix if necessary.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len || max_len < 3 {
        return s.to_string();
    }
    format!("{}...", &s[..max_len - 3])
}

/// Normalizes a request path for summary aggregation: the query string is
/// dropped so `/items?page=1` and `/items?page=2` collapse into one entry.
pub fn normalize_path(path: &str) -> String {
    match path.split_once('?') {
        Some((p, _)) => p.to_string(),
        None => path.to_string(),
    }
}
