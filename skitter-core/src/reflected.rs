//! Reflected-parameter detection: extract every parameter a request carries
//! (query, form/multipart body, JSON body, cookies, headers) and search the
//! response for each value in its common encoded forms.

use regex::Regex;
use serde_json::Value;
use url::form_urlencoded;

use crate::httputil::split_headers_body;

/// Parameter values this short produce too many false positives to report.
const MIN_VALUE_LENGTH: usize = 4;

/// Characters replaced by the HTML numeric-entity and JS-escape variants.
const ESCAPE_CHARS: &[char] = &['<', '>', '&', '"', '\'', '/'];

/// One request parameter observed in the response.
#[derive(Debug, Clone, PartialEq)]
pub struct Reflection {
    pub name: String,
    /// Where the parameter came from: `query`, `body`, `json`, `cookie`,
    /// or `header`.
    pub source: String,
    pub value: String,
    /// `body` and/or `header:<Name>` entries.
    pub locations: Vec<String>,
}

/// Finds request parameters reflected in the response, sorted by
/// `(source, name)`.
pub fn find_reflected(request: &[u8], response: &[u8]) -> Vec<Reflection> {
    find_reflections(extract_params(request), response)
}

/// Extracts all parameters from a raw HTTP request. Locations are left
/// empty; `find_reflections` fills them in.
pub fn extract_params(raw: &[u8]) -> Vec<Reflection> {
    let (headers, body) = split_headers_body(raw);
    let header_text = String::from_utf8_lossy(headers);
    let mut lines = header_text.lines();

    let mut params = Vec::new();

    // Query string from the request line
    if let Some(request_line) = lines.next() {
        if let Some(target) = request_line.split_whitespace().nth(1) {
            if let Some((_, query)) = target.split_once('?') {
                for (name, value) in form_urlencoded::parse(query.as_bytes()) {
                    params.push(param(&name, "query", &value));
                }
            }
        }
    }

    // Headers: cookies get split into pairs, everything else is one
    // parameter per header
    let mut content_type = String::new();
    for line in lines {
        let (name, value) = match line.split_once(':') {
            Some((n, v)) => (n.trim(), v.trim()),
            None => continue,
        };
        if name.eq_ignore_ascii_case("content-type") {
            content_type = value.to_string();
        }
        if name.eq_ignore_ascii_case("cookie") {
            for pair in value.split(';') {
                if let Some((ck, cv)) = pair.trim().split_once('=') {
                    params.push(param(ck.trim(), "cookie", cv.trim()));
                }
            }
        } else {
            params.push(param(name, "header", value));
        }
    }

    // Body, by content type; the boundary token keeps its original case
    let ct_lower = content_type.to_lowercase();
    if !body.is_empty() {
        if ct_lower.starts_with("application/x-www-form-urlencoded") {
            for (name, value) in form_urlencoded::parse(body) {
                params.push(param(&name, "body", &value));
            }
        } else if ct_lower.starts_with("application/json") {
            if let Ok(json) = serde_json::from_slice::<Value>(body) {
                flatten_json("", &json, &mut params);
            }
        } else if ct_lower.starts_with("multipart/form-data") {
            if let Some(boundary) = extract_boundary(&content_type) {
                extract_multipart(body, &boundary, &mut params);
            }
        }
    }

    params
}

/// Searches the response for each parameter value and returns the reflected
/// ones with their locations, sorted by `(source, name)`.
pub fn find_reflections(params: Vec<Reflection>, response: &[u8]) -> Vec<Reflection> {
    let (resp_headers, resp_body) = split_headers_body(response);
    let body_text = String::from_utf8_lossy(resp_body);
    let headers = parse_response_headers(resp_headers);

    let mut reflections = Vec::new();
    for p in params {
        if p.value.len() < MIN_VALUE_LENGTH {
            continue;
        }

        let variants = encoding_variants(&p.value);
        let mut locations = Vec::new();
        if matches_any(&body_text, &variants) {
            locations.push("body".to_string());
        }
        for (name, value) in &headers {
            if matches_any(value, &variants) {
                let loc = format!("header:{}", name);
                if !locations.contains(&loc) {
                    locations.push(loc);
                }
            }
        }

        if !locations.is_empty() {
            reflections.push(Reflection { locations, ..p });
        }
    }

    reflections.sort_by(|a, b| a.source.cmp(&b.source).then_with(|| a.name.cmp(&b.name)));
    reflections
}

fn param(name: &str, source: &str, value: &str) -> Reflection {
    Reflection {
        name: name.to_string(),
        source: source.to_string(),
        value: value.to_string(),
        locations: Vec::new(),
    }
}

/// Flattens a JSON value into dotted/indexed parameter names: `a.b.c` for
/// object fields, `name[i]` for array elements.
fn flatten_json(prefix: &str, value: &Value, out: &mut Vec<Reflection>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                let name = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_json(&name, v, out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_json(&format!("{}[{}]", prefix, i), v, out);
            }
        }
        Value::String(s) => out.push(param(prefix, "json", s)),
        Value::Number(n) => out.push(param(prefix, "json", &n.to_string())),
        Value::Bool(b) => out.push(param(prefix, "json", if *b { "true" } else { "false" })),
        Value::Null => {}
    }
}

fn extract_boundary(content_type: &str) -> Option<String> {
    for part in content_type.split(';') {
        let part = part.trim();
        if let Some(prefix) = part.get(..9) {
            if prefix.eq_ignore_ascii_case("boundary=") {
                return Some(part[9..].trim_matches('"').to_string());
            }
        }
    }
    None
}

/// Pulls non-file parts out of a multipart body. Parts carrying a
/// `filename=` attribute are uploads and are skipped.
fn extract_multipart(body: &[u8], boundary: &str, out: &mut Vec<Reflection>) {
    let text = String::from_utf8_lossy(body);
    let marker = format!("--{}", boundary);

    for chunk in text.split(marker.as_str()) {
        let chunk = chunk.trim_start_matches("\r\n");
        if chunk.is_empty() || chunk.starts_with("--") {
            continue;
        }
        let (part_headers, part_body) = match chunk.split_once("\r\n\r\n") {
            Some(split) => split,
            None => continue,
        };

        let mut name = None;
        let mut is_file = false;
        for line in part_headers.lines() {
            if !line.to_lowercase().starts_with("content-disposition:") {
                continue;
            }
            is_file = line.contains("filename=");
            for attr in line.split(';') {
                let attr = attr.trim();
                if let Some(v) = attr.strip_prefix("name=") {
                    name = Some(v.trim_matches('"').to_string());
                }
            }
        }

        if let Some(name) = name {
            if !is_file {
                out.push(param(&name, "body", part_body.trim_end_matches("\r\n")));
            }
        }
    }
}

/// Parses response headers into `(name, combined value)` pairs. Repeated
/// headers are folded into one comma-joined value.
fn parse_response_headers(raw: &[u8]) -> Vec<(String, String)> {
    let text = String::from_utf8_lossy(raw);
    let mut headers: Vec<(String, String)> = Vec::new();

    for line in text.lines().skip(1) {
        let (name, value) = match line.split_once(':') {
            Some((n, v)) => (n.trim().to_string(), v.trim().to_string()),
            None => continue,
        };
        match headers.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => {
                existing.push_str(", ");
                existing.push_str(&value);
            }
            None => headers.push((name, value)),
        }
    }

    headers
}

/// One searchable form of a parameter value.
enum Variant {
    Literal(String),
    Pattern(Regex),
}

fn matches_any(text: &str, variants: &[Variant]) -> bool {
    variants.iter().any(|v| match v {
        Variant::Literal(s) => text.contains(s.as_str()),
        Variant::Pattern(re) => re.is_match(text),
    })
}

/// Builds the encoded forms a reflected value may take in a response:
/// raw, HTML-entity escaped, HTML numeric entities (decimal and hex),
/// URL-encoded (`+` and `%20` space variants), and JS `\uXXXX`/`\xXX`
/// escapes with case-insensitive hex digits.
fn encoding_variants(value: &str) -> Vec<Variant> {
    let mut variants = vec![Variant::Literal(value.to_string())];

    let html = html_entity_escape(value);
    if html != value {
        variants.push(Variant::Literal(html));
    }

    if value.contains(ESCAPE_CHARS) {
        variants.push(Variant::Literal(numeric_entity_escape(value, false)));
        variants.push(Variant::Literal(numeric_entity_escape(value, true)));
        if let Some(re) = js_escape_pattern(value, "\\\\u00") {
            variants.push(Variant::Pattern(re));
        }
        if let Some(re) = js_escape_pattern(value, "\\\\x") {
            variants.push(Variant::Pattern(re));
        }
    }

    let form_encoded: String = form_urlencoded::byte_serialize(value.as_bytes()).collect();
    if form_encoded != value {
        variants.push(Variant::Literal(form_encoded.replace('+', "%20")));
        variants.push(Variant::Literal(form_encoded));
    }

    variants
}

fn html_entity_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn numeric_entity_escape(value: &str, hex: bool) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if ESCAPE_CHARS.contains(&c) {
            if hex {
                out.push_str(&format!("&#x{:x};", c as u32));
            } else {
                out.push_str(&format!("&#{};", c as u32));
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Builds a regex matching the value with every escapable character in its
/// JS-escaped form (`prefix` + two hex digits), hex letters matched in
/// either case. Returns None when the pattern fails to compile.
fn js_escape_pattern(value: &str, prefix: &str) -> Option<Regex> {
    let mut pattern = String::new();
    for c in value.chars() {
        if ESCAPE_CHARS.contains(&c) {
            pattern.push_str(prefix);
            for hex_digit in format!("{:02x}", c as u32).chars() {
                if hex_digit.is_ascii_alphabetic() {
                    pattern.push('[');
                    pattern.push(hex_digit);
                    pattern.push(hex_digit.to_ascii_uppercase());
                    pattern.push(']');
                } else {
                    pattern.push(hex_digit);
                }
            }
        } else {
            pattern.push_str(&regex::escape(&c.to_string()));
        }
    }
    Regex::new(&pattern).ok()
}
