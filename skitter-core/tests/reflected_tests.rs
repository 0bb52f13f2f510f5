// Tests for reflected-parameter extraction and matching

use skitter_core::reflected::{extract_params, find_reflected, find_reflections, Reflection};

fn param(name: &str, source: &str, value: &str) -> Reflection {
    Reflection {
        name: name.to_string(),
        source: source.to_string(),
        value: value.to_string(),
        locations: Vec::new(),
    }
}

fn find_by_name<'a>(reflections: &'a [Reflection], name: &str) -> Option<&'a Reflection> {
    reflections.iter().find(|r| r.name == name)
}

// ============================================================================
// Parameter Extraction Tests
// ============================================================================

#[test]
fn test_extract_query_params() {
    let raw = b"GET /search?q=hello&page=1 HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let params = extract_params(raw);
    assert!(params
        .iter()
        .any(|p| p.name == "q" && p.source == "query" && p.value == "hello"));
}

#[test]
fn test_extract_url_decoded_query() {
    let raw = b"GET /search?q=%3Cscript%3E HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let params = extract_params(raw);
    assert!(params
        .iter()
        .any(|p| p.name == "q" && p.source == "query" && p.value == "<script>"));
}

#[test]
fn test_extract_form_body() {
    let raw = b"POST /login HTTP/1.1\r\nHost: example.com\r\nContent-Type: application/x-www-form-urlencoded\r\n\r\nuser=alice&pass=secret";
    let params = extract_params(raw);
    assert!(params
        .iter()
        .any(|p| p.name == "user" && p.source == "body" && p.value == "alice"));
    assert!(params
        .iter()
        .any(|p| p.name == "pass" && p.source == "body" && p.value == "secret"));
}

#[test]
fn test_extract_json_body_flattened() {
    let raw = concat!(
        "POST /api HTTP/1.1\r\nHost: example.com\r\nContent-Type: application/json\r\n\r\n",
        r#"{"user":{"name":"alice","active":true},"count":5,"items":["one","two"]}"#
    )
    .as_bytes();
    let params = extract_params(raw);

    let json: Vec<&Reflection> = params.iter().filter(|p| p.source == "json").collect();
    let value_of = |name: &str| {
        json.iter()
            .find(|p| p.name == name)
            .map(|p| p.value.clone())
            .unwrap_or_default()
    };

    assert_eq!(value_of("user.name"), "alice");
    assert_eq!(value_of("items[0]"), "one");
    assert_eq!(value_of("items[1]"), "two");
    assert_eq!(value_of("user.active"), "true");
    assert_eq!(value_of("count"), "5");
}

#[test]
fn test_extract_cookies() {
    let raw = b"GET / HTTP/1.1\r\nHost: example.com\r\nCookie: session=abc123; theme=dark\r\n\r\n";
    let params = extract_params(raw);

    assert!(params
        .iter()
        .any(|p| p.name == "session" && p.source == "cookie" && p.value == "abc123"));
    assert!(params
        .iter()
        .any(|p| p.name == "theme" && p.source == "cookie" && p.value == "dark"));
}

#[test]
fn test_extract_headers() {
    let raw = b"GET / HTTP/1.1\r\nHost: example.com\r\nReferer: https://evil.com\r\nX-Custom: test-value\r\n\r\n";
    let params = extract_params(raw);

    assert!(params
        .iter()
        .any(|p| p.name == "Referer" && p.source == "header" && p.value == "https://evil.com"));
    assert!(params
        .iter()
        .any(|p| p.name == "X-Custom" && p.source == "header" && p.value == "test-value"));
}

#[test]
fn test_extract_multipart_body_skips_files() {
    let body = "--boundary\r\nContent-Disposition: form-data; name=\"field1\"\r\n\r\nvalue1\r\n\
                --boundary\r\nContent-Disposition: form-data; name=\"file\"; filename=\"test.txt\"\r\nContent-Type: text/plain\r\n\r\nfile content\r\n\
                --boundary\r\nContent-Disposition: form-data; name=\"field2\"\r\n\r\nvalue2\r\n\
                --boundary--\r\n";
    let raw = format!(
        "POST /upload HTTP/1.1\r\nHost: example.com\r\nContent-Type: multipart/form-data; boundary=boundary\r\n\r\n{}",
        body
    );
    let params = extract_params(raw.as_bytes());

    assert!(params
        .iter()
        .any(|p| p.name == "field1" && p.source == "body" && p.value == "value1"));
    assert!(params
        .iter()
        .any(|p| p.name == "field2" && p.source == "body" && p.value == "value2"));
    assert!(!params.iter().any(|p| p.name == "file"));
}

#[test]
fn test_extract_no_body() {
    let raw = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let params = extract_params(raw);
    assert!(params.iter().all(|p| p.source != "body" && p.source != "json"));
}

// ============================================================================
// Reflection Matching Tests
// ============================================================================

#[test]
fn test_literal_match() {
    let params = vec![param("q", "query", "hello world")];
    let resp = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n<p>hello world</p>";

    let reflections = find_reflections(params, resp);
    assert_eq!(reflections.len(), 1);
    assert_eq!(reflections[0].name, "q");
    assert!(reflections[0].locations.contains(&"body".to_string()));
}

#[test]
fn test_html_encoded_match() {
    let params = vec![param("q", "query", "<script>alert(1)</script>")];
    let resp =
        b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n<p>&lt;script&gt;alert(1)&lt;/script&gt;</p>";

    let reflections = find_reflections(params, resp);
    assert_eq!(reflections.len(), 1);
    assert!(reflections[0].locations.contains(&"body".to_string()));
}

#[test]
fn test_url_encoded_match() {
    let params = vec![param("path", "query", "/foo bar/baz")];
    let resp = b"HTTP/1.1 200 OK\r\n\r\nRedirect to %2Ffoo+bar%2Fbaz";

    let reflections = find_reflections(params, resp);
    assert_eq!(reflections.len(), 1);
    assert!(reflections[0].locations.contains(&"body".to_string()));
}

#[test]
fn test_js_unicode_match() {
    let params = vec![param("cb", "query", "test<img>")];
    let resp = b"HTTP/1.1 200 OK\r\n\r\ntest\\u003cimg\\u003e({\"data\":1})";

    let reflections = find_reflections(params, resp);
    assert_eq!(reflections.len(), 1);
    assert!(reflections[0].locations.contains(&"body".to_string()));
}

#[test]
fn test_js_unicode_uppercase_match() {
    let params = vec![param("cb", "query", "test<img>")];
    let resp = b"HTTP/1.1 200 OK\r\n\r\ntest\\u003Cimg\\u003E({\"data\":1})";

    let reflections = find_reflections(params, resp);
    assert_eq!(reflections.len(), 1);
}

#[test]
fn test_js_hex_escape_match() {
    let params = vec![param("cb", "query", "test<img>")];
    let resp = b"HTTP/1.1 200 OK\r\n\r\ntest\\x3cimg\\x3e({\"data\":1})";

    let reflections = find_reflections(params, resp);
    assert_eq!(reflections.len(), 1);
}

#[test]
fn test_html_decimal_entity_match() {
    let params = vec![param("q", "query", "<b>test</b>")];
    let resp = b"HTTP/1.1 200 OK\r\n\r\n&#60;b&#62;test&#60;&#47;b&#62;";

    let reflections = find_reflections(params, resp);
    assert_eq!(reflections.len(), 1);
}

#[test]
fn test_html_hex_entity_match() {
    let params = vec![param("q", "query", "<b>test</b>")];
    let resp = b"HTTP/1.1 200 OK\r\n\r\n&#x3c;b&#x3e;test&#x3c;&#x2f;b&#x3e;";

    let reflections = find_reflections(params, resp);
    assert_eq!(reflections.len(), 1);
}

#[test]
fn test_header_reflection() {
    let params = vec![param("redirect", "query", "https://evil.com")];
    let resp = b"HTTP/1.1 302 Found\r\nLocation: https://evil.com\r\n\r\n";

    let reflections = find_reflections(params, resp);
    assert_eq!(reflections.len(), 1);
    assert!(reflections[0]
        .locations
        .contains(&"header:Location".to_string()));
}

#[test]
fn test_encoded_header_reflection() {
    // Path-style escaping uses %20 where form encoding would use +
    let params = vec![param("next", "query", "/foo bar")];
    let resp = b"HTTP/1.1 302 Found\r\nLocation: /redir?next=%2Ffoo%20bar\r\n\r\n";

    let reflections = find_reflections(params, resp);
    assert_eq!(reflections.len(), 1);
    assert!(reflections[0]
        .locations
        .contains(&"header:Location".to_string()));
}

#[test]
fn test_body_and_header_locations() {
    let params = vec![param("val", "query", "reflected_value")];
    let resp = b"HTTP/1.1 200 OK\r\nX-Echo: reflected_value\r\n\r\nBody: reflected_value";

    let reflections = find_reflections(params, resp);
    assert_eq!(reflections.len(), 1);
    assert!(reflections[0].locations.contains(&"body".to_string()));
    assert!(reflections[0]
        .locations
        .contains(&"header:X-Echo".to_string()));
}

#[test]
fn test_short_values_skipped() {
    let params = vec![
        param("a", "query", "ab"),
        param("b", "query", "abc"),
        param("c", "query", "abcd"),
    ];
    let resp = b"HTTP/1.1 200 OK\r\n\r\nab abc abcd";

    let reflections = find_reflections(params, resp);
    assert_eq!(reflections.len(), 1);
    assert_eq!(reflections[0].name, "c");
}

#[test]
fn test_no_match() {
    let params = vec![param("q", "query", "not-in-response")];
    let resp = b"HTTP/1.1 200 OK\r\n\r\nsomething else entirely";

    let reflections = find_reflections(params, resp);
    assert!(reflections.is_empty());
}

#[test]
fn test_sorted_output() {
    let params = vec![
        param("z_param", "query", "test_value"),
        param("a_param", "query", "test_value"),
        param("cookie_val", "cookie", "test_value"),
    ];
    let resp = b"HTTP/1.1 200 OK\r\n\r\ntest_value";

    let reflections = find_reflections(params, resp);
    assert_eq!(reflections.len(), 3);
    // Sorted by source then name: cookie < query, a_param < z_param
    assert_eq!(reflections[0].source, "cookie");
    assert_eq!(reflections[1].source, "query");
    assert_eq!(reflections[1].name, "a_param");
    assert_eq!(reflections[2].name, "z_param");
}

// ============================================================================
// End-to-end find_reflected Tests
// ============================================================================

#[test]
fn test_query_cookie_header_reflection() {
    let request = b"GET /search?q=%3Cscript%3Ealert(1)%3C%2Fscript%3E&redirect=https://evil.com&page=2 HTTP/1.1\r\n\
        Host: example.com\r\n\
        Cookie: session=abc123test; lang=en\r\n\
        Referer: https://evil.com\r\n\r\n";
    let response = b"HTTP/1.1 302 Found\r\n\
        Content-Type: text/html\r\n\
        Location: https://evil.com\r\n\
        Set-Cookie: session=abc123test; Path=/\r\n\r\n\
        <html>Results for &lt;script&gt;alert(1)&lt;/script&gt;</html>";

    let reflections = find_reflected(request, response);

    let q = find_by_name(&reflections, "q").expect("q reflected");
    assert_eq!(q.source, "query");
    assert!(q.locations.contains(&"body".to_string()));

    let redirect = find_by_name(&reflections, "redirect").expect("redirect reflected");
    assert_eq!(redirect.source, "query");
    assert!(redirect.locations.contains(&"header:Location".to_string()));

    let session = find_by_name(&reflections, "session").expect("session reflected");
    assert_eq!(session.source, "cookie");
    assert!(session
        .locations
        .contains(&"header:Set-Cookie".to_string()));

    // page=2 and lang=en are too short and skipped
    assert!(find_by_name(&reflections, "page").is_none());
    assert!(find_by_name(&reflections, "lang").is_none());

    let referer = find_by_name(&reflections, "Referer").expect("Referer reflected");
    assert_eq!(referer.source, "header");
    assert!(referer.locations.contains(&"header:Location".to_string()));
}

#[test]
fn test_json_body_reflection() {
    let request = concat!(
        "POST /api/users HTTP/1.1\r\nHost: api.example.com\r\nContent-Type: application/json\r\n\r\n",
        r#"{"user":{"email":"test@example.com","role":"admin","id":12345},"tags":["security","testing"]}"#
    )
    .as_bytes();
    let response = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n\
        <p>User 12345 test@example.com has role admin. Tags: security, testing</p>";

    let reflections = find_reflected(request, response);

    let email = find_by_name(&reflections, "user.email").expect("email reflected");
    assert_eq!(email.source, "json");
    assert_eq!(email.value, "test@example.com");
    assert!(email.locations.contains(&"body".to_string()));

    let id = find_by_name(&reflections, "user.id").expect("id reflected");
    assert_eq!(id.source, "json");
    assert_eq!(id.value, "12345");

    assert!(find_by_name(&reflections, "tags[0]").is_some());
    assert!(find_by_name(&reflections, "tags[1]").is_some());
}

#[test]
fn test_no_reflections() {
    let request = b"GET /safe?token=abcdef HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let response = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n<html>Welcome</html>";

    let reflections = find_reflected(request, response);
    assert!(find_by_name(&reflections, "token").is_none());
}

#[test]
fn test_form_body_reflection() {
    let request = b"POST /login HTTP/1.1\r\nHost: example.com\r\nContent-Type: application/x-www-form-urlencoded\r\n\r\nusername=admin%40example.com&password=secret1234";
    let response =
        b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n<html>Welcome admin@example.com</html>";

    let reflections = find_reflected(request, response);

    let username = find_by_name(&reflections, "username").expect("username reflected");
    assert_eq!(username.source, "body");
    assert_eq!(username.value, "admin@example.com");
    assert!(username.locations.contains(&"body".to_string()));

    assert!(find_by_name(&reflections, "password").is_none());
}
