// Tests for the flow bundle writer

use std::fs;

use skitter_core::bundle::{write_bundle, write_response, BundleMeta};
use skitter_core::httputil::split_headers_body;

fn meta(body_size: usize) -> BundleMeta {
    BundleMeta {
        bundle_id: "bundle1".to_string(),
        source_flow_id: "flow1".to_string(),
        captured_at: "2026-01-02T03:04:05+00:00".to_string(),
        url: "http://example.com/a?x=1".to_string(),
        method: "GET".to_string(),
        body_is_utf8: true,
        body_size,
    }
}

#[test]
fn test_bundle_round_trip() {
    let dir = std::env::temp_dir().join(format!("skitter-bundle-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);

    let req_headers = b"GET /a?x=1 HTTP/1.1\r\nHost: example.com\r\nX-Auth: tok";
    let req_body = b"param=value";
    write_bundle(&dir, req_headers, req_body, &meta(req_body.len())).unwrap();

    let resp_headers = b"HTTP/1.1 200 OK\r\nContent-Type: text/html";
    let resp_body = b"<html>ok</html>";
    write_response(&dir, resp_headers, resp_body).unwrap();

    // Request headers survive the round trip before the first blank line
    let request_http = fs::read(dir.join("request.http")).unwrap();
    let (headers, _) = split_headers_body(&request_http);
    assert_eq!(headers, req_headers.as_slice());

    // Raw bodies are written verbatim
    assert_eq!(fs::read(dir.join("body")).unwrap(), req_body);
    assert_eq!(fs::read(dir.join("response.body")).unwrap(), resp_body);

    let response_http = fs::read(dir.join("response.http")).unwrap();
    let (headers, rest) = split_headers_body(&response_http);
    assert_eq!(headers, resp_headers.as_slice());
    assert!(rest.is_empty());

    let meta_json: serde_json::Value =
        serde_json::from_slice(&fs::read(dir.join("request.meta.json")).unwrap()).unwrap();
    assert_eq!(meta_json["bundle_id"], "bundle1");
    assert_eq!(meta_json["method"], "GET");
    assert_eq!(meta_json["body_size"], req_body.len());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_bundle_empty_body_has_no_placeholder() {
    let dir = std::env::temp_dir().join(format!("skitter-bundle-empty-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);

    let req_headers = b"GET / HTTP/1.1\r\nHost: example.com";
    write_bundle(&dir, req_headers, b"", &meta(0)).unwrap();

    let request_http = fs::read(dir.join("request.http")).unwrap();
    let (_, rest) = split_headers_body(&request_http);
    assert!(rest.is_empty());
    assert!(fs::read(dir.join("body")).unwrap().is_empty());

    let _ = fs::remove_dir_all(&dir);
}
