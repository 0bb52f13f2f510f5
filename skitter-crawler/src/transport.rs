//! Capturing HTTP transport: raw request/response bytes are dumped around
//! every round trip and parked in a per-session store, keyed by a
//! correlation ID that is stripped before anything touches the wire.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::{Client, Request, Response, Version};

use skitter_core::config;

use crate::error::Result;

/// Correlation header injected at request build time and removed here
/// before sending. Never reaches the remote server.
pub const CAPTURE_ID_HEADER: &str = "x-skitter-capture-id";

/// Raw bytes and timing captured around one round trip.
#[derive(Debug, Default)]
pub struct CapturedData {
    pub request: Vec<u8>,
    /// Response status line and headers, always complete.
    pub resp_headers: Vec<u8>,
    /// Response body, possibly truncated.
    pub resp_body: Vec<u8>,
    /// Actual body size before truncation.
    pub resp_body_size: usize,
    pub duration: Duration,
    pub truncated: bool,
    pub error: Option<String>,
}

/// Session-local map from correlation ID to captured bytes. Entries are
/// consumed (removed) exactly once on each terminal path so memory stays
/// bounded.
#[derive(Debug, Default)]
pub struct CaptureStore {
    entries: Mutex<HashMap<String, CapturedData>>,
}

impl CaptureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, capture_id: &str, data: CapturedData) {
        self.entries
            .lock()
            .unwrap()
            .insert(capture_id.to_string(), data);
    }

    /// Removes and returns the entry for `capture_id`.
    pub fn take(&self, capture_id: &str) -> Option<CapturedData> {
        self.entries.lock().unwrap().remove(capture_id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

/// The parsed view of a captured response, enough for filtering and link
/// extraction without re-reading the raw bytes.
#[derive(Debug)]
pub struct LiveResponse {
    pub status: u16,
    pub content_type: String,
}

/// Wraps a `reqwest::Client`, dumping request bytes before the round trip
/// and response bytes after it, with the body read through a size limit.
#[derive(Debug)]
pub struct CapturingClient {
    client: Client,
    /// 0 means unlimited.
    max_body_bytes: usize,
}

impl CapturingClient {
    pub fn new(max_body_bytes: usize) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config::user_agent())
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self {
            client,
            max_body_bytes,
        })
    }

    /// The bare client, for requests that bypass capture (robots.txt).
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Performs the round trip. The captured record lands in `store` under
    /// the request's correlation ID on success *and* on failure, so every
    /// terminal path has an entry to consume.
    pub async fn execute(&self, store: &CaptureStore, mut request: Request) -> Result<LiveResponse> {
        let capture_id = request
            .headers_mut()
            .remove(CAPTURE_ID_HEADER)
            .and_then(|v| v.to_str().map(|s| s.to_string()).ok())
            .unwrap_or_default();

        let request_bytes = dump_request(&request);

        let start = Instant::now();
        let response = match self.client.execute(request).await {
            Ok(r) => r,
            Err(e) => {
                if !capture_id.is_empty() {
                    store.store(
                        &capture_id,
                        CapturedData {
                            request: request_bytes,
                            duration: start.elapsed(),
                            error: Some(e.to_string()),
                            ..Default::default()
                        },
                    );
                }
                return Err(e.into());
            }
        };

        let status = response.status().as_u16();
        let resp_headers = dump_response_headers(&response);
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let (resp_body, resp_body_size, truncated) =
            match read_body_limited(response, self.max_body_bytes).await {
                Ok(read) => read,
                Err(e) => {
                    if !capture_id.is_empty() {
                        store.store(
                            &capture_id,
                            CapturedData {
                                request: request_bytes,
                                resp_headers,
                                duration: start.elapsed(),
                                error: Some(e.to_string()),
                                ..Default::default()
                            },
                        );
                    }
                    return Err(e.into());
                }
            };
        let duration = start.elapsed();

        if !capture_id.is_empty() {
            store.store(
                &capture_id,
                CapturedData {
                    request: request_bytes,
                    resp_headers,
                    resp_body,
                    resp_body_size,
                    duration,
                    truncated,
                    error: None,
                },
            );
        }

        Ok(LiveResponse {
            status,
            content_type,
        })
    }
}

/// Reads the body, buffering at most `limit` bytes while draining and
/// counting the rest. Limit 0 reads everything.
async fn read_body_limited(
    response: Response,
    limit: usize,
) -> reqwest::Result<(Vec<u8>, usize, bool)> {
    if limit == 0 {
        let body = response.bytes().await?;
        let size = body.len();
        return Ok((body.to_vec(), size, false));
    }

    let mut stream = response.bytes_stream();
    let mut buffered = Vec::with_capacity(limit.min(64 * 1024));
    let mut drained: usize = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if buffered.len() < limit {
            let take = (limit - buffered.len()).min(chunk.len());
            buffered.extend_from_slice(&chunk[..take]);
            drained += chunk.len() - take;
        } else {
            drained += chunk.len();
        }
    }

    let total = buffered.len() + drained;
    Ok((buffered, total, drained > 0))
}

/// Serializes an outgoing request as raw HTTP/1.1 bytes: request line, Host,
/// the headers as built, and the body when present.
fn dump_request(request: &Request) -> Vec<u8> {
    let url = request.url();
    let mut target = url.path().to_string();
    if let Some(q) = url.query() {
        target.push('?');
        target.push_str(q);
    }

    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(format!("{} {} HTTP/1.1\r\n", request.method(), target).as_bytes());

    if !request.headers().contains_key(reqwest::header::HOST) {
        if let Some(host) = url.host_str() {
            let host_value = match url.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            };
            out.extend_from_slice(format!("Host: {}\r\n", host_value).as_bytes());
        }
    }

    write_headers(&mut out, request.headers());
    out.extend_from_slice(b"\r\n");

    if let Some(body) = request.body().and_then(|b| b.as_bytes()) {
        out.extend_from_slice(body);
    }

    out
}

/// Serializes the response status line and headers, terminated by the
/// blank line, so `headers || body` forms a complete raw message.
fn dump_response_headers(response: &Response) -> Vec<u8> {
    let version = match response.version() {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/1.1",
    };
    let status = response.status();

    let mut out = Vec::with_capacity(256);
    let reason = status.canonical_reason().unwrap_or("");
    out.extend_from_slice(format!("{} {} {}\r\n", version, status.as_u16(), reason).as_bytes());
    write_headers(&mut out, response.headers());
    out.extend_from_slice(b"\r\n");
    out
}

fn write_headers(out: &mut Vec<u8>, headers: &HeaderMap) {
    for (name, value) in headers.iter() {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_store_take_removes_entry() {
        let store = CaptureStore::new();
        store.store("abc", CapturedData::default());
        assert_eq!(store.len(), 1);

        assert!(store.take("abc").is_some());
        assert!(store.take("abc").is_none());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_dump_request_includes_host_and_query() {
        let client = Client::new();
        let request = client
            .get("http://example.com:8080/a/b?x=1")
            .header("X-Test", "v")
            .build()
            .unwrap();

        let raw = dump_request(&request);
        let text = String::from_utf8(raw).unwrap();
        assert!(text.starts_with("GET /a/b?x=1 HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.com:8080\r\n"));
        assert!(text.contains("x-test: v\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }
}
