//! Flow bundle writer: one directory per exported flow, holding the raw
//! request/response split into header and body files for later replay.

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::Result;

/// Metadata written alongside an exported request.
#[derive(Debug, Clone, Serialize)]
pub struct BundleMeta {
    pub bundle_id: String,
    pub source_flow_id: String,
    pub captured_at: String,
    pub url: String,
    pub method: String,
    pub body_is_utf8: bool,
    pub body_size: usize,
}

/// Writes `request.http`, `body`, and `request.meta.json` into `dir`,
/// creating the directory if needed.
///
/// `request.http` holds the exact header bytes followed by a blank line and
/// a placeholder note; the raw body lives only in `body` so it can be edited
/// for replay without disturbing the headers.
pub fn write_bundle(dir: &Path, headers: &[u8], body: &[u8], meta: &BundleMeta) -> Result<()> {
    fs::create_dir_all(dir)?;

    let mut request_http = Vec::with_capacity(headers.len() + 64);
    request_http.extend_from_slice(headers);
    request_http.extend_from_slice(b"\r\n\r\n");
    if !body.is_empty() {
        request_http
            .extend_from_slice(format!("[body: {} bytes - see ./body]\n", body.len()).as_bytes());
    }
    fs::write(dir.join("request.http"), request_http)?;
    fs::write(dir.join("body"), body)?;

    let meta_json = serde_json::to_string_pretty(meta)?;
    fs::write(dir.join("request.meta.json"), meta_json)?;

    Ok(())
}

/// Writes `response.http` (exact header bytes plus the trailing blank line)
/// and `response.body` into `dir`.
pub fn write_response(dir: &Path, headers: &[u8], body: &[u8]) -> Result<()> {
    fs::create_dir_all(dir)?;

    let mut response_http = Vec::with_capacity(headers.len() + 4);
    response_http.extend_from_slice(headers);
    response_http.extend_from_slice(b"\r\n\r\n");
    fs::write(dir.join("response.http"), response_http)?;
    fs::write(dir.join("response.body"), body)?;

    Ok(())
}
