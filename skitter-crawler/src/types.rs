use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One crawl entry point: either a URL or a recorded proxy flow whose
/// request is replayed to seed auth context.
#[derive(Debug, Clone, Default)]
pub struct CrawlSeed {
    pub url: Option<String>,
    pub flow_id: Option<String>,
}

impl CrawlSeed {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            flow_id: None,
        }
    }

    pub fn flow(flow_id: impl Into<String>) -> Self {
        Self {
            url: None,
            flow_id: Some(flow_id.into()),
        }
    }
}

/// Per-session crawl options. `None` fields take the configured default;
/// `Some(0)` for `max_depth` restricts the crawl to its seeds, and
/// `Some(0)` for `max_requests` lifts the request cap.
#[derive(Debug, Clone, Default)]
pub struct CrawlOptions {
    pub label: String,
    pub seeds: Vec<CrawlSeed>,
    pub explicit_domains: Vec<String>,
    pub allowed_paths: Vec<String>,
    pub disallowed_paths: Vec<String>,
    pub headers: HashMap<String, String>,
    pub max_depth: Option<usize>,
    pub max_requests: Option<usize>,
    pub delay: Option<Duration>,
    pub random_delay: Option<Duration>,
    pub parallelism: Option<usize>,
    pub include_subdomains: Option<bool>,
    pub ignore_robots_txt: bool,
    pub extract_forms: Option<bool>,
    pub submit_forms: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Running,
    Stopped,
    Completed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
            SessionState::Completed => "completed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlStatus {
    pub state: SessionState,
    pub urls_queued: usize,
    pub urls_visited: usize,
    pub urls_errored: usize,
    pub forms_discovered: usize,
    pub duration: Duration,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSummary {
    pub session_id: String,
    pub state: SessionState,
    pub duration: Duration,
    pub aggregates: Vec<AggregateEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateEntry {
    pub host: String,
    pub path: String,
    pub method: String,
    pub status: u16,
    pub count: usize,
}

/// One completed HTTP exchange captured by the crawler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlFlow {
    pub id: String,
    pub session_id: String,
    pub url: String,
    pub host: String,
    /// Path including the query string.
    pub path: String,
    pub method: String,
    /// Parent URL that discovered this one, or `"seed"`.
    pub found_on: String,
    pub depth: usize,
    pub status_code: u16,
    pub content_type: String,
    /// True body size before any truncation.
    pub response_length: usize,
    pub request: Vec<u8>,
    /// Raw response bytes: headers plus possibly-truncated body.
    pub response: Vec<u8>,
    pub truncated: bool,
    pub duration: Duration,
    pub discovered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredForm {
    pub id: String,
    pub session_id: String,
    /// Page the form was found on.
    pub url: String,
    pub action: String,
    pub method: String,
    pub has_csrf: bool,
    pub inputs: Vec<FormInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormInput {
    pub name: String,
    #[serde(rename = "type")]
    pub input_type: String,
    pub value: String,
    pub required: bool,
}

/// A failed fetch. Status is 0 when the failure happened below HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlError {
    pub url: String,
    pub error: String,
    pub status: u16,
}

#[derive(Debug, Clone, Default)]
pub struct ListFlowsOptions {
    /// Glob matched against the flow host.
    pub host: String,
    /// Glob matched against the path, with and without its query string.
    pub path_pattern: String,
    pub status_codes: Vec<u16>,
    pub methods: Vec<String>,
    pub exclude_host: String,
    pub exclude_path: String,
    /// Substring searched in the URL and request/response headers.
    pub contains: String,
    /// Substring searched in the request/response bodies.
    pub contains_body: String,
    /// `"last"` resumes after the previous `last` call; a flow ID starts
    /// iteration just past that flow.
    pub since: String,
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResult {
    pub bundle_id: String,
    pub bundle_path: String,
    pub files: Vec<String>,
}
