use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::{CoreError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User agent string sent by every crawler request.
pub fn user_agent() -> String {
    format!("Mozilla/5.0 (compatible; skitter-{})", VERSION)
}

/// Top-level tool configuration. Loaded once at startup and treated as
/// read-only by the crawler backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub version: String,
    /// Limits request/response body sizes captured in memory.
    #[serde(default)]
    pub max_body_bytes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_subdomains: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_domains: Vec<String>,
    #[serde(default)]
    pub crawler: CrawlerConfig,
}

/// Crawler defaults applied to any session option left unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    #[serde(default)]
    pub max_concurrent_sessions: usize,
    #[serde(default)]
    pub max_response_body_bytes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_subdomains: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_disallowed_paths: Vec<String>,
    #[serde(default)]
    pub default_delay_ms: u64,
    #[serde(default)]
    pub default_parallelism: usize,
    #[serde(default)]
    pub default_max_depth: usize,
    #[serde(default)]
    pub default_max_requests: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_extract_forms: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_submit_forms: Option<bool>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 3,
            max_response_body_bytes: 10_485_760, // 10MB
            include_subdomains: Some(true),
            default_disallowed_paths: vec![
                "*logout*".to_string(),
                "*signout*".to_string(),
                "*sign-out*".to_string(),
                "*delete*".to_string(),
                "*remove*".to_string(),
            ],
            default_delay_ms: 200,
            default_parallelism: 2,
            default_max_depth: 10,
            default_max_requests: 1000,
            default_extract_forms: Some(true),
            default_submit_forms: Some(false),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: VERSION.to_string(),
            max_body_bytes: 10_485_760,
            include_subdomains: Some(true),
            allowed_domains: Vec::new(),
            exclude_domains: Vec::new(),
            crawler: CrawlerConfig::default(),
        }
    }
}

impl Config {
    /// Reads config from `path`, filling any missing field with its default.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_json::from_str(&data).map_err(|e| CoreError::Config(e.to_string()))?;
        cfg.apply_defaults();
        Ok(cfg)
    }

    /// Reads config from `path`, falling back to defaults when the file is
    /// missing.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(cfg) => Ok(cfg),
            Err(CoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Config::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Writes config as pretty JSON, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    fn apply_defaults(&mut self) {
        let defaults = Config::default();
        if self.version.is_empty() {
            self.version = defaults.version;
        }
        if self.max_body_bytes == 0 {
            self.max_body_bytes = defaults.max_body_bytes;
        }
        if self.include_subdomains.is_none() {
            self.include_subdomains = defaults.include_subdomains;
        }

        let cd = CrawlerConfig::default();
        let c = &mut self.crawler;
        if c.max_concurrent_sessions == 0 {
            c.max_concurrent_sessions = cd.max_concurrent_sessions;
        }
        if c.max_response_body_bytes == 0 {
            c.max_response_body_bytes = cd.max_response_body_bytes;
        }
        if c.include_subdomains.is_none() {
            c.include_subdomains = cd.include_subdomains;
        }
        if c.default_disallowed_paths.is_empty() {
            c.default_disallowed_paths = cd.default_disallowed_paths;
        }
        if c.default_delay_ms == 0 {
            c.default_delay_ms = cd.default_delay_ms;
        }
        if c.default_parallelism == 0 {
            c.default_parallelism = cd.default_parallelism;
        }
        if c.default_max_depth == 0 {
            c.default_max_depth = cd.default_max_depth;
        }
        if c.default_max_requests == 0 {
            c.default_max_requests = cd.default_max_requests;
        }
        if c.default_extract_forms.is_none() {
            c.default_extract_forms = cd.default_extract_forms;
        }
        if c.default_submit_forms.is_none() {
            c.default_submit_forms = cd.default_submit_forms;
        }
    }

    /// Checks whether a hostname is permitted by the domain scoping
    /// configuration. Returns `(false, reason)` when denied.
    pub fn is_domain_allowed(&self, hostname: &str) -> (bool, String) {
        // Strip port if present (IPv6 hosts keep their brackets)
        let host = strip_port(hostname).to_lowercase();

        // Exclude list always covers subdomains
        for d in &self.exclude_domains {
            let d = d.to_lowercase();
            if host == d || host.ends_with(&format!(".{}", d)) {
                return (false, format!("domain {} is in exclude_domains", host));
            }
        }

        if self.allowed_domains.is_empty() {
            return (true, String::new());
        }

        let include_subdomains = self.include_subdomains.unwrap_or(false);
        for d in &self.allowed_domains {
            let d = d.to_lowercase();
            if host == d {
                return (true, String::new());
            }
            if include_subdomains && host.ends_with(&format!(".{}", d)) {
                return (true, String::new());
            }
        }

        (false, format!("domain {} is not in allowed_domains", host))
    }
}

fn strip_port(hostname: &str) -> &str {
    if hostname.starts_with('[') {
        // [::1]:8080 -> [::1]
        if let Some(end) = hostname.find(']') {
            return &hostname[..=end];
        }
        return hostname;
    }
    match hostname.rsplit_once(':') {
        Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) => h,
        _ => hostname,
    }
}
