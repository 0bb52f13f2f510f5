//! The crawler backend: session registry and the operations callers drive
//! a crawl with.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::info;

use skitter_core::bundle::{self, BundleMeta};
use skitter_core::httputil::{
    extract_header_lines, extract_request_meta, infer_scheme_from_port,
    parse_url_with_default_scheme, split_headers_body,
};
use skitter_core::store::{CrawlFlowStore, HttpBackend, ProxyFlowStore};
use skitter_core::strutil::{normalize_path, truncate_string, MAX_PATH_LENGTH};
use skitter_core::{ids, CrawlerConfig};

use crate::engine;
use crate::error::{CrawlerError, Result};
use crate::filters::{build_domain_filters, globs_to_regexes, matches_glob};
use crate::session::{CrawlSession, EffectiveOptions};
use crate::transport::CapturingClient;
use crate::types::{
    AggregateEntry, CrawlError, CrawlFlow, CrawlOptions, CrawlSeed, CrawlStatus, CrawlSummary,
    DiscoveredForm, ExportResult, ListFlowsOptions, SessionInfo, SessionState,
};

#[derive(Default)]
struct Registry {
    sessions: HashMap<String, Arc<CrawlSession>>,
    by_label: HashMap<String, String>,
    closed: bool,
}

/// Concurrent crawler backend. Sessions live in memory for the lifetime of
/// the process; flows are indexed globally through the shared
/// `CrawlFlowStore`.
pub struct CrawlerBackend {
    registry: RwLock<Registry>,
    config: CrawlerConfig,
    client: Arc<CapturingClient>,
    flow_store: Arc<CrawlFlowStore>,
    proxy_flow_store: Arc<ProxyFlowStore>,
    http_backend: Arc<dyn HttpBackend>,
}

impl CrawlerBackend {
    pub fn new(
        config: CrawlerConfig,
        flow_store: Arc<CrawlFlowStore>,
        proxy_flow_store: Arc<ProxyFlowStore>,
        http_backend: Arc<dyn HttpBackend>,
    ) -> Result<Self> {
        let client = Arc::new(CapturingClient::new(config.max_response_body_bytes)?);
        Ok(Self {
            registry: RwLock::new(Registry::default()),
            config,
            client,
            flow_store,
            proxy_flow_store,
            http_backend,
        })
    }

    /// Creates and starts a crawl session. Returns as soon as the session
    /// is registered; crawling continues in the background.
    pub async fn create_session(&self, opts: CrawlOptions) -> Result<SessionInfo> {
        {
            let registry = self.registry.read().unwrap();
            if registry.closed {
                return Err(CrawlerError::BackendClosed);
            }

            let active = registry
                .sessions
                .values()
                .filter(|s| s.data.lock().unwrap().state == SessionState::Running)
                .count();
            if active >= self.config.max_concurrent_sessions {
                return Err(CrawlerError::TooManySessions(
                    self.config.max_concurrent_sessions,
                ));
            }

            if !opts.label.is_empty() {
                if let Some(existing) = registry.by_label.get(&opts.label) {
                    return Err(CrawlerError::LabelExists {
                        label: opts.label.clone(),
                        session_id: existing.clone(),
                    });
                }
            }
        }

        let (allowed_domains, seed_urls, seed_headers) = self
            .resolve_seeds(&opts.seeds, &opts.explicit_domains)
            .await?;
        if allowed_domains.is_empty() {
            return Err(CrawlerError::NoDomains);
        }

        let disallowed_paths = if opts.disallowed_paths.is_empty() {
            self.config.default_disallowed_paths.clone()
        } else {
            opts.disallowed_paths.clone()
        };

        let include_subdomains = self.config.include_subdomains.unwrap_or(false)
            && opts.include_subdomains.unwrap_or(true);

        let effective = EffectiveOptions {
            headers: opts.headers.clone(),
            max_depth: opts.max_depth.unwrap_or(self.config.default_max_depth),
            max_requests: opts
                .max_requests
                .unwrap_or(self.config.default_max_requests),
            delay: opts
                .delay
                .unwrap_or(Duration::from_millis(self.config.default_delay_ms)),
            random_delay: opts.random_delay.unwrap_or(Duration::ZERO),
            parallelism: opts
                .parallelism
                .filter(|p| *p > 0)
                .unwrap_or(self.config.default_parallelism),
            ignore_robots_txt: opts.ignore_robots_txt,
            extract_forms: opts
                .extract_forms
                .or(self.config.default_extract_forms)
                .unwrap_or(true),
            submit_forms: opts
                .submit_forms
                .or(self.config.default_submit_forms)
                .unwrap_or(false),
        };

        let domain_filters = if include_subdomains {
            build_domain_filters(&allowed_domains)
        } else {
            Vec::new()
        };
        let disallowed_regexes = globs_to_regexes(&disallowed_paths);
        let allowed_regexes = globs_to_regexes(&opts.allowed_paths);

        let mut session_id = ids::generate(ids::DEFAULT_LENGTH);
        let session;
        {
            let mut registry = self.registry.write().unwrap();
            if registry.closed {
                return Err(CrawlerError::BackendClosed);
            }
            while registry.sessions.contains_key(&session_id) {
                session_id = ids::generate(ids::DEFAULT_LENGTH);
            }

            session = Arc::new(CrawlSession::new(
                session_id.clone(),
                opts.label.clone(),
                effective,
                seed_headers,
                allowed_domains.clone(),
                domain_filters,
                disallowed_regexes,
                allowed_regexes,
            ));
            registry.sessions.insert(session_id.clone(), session.clone());
            if !opts.label.is_empty() {
                registry
                    .by_label
                    .insert(opts.label.clone(), session_id.clone());
            }
        }

        info!(
            "crawler: created session {} (label={:?}) with {} domains",
            session_id,
            opts.label,
            allowed_domains.len()
        );

        let info = session.info();
        tokio::spawn(engine::run_session(
            session,
            self.client.clone(),
            self.flow_store.clone(),
            seed_urls,
        ));

        Ok(info)
    }

    /// Adds seeds to a running session. New seed headers are merged without
    /// overwriting existing entries; already-seen URLs are not re-enqueued.
    pub async fn add_seeds(&self, session_id: &str, seeds: &[CrawlSeed]) -> Result<()> {
        let session = self.resolve_session(session_id)?;

        {
            let data = session.data.lock().unwrap();
            if data.state != SessionState::Running {
                return Err(CrawlerError::SessionNotRunning {
                    id: session_id.to_string(),
                    state: data.state.to_string(),
                });
            }
        }

        let (_, seed_urls, new_headers) = self.resolve_seeds(seeds, &[]).await?;

        if !new_headers.is_empty() {
            let mut data = session.data.lock().unwrap();
            for (name, value) in new_headers {
                data.seed_headers.entry(name).or_insert(value);
            }
        }

        engine::enqueue_seeds(&session, &seed_urls);

        info!(
            "crawler: added {} seeds to session {}",
            seed_urls.len(),
            session_id
        );
        Ok(())
    }

    pub fn get_status(&self, session_id: &str) -> Result<CrawlStatus> {
        let session = self.resolve_session(session_id)?;
        let data = session.data.lock().unwrap();
        Ok(CrawlStatus {
            state: data.state,
            urls_queued: data.urls_queued,
            urls_visited: data.flows_ordered.len(),
            urls_errored: data.errors.len(),
            forms_discovered: data.forms.len(),
            duration: session.started_at.elapsed(),
            last_activity: data.last_activity,
        })
    }

    /// Aggregates flows by `(host, normalized path, method, status)`,
    /// sorted by count descending.
    pub fn get_summary(&self, session_id: &str) -> Result<CrawlSummary> {
        let session = self.resolve_session(session_id)?;
        let data = session.data.lock().unwrap();

        let mut counts: HashMap<(String, String, String, u16), usize> = HashMap::new();
        for flow in &data.flows_ordered {
            let key = (
                flow.host.clone(),
                normalize_path(&flow.path),
                flow.method.clone(),
                flow.status_code,
            );
            *counts.entry(key).or_insert(0) += 1;
        }

        let mut aggregates: Vec<AggregateEntry> = counts
            .into_iter()
            .map(|((host, path, method, status), count)| AggregateEntry {
                host,
                path: truncate_string(&path, MAX_PATH_LENGTH),
                method,
                status,
                count,
            })
            .collect();
        aggregates.sort_by(|a, b| b.count.cmp(&a.count));

        Ok(CrawlSummary {
            session_id: session.id.clone(),
            state: data.state,
            duration: session.started_at.elapsed(),
            aggregates,
        })
    }

    /// Lists flows with filtering and cursor support. The `since` cursor
    /// advances to the highest original index returned and never regresses.
    pub fn list_flows(&self, session_id: &str, opts: &ListFlowsOptions) -> Result<Vec<CrawlFlow>> {
        let session = self.resolve_session(session_id)?;
        let mut data = session.data.lock().unwrap();

        let start_idx = if opts.since.is_empty() {
            0
        } else if opts.since == "last" {
            data.last_returned_idx
        } else {
            // Start just past the named flow; unknown IDs fall back to 0
            data.flows_ordered
                .iter()
                .position(|f| f.id == opts.since)
                .map(|i| i + 1)
                .unwrap_or(0)
        };

        let mut filtered: Vec<(usize, CrawlFlow)> = Vec::new();
        for (idx, flow) in data.flows_ordered.iter().enumerate().skip(start_idx) {
            if matches_flow_filters(flow, opts) {
                filtered.push((idx, flow.clone()));
            }
        }

        if opts.offset > 0 {
            if opts.offset >= filtered.len() {
                return Ok(Vec::new());
            }
            filtered.drain(..opts.offset);
        }
        if opts.limit > 0 && opts.limit < filtered.len() {
            filtered.truncate(opts.limit);
        }

        if let Some((max_idx, _)) = filtered.last() {
            let next = max_idx + 1;
            if next > data.last_returned_idx {
                data.last_returned_idx = next;
            }
        }

        Ok(filtered.into_iter().map(|(_, flow)| flow).collect())
    }

    pub fn list_forms(&self, session_id: &str, limit: usize) -> Result<Vec<DiscoveredForm>> {
        let session = self.resolve_session(session_id)?;
        let data = session.data.lock().unwrap();
        let take = if limit == 0 || limit > data.forms.len() {
            data.forms.len()
        } else {
            limit
        };
        Ok(data.forms[..take].to_vec())
    }

    pub fn list_errors(&self, session_id: &str, limit: usize) -> Result<Vec<CrawlError>> {
        let session = self.resolve_session(session_id)?;
        let data = session.data.lock().unwrap();
        let take = if limit == 0 || limit > data.errors.len() {
            data.errors.len()
        } else {
            limit
        };
        Ok(data.errors[..take].to_vec())
    }

    /// Looks a flow up by ID alone: global index first, then the owning
    /// session's map. Returns a copy.
    pub fn get_flow(&self, flow_id: &str) -> Result<CrawlFlow> {
        let entry = self
            .flow_store
            .lookup(flow_id)
            .ok_or_else(|| CrawlerError::FlowNotFound(flow_id.to_string()))?;

        let session = {
            let registry = self.registry.read().unwrap();
            registry
                .sessions
                .get(&entry.session_id)
                .cloned()
                .ok_or_else(|| CrawlerError::FlowNotFound(flow_id.to_string()))?
        };

        let data = session.data.lock().unwrap();
        data.flows_by_id
            .get(flow_id)
            .and_then(|idx| data.flows_ordered.get(*idx))
            .cloned()
            .ok_or_else(|| CrawlerError::FlowNotFound(flow_id.to_string()))
    }

    /// Exports a flow as an on-disk bundle for replay.
    pub fn export_flow(&self, flow_id: &str, bundle_dir: &Path) -> Result<ExportResult> {
        let flow = self.get_flow(flow_id)?;

        let (req_headers, req_body) = split_headers_body(&flow.request);
        let meta = BundleMeta {
            bundle_id: flow_id.to_string(),
            source_flow_id: flow_id.to_string(),
            captured_at: flow.discovered_at.to_rfc3339(),
            url: flow.url.clone(),
            method: flow.method.clone(),
            // The crawler only stores text content types
            body_is_utf8: true,
            body_size: req_body.len(),
        };

        let dir = bundle_dir.join(flow_id);
        bundle::write_bundle(&dir, req_headers, req_body, &meta).map_err(CrawlerError::Bundle)?;

        let (resp_headers, resp_body) = split_headers_body(&flow.response);
        bundle::write_response(&dir, resp_headers, resp_body).map_err(CrawlerError::Bundle)?;

        info!(
            "crawler: exported flow {} to {} (url={})",
            flow_id,
            dir.display(),
            flow.url
        );

        Ok(ExportResult {
            bundle_id: flow_id.to_string(),
            bundle_path: dir.to_string_lossy().into_owned(),
            files: vec![
                "request.http".to_string(),
                "body".to_string(),
                "request.meta.json".to_string(),
                "response.http".to_string(),
                "response.body".to_string(),
            ],
        })
    }

    /// Stops a session. Idempotent: stopping a finished session is a no-op.
    pub fn stop_session(&self, session_id: &str) -> Result<()> {
        let session = self.resolve_session(session_id)?;
        {
            let mut data = session.data.lock().unwrap();
            if data.state != SessionState::Running {
                return Ok(());
            }
            data.state = SessionState::Stopped;
        }
        session.cancel.cancel();
        info!("crawler: stopped session {}", session.id);
        Ok(())
    }

    pub fn list_sessions(&self, limit: usize) -> Vec<SessionInfo> {
        let registry = self.registry.read().unwrap();
        let mut sessions: Vec<SessionInfo> =
            registry.sessions.values().map(|s| s.info()).collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if limit > 0 && sessions.len() > limit {
            sessions.truncate(limit);
        }
        sessions
    }

    /// Marks the backend closed and cancels every session.
    pub fn close(&self) {
        let sessions: Vec<Arc<CrawlSession>> = {
            let mut registry = self.registry.write().unwrap();
            if registry.closed {
                return;
            }
            registry.closed = true;
            registry.sessions.values().cloned().collect()
        };

        for session in &sessions {
            session.cancel.cancel();
        }
        info!("crawler: closed backend with {} sessions", sessions.len());
    }

    /// Finds a session by ID or unique label.
    fn resolve_session(&self, identifier: &str) -> Result<Arc<CrawlSession>> {
        let registry = self.registry.read().unwrap();

        if let Some(session) = registry.sessions.get(identifier) {
            return Ok(session.clone());
        }
        if let Some(id) = registry.by_label.get(identifier) {
            if let Some(session) = registry.sessions.get(id) {
                return Ok(session.clone());
            }
        }

        Err(CrawlerError::SessionNotFound(identifier.to_string()))
    }

    /// Resolves seeds into `(allowed domains, seed URLs, seed headers)`.
    /// Flow seeds are fetched from proxy history and contribute the
    /// recorded request's headers (minus Host and Content-Length) so the
    /// crawl replays its auth context.
    async fn resolve_seeds(
        &self,
        seeds: &[CrawlSeed],
        explicit_domains: &[String],
    ) -> Result<(Vec<String>, Vec<String>, HashMap<String, String>)> {
        let mut domain_set: HashSet<String> = HashSet::new();
        let mut seed_urls = Vec::new();
        let mut seed_headers = HashMap::new();

        for d in explicit_domains {
            domain_set.insert(d.to_lowercase());
        }

        for seed in seeds {
            if let Some(raw) = seed.url.as_deref() {
                let url = parse_url_with_default_scheme(raw).map_err(|e| {
                    CrawlerError::InvalidSeedUrl {
                        url: raw.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                match url.host_str() {
                    Some(host) => domain_set.insert(host.to_lowercase()),
                    None => {
                        return Err(CrawlerError::InvalidSeedUrl {
                            url: raw.to_string(),
                            reason: "missing host".to_string(),
                        })
                    }
                };
                seed_urls.push(url.to_string());
            }

            if let Some(flow_id) = seed.flow_id.as_deref() {
                let entry = self
                    .proxy_flow_store
                    .lookup(flow_id)
                    .ok_or_else(|| CrawlerError::SeedFlowNotFound(flow_id.to_string()))?;

                let entries = self
                    .http_backend
                    .get_proxy_history(1, entry.offset)
                    .await
                    .map_err(CrawlerError::ProxyHistory)?;
                let proxy_entry = entries
                    .first()
                    .ok_or_else(|| CrawlerError::SeedFlowNotFound(flow_id.to_string()))?;

                let (method, host, path) = extract_request_meta(&proxy_entry.request);
                if host.is_empty() {
                    return Err(CrawlerError::SeedFlowNoHost(flow_id.to_string()));
                }

                let scheme = infer_scheme_from_port(&host);
                let seed_url = format!("{}://{}{}", scheme, host, path);
                seed_urls.push(seed_url.clone());
                let domain = host.split(':').next().unwrap_or(&host).to_lowercase();
                domain_set.insert(domain);

                for line in extract_header_lines(&proxy_entry.request) {
                    if let Some((name, value)) = line.split_once(':') {
                        let name = name.trim();
                        let lower = name.to_lowercase();
                        if lower == "host" || lower == "content-length" {
                            continue;
                        }
                        seed_headers
                            .entry(name.to_string())
                            .or_insert_with(|| value.trim().to_string());
                    }
                }

                info!(
                    "crawler: resolved seed flow {} -> {} {}",
                    flow_id, method, seed_url
                );
            }
        }

        Ok((domain_set.into_iter().collect(), seed_urls, seed_headers))
    }
}

fn matches_flow_filters(flow: &CrawlFlow, opts: &ListFlowsOptions) -> bool {
    if !opts.host.is_empty() && !matches_glob(&flow.host, &opts.host) {
        return false;
    }

    if !opts.path_pattern.is_empty() {
        let path_only = match flow.path.split_once('?') {
            Some((p, _)) => p,
            None => flow.path.as_str(),
        };
        if !matches_glob(&flow.path, &opts.path_pattern)
            && !matches_glob(path_only, &opts.path_pattern)
        {
            return false;
        }
    }

    if !opts.status_codes.is_empty() && !opts.status_codes.contains(&flow.status_code) {
        return false;
    }

    if !opts.methods.is_empty()
        && !opts
            .methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&flow.method))
    {
        return false;
    }

    if !opts.exclude_host.is_empty() && matches_glob(&flow.host, &opts.exclude_host) {
        return false;
    }
    if !opts.exclude_path.is_empty() && matches_glob(&flow.path, &opts.exclude_path) {
        return false;
    }

    if !opts.contains.is_empty() {
        let (req_headers, _) = split_headers_body(&flow.request);
        let (resp_headers, _) = split_headers_body(&flow.response);
        let combined = format!(
            "{}{}{}",
            flow.url,
            String::from_utf8_lossy(req_headers),
            String::from_utf8_lossy(resp_headers)
        );
        if !combined.contains(&opts.contains) {
            return false;
        }
    }

    if !opts.contains_body.is_empty() {
        let (_, req_body) = split_headers_body(&flow.request);
        let (_, resp_body) = split_headers_body(&flow.response);
        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(req_body),
            String::from_utf8_lossy(resp_body)
        );
        if !combined.contains(&opts.contains_body) {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn flow(host: &str, path: &str, method: &str, status: u16) -> CrawlFlow {
        CrawlFlow {
            id: "f1".to_string(),
            session_id: "s1".to_string(),
            url: format!("http://{}{}", host, path),
            host: host.to_string(),
            path: path.to_string(),
            method: method.to_string(),
            found_on: "seed".to_string(),
            depth: 0,
            status_code: status,
            content_type: "text/html".to_string(),
            response_length: 0,
            request: b"GET / HTTP/1.1\r\nHost: h\r\nX-Auth: tok\r\n\r\n".to_vec(),
            response: b"HTTP/1.1 200 OK\r\nServer: warp\r\n\r\nhello body".to_vec(),
            truncated: false,
            duration: Duration::from_millis(1),
            discovered_at: Utc::now(),
        }
    }

    #[test]
    fn test_flow_filter_host_glob() {
        let f = flow("api.example.com", "/v1", "GET", 200);
        let mut opts = ListFlowsOptions::default();
        opts.host = "*.example.com".to_string();
        assert!(matches_flow_filters(&f, &opts));

        opts.host = "other.com".to_string();
        assert!(!matches_flow_filters(&f, &opts));
    }

    #[test]
    fn test_flow_filter_path_with_and_without_query() {
        let f = flow("h", "/items?page=2", "GET", 200);
        let mut opts = ListFlowsOptions::default();
        opts.path_pattern = "/items".to_string();
        assert!(matches_flow_filters(&f, &opts));

        opts.path_pattern = "/items?page=*".to_string();
        assert!(matches_flow_filters(&f, &opts));
    }

    #[test]
    fn test_flow_filter_status_and_method() {
        let f = flow("h", "/", "POST", 302);
        let mut opts = ListFlowsOptions::default();
        opts.status_codes = vec![200, 302];
        opts.methods = vec!["post".to_string()];
        assert!(matches_flow_filters(&f, &opts));

        opts.status_codes = vec![200];
        assert!(!matches_flow_filters(&f, &opts));
    }

    #[test]
    fn test_flow_filter_contains_headers_vs_body() {
        let f = flow("h", "/", "GET", 200);
        let mut opts = ListFlowsOptions::default();
        opts.contains = "X-Auth".to_string();
        assert!(matches_flow_filters(&f, &opts));

        // Body content is not visible to the header search
        opts.contains = "hello body".to_string();
        assert!(!matches_flow_filters(&f, &opts));

        let mut opts = ListFlowsOptions::default();
        opts.contains_body = "hello body".to_string();
        assert!(matches_flow_filters(&f, &opts));
    }

    #[test]
    fn test_flow_filter_excludes() {
        let f = flow("static.example.com", "/assets/app.js", "GET", 200);
        let mut opts = ListFlowsOptions::default();
        opts.exclude_host = "static.*".to_string();
        assert!(!matches_flow_filters(&f, &opts));

        let mut opts = ListFlowsOptions::default();
        opts.exclude_path = "*assets*".to_string();
        assert!(!matches_flow_filters(&f, &opts));
    }
}
