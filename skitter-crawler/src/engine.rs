//! Crawl engine: a per-session worker pool draining the frontier through
//! the filter chain, the capturing transport, and the response pipeline.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::Method;
use scraper::{Html, Selector};
use tracing::{debug, info};
use url::form_urlencoded;
use url::Url;

use skitter_core::ids;
use skitter_core::store::CrawlFlowStore;

use crate::filters::{is_allowed_content_type, matches_any_regex};
use crate::forms;
use crate::session::{CrawlSession, Job};
use crate::transport::{CapturingClient, CAPTURE_ID_HEADER};
use crate::types::{CrawlError, CrawlFlow, DiscoveredForm, SessionState};

/// Idle workers re-check the frontier at this interval as a fallback for
/// missed notifications.
const IDLE_POLL: Duration = Duration::from_millis(25);

/// Drives a session to completion: seeds the frontier, runs the worker
/// pool, and flips the state to `completed` on natural drain.
pub(crate) async fn run_session(
    session: Arc<CrawlSession>,
    client: Arc<CapturingClient>,
    flow_store: Arc<CrawlFlowStore>,
    seed_urls: Vec<String>,
) {
    enqueue_seeds(&session, &seed_urls);

    let mut workers = Vec::with_capacity(session.opts.parallelism);
    for _ in 0..session.opts.parallelism {
        let session = session.clone();
        let client = client.clone();
        let flow_store = flow_store.clone();
        workers.push(tokio::spawn(worker(session, client, flow_store)));
    }
    for handle in workers {
        let _ = handle.await;
    }

    {
        let mut data = session.data.lock().unwrap();
        if data.state == SessionState::Running {
            data.state = SessionState::Completed;
        }
    }
    info!("crawler: session {} completed", session.id);
}

/// Marks seed URLs seen and enqueues them at depth 0.
pub(crate) fn enqueue_seeds(session: &CrawlSession, seed_urls: &[String]) {
    for seed in seed_urls {
        if !session.mark_seen(seed) {
            continue;
        }
        if let Ok(url) = Url::parse(seed) {
            session.frontier.push(Job {
                url,
                depth: 0,
                body: None,
            });
        }
    }
}

async fn worker(
    session: Arc<CrawlSession>,
    client: Arc<CapturingClient>,
    flow_store: Arc<CrawlFlowStore>,
) {
    loop {
        if session.cancel.is_cancelled() {
            break;
        }

        let job = match session.frontier.try_pop() {
            Some(job) => job,
            None => {
                if session.frontier.is_idle() {
                    break;
                }
                let _ = tokio::time::timeout(IDLE_POLL, session.frontier.wait_for_work()).await;
                continue;
            }
        };

        process_job(&session, &client, &flow_store, job).await;
        session.frontier.finish();
    }
}

async fn process_job(
    session: &Arc<CrawlSession>,
    client: &CapturingClient,
    flow_store: &CrawlFlowStore,
    job: Job,
) {
    let url_str = job.url.to_string();

    // Scope and path filters abort silently, before anything is counted
    if !session.in_scope(&job.url) {
        return;
    }
    if matches_any_regex(&url_str, &session.disallowed_regexes) {
        return;
    }
    if !session.allowed_regexes.is_empty()
        && !matches_any_regex(job.url.path(), &session.allowed_regexes)
    {
        return;
    }

    // robots-blocked URLs drop silently, before anything is counted
    if !session.opts.ignore_robots_txt
        && !session.robots.is_allowed(client.inner(), &job.url).await
    {
        return;
    }

    // Request cap: check-and-increment in one critical section
    {
        let mut data = session.data.lock().unwrap();
        if data.state != SessionState::Running {
            return;
        }
        let max = session.opts.max_requests;
        if max > 0 && data.request_count >= max {
            return;
        }
        data.request_count += 1;
        data.urls_queued += 1;
        data.last_activity = Utc::now();
    }

    // Consume the parent mapping at request start; errored URLs release
    // theirs too
    let found_on = session.take_parent(&url_str);

    session.wait_rate_turn().await;

    let capture_id = ids::generate(ids::DEFAULT_LENGTH);
    let request = match build_request(session, client, &job, &capture_id) {
        Ok(req) => req,
        Err(e) => {
            record_error(
                session,
                CrawlError {
                    url: url_str,
                    error: e.to_string(),
                    status: 0,
                },
            );
            return;
        }
    };

    let live = tokio::select! {
        _ = session.cancel.cancelled() => {
            session.captures.take(&capture_id);
            record_error(session, CrawlError {
                url: url_str,
                error: "request canceled: session stopped".to_string(),
                status: 0,
            });
            return;
        }
        result = client.execute(&session.captures, request) => result,
    };

    let live = match live {
        Ok(live) => live,
        Err(e) => {
            // Consume the capture entry stored by the transport; it carries
            // the transport's own error message when one was recorded
            let message = session
                .captures
                .take(&capture_id)
                .and_then(|c| c.error)
                .unwrap_or_else(|| e.to_string());
            record_error(
                session,
                CrawlError {
                    url: url_str,
                    error: message,
                    status: 0,
                },
            );
            return;
        }
    };

    if !is_allowed_content_type(&live.content_type) {
        session.captures.take(&capture_id);
        decrement_queued(session);
        return;
    }

    let captured = match session.captures.take(&capture_id) {
        Some(c) => c,
        None => {
            decrement_queued(session);
            return;
        }
    };

    // Assemble the flow from the captured raw bytes
    let mut response_bytes =
        Vec::with_capacity(captured.resp_headers.len() + captured.resp_body.len());
    response_bytes.extend_from_slice(&captured.resp_headers);
    response_bytes.extend_from_slice(&captured.resp_body);

    let host = match (job.url.host_str(), job.url.port()) {
        (Some(h), Some(p)) => format!("{}:{}", h, p),
        (Some(h), None) => h.to_string(),
        (None, _) => String::new(),
    };
    let mut path = job.url.path().to_string();
    if let Some(q) = job.url.query() {
        path.push('?');
        path.push_str(q);
    }

    let mut flow_id = ids::generate(ids::DEFAULT_LENGTH);
    while flow_store.exists(&flow_id) {
        flow_id = ids::generate(ids::DEFAULT_LENGTH);
    }

    let method = if job.body.is_some() { "POST" } else { "GET" };
    let flow = CrawlFlow {
        id: flow_id.clone(),
        session_id: session.id.clone(),
        url: url_str.clone(),
        host,
        path,
        method: method.to_string(),
        found_on,
        depth: job.depth,
        status_code: live.status,
        content_type: live.content_type.clone(),
        response_length: captured.resp_body_size,
        request: captured.request,
        response: response_bytes,
        truncated: captured.truncated,
        duration: captured.duration,
        discovered_at: Utc::now(),
    };

    {
        let mut data = session.data.lock().unwrap();
        if data.state != SessionState::Running {
            return;
        }
        let idx = data.flows_ordered.len();
        data.flows_by_id.insert(flow_id.clone(), idx);
        data.flows_ordered.push(flow);
        data.urls_queued = data.urls_queued.saturating_sub(1);
        data.last_activity = Utc::now();
    }
    flow_store.register(&flow_id, &session.id);
    debug!("crawler: captured {} {} ({})", method, url_str, live.status);

    // Link and form discovery only makes sense for HTML
    let ct = live.content_type.to_lowercase();
    if !ct.is_empty() && !ct.contains("html") {
        return;
    }
    let body_text = String::from_utf8_lossy(&captured.resp_body).into_owned();
    let page = extract_page(session, &body_text, &job.url);

    for link in page.links {
        if !session.mark_seen(&link) {
            continue;
        }
        let child_depth = job.depth + 1;
        if child_depth > session.opts.max_depth {
            continue;
        }
        let parsed = match Url::parse(&link) {
            Ok(u) => u,
            Err(_) => continue,
        };
        session
            .parent_urls
            .lock()
            .unwrap()
            .insert(link, url_str.clone());
        session.frontier.push(Job {
            url: parsed,
            depth: child_depth,
            body: None,
        });
    }

    for form in page.forms {
        let mut data = session.data.lock().unwrap();
        if data.state == SessionState::Running {
            data.forms.push(form);
        }
    }

    for (action, body) in page.submissions {
        let child_depth = job.depth + 1;
        if child_depth > session.opts.max_depth {
            continue;
        }
        if let Ok(action_url) = Url::parse(&action) {
            session.frontier.push(Job {
                url: action_url,
                depth: child_depth,
                body: Some(body),
            });
        }
    }
}

fn build_request(
    session: &CrawlSession,
    client: &CapturingClient,
    job: &Job,
    capture_id: &str,
) -> crate::error::Result<reqwest::Request> {
    let method = if job.body.is_some() {
        Method::POST
    } else {
        Method::GET
    };
    let mut builder = client
        .inner()
        .request(method, job.url.clone())
        .header(USER_AGENT, skitter_core::config::user_agent());

    // Seed headers first (auth context from resolved flows), then custom
    // headers so explicit options win
    let seed_headers = {
        let data = session.data.lock().unwrap();
        data.seed_headers.clone()
    };
    for (name, value) in &seed_headers {
        if let (Ok(n), Ok(v)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            builder = builder.header(n, v);
        }
    }
    for (name, value) in &session.opts.headers {
        if let (Ok(n), Ok(v)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            builder = builder.header(n, v);
        }
    }

    builder = builder.header(CAPTURE_ID_HEADER, capture_id);

    if let Some(body) = &job.body {
        builder = builder
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body.clone());
    }

    Ok(builder.build()?)
}

fn record_error(session: &CrawlSession, error: CrawlError) {
    let mut data = session.data.lock().unwrap();
    if data.state != SessionState::Running {
        return;
    }
    data.errors.push(error);
    data.urls_queued = data.urls_queued.saturating_sub(1);
    data.last_activity = Utc::now();
}

fn decrement_queued(session: &CrawlSession) {
    let mut data = session.data.lock().unwrap();
    if data.state != SessionState::Running {
        return;
    }
    data.urls_queued = data.urls_queued.saturating_sub(1);
}

struct ExtractedPage {
    links: Vec<String>,
    forms: Vec<DiscoveredForm>,
    /// `(action, urlencoded body)` pairs for synthetic form submissions.
    submissions: Vec<(String, String)>,
}

/// Parses the page synchronously and returns owned results; the scraper
/// document never crosses an await point.
fn extract_page(session: &CrawlSession, body: &str, page_url: &Url) -> ExtractedPage {
    let document = Html::parse_document(body);

    let link_selector = Selector::parse("a[href]").unwrap();
    let mut links = Vec::new();
    for element in document.select(&link_selector) {
        if let Some(href) = element.value().attr("href") {
            if let Some(absolute) = resolve_url(page_url, href) {
                links.push(absolute);
            }
        }
    }

    let mut discovered = Vec::new();
    let mut submissions = Vec::new();
    if session.opts.extract_forms {
        let form_selector = Selector::parse("form").unwrap();
        for element in document.select(&form_selector) {
            let form = forms::extract_form(element, page_url, &session.id);

            if session.opts.submit_forms
                && !matches_any_regex(&form.action, &session.disallowed_regexes)
            {
                let mut serializer = form_urlencoded::Serializer::new(String::new());
                for (name, value) in forms::extract_form_data(element) {
                    serializer.append_pair(&name, &value);
                }
                submissions.push((form.action.clone(), serializer.finish()));
            }

            discovered.push(form);
        }
    }

    ExtractedPage {
        links,
        forms: discovered,
        submissions,
    }
}

/// Resolves an href against the page URL, dropping fragments and
/// non-navigational schemes.
fn resolve_url(base: &Url, href: &str) -> Option<String> {
    if href.is_empty()
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with('#')
    {
        return None;
    }

    let mut resolved = base.join(href).ok()?;
    resolved.set_fragment(None);
    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }
    Some(resolved.to_string())
}
