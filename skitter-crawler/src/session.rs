//! Per-session state: identity, effective options, the frontier, and the
//! lock-split mutable state shared between workers and API calls.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use regex::Regex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::transport::CaptureStore;
use crate::types::{CrawlError, CrawlFlow, DiscoveredForm, SessionInfo, SessionState};
use crate::robots::RobotsCache;

/// Options after config defaults have been applied.
#[derive(Debug, Clone)]
pub(crate) struct EffectiveOptions {
    pub headers: HashMap<String, String>,
    /// 0 means seeds only.
    pub max_depth: usize,
    /// 0 means unlimited.
    pub max_requests: usize,
    pub delay: Duration,
    pub random_delay: Duration,
    pub parallelism: usize,
    pub ignore_robots_txt: bool,
    pub extract_forms: bool,
    pub submit_forms: bool,
}

/// One unit of frontier work. A body turns the job into a form POST.
#[derive(Debug, Clone)]
pub(crate) struct Job {
    pub url: Url,
    pub depth: usize,
    pub body: Option<String>,
}

/// Shared work queue drained by the session's worker pool. `active` counts
/// jobs currently being processed so workers can tell an empty queue apart
/// from a drained crawl.
#[derive(Debug, Default)]
pub(crate) struct Frontier {
    queue: Mutex<VecDeque<Job>>,
    active: AtomicUsize,
    notify: Notify,
}

impl Frontier {
    pub fn push(&self, job: Job) {
        self.queue.lock().unwrap().push_back(job);
        self.notify.notify_waiters();
    }

    /// Pops the next job, marking it active. Callers must pair this with
    /// `finish`.
    pub fn try_pop(&self) -> Option<Job> {
        let mut queue = self.queue.lock().unwrap();
        let job = queue.pop_front();
        if job.is_some() {
            self.active.fetch_add(1, Ordering::SeqCst);
        }
        job
    }

    pub fn finish(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// True when no jobs are queued and none are in flight.
    pub fn is_idle(&self) -> bool {
        let queue = self.queue.lock().unwrap();
        queue.is_empty() && self.active.load(Ordering::SeqCst) == 0
    }

    pub async fn wait_for_work(&self) {
        self.notify.notified().await;
    }
}

/// Mutable session state guarded by one lock. Mutators check `state` so
/// flows, forms, and errors freeze the moment a session leaves `running`.
#[derive(Debug)]
pub(crate) struct SessionData {
    pub state: SessionState,
    pub flows_ordered: Vec<CrawlFlow>,
    pub flows_by_id: HashMap<String, usize>,
    pub forms: Vec<DiscoveredForm>,
    pub errors: Vec<CrawlError>,
    pub urls_queued: usize,
    pub request_count: usize,
    pub last_activity: DateTime<Utc>,
    pub last_returned_idx: usize,
    pub seed_headers: HashMap<String, String>,
}

pub(crate) struct CrawlSession {
    pub id: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Instant,
    pub opts: EffectiveOptions,

    /// Lowercased hostnames in scope (exact-match mode).
    pub allowed_domains: Vec<String>,
    /// Subdomain-mode URL filters; empty when exact matching is in force.
    pub domain_filters: Vec<Regex>,
    pub disallowed_regexes: Vec<Regex>,
    pub allowed_regexes: Vec<Regex>,

    pub data: Mutex<SessionData>,
    pub urls_seen: Mutex<HashSet<String>>,
    pub parent_urls: Mutex<HashMap<String, String>>,
    pub captures: CaptureStore,
    pub robots: RobotsCache,
    pub frontier: Frontier,
    pub cancel: CancellationToken,

    rate: RateGate,
}

impl CrawlSession {
    pub fn new(
        id: String,
        label: String,
        opts: EffectiveOptions,
        seed_headers: HashMap<String, String>,
        allowed_domains: Vec<String>,
        domain_filters: Vec<Regex>,
        disallowed_regexes: Vec<Regex>,
        allowed_regexes: Vec<Regex>,
    ) -> Self {
        let rate = RateGate::new(opts.delay, opts.random_delay);
        Self {
            id,
            label,
            created_at: Utc::now(),
            started_at: Instant::now(),
            opts,
            allowed_domains,
            domain_filters,
            disallowed_regexes,
            allowed_regexes,
            data: Mutex::new(SessionData {
                state: SessionState::Running,
                flows_ordered: Vec::new(),
                flows_by_id: HashMap::new(),
                forms: Vec::new(),
                errors: Vec::new(),
                urls_queued: 0,
                request_count: 0,
                last_activity: Utc::now(),
                last_returned_idx: 0,
                seed_headers,
            }),
            urls_seen: Mutex::new(HashSet::new()),
            parent_urls: Mutex::new(HashMap::new()),
            captures: CaptureStore::new(),
            robots: RobotsCache::new(),
            frontier: Frontier::default(),
            cancel: CancellationToken::new(),
            rate,
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            label: self.label.clone(),
            created_at: self.created_at,
            state: self.data.lock().unwrap().state,
        }
    }

    /// Marks a URL as seen. Returns true for the first caller, which then
    /// owns the enqueue.
    pub fn mark_seen(&self, url: &str) -> bool {
        self.urls_seen.lock().unwrap().insert(url.to_string())
    }

    /// Whether a URL's host falls inside the session's scope.
    pub fn in_scope(&self, url: &Url) -> bool {
        if !self.domain_filters.is_empty() {
            let s = url.as_str();
            return self.domain_filters.iter().any(|re| re.is_match(s));
        }
        match url.host_str() {
            Some(host) => {
                let host = host.to_lowercase();
                self.allowed_domains.iter().any(|d| *d == host)
            }
            None => false,
        }
    }

    /// Consumes the recorded parent for a URL; `"seed"` when none exists.
    pub fn take_parent(&self, url: &str) -> String {
        self.parent_urls
            .lock()
            .unwrap()
            .remove(url)
            .unwrap_or_else(|| "seed".to_string())
    }

    pub async fn wait_rate_turn(&self) {
        self.rate.wait_turn().await;
    }
}

/// Session-global dispatch spacing: consecutive request starts are at least
/// `delay` plus a uniform jitter in `[0, random_delay)` apart, independent
/// of how many workers are in flight.
#[derive(Debug)]
struct RateGate {
    next: Mutex<Instant>,
    delay: Duration,
    random_delay: Duration,
}

impl RateGate {
    fn new(delay: Duration, random_delay: Duration) -> Self {
        Self {
            next: Mutex::new(Instant::now()),
            delay,
            random_delay,
        }
    }

    async fn wait_turn(&self) {
        if self.delay.is_zero() && self.random_delay.is_zero() {
            return;
        }
        let wait = {
            let mut next = self.next.lock().unwrap();
            let now = Instant::now();
            let jitter = if self.random_delay.is_zero() {
                Duration::ZERO
            } else {
                rand::thread_rng().gen_range(Duration::ZERO..self.random_delay)
            };
            let start = if *next > now { *next } else { now };
            *next = start + self.delay + jitter;
            start.saturating_duration_since(now)
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}
