//! In-memory flow indexes shared between the crawler backend and the rest of
//! the toolbox, plus the proxy-history collaborator interfaces consumed by
//! seed resolution.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::Result;

/// Reference from a crawler flow ID to its owning session.
#[derive(Debug, Clone)]
pub struct CrawlFlowEntry {
    pub session_id: String,
}

/// Maps crawler flow IDs to their session so callers can look up a flow
/// without knowing which session produced it. Thread-safe.
#[derive(Debug, Default)]
pub struct CrawlFlowStore {
    by_id: RwLock<HashMap<String, CrawlFlowEntry>>,
}

impl CrawlFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, flow_id: &str, session_id: &str) {
        let mut by_id = self.by_id.write().unwrap();
        by_id.insert(
            flow_id.to_string(),
            CrawlFlowEntry {
                session_id: session_id.to_string(),
            },
        );
    }

    pub fn lookup(&self, flow_id: &str) -> Option<CrawlFlowEntry> {
        let by_id = self.by_id.read().unwrap();
        by_id.get(flow_id).cloned()
    }

    pub fn exists(&self, flow_id: &str) -> bool {
        let by_id = self.by_id.read().unwrap();
        by_id.contains_key(flow_id)
    }

    pub fn delete(&self, flow_id: &str) {
        let mut by_id = self.by_id.write().unwrap();
        by_id.remove(flow_id);
    }

    /// Removes all flows belonging to a session.
    pub fn remove_session(&self, session_id: &str) {
        let mut by_id = self.by_id.write().unwrap();
        by_id.retain(|_, entry| entry.session_id != session_id);
    }

    pub fn count(&self) -> usize {
        let by_id = self.by_id.read().unwrap();
        by_id.len()
    }

    pub fn clear(&self) {
        let mut by_id = self.by_id.write().unwrap();
        by_id.clear();
    }
}

/// Reference from a proxy flow ID to its position in the proxy history.
#[derive(Debug, Clone)]
pub struct ProxyFlowEntry {
    pub offset: usize,
}

/// Index of proxy-history flow IDs. The crawler only reads it while
/// resolving seed flows.
#[derive(Debug, Default)]
pub struct ProxyFlowStore {
    by_id: RwLock<HashMap<String, ProxyFlowEntry>>,
}

impl ProxyFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, flow_id: &str, offset: usize) {
        let mut by_id = self.by_id.write().unwrap();
        by_id.insert(flow_id.to_string(), ProxyFlowEntry { offset });
    }

    pub fn lookup(&self, flow_id: &str) -> Option<ProxyFlowEntry> {
        let by_id = self.by_id.read().unwrap();
        by_id.get(flow_id).cloned()
    }
}

/// One recorded proxy exchange: raw request and response bytes.
#[derive(Debug, Clone, Default)]
pub struct ProxyEntry {
    pub request: Vec<u8>,
    pub response: Vec<u8>,
}

/// Access to recorded proxy history. Seed resolution fetches single entries
/// by offset to replay their auth headers.
#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn get_proxy_history(&self, limit: usize, offset: usize) -> Result<Vec<ProxyEntry>>;
}

/// Trivial in-memory proxy history, used by the CLI demo surface and tests.
#[derive(Debug, Default)]
pub struct MemoryProxyHistory {
    entries: RwLock<Vec<ProxyEntry>>,
}

impl MemoryProxyHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry and returns its offset.
    pub fn push(&self, entry: ProxyEntry) -> usize {
        let mut entries = self.entries.write().unwrap();
        entries.push(entry);
        entries.len() - 1
    }
}

#[async_trait]
impl HttpBackend for MemoryProxyHistory {
    async fn get_proxy_history(&self, limit: usize, offset: usize) -> Result<Vec<ProxyEntry>> {
        let entries = self.entries.read().unwrap();
        Ok(entries.iter().skip(offset).take(limit).cloned().collect())
    }
}
