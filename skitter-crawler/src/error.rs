use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlerError {
    #[error("backend is closed")]
    BackendClosed,

    #[error("max concurrent sessions ({0}) reached; stop an existing session first")]
    TooManySessions(usize),

    #[error("label {label:?} already in use by session {session_id}")]
    LabelExists { label: String, session_id: String },

    #[error("no valid domains: provide seed URLs, seed flows, or explicit domains")]
    NoDomains,

    #[error("invalid seed URL {url:?}: {reason}")]
    InvalidSeedUrl { url: String, reason: String },

    #[error("seed flow {0:?} not found in proxy history")]
    SeedFlowNotFound(String),

    #[error("seed flow {0:?} has no host header")]
    SeedFlowNoHost(String),

    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("session {id} is not running (state: {state}); create a new session instead")]
    SessionNotRunning { id: String, state: String },

    #[error("flow {0} not found")]
    FlowNotFound(String),

    #[error("failed to write bundle: {0}")]
    Bundle(#[source] skitter_core::CoreError),

    #[error("proxy history error: {0}")]
    ProxyHistory(#[source] skitter_core::CoreError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, CrawlerError>;
