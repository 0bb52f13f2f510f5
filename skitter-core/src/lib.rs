pub mod bundle;
pub mod config;
pub mod httputil;
pub mod ids;
pub mod reflected;
pub mod store;
pub mod strutil;

pub use config::{Config, CrawlerConfig};
pub use reflected::{find_reflected, Reflection};
pub use store::{CrawlFlowStore, HttpBackend, ProxyEntry, ProxyFlowStore};

use thiserror::Error;

/// Errors from the shared core: config handling, bundle export, and the
/// proxy-history collaborators.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("proxy history error: {0}")]
    ProxyHistory(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
