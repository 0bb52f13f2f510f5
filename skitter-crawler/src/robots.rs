//! Minimal robots.txt support: one fetch per host, `User-agent: *` group
//! only, prefix-matched `Disallow` rules.

use std::collections::HashMap;
use std::sync::RwLock;

use reqwest::Client;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Default)]
struct RobotsPolicy {
    disallow: Vec<String>,
}

impl RobotsPolicy {
    fn allows(&self, path: &str) -> bool {
        for rule in &self.disallow {
            if rule == "/" {
                return false;
            }
            if !rule.is_empty() && path.starts_with(rule.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Per-session robots cache keyed by `host[:port]`. A host whose robots.txt
/// cannot be fetched or parsed is treated as allowing everything.
#[derive(Debug, Default)]
pub struct RobotsCache {
    policies: RwLock<HashMap<String, RobotsPolicy>>,
}

impl RobotsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether `url` may be fetched, consulting (and filling) the
    /// per-host cache.
    pub async fn is_allowed(&self, client: &Client, url: &Url) -> bool {
        let host_key = match url.host_str() {
            Some(h) => match url.port() {
                Some(p) => format!("{}:{}", h, p),
                None => h.to_string(),
            },
            None => return true,
        };

        let cached = {
            let policies = self.policies.read().unwrap();
            policies.get(&host_key).cloned()
        };
        let policy = match cached {
            Some(p) => p,
            None => {
                let policy = self.fetch_policy(client, url).await;
                let mut policies = self.policies.write().unwrap();
                policies
                    .entry(host_key)
                    .or_insert_with(|| policy)
                    .clone()
            }
        };

        policy.allows(url.path())
    }

    async fn fetch_policy(&self, client: &Client, url: &Url) -> RobotsPolicy {
        let mut robots_url = url.clone();
        robots_url.set_path("/robots.txt");
        robots_url.set_query(None);
        robots_url.set_fragment(None);

        match client.get(robots_url.clone()).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(text) => parse_robots(&text),
                Err(_) => RobotsPolicy::default(),
            },
            Ok(_) => RobotsPolicy::default(),
            Err(e) => {
                debug!("robots.txt fetch failed for {}: {}", robots_url, e);
                RobotsPolicy::default()
            }
        }
    }
}

fn parse_robots(text: &str) -> RobotsPolicy {
    let mut disallow = Vec::new();
    let mut in_group = false;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = match line.split_once(':') {
            Some((k, v)) => (k.trim().to_lowercase(), v.trim()),
            None => continue,
        };
        if key == "user-agent" {
            in_group = value == "*";
        } else if key == "disallow" && in_group {
            disallow.push(value.to_string());
        }
    }

    RobotsPolicy { disallow }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_robots_wildcard_group() {
        let policy = parse_robots("User-agent: *\nDisallow: /secret\nDisallow: /tmp\n");
        assert!(!policy.allows("/secret"));
        assert!(!policy.allows("/secret/page"));
        assert!(!policy.allows("/tmp"));
        assert!(policy.allows("/open"));
    }

    #[test]
    fn test_parse_robots_other_agent_ignored() {
        let policy = parse_robots("User-agent: googlebot\nDisallow: /secret\n");
        assert!(policy.allows("/secret"));
    }

    #[test]
    fn test_parse_robots_disallow_all() {
        let policy = parse_robots("User-agent: *\nDisallow: /\n");
        assert!(!policy.allows("/anything"));
    }

    #[test]
    fn test_parse_robots_empty_disallow() {
        let policy = parse_robots("User-agent: *\nDisallow:\n");
        assert!(policy.allows("/anything"));
    }
}
