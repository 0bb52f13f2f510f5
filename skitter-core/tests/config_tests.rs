// Tests for config defaults and the domain scoping policy

use std::fs;

use skitter_core::Config;

#[test]
fn test_default_config() {
    let cfg = Config::default();
    assert_eq!(cfg.crawler.default_parallelism, 2);
    assert_eq!(cfg.crawler.default_max_depth, 10);
    assert_eq!(cfg.crawler.default_max_requests, 1000);
    assert_eq!(cfg.crawler.default_delay_ms, 200);
    assert_eq!(cfg.crawler.max_concurrent_sessions, 3);
    assert_eq!(cfg.crawler.default_extract_forms, Some(true));
    assert_eq!(cfg.crawler.default_submit_forms, Some(false));
    assert!(cfg
        .crawler
        .default_disallowed_paths
        .contains(&"*logout*".to_string()));
}

#[test]
fn test_load_fills_missing_fields() {
    let path = std::env::temp_dir().join(format!("skitter-config-{}.json", std::process::id()));
    fs::write(&path, r#"{"crawler":{"default_parallelism":8}}"#).unwrap();

    let cfg = Config::load(&path).unwrap();
    assert_eq!(cfg.crawler.default_parallelism, 8);
    // Everything unspecified falls back to its default
    assert_eq!(cfg.crawler.default_max_depth, 10);
    assert_eq!(cfg.max_body_bytes, 10_485_760);
    assert_eq!(cfg.include_subdomains, Some(true));

    let _ = fs::remove_file(&path);
}

#[test]
fn test_load_or_default_missing_file() {
    let path = std::env::temp_dir().join("skitter-config-does-not-exist.json");
    let cfg = Config::load_or_default(&path).unwrap();
    assert_eq!(cfg.crawler.default_parallelism, 2);
}

#[test]
fn test_save_round_trip() {
    let path =
        std::env::temp_dir().join(format!("skitter-config-save-{}.json", std::process::id()));
    let mut cfg = Config::default();
    cfg.allowed_domains = vec!["example.com".to_string()];
    cfg.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.allowed_domains, vec!["example.com".to_string()]);

    let _ = fs::remove_file(&path);
}

// ============================================================================
// Domain Scoping Tests
// ============================================================================

#[test]
fn test_empty_allowlist_allows_all() {
    let cfg = Config::default();
    let (allowed, reason) = cfg.is_domain_allowed("anything.example.org");
    assert!(allowed);
    assert!(reason.is_empty());
}

#[test]
fn test_allowlist_exact_and_subdomains() {
    let mut cfg = Config::default();
    cfg.allowed_domains = vec!["example.com".to_string()];
    cfg.include_subdomains = Some(true);

    assert!(cfg.is_domain_allowed("example.com").0);
    assert!(cfg.is_domain_allowed("EXAMPLE.com").0);
    assert!(cfg.is_domain_allowed("a.example.com").0);
    assert!(cfg.is_domain_allowed("a.b.example.com").0);
    assert!(!cfg.is_domain_allowed("notexample.com").0);
    assert!(!cfg.is_domain_allowed("other.com").0);
}

#[test]
fn test_allowlist_without_subdomains() {
    let mut cfg = Config::default();
    cfg.allowed_domains = vec!["example.com".to_string()];
    cfg.include_subdomains = Some(false);

    assert!(cfg.is_domain_allowed("example.com").0);
    assert!(!cfg.is_domain_allowed("a.example.com").0);
}

#[test]
fn test_exclude_always_covers_subdomains() {
    let mut cfg = Config::default();
    cfg.exclude_domains = vec!["internal.corp".to_string()];

    let (allowed, reason) = cfg.is_domain_allowed("db.internal.corp");
    assert!(!allowed);
    assert!(reason.contains("exclude_domains"));
}

#[test]
fn test_port_stripped_before_matching() {
    let mut cfg = Config::default();
    cfg.allowed_domains = vec!["example.com".to_string()];
    cfg.include_subdomains = Some(false);

    assert!(cfg.is_domain_allowed("example.com:8443").0);
}
