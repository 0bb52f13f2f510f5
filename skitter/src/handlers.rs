use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use clap::ArgMatches;
use indicatif::{ProgressBar, ProgressStyle};

use skitter_core::reflected::find_reflected;
use skitter_core::store::{CrawlFlowStore, MemoryProxyHistory, ProxyFlowStore};
use skitter_core::Config;
use skitter_crawler::{
    CrawlFlow, CrawlOptions, CrawlSeed, CrawlerBackend, ListFlowsOptions, SessionState,
};

pub async fn handle_crawl(sub_matches: &ArgMatches) {
    tracing_subscriber::fmt::init();

    let urls: Vec<String> = sub_matches
        .get_many::<String>("url")
        .map(|vals| vals.cloned().collect())
        .unwrap_or_default();
    let domains: Vec<String> = sub_matches
        .get_many::<String>("domain")
        .map(|vals| vals.cloned().collect())
        .unwrap_or_default();

    let mut headers = HashMap::new();
    if let Some(raw_headers) = sub_matches.get_many::<String>("header") {
        for h in raw_headers {
            if let Some((name, value)) = h.split_once(':') {
                headers.insert(name.trim().to_string(), value.trim().to_string());
            }
        }
    }

    let config = Config::default();

    // Validate seed hosts against the domain scoping policy before
    // submitting anything
    for raw in &urls {
        if let Ok(url) = skitter_core::httputil::parse_url_with_default_scheme(raw) {
            if let Some(host) = url.host_str() {
                let (allowed, reason) = config.is_domain_allowed(host);
                if !allowed {
                    eprintln!("✗ Seed {} rejected: {}", raw, reason);
                    std::process::exit(1);
                }
            }
        }
    }

    let opts = CrawlOptions {
        label: sub_matches
            .get_one::<String>("label")
            .cloned()
            .unwrap_or_default(),
        seeds: urls.iter().map(|u| CrawlSeed::url(u.as_str())).collect(),
        explicit_domains: domains,
        headers,
        max_depth: sub_matches.get_one::<usize>("max-depth").copied(),
        max_requests: sub_matches.get_one::<usize>("max-requests").copied(),
        delay: sub_matches
            .get_one::<u64>("delay-ms")
            .map(|ms| Duration::from_millis(*ms)),
        parallelism: sub_matches.get_one::<usize>("parallelism").copied(),
        include_subdomains: if sub_matches.get_flag("no-subdomains") {
            Some(false)
        } else {
            None
        },
        ignore_robots_txt: sub_matches.get_flag("ignore-robots"),
        submit_forms: if sub_matches.get_flag("submit-forms") {
            Some(true)
        } else {
            None
        },
        ..Default::default()
    };

    let backend = match CrawlerBackend::new(
        config.crawler,
        Arc::new(CrawlFlowStore::new()),
        Arc::new(ProxyFlowStore::new()),
        Arc::new(MemoryProxyHistory::new()),
    ) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("✗ Failed to build crawler backend: {}", e);
            std::process::exit(1);
        }
    };

    let info = match backend.create_session(opts).await {
        Ok(info) => info,
        Err(e) => {
            eprintln!("✗ Crawl failed: {}", e);
            std::process::exit(1);
        }
    };

    println!("\n🕷️  Session {} crawling {} seed(s)\n", info.id, urls.len());

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap(),
    );

    loop {
        let status = match backend.get_status(&info.id) {
            Ok(s) => s,
            Err(e) => {
                pb.finish_and_clear();
                eprintln!("✗ Status failed: {}", e);
                std::process::exit(1);
            }
        };
        pb.set_message(format!(
            "Crawling... {} visited, {} queued, {} errors",
            status.urls_visited, status.urls_queued, status.urls_errored
        ));
        pb.tick();

        if status.state != SessionState::Running {
            pb.finish_with_message(format!(
                "Crawl {}: {} URLs visited in {:.1}s",
                status.state,
                status.urls_visited,
                status.duration.as_secs_f64()
            ));
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let flows = backend
        .list_flows(&info.id, &ListFlowsOptions::default())
        .unwrap_or_default();
    print!("{}", generate_crawl_report(&flows));

    if let Ok(errors) = backend.list_errors(&info.id, 0) {
        if !errors.is_empty() {
            println!("# Errors:");
            for err in errors {
                println!("  {} {}", err.url, err.error);
            }
        }
    }

    backend.close();
}

pub fn handle_reflected(sub_matches: &ArgMatches) {
    let request_path = sub_matches
        .get_one::<std::path::PathBuf>("request")
        .expect("clap enforces --request");
    let response_path = sub_matches
        .get_one::<std::path::PathBuf>("response")
        .expect("clap enforces --response");

    let request = match fs::read(request_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("✗ Failed to read {}: {}", request_path.display(), e);
            std::process::exit(1);
        }
    };
    let response = match fs::read(response_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("✗ Failed to read {}: {}", response_path.display(), e);
            std::process::exit(1);
        }
    };

    let reflections = find_reflected(&request, &response);
    if reflections.is_empty() {
        println!("No reflected parameters found.");
        return;
    }

    println!("# Reflected parameters ({}):\n", reflections.len());
    for r in reflections {
        println!(
            "  {} ({}) = {:?} -> {}",
            r.name,
            r.source,
            r.value,
            r.locations.join(", ")
        );
    }
}

/// Renders captured flows grouped by host, one status-colored line per
/// path.
fn generate_crawl_report(flows: &[CrawlFlow]) -> String {
    let mut report = String::new();
    report.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");
    report.push_str("# Summary:\n");
    report.push_str(&format!("  Pages captured: {}\n", flows.len()));
    report.push_str("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");

    let mut by_host: HashMap<&str, Vec<&CrawlFlow>> = HashMap::new();
    for flow in flows {
        by_host.entry(flow.host.as_str()).or_default().push(flow);
    }

    for (host, host_flows) in by_host.iter() {
        report.push_str(&format!("## {}\n", host));
        report.push_str(&format!("  {} pages found\n\n", host_flows.len()));

        for flow in host_flows {
            let status_str = match flow.status_code {
                100..=199 => format!("\x1b[37m{}\x1b[0m", flow.status_code),
                200..=299 => format!("\x1b[32m{}\x1b[0m", flow.status_code),
                300..=399 => format!("\x1b[36m{}\x1b[0m", flow.status_code),
                400..=499 => format!("\x1b[33m{}\x1b[0m", flow.status_code),
                500..=599 => format!("\x1b[31m{}\x1b[0m", flow.status_code),
                _ => format!("{}", flow.status_code),
            };

            let mut line = format!("  {} {}", status_str, flow.path);
            if !flow.content_type.is_empty() && !flow.content_type.starts_with("text/html") {
                line.push_str(&format!(" \x1b[90m{}\x1b[0m", flow.content_type));
            }
            report.push_str(&line);
            report.push('\n');
        }
        report.push('\n');
    }

    report
}
