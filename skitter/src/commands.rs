use crate::CLAP_STYLING;
use clap::{arg, command};

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("skitter")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("skitter")
        .styles(CLAP_STYLING)
        .subcommand_required(true)
        .subcommand(
            command!("crawl")
                .about(
                    "Crawl one or more seed URLs inside a scoped session and print the \
                captured flows.",
                )
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(true)
                        .help("Seed URL to crawl (repeatable)")
                        .action(clap::ArgAction::Append),
                )
                .arg(
                    arg!(-d --"domain" <DOMAIN>)
                        .required(false)
                        .help("Additional in-scope domain (repeatable)")
                        .action(clap::ArgAction::Append),
                )
                .arg(
                    arg!(-l --"label" <LABEL>)
                        .required(false)
                        .help("Session label"),
                )
                .arg(
                    arg!(--"max-depth" <N>)
                        .required(false)
                        .help("Maximum link depth from the seeds")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"max-requests" <N>)
                        .required(false)
                        .help("Maximum number of requests (0 = unlimited)")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"delay-ms" <MS>)
                        .required(false)
                        .help("Delay between requests in milliseconds")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    arg!(-t --"parallelism" <N>)
                        .required(false)
                        .help("Concurrent in-flight requests")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(-H --"header" <HEADER>)
                        .required(false)
                        .help("Extra request header as 'Name: value' (repeatable)")
                        .action(clap::ArgAction::Append),
                )
                .arg(
                    arg!(--"no-subdomains")
                        .required(false)
                        .help("Restrict scope to exact seed hosts")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"ignore-robots")
                        .required(false)
                        .help("Do not honor robots.txt")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"submit-forms")
                        .required(false)
                        .help("Submit discovered forms with their default values")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            command!("reflected")
                .about(
                    "Find request parameters reflected in a response, across common \
                encodings.",
                )
                .arg(
                    arg!(-r --"request" <PATH>)
                        .required(true)
                        .help("File holding the raw HTTP request")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(-s --"response" <PATH>)
                        .required(true)
                        .help("File holding the raw HTTP response")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                ),
        )
}
