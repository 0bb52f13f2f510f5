mod commands;
mod handlers;

pub(crate) const CLAP_STYLING: clap::builder::styling::Styles =
    clap::builder::styling::Styles::styled()
        .header(clap::builder::styling::AnsiColor::Green.on_default().bold())
        .usage(clap::builder::styling::AnsiColor::Green.on_default().bold())
        .literal(clap::builder::styling::AnsiColor::Cyan.on_default().bold())
        .placeholder(clap::builder::styling::AnsiColor::Cyan.on_default());

#[tokio::main]
async fn main() {
    let matches = commands::command_argument_builder().get_matches();

    match matches.subcommand() {
        Some(("crawl", sub_matches)) => {
            handlers::handle_crawl(sub_matches).await;
        }
        Some(("reflected", sub_matches)) => {
            handlers::handle_reflected(sub_matches);
        }
        _ => unreachable!("clap should ensure we don't get here"),
    }
}
