use std::{env, io};

use clap::Parser;
use display_delegate::cli::{self, Cli};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "display_delegate=debug,display_delegate_config=debug";

fn main() -> anyhow::Result<()> {
    let directives = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_owned());
    let env_filter = EnvFilter::builder().parse_lossy(directives);
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();

    #[cfg(feature = "profile-with-tracy-ondemand")]
    let _client = tracy_client::Client::start();

    let cli = Cli::parse();
    cli::run(cli)
}
