//! assetflow - command-line asset pipeline for static sites

use std::process::ExitCode;

use assetflow::cli::{self, Cli};
use clap::Parser as _;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli::log_filter(cli.verbose, cli.quiet).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    cli::run(cli)
}
