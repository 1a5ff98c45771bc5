#![warn(missing_docs)]

//! wikivcs administrative CLI

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wikivcs_store::cli::Cli;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    Cli::parse().run()
}
