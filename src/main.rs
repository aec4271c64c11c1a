//! Self Improver - closed-loop self-improvement controller

use clap::Parser;
use self_improver::cli::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // WARN by default; --verbose adds info for this crate
    let mut filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into());
    if cli.verbose {
        filter = filter.add_directive("self_improver=info".parse()?);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    cli::run(cli).await
}
