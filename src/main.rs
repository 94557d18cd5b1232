use clap::Parser;
use ramlayer::cli::{self, Cli};
use ramlayer::config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "ramlayer=debug,info" } else { "ramlayer=info,warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    cli::run(cli, &config)
}
