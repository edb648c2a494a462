use clap::Parser;
use market_meter::cli::{self, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => cli::serve::run().await,
        Command::Dashboard => cli::dashboard::run().await,
        Command::Estimate(args) => cli::estimate::run(args).await,
        Command::Pricing => cli::pricing::run().await,
    }
}
