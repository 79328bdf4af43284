use clap::Parser as _;
use madns::{setup_logging, App, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    setup_logging()?;

    App::run_until_completion(args).await
}
