use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use surge::config::{Args, Config};
use surge::harness;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log);

    let cfg = Config::load(&args)?;
    info!("Starting surge load generator");
    info!("Target servers: {}", cfg.servers);

    let report = harness::run(&cfg).await?;
    println!("{}", report);
    Ok(())
}

fn init_logging(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
