use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use surge::server::{BenchServer, ServerOptions};

/// Benchmark peer for surge: answers every request with the canonical
/// success message. The failure/drop knobs exist to exercise the harness.
#[derive(Parser, Debug)]
#[command(name = "bench_server", about = "surge benchmark server", version)]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "127.0.0.1:7441")]
    listen: SocketAddr,
    /// Artificial service time per request, in milliseconds
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,
    /// Answer every Nth request with an error status (0 = never)
    #[arg(long, default_value_t = 0)]
    fail_every: u64,
    /// Swallow every Nth request without replying (0 = never)
    #[arg(long, default_value_t = 0)]
    drop_every: u64,
    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let opts = ServerOptions {
        delay: Duration::from_millis(args.delay_ms),
        fail_every: args.fail_every,
        drop_every: args.drop_every,
    };

    let server = BenchServer::bind(args.listen, opts).await?;
    server.run().await
}
