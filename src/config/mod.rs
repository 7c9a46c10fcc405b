use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use clap::Parser;
use serde::Deserialize;

/// Command line surface. Flags override the config file, which overrides the
/// built-in defaults.
#[derive(Parser, Debug, Default)]
#[command(name = "surge", about = "RPC benchmark load generator", version)]
pub struct Args {
    /// Optional TOML file with run defaults
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Number of virtual users
    #[arg(short, long)]
    pub concurrency: Option<usize>,
    /// Total requests across all virtual users
    #[arg(short = 'n', long)]
    pub requests: Option<usize>,
    /// Server address(es), comma separated
    #[arg(short, long)]
    pub servers: Option<String>,
    /// Shared connection pool size
    #[arg(long)]
    pub pool: Option<usize>,
    /// Offered load in requests per second, 0 = unbounded
    #[arg(short, long)]
    pub rate: Option<u64>,
    /// Seconds to wait for outstanding replies after sending finishes
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Request payload size in bytes
    #[arg(long)]
    pub payload: Option<usize>,
    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub concurrency: usize,
    pub requests: usize,
    pub servers: String,
    pub pool: usize,
    pub rate: u64,
    pub timeout_secs: u64,
    pub payload_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: 50,
            requests: 100_000,
            servers: "127.0.0.1:7441".to_string(),
            pool: 8,
            rate: 0,
            timeout_secs: 30,
            payload_bytes: 512,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Resolve the effective configuration: defaults, then the file named by
    /// `--config`, then any explicit flags on top.
    pub fn load(args: &Args) -> Result<Self> {
        let mut cfg = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(v) = args.concurrency {
            cfg.concurrency = v;
        }
        if let Some(v) = args.requests {
            cfg.requests = v;
        }
        if let Some(v) = &args.servers {
            cfg.servers = v.clone();
        }
        if let Some(v) = args.pool {
            cfg.pool = v;
        }
        if let Some(v) = args.rate {
            cfg.rate = v;
        }
        if let Some(v) = args.timeout {
            cfg.timeout_secs = v;
        }
        if let Some(v) = args.payload {
            cfg.payload_bytes = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.concurrency > 0, "concurrency must be at least 1");
        ensure!(self.pool > 0, "pool size must be at least 1");
        ensure!(
            self.requests >= self.concurrency,
            "total requests ({}) must cover every virtual user ({})",
            self.requests,
            self.concurrency
        );
        ensure!(
            self.requests <= u32::MAX as usize,
            "total requests must fit the completion countdown ({} max)",
            u32::MAX
        );
        ensure!(self.timeout_secs > 0, "drain timeout must be positive");
        self.server_addrs()?;
        Ok(())
    }

    /// The comma-separated server list parsed into socket addresses.
    pub fn server_addrs(&self) -> Result<Vec<SocketAddr>> {
        let mut addrs = Vec::new();
        for part in self.servers.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            addrs.push(
                part.parse()
                    .with_context(|| format!("invalid server address {:?}", part))?,
            );
        }
        ensure!(!addrs.is_empty(), "at least one server address is required");
        Ok(addrs)
    }
}
