//! RPC benchmark harness: N virtual users drive requests through a fixed
//! pool of persistent connections while per-connection listeners correlate
//! replies back to their issue timestamps.

pub mod client;
pub mod config;
pub mod harness;
pub mod limiter;
pub mod pool;
pub mod protocol;
pub mod report;
pub mod server;

pub use config::Config;
pub use report::Report;
