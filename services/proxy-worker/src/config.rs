//! Proxy worker node configuration, env-var-first (spec §6 CLI surface).

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "proxy-worker", version, about = "Distributed HTTP proxy worker node")]
pub struct NodeConfig {
    /// Stable identifier for this node; subjects are scoped under it.
    #[arg(long, env = "NODE_ID")]
    pub node_id: String,

    /// Service prefix shared by the whole proxy fabric.
    #[arg(long, env = "SERVICE", default_value = "proxy")]
    pub service: String,

    /// Bus connection URL.
    #[arg(long, env = "BUS_URL", default_value = "nats://127.0.0.1:4222")]
    pub bus_url: String,

    /// Geographic/capability groups this node belongs to, comma-separated.
    #[arg(long, env = "GROUPS", value_delimiter = ',')]
    pub groups: Vec<String>,

    /// Minimum inter-launch gap in milliseconds. Omit for unlimited dispatch.
    #[arg(long, env = "RATE_LIMIT_MS")]
    pub rate_limit_ms: Option<u64>,

    /// Responses at or above this JSON byte length are gzip-compressed.
    #[arg(long, env = "GZIP_MIN_LENGTH", default_value_t = 1024)]
    pub gzip_min_length: usize,

    /// Interval between `event.heartbeat` publishes.
    #[arg(long, env = "HEARTBEAT_INTERVAL_S", default_value_t = 5)]
    pub heartbeat_interval_s: u64,

    /// Bind address for the admin HTTP listener (`/metrics`, `/healthz`).
    #[arg(long, env = "ADMIN_BIND", default_value = "0.0.0.0:9100")]
    pub admin_bind: String,

    /// Buffered scheduler capacity.
    #[arg(long, env = "SCHEDULER_CAPACITY", default_value_t = scheduler::DEFAULT_CAPACITY)]
    pub scheduler_capacity: usize,

    /// Upstream HTTP call timeout.
    #[arg(long, env = "UPSTREAM_TIMEOUT_S", default_value_t = 30)]
    pub upstream_timeout_s: u64,
}
