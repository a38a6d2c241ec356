//! Agent configuration, env-var-first (spec §6 CLI surface).

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "agent", version, about = "Live-message ingestion agent")]
pub struct AgentConfig {
    /// Stable identifier for this agent; subjects are scoped under it.
    #[arg(long, env = "AGENT_ID")]
    pub agent_id: String,

    /// Subject prefix shared by the whole aggregation plane.
    #[arg(long, env = "PREFIX", default_value = "bilive")]
    pub prefix: String,

    /// Bus connection URL.
    #[arg(long, env = "BUS_URL", default_value = "nats://127.0.0.1:4222")]
    pub bus_url: String,

    /// Bind address for the admin HTTP listener (`/metrics`, `/healthz`).
    #[arg(long, env = "ADMIN_BIND", default_value = "0.0.0.0:9102")]
    pub admin_bind: String,

    /// Capacity of the internal raw-frame buffer whose depth is reported in
    /// `AgentStatus::buffer_depth`.
    #[arg(long, env = "FRAME_BUFFER_CAPACITY", default_value_t = 4096)]
    pub frame_buffer_capacity: usize,
}
