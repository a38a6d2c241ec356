//! Proxy gateway configuration, env-var-first (spec §6 CLI surface).

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "proxy-gateway", version, about = "HTTP entry point for the distributed proxy fabric")]
pub struct GatewayConfig {
    /// Service prefix shared by the whole proxy fabric.
    #[arg(long, env = "SERVICE", default_value = "proxy")]
    pub service: String,

    /// Bus connection URL.
    #[arg(long, env = "BUS_URL", default_value = "nats://127.0.0.1:4222")]
    pub bus_url: String,

    /// Bind address for the public HTTP surface.
    #[arg(long, env = "HTTP_BIND", default_value = "0.0.0.0:8080")]
    pub http_bind: String,

    /// Bind address for the admin HTTP surface (`/metrics`, `/healthz`).
    #[arg(long, env = "ADMIN_BIND", default_value = "0.0.0.0:9101")]
    pub admin_bind: String,

    /// Default bus request timeout when `timeout_s` is zero or omitted.
    #[arg(long, env = "DEFAULT_TIMEOUT_S", default_value_t = 10)]
    pub default_timeout_s: u64,

    /// Bearer token required on `POST /request` when set. Authentication is
    /// optional, configured globally, and off by default.
    #[arg(long, env = "AUTH_TOKEN")]
    pub auth_token: Option<String>,
}
