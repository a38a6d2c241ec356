//! Controller configuration, env-var-first (spec §6 CLI surface).

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "controller", version, about = "Fleet manager and aggregation plane")]
pub struct ControllerConfig {
    /// Subject prefix shared by the whole aggregation plane.
    #[arg(long, env = "PREFIX", default_value = "bilive")]
    pub prefix: String,

    /// Bus connection URL.
    #[arg(long, env = "BUS_URL", default_value = "nats://127.0.0.1:4222")]
    pub bus_url: String,

    /// Bind address for the admin HTTP listener (`/metrics`, `/healthz`,
    /// and the API room provider's routes when configured).
    #[arg(long, env = "ADMIN_BIND", default_value = "0.0.0.0:9103")]
    pub admin_bind: String,

    /// Globally-configured upstream identity handed to every agent on init.
    #[arg(long, env = "IDENTITY_COOKIE")]
    pub identity_cookie: String,

    #[arg(long, env = "IDENTITY_UID", default_value_t = 0)]
    pub identity_uid: u64,

    #[arg(long, env = "IDENTITY_USER_AGENT")]
    pub identity_user_agent: Option<String>,

    /// Statically-provided room ids, comma-delimited. Empty unless the
    /// deployment doesn't need the dynamic API provider.
    #[arg(long, env = "STATIC_ROOMS", value_delimiter = ',')]
    pub static_rooms: Vec<u64>,

    /// Mount path for the dynamic room provider's `GET/DELETE :room_id`
    /// routes on the admin listener. Unset disables the API provider.
    #[arg(long, env = "API_PROVIDER_PATH")]
    pub api_provider_path: Option<String>,

    /// Dedup/aggregation window (spec §4.6 default 10 minutes).
    #[arg(long, env = "DEDUP_WINDOW_S", default_value_t = 600)]
    pub dedup_window_s: u64,

    /// Meta cache TTL (spec §4.6 default 30 minutes).
    #[arg(long, env = "META_CACHE_TTL_S", default_value_t = 30 * 60)]
    pub meta_cache_ttl_s: u64,

    /// Control-plane request/reply timeout (spec §5 default 3s).
    #[arg(long, env = "CONTROL_TIMEOUT_S", default_value_t = 3)]
    pub control_timeout_s: u64,

    /// Staleness threshold past which a READY agent loses READY (spec §5).
    #[arg(long, env = "STATUS_STALE_S", default_value_t = 3)]
    pub status_stale_s: u64,
}
