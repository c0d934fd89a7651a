//! Command-line surface for the fan-out hub binary. `HubConfig` itself
//! (§6's closed key set) is loaded from the environment by
//! `fanhub_config::HubConfig::from_env`; everything here is transport-level
//! (bind address, logging, origin policy) and sits outside that closed set
//! on purpose.

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "fanhub-server", about = "Realtime fan-out hub")]
pub struct Cli {
    /// Address to bind the HTTP/WebSocket listener to.
    #[arg(long, env = "FANHUB_BIND", default_value = "0.0.0.0:8080")]
    pub bind: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "FANHUB_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON instead of human-readable text.
    #[arg(long, env = "FANHUB_JSON_LOGS", default_value_t = false)]
    pub json_logs: bool,

    /// Comma-separated list of allowed WebSocket origins. Empty means no
    /// non-wildcard origins are allowed.
    #[arg(long, env = "FANHUB_ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,

    /// Allow any origin — intended for local development only.
    #[arg(long, env = "FANHUB_DEV_ALLOW_ANY_ORIGIN", default_value_t = false)]
    pub dev_allow_any_origin: bool,
}
