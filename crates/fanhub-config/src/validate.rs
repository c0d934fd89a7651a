//! Environment loading and validation for [`crate::HubConfig`].

use std::env;
use std::str::FromStr;

use thiserror::Error;

use crate::schema::HubConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be greater than zero, got {value}")]
    NotPositive { key: &'static str, value: i64 },
    #[error("{key} is set but not a valid {expected}: {raw:?}")]
    Malformed {
        key: &'static str,
        expected: &'static str,
        raw: String,
    },
    #[error("ws.pingPeriodSec ({ping}) must be less than ws.readDeadlineSec ({read})")]
    PingPeriodExceedsReadDeadline { ping: u64, read: u64 },
}

fn parse_env<T: FromStr>(key: &'static str, expected: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Malformed { key, expected, raw }),
        Err(_) => Ok(None),
    }
}

impl HubConfig {
    /// Load the closed set of recognized environment variables, falling
    /// back to the spec's documented defaults for anything unset.
    /// Unrecognized variables are ignored rather than rejected.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = HubConfig::default();

        if let Some(v) = parse_env::<usize>("HUB_MAX_CLIENTS", "usize")? {
            cfg.max_clients = v;
        }

        if let Ok(v) = env::var("HUB_BUS_URL") {
            cfg.bus_url = v;
        }
        if let Ok(v) = env::var("HUB_BUS_EXCHANGE") {
            cfg.bus_exchange = v;
        }
        if let Ok(v) = env::var("HUB_BUS_ROUTING_KEY") {
            cfg.bus_routing_key = v;
        }
        if let Some(v) = parse_env::<u16>("HUB_BUS_PREFETCH", "u16")? {
            cfg.bus_prefetch = v;
        }
        if let Some(v) = parse_env::<usize>("HUB_BUS_WORKER_COUNT", "usize")? {
            cfg.bus_worker_count = v;
        }
        if let Some(v) = parse_env::<usize>("HUB_BUS_POOL_SIZE", "usize")? {
            cfg.bus_pool_size = v;
        }
        if let Some(v) = parse_env::<i64>("HUB_BUS_USER_QUEUE_TTL_MS", "i64")? {
            cfg.bus_user_queue_ttl_ms = v;
        }
        if let Some(v) = parse_env::<i64>("HUB_BUS_USER_QUEUE_MAX_LEN", "i64")? {
            cfg.bus_user_queue_max_len = v;
        }

        if let Ok(v) = env::var("HUB_PUBSUB_URL") {
            cfg.pubsub_url = v;
        }

        if let Some(v) = parse_env::<u64>("HUB_WS_READ_DEADLINE_SEC", "u64")? {
            cfg.ws_read_deadline_sec = v;
        }
        if let Some(v) = parse_env::<u64>("HUB_WS_PING_PERIOD_SEC", "u64")? {
            cfg.ws_ping_period_sec = v;
        }
        if let Some(v) = parse_env::<u64>("HUB_WS_WRITE_DEADLINE_SEC", "u64")? {
            cfg.ws_write_deadline_sec = v;
        }
        if let Some(v) = parse_env::<usize>("HUB_WS_MAX_MESSAGE_BYTES", "usize")? {
            cfg.ws_max_message_bytes = v;
        }
        if let Some(v) = parse_env::<usize>("HUB_WS_OUTBOUND_BUFFER", "usize")? {
            cfg.ws_outbound_buffer = v;
        }

        if let Some(v) = parse_env::<u32>("HUB_RATE_CAPACITY", "u32")? {
            cfg.rate_capacity = v;
        }
        if let Some(v) = parse_env::<u64>("HUB_RATE_WINDOW_SEC", "u64")? {
            cfg.rate_window_sec = v;
        }

        if let Some(v) = parse_env::<u64>("HUB_IDLE_CHANNEL_TIMEOUT_SEC", "u64")? {
            cfg.idle_channel_timeout_sec = v;
        }
        if let Some(v) = parse_env::<u64>("HUB_SWEEP_INTERVAL_SEC", "u64")? {
            cfg.sweep_interval_sec = v;
        }

        if let Some(v) = parse_env::<usize>("HUB_EGRESS_BUFFER", "usize")? {
            cfg.egress_buffer = v;
        }
        if let Some(v) = parse_env::<u64>("HUB_PUBLISH_DEADLINE_SEC", "u64")? {
            cfg.publish_deadline_sec = v;
        }

        validate(&cfg)?;
        Ok(cfg)
    }
}

/// Check the invariants the spec's closed key set implies: every bound must
/// be positive, and the ping period must leave room under the read deadline
/// or pongs would never arrive in time to refresh it.
pub fn validate(cfg: &HubConfig) -> Result<(), ConfigError> {
    macro_rules! require_positive {
        ($field:expr, $name:expr) => {
            if $field == 0 {
                return Err(ConfigError::NotPositive {
                    key: $name,
                    value: 0,
                });
            }
        };
    }

    require_positive!(cfg.max_clients, "maxClients");
    require_positive!(cfg.bus_worker_count, "bus.workerCount");
    require_positive!(cfg.bus_pool_size, "bus.poolSize");
    require_positive!(cfg.ws_read_deadline_sec, "ws.readDeadlineSec");
    require_positive!(cfg.ws_write_deadline_sec, "ws.writeDeadlineSec");
    require_positive!(cfg.ws_max_message_bytes, "ws.maxMessageBytes");
    require_positive!(cfg.rate_capacity, "rate.capacity");
    require_positive!(cfg.rate_window_sec, "rate.windowSec");
    require_positive!(cfg.egress_buffer, "egressBuffer");
    require_positive!(cfg.publish_deadline_sec, "publishDeadlineSec");

    if cfg.ws_ping_period_sec >= cfg.ws_read_deadline_sec {
        return Err(ConfigError::PingPeriodExceedsReadDeadline {
            ping: cfg.ws_ping_period_sec,
            read: cfg.ws_read_deadline_sec,
        });
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_validate_cleanly() {
        let cfg = HubConfig::default();
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn zero_max_clients_is_rejected() {
        let mut cfg = HubConfig::default();
        cfg.max_clients = 0;
        assert!(matches!(
            validate(&cfg),
            Err(ConfigError::NotPositive { key: "maxClients", .. })
        ));
    }

    #[test]
    fn ping_period_must_be_under_read_deadline() {
        let mut cfg = HubConfig::default();
        cfg.ws_ping_period_sec = cfg.ws_read_deadline_sec;
        assert!(matches!(
            validate(&cfg),
            Err(ConfigError::PingPeriodExceedsReadDeadline { .. })
        ));
    }

    #[test]
    #[allow(unsafe_code)]
    fn from_env_overrides_defaults() {
        let _guard = ENV_LOCK.lock().expect("lock poisoned");
        unsafe {
            env::set_var("HUB_MAX_CLIENTS", "42");
        }
        let cfg = HubConfig::from_env().expect("valid config");
        assert_eq!(cfg.max_clients, 42);
        unsafe {
            env::remove_var("HUB_MAX_CLIENTS");
        }
    }

    #[test]
    #[allow(unsafe_code)]
    fn from_env_ignores_unrecognized_keys() {
        let _guard = ENV_LOCK.lock().expect("lock poisoned");
        unsafe {
            env::set_var("HUB_TOTALLY_UNRECOGNIZED", "whatever");
        }
        let cfg = HubConfig::from_env().expect("valid config");
        assert_eq!(cfg.max_clients, HubConfig::default().max_clients);
        unsafe {
            env::remove_var("HUB_TOTALLY_UNRECOGNIZED");
        }
    }
}
