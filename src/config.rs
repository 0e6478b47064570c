//! Configuration types.

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Identity the hub uses as sender for its own status broadcasts.
pub const DEFAULT_HUB_JID: &str = "optimizer-hub";

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Period of the matching loop pairing free workers with queued items.
    pub tick_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// Optimization registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How often finished tasks are checked for eviction.
    pub sweep_interval: Duration,
    /// How long a finished task stays queryable.
    pub task_keep_alive: Duration,
    /// Capacity of the snapshot broadcast channel.
    pub broadcast_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            task_keep_alive: Duration::from_secs(3600), // 1 hour
            broadcast_capacity: 256,
        }
    }
}

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub bind_addr: String,
    /// Shared token remotes must present when connecting. `None` disables the check.
    pub token: Option<SecretString>,
    pub hub_jid: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8090".to_string(),
            token: None,
            hub_jid: DEFAULT_HUB_JID.to_string(),
        }
    }
}

/// Full hub configuration.
#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    pub dispatch: DispatchConfig,
    pub registry: RegistryConfig,
    pub transport: TransportConfig,
}

impl HubConfig {
    /// Build from `OPTIMIZER_HUB_*` environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let tick_ms = env_or(
            "OPTIMIZER_HUB_DISPATCH_INTERVAL_MS",
            defaults.dispatch.tick_interval.as_millis() as u64,
        );
        let sweep_secs = env_or(
            "OPTIMIZER_HUB_SWEEP_INTERVAL_SECS",
            defaults.registry.sweep_interval.as_secs(),
        );
        let keep_alive_secs = env_or(
            "OPTIMIZER_HUB_TASK_KEEP_ALIVE_SECS",
            defaults.registry.task_keep_alive.as_secs(),
        );
        let broadcast_capacity = env_or(
            "OPTIMIZER_HUB_BROADCAST_CAPACITY",
            defaults.registry.broadcast_capacity,
        );

        Self {
            dispatch: DispatchConfig {
                tick_interval: Duration::from_millis(tick_ms.max(1)),
            },
            registry: RegistryConfig {
                sweep_interval: Duration::from_secs(sweep_secs.max(1)),
                task_keep_alive: Duration::from_secs(keep_alive_secs),
                broadcast_capacity: broadcast_capacity.max(1),
            },
            transport: TransportConfig {
                bind_addr: std::env::var("OPTIMIZER_HUB_BIND")
                    .unwrap_or(defaults.transport.bind_addr),
                token: std::env::var("OPTIMIZER_HUB_TOKEN")
                    .ok()
                    .filter(|t| !t.is_empty())
                    .map(SecretString::from),
                hub_jid: std::env::var("OPTIMIZER_HUB_JID").unwrap_or(defaults.transport.hub_jid),
            },
        }
    }
}

/// Parse a single environment value.
pub fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("cannot parse {raw:?}"),
        })
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw).unwrap_or_else(|e| {
            tracing::warn!("{}; using default", e);
            default
        }),
        Err(_) => default,
    }
}
