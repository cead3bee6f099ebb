//! Public RPC configuration.
//!
//! Holds the timing knobs used by [`Client`](crate::Client) and
//! [`Server`](crate::Server) plus the settings needed to reach a broker.
//! Values can be built in code with the `with_*` setters or read from
//! environment variables with [`RpcConfig::from_env`].

use std::str::FromStr;
use std::time::Duration;

use crate::{Result, RpcError};

/// Which [`Connection`](crate::Connection) implementation to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Process-local [`MemoryBroker`](crate::MemoryBroker).
    Memory,

    /// Redis lists (`transport_redis` feature).
    Redis,
}

impl FromStr for TransportKind {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self> {
        // ---
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(TransportKind::Memory),
            "redis" => Ok(TransportKind::Redis),
            other => Err(RpcError::Config(format!("invalid transport adapter: {other}"))),
        }
    }
}

/// Redis connection settings.
///
/// # Example
///
/// ```
/// use gogarin_rpc::RedisConfig;
/// use std::time::Duration;
///
/// let redis = RedisConfig {
///     address: "redis://cache:6379".into(),
///     read_timeout: Duration::from_secs(5),
///     ..RedisConfig::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    /// Broker address, e.g. `redis://localhost:6379`.
    pub address: String,

    /// Database to select when connecting.
    pub db: i64,

    /// Maximum number of idle connections kept for reuse.
    pub max_idle_connections: usize,

    /// Bound on dialing a new connection.
    pub connect_timeout: Duration,

    /// Bound on a single command reply, on top of any blocking wait.
    pub read_timeout: Duration,
}

impl Default for RedisConfig {
    /// - `address`: `redis://localhost:6379`
    /// - `db`: 0
    /// - `max_idle_connections`: 50
    /// - `connect_timeout`: 10s
    /// - `read_timeout`: 10s
    fn default() -> Self {
        Self {
            address: "redis://localhost:6379".to_string(),
            db: 0,
            max_idle_connections: 50,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
        }
    }
}

/// Transport and timing configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcConfig {
    // ---
    /// Connection implementation to create.
    pub transport: TransportKind,

    /// How long each server poll blocks waiting for a request.
    ///
    /// Shutdown is noticed between polls, so this also bounds how quickly a
    /// poll loop reacts to `Server::shutdown`. Keep it small enough for a
    /// fast shutdown and large enough not to flood the broker.
    ///
    /// Default: 2 seconds
    pub poll_interval: Duration,

    /// Drain deadline handed to `Server::shutdown` on operator interrupt.
    ///
    /// Default: 30 seconds
    pub shutdown_timeout: Duration,

    /// How long a client waits for an answer.
    ///
    /// Default: 10 seconds
    pub request_timeout: Duration,

    /// Redis settings; ignored for [`TransportKind::Memory`].
    pub redis: RedisConfig,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Memory,
            poll_interval: Duration::from_millis(2000),
            shutdown_timeout: Duration::from_millis(30000),
            request_timeout: Duration::from_secs(10),
            redis: RedisConfig::default(),
        }
    }
}

impl RpcConfig {
    // ---

    /// Config for the in-memory broker.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Config for a Redis broker at `address`.
    pub fn redis(address: impl Into<String>) -> Self {
        // ---
        Self {
            transport: TransportKind::Redis,
            redis: RedisConfig {
                address: address.into(),
                ..RedisConfig::default()
            },
            ..Self::default()
        }
    }

    /// Set the server poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the shutdown drain deadline.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the client request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Read configuration from the process environment.
    ///
    /// Variables are named `<PREFIX>_TRANSPORT_<FIELD>` with `prefix`
    /// upper-cased; see [`RpcConfig::from_lookup`] for the full list.
    pub fn from_env(prefix: &str) -> Result<Self> {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`; unset keys keep their defaults.
    ///
    /// | key | field |
    /// |-----|-------|
    /// | `<P>_TRANSPORT_ADAPTER` | `transport` (`memory` \| `redis`) |
    /// | `<P>_TRANSPORT_POLL_TIMEOUT_IN_MS` | `poll_interval` |
    /// | `<P>_TRANSPORT_SHUTDOWN_TIMEOUT_IN_MS` | `shutdown_timeout` |
    /// | `<P>_TRANSPORT_REQUEST_TIMEOUT_IN_MS` | `request_timeout` |
    /// | `<P>_TRANSPORT_REDIS_ADDRESS` | `redis.address` |
    /// | `<P>_TRANSPORT_REDIS_DB` | `redis.db` |
    /// | `<P>_TRANSPORT_REDIS_MAX_IDLE_CONNECTIONS` | `redis.max_idle_connections` |
    /// | `<P>_TRANSPORT_REDIS_CONNECT_TIMEOUT_IN_MS` | `redis.connect_timeout` |
    /// | `<P>_TRANSPORT_REDIS_READ_TIMEOUT_IN_MS` | `redis.read_timeout` |
    ///
    /// # Errors
    ///
    /// [`RpcError::Config`] for an unknown adapter or a value that does not
    /// parse.
    ///
    /// # Example
    ///
    /// ```
    /// use gogarin_rpc::{RpcConfig, TransportKind};
    /// use std::time::Duration;
    ///
    /// let config = RpcConfig::from_lookup("app", |key| match key {
    ///     "APP_TRANSPORT_ADAPTER" => Some("redis".into()),
    ///     "APP_TRANSPORT_POLL_TIMEOUT_IN_MS" => Some("250".into()),
    ///     _ => None,
    /// })
    /// .unwrap();
    ///
    /// assert_eq!(config.transport, TransportKind::Redis);
    /// assert_eq!(config.poll_interval, Duration::from_millis(250));
    /// ```
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // ---
        let base = format!("{}_TRANSPORT", prefix.to_ascii_uppercase());
        let get = |field: &str| {
            let key = format!("{base}_{field}");
            lookup(&key).map(|value| (key, value))
        };

        let mut config = Self::default();

        if let Some((_, value)) = get("ADAPTER") {
            config.transport = value.parse()?;
        }
        if let Some(found) = get("POLL_TIMEOUT_IN_MS") {
            config.poll_interval = parse_millis(found)?;
        }
        if let Some(found) = get("SHUTDOWN_TIMEOUT_IN_MS") {
            config.shutdown_timeout = parse_millis(found)?;
        }
        if let Some(found) = get("REQUEST_TIMEOUT_IN_MS") {
            config.request_timeout = parse_millis(found)?;
        }
        if let Some((_, value)) = get("REDIS_ADDRESS") {
            config.redis.address = value;
        }
        if let Some(found) = get("REDIS_DB") {
            config.redis.db = parse_value(found)?;
        }
        if let Some(found) = get("REDIS_MAX_IDLE_CONNECTIONS") {
            config.redis.max_idle_connections = parse_value(found)?;
        }
        if let Some(found) = get("REDIS_CONNECT_TIMEOUT_IN_MS") {
            config.redis.connect_timeout = parse_millis(found)?;
        }
        if let Some(found) = get("REDIS_READ_TIMEOUT_IN_MS") {
            config.redis.read_timeout = parse_millis(found)?;
        }

        Ok(config)
    }
}

fn parse_value<T>((key, value): (String, String)) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|err| RpcError::Config(format!("{key}={value:?}: {err}")))
}

fn parse_millis(found: (String, String)) -> Result<Duration> {
    parse_value::<u64>(found).map(Duration::from_millis)
}
