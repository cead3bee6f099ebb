//! Redis list connection using `redis`.
//!
//! Implements [`Connection`] on top of two list commands:
//!
//! - `LPUSH topic <envelope>` for `send` and `respond`
//! - `BRPOP topic <seconds>` for `receive`
//!
//! Pushing at the head and popping from the tail makes every topic a FIFO
//! queue, and Redis hands each element to exactly one blocked consumer.
//!
//! ## Connection handling
//!
//! `BRPOP` occupies the connection it runs on until it returns. A
//! multiplexed connection pipelines every caller's commands over one socket,
//! so a blocking pop on a shared connection would stall every other request
//! behind it. Each command therefore checks out a connection of its own from
//! a small idle list, dialing a new one when the list is empty, and returns
//! it afterwards. At most `max_idle_connections` are kept; surplus
//! connections are dropped. A connection that produced an error is never
//! returned to the idle list.
//!
//! ## Timeouts
//!
//! `BRPOP` is given a fractional-second timeout (Redis >= 6). A timeout of
//! `0` means "block forever" to Redis, so sub-millisecond waits are rounded up
//! to one millisecond, and waits beyond a day are capped at a day; a capped
//! wait that elapses is reported as a timeout like any other. Every command additionally runs under a client-side
//! bound of `read_timeout` plus the blocking wait, so a dead socket surfaces
//! as [`RpcError::Broker`].

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use redis::aio::MultiplexedConnection;
use redis::{AsyncConnectionConfig, Value};

use crate::{
    //
    log_debug,
    log_error,
    log_info,
    Connection,
    Envelope,
    RedisConfig,
    Result,
    RpcError,
};

const MIN_BLOCKING_WAIT: Duration = Duration::from_millis(1);
const MAX_BLOCKING_WAIT: Duration = Duration::from_secs(86400);

/// Redis implementation of the [`Connection`] trait.
pub struct RedisConnection {
    // ---
    client: redis::Client,
    idle: Mutex<Vec<MultiplexedConnection>>,
    conn_config: AsyncConnectionConfig,
    max_idle: usize,
    read_timeout: Duration,
    address: String, // for logging only
}

impl RedisConnection {
    // ---

    /// Open a client for `config.address` and dial one connection eagerly, so
    /// an unreachable broker fails here rather than on the first call.
    ///
    /// # Errors
    ///
    /// [`RpcError::Broker`] if the address cannot be parsed or the broker is
    /// unreachable.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        // ---
        let url = connection_url(&config.address, config.db);

        let client = redis::Client::open(url.as_str()).map_err(|err| {
            let msg = format!("redis: failed to open client for {url}: {err}");
            log_error!("{msg}");
            RpcError::Broker(msg)
        })?;

        // The client-side bound in `run` replaces the library's response
        // timeout, which would otherwise cut long BRPOP waits short.
        let conn_config = AsyncConnectionConfig::new()
            .set_connection_timeout(Some(config.connect_timeout))
            .set_response_timeout(None);

        let this = Self {
            client,
            idle: Mutex::new(Vec::new()),
            conn_config,
            max_idle: config.max_idle_connections,
            read_timeout: config.read_timeout,
            address: url,
        };

        let first = this.checkout().await?;
        this.checkin(first);

        log_info!("redis: connected to {}", this.address);
        Ok(this)
    }

    async fn checkout(&self) -> Result<MultiplexedConnection> {
        // ---
        if let Some(conn) = lock_ignore_poison(&self.idle).pop() {
            return Ok(conn);
        }

        self.client
            .get_multiplexed_async_connection_with_config(&self.conn_config)
            .await
            .map_err(|err| {
                let msg = format!("redis: failed to connect to {}: {err}", self.address);
                log_error!("{msg}");
                RpcError::Broker(msg)
            })
    }

    fn checkin(&self, conn: MultiplexedConnection) {
        // ---
        let mut idle = lock_ignore_poison(&self.idle);
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }

    /// Run one command on a checked-out connection, bounded by
    /// `read_timeout + extra`.
    async fn run<T>(&self, cmd: redis::Cmd, extra: Duration) -> Result<T>
    where
        T: redis::FromRedisValue,
    {
        // ---
        let mut conn = self.checkout().await?;

        let bound = self.read_timeout.saturating_add(extra);
        let result = tokio::time::timeout(bound, cmd.query_async::<T>(&mut conn)).await;

        match result {
            Ok(Ok(value)) => {
                self.checkin(conn);
                Ok(value)
            }
            Ok(Err(err)) => {
                let msg = format!("redis: command failed on {}: {err}", self.address);
                log_error!("{msg}");
                Err(RpcError::Broker(msg))
            }
            Err(_) => {
                let msg = format!("redis: no reply from {} within {bound:?}", self.address);
                log_error!("{msg}");
                Err(RpcError::Broker(msg))
            }
        }
    }
}

#[async_trait::async_trait]
impl Connection for RedisConnection {
    // ---

    async fn send(&self, topic: &str, reply_topic: &str, payload: Bytes) -> Result<()> {
        // ---
        let wire = Envelope::request(reply_topic, payload).to_wire()?;

        let mut cmd = redis::cmd("LPUSH");
        cmd.arg(topic).arg(wire);

        self.run::<i64>(cmd, Duration::ZERO).await.map(|_| ())
    }

    async fn receive(&self, topic: &str, timeout: Duration) -> Result<Envelope> {
        // ---
        let wait = blocking_wait(timeout);

        let mut cmd = redis::cmd("BRPOP");
        cmd.arg(topic).arg(wait.as_secs_f64());

        let reply = self.run::<Value>(cmd, wait).await?;
        decode_pop_reply(topic, reply)
    }
}

/// Clamp a caller's timeout into what `BRPOP` accepts.
fn blocking_wait(timeout: Duration) -> Duration {
    timeout.clamp(MIN_BLOCKING_WAIT, MAX_BLOCKING_WAIT)
}

/// Map a `BRPOP` reply onto the connection contract.
fn decode_pop_reply(topic: &str, reply: Value) -> Result<Envelope> {
    // ---
    match reply {
        Value::Nil => {
            log_debug!("redis: BRPOP {topic} timed out");
            Err(RpcError::Timeout)
        }
        Value::Array(mut items) => {
            if items.len() != 2 {
                return Err(RpcError::InvalidResponse(format!(
                    "BRPOP {topic} returned {} elements, expected 2",
                    items.len()
                )));
            }
            match items.pop() {
                Some(Value::BulkString(bytes)) => Envelope::from_wire(&bytes),
                Some(Value::SimpleString(text)) => Envelope::from_wire(text.as_bytes()),
                other => Err(RpcError::InvalidResponse(format!(
                    "BRPOP {topic} returned non-string element: {other:?}"
                ))),
            }
        }
        other => Err(RpcError::InvalidResponse(format!(
            "BRPOP {topic} returned unexpected reply: {other:?}"
        ))),
    }
}

/// Append `/<db>` to an address that does not already select a database.
fn connection_url(address: &str, db: i64) -> String {
    // ---
    let has_scheme = address.contains("://");
    let base = if has_scheme {
        address.to_string()
    } else {
        format!("redis://{address}")
    };

    let after_scheme = base.split_once("://").map(|(_, rest)| rest).unwrap_or("");
    if db == 0 || after_scheme.contains('/') {
        base
    } else {
        format!("{base}/{db}")
    }
}

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
