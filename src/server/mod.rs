/// RPC server: topic registry, per-topic poll loops, and graceful shutdown
mod handler;

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::protocol::encode_error;
use crate::{
    // ---
    log_debug,
    log_error,
    log_info,
    log_warn,
    ConnectionPtr,
    Envelope,
    Result,
    RpcConfig,
    RpcError,
};

pub use handler::{
    // ---
    handler_fn,
    EndpointHandler,
    ErrorEncoder,
    Handler,
    HandlerPtr,
    PayloadHook,
};

/// Upper bound on the pause after a broker error in a poll loop.
const MAX_ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Lifecycle of a [`Server`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Accepting registrations; not yet serving.
    Created,
    /// Poll loops are running.
    Serving,
    /// Shutdown signalled; topics are draining.
    ShuttingDown,
    /// Every topic has drained, or the server never served. Terminal.
    Closed,
}

/// RPC server.
///
/// Matches each incoming request's topic against the registered topics and
/// calls the corresponding [`Handler`]. Every registered topic gets one poll
/// loop that pops requests from the broker; every popped request runs in its
/// own task, so one topic may have any number of handlers in flight.
///
/// The poll loop blocks in `receive` for up to `poll_interval` and notices
/// shutdown between polls. A large interval therefore delays
/// [`Server::shutdown`]; a small one floods the broker with pops.
///
/// Cheap to clone; clones share one server.
///
/// # Example
///
/// ```no_run
/// use gogarin_rpc::{create_connection, handler_fn, RpcConfig, Server};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Info { name: String, version: String }
///
/// # async fn example() -> gogarin_rpc::Result<()> {
/// let config = RpcConfig::redis("redis://localhost:6379");
/// let conn = create_connection(&config).await?;
///
/// let server = Server::with_config(conn, &config);
/// server.handle("satellite.register", handler_fn(|info: Info| async move { Ok(info) }));
///
/// let serving = tokio::spawn({
///     let server = server.clone();
///     async move { server.serve().await }
/// });
///
/// tokio::signal::ctrl_c().await.ok();
/// server.shutdown(config.shutdown_timeout).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    conn: ConnectionPtr,
    poll_interval: Duration,
    lifecycle: Mutex<Lifecycle>,

    /// Fired exactly once; read by every poll loop.
    shutdown: CancellationToken,

    /// One task per topic. Each finishes only after its topic has drained.
    pollers: TaskTracker,
}

struct Lifecycle {
    state: ServerState,

    /// Written only while `Created`; handed to the poll loops by `serve`.
    registry: HashMap<String, HandlerPtr>,
}

impl Server {
    // ---

    /// Create a server polling `conn` every `poll_interval`.
    pub fn new(conn: ConnectionPtr, poll_interval: Duration) -> Self {
        // ---
        Self {
            inner: Arc::new(Inner {
                conn,
                poll_interval,
                lifecycle: Mutex::new(Lifecycle {
                    state: ServerState::Created,
                    registry: HashMap::new(),
                }),
                shutdown: CancellationToken::new(),
                pollers: TaskTracker::new(),
            }),
        }
    }

    /// Create a server taking its poll interval from `config`.
    pub fn with_config(conn: ConnectionPtr, config: &RpcConfig) -> Self {
        Self::new(conn, config.poll_interval)
    }

    pub fn state(&self) -> ServerState {
        lock_ignore_poison(&self.inner.lifecycle).state
    }

    /// Registered topics, sorted. Empty once serving has begun.
    pub fn topics(&self) -> Vec<String> {
        // ---
        let lifecycle = lock_ignore_poison(&self.inner.lifecycle);
        let mut topics: Vec<String> = lifecycle.registry.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Register `handler` for `topic`.
    ///
    /// # Panics
    ///
    /// Registration is startup configuration, so a mistake here is a bug
    /// rather than a runtime condition. Panics if:
    /// - `topic` is empty,
    /// - `topic` already has a handler,
    /// - the server has left the `Created` state.
    pub fn handle<H>(&self, topic: &str, handler: H)
    where
        H: Handler + 'static,
    {
        self.handle_shared(topic, Arc::new(handler));
    }

    /// [`Server::handle`] for an already shared handler.
    pub fn handle_shared(&self, topic: &str, handler: HandlerPtr) {
        // ---
        let mut lifecycle = lock_ignore_poison(&self.inner.lifecycle);

        if topic.is_empty() {
            panic!("server: invalid topic {topic:?}");
        }
        if lifecycle.state != ServerState::Created {
            panic!(
                "server: registration for {topic} after serve (state {:?})",
                lifecycle.state
            );
        }
        if lifecycle.registry.contains_key(topic) {
            panic!("server: multiple registrations for {topic}");
        }

        lifecycle.registry.insert(topic.to_string(), handler);
    }

    /// Serve every registered topic until shutdown.
    ///
    /// Starts one poll loop per topic, then blocks until [`Server::shutdown`]
    /// fires and every topic has drained.
    ///
    /// # Errors
    ///
    /// - [`RpcError::ServerClosed`] immediately, if shutdown has begun or
    ///   finished.
    /// - [`RpcError::AlreadyServing`] immediately, if another `serve` call is
    ///   running.
    pub async fn serve(&self) -> Result<()> {
        // ---
        let registry = {
            let mut lifecycle = lock_ignore_poison(&self.inner.lifecycle);
            match lifecycle.state {
                ServerState::ShuttingDown | ServerState::Closed => {
                    return Err(RpcError::ServerClosed)
                }
                ServerState::Serving => return Err(RpcError::AlreadyServing),
                ServerState::Created => {}
            }
            lifecycle.state = ServerState::Serving;
            std::mem::take(&mut lifecycle.registry)
        };

        if registry.is_empty() {
            log_warn!("server: serving with no registered topics");
        }

        for (topic, handler) in registry {
            log_info!("serve {topic}");
            self.inner.pollers.spawn(poll_topic(
                self.inner.conn.clone(),
                topic,
                handler,
                self.inner.poll_interval,
                self.inner.shutdown.clone(),
            ));
        }
        self.inner.pollers.close();

        self.inner.shutdown.cancelled().await;
        self.inner.pollers.wait().await;

        self.mark_closed();
        Ok(())
    }

    /// Stop serving, waiting up to `deadline` for in-flight handlers.
    ///
    /// The first call fires the shutdown signal. Poll loops stop popping new
    /// requests, wait for their topic's handlers to finish, and report
    /// drained. Handlers are never interrupted: if `deadline` passes first,
    /// they keep running and their answers are still delivered.
    ///
    /// Calling this on a closed server is a no-op. Calling it before
    /// [`Server::serve`] closes the server outright.
    ///
    /// # Errors
    ///
    /// [`RpcError::DeadlineExceeded`] if some topic has not drained by
    /// `deadline`.
    pub async fn shutdown(&self, deadline: Duration) -> Result<()> {
        // ---
        {
            let mut lifecycle = lock_ignore_poison(&self.inner.lifecycle);
            match lifecycle.state {
                ServerState::Closed => return Ok(()),
                ServerState::Created => {
                    lifecycle.state = ServerState::Closed;
                    lifecycle.registry.clear();
                    self.inner.shutdown.cancel();
                    return Ok(());
                }
                ServerState::Serving => {
                    lifecycle.state = ServerState::ShuttingDown;
                }
                ServerState::ShuttingDown => {}
            }
        }

        self.inner.shutdown.cancel();

        match tokio::time::timeout(deadline, self.inner.pollers.wait()).await {
            Ok(()) => {
                self.mark_closed();
                Ok(())
            }
            Err(_) => {
                log_warn!("server: shutdown deadline of {deadline:?} exceeded, handlers still running");
                Err(RpcError::DeadlineExceeded)
            }
        }
    }

    fn mark_closed(&self) {
        lock_ignore_poison(&self.inner.lifecycle).state = ServerState::Closed;
    }
}

/// Poll loop for one topic.
///
/// Never has two `receive` calls outstanding. On shutdown it stops popping,
/// waits for every handler it spawned, and returns.
async fn poll_topic(
    conn: ConnectionPtr,
    topic: String,
    handler: HandlerPtr,
    poll_interval: Duration,
    shutdown: CancellationToken,
) {
    // ---
    let requests = TaskTracker::new();

    loop {
        if shutdown.is_cancelled() {
            requests.close();
            requests.wait().await;
            log_info!("done {topic}");
            return;
        }

        match conn.receive(&topic, poll_interval).await {
            Ok(env) => {
                requests.spawn(dispatch(
                    conn.clone(),
                    topic.clone(),
                    handler.clone(),
                    env,
                ));
            }
            Err(RpcError::Timeout) => {
                log_debug!("{topic}: poll timeout");
            }
            Err(err) => {
                log_error!("{topic}: receive failed: {err}");
                // Keep polling, but don't spin against a broker that fails
                // instantly.
                let pause = poll_interval.min(MAX_ERROR_PAUSE);
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }
    }
}

/// Run the handler for one request and post its answer.
///
/// A panicking handler is answered with an error response; the poll loop is
/// unaffected.
async fn dispatch(conn: ConnectionPtr, topic: String, handler: HandlerPtr, env: Envelope) {
    // ---
    let Envelope { reply_topic, data } = env;

    let answer = match AssertUnwindSafe(handler.serve_rpc(data)).catch_unwind().await {
        Ok(answer) => answer,
        Err(panic) => {
            let msg = panic_message(panic.as_ref());
            log_error!("serving {topic}: handler panicked: {msg}");
            encode_error(&RpcError::Handler(format!("handler panicked: {msg}")))
        }
    };

    if reply_topic.is_empty() {
        log_warn!("{topic}: request carried no reply topic, answer dropped");
        return;
    }

    if let Err(err) = conn.respond(&reply_topic, answer).await {
        log_error!("{topic}: respond to {reply_topic} failed: {err}");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    // ---
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Lifecycle updates are single assignments, so a poisoned lock still holds
/// a consistent state.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
