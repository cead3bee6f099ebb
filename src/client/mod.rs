// src/client/mod.rs
//! RPC client implementation.
//!
//! This module contains the [`Client`] type that satellites use to call a
//! topic served by a [`Server`](crate::Server), and the topic-bound
//! [`Endpoint`] built from it.
//!
//! # Architecture
//!
//! There is no background receive loop and no pending-request map. Each call
//! owns its own reply topic, `<topic>:reply:<correlation-id>`, so a call is
//! two broker operations in sequence:
//!
//! 1. `send(topic, reply_topic, payload)`
//! 2. `receive(reply_topic, timeout)`
//!
//! The broker's blocking pop enforces the timeout; no separate timer runs.
//!
//! # Concurrency
//!
//! Calls are independent. Correlation IDs come from a generator shared by all
//! clones of a client and are strictly increasing, so concurrent calls on the
//! same topic never share a reply topic and cannot receive each other's
//! answers.

mod endpoint;

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{
    // ---
    correlation::CorrelationGenerator,
    ConnectionPtr,
    Result,
    RpcConfig,
};

pub use endpoint::{AfterHook, BeforeHook, CallContext, DecodeFn, EncodeFn, Endpoint, EndpointBuilder};

/// RPC client.
///
/// Cheap to clone (internally `Arc`-backed).
///
/// # Example
///
/// ```
/// # use gogarin_rpc::{handler_fn, Client, MemoryBroker, Server};
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # async fn example() -> gogarin_rpc::Result<()> {
/// let broker = Arc::new(MemoryBroker::new());
///
/// let server = Server::new(broker.clone(), Duration::from_millis(50));
/// server.handle("math.double", handler_fn(|n: i64| async move { Ok(n * 2) }));
/// let serving = tokio::spawn({
///     let server = server.clone();
///     async move { server.serve().await }
/// });
///
/// let client = Client::new(broker);
/// let doubled: i64 = client.call("math.double", &21, Duration::from_secs(1)).await?;
/// assert_eq!(doubled, 42);
///
/// server.shutdown(Duration::from_secs(1)).await?;
/// # serving.await.unwrap()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    conn: ConnectionPtr,
    ids: CorrelationGenerator,
    request_timeout: Duration,
}

impl Client {
    // ---

    /// Create a client over `conn` with the default request timeout.
    pub fn new(conn: ConnectionPtr) -> Self {
        Self::with_config(conn, &RpcConfig::default())
    }

    /// Create a client over `conn`, taking the request timeout from `config`.
    pub fn with_config(conn: ConnectionPtr, config: &RpcConfig) -> Self {
        // ---
        Self {
            inner: Arc::new(Inner {
                conn,
                ids: CorrelationGenerator::new(),
                request_timeout: config.request_timeout,
            }),
        }
    }

    /// Call `topic` with a JSON-encoded `req` and wait up to `timeout` for a
    /// JSON-decoded answer.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Encode`](crate::RpcError::Encode) if `req` does not
    ///   serialize; nothing is sent.
    /// - [`RpcError::Correlation`](crate::RpcError::Correlation) if no reply
    ///   topic could be generated.
    /// - [`RpcError::Broker`](crate::RpcError::Broker) from the send or receive.
    /// - [`RpcError::Timeout`](crate::RpcError::Timeout) if no answer arrived
    ///   in time. Not retried.
    /// - [`RpcError::Remote`](crate::RpcError::Remote) if the server answered
    ///   with an error response.
    /// - [`RpcError::Decode`](crate::RpcError::Decode) if the answer does not
    ///   deserialize as `Resp`.
    pub async fn call<Req, Resp>(&self, topic: &str, req: &Req, timeout: Duration) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        // ---
        self.endpoint::<Req, Resp>(topic)
            .timeout(timeout)
            .build()
            .call(req)
            .await
    }

    /// Start building an [`Endpoint`] bound to `topic`.
    ///
    /// Defaults: JSON encode/decode, the client's request timeout, no hooks.
    pub fn endpoint<Req, Resp>(&self, topic: impl Into<String>) -> EndpointBuilder<Req, Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        EndpointBuilder::new(self.clone(), topic.into(), self.inner.request_timeout)
    }

    pub(crate) fn connection(&self) -> &ConnectionPtr {
        &self.inner.conn
    }

    pub(crate) fn ids(&self) -> &CorrelationGenerator {
        &self.inner.ids
    }
}
