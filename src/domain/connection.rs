// src/domain/connection.rs

//! Broker connection domain abstractions.
//!
//! A [`Connection`] is the minimal contract over a blocking-queue broker:
//! push an envelope onto a named list, and pop one off with a timeout.
//! Request/reply correlation, encoding and dispatch live in the client and
//! server layers.
//!
//! Concrete implementations live under `src/transport/`.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Result, RpcError};

/// The unit transmitted through the broker.
///
/// `reply_topic` names where the answer must be pushed; it is empty on
/// response envelopes, which expect no further reply.
///
/// # Wire format
///
/// ```text
/// { "reply_topic": "<string>", "data": "<base64 payload>" }
/// ```
///
/// # Examples
///
/// ```
/// # use gogarin_rpc::Envelope;
/// # use bytes::Bytes;
/// let env = Envelope::request("satellite.register:reply:01ARZ3NDEKTSV4RRFFQ69G5FAV", Bytes::from_static(b"{}"));
/// let wire = env.to_wire().unwrap();
/// assert_eq!(Envelope::from_wire(&wire).unwrap(), env);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    // ---
    /// Destination for the answer; empty for terminal responses.
    pub reply_topic: String,

    /// Opaque payload bytes.
    pub data: Bytes,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireEnvelope {
    reply_topic: String,
    data: String,
}

impl Envelope {
    // ---

    /// Envelope for a request that expects an answer on `reply_topic`.
    pub fn request(reply_topic: impl Into<String>, data: Bytes) -> Self {
        Self {
            reply_topic: reply_topic.into(),
            data,
        }
    }

    /// Terminal envelope carrying a final answer.
    pub fn response(data: Bytes) -> Self {
        Self {
            reply_topic: String::new(),
            data,
        }
    }

    /// True when this envelope expects no reply.
    pub fn is_response(&self) -> bool {
        self.reply_topic.is_empty()
    }

    /// Serialize to the JSON wire form.
    ///
    /// # Errors
    ///
    /// Serialization failures are reported as [`RpcError::Broker`], since they
    /// abort a send.
    pub fn to_wire(&self) -> Result<Vec<u8>> {
        // ---
        let wire = WireEnvelope {
            reply_topic: self.reply_topic.clone(),
            data: STANDARD.encode(&self.data),
        };

        serde_json::to_vec(&wire)
            .map_err(|err| RpcError::Broker(format!("failed to serialize envelope: {err}")))
    }

    /// Parse the JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidResponse`] when the bytes are not an
    /// envelope object or `data` is not valid base64.
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        // ---
        let wire: WireEnvelope = serde_json::from_slice(bytes)
            .map_err(|err| RpcError::InvalidResponse(format!("malformed envelope: {err}")))?;

        let data = STANDARD
            .decode(wire.data.as_bytes())
            .map_err(|err| RpcError::InvalidResponse(format!("envelope data is not base64: {err}")))?;

        Ok(Self {
            reply_topic: wire.reply_topic,
            data: Bytes::from(data),
        })
    }
}

/// Broker connection abstraction.
///
/// All three operations may block on network I/O and none are retried
/// internally.
///
/// Implementations must ensure that:
/// - `send` appends atomically: a concurrent `receive` on the same topic
///   sees either the whole envelope or nothing.
/// - `receive` hands each envelope to exactly one caller.
/// - An elapsed `receive` reports [`RpcError::Timeout`], never
///   [`RpcError::Broker`].
///
/// The in-memory broker ([`MemoryBroker`](crate::MemoryBroker)) is the
/// reference implementation of these semantics.
///
/// # Notes
///
/// This trait uses `async_trait`; the expanded documentation may show explicit
/// lifetimes and a boxed `Future`. Treat the methods as normal `async fn`s.
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    // ---

    /// Enqueue `{reply_topic, payload}` onto `topic`.
    ///
    /// # Errors
    ///
    /// [`RpcError::Broker`] on any I/O or serialization failure.
    async fn send(&self, topic: &str, reply_topic: &str, payload: Bytes) -> Result<()>;

    /// Block until an envelope is available on `topic` or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Timeout`] when `timeout` elapses.
    /// - [`RpcError::InvalidResponse`] when the popped element is not an envelope.
    /// - [`RpcError::Broker`] on I/O failure.
    async fn receive(&self, topic: &str, timeout: Duration) -> Result<Envelope>;

    /// Post a final answer to `reply_topic`.
    ///
    /// Equivalent to `send(reply_topic, "", payload)`.
    async fn respond(&self, reply_topic: &str, payload: Bytes) -> Result<()> {
        self.send(reply_topic, "", payload).await
    }
}

/// Shared connection pointer.
///
/// `.clone()` only bumps a reference count; every clone talks to the same
/// broker through the same underlying resources.
pub type ConnectionPtr = Arc<dyn Connection>;
