//! Request/reply RPC over a blocking-queue message broker
//!
//! A [`Client`] pushes a request onto a topic list together with a reply
//! topic unique to the call, then blocks popping that reply topic until the
//! answer arrives or the timeout passes. A [`Server`] runs one poll loop per
//! registered topic, hands every popped request to its [`Handler`] in a task
//! of its own, and pushes the answer onto the request's reply topic.
//!
//! Brokers sit behind the [`Connection`] trait. [`MemoryBroker`] keeps lists
//! in process; `RedisConnection` (feature `transport_redis`) uses
//! `LPUSH`/`BRPOP`.
//!

// Import all sub modules once...
mod client;
mod domain;
mod macros;
mod protocol;
mod server;
mod transport;

mod rpc_config;

mod correlation;
mod error;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use client::{
    // ---
    AfterHook,
    BeforeHook,
    CallContext,
    Client,
    DecodeFn,
    EncodeFn,
    Endpoint,
    EndpointBuilder,
};
pub use server::{
    // ---
    handler_fn,
    EndpointHandler,
    ErrorEncoder,
    Handler,
    HandlerPtr,
    PayloadHook,
    Server,
    ServerState,
};

pub use rpc_config::{RedisConfig, RpcConfig, TransportKind};

pub use correlation::{reply_topic, CorrelationGenerator, CorrelationId};
pub use error::{Result, RpcError};

pub use protocol::{decode_json, encode_error, encode_json, ErrorResponse};

pub use transport::{create_redis_connection, MemoryBroker};

#[cfg(feature = "transport_redis")]
pub use transport::RedisConnection;

// --- public re-exports
pub use domain::{
    //
    Connection,
    ConnectionPtr,
    Envelope,
};

/// Open the broker connection selected by `config.transport`.
pub async fn create_connection(config: &RpcConfig) -> Result<ConnectionPtr> {
    // ---
    match config.transport {
        TransportKind::Memory => Ok(std::sync::Arc::new(MemoryBroker::new())),
        TransportKind::Redis => create_redis_connection(&config.redis).await,
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[tokio::test]
    async fn test_create_memory_connection() {
        // ---
        let conn = create_connection(&RpcConfig::memory()).await.unwrap();
        conn.send("t", "r", bytes::Bytes::from_static(b"1")).await.unwrap();
        let env = conn
            .receive("t", std::time::Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(env.reply_topic, "r");
    }

    #[cfg(not(feature = "transport_redis"))]
    #[tokio::test]
    async fn test_redis_requires_feature() {
        // ---
        let err = create_connection(&RpcConfig::redis("redis://localhost:6379"))
            .await
            .err();
        assert!(matches!(err, Some(RpcError::Config(_))));
    }
}
