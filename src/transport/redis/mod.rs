//! Redis list transport.
//!
//! `LPUSH` for send and respond, `BRPOP` for receive (redis.rs).

#[cfg(feature = "transport_redis")]
#[allow(clippy::module_inception)]
mod redis;

#[cfg(feature = "transport_redis")]
pub use self::redis::RedisConnection;

#[cfg(feature = "transport_redis")]
pub async fn create_redis_connection(
    config: &crate::RedisConfig,
) -> crate::Result<crate::ConnectionPtr> {
    Ok(std::sync::Arc::new(RedisConnection::connect(config).await?))
}

#[cfg(not(feature = "transport_redis"))]
pub async fn create_redis_connection(
    _config: &crate::RedisConfig,
) -> crate::Result<crate::ConnectionPtr> {
    Err(crate::RpcError::Config(
        "transport_redis feature is not enabled".into(),
    ))
}
