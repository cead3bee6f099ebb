//! Space center: registers satellites over a message broker.
//!
//! Serves `satellite.register` and echoes each satellite's `Info` back as
//! acknowledgement. Runs until Ctrl+C, then drains in-flight registrations
//! for up to the configured shutdown timeout.
//!
//! Run with: cargo run --example space_center --features transport_redis
//!
//! Configuration (all optional):
//! - `GOGARIN_SPACE_CENTER_TRANSPORT_ADAPTER` (`redis` | `memory`, default `memory`)
//! - `GOGARIN_SPACE_CENTER_TRANSPORT_REDIS_ADDRESS` (default `redis://localhost:6379`)
//! - `GOGARIN_SPACE_CENTER_TRANSPORT_POLL_TIMEOUT_IN_MS` (default 2000)
//! - `GOGARIN_SPACE_CENTER_TRANSPORT_SHUTDOWN_TIMEOUT_IN_MS` (default 30000)

mod common;

use common::{Info, REGISTER_TOPIC};
use gogarin_rpc::{
    //
    create_connection,
    handler_fn,
    Result,
    RpcConfig,
    Server,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_ansi(false)
        .init();

    let config = RpcConfig::from_env("gogarin_space_center")?;
    let conn = create_connection(&config).await?;

    let server = Server::with_config(conn, &config);

    server.handle(
        REGISTER_TOPIC,
        handler_fn(|info: Info| async move {
            // ---
            tracing::info!("satellite {} v{} registered", info.name, info.version);
            Ok(info)
        }),
    );

    let serving = tokio::spawn({
        let server = server.clone();
        async move { server.serve().await }
    });

    println!("space_center serving {REGISTER_TOPIC} via {:?}", config.transport);

    // Block until Ctrl+C
    tokio::signal::ctrl_c().await.ok();

    if let Err(err) = server.shutdown(config.shutdown_timeout).await {
        tracing::warn!("shutdown: {err}");
    }

    match serving.await {
        Ok(res) => res,
        Err(join) => {
            tracing::error!("serve task failed: {join}");
            Ok(())
        }
    }
}
