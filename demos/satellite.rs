//! Satellite: registers itself with the space center.
//!
//! Run with: cargo run --example satellite --features transport_redis
//!
//! Requires:
//! - A Redis server (`GOGARIN_SATELLITE_TRANSPORT_REDIS_ADDRESS`, default
//!   `redis://localhost:6379`) and `GOGARIN_SATELLITE_TRANSPORT_ADAPTER=redis`
//! - space_center example running against the same broker
//!
//! `SATELLITE_NAME` sets the name to register (default `file_system`).

mod common;

use anyhow::Context;
use common::{Info, REGISTER_TOPIC};
use gogarin_rpc::{
    //
    create_connection,
    Client,
    RpcConfig,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .init();

    let config = RpcConfig::from_env("gogarin_satellite").context("reading configuration")?;
    let conn = create_connection(&config)
        .await
        .context("connecting to broker")?;

    let client = Client::with_config(conn, &config);

    let info = Info {
        name: std::env::var("SATELLITE_NAME").unwrap_or_else(|_| "file_system".to_string()),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let register = client.endpoint::<Info, Info>(REGISTER_TOPIC).build();

    let ack = register
        .call(&info)
        .await
        .with_context(|| format!("registering {}", info.name))?;

    println!("registered {} v{}", ack.name, ack.version);
    Ok(())
}
