//! Space center and satellites in one process over the in-memory broker.
//!
//! Run with: cargo run --example echo_memory
//!
//! No external broker required.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Info, REGISTER_TOPIC};
use gogarin_rpc::{
    //
    handler_fn,
    Client,
    MemoryBroker,
    Result,
    Server,
};
use tracing_subscriber::{fmt as tracing_format, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_format()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let broker = Arc::new(MemoryBroker::new());

    let server = Server::new(broker.clone(), Duration::from_millis(100));
    server.handle(
        REGISTER_TOPIC,
        handler_fn(|info: Info| async move { Ok(info) }),
    );
    let serving = tokio::spawn({
        let server = server.clone();
        async move { server.serve().await }
    });

    let client = Client::new(broker);

    let mut calls = Vec::new();
    for name in ["file_system", "telemetry", "navigation"] {
        let client = client.clone();
        calls.push(tokio::spawn(async move {
            let info = Info {
                name: name.to_string(),
                version: "0.1.0".to_string(),
            };
            client
                .call::<_, Info>(REGISTER_TOPIC, &info, Duration::from_secs(1))
                .await
        }));
    }

    for call in calls {
        match call.await {
            Ok(Ok(ack)) => println!("registered {} v{}", ack.name, ack.version),
            Ok(Err(err)) => println!("registration failed: {err}"),
            Err(join) => println!("call task failed: {join}"),
        }
    }

    server.shutdown(Duration::from_secs(1)).await?;
    if let Ok(res) = serving.await {
        res?;
    }
    Ok(())
}
