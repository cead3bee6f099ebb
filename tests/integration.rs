use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use gogarin_rpc::{
    //
    handler_fn,
    Client,
    MemoryBroker,
    Result,
    RpcError,
    Server,
    ServerState,
};

const POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Info {
    name: String,
    version: String,
}

fn info(name: &str) -> Info {
    Info {
        name: name.to_string(),
        version: "0.1.0".to_string(),
    }
}

struct SpaceCenter {
    // ---
    server: Server,
    handle: JoinHandle<Result<()>>,
    broker: MemoryBroker,
}

impl SpaceCenter {
    // ---

    /// Serve `satellite.register` (echo) plus whatever `extra` registers.
    async fn start(extra: impl FnOnce(&Server)) -> Self {
        // ---
        let broker = MemoryBroker::new();
        let server = Server::new(Arc::new(broker.clone()), POLL);

        server.handle(
            "satellite.register",
            handler_fn(|info: Info| async move { Ok(info) }),
        );
        extra(&server);

        let handle = tokio::spawn({
            let server = server.clone();
            async move { server.serve().await }
        });

        while server.state() != ServerState::Serving {
            tokio::task::yield_now().await;
        }

        Self {
            server,
            handle,
            broker,
        }
    }

    fn client(&self) -> Client {
        Client::new(Arc::new(self.broker.clone()))
    }

    async fn stop(self) -> Result<()> {
        // ---
        self.server.shutdown(Duration::from_secs(5)).await?;

        // JoinError -> panic, inner Result -> ?
        self.handle.await.expect("serve task panicked")?;
        Ok(())
    }
}

#[tokio::test]
async fn test_round_trip() -> Result<()> {
    // ---
    init_logging();

    let center = SpaceCenter::start(|_| {}).await;
    let client = center.client();

    let resp: Info = client
        .call("satellite.register", &info("file_system"), Duration::from_secs(2))
        .await?;
    assert_eq!(resp, info("file_system"));

    center.stop().await
}

#[tokio::test]
async fn test_timeout_without_server() {
    // ---
    init_logging();

    let client = Client::new(Arc::new(MemoryBroker::new()));

    let started = Instant::now();
    let err = client
        .call::<_, Info>("nobody.home", &info("lonely"), Duration::from_millis(200))
        .await
        .unwrap_err();

    assert_eq!(err, RpcError::Timeout);
    assert!(err.is_timeout());
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_have_unique_reply_topics() {
    // ---
    init_logging();

    const CALLS: usize = 10_000;

    let center = SpaceCenter::start(|server| {
        server.handle("math.double", handler_fn(|n: usize| async move { Ok(n * 2) }));
    })
    .await;

    let seen = Arc::new(Mutex::new(HashSet::new()));
    let endpoint = center
        .client()
        .endpoint::<usize, usize>("math.double")
        .timeout(Duration::from_secs(30))
        .before({
            let seen = seen.clone();
            move |ctx| {
                seen.lock().unwrap().insert(ctx.reply_topic.clone());
            }
        })
        .build();

    let mut handles = Vec::with_capacity(CALLS);
    for i in 0..CALLS {
        let endpoint = endpoint.clone();
        handles.push(tokio::spawn(async move { (i, endpoint.call(&i).await) }));
    }

    for task in handles {
        let (i, resp) = task.await.unwrap();
        assert_eq!(resp.unwrap(), i * 2);
    }

    assert_eq!(seen.lock().unwrap().len(), CALLS);
    center.stop().await.unwrap();
}

#[tokio::test]
async fn test_unbounded_timeout_is_accepted() -> Result<()> {
    // ---
    init_logging();

    let center = SpaceCenter::start(|_| {}).await;

    let resp: Info = center
        .client()
        .call("satellite.register", &info("voyager"), Duration::MAX)
        .await?;
    assert_eq!(resp, info("voyager"));

    center.stop().await
}

#[tokio::test]
async fn test_late_answers_do_not_accumulate() {
    // ---
    init_logging();

    const CALLS: usize = 50;

    let center = SpaceCenter::start(|server| {
        server.handle(
            "slow",
            handler_fn(|n: u32| async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(n)
            }),
        );
    })
    .await;

    let client = center.client();
    let mut handles = Vec::with_capacity(CALLS);
    for i in 0..CALLS as u32 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client.call::<_, u32>("slow", &i, Duration::from_millis(1)).await
        }));
    }
    for task in handles {
        assert_eq!(task.await.unwrap().unwrap_err(), RpcError::Timeout);
    }

    while center.broker.len("slow") > 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let broker = center.broker.clone();
    center.stop().await.unwrap();
    assert!(broker.is_empty());
}

#[test]
#[should_panic(expected = "multiple registrations for satellite.register")]
fn test_duplicate_registration_is_rejected() {
    // ---
    let server = Server::new(Arc::new(MemoryBroker::new()), POLL);
    server.handle(
        "satellite.register",
        handler_fn(|info: Info| async move { Ok(info) }),
    );
    server.handle(
        "satellite.register",
        handler_fn(|info: Info| async move { Ok(info) }),
    );
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_handler() {
    // ---
    init_logging();

    let started = Arc::new(AtomicBool::new(false));
    let center = SpaceCenter::start(|server| {
        let started = started.clone();
        server.handle(
            "slow",
            handler_fn(move |n: u32| {
                let started = started.clone();
                async move {
                    started.store(true, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(n + 1)
                }
            }),
        );
    })
    .await;

    let call = tokio::spawn({
        let client = center.client();
        async move { client.call::<_, u32>("slow", &1, Duration::from_secs(2)).await }
    });

    while !started.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    center.server.shutdown(Duration::from_millis(100)).await.unwrap();
    assert_eq!(center.server.state(), ServerState::Closed);

    // The handler finished before shutdown returned, and its answer was sent.
    assert_eq!(call.await.unwrap().unwrap(), 2);
    center.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_deadline_exceeded() {
    // ---
    init_logging();

    let started = Arc::new(AtomicBool::new(false));
    let center = SpaceCenter::start(|server| {
        let started = started.clone();
        server.handle(
            "slow",
            handler_fn(move |n: u32| {
                let started = started.clone();
                async move {
                    started.store(true, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(n + 1)
                }
            }),
        );
    })
    .await;

    let call = tokio::spawn({
        let client = center.client();
        async move { client.call::<_, u32>("slow", &1, Duration::from_secs(2)).await }
    });

    while !started.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let err = center
        .server
        .shutdown(Duration::from_millis(10))
        .await
        .unwrap_err();
    assert_eq!(err, RpcError::DeadlineExceeded);
    assert_eq!(center.server.state(), ServerState::ShuttingDown);

    // Handlers are not interrupted; the late answer still arrives.
    assert_eq!(call.await.unwrap().unwrap(), 2);
    center.handle.await.unwrap().unwrap();
    assert_eq!(center.server.state(), ServerState::Closed);
}

#[tokio::test]
async fn test_serve_after_shutdown_is_closed() {
    // ---
    init_logging();

    let center = SpaceCenter::start(|_| {}).await;
    let server = center.server.clone();
    center.stop().await.unwrap();

    assert_eq!(server.serve().await, Err(RpcError::ServerClosed));
    assert!(server.shutdown(Duration::from_millis(10)).await.is_ok());
}

#[tokio::test]
async fn test_handler_panic_is_isolated() {
    // ---
    init_logging();

    let center = SpaceCenter::start(|server| {
        server.handle(
            "fragile",
            handler_fn(|word: String| async move {
                if word == "boom" {
                    panic!("boom");
                }
                Ok(word.len())
            }),
        );
    })
    .await;
    let client = center.client();

    let err = client
        .call::<_, usize>("fragile", &"boom", Duration::from_secs(2))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RpcError::Remote("handler error: handler panicked: boom".into())
    );

    // Same topic, next request: the poll loop survived.
    let len: usize = client
        .call("fragile", &"fine", Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(len, 4);

    center.stop().await.unwrap();
}

#[tokio::test]
async fn test_error_response_is_remote_error() {
    // ---
    init_logging();

    let center = SpaceCenter::start(|server| {
        server.handle(
            "satellite.decommission",
            handler_fn(|info: Info| async move {
                Err::<Info, _>(RpcError::Handler(format!("{} is still in orbit", info.name)))
            }),
        );
    })
    .await;

    let err = center
        .client()
        .call::<_, Info>("satellite.decommission", &info("hubble"), Duration::from_secs(2))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RpcError::Remote("handler error: hubble is still in orbit".into())
    );

    center.stop().await.unwrap();
}

#[tokio::test]
async fn test_malformed_request_is_answered() {
    // ---
    init_logging();

    let center = SpaceCenter::start(|_| {}).await;

    let err = center
        .client()
        .call::<_, Info>("satellite.register", &42, Duration::from_secs(2))
        .await
        .unwrap_err();
    match err {
        RpcError::Remote(msg) => assert!(msg.starts_with("decode error"), "{msg}"),
        other => panic!("unexpected error: {other:?}"),
    }

    center.stop().await.unwrap();
}

#[cfg(feature = "logging")]
mod imp {
    use std::sync::Once;
    use tracing_subscriber::EnvFilter;

    static INIT: Once = Once::new();

    pub fn init() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });
    }
}

#[cfg(not(feature = "logging"))]
mod imp {
    #[inline]
    pub fn init() {}
}

pub fn init_logging() {
    imp::init();
}
