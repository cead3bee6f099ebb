use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::Client;
use crate::correlation::{reply_topic, CorrelationId};
use crate::protocol::{decode_json, encode_json};
use crate::{log_debug, Result};

/// Turns a typed request into payload bytes.
pub type EncodeFn<T> = fn(&T) -> Result<Bytes>;

/// Turns payload bytes into a typed response.
pub type DecodeFn<T> = fn(&[u8]) -> Result<T>;

/// Runs after encoding, immediately before the request is sent.
pub type BeforeHook = Arc<dyn Fn(&mut CallContext) + Send + Sync>;

/// Runs immediately after the answer is received, before it is decoded.
pub type AfterHook = Arc<dyn Fn(&mut CallContext, &Bytes) + Send + Sync>;

/// Per-call metadata visible to hooks.
///
/// Hooks may rewrite `reply_topic`; the call then waits on the rewritten
/// topic. `metadata` is scratch space carried from the before hooks to the
/// after hooks of the same call.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub topic: String,
    pub reply_topic: String,
    pub correlation_id: CorrelationId,
    pub started_at: Instant,
    pub metadata: HashMap<String, String>,
}

/// A client bound to one remote topic with its own codec and hooks.
///
/// Built with [`Client::endpoint`]. Cheap to clone.
///
/// # Example
///
/// ```no_run
/// # use gogarin_rpc::{Client, MemoryBroker};
/// # use serde::{Deserialize, Serialize};
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// #[derive(Serialize, Deserialize)]
/// struct Info { name: String, version: String }
///
/// # async fn example() -> gogarin_rpc::Result<()> {
/// let client = Client::new(Arc::new(MemoryBroker::new()));
///
/// let register = client
///     .endpoint::<Info, Info>("satellite.register")
///     .timeout(Duration::from_secs(10))
///     .before(|ctx| {
///         ctx.metadata.insert("caller".into(), "file_system".into());
///     })
///     .build();
///
/// let info = Info { name: "file_system".into(), version: "0.1.0".into() };
/// let echoed = register.call(&info).await?;
/// # Ok(())
/// # }
/// ```
pub struct Endpoint<Req, Resp> {
    // ---
    client: Client,
    topic: String,
    timeout: Duration,
    encode: EncodeFn<Req>,
    decode: DecodeFn<Resp>,
    before: Vec<BeforeHook>,
    after: Vec<AfterHook>,
}

impl<Req, Resp> Clone for Endpoint<Req, Resp> {
    fn clone(&self) -> Self {
        // ---
        Self {
            client: self.client.clone(),
            topic: self.topic.clone(),
            timeout: self.timeout,
            encode: self.encode,
            decode: self.decode,
            before: self.before.clone(),
            after: self.after.clone(),
        }
    }
}

impl<Req, Resp> Endpoint<Req, Resp> {
    // ---

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Invoke the remote topic.
    ///
    /// Encode, generate a reply topic, run before hooks, send, receive on the
    /// reply topic, run after hooks, decode. See [`Client::call`] for the
    /// errors.
    pub async fn call(&self, req: &Req) -> Result<Resp> {
        // ---
        let payload = (self.encode)(req)?;

        let correlation_id = self.client.ids().next_id(SystemTime::now())?;

        let mut ctx = CallContext {
            topic: self.topic.clone(),
            reply_topic: reply_topic(&self.topic, &correlation_id),
            correlation_id,
            started_at: Instant::now(),
            metadata: HashMap::new(),
        };

        for hook in &self.before {
            hook(&mut ctx);
        }

        let conn = self.client.connection();

        conn.send(&ctx.topic, &ctx.reply_topic, payload).await?;

        let answer = conn
            .receive(&ctx.reply_topic, self.timeout)
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    log_debug!(
                        "{}: no answer on {} within {:?}",
                        ctx.topic,
                        ctx.reply_topic,
                        self.timeout
                    );
                }
                err
            })?;

        for hook in &self.after {
            hook(&mut ctx, &answer.data);
        }

        (self.decode)(&answer.data)
    }
}

/// Builder for [`Endpoint`].
pub struct EndpointBuilder<Req, Resp> {
    endpoint: Endpoint<Req, Resp>,
}

impl<Req, Resp> EndpointBuilder<Req, Resp>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    pub(super) fn new(client: Client, topic: String, timeout: Duration) -> Self {
        // ---
        Self {
            endpoint: Endpoint {
                client,
                topic,
                timeout,
                encode: encode_json::<Req>,
                decode: decode_json::<Resp>,
                before: Vec::new(),
                after: Vec::new(),
            },
        }
    }
}

impl<Req, Resp> EndpointBuilder<Req, Resp> {
    // ---

    /// How long each call waits for an answer.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.endpoint.timeout = timeout;
        self
    }

    /// Replace the request encoder.
    pub fn encoder(mut self, encode: EncodeFn<Req>) -> Self {
        self.endpoint.encode = encode;
        self
    }

    /// Replace the response decoder.
    pub fn decoder(mut self, decode: DecodeFn<Resp>) -> Self {
        self.endpoint.decode = decode;
        self
    }

    /// Append a hook run immediately before send.
    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut CallContext) + Send + Sync + 'static,
    {
        self.endpoint.before.push(Arc::new(hook));
        self
    }

    /// Append a hook run immediately after receive.
    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut CallContext, &Bytes) + Send + Sync + 'static,
    {
        self.endpoint.after.push(Arc::new(hook));
        self
    }

    pub fn build(self) -> Endpoint<Req, Resp> {
        self.endpoint
    }
}
