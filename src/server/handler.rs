use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::client::{DecodeFn, EncodeFn};
use crate::protocol::{decode_json, encode_error, encode_json};
use crate::{log_error, Result, RpcError};

/// A Handler answers requests for one topic.
///
/// `serve_rpc` is infallible by contract: failures are encoded into the
/// returned payload. If it panics, the server assumes the effect of the
/// panic is confined to the active request; it logs the panic and answers
/// with an error response.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    async fn serve_rpc(&self, payload: Bytes) -> Bytes;
}

/// Type-erased handler, cheap to clone into spawned tasks.
pub type HandlerPtr = Arc<dyn Handler>;

/// Encodes a failure into an answer payload.
pub type ErrorEncoder = fn(&RpcError) -> Bytes;

/// Inspects raw payload bytes (request before decoding, or response after
/// encoding).
pub type PayloadHook = Arc<dyn Fn(&Bytes) + Send + Sync>;

/// [`Handler`] built from a typed async function.
///
/// Request bytes are decoded, passed to the function, and the result is
/// encoded. Any failure along the way is logged and answered through the
/// error encoder, which by default produces `{"ok": false, "errors": [...]}`.
///
/// # Example
///
/// ```
/// use gogarin_rpc::{EndpointHandler, RpcError};
///
/// let handler = EndpointHandler::new(|name: String| async move {
///     if name.is_empty() {
///         return Err(RpcError::Handler("empty name".into()));
///     }
///     Ok(format!("hello, {name}"))
/// })
/// .before(|raw| println!("request of {} bytes", raw.len()));
/// ```
pub struct EndpointHandler<F, Fut, Req, Resp> {
    // ---
    func: F,
    decode: DecodeFn<Req>,
    encode: EncodeFn<Resp>,
    before: Vec<PayloadHook>,
    after: Vec<PayloadHook>,
    error_encoder: ErrorEncoder,
    _phantom: PhantomData<fn(Req) -> Fut>,
}

impl<F, Fut, Req, Resp> EndpointHandler<F, Fut, Req, Resp>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp>> + Send + 'static,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
{
    /// Wrap `func` with JSON decoding and encoding.
    pub fn new(func: F) -> Self {
        // ---
        Self {
            func,
            decode: decode_json::<Req>,
            encode: encode_json::<Resp>,
            before: Vec::new(),
            after: Vec::new(),
            error_encoder: encode_error,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut, Req, Resp> EndpointHandler<F, Fut, Req, Resp> {
    // ---

    /// Replace the request decoder.
    pub fn decoder(mut self, decode: DecodeFn<Req>) -> Self {
        self.decode = decode;
        self
    }

    /// Replace the response encoder.
    pub fn encoder(mut self, encode: EncodeFn<Resp>) -> Self {
        self.encode = encode;
        self
    }

    /// Replace the error encoder.
    pub fn error_encoder(mut self, error_encoder: ErrorEncoder) -> Self {
        self.error_encoder = error_encoder;
        self
    }

    /// Append a hook run on the raw request before it is decoded.
    pub fn before<H>(mut self, hook: H) -> Self
    where
        H: Fn(&Bytes) + Send + Sync + 'static,
    {
        self.before.push(Arc::new(hook));
        self
    }

    /// Append a hook run on the encoded response before it is returned.
    pub fn after<H>(mut self, hook: H) -> Self
    where
        H: Fn(&Bytes) + Send + Sync + 'static,
    {
        self.after.push(Arc::new(hook));
        self
    }
}

#[async_trait::async_trait]
impl<F, Fut, Req, Resp> Handler for EndpointHandler<F, Fut, Req, Resp>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp>> + Send + 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
{
    async fn serve_rpc(&self, payload: Bytes) -> Bytes {
        // ---
        for hook in &self.before {
            hook(&payload);
        }

        let req = match (self.decode)(&payload) {
            Ok(req) => req,
            Err(err) => {
                log_error!("dec: {err}");
                return (self.error_encoder)(&err);
            }
        };

        let resp = match (self.func)(req).await {
            Ok(resp) => resp,
            Err(err) => {
                log_error!("endpoint: {err}");
                return (self.error_encoder)(&err);
            }
        };

        let bytes = match (self.encode)(&resp) {
            Ok(bytes) => bytes,
            Err(err) => {
                log_error!("enc: {err}");
                return (self.error_encoder)(&err);
            }
        };

        for hook in &self.after {
            hook(&bytes);
        }

        bytes
    }
}

/// JSON [`EndpointHandler`] for `func`.
pub fn handler_fn<F, Fut, Req, Resp>(func: F) -> EndpointHandler<F, Fut, Req, Resp>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp>> + Send + 'static,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
{
    EndpointHandler::new(func)
}
