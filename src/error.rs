use thiserror::Error;

/// Errors that can occur during RPC operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// I/O or connection failure talking to the broker. Never retried here.
    #[error("broker error: {0}")]
    Broker(String),

    /// A blocking pop elapsed without an element.
    ///
    /// Expected during server polling and when a caller's budget runs out;
    /// see [`RpcError::is_timeout`].
    #[error("timeout is reached")]
    Timeout,

    /// The broker returned something that is not a well-formed envelope.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Request payload could not be encoded. No network I/O was attempted.
    #[error("encode error: {0}")]
    Encode(String),

    /// Response payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Correlation ID generation failed.
    #[error("correlation id error: {0}")]
    Correlation(String),

    /// Shutdown drain did not finish before the deadline.
    #[error("shutdown deadline exceeded")]
    DeadlineExceeded,

    /// Returned by `Server::serve` after `Server::shutdown`.
    #[error("server: Server closed")]
    ServerClosed,

    /// `Server::serve` was called while the server is already serving.
    #[error("server: already serving")]
    AlreadyServing,

    /// The server answered with an error response envelope.
    #[error("remote error: {0}")]
    Remote(String),

    /// A typed handler reported a failure.
    #[error("handler error: {0}")]
    Handler(String),

    /// Invalid configuration value.
    #[error("config error: {0}")]
    Config(String),
}

impl RpcError {
    /// True for [`RpcError::Timeout`], which callers should treat as a
    /// normal polling outcome rather than an anomaly.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout)
    }
}

/// Result type alias for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;
