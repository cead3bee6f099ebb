use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::ErrorResponse;
use crate::{Result, RpcError};

/// Serialize `value` as a JSON payload.
pub fn encode_json<T: Serialize>(value: &T) -> Result<Bytes> {
    // ---
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|err| RpcError::Encode(err.to_string()))
}

/// Deserialize a JSON payload.
///
/// An [`ErrorResponse`] body is reported as [`RpcError::Remote`] before the
/// payload is decoded as `T`.
pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    // ---
    if let Ok(ErrorResponse { ok: false, errors }) = serde_json::from_slice(bytes) {
        return Err(RpcError::Remote(errors.join("; ")));
    }

    serde_json::from_slice(bytes).map_err(|err| RpcError::Decode(err.to_string()))
}

/// Default error encoder: `{"ok": false, "errors": ["<err>"]}`.
pub fn encode_error(err: &RpcError) -> Bytes {
    // ---
    let body = ErrorResponse::new(vec![err.to_string()]);
    match serde_json::to_vec(&body) {
        Ok(bytes) => Bytes::from(bytes),
        // A struct of strings always serializes; keep a fixed body just in case.
        Err(_) => Bytes::from_static(br#"{"ok":false,"errors":["could not encode an error"]}"#),
    }
}
