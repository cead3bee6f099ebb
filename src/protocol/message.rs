use serde::{Deserialize, Serialize};

/// Body of an error answer.
///
/// Serialized as `{"ok": false, "errors": ["..."]}`. Clients decoding with
/// [`decode_json`](super::decode_json) turn it into
/// [`RpcError::Remote`](crate::RpcError::Remote).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorResponse {
    pub ok: bool,
    pub errors: Vec<String>,
}

impl ErrorResponse {
    pub fn new(errors: Vec<String>) -> Self {
        Self { ok: false, errors }
    }
}
