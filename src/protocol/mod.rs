/// Payload codecs shared by the client and server
///
/// This module defines the JSON payload encoding used by default on both
/// sides of a call, and the error response body a server answers with when a
/// request cannot be served.
mod codec;
mod message;

pub use codec::{decode_json, encode_error, encode_json};
pub use message::ErrorResponse;
