//! Types shared by the demos.

mod protocol;

pub use protocol::{Info, REGISTER_TOPIC};
