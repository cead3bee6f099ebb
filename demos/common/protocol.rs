use serde::{Deserialize, Serialize};

/// Topic a satellite calls to announce itself to the space center.
pub const REGISTER_TOPIC: &str = "satellite.register";

/// What a satellite reports about itself on registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    // ---
    pub name: String,
    pub version: String,
}
