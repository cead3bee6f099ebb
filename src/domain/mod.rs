//! Domain layer public interface.
//!
//! This module defines the broker-facing abstractions the client and server
//! are written against. Nothing here knows about a concrete broker.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod connection;

// --- Connection domain re-exports ---

pub use connection::{
    //
    Connection,
    ConnectionPtr,
    Envelope,
};
