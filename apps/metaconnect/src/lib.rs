//! Core of the MetaConnection exchange: bootstrap URI codec, payload
//! validation, and the handshake controller that ties the optical scan
//! channel and the peer room together.

pub mod connection;
pub mod contacts;
pub mod exchange;
pub mod telemetry;
