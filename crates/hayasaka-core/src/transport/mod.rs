//! Messaging-transport boundary: event model + ports.

pub mod port;
pub mod types;
