//! Core domain + application logic for the Hayasaka WhatsApp assistant.
//!
//! This crate is transport/backend agnostic. The WhatsApp bridge and the
//! Gemini API live behind ports (traits) implemented in adapter crates.

pub mod ai;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod gateway;
pub mod logging;
pub mod router;
pub mod store;
pub mod transport;

pub use errors::{Error, Result};
