//! Codecast - Code Pad Broadcast Relay
//!
//! A realtime relay for a shared code-editing pad: every message a client
//! sends over the WebSocket is forwarded to all other connected clients.
//!
//! ## Features
//!
//! - Concurrency-safe connection registry with snapshot fan-out
//! - Best-effort, at-most-once broadcast with per-recipient failure isolation
//! - Server-authoritative timestamps on every relayed message
//! - Health and status endpoints, static asset serving, configurable CORS
//! - Client reconnect backoff policy

pub mod api;
pub mod config;
pub mod error;
pub mod reconnect;
pub mod relay;

pub use config::Config;
pub use error::{DeliveryError, RelayError, Result};
