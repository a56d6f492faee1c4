//! HTTP and WebSocket surface
//!
//! Exposes the relay endpoint plus health/status routes and static assets.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod websocket;

pub use server::{AppState, RelayServer};
