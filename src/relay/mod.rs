//! Relay core
//!
//! The registry of live connections and the broadcast engine that fans each
//! inbound message out to every other connection.

pub mod broadcast;
pub mod connection;
pub mod message;
pub mod registry;

pub use broadcast::{Broadcaster, RelayOutcome};
pub use connection::{ConnectionHandle, ConnectionId, ConnectionState};
pub use message::{Frame, WireMessage};
pub use registry::{FanOut, Registry};
