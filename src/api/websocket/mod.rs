//! WebSocket handlers

pub mod relay;

use std::time::Duration;

/// How long a closing connection may spend flushing already-queued frames
pub const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);
