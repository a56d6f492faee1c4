//! Connection handles and their liveness state machine

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use super::message::Frame;
use crate::error::DeliveryError;

/// Opaque identity of one accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Liveness of a connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Handle to one live peer session
///
/// The handle owns the sending half of the connection's outbound queue. A
/// writer task per connection drains the queue onto the socket, so queuing a
/// frame never waits on the peer's transport.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    state: AtomicU8,
    outbound: mpsc::Sender<Frame>,
    close_requested: Notify,
}

impl ConnectionHandle {
    /// Create an Open handle and the receiving half of its outbound queue
    pub fn new(peer: Option<SocketAddr>, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = Arc::new(Self {
            id: ConnectionId::new(),
            peer,
            state: AtomicU8::new(ConnectionState::Open as u8),
            outbound: tx,
            close_requested: Notify::new(),
        });
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Queue a frame without waiting
    pub fn deliver(&self, frame: Frame) -> Result<(), DeliveryError> {
        if !self.is_open() {
            return Err(DeliveryError::NotOpen);
        }

        match self.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(DeliveryError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }

    /// Open -> Closing. Returns false if the connection was already past Open.
    pub fn begin_close(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Open as u8,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Any state -> Closed
    pub fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }

    /// Ask the session owning this connection to shut it down
    pub fn close(&self) {
        self.begin_close();
        self.close_requested.notify_one();
    }

    /// Resolves once `close` has been called. Only the connection's writer
    /// waits on this.
    pub async fn close_requested(&self) {
        self.close_requested.notified().await;
    }
}
