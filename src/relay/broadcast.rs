//! Broadcast engine
//!
//! Turns one inbound frame into a delivery to every other live connection.
//! Delivery is best-effort and at-most-once: a recipient that cannot take the
//! frame is evicted and the fan-out carries on without it. Nothing is retried
//! or replayed, so a connection that joins late sees only later messages.

use std::sync::Arc;

use tracing::{debug, error, warn};

use super::connection::{ConnectionHandle, ConnectionId};
use super::message::{WireMessage, INVALID_FORMAT_NOTICE, WELCOME_NOTICE};
use super::registry::{FanOut, Registry};
use crate::error::DeliveryError;

/// What happened to one inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Accepted and fanned out
    Relayed { delivered: usize, evicted: usize },
    /// Malformed; the sender got an error reply and nobody else saw it
    Rejected,
    /// The sender is already closing, so the frame was dropped
    Ignored,
}

#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Relay a text frame from `sender` to every other Open connection
    pub fn relay(&self, sender: &ConnectionHandle, raw: &str) -> RelayOutcome {
        if !sender.is_open() {
            debug!(connection = %sender.id(), "Dropping frame from closing connection");
            return RelayOutcome::Ignored;
        }

        let message = match WireMessage::parse(raw) {
            Ok(message) => message.stamped(),
            Err(e) => {
                warn!(connection = %sender.id(), error = %e, "Rejecting malformed message");
                self.reply_error(sender);
                return RelayOutcome::Rejected;
            }
        };

        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!(connection = %sender.id(), error = %e, "Failed to serialize message");
                self.reply_error(sender);
                return RelayOutcome::Rejected;
            }
        };

        let report = self
            .registry
            .for_each_except(sender.id(), |peer| peer.deliver(frame.clone()));
        let evicted = self.evict(&report);

        debug!(
            connection = %sender.id(),
            kind = %message.kind,
            delivered = report.delivered,
            evicted,
            "Relayed message"
        );

        RelayOutcome::Relayed {
            delivered: report.delivered,
            evicted,
        }
    }

    /// Relay a binary frame, which must hold UTF-8 text
    pub fn relay_bytes(&self, sender: &ConnectionHandle, raw: &[u8]) -> RelayOutcome {
        match std::str::from_utf8(raw) {
            Ok(text) => self.relay(sender, text),
            Err(e) => {
                if !sender.is_open() {
                    return RelayOutcome::Ignored;
                }
                warn!(connection = %sender.id(), error = %e, "Rejecting non UTF-8 binary frame");
                self.reply_error(sender);
                RelayOutcome::Rejected
            }
        }
    }

    /// Queue the welcome notice on a new connection only
    pub fn welcome(&self, handle: &ConnectionHandle) -> Result<(), DeliveryError> {
        self.send_to(handle, &WireMessage::system(WELCOME_NOTICE))
    }

    /// Server-originated message to every Open connection
    pub fn announce(&self, message: &WireMessage) -> FanOut {
        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "Failed to serialize announcement");
                return FanOut::default();
            }
        };

        let report = self.registry.for_each(|peer| peer.deliver(frame.clone()));
        self.evict(&report);
        report
    }

    fn send_to(&self, handle: &ConnectionHandle, message: &WireMessage) -> Result<(), DeliveryError> {
        let frame = message.to_frame().map_err(|e| {
            error!(connection = %handle.id(), error = %e, "Failed to serialize message");
            DeliveryError::Closed
        })?;
        handle.deliver(frame)
    }

    fn reply_error(&self, sender: &ConnectionHandle) {
        if let Err(e) = self.send_to(sender, &WireMessage::error(INVALID_FORMAT_NOTICE)) {
            warn!(connection = %sender.id(), error = %e, "Could not deliver error reply");
            self.evict_one(sender.id(), e);
        }
    }

    fn evict(&self, report: &FanOut) -> usize {
        let mut evicted = 0;
        for &(id, reason) in &report.failed {
            // Already closing on its own; its session removes it
            if reason == DeliveryError::NotOpen {
                debug!(connection = %id, "Skipping eviction of connection that is closing");
                continue;
            }
            if self.evict_one(id, reason) {
                evicted += 1;
            }
        }
        evicted
    }

    // Removal happens before the close request so the connection is out of
    // every later snapshot by the time its session starts tearing down.
    fn evict_one(&self, id: ConnectionId, reason: DeliveryError) -> bool {
        match self.registry.remove(id) {
            Some(handle) => {
                warn!(
                    connection = %id,
                    reason = %reason,
                    active = self.registry.len(),
                    "Evicting connection after failed delivery"
                );
                handle.close();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::sync::mpsc;

    use crate::relay::connection::ConnectionState;
    use crate::relay::message::{Frame, KIND_CODE, KIND_ERROR, KIND_SYSTEM, SHUTDOWN_NOTICE};

    struct Peer {
        handle: Arc<ConnectionHandle>,
        rx: mpsc::Receiver<Frame>,
    }

    impl Peer {
        fn join(registry: &Registry, capacity: usize) -> Self {
            let (handle, rx) = ConnectionHandle::new(None, capacity);
            registry.add(handle.clone());
            Self { handle, rx }
        }

        fn drain(&mut self) -> Vec<Value> {
            let mut out = Vec::new();
            while let Ok(frame) = self.rx.try_recv() {
                out.push(serde_json::from_str(&frame).unwrap());
            }
            out
        }
    }

    fn setup() -> (Arc<Registry>, Broadcaster) {
        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        (registry, broadcaster)
    }

    #[test]
    fn test_fan_out_reaches_everyone_but_sender() {
        let (registry, broadcaster) = setup();
        let mut peers: Vec<_> = (0..5).map(|_| Peer::join(&registry, 8)).collect();

        let outcome = broadcaster.relay(&peers[0].handle, r#"{"type":"code","content":"x=1"}"#);
        assert_eq!(
            outcome,
            RelayOutcome::Relayed {
                delivered: 4,
                evicted: 0
            }
        );

        assert!(peers[0].drain().is_empty());
        for peer in &mut peers[1..] {
            let got = peer.drain();
            assert_eq!(got.len(), 1);
            assert_eq!(got[0]["type"], KIND_CODE);
            assert_eq!(got[0]["content"], "x=1");
            assert!(got[0]["timestamp"].is_string());
        }
    }

    #[test]
    fn test_failed_recipient_is_isolated_and_evicted() {
        let (registry, broadcaster) = setup();
        let sender = Peer::join(&registry, 8);
        let bad = Peer::join(&registry, 8);
        let mut s = Peer::join(&registry, 8);
        let mut t = Peer::join(&registry, 8);

        // Writer side gone, as if the transport already failed
        let Peer { handle: bad_handle, rx } = bad;
        drop(rx);

        let outcome = broadcaster.relay(&sender.handle, r#"{"type":"code","content":"y"}"#);
        assert_eq!(
            outcome,
            RelayOutcome::Relayed {
                delivered: 2,
                evicted: 1
            }
        );

        assert_eq!(s.drain().len(), 1);
        assert_eq!(t.drain().len(), 1);
        assert!(!registry.contains(bad_handle.id()));
        assert_eq!(bad_handle.state(), ConnectionState::Closed);
        assert!(sender.handle.is_open());
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_explicit_null_fields_are_relayed() {
        let (registry, broadcaster) = setup();
        let sender = Peer::join(&registry, 8);
        let mut other = Peer::join(&registry, 8);

        broadcaster.relay(
            &sender.handle,
            r#"{"type":"code","content":null,"username":null}"#,
        );

        let got = other.drain();
        assert_eq!(got.len(), 1);
        let object = got[0].as_object().unwrap();
        assert_eq!(object.get("content"), Some(&Value::Null));
        assert_eq!(object.get("username"), Some(&Value::Null));
        assert!(object["timestamp"].is_string());
    }

    #[test]
    fn test_closing_recipient_is_not_evicted() {
        let (registry, broadcaster) = setup();
        let closing = Peer::join(&registry, 8);
        closing.handle.begin_close();

        // A recipient that started closing between snapshot and delivery
        let report = FanOut {
            delivered: 0,
            failed: vec![(closing.handle.id(), DeliveryError::NotOpen)],
        };

        assert_eq!(broadcaster.evict(&report), 0);
        assert!(registry.contains(closing.handle.id()));
        assert_eq!(closing.handle.state(), ConnectionState::Closing);
    }

    #[test]
    fn test_slow_recipient_is_evicted() {
        let (registry, broadcaster) = setup();
        let sender = Peer::join(&registry, 8);
        let mut slow = Peer::join(&registry, 1);

        broadcaster.relay(&sender.handle, r#"{"type":"code","content":"1"}"#);
        let outcome = broadcaster.relay(&sender.handle, r#"{"type":"code","content":"2"}"#);

        assert_eq!(
            outcome,
            RelayOutcome::Relayed {
                delivered: 0,
                evicted: 1
            }
        );
        assert!(!registry.contains(slow.handle.id()));
        assert_eq!(slow.drain().len(), 1);
    }

    #[test]
    fn test_malformed_input_only_answers_sender() {
        let (registry, broadcaster) = setup();
        let mut sender = Peer::join(&registry, 8);
        let mut other = Peer::join(&registry, 8);

        let outcome = broadcaster.relay(&sender.handle, "{not json");
        assert_eq!(outcome, RelayOutcome::Rejected);

        let replies = sender.drain();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["type"], KIND_ERROR);
        assert_eq!(replies[0]["content"], INVALID_FORMAT_NOTICE);
        assert!(replies[0]["timestamp"].is_string());

        assert!(other.drain().is_empty());
        assert!(sender.handle.is_open());
        assert!(registry.contains(sender.handle.id()));
    }

    #[test]
    fn test_undeliverable_error_reply_evicts_sender() {
        let (registry, broadcaster) = setup();
        let Peer { handle, rx } = Peer::join(&registry, 8);
        drop(rx);

        assert_eq!(broadcaster.relay(&handle, "garbage"), RelayOutcome::Rejected);
        assert!(!registry.contains(handle.id()));
    }

    #[test]
    fn test_binary_frames() {
        let (registry, broadcaster) = setup();
        let mut sender = Peer::join(&registry, 8);
        let mut other = Peer::join(&registry, 8);

        let outcome = broadcaster.relay_bytes(&sender.handle, br#"{"type":"code","content":"b"}"#);
        assert!(matches!(outcome, RelayOutcome::Relayed { delivered: 1, .. }));
        assert_eq!(other.drain().len(), 1);

        let outcome = broadcaster.relay_bytes(&sender.handle, &[0xff, 0xfe, 0xfd]);
        assert_eq!(outcome, RelayOutcome::Rejected);
        assert_eq!(sender.drain()[0]["type"], KIND_ERROR);
        assert!(other.drain().is_empty());
    }

    #[test]
    fn test_closing_sender_is_ignored() {
        let (registry, broadcaster) = setup();
        let sender = Peer::join(&registry, 8);
        let mut other = Peer::join(&registry, 8);

        sender.handle.begin_close();
        let outcome = broadcaster.relay(&sender.handle, r#"{"type":"code","content":"z"}"#);

        assert_eq!(outcome, RelayOutcome::Ignored);
        assert!(other.drain().is_empty());
    }

    #[test]
    fn test_per_sender_order_is_preserved() {
        let (registry, broadcaster) = setup();
        let sender = Peer::join(&registry, 16);
        let mut other = Peer::join(&registry, 16);

        for i in 0..10 {
            broadcaster.relay(
                &sender.handle,
                &format!(r#"{{"type":"code","content":"{}"}}"#, i),
            );
        }

        let contents: Vec<String> = other
            .drain()
            .into_iter()
            .map(|v| v["content"].as_str().unwrap().to_string())
            .collect();
        let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        assert_eq!(contents, expected);
    }

    #[test]
    fn test_welcome_and_announce() {
        let (registry, broadcaster) = setup();
        let mut a = Peer::join(&registry, 8);
        let mut b = Peer::join(&registry, 8);

        broadcaster.welcome(&a.handle).unwrap();
        let got = a.drain();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["type"], KIND_SYSTEM);
        assert_eq!(got[0]["content"], WELCOME_NOTICE);
        assert!(b.drain().is_empty());

        let report = broadcaster.announce(&WireMessage::system(SHUTDOWN_NOTICE));
        assert_eq!(report.delivered, 2);
        assert_eq!(a.drain()[0]["content"], SHUTDOWN_NOTICE);
        assert_eq!(b.drain()[0]["content"], SHUTDOWN_NOTICE);
    }

    #[test]
    fn test_join_leave_scenario() {
        let (registry, broadcaster) = setup();
        let mut a = Peer::join(&registry, 8);
        let mut b = Peer::join(&registry, 8);
        let mut c = Peer::join(&registry, 8);

        broadcaster.relay(&a.handle, r#"{"type":"code","content":"x=1"}"#);
        assert!(a.drain().is_empty());
        let got_b = b.drain();
        let got_c = c.drain();
        assert_eq!(got_b.len(), 1);
        assert_eq!(got_c.len(), 1);
        assert_eq!(got_b[0]["content"], "x=1");
        assert_eq!(got_c[0]["content"], "x=1");

        registry.remove(b.handle.id());

        broadcaster.relay(&c.handle, r#"{"type":"code","content":"y=2"}"#);
        let got_a = a.drain();
        assert_eq!(got_a.len(), 1);
        assert_eq!(got_a[0]["content"], "y=2");
        assert!(b.drain().is_empty());
        assert_eq!(registry.len(), 2);
    }
}
