//! Connection registry
//!
//! The only state shared between connection tasks. Membership changes take
//! the write lock for a single map operation; fan-out clones the member list
//! under the read lock and delivers with no lock held, so a slow or failing
//! recipient never stalls joins and leaves on other connections.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::connection::{ConnectionHandle, ConnectionId};
use crate::error::DeliveryError;

/// Result of one pass over the registry
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanOut {
    /// Members the callback succeeded for
    pub delivered: usize,
    /// Members the callback failed for, in visit order
    pub failed: Vec<(ConnectionId, DeliveryError)>,
}

/// Authoritative set of Open connections
#[derive(Debug, Default)]
pub struct Registry {
    members: RwLock<HashMap<ConnectionId, Arc<ConnectionHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a live connection
    ///
    /// Returns false if the handle is no longer Open or its id is already
    /// registered; the existing entry is kept in the latter case.
    pub fn add(&self, handle: Arc<ConnectionHandle>) -> bool {
        if !handle.is_open() {
            return false;
        }

        let mut members = self.members.write();
        if members.contains_key(&handle.id()) {
            return false;
        }
        members.insert(handle.id(), handle);
        true
    }

    /// Remove a connection and mark it Closed. Removing an absent id is a no-op.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        let removed = self.members.write().remove(&id);
        if let Some(handle) = &removed {
            handle.mark_closed();
        }
        removed
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.members.read().keys().copied().collect()
    }

    /// Consistent copy of the current members
    pub fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.members.read().values().cloned().collect()
    }

    /// Call `f` once for every Open member other than `sender`
    pub fn for_each_except<F>(&self, sender: ConnectionId, f: F) -> FanOut
    where
        F: FnMut(&ConnectionHandle) -> Result<(), DeliveryError>,
    {
        self.visit(Some(sender), f)
    }

    /// Call `f` once for every Open member
    pub fn for_each<F>(&self, f: F) -> FanOut
    where
        F: FnMut(&ConnectionHandle) -> Result<(), DeliveryError>,
    {
        self.visit(None, f)
    }

    /// Ask every member to close. Returns how many were asked.
    pub fn close_all(&self) -> usize {
        let members = self.snapshot();
        for handle in &members {
            handle.close();
        }
        members.len()
    }

    fn visit<F>(&self, skip: Option<ConnectionId>, mut f: F) -> FanOut
    where
        F: FnMut(&ConnectionHandle) -> Result<(), DeliveryError>,
    {
        let members = self.snapshot();
        let mut report = FanOut::default();

        for handle in members {
            if Some(handle.id()) == skip {
                continue;
            }
            // Removed or closing since the snapshot was taken
            if !handle.is_open() {
                debug!(connection = %handle.id(), "Skipping connection that is no longer open");
                continue;
            }

            match f(&*handle) {
                Ok(()) => report.delivered += 1,
                Err(e) => report.failed.push((handle.id(), e)),
            }
        }

        report
    }
}
