//! Snapshot history - bounded record of local predictions

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::diff::StateTree;
use crate::protocol::Command;

/// What the client believed, and why, on top of a given server tick
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub issued_at: DateTime<Utc>,
    /// Server tick the prediction was built on
    pub server_tick: u64,
    /// State right after the prediction
    pub predicted_state: StateTree,
    pub command: Option<Command>,
    /// Set once the server acknowledged the command as accepted
    pub confirmed: bool,
}

impl Snapshot {
    pub fn new(server_tick: u64, predicted_state: StateTree, command: Option<Command>) -> Self {
        Self {
            id: Uuid::new_v4(),
            issued_at: Utc::now(),
            server_tick,
            predicted_state,
            command,
            confirmed: false,
        }
    }

    pub fn command_id(&self) -> Option<&str> {
        self.command.as_ref().map(|c| c.id.as_str())
    }
}

/// Insertion-ordered FIFO buffer of snapshots
#[derive(Debug, Clone)]
pub struct SnapshotHistory {
    entries: VecDeque<Snapshot>,
    capacity: usize,
}

impl SnapshotHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append and return whatever fell off the front
    pub fn push(&mut self, snapshot: Snapshot) -> Vec<Snapshot> {
        self.entries.push_back(snapshot);
        self.evict_overflow()
    }

    /// Change capacity, evicting oldest entries if needed
    pub fn set_capacity(&mut self, capacity: usize) -> Vec<Snapshot> {
        self.capacity = capacity;
        self.evict_overflow()
    }

    fn evict_overflow(&mut self) -> Vec<Snapshot> {
        let overflow = self.entries.len().saturating_sub(self.capacity);
        self.entries.drain(..overflow).collect()
    }

    /// Remove snapshots built on a tick older than `min_tick`
    pub fn prune_before(&mut self, min_tick: u64) -> Vec<Snapshot> {
        let (keep, pruned): (VecDeque<_>, VecDeque<_>) = self
            .entries
            .drain(..)
            .partition(|s| s.server_tick >= min_tick);
        self.entries = keep;
        pruned.into()
    }

    /// Drop every snapshot produced by `command_id`; returns how many
    pub fn remove_command(&mut self, command_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|s| s.command_id() != Some(command_id));
        before - self.entries.len()
    }

    pub fn mark_confirmed(&mut self, command_id: &str) {
        for snapshot in self
            .entries
            .iter_mut()
            .filter(|s| s.command_id() == Some(command_id))
        {
            snapshot.confirmed = true;
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
