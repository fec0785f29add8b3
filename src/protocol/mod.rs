//! Command and message definitions
//! Commands are what the engine predicts; the message enums are the shapes a
//! host feeds in from (or sends out to) its transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::diff::StateTree;

/// Player identifier as used in `owner` fields of the state tree
pub type PlayerId = u32;

/// Built-in command kinds
pub mod kinds {
    pub const PLACE_TILE: &str = "place_tile";
    pub const MOVE_UNIT: &str = "move_unit";
    pub const TRAIN_UNIT: &str = "train_unit";
    pub const PLACE_WORKER: &str = "place_worker";
}

/// A player action. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Client-generated unique id
    pub id: String,
    /// Kind tag used to pick a predictor
    pub kind: String,
    /// Kind-specific payload
    pub data: StateTree,
    pub issued_at: DateTime<Utc>,
    pub issuer: PlayerId,
}

impl Command {
    /// Create a command with a fresh id, issued now
    pub fn new(kind: impl Into<String>, data: StateTree, issuer: PlayerId) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            data,
            issued_at: Utc::now(),
            issuer,
        }
    }

    /// Same as `new` but with a caller-chosen id
    pub fn with_id(
        id: impl Into<String>,
        kind: impl Into<String>,
        data: StateTree,
        issuer: PlayerId,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            data,
            issued_at: Utc::now(),
            issuer,
        }
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Issue a command
    Command { command: Command },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Full authoritative state
    Snapshot {
        /// Server tick number
        tick: u64,
        state: StateTree,
    },

    /// Outcome of a previously issued command
    CommandAck {
        command_id: String,
        success: bool,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn server_msgs_are_tagged() {
        let msg: ServerMsg = serde_json::from_value(json!({
            "type": "command_ack",
            "command_id": "c1",
            "success": false
        }))
        .unwrap();
        let ServerMsg::CommandAck {
            command_id,
            success,
        } = &msg
        else {
            panic!("expected command_ack, got {msg:?}");
        };
        assert_eq!(command_id, "c1");
        assert!(!*success);

        let snap = serde_json::to_value(ServerMsg::Snapshot {
            tick: 4,
            state: json!({"tiles": []}),
        })
        .unwrap();
        assert_eq!(snap["type"], "snapshot");
        assert_eq!(snap["tick"], 4);

        let ping = serde_json::to_value(ClientMsg::Ping { t: 9 }).unwrap();
        assert_eq!(ping, json!({"type": "ping", "t": 9}));
    }

    #[test]
    fn commands_get_unique_ids() {
        let a = Command::new(kinds::PLACE_TILE, json!({}), 1);
        let b = Command::new(kinds::PLACE_TILE, json!({}), 1);
        assert_ne!(a.id, b.id);
    }
}
