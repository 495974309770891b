//! Gossip messages exchanged between collaborators.
//!
//! A round is four messages: the initiator sends `Sync`, the peer answers
//! `Ack`, the initiator follows with `Ack2`, and the peer closes the round
//! with `Ack3`. Every message carries the sender's current digest.

use collab_core::{Card, Digest};
use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, ClusterResult};

/// Step of the gossip round. Unrecognized wire values are preserved as
/// `Unknown` so they can be rejected with a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum MessageType {
    Sync,
    Ack,
    Ack2,
    Ack3,
    Unknown(u8),
}

impl MessageType {
    /// The type sent in reply, or `None` when the round ends here.
    pub fn reply(self) -> Option<MessageType> {
        match self {
            MessageType::Sync => Some(MessageType::Ack),
            MessageType::Ack => Some(MessageType::Ack2),
            MessageType::Ack2 => Some(MessageType::Ack3),
            MessageType::Ack3 | MessageType::Unknown(_) => None,
        }
    }

    /// Whether receiving this type may merge the carried digest.
    pub fn merges(self) -> bool {
        matches!(self, MessageType::Sync | MessageType::Ack)
    }
}

impl From<u8> for MessageType {
    fn from(v: u8) -> Self {
        match v {
            0 => MessageType::Sync,
            1 => MessageType::Ack,
            2 => MessageType::Ack2,
            3 => MessageType::Ack3,
            other => MessageType::Unknown(other),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> Self {
        match t {
            MessageType::Sync => 0,
            MessageType::Ack => 1,
            MessageType::Ack2 => 2,
            MessageType::Ack3 => 3,
            MessageType::Unknown(v) => v,
        }
    }
}

/// Outcome code carried in a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    #[default]
    Ok,
    ClusterMismatch,
    CollaboratorMismatch,
    UnknownMsgType,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

impl Status {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }
}

impl From<&ClusterError> for Status {
    fn from(e: &ClusterError) -> Self {
        let code = match e {
            ClusterError::ClusterMismatch { .. } => StatusCode::ClusterMismatch,
            ClusterError::CollaboratorMismatch(_) => StatusCode::CollaboratorMismatch,
            _ => StatusCode::UnknownMsgType,
        };
        Self {
            code,
            detail: e.to_string(),
        }
    }
}

/// One gossip message. Lives only for the duration of a single call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardMessage {
    pub cluster: String,
    pub from: Card,
    pub to: Card,
    #[serde(flatten)]
    pub digest: Digest,
    #[serde(default)]
    pub status: Status,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
}

impl CardMessage {
    /// Turn a non-ok status into the matching error.
    pub fn check_status(&self) -> ClusterResult<()> {
        match self.status.code {
            StatusCode::Ok => Ok(()),
            StatusCode::ClusterMismatch => Err(ClusterError::ClusterMismatch {
                expected: self.cluster.clone(),
                got: self.status.detail.clone(),
            }),
            StatusCode::CollaboratorMismatch => {
                Err(ClusterError::CollaboratorMismatch(self.status.detail.clone()))
            }
            StatusCode::UnknownMsgType => Err(ClusterError::UnknownMsgType(self.msg_type.into())),
        }
    }
}
