//! Cluster error types.

use collab_scheduler::SchedulerError;
use thiserror::Error;

/// Errors from membership, gossip, transport, and dispatch.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("no peers in the membership view")]
    NoPeers,

    #[error("cluster mismatch: expected {expected}, got {got}")]
    ClusterMismatch { expected: String, got: String },

    #[error("message addressed to another collaborator: {0}")]
    CollaboratorMismatch(String),

    #[error("unknown message type: {0}")]
    UnknownMsgType(u8),

    #[error("exchange ended before the round completed")]
    RoundAborted,

    #[error("connection failure: {0}")]
    Connection(String),

    #[error("failed to persist case: {0}")]
    Persist(String),

    #[error("failed to load case: {0}")]
    Load(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

impl ClusterError {
    /// Whether this error means the peer could not be reached.
    pub fn is_connection(&self) -> bool {
        matches!(self, ClusterError::Connection(_))
    }
}

pub type ClusterResult<T> = Result<T, ClusterError>;
