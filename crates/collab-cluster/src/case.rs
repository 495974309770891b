//! Case: the node-local, persisted membership store.
//!
//! A `Case` ties a cluster identifier to this node's card, the elected
//! coordinator, and the current digest. Every read, merge, and removal
//! runs under one mutex, and when the case is backed by a file the whole
//! state is rewritten while that mutex is still held, so two writers can
//! never interleave.
//!
//! The gossip state machine also lives here: `exchange` validates an
//! incoming `CardMessage`, merges the carried digest when the step allows
//! it, and builds the reply.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use collab_core::{Card, Digest};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ClusterError, ClusterResult};
use crate::message::{CardMessage, MessageType, Status, StatusCode};

/// On-disk layout of a case file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CaseState {
    caseid: String,
    #[serde(flatten)]
    digest: Digest,
    local: Card,
    coordinator: Card,
}

/// The authoritative local membership view of one node.
///
/// # Concurrency
///
/// The state sits behind a `std::sync::Mutex` that is held across the
/// file rewrite. A case file is one small JSON document, so a write is a
/// single short `fs::write` plus `rename` and the lock is never held
/// across an `.await`; async callers block their worker thread for that
/// long only.
#[derive(Debug)]
pub struct Case {
    state: Mutex<CaseState>,
    path: Option<PathBuf>,
    /// Address this node is reachable at from outside a NAT.
    external_ip: Option<String>,
}

impl Case {
    /// Create an in-memory case. The digest starts with the local card
    /// plus every seed; the local card is the coordinator.
    pub fn new(case_id: impl Into<String>, local: Card, seeds: impl IntoIterator<Item = Card>) -> Self {
        let cards = std::iter::once(local.clone()).chain(seeds.into_iter().map(Card::as_seed));
        Self {
            state: Mutex::new(CaseState {
                caseid: case_id.into(),
                digest: Digest::new(cards),
                coordinator: local.clone(),
                local,
            }),
            path: None,
            external_ip: None,
        }
    }

    /// Create a case and write it to `path`.
    pub fn create(
        path: impl Into<PathBuf>,
        case_id: impl Into<String>,
        local: Card,
        seeds: impl IntoIterator<Item = Card>,
    ) -> ClusterResult<Self> {
        let mut case = Self::new(case_id, local, seeds);
        let path = path.into();
        write_stream(&path, &case.lock())?;
        info!(path = %path.display(), "case file created");
        case.path = Some(path);
        Ok(case)
    }

    /// Load a case file written by `create`.
    pub fn load(path: impl Into<PathBuf>) -> ClusterResult<Self> {
        let path = path.into();
        let raw = fs::read(&path)
            .map_err(|e| ClusterError::Load(format!("{}: {e}", path.display())))?;
        let state: CaseState = serde_json::from_slice(&raw)
            .map_err(|e| ClusterError::Load(format!("{}: {e}", path.display())))?;

        info!(
            path = %path.display(),
            case = %state.caseid,
            local = %state.local,
            cards = state.digest.len(),
            "case loaded"
        );
        Ok(Self {
            state: Mutex::new(state),
            path: Some(path),
            external_ip: None,
        })
    }

    /// Recognize cards carrying this externally mapped address as local.
    pub fn with_external_ip(mut self, ip: impl Into<String>) -> Self {
        self.external_ip = Some(ip.into());
        self
    }

    fn lock(&self) -> MutexGuard<'_, CaseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist the state while the caller still holds the lock.
    fn persist(&self, state: &CaseState) -> ClusterResult<()> {
        match &self.path {
            Some(path) => write_stream(path, state),
            None => Ok(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn case_id(&self) -> String {
        self.lock().caseid.clone()
    }

    pub fn local(&self) -> Card {
        self.lock().local.clone()
    }

    pub fn coordinator(&self) -> Card {
        self.lock().coordinator.clone()
    }

    /// Snapshot of the current digest.
    pub fn digest(&self) -> Digest {
        self.lock().digest.clone()
    }

    /// Known cards in stable identity order.
    pub fn peers(&self) -> Vec<Card> {
        self.lock().digest.peers()
    }

    /// Whether `card` names this node.
    pub fn is_local(&self, card: &Card) -> bool {
        let state = self.lock();
        state.local.same_as(card, self.external_ip.as_deref())
    }

    /// Merge `other` if it is newer. Persists and returns true on change.
    pub fn merge(&self, other: &Digest) -> ClusterResult<bool> {
        let mut state = self.lock();
        if !state.digest.merge(other) {
            return Ok(false);
        }
        debug!(cards = state.digest.len(), timestamp = state.digest.timestamp, "digest merged");
        self.persist(&state)?;
        Ok(true)
    }

    /// Add or replace a card.
    pub fn insert(&self, card: Card) -> ClusterResult<()> {
        let mut state = self.lock();
        state.digest.insert(card);
        self.persist(&state)
    }

    /// Mark a peer not-alive. Persists and returns true if the flag changed.
    pub fn mark_down(&self, identity: &str) -> ClusterResult<bool> {
        let mut state = self.lock();
        if !state.digest.set_alive(identity, false) {
            return Ok(false);
        }
        warn!(peer = identity, "peer marked down");
        self.persist(&state)?;
        Ok(true)
    }

    /// Remove every card marked not-alive and return them.
    pub fn clean(&self) -> ClusterResult<Vec<Card>> {
        let mut state = self.lock();
        let removed = state.digest.remove_dead();
        if !removed.is_empty() {
            self.persist(&state)?;
        }
        Ok(removed)
    }

    // ── Gossip state machine ───────────────────────────────────────

    /// Build an outgoing message of `msg_type` addressed to `to`.
    pub fn message(&self, to: &Card, msg_type: MessageType) -> CardMessage {
        let state = self.lock();
        CardMessage {
            cluster: state.caseid.clone(),
            from: state.local.clone(),
            to: to.clone(),
            digest: state.digest.clone(),
            status: Status::ok(),
            msg_type,
        }
    }

    /// Handle one incoming gossip message and build the reply.
    ///
    /// Returns `None` once the round is over (`Ack3`). A message that
    /// fails validation gets a reply carrying the error status and the
    /// received type.
    pub fn exchange(&self, msg: &CardMessage) -> Option<CardMessage> {
        if let Err(e) = self.validate(msg) {
            warn!(from = %msg.from, error = %e, "gossip message rejected");
            return Some(self.reject(msg, Status::from(&e)));
        }

        let Some(reply_type) = msg.msg_type.reply() else {
            if let MessageType::Unknown(t) = msg.msg_type {
                warn!(from = %msg.from, msg_type = t, "unknown gossip message type");
                return Some(self.reject(msg, Status {
                    code: StatusCode::UnknownMsgType,
                    detail: ClusterError::UnknownMsgType(t).to_string(),
                }));
            }
            debug!(from = %msg.from, "gossip round complete");
            return None;
        };

        if msg.msg_type.merges() {
            match self.merge(&msg.digest) {
                Ok(true) => debug!(from = %msg.from, "adopted newer digest"),
                Ok(false) => {}
                Err(e) => warn!(from = %msg.from, error = %e, "merged digest not persisted"),
            }
        }

        Some(self.message(&msg.from, reply_type))
    }

    fn validate(&self, msg: &CardMessage) -> ClusterResult<()> {
        let state = self.lock();
        if msg.cluster != state.caseid {
            return Err(ClusterError::ClusterMismatch {
                expected: state.caseid.clone(),
                got: msg.cluster.clone(),
            });
        }
        if !state.local.same_as(&msg.to, self.external_ip.as_deref()) {
            return Err(ClusterError::CollaboratorMismatch(msg.to.identity()));
        }
        Ok(())
    }

    fn reject(&self, msg: &CardMessage, status: Status) -> CardMessage {
        let mut reply = self.message(&msg.from, msg.msg_type);
        reply.status = status;
        reply
    }
}

/// Rewrite the case file wholesale through a sibling temp file.
fn write_stream(path: &Path, state: &CaseState) -> ClusterResult<()> {
    let json = serde_json::to_vec_pretty(state).map_err(|e| ClusterError::Codec(e.to_string()))?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json)
        .map_err(|e| ClusterError::Persist(format!("{}: {e}", tmp.display())))?;
    fs::rename(&tmp, path)
        .map_err(|e| ClusterError::Persist(format!("{}: {e}", path.display())))?;
    Ok(())
}
