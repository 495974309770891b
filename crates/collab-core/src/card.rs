//! Cards and digests: the membership vocabulary.
//!
//! A `Card` is a node's address and liveness record. A `Digest` is one
//! node's view of the cluster: every known card keyed by its identity
//! string, plus the wall-clock second of the last local mutation. Two
//! digests are reconciled last-writer-wins on that timestamp, at whole
//! digest granularity. There is no per-card versioning, so a stale
//! digest with a skewed clock can roll a view back.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Route prefix used when a card does not carry its own `api` suffix.
pub const DEFAULT_API: &str = "/collaborator";

/// Error parsing an `ip:port` card address.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseCardError {
    #[error("missing port in card address: {0}")]
    MissingPort(String),

    #[error("invalid port in card address: {0}")]
    InvalidPort(String),
}

// ── Card ───────────────────────────────────────────────────────────

/// A node's network identity and liveness record.
///
/// Equality and hashing consider only `(ip, port)`; the `alive`, `api`,
/// and `seed` fields never affect identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    ip: String,
    port: u16,
    pub alive: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    api: String,
    #[serde(default)]
    pub seed: bool,
}

impl Card {
    /// Create a live, non-seed card.
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            alive: true,
            api: String::new(),
            seed: false,
        }
    }

    /// Mark this card as a seed.
    pub fn as_seed(mut self) -> Self {
        self.seed = true;
        self
    }

    /// Set the route suffix the node serves its peer API under.
    pub fn with_api(mut self, api: impl Into<String>) -> Self {
        self.api = api.into();
        self
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Identity key used in digests: `ip:port`.
    pub fn identity(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Route prefix for this node's peer API, without a trailing slash.
    ///
    /// Always rooted: `peer`, `/peer` and `/peer/` all yield `/peer`. A bare
    /// `/` yields the empty prefix, which mounts the API at the root.
    pub fn api(&self) -> String {
        let api = if self.api.is_empty() { DEFAULT_API } else { self.api.as_str() };
        let trimmed = api.trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        }
    }

    /// Whether this card names the same endpoint, either directly or
    /// through an externally mapped address (NAT / port forwarding).
    pub fn same_as(&self, other: &Card, external_ip: Option<&str>) -> bool {
        if self == other {
            return true;
        }
        match external_ip {
            Some(ext) => self.port == other.port && other.ip == ext,
            None => false,
        }
    }
}

impl PartialEq for Card {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip && self.port == other.port
    }
}

impl Eq for Card {}

impl Hash for Card {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ip.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl FromStr for Card {
    type Err = ParseCardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseCardError::MissingPort(s.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| ParseCardError::InvalidPort(s.to_string()))?;
        Ok(Card::new(ip, port))
    }
}

// ── Digest ─────────────────────────────────────────────────────────

/// A node's snapshot of cluster membership.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Digest {
    #[serde(default)]
    pub cards: BTreeMap<String, Card>,
    #[serde(default)]
    pub timestamp: u64,
}

impl Digest {
    /// Build a digest from cards, stamped with the current time.
    pub fn new(cards: impl IntoIterator<Item = Card>) -> Self {
        let mut digest = Self {
            cards: cards.into_iter().map(|c| (c.identity(), c)).collect(),
            timestamp: 0,
        };
        digest.touch();
        digest
    }

    /// Record a local mutation. The timestamp never moves backwards.
    pub fn touch(&mut self) {
        self.timestamp = epoch_secs().max(self.timestamp);
    }

    /// Whether this digest wins a last-writer-wins comparison against `other`.
    pub fn is_newer_than(&self, other: &Digest) -> bool {
        self.timestamp > other.timestamp
    }

    /// Merge `other` into `self` if it is newer. Returns true if `self` changed.
    pub fn merge(&mut self, other: &Digest) -> bool {
        if other.is_newer_than(self) {
            self.cards = other.cards.clone();
            self.timestamp = other.timestamp;
            true
        } else {
            false
        }
    }

    /// Insert or replace a card.
    pub fn insert(&mut self, card: Card) {
        self.cards.insert(card.identity(), card);
        self.touch();
    }

    /// Set a card's liveness. Returns true if the flag changed.
    pub fn set_alive(&mut self, identity: &str, alive: bool) -> bool {
        match self.cards.get_mut(identity) {
            Some(card) if card.alive != alive => {
                card.alive = alive;
                self.touch();
                true
            }
            _ => false,
        }
    }

    /// Remove every card marked not-alive and return them.
    pub fn remove_dead(&mut self) -> Vec<Card> {
        let dead: Vec<String> = self
            .cards
            .iter()
            .filter(|(_, c)| !c.alive)
            .map(|(k, _)| k.clone())
            .collect();

        let removed: Vec<Card> = dead.iter().filter_map(|k| self.cards.remove(k)).collect();
        if !removed.is_empty() {
            self.touch();
        }
        removed
    }

    /// Cards in stable identity order.
    pub fn peers(&self) -> Vec<Card> {
        self.cards.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest_at(ts: u64, cards: &[(&str, u16)]) -> Digest {
        Digest {
            cards: cards
                .iter()
                .map(|(ip, port)| {
                    let c = Card::new(*ip, *port);
                    (c.identity(), c)
                })
                .collect(),
            timestamp: ts,
        }
    }

    #[test]
    fn card_identity_ignores_flags() {
        let a = Card::new("10.0.0.1", 8080);
        let mut b = Card::new("10.0.0.1", 8080).as_seed().with_api("/v2");
        b.alive = false;
        assert_eq!(a, b);
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn card_never_equals_different_port() {
        let a = Card::new("10.0.0.1", 8080);
        let b = Card::new("10.0.0.1", 8081);
        assert_ne!(a, b);
        assert!(!a.same_as(&b, Some("10.0.0.1")));
    }

    #[test]
    fn card_matches_through_external_ip() {
        let local = Card::new("192.168.1.5", 8080);
        let seen_by_peer = Card::new("203.0.113.7", 8080);
        assert!(local.same_as(&seen_by_peer, Some("203.0.113.7")));
        assert!(!local.same_as(&seen_by_peer, None));

        // A local address equal to the mapped one must not claim other hosts.
        let public = Card::new("203.0.113.5", 8080);
        assert!(!public.same_as(&Card::new("10.0.0.9", 8080), Some("203.0.113.5")));
        assert!(public.same_as(&Card::new("203.0.113.5", 8080), Some("203.0.113.5")));
    }

    #[test]
    fn card_parses_address() {
        let card: Card = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(card.ip(), "127.0.0.1");
        assert_eq!(card.port(), 9000);
        assert!(card.alive);
        assert_eq!(card.api(), DEFAULT_API);
        assert_eq!(card.clone().with_api("/v2/").api(), "/v2");
        assert_eq!(card.clone().with_api("/").api(), "");
        assert_eq!(card.clone().with_api("peer").api(), "/peer");
        assert_eq!(card.with_api("peer/").api(), "/peer");

        assert_eq!(
            "localhost".parse::<Card>(),
            Err(ParseCardError::MissingPort("localhost".to_string()))
        );
        assert!(matches!(
            "localhost:http".parse::<Card>(),
            Err(ParseCardError::InvalidPort(_))
        ));
    }

    #[test]
    fn merge_takes_newer_digest() {
        let mut a = digest_at(100, &[("10.0.0.1", 1)]);
        let b = digest_at(200, &[("10.0.0.2", 2)]);

        assert!(a.merge(&b));
        assert_eq!(a, b);

        // Older digest never wins.
        let mut newer = digest_at(300, &[("10.0.0.3", 3)]);
        assert!(!newer.merge(&b));
        assert_eq!(newer.timestamp, 300);
    }

    #[test]
    fn merge_is_idempotent_and_keeps_max_timestamp() {
        let a = digest_at(100, &[("10.0.0.1", 1)]);
        let b = digest_at(250, &[("10.0.0.2", 2), ("10.0.0.3", 3)]);

        let mut ab = a.clone();
        ab.merge(&b);
        assert_eq!(ab.timestamp, a.timestamp.max(b.timestamp));

        let mut ab_a = ab.clone();
        ab_a.merge(&a);
        assert_eq!(ab_a, ab);

        let mut ba = b.clone();
        ba.merge(&a);
        assert_eq!(ba, ab);
    }

    #[test]
    fn remove_dead_drops_only_dead_cards() {
        let mut d = digest_at(10, &[("10.0.0.1", 1), ("10.0.0.2", 2)]);
        assert!(d.set_alive("10.0.0.2:2", false));
        assert!(!d.set_alive("10.0.0.2:2", false));

        let removed = d.remove_dead();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].identity(), "10.0.0.2:2");
        assert_eq!(d.len(), 1);
        assert!(d.timestamp >= 10);
    }

    #[test]
    fn touch_never_moves_backwards() {
        let mut d = digest_at(u64::MAX - 1, &[]);
        d.insert(Card::new("10.0.0.1", 1));
        assert_eq!(d.timestamp, u64::MAX - 1);
    }

    #[test]
    fn peers_are_in_identity_order() {
        let d = Digest::new([
            Card::new("10.0.0.3", 1),
            Card::new("10.0.0.1", 1),
            Card::new("10.0.0.2", 1),
        ]);
        let ids: Vec<String> = d.peers().iter().map(Card::identity).collect();
        assert_eq!(ids, vec!["10.0.0.1:1", "10.0.0.2:1", "10.0.0.3:1"]);
    }
}
