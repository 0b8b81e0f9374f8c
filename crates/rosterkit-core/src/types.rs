//! Core value types for the roster

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::DataValidityError;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable local identity of a roster node.
///
/// Ids are handed out from a process-wide counter, so two nodes never share
/// an id even if they live in different rosters. They are not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Allocate a fresh id
    pub fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node_{}", self.0)
    }
}

/// External identifier a roster node represents: a peer address as seen
/// from one of the user's accounts.
///
/// The same peer reached through two different accounts yields two distinct
/// vias.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Via {
    account: String,
    peer: String,
}

impl Via {
    /// Create a via, rejecting empty addresses
    pub fn new(account: impl Into<String>, peer: impl Into<String>) -> Result<Self, DataValidityError> {
        let account = account.into();
        let peer = peer.into();
        if account.trim().is_empty() {
            return Err(DataValidityError::new("via", "account address is empty"));
        }
        if peer.trim().is_empty() {
            return Err(DataValidityError::new("via", "peer address is empty"));
        }
        Ok(Self { account, peer })
    }

    /// Address of the account the peer is reached through
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Address of the peer
    pub fn peer(&self) -> &str {
        &self.peer
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (via {})", self.peer, self.account)
    }
}

/// Availability sub-state of an available peer.
///
/// Variants are declared in ascending order of "reachability", so the derived
/// `Ord` picks the most reachable state with `max()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceShow {
    /// Extended away
    Xa,
    Away,
    /// Available without further qualification
    #[default]
    Plain,
    /// Free for chat
    Chat,
    /// Do not disturb
    Dnd,
}

impl fmt::Display for PresenceShow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Xa => "xa",
            Self::Away => "away",
            Self::Plain => "plain",
            Self::Chat => "chat",
            Self::Dnd => "dnd",
        };
        f.write_str(s)
    }
}

/// Presence of a peer through one via.
///
/// Ordered so that any available state is greater than unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct PresenceState {
    pub available: bool,
    pub show: PresenceShow,
}

impl PresenceState {
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn available(show: PresenceShow) -> Self {
        Self {
            available: true,
            show,
        }
    }
}

impl fmt::Display for PresenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.available {
            write!(f, "available ({})", self.show)
        } else {
            f.write_str("unavailable")
        }
    }
}

/// Identifier of an element in a synced data set
///
/// Uses ULID so ids generated on different devices do not collide and sort
/// by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncId(pub Ulid);

impl SyncId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn from_string(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for SyncId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_ids_are_unique() {
        let a = NodeId::next();
        let b = NodeId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_via_rejects_empty_addresses() {
        assert!(Via::new("", "bob@example.net").is_err());
        assert!(Via::new("alice@example.org", "  ").is_err());
        let via = Via::new("alice@example.org", "bob@example.net").unwrap();
        assert_eq!(via.account(), "alice@example.org");
        assert_eq!(via.peer(), "bob@example.net");
    }

    #[test]
    fn test_via_identity_includes_account() {
        let a = Via::new("alice@example.org", "bob@example.net").unwrap();
        let b = Via::new("alice@work.example", "bob@example.net").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_presence_ordering() {
        let offline = PresenceState::unavailable();
        let xa = PresenceState::available(PresenceShow::Xa);
        let plain = PresenceState::available(PresenceShow::Plain);
        let dnd = PresenceState::available(PresenceShow::Dnd);

        assert!(offline < xa);
        assert!(xa < plain);
        assert!(plain < dnd);
        assert_eq!([xa, offline, dnd, plain].into_iter().max(), Some(dnd));
    }

    #[test]
    fn test_sync_id_roundtrip() {
        let id = SyncId::new();
        let parsed = SyncId::from_string(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }
}
