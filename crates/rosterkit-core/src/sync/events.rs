//! Sync status and event types
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  TagStatus: per synced tag                                      │
//! │  ├── Unsynced: no trusted copy (never fetched, failed, cancel)  │
//! │  ├── Syncing: fetch, write or replay in progress                │
//! │  └── Synced: local copy matches the last observed version       │
//! │                                                                 │
//! │  SyncEvent: notifications for frontends                         │
//! │  ├── StatusChanged: tag moved between states                    │
//! │  ├── RemoteChange: element changed by another device            │
//! │  ├── Committed: local mutation accepted by the store            │
//! │  ├── Conflict: local mutation dropped                           │
//! │  └── HandlerError: a tag handler failed to apply a change       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use super::store::Version;

/// Synchronization state of one tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagStatus {
    #[default]
    Unsynced,
    Syncing,
    Synced,
}

impl fmt::Display for TagStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagStatus::Unsynced => write!(f, "Unsynced"),
            TagStatus::Syncing => write!(f, "Syncing"),
            TagStatus::Synced => write!(f, "Synced"),
        }
    }
}

/// How an element differs between two observed versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeKind {
    Removed,
    Modified,
    Inserted,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Removed => write!(f, "removed"),
            ChangeKind::Modified => write!(f, "modified"),
            ChangeKind::Inserted => write!(f, "inserted"),
        }
    }
}

/// Events emitted by the sync engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    StatusChanged {
        tag: String,
        status: TagStatus,
    },
    /// Another device changed an element; handlers have already run
    RemoteChange {
        tag: String,
        kind: ChangeKind,
        id: String,
    },
    /// A local mutation was written
    Committed {
        tag: String,
        version: Version,
        id: String,
    },
    /// A local mutation was dropped after a conflict
    Conflict {
        tag: String,
        id: String,
        attempts: u32,
    },
    HandlerError {
        tag: String,
        id: String,
        message: String,
    },
}

impl SyncEvent {
    /// Tag this event belongs to
    pub fn tag(&self) -> &str {
        match self {
            SyncEvent::StatusChanged { tag, .. }
            | SyncEvent::RemoteChange { tag, .. }
            | SyncEvent::Committed { tag, .. }
            | SyncEvent::Conflict { tag, .. }
            | SyncEvent::HandlerError { tag, .. } => tag,
        }
    }
}
