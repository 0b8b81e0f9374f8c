//! Multi-device synchronization of roster private data
//!
//! ## Overview
//!
//! Roster-related data that must follow the user across devices (bookmarks,
//! group metadata, annotations...) lives in a remote private store as one XML
//! document per *synced tag*. Each document holds elements keyed by an `id`
//! attribute. The store offers no transactions, only a write conditional on
//! the version last seen, so local mutations are applied optimistically and
//! replayed when another device won the race.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  RemoteStore (async trait)                                      │
//! │  ├── fetch(tag) → (version, document?)                          │
//! │  ├── replace(tag, expected_version, document) → version         │
//! │  └── subscribe() → (tag, version) notifications                 │
//! │                                                                 │
//! │  SyncEngine                                                     │
//! │  ├── SyncedDataSet per tag (last observed base)                 │
//! │  ├── insert / update / remove with bounded replay               │
//! │  ├── diff → Removed, Modified, Inserted                         │
//! │  └── SyncEvent broadcast                                        │
//! │                                                                 │
//! │  SyncedTagHandler (per tag)                                     │
//! │  └── RosterMirror: elements ⇄ children of a roster container    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod dataset;
pub mod engine;
pub mod events;
pub mod handler;
pub mod store;

pub use dataset::{Change, SyncedDataSet, Upsert, ID_ATTR};
pub use engine::SyncEngine;
pub use events::{ChangeKind, SyncEvent, TagStatus};
pub use handler::{RosterMirror, SyncedTagHandler};
pub use store::{MemoryStore, RemoteStore, StoreError, StoreNotification, Version, VersionedDocument};
