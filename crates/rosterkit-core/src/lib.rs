//! Rosterkit Core Library
//!
//! Extensible contact roster with XML persistence and multi-device sync.
//!
//! ## Overview
//!
//! The roster is an in-memory tree of groups, contacts and the *vias* (peer
//! address as seen from one account) through which contacts are reached.
//! Plugins add node kinds through a factory registry and observe mutations
//! through a hook chain. Parts of the roster can be mirrored into a remote
//! private store shared by all of the user's devices.
//!
//! ## Core Principles
//!
//! - **Lossless**: unknown elements and attributes survive a load/save cycle
//! - **Transactional**: a failed structural change leaves the tree untouched
//! - **Optimistic sync**: conditional writes, replay on conflict, bounded retries
//!
//! ## Quick Start
//!
//! ```ignore
//! use rosterkit_core::{Node, Roster, Via};
//!
//! let mut roster = Roster::new();
//! let root = roster.root_id();
//! let friends = roster.attach(root, Node::group(Some("Friends")))?;
//!
//! let bob = Node::contact(Some("Bob"))
//!     .with_child(Node::via(Via::new("alice@example.org", "bob@example.net")?, None))?;
//! roster.attach(friends, bob)?;
//!
//! println!("{}", roster.to_xml(&Default::default())?);
//! ```

pub mod config;
pub mod error;
pub mod roster;
pub mod sync;
pub mod types;
pub mod xml;

// Re-exports
pub use config::{ConflictPolicy, SyncConfig};
pub use error::{DataValidityError, RosterError, RosterResult};
pub use roster::{
    Bookmark, ContainerKind, FactoryRegistry, LoadReport, Node, NodeKind, PluginNode, Property,
    Roster, RosterEvent, RosterHook, SharedRoster,
};
pub use sync::{
    ChangeKind, MemoryStore, RemoteStore, RosterMirror, SyncEngine, SyncEvent, SyncedDataSet,
    SyncedTagHandler, TagStatus, Version,
};
pub use types::*;
pub use xml::{Element, WriteOptions};
