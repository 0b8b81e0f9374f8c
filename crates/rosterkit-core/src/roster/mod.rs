//! In-memory roster tree
//!
//! - [`registry`]: via uniqueness and subgroup labels per group scope
//! - [`node`]: node kinds and detached subtree assembly
//! - [`factory`]: tag → constructor registry used when reading documents
//! - [`codec`]: node ⇄ element mapping for the built-in kinds
//! - [`hooks`]: interception chain and change events
//! - [`tree`]: the [`Roster`] that owns the root and enforces all of the above
//! - [`bookmark`]: a plugin node kind for group chat rooms

pub mod bookmark;
pub mod codec;
pub mod factory;
pub mod hooks;
pub mod node;
pub mod registry;
pub mod tree;

pub use bookmark::Bookmark;
pub use factory::{BuildContext, ContainerKind, FactoryRegistry, NodeFactory};
pub use hooks::{HookChain, HookId, Property, RosterEvent, RosterHook};
pub use node::{Contact, Group, Node, NodeKind, PluginNode, ViaEntry};
pub use registry::{Claims, Scope, ViaRegistry};
pub use tree::{LoadReport, Roster, SharedRoster};
