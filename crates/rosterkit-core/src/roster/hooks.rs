//! Interception points and change notifications for roster mutations
//!
//! Plugins and frontends observe the tree through an ordered chain of
//! [`RosterHook`]s. An attach runs in three phases:
//!
//! 1. validate: scope claims, then `check_attach` on every hook in order
//!    (the first `Err` vetoes the attach)
//! 2. commit: claims registered, node inserted
//! 3. notify: `on_attach` on every hook in order, then a [`RosterEvent`]
//!    on the broadcast channel
//!
//! Detach runs `on_detach` while the node is still in the tree and cannot be
//! vetoed.

use std::fmt;
use std::sync::Arc;

use crate::types::NodeId;

use super::node::Node;

/// Node property that changed in place
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    Label,
    Presence,
    AccountAvailable,
    /// Extra attribute with this name
    Attribute(String),
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Label => f.write_str("label"),
            Self::Presence => f.write_str("presence"),
            Self::AccountAvailable => f.write_str("account_available"),
            Self::Attribute(name) => write!(f, "@{}", name),
        }
    }
}

/// Broadcast notification about a committed mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterEvent {
    Attached { node: NodeId, parent: NodeId },
    Detached { node: NodeId, parent: NodeId },
    PropertyChanged { node: NodeId, property: Property },
}

/// Plugin interception surface.
///
/// All methods have no-op defaults. Hooks run synchronously with the roster
/// borrowed, so they must not block.
pub trait RosterHook: Send + Sync {
    /// Veto an attach by returning a reason
    fn check_attach(&self, _parent: &Node, _child: &Node) -> Result<(), String> {
        Ok(())
    }

    fn on_attach(&self, _parent: NodeId, _node: &Node) {}

    fn on_detach(&self, _parent: NodeId, _node: &Node) {}

    fn on_property_changed(&self, _node: &Node, _property: &Property) {}
}

/// Handle returned by [`HookChain::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Hooks in registration order
#[derive(Default)]
pub struct HookChain {
    hooks: Vec<(HookId, Arc<dyn RosterHook>)>,
    next_id: u64,
}

impl HookChain {
    pub fn add(&mut self, hook: Arc<dyn RosterHook>) -> HookId {
        let id = HookId(self.next_id);
        self.next_id += 1;
        self.hooks.push((id, hook));
        id
    }

    pub fn remove(&mut self, id: HookId) -> bool {
        let before = self.hooks.len();
        self.hooks.retain(|(h, _)| *h != id);
        self.hooks.len() != before
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub(crate) fn check_attach(&self, parent: &Node, child: &Node) -> Result<(), String> {
        self.hooks
            .iter()
            .try_for_each(|(_, h)| h.check_attach(parent, child))
    }

    pub(crate) fn on_attach(&self, parent: NodeId, node: &Node) {
        for (_, h) in &self.hooks {
            h.on_attach(parent, node);
        }
    }

    pub(crate) fn on_detach(&self, parent: NodeId, node: &Node) {
        for (_, h) in &self.hooks {
            h.on_detach(parent, node);
        }
    }

    pub(crate) fn on_property_changed(&self, node: &Node, property: &Property) {
        for (_, h) in &self.hooks {
            h.on_property_changed(node, property);
        }
    }
}

impl fmt::Debug for HookChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookChain")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}
