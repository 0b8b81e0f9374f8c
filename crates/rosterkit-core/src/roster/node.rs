//! Roster node model
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │  Root (Group)                                                 │
//! │  ├── Group "Friends"        scope: vias + subgroup labels     │
//! │  │   ├── Contact "Bob"                                        │
//! │  │   │   ├── Via bob@example.net (via alice@example.org)      │
//! │  │   │   └── Via bob@work.example (via alice@example.org)     │
//! │  │   └── Group "School"                                       │
//! │  ├── Plugin (e.g. bookmark)  may claim vias                   │
//! │  └── Opaque <unknown/>       kept verbatim                    │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! A parent owns its children by value. The child's `parent` is only an id
//! used for lookups. Nodes are moved between parents through
//! [`Roster`](super::Roster), which keeps scopes and hooks in step; before a
//! node is attached it can be assembled with [`Node::push_child`].

use std::any::Any;
use std::fmt;

use crate::error::{RosterError, RosterResult};
use crate::types::{NodeId, PresenceState, Via};
use crate::xml::{Element, XmlNode};

use super::registry::{Claims, Scope};

/// Behaviour of a plugin-defined node kind
pub trait PluginNode: fmt::Debug + Send + Sync {
    /// Element name this kind serializes to
    fn tag(&self) -> &str;

    /// Vias claimed in the parent group's scope
    fn vias(&self) -> Vec<Via> {
        Vec::new()
    }

    fn label(&self) -> Option<&str> {
        None
    }

    /// Serialize the kind-specific attributes and content.
    ///
    /// Extra attributes stored on the [`Node`] are appended by the codec.
    fn to_element(&self) -> Element;

    fn as_any(&self) -> &dyn Any;
}

/// Ordered container of child nodes with its own uniqueness scope
#[derive(Debug, Default)]
pub struct Group {
    pub(crate) label: Option<String>,
    pub(crate) children: Vec<Node>,
    pub(crate) scope: Scope,
}

impl Group {
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }
}

/// A person, reachable through one or more vias
#[derive(Debug, Default)]
pub struct Contact {
    pub(crate) label: Option<String>,
    pub(crate) children: Vec<Node>,
}

impl Contact {
    /// Label as stored; see [`Contact::display_label`] for the fallback
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn via_entries(&self) -> impl Iterator<Item = &ViaEntry> {
        self.children.iter().filter_map(|c| match &c.kind {
            NodeKind::Via(entry) => Some(entry),
            _ => None,
        })
    }

    /// Own label, else the first via's label, else the first via's peer address
    pub fn display_label(&self) -> Option<&str> {
        if let Some(label) = self.label.as_deref() {
            return Some(label);
        }
        let first = self.via_entries().next()?;
        Some(first.label().unwrap_or_else(|| first.via().peer()))
    }

    /// Best presence over all vias
    pub fn presence(&self) -> PresenceState {
        self.via_entries()
            .map(|e| e.presence)
            .max()
            .unwrap_or_default()
    }
}

/// One way of reaching a contact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViaEntry {
    pub(crate) via: Via,
    pub(crate) label: Option<String>,
    pub(crate) presence: PresenceState,
    pub(crate) account_available: bool,
}

impl ViaEntry {
    pub fn new(via: Via, label: Option<String>) -> Self {
        Self {
            via,
            label,
            presence: PresenceState::unavailable(),
            account_available: false,
        }
    }

    pub fn via(&self) -> &Via {
        &self.via
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn presence(&self) -> PresenceState {
        self.presence
    }

    pub fn account_available(&self) -> bool {
        self.account_available
    }
}

/// Variant payload of a node
#[derive(Debug)]
pub enum NodeKind {
    Root(Group),
    Group(Group),
    Contact(Contact),
    Via(ViaEntry),
    Plugin(Box<dyn PluginNode>),
    /// Element no factory claimed, kept as read
    Opaque(Element),
}

/// A roster tree element
#[derive(Debug)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) parent: Option<NodeId>,
    pub(crate) kind: NodeKind,
    pub(crate) extra: Vec<(String, String)>,
    /// Content of the source element the node kind does not model
    pub(crate) retained: Vec<XmlNode>,
}

impl Node {
    fn with_kind(kind: NodeKind) -> Self {
        Self {
            id: NodeId::next(),
            parent: None,
            kind,
            extra: Vec::new(),
            retained: Vec::new(),
        }
    }

    pub(crate) fn root() -> Self {
        Self::with_kind(NodeKind::Root(Group::default()))
    }

    pub fn group(label: Option<&str>) -> Self {
        Self::with_kind(NodeKind::Group(Group {
            label: label.map(str::to_string),
            ..Default::default()
        }))
    }

    pub fn contact(label: Option<&str>) -> Self {
        Self::with_kind(NodeKind::Contact(Contact {
            label: label.map(str::to_string),
            ..Default::default()
        }))
    }

    pub fn via(via: Via, label: Option<&str>) -> Self {
        Self::with_kind(NodeKind::Via(ViaEntry::new(via, label.map(str::to_string))))
    }

    pub fn plugin(plugin: Box<dyn PluginNode>) -> Self {
        Self::with_kind(NodeKind::Plugin(plugin))
    }

    pub fn opaque(element: Element) -> Self {
        Self::with_kind(NodeKind::Opaque(element))
    }

    /// Builder-style extra attribute (kept verbatim, not interpreted)
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_extra(key.into(), value.into());
        self
    }

    /// Builder-style [`Node::push_child`]
    pub fn with_child(mut self, child: Node) -> RosterResult<Self> {
        self.push_child(child)?;
        Ok(self)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_root(&self) -> bool {
        matches!(self.kind, NodeKind::Root(_))
    }

    /// Element name of this node
    pub fn tag(&self) -> &str {
        match &self.kind {
            NodeKind::Root(_) => "roster",
            NodeKind::Group(_) => "group",
            NodeKind::Contact(_) => "contact",
            NodeKind::Via(_) => "via",
            NodeKind::Plugin(p) => p.tag(),
            NodeKind::Opaque(e) => &e.name,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Root(g) | NodeKind::Group(g) => g.label(),
            NodeKind::Contact(c) => c.label(),
            NodeKind::Via(v) => v.label(),
            NodeKind::Plugin(p) => p.label(),
            NodeKind::Opaque(_) => None,
        }
    }

    /// Attributes not interpreted by the node kind
    pub fn extra_attributes(&self) -> &[(String, String)] {
        &self.extra
    }

    /// Extra attribute by name; for opaque nodes, the element's attribute
    pub fn attribute(&self, key: &str) -> Option<&str> {
        if let NodeKind::Opaque(e) = &self.kind {
            return e.attr(key);
        }
        self.extra
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn set_extra(&mut self, key: String, value: String) {
        match self.extra.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.extra.push((key, value)),
        }
    }

    /// Element and text content kept verbatim, written after the children
    pub fn retained_content(&self) -> &[XmlNode] {
        &self.retained
    }

    pub(crate) fn remove_extra(&mut self, key: &str) -> Option<String> {
        let pos = self.extra.iter().position(|(k, _)| k == key)?;
        Some(self.extra.remove(pos).1)
    }

    pub fn children(&self) -> &[Node] {
        match &self.kind {
            NodeKind::Root(g) | NodeKind::Group(g) => &g.children,
            NodeKind::Contact(c) => &c.children,
            _ => &[],
        }
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut Vec<Node>> {
        match &mut self.kind {
            NodeKind::Root(g) | NodeKind::Group(g) => Some(&mut g.children),
            NodeKind::Contact(c) => Some(&mut c.children),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&Group> {
        match &self.kind {
            NodeKind::Root(g) | NodeKind::Group(g) => Some(g),
            _ => None,
        }
    }

    pub(crate) fn as_group_mut(&mut self) -> Option<&mut Group> {
        match &mut self.kind {
            NodeKind::Root(g) | NodeKind::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_contact(&self) -> Option<&Contact> {
        match &self.kind {
            NodeKind::Contact(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_via(&self) -> Option<&ViaEntry> {
        match &self.kind {
            NodeKind::Via(v) => Some(v),
            _ => None,
        }
    }

    /// Downcast a plugin node to its concrete type
    pub fn as_plugin<T: PluginNode + 'static>(&self) -> Option<&T> {
        match &self.kind {
            NodeKind::Plugin(p) => p.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Vias this node represents: its own for a via entry, its via
    /// children for a contact, the claimed ones for a plugin
    pub fn vias(&self) -> Vec<Via> {
        match &self.kind {
            NodeKind::Via(v) => vec![v.via.clone()],
            NodeKind::Contact(c) => c.via_entries().map(|e| e.via.clone()).collect(),
            NodeKind::Plugin(p) => p.vias(),
            _ => Vec::new(),
        }
    }

    /// Aggregate presence: a via's own, a contact's best, unavailable otherwise
    pub fn presence(&self) -> PresenceState {
        match &self.kind {
            NodeKind::Via(v) => v.presence,
            NodeKind::Contact(c) => c.presence(),
            _ => PresenceState::unavailable(),
        }
    }

    /// Whether `child` may be placed directly under this node
    pub fn accepts(&self, child: &Node) -> bool {
        match (&self.kind, &child.kind) {
            (_, NodeKind::Root(_)) => false,
            (
                NodeKind::Root(_) | NodeKind::Group(_),
                NodeKind::Group(_) | NodeKind::Contact(_) | NodeKind::Plugin(_) | NodeKind::Opaque(_),
            ) => true,
            (NodeKind::Contact(_), NodeKind::Via(_) | NodeKind::Opaque(_)) => true,
            _ => false,
        }
    }

    /// What this node claims in a group scope when it is a direct child
    pub(crate) fn claims(&self) -> Claims {
        match &self.kind {
            NodeKind::Group(g) => Claims {
                vias: Vec::new(),
                label: g.label.clone(),
            },
            NodeKind::Contact(_) | NodeKind::Plugin(_) => Claims::vias(self.vias()),
            _ => Claims::default(),
        }
    }

    pub fn find(&self, id: NodeId) -> Option<&Node> {
        if self.id == id {
            return Some(self);
        }
        self.children().iter().find_map(|c| c.find(id))
    }

    pub(crate) fn find_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        if self.id == id {
            return Some(self);
        }
        self.children_mut()?.iter_mut().find_map(|c| c.find_mut(id))
    }

    /// Depth-first visit of this node and its descendants
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Node)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }

    pub(crate) fn walk_mut(&mut self, visit: &mut dyn FnMut(&mut Node)) {
        visit(self);
        if let Some(children) = self.children_mut() {
            for child in children {
                child.walk_mut(visit);
            }
        }
    }

    /// Number of nodes in this subtree, including this one
    pub fn subtree_len(&self) -> usize {
        1 + self.children().iter().map(Node::subtree_len).sum::<usize>()
    }

    /// Same persisted content: tag, attributes, vias and children, ignoring
    /// ids and runtime state such as presence
    pub fn equivalent(&self, other: &Node) -> bool {
        self.to_element() == other.to_element()
    }

    /// Append a child to a node that is not attached to a roster.
    ///
    /// Runs the same containment and uniqueness checks as an attach but no
    /// hooks. Used to assemble subtrees before they are attached.
    pub fn push_child(&mut self, mut child: Node) -> RosterResult<NodeId> {
        if self.parent.is_some() || self.is_root() {
            return Err(RosterError::InvalidState(format!(
                "{} is part of a roster; attach through the roster instead",
                self.id
            )));
        }
        if child.parent.is_some() {
            return Err(RosterError::InvalidState(format!(
                "{} already has a parent",
                child.id
            )));
        }
        if !self.accepts(&child) {
            return Err(RosterError::InvalidChild {
                parent: self.tag().to_string(),
                child: child.tag().to_string(),
            });
        }

        let scope_id = self.id;
        match &mut self.kind {
            NodeKind::Group(g) => g.scope.register(&child.claims(), child.id, scope_id)?,
            NodeKind::Contact(c) => {
                if let NodeKind::Via(entry) = &child.kind {
                    if c.via_entries().any(|e| e.via == entry.via) {
                        return Err(RosterError::ViaConflict {
                            via: entry.via.clone(),
                            scope: scope_id,
                        });
                    }
                }
            }
            _ => {}
        }

        child.parent = Some(self.id);
        let id = child.id;
        if let Some(children) = self.children_mut() {
            children.push(child);
        }
        Ok(id)
    }
}
