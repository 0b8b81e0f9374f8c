//! The roster tree and its structural operations
//!
//! Every mutation goes through [`Roster`] so that group scopes, hooks and
//! the event channel stay consistent with the tree. Structural operations
//! validate completely before touching anything; a failed call leaves the
//! roster as it was.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{DataValidityError, RosterError, RosterResult};
use crate::types::{NodeId, PresenceState, Via};
use crate::xml::{self, Element, WriteOptions};

use super::codec::{self, ROSTER_TAG};
use super::factory::{ContainerKind, FactoryRegistry};
use super::hooks::{HookChain, HookId, Property, RosterEvent, RosterHook};
use super::registry::Claims;
use super::node::{Node, NodeKind};

/// Buffer size for the roster event channel.
pub const ROSTER_EVENT_CAPACITY: usize = 256;

/// A roster shared between the application and the sync engine.
///
/// Never hold the lock across an `.await`.
pub type SharedRoster = Arc<RwLock<Roster>>;

/// Outcome of [`Roster::load_document`]
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Top-level nodes that were attached, in document order
    pub attached: Vec<NodeId>,
    /// Malformed entries that were skipped, at any depth
    pub skipped: Vec<DataValidityError>,
    /// Well-formed entries the roster refused (via conflicts, hook vetoes...)
    pub rejected: Vec<RosterError>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.rejected.is_empty()
    }
}

/// Validated attach, ready to commit
struct AttachPlan {
    scope: Option<NodeId>,
    claims: Claims,
    owner: NodeId,
}

/// Scope a child of `parent` claims in, what it claims and under which owner.
///
/// Children of groups claim in the group itself. A via entry claims in the
/// group holding its contact, owned by the contact.
fn scope_for(parent: &Node, child: &Node) -> (Option<NodeId>, Claims, NodeId) {
    match parent.kind() {
        NodeKind::Root(_) | NodeKind::Group(_) => (Some(parent.id()), child.claims(), child.id()),
        NodeKind::Contact(_) => {
            let vias = child
                .as_via()
                .map(|entry| vec![entry.via().clone()])
                .unwrap_or_default();
            (parent.parent(), Claims::vias(vias), parent.id())
        }
        _ => (None, Claims::default(), child.id()),
    }
}

/// Contact/group tree with extensible node kinds
pub struct Roster {
    root: Node,
    factories: FactoryRegistry,
    hooks: HookChain,
    event_tx: broadcast::Sender<RosterEvent>,
}

impl Roster {
    /// Empty roster with the default factories
    pub fn new() -> Self {
        Self::with_factories(FactoryRegistry::default())
    }

    pub fn with_factories(factories: FactoryRegistry) -> Self {
        let (event_tx, _) = broadcast::channel(ROSTER_EVENT_CAPACITY);
        Self {
            root: Node::root(),
            factories,
            hooks: HookChain::default(),
            event_tx,
        }
    }

    pub fn into_shared(self) -> SharedRoster {
        Arc::new(RwLock::new(self))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════════

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn root_id(&self) -> NodeId {
        self.root.id()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.root.find(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(Node::parent)
    }

    /// Number of nodes, not counting the root
    pub fn len(&self) -> usize {
        self.root.subtree_len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.root.children().is_empty()
    }

    /// Node claiming `via` in the scope of `group`
    pub fn lookup_via(&self, group: NodeId, via: &Via) -> Option<NodeId> {
        self.node(group)?.as_group()?.scope().vias().lookup(via)
    }

    /// Every via entry for `via`, across all groups
    pub fn via_entries(&self, via: &Via) -> Vec<NodeId> {
        let mut found = Vec::new();
        self.root.walk(&mut |n| {
            if n.as_via().is_some_and(|e| e.via() == via) {
                found.push(n.id());
            }
        });
        found
    }

    /// First direct child of `parent` whose attribute `key` equals `value`
    pub fn find_by_attribute(&self, parent: NodeId, key: &str, value: &str) -> Option<NodeId> {
        self.node(parent)?
            .children()
            .iter()
            .find(|c| c.attribute(key) == Some(value))
            .map(Node::id)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Extension points
    // ═══════════════════════════════════════════════════════════════════════

    pub fn factories(&self) -> &FactoryRegistry {
        &self.factories
    }

    pub fn factories_mut(&mut self) -> &mut FactoryRegistry {
        &mut self.factories
    }

    pub fn add_hook(&mut self, hook: Arc<dyn RosterHook>) -> HookId {
        self.hooks.add(hook)
    }

    pub fn remove_hook(&mut self, id: HookId) -> bool {
        self.hooks.remove(id)
    }

    /// Subscribe to committed mutations
    pub fn subscribe(&self) -> broadcast::Receiver<RosterEvent> {
        self.event_tx.subscribe()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Structure
    // ═══════════════════════════════════════════════════════════════════════

    /// Append a detached node to `parent`.
    ///
    /// Fails with `ViaConflict` or `DuplicateGroup` if the node's claims are
    /// taken in the parent's scope, `InvalidChild` if the parent cannot hold
    /// it, and `HookRejected` if a hook vetoes it. On failure the node is
    /// dropped and the roster is unchanged.
    pub fn attach(&mut self, parent: NodeId, node: Node) -> RosterResult<NodeId> {
        self.insert_at(parent, None, node)
    }

    /// [`Roster::attach`] restricted to group containers
    pub fn append(&mut self, group: NodeId, node: Node) -> RosterResult<NodeId> {
        let parent = self.node(group).ok_or(RosterError::NodeNotFound(group))?;
        if parent.as_group().is_none() {
            return Err(RosterError::InvalidChild {
                parent: parent.tag().to_string(),
                child: node.tag().to_string(),
            });
        }
        self.attach(group, node)
    }

    /// Attach at a position among the parent's children (clamped to the end)
    pub fn insert(&mut self, parent: NodeId, index: usize, node: Node) -> RosterResult<NodeId> {
        self.insert_at(parent, Some(index), node)
    }

    fn insert_at(&mut self, parent: NodeId, index: Option<usize>, node: Node) -> RosterResult<NodeId> {
        if node.is_root() {
            return Err(RosterError::InvalidState("the root cannot be attached".into()));
        }
        if let Some(current) = node.parent() {
            return Err(RosterError::InvalidState(format!(
                "{} is already attached to {}",
                node.id(),
                current
            )));
        }
        let plan = self.plan_attach(parent, &node, None)?;
        Ok(self.commit_attach(parent, index, node, plan))
    }

    /// Detach a node and hand it back to the caller
    pub fn detach(&mut self, id: NodeId) -> RosterResult<Node> {
        self.detach_inner(id).map(|(node, _)| node)
    }

    /// Detach and drop a node. Returns `false` if it was not in the roster.
    pub fn remove(&mut self, id: NodeId) -> RosterResult<bool> {
        match self.detach(id) {
            Ok(_) => Ok(true),
            Err(RosterError::NodeNotFound(missing)) if missing == id => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Move a node to another parent.
    ///
    /// The destination is validated before the node leaves its current
    /// parent, so a failed move leaves it where it was.
    pub fn move_node(&mut self, id: NodeId, new_parent: NodeId) -> RosterResult<()> {
        let node = self.node(id).ok_or(RosterError::NodeNotFound(id))?;
        if node.is_root() {
            return Err(RosterError::InvalidState("the root cannot be moved".into()));
        }
        let old_parent = node
            .parent()
            .ok_or_else(|| RosterError::InvalidState(format!("{} has no parent", id)))?;
        if old_parent == new_parent {
            return Ok(());
        }
        if node.find(new_parent).is_some() {
            return Err(RosterError::InvalidState(format!(
                "cannot move {} into its own subtree",
                id
            )));
        }

        let old_parent_node = self
            .node(old_parent)
            .ok_or(RosterError::NodeNotFound(old_parent))?;
        let (old_scope, _, old_owner) = scope_for(old_parent_node, node);
        let plan = self.plan_attach(new_parent, node, old_scope.map(|s| (s, old_owner)))?;

        let (node, _) = self.detach_inner(id)?;
        self.commit_attach(new_parent, None, node, plan);
        Ok(())
    }

    /// Detach every child of the root; returns how many were removed
    pub fn clear(&mut self) -> usize {
        let ids: Vec<NodeId> = self.root.children().iter().map(Node::id).collect();
        ids.into_iter()
            .filter(|id| self.detach_inner(*id).is_ok())
            .count()
    }

    fn plan_attach(
        &self,
        parent_id: NodeId,
        node: &Node,
        ignore: Option<(NodeId, NodeId)>,
    ) -> RosterResult<AttachPlan> {
        let parent = self
            .node(parent_id)
            .ok_or(RosterError::NodeNotFound(parent_id))?;
        if !parent.accepts(node) {
            return Err(RosterError::InvalidChild {
                parent: parent.tag().to_string(),
                child: node.tag().to_string(),
            });
        }

        if let (NodeKind::Contact(contact), NodeKind::Via(entry)) = (parent.kind(), node.kind()) {
            if contact.via_entries().any(|e| e.via() == entry.via()) {
                return Err(RosterError::ViaConflict {
                    via: entry.via().clone(),
                    scope: parent_id,
                });
            }
        }

        let (scope, claims, owner) = scope_for(parent, node);
        if let Some(scope_id) = scope {
            let group = self
                .node(scope_id)
                .and_then(Node::as_group)
                .ok_or(RosterError::NodeNotFound(scope_id))?;
            let ignore_owner = ignore.filter(|(s, _)| *s == scope_id).map(|(_, o)| o);
            group.scope().check(&claims, scope_id, ignore_owner)?;
        }

        self.hooks
            .check_attach(parent, node)
            .map_err(RosterError::HookRejected)?;

        Ok(AttachPlan {
            scope,
            claims,
            owner,
        })
    }

    fn commit_attach(
        &mut self,
        parent_id: NodeId,
        index: Option<usize>,
        mut node: Node,
        plan: AttachPlan,
    ) -> NodeId {
        if let Some(scope_id) = plan.scope {
            if let Some(group) = self.root.find_mut(scope_id).and_then(Node::as_group_mut) {
                if let Err(e) = group.scope.register(&plan.claims, plan.owner, scope_id) {
                    warn!(error = %e, scope = %scope_id, "Scope registration failed after validation");
                }
            }
        }

        let id = node.id();
        node.parent = Some(parent_id);
        if let Some(children) = self.root.find_mut(parent_id).and_then(Node::children_mut) {
            let index = index.unwrap_or(children.len()).min(children.len());
            children.insert(index, node);
        }

        if let Some(node) = self.root.find(id) {
            debug!(node = %id, parent = %parent_id, tag = node.tag(), "Attached node");
            self.hooks.on_attach(parent_id, node);
        }
        let _ = self.event_tx.send(RosterEvent::Attached {
            node: id,
            parent: parent_id,
        });
        id
    }

    fn detach_inner(&mut self, id: NodeId) -> RosterResult<(Node, NodeId)> {
        let node = self.root.find(id).ok_or(RosterError::NodeNotFound(id))?;
        if node.is_root() {
            return Err(RosterError::InvalidState("the root cannot be detached".into()));
        }
        let parent_id = node
            .parent()
            .ok_or_else(|| RosterError::InvalidState(format!("{} has no parent", id)))?;
        let parent = self
            .root
            .find(parent_id)
            .ok_or(RosterError::NodeNotFound(parent_id))?;
        let (scope, claims, owner) = scope_for(parent, node);

        self.hooks.on_detach(parent_id, node);

        if let Some(scope_id) = scope {
            if let Some(group) = self.root.find_mut(scope_id).and_then(Node::as_group_mut) {
                group.scope.unregister(&claims, owner);
            }
        }

        let children = self
            .root
            .find_mut(parent_id)
            .and_then(Node::children_mut)
            .ok_or(RosterError::NodeNotFound(parent_id))?;
        let pos = children
            .iter()
            .position(|c| c.id() == id)
            .ok_or(RosterError::NodeNotFound(id))?;
        let mut node = children.remove(pos);
        node.parent = None;

        debug!(node = %id, parent = %parent_id, tag = node.tag(), "Detached node");
        let _ = self.event_tx.send(RosterEvent::Detached {
            node: id,
            parent: parent_id,
        });
        Ok((node, parent_id))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Properties
    // ═══════════════════════════════════════════════════════════════════════

    /// Change the label of a group, contact or via entry.
    ///
    /// Relabelling an attached group fails with `DuplicateGroup` if a
    /// sibling already uses the new label.
    pub fn set_label(&mut self, id: NodeId, label: Option<&str>) -> RosterResult<()> {
        let node = self.node(id).ok_or(RosterError::NodeNotFound(id))?;
        if let Some(label) = label {
            if label.trim().is_empty() {
                return Err(DataValidityError::new(node.tag(), "label is empty").into());
            }
        }
        match node.kind() {
            NodeKind::Group(_) | NodeKind::Contact(_) | NodeKind::Via(_) => {}
            _ => {
                return Err(RosterError::InvalidState(format!(
                    "<{}> nodes have no editable label",
                    node.tag()
                )))
            }
        }
        if node.label() == label {
            return Ok(());
        }

        if let (NodeKind::Group(g), Some(parent_id)) = (node.kind(), node.parent()) {
            let old = g.label().map(str::to_string);
            if let Some(parent) = self.root.find_mut(parent_id).and_then(Node::as_group_mut) {
                parent.scope.relabel(id, old.as_deref(), label, parent_id)?;
            }
        }

        let new = label.map(str::to_string);
        if let Some(node) = self.root.find_mut(id) {
            match &mut node.kind {
                NodeKind::Group(g) => g.label = new,
                NodeKind::Contact(c) => c.label = new,
                NodeKind::Via(v) => v.label = new,
                _ => {}
            }
        }
        self.notify_property(id, Property::Label);
        Ok(())
    }

    /// Set an extra attribute (or an attribute of an opaque element)
    pub fn set_attribute(&mut self, id: NodeId, key: &str, value: &str) -> RosterResult<()> {
        let node = self.root.find_mut(id).ok_or(RosterError::NodeNotFound(id))?;
        if codec::is_reserved_attribute(node, key) {
            return Err(RosterError::InvalidState(format!(
                "attribute {key:?} of <{}> is managed by the node kind",
                node.tag()
            )));
        }
        if node.attribute(key) == Some(value) {
            return Ok(());
        }
        match &mut node.kind {
            NodeKind::Opaque(e) => e.set_attr(key, value),
            _ => node.set_extra(key.to_string(), value.to_string()),
        }
        self.notify_property(id, Property::Attribute(key.to_string()));
        Ok(())
    }

    pub fn remove_attribute(&mut self, id: NodeId, key: &str) -> RosterResult<Option<String>> {
        let node = self.root.find_mut(id).ok_or(RosterError::NodeNotFound(id))?;
        if codec::is_reserved_attribute(node, key) {
            return Err(RosterError::InvalidState(format!(
                "attribute {key:?} of <{}> is managed by the node kind",
                node.tag()
            )));
        }
        let removed = match &mut node.kind {
            NodeKind::Opaque(e) => e.remove_attr(key),
            _ => node.remove_extra(key),
        };
        if removed.is_some() {
            self.notify_property(id, Property::Attribute(key.to_string()));
        }
        Ok(removed)
    }

    /// Route a presence update to every entry for `via`; returns how many changed
    pub fn apply_presence(&mut self, via: &Via, presence: PresenceState) -> usize {
        let mut changed = Vec::new();
        self.root.walk_mut(&mut |n| {
            let id = n.id();
            if let NodeKind::Via(entry) = &mut n.kind {
                if entry.via == *via && entry.presence != presence {
                    entry.presence = presence;
                    changed.push(id);
                }
            }
        });
        for id in &changed {
            self.notify_property(*id, Property::Presence);
        }
        changed.len()
    }

    /// Mark an account (un)available on all its via entries.
    ///
    /// Going unavailable also resets the presence of those entries.
    pub fn set_account_available(&mut self, account: &str, available: bool) -> usize {
        let mut changed = Vec::new();
        self.root.walk_mut(&mut |n| {
            let id = n.id();
            if let NodeKind::Via(entry) = &mut n.kind {
                if entry.via.account() != account || entry.account_available == available {
                    return;
                }
                entry.account_available = available;
                changed.push((id, Property::AccountAvailable));
                if !available && entry.presence != PresenceState::unavailable() {
                    entry.presence = PresenceState::unavailable();
                    changed.push((id, Property::Presence));
                }
            }
        });
        debug!(account, available, entries = changed.len(), "Account availability changed");
        let count = changed
            .iter()
            .filter(|(_, p)| *p == Property::AccountAvailable)
            .count();
        for (id, property) in changed {
            self.notify_property(id, property);
        }
        count
    }

    fn notify_property(&self, id: NodeId, property: Property) {
        if let Some(node) = self.root.find(id) {
            self.hooks.on_property_changed(node, &property);
        }
        let _ = self
            .event_tx
            .send(RosterEvent::PropertyChanged { node: id, property });
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Documents
    // ═══════════════════════════════════════════════════════════════════════

    /// Build a node from `element` with the parent's factories and attach it.
    ///
    /// Malformed data yields `Ok(None)` after logging; structural refusals
    /// such as `ViaConflict` are returned as errors.
    pub fn append_from_document(
        &mut self,
        parent: NodeId,
        element: &Element,
    ) -> RosterResult<Option<NodeId>> {
        self.append_from_document_inner(parent, element).0
    }

    /// Check that `element` would build and attach under `parent`, taking
    /// the place of `replacing`, without changing the roster.
    ///
    /// Claims held by `replacing` count as free. Malformed data is returned
    /// as `DataValidity` instead of being skipped.
    pub fn check_from_document(
        &self,
        parent: NodeId,
        element: &Element,
        replacing: Option<NodeId>,
    ) -> RosterResult<()> {
        let parent_node = self.node(parent).ok_or(RosterError::NodeNotFound(parent))?;
        let kind = ContainerKind::of(parent_node).ok_or_else(|| RosterError::InvalidChild {
            parent: parent_node.tag().to_string(),
            child: element.name.clone(),
        })?;

        let node = self.factories.build(kind, element).0?;
        let ignore = replacing
            .and_then(|id| self.node(id))
            .filter(|old| old.parent() == Some(parent))
            .and_then(|old| match scope_for(parent_node, old) {
                (Some(scope), _, owner) => Some((scope, owner)),
                (None, _, _) => None,
            });
        self.plan_attach(parent, &node, ignore).map(|_| ())
    }

    fn append_from_document_inner(
        &mut self,
        parent: NodeId,
        element: &Element,
    ) -> (RosterResult<Option<NodeId>>, Vec<DataValidityError>) {
        let kind = match self.node(parent) {
            None => return (Err(RosterError::NodeNotFound(parent)), Vec::new()),
            Some(p) => match ContainerKind::of(p) {
                Some(kind) => kind,
                None => {
                    let err = RosterError::InvalidChild {
                        parent: p.tag().to_string(),
                        child: element.name.clone(),
                    };
                    return (Err(err), Vec::new());
                }
            },
        };

        let (built, mut diagnostics) = self.factories.build(kind, element);
        match built {
            Ok(node) => (self.attach(parent, node).map(Some), diagnostics),
            Err(e) => {
                warn!(element = %e.element, reason = %e.reason, "Skipping invalid roster entry");
                diagnostics.push(e);
                (Ok(None), diagnostics)
            }
        }
    }

    /// Replace the roster's content with a `<roster>` document
    pub fn load_document(&mut self, document: &Element) -> RosterResult<LoadReport> {
        if document.local_name() != ROSTER_TAG {
            return Err(DataValidityError::new(
                document.name.clone(),
                format!("expected <{}> as document root", ROSTER_TAG),
            )
            .into());
        }

        self.clear();
        self.root.extra = document
            .attributes
            .iter()
            .filter(|(k, _)| k != "xmlns")
            .cloned()
            .collect();

        let root_id = self.root_id();
        let mut report = LoadReport::default();
        for child in document.child_elements() {
            let (result, diagnostics) = self.append_from_document_inner(root_id, child);
            report.skipped.extend(diagnostics);
            match result {
                Ok(Some(id)) => report.attached.push(id),
                Ok(None) => {}
                Err(e) => {
                    warn!(element = %child.name, error = %e, "Roster entry rejected");
                    report.rejected.push(e);
                }
            }
        }

        info!(
            attached = report.attached.len(),
            skipped = report.skipped.len(),
            rejected = report.rejected.len(),
            "Loaded roster document"
        );
        Ok(report)
    }

    pub fn load_xml(&mut self, input: &str) -> RosterResult<LoadReport> {
        let document = xml::parse(input)?;
        self.load_document(&document)
    }

    /// The whole roster as a `<roster>` element
    pub fn to_document(&self) -> Element {
        self.root.to_element()
    }

    /// One subtree as an element
    pub fn serialize(&self, id: NodeId) -> RosterResult<Element> {
        self.node(id)
            .map(Node::to_element)
            .ok_or(RosterError::NodeNotFound(id))
    }

    pub fn to_xml(&self, options: &WriteOptions) -> RosterResult<String> {
        xml::to_string(&self.to_document(), options)
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Roster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Roster")
            .field("root", &self.root.id())
            .field("nodes", &self.len())
            .field("hooks", &self.hooks)
            .finish()
    }
}
