//! Roster lifecycle integration tests
//!
//! Attach/detach/move through the public API, with hooks observing and
//! vetoing, and the via registry checked after every step.
//!
//! ## Test Scenarios
//!
//! - Vias resolvable exactly while their node is attached
//! - Hook ordering, veto, and detach notification before release
//! - Moving nodes between groups keeps scopes consistent
//! - Event stream mirrors committed mutations only

use std::sync::Arc;

use parking_lot::Mutex;
use rosterkit_core::roster::{HookId, RosterEvent};
use rosterkit_core::{Node, NodeId, Property, Roster, RosterError, RosterHook, Via};

// ============================================================================
// Test Utilities
// ============================================================================

fn via(peer: &str) -> Via {
    Via::new("alice@example.org", peer).unwrap()
}

fn contact(label: &str, peers: &[&str]) -> Node {
    let mut node = Node::contact(Some(label));
    for peer in peers {
        node.push_child(Node::via(via(peer), None)).unwrap();
    }
    node
}

/// Records every callback as a line of text
struct Journal {
    name: &'static str,
    lines: Arc<Mutex<Vec<String>>>,
}

impl RosterHook for Journal {
    fn on_attach(&self, _parent: NodeId, node: &Node) {
        self.lines
            .lock()
            .push(format!("{}:attach:{}", self.name, node.tag()));
    }

    fn on_detach(&self, _parent: NodeId, node: &Node) {
        // Node is still in the tree when detach hooks run
        assert!(node.parent().is_some());
        self.lines
            .lock()
            .push(format!("{}:detach:{}", self.name, node.tag()));
    }

    fn on_property_changed(&self, node: &Node, property: &Property) {
        self.lines
            .lock()
            .push(format!("{}:{}:{}", self.name, property, node.tag()));
    }
}

/// Refuses contacts without a label
struct RequireLabel;

impl RosterHook for RequireLabel {
    fn check_attach(&self, _parent: &Node, child: &Node) -> Result<(), String> {
        if child.as_contact().is_some() && child.label().is_none() {
            return Err("contacts need a label".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Registry Tests
// ============================================================================

#[test]
fn test_vias_resolvable_only_while_attached() {
    let mut roster = Roster::new();
    let root = roster.root_id();
    let friends = roster.attach(root, Node::group(Some("Friends"))).unwrap();

    let bob = roster
        .attach(friends, contact("Bob", &["bob@example.net", "bob@work.example"]))
        .unwrap();
    assert_eq!(roster.lookup_via(friends, &via("bob@example.net")), Some(bob));
    assert_eq!(roster.lookup_via(friends, &via("bob@work.example")), Some(bob));
    assert_eq!(roster.lookup_via(root, &via("bob@example.net")), None);

    let detached = roster.detach(bob).unwrap();
    assert_eq!(roster.lookup_via(friends, &via("bob@example.net")), None);
    assert_eq!(detached.vias().len(), 2);

    roster.attach(root, detached).unwrap();
    assert_eq!(roster.lookup_via(root, &via("bob@example.net")), Some(bob));
}

#[test]
fn test_conflicting_attach_leaves_registry_untouched() {
    let mut roster = Roster::new();
    let root = roster.root_id();
    roster.attach(root, contact("Bob", &["bob@x"])).unwrap();

    let err = roster
        .attach(root, contact("Impostor", &["carol@x", "bob@x"]))
        .unwrap_err();
    assert!(matches!(err, RosterError::ViaConflict { ref via, .. } if via.peer() == "bob@x"));
    assert_eq!(roster.lookup_via(root, &via("carol@x")), None);
    assert_eq!(roster.len(), 2);
}

#[test]
fn test_same_peer_through_two_accounts() {
    let mut roster = Roster::new();
    let root = roster.root_id();
    let mut bob = Node::contact(Some("Bob"));
    bob.push_child(Node::via(Via::new("alice@home", "bob@x").unwrap(), None))
        .unwrap();
    bob.push_child(Node::via(Via::new("alice@work", "bob@x").unwrap(), None))
        .unwrap();
    let bob = roster.attach(root, bob).unwrap();

    assert_eq!(
        roster.lookup_via(root, &Via::new("alice@work", "bob@x").unwrap()),
        Some(bob)
    );
}

// ============================================================================
// Hook Tests
// ============================================================================

#[test]
fn test_hooks_observe_in_registration_order() {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let mut roster = Roster::new();
    roster.add_hook(Arc::new(Journal {
        name: "a",
        lines: lines.clone(),
    }));
    roster.add_hook(Arc::new(Journal {
        name: "b",
        lines: lines.clone(),
    }));

    let root = roster.root_id();
    let group = roster.attach(root, Node::group(Some("G"))).unwrap();
    roster.set_label(group, Some("H")).unwrap();
    roster.remove(group).unwrap();

    assert_eq!(
        *lines.lock(),
        vec![
            "a:attach:group",
            "b:attach:group",
            "a:label:group",
            "b:label:group",
            "a:detach:group",
            "b:detach:group",
        ]
    );
}

#[test]
fn test_hook_veto_leaves_roster_unchanged() {
    let mut roster = Roster::new();
    let veto: HookId = roster.add_hook(Arc::new(RequireLabel));
    let mut events = roster.subscribe();
    let root = roster.root_id();

    let mut anonymous = Node::contact(None);
    anonymous.push_child(Node::via(via("x@x"), None)).unwrap();
    let err = roster.attach(root, anonymous).unwrap_err();

    assert!(matches!(err, RosterError::HookRejected(ref reason) if reason == "contacts need a label"));
    assert!(roster.is_empty());
    assert_eq!(roster.lookup_via(root, &via("x@x")), None);
    assert!(events.try_recv().is_err());

    assert!(roster.remove_hook(veto));
    let mut anonymous = Node::contact(None);
    anonymous.push_child(Node::via(via("x@x"), None)).unwrap();
    roster.attach(root, anonymous).unwrap();
}

#[test]
fn test_veto_applies_to_moves() {
    let mut roster = Roster::new();
    let root = roster.root_id();
    let a = roster.attach(root, Node::group(Some("A"))).unwrap();
    let b = roster.attach(root, Node::group(Some("B"))).unwrap();
    let anon = roster.attach(a, Node::contact(None)).unwrap();

    roster.add_hook(Arc::new(RequireLabel));
    let err = roster.move_node(anon, b).unwrap_err();
    assert!(matches!(err, RosterError::HookRejected(_)));
    assert_eq!(roster.parent_of(anon), Some(a));
}

// ============================================================================
// Move Tests
// ============================================================================

#[test]
fn test_move_contact_between_groups() {
    let mut roster = Roster::new();
    let mut events = roster.subscribe();
    let root = roster.root_id();
    let friends = roster.attach(root, Node::group(Some("Friends"))).unwrap();
    let work = roster.attach(root, Node::group(Some("Work"))).unwrap();
    let bob = roster.attach(friends, contact("Bob", &["bob@x"])).unwrap();

    roster.move_node(bob, work).unwrap();

    assert_eq!(roster.parent_of(bob), Some(work));
    assert_eq!(roster.lookup_via(friends, &via("bob@x")), None);
    assert_eq!(roster.lookup_via(work, &via("bob@x")), Some(bob));

    let tail: Vec<RosterEvent> = std::iter::from_fn(|| events.try_recv().ok())
        .skip(3)
        .collect();
    assert_eq!(
        tail,
        vec![
            RosterEvent::Detached {
                node: bob,
                parent: friends
            },
            RosterEvent::Attached {
                node: bob,
                parent: work
            },
        ]
    );
}

#[test]
fn test_move_group_carries_its_scope() {
    let mut roster = Roster::new();
    let root = roster.root_id();
    let outer = roster.attach(root, Node::group(Some("Outer"))).unwrap();
    let inner = roster.attach(outer, Node::group(Some("Inner"))).unwrap();
    let bob = roster.attach(inner, contact("Bob", &["bob@x"])).unwrap();

    roster.move_node(inner, root).unwrap();
    assert_eq!(roster.lookup_via(inner, &via("bob@x")), Some(bob));
    assert_eq!(roster.parent_of(inner), Some(root));

    let err = roster
        .attach(root, Node::group(Some("Inner")))
        .unwrap_err();
    assert!(matches!(err, RosterError::DuplicateGroup { .. }));
    roster.attach(outer, Node::group(Some("Inner"))).unwrap();
}

#[test]
fn test_move_to_same_parent_is_noop() {
    let mut roster = Roster::new();
    let root = roster.root_id();
    let bob = roster.attach(root, contact("Bob", &["bob@x"])).unwrap();
    let mut events = roster.subscribe();

    roster.move_node(bob, root).unwrap();
    assert!(events.try_recv().is_err());
    assert_eq!(roster.lookup_via(root, &via("bob@x")), Some(bob));
}

#[test]
fn test_move_unknown_target() {
    let mut roster = Roster::new();
    let root = roster.root_id();
    let bob = roster.attach(root, contact("Bob", &[])).unwrap();
    let missing = NodeId::next();
    assert!(matches!(
        roster.move_node(bob, missing),
        Err(RosterError::NodeNotFound(id)) if id == missing
    ));
}

// ============================================================================
// Lifecycle Misuse
// ============================================================================

#[test]
fn test_root_cannot_be_detached_or_moved() {
    let mut roster = Roster::new();
    let root = roster.root_id();
    let group = roster.attach(root, Node::group(Some("G"))).unwrap();

    assert!(matches!(roster.detach(root), Err(RosterError::InvalidState(_))));
    assert!(matches!(
        roster.move_node(root, group),
        Err(RosterError::InvalidState(_))
    ));
}

#[test]
fn test_detached_contact_can_be_extended_and_reattached() {
    let mut roster = Roster::new();
    let root = roster.root_id();
    let bob = roster.attach(root, contact("Bob", &["bob@x"])).unwrap();

    let mut detached = roster.detach(bob).unwrap();
    detached
        .push_child(Node::via(via("bob@second"), None))
        .unwrap();
    let bob = roster.attach(root, detached).unwrap();
    assert_eq!(roster.lookup_via(root, &via("bob@second")), Some(bob));
}
