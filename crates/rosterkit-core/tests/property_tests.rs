//! Property-based tests for the roster tree and synced data sets
//!
//! Uses proptest to check invariants over random operation sequences:
//! - Every attached via resolves to its owner, and nothing else resolves
//! - A failed attach changes nothing
//! - Saved documents load back to the same document
//! - Data set ids stay unique, and diffs replay into the newer set

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use rosterkit_core::sync::ChangeKind;
use rosterkit_core::xml;
use rosterkit_core::{Element, Node, NodeId, Roster, SyncedDataSet, Via, WriteOptions};

// ============================================================================
// Strategy Generators
// ============================================================================

/// Peers drawn from a small pool so that conflicts actually happen
fn peer_strategy() -> impl Strategy<Value = String> {
    (0u8..12).prop_map(|n| format!("peer{n}@example.net"))
}

fn via_strategy() -> impl Strategy<Value = Via> {
    (prop_oneof![Just("me@home"), Just("me@work")], peer_strategy())
        .prop_map(|(account, peer)| Via::new(account, peer).unwrap())
}

fn label_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of("[A-Za-z][A-Za-z0-9 ]{0,8}")
}

#[derive(Debug, Clone)]
enum Op {
    AddGroup { parent: usize, label: Option<String> },
    AddContact { parent: usize, vias: Vec<Via> },
    Detach { target: usize },
    Move { target: usize, parent: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (any::<usize>(), label_strategy()).prop_map(|(parent, label)| Op::AddGroup { parent, label }),
        (any::<usize>(), prop::collection::vec(via_strategy(), 0..4))
            .prop_map(|(parent, vias)| Op::AddContact { parent, vias }),
        any::<usize>().prop_map(|target| Op::Detach { target }),
        (any::<usize>(), any::<usize>()).prop_map(|(target, parent)| Op::Move { target, parent }),
    ]
}

/// Contact with distinct vias (duplicates dropped while assembling)
fn contact_node(vias: &[Via]) -> Node {
    let mut node = Node::contact(None);
    for via in vias {
        let _ = node.push_child(Node::via(via.clone(), None));
    }
    node
}

fn groups(roster: &Roster) -> Vec<NodeId> {
    let mut found = Vec::new();
    roster.root().walk(&mut |n| {
        if n.as_group().is_some() {
            found.push(n.id());
        }
    });
    found
}

fn non_root_nodes(roster: &Roster) -> Vec<NodeId> {
    let mut found = Vec::new();
    roster.root().walk(&mut |n| {
        if !n.is_root() && n.as_via().is_none() {
            found.push(n.id());
        }
    });
    found
}

fn apply(roster: &mut Roster, op: &Op) {
    let groups = groups(roster);
    let nodes = non_root_nodes(roster);
    let _ = match op {
        Op::AddGroup { parent, label } => roster
            .attach(groups[parent % groups.len()], Node::group(label.as_deref()))
            .map(|_| ()),
        Op::AddContact { parent, vias } => roster
            .attach(groups[parent % groups.len()], contact_node(vias))
            .map(|_| ()),
        Op::Detach { target } if !nodes.is_empty() => {
            roster.detach(nodes[target % nodes.len()]).map(|_| ())
        }
        Op::Move { target, parent } if !nodes.is_empty() => roster.move_node(
            nodes[target % nodes.len()],
            groups[parent % groups.len()],
        ),
        _ => Ok(()),
    };
}

/// Expected registry contents, recomputed from the tree
fn expected_claims(roster: &Roster) -> BTreeMap<(u64, Via), NodeId> {
    let mut claims = BTreeMap::new();
    roster.root().walk(&mut |n| {
        if n.as_group().is_none() {
            return;
        }
        for child in n.children() {
            for via in child.vias() {
                claims.insert((n.id().as_u64(), via), child.id());
            }
        }
    });
    claims
}

/// Total number of vias registered across all group scopes
fn registered_vias(roster: &Roster) -> usize {
    groups(roster)
        .into_iter()
        .filter_map(|g| roster.node(g).and_then(Node::as_group))
        .map(|g| g.scope().vias().len())
        .sum()
}

fn element_strategy() -> impl Strategy<Value = Element> {
    ("[a-z]{1,4}", "[a-z]{0,6}").prop_map(|(id, value)| {
        Element::new("item").with_attr("id", id).with_attr("value", value)
    })
}

fn dataset_from(elements: &[Element]) -> SyncedDataSet {
    let mut set = SyncedDataSet::new("items");
    for el in elements {
        set.upsert(el.clone()).unwrap();
    }
    set
}

// ============================================================================
// Registry Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// After any sequence of operations, a via resolves in a group exactly
    /// when a direct child of that group owns it.
    #[test]
    fn prop_registry_matches_tree(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let mut roster = Roster::new();
        for op in &ops {
            apply(&mut roster, op);
        }

        let expected = expected_claims(&roster);
        for ((group, via), owner) in &expected {
            let group = groups(&roster)
                .into_iter()
                .find(|g| g.as_u64() == *group)
                .unwrap();
            prop_assert_eq!(roster.lookup_via(group, via), Some(*owner));
        }

        prop_assert_eq!(registered_vias(&roster), expected.len());
    }

    /// A refused attach leaves the document and the registry unchanged.
    #[test]
    fn prop_failed_attach_is_transactional(
        ops in prop::collection::vec(op_strategy(), 1..20),
        vias in prop::collection::vec(via_strategy(), 1..4),
    ) {
        let mut roster = Roster::new();
        for op in &ops {
            apply(&mut roster, op);
        }
        let before = roster.to_document();
        let root = roster.root_id();

        let registered_before = registered_vias(&roster);

        if roster.attach(root, contact_node(&vias)).is_err() {
            prop_assert_eq!(roster.to_document(), before);
            prop_assert_eq!(registered_vias(&roster), registered_before);
        }
    }

    /// Within one group, no two children share a via or a subgroup label.
    #[test]
    fn prop_scopes_stay_unique(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let mut roster = Roster::new();
        for op in &ops {
            apply(&mut roster, op);
        }
        for group in groups(&roster) {
            let node = roster.node(group).unwrap();
            let mut vias = BTreeSet::new();
            let mut labels = BTreeSet::new();
            for child in node.children() {
                for via in child.vias() {
                    prop_assert!(vias.insert(via));
                }
                if let (Some(_), Some(label)) = (child.as_group(), child.label()) {
                    prop_assert!(labels.insert(label.to_string()));
                }
            }
        }
    }
}

// ============================================================================
// Codec Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any roster built through the API loads back from its own output.
    #[test]
    fn prop_saved_roster_loads_back(ops in prop::collection::vec(op_strategy(), 1..30)) {
        let mut roster = Roster::new();
        for op in &ops {
            apply(&mut roster, op);
        }
        let saved = roster.to_xml(&WriteOptions::default()).unwrap();

        let mut loaded = Roster::new();
        let report = loaded.load_xml(&saved).unwrap();
        prop_assert!(report.is_clean());
        prop_assert_eq!(loaded.to_document(), xml::parse(&saved).unwrap());
        prop_assert_eq!(loaded.len(), roster.len());
    }

    /// Attribute values with markup characters survive escaping.
    #[test]
    fn prop_attribute_escaping(value in "[ -~]{0,24}") {
        let doc = Element::new("roster").with_child(
            Element::new("unknown").with_attr("data", value.clone()),
        );
        let text = xml::to_string(&doc, &WriteOptions::compact()).unwrap();
        let back = xml::parse(&text).unwrap();
        let child = back.child_elements().next().unwrap();
        prop_assert_eq!(child.attr("data"), Some(value.as_str()));
    }
}

// ============================================================================
// Data Set Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Upserting never produces two elements with the same id.
    #[test]
    fn prop_upsert_keeps_ids_unique(elements in prop::collection::vec(element_strategy(), 0..30)) {
        let set = dataset_from(&elements);
        let ids: BTreeSet<&str> = set.ids().into_iter().collect();
        prop_assert_eq!(ids.len(), set.len());

        let distinct: BTreeSet<&str> = elements.iter().filter_map(|e| e.attr("id")).collect();
        prop_assert_eq!(distinct.len(), set.len());
    }

    /// Removing twice is the same as removing once.
    #[test]
    fn prop_remove_is_idempotent(
        elements in prop::collection::vec(element_strategy(), 1..20),
        pick in any::<usize>(),
    ) {
        let mut set = dataset_from(&elements);
        let id = elements[pick % elements.len()].attr("id").unwrap().to_string();

        prop_assert!(set.remove(&id).is_some());
        let after_once = set.to_document();
        prop_assert!(set.remove(&id).is_none());
        prop_assert_eq!(set.to_document(), after_once);
    }

    /// Replaying a diff onto the older set yields the newer set's content,
    /// with removals first and insertions last.
    #[test]
    fn prop_diff_replays(
        old in prop::collection::vec(element_strategy(), 0..20),
        new in prop::collection::vec(element_strategy(), 0..20),
    ) {
        let older = dataset_from(&old);
        let newer = dataset_from(&new);
        let changes = older.diff(&newer);

        let kinds: Vec<ChangeKind> = changes.iter().map(|c| c.kind).collect();
        let mut sorted = kinds.clone();
        sorted.sort();
        prop_assert_eq!(kinds, sorted);

        let mut replay = older.clone();
        for change in &changes {
            match change.kind {
                ChangeKind::Removed => {
                    replay.remove(&change.id);
                }
                ChangeKind::Modified | ChangeKind::Inserted => {
                    replay.upsert(change.element.clone()).unwrap();
                }
            }
        }

        let as_map = |set: &SyncedDataSet| -> BTreeMap<String, Element> {
            set.elements()
                .map(|e| (e.attr("id").unwrap().to_string(), e.clone()))
                .collect()
        };
        prop_assert_eq!(as_map(&replay), as_map(&newer));
    }
}
