//! Mapping between roster nodes and XML elements
//!
//! ```text
//! <roster xmlns="urn:rosterkit:roster:1">
//!   <group label="Friends">
//!     <contact label="Bob">
//!       <via account="alice@example.org" peer="bob@example.net" label="home"/>
//!     </contact>
//!   </group>
//! </roster>
//! ```
//!
//! Kind-specific attributes are written first, extra attributes after them in
//! their stored order. Presence and account availability are runtime state
//! and never written.

use tracing::trace;

use crate::error::DataValidityError;
use crate::types::Via;
use crate::xml::{Element, XmlNode};

use super::factory::BuildContext;
use super::node::{Node, NodeKind};

pub const ROSTER_NS: &str = "urn:rosterkit:roster:1";
pub const ROSTER_TAG: &str = "roster";
pub const GROUP_TAG: &str = "group";
pub const CONTACT_TAG: &str = "contact";
pub const VIA_TAG: &str = "via";

const LABEL_ATTR: &str = "label";
const ACCOUNT_ATTR: &str = "account";
const PEER_ATTR: &str = "peer";

impl Node {
    /// Serialize this node and its subtree
    pub fn to_element(&self) -> Element {
        let mut element = match &self.kind {
            NodeKind::Root(_) => Element::new(ROSTER_TAG).with_attr("xmlns", ROSTER_NS),
            NodeKind::Group(g) => labelled(GROUP_TAG, g.label()),
            NodeKind::Contact(c) => labelled(CONTACT_TAG, c.label()),
            NodeKind::Via(v) => {
                let mut el = Element::new(VIA_TAG)
                    .with_attr(ACCOUNT_ATTR, v.via().account())
                    .with_attr(PEER_ATTR, v.via().peer());
                if let Some(label) = v.label() {
                    el.set_attr(LABEL_ATTR, label);
                }
                el
            }
            NodeKind::Plugin(p) => p.to_element(),
            NodeKind::Opaque(e) => return e.clone(),
        };
        for (key, value) in &self.extra {
            element.set_attr(key.clone(), value.clone());
        }
        for child in self.children() {
            element.push_child(child.to_element());
        }
        element.children.extend(self.retained.iter().cloned());
        element
    }
}

fn labelled(tag: &str, label: Option<&str>) -> Element {
    let mut element = Element::new(tag);
    if let Some(label) = label {
        element.set_attr(LABEL_ATTR, label);
    }
    element
}

/// Whether `key` is written by the node kind itself rather than stored as
/// an extra attribute
pub(crate) fn is_reserved_attribute(node: &Node, key: &str) -> bool {
    match node.kind() {
        NodeKind::Root(_) => key == "xmlns",
        NodeKind::Group(_) | NodeKind::Contact(_) => key == LABEL_ATTR,
        NodeKind::Via(_) => [ACCOUNT_ATTR, PEER_ATTR, LABEL_ATTR].contains(&key),
        NodeKind::Plugin(p) => p.to_element().attr(key).is_some(),
        NodeKind::Opaque(_) => false,
    }
}

/// Copy every attribute not in `known` onto the node as an extra attribute
pub fn copy_extra_attributes(node: &mut Node, element: &Element, known: &[&str]) {
    for (key, value) in &element.attributes {
        if !known.contains(&key.as_str()) {
            node.set_extra(key.clone(), value.clone());
        }
    }
}

/// Keep the children of a leaf element verbatim on the node.
///
/// Whitespace between child elements is left out, as the parser does.
pub fn retain_content(node: &mut Node, element: &Element) {
    let mixed = element.is_mixed();
    node.retained = element
        .children
        .iter()
        .filter(|c| mixed || !matches!(c, XmlNode::Text(_)))
        .cloned()
        .collect();
}

/// Factory for `<group>`
pub fn build_group(element: &Element, ctx: &mut BuildContext<'_>) -> Result<Node, DataValidityError> {
    let label = non_empty(element, LABEL_ATTR)?;
    let mut node = Node::group(label);
    copy_extra_attributes(&mut node, element, &[LABEL_ATTR]);
    ctx.build_children(&mut node, element);
    trace!(label = ?node.label(), children = node.children().len(), "Built group");
    Ok(node)
}

/// Factory for `<contact>`
pub fn build_contact(element: &Element, ctx: &mut BuildContext<'_>) -> Result<Node, DataValidityError> {
    let label = non_empty(element, LABEL_ATTR)?;
    let mut node = Node::contact(label);
    copy_extra_attributes(&mut node, element, &[LABEL_ATTR]);
    ctx.build_children(&mut node, element);
    Ok(node)
}

/// Factory for `<via>`
pub fn build_via(element: &Element, _ctx: &mut BuildContext<'_>) -> Result<Node, DataValidityError> {
    let account = element
        .attr(ACCOUNT_ATTR)
        .ok_or_else(|| DataValidityError::missing_attribute(VIA_TAG, ACCOUNT_ATTR))?;
    let peer = element
        .attr(PEER_ATTR)
        .ok_or_else(|| DataValidityError::missing_attribute(VIA_TAG, PEER_ATTR))?;
    let via = Via::new(account, peer)?;
    let label = non_empty(element, LABEL_ATTR)?;

    let mut node = Node::via(via, label);
    copy_extra_attributes(&mut node, element, &[ACCOUNT_ATTR, PEER_ATTR, LABEL_ATTR]);
    retain_content(&mut node, element);
    Ok(node)
}

/// Optional attribute that must not be blank when present
fn non_empty<'e>(element: &'e Element, attr: &str) -> Result<Option<&'e str>, DataValidityError> {
    match element.attr(attr) {
        Some(value) if value.trim().is_empty() => Err(DataValidityError::new(
            element.name.clone(),
            format!("attribute {attr:?} is empty"),
        )),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::factory::{ContainerKind, FactoryRegistry};
    use crate::xml;

    #[test]
    fn test_contact_roundtrip_is_equivalent() {
        let contact = Node::contact(Some("Bob"))
            .with_attribute("id", "01HX")
            .with_child(Node::via(Via::new("me@x", "bob@y").unwrap(), Some("home")))
            .unwrap()
            .with_child(Node::opaque(Element::new("x:avatar").with_attr("hash", "abc")))
            .unwrap();

        let element = contact.to_element();
        assert_eq!(element.attr("label"), Some("Bob"));
        assert_eq!(element.attr("id"), Some("01HX"));

        let (rebuilt, diags) = FactoryRegistry::default().build(ContainerKind::Group, &element);
        assert!(diags.is_empty());
        let rebuilt = rebuilt.unwrap();
        assert!(rebuilt.equivalent(&contact));
        assert_ne!(rebuilt.id(), contact.id());
    }

    #[test]
    fn test_via_requires_addresses() {
        let reg = FactoryRegistry::default();
        let (result, _) = reg.build(
            ContainerKind::Contact,
            &Element::new("via").with_attr("peer", "bob@y"),
        );
        assert_eq!(
            result.unwrap_err(),
            DataValidityError::missing_attribute("via", "account")
        );
    }

    #[test]
    fn test_blank_label_is_invalid() {
        let reg = FactoryRegistry::default();
        let (result, _) = reg.build(ContainerKind::Root, &Element::new("group").with_attr("label", " "));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialized_form() {
        let group = Node::group(Some("Friends"))
            .with_child(
                Node::contact(None)
                    .with_child(Node::via(Via::new("me@x", "bob@y").unwrap(), None))
                    .unwrap(),
            )
            .unwrap();
        let text = xml::to_string(&group.to_element(), &xml::WriteOptions::compact()).unwrap();
        assert_eq!(
            text,
            r#"<group label="Friends"><contact><via account="me@x" peer="bob@y"/></contact></group>"#
        );
    }
}
