//! Factory registry: element tag → node constructor, per container kind
//!
//! Registrations are shared by every container of a kind. Deserializing a
//! child element looks up `(container kind, element name)`; elements with no
//! factory become opaque nodes so their content survives a round trip.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::error::DataValidityError;
use crate::xml::{Element, XmlNode};

use super::codec;
use super::node::{Node, NodeKind};

/// Kind of container a child element is deserialized into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Root,
    Group,
    Contact,
}

impl ContainerKind {
    /// Container kind of `node`, if it holds children
    pub fn of(node: &Node) -> Option<Self> {
        match node.kind() {
            NodeKind::Root(_) => Some(Self::Root),
            NodeKind::Group(_) => Some(Self::Group),
            NodeKind::Contact(_) => Some(Self::Contact),
            _ => None,
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => f.write_str("root"),
            Self::Group => f.write_str("group"),
            Self::Contact => f.write_str("contact"),
        }
    }
}

/// Builds a node from an element.
///
/// Factories for container kinds call [`BuildContext::build_children`] to
/// populate the new node.
pub type NodeFactory =
    Arc<dyn Fn(&Element, &mut BuildContext<'_>) -> Result<Node, DataValidityError> + Send + Sync>;

/// Registered factories
#[derive(Clone)]
pub struct FactoryRegistry {
    factories: HashMap<(ContainerKind, String), NodeFactory>,
}

impl FactoryRegistry {
    /// A registry with no factories; every element becomes opaque
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register `factory` for `tag` inside containers of `kind`.
    ///
    /// Returns the factory it replaced.
    pub fn register(
        &mut self,
        kind: ContainerKind,
        tag: impl Into<String>,
        factory: NodeFactory,
    ) -> Option<NodeFactory> {
        self.factories.insert((kind, tag.into()), factory)
    }

    pub fn unregister(&mut self, kind: ContainerKind, tag: &str) -> Option<NodeFactory> {
        self.factories.remove(&(kind, tag.to_string()))
    }

    pub fn lookup(&self, kind: ContainerKind, tag: &str) -> Option<&NodeFactory> {
        self.factories.get(&(kind, tag.to_string()))
    }

    pub fn contains(&self, kind: ContainerKind, tag: &str) -> bool {
        self.lookup(kind, tag).is_some()
    }

    /// Build a node for `element` as a child of a `kind` container
    pub fn build(
        &self,
        kind: ContainerKind,
        element: &Element,
    ) -> (Result<Node, DataValidityError>, Vec<DataValidityError>) {
        let mut ctx = BuildContext::new(self);
        let result = ctx.build(kind, element);
        (result, ctx.into_diagnostics())
    }
}

impl Default for FactoryRegistry {
    /// Registry with the built-in `group`, `contact` and `via` factories
    fn default() -> Self {
        let mut registry = Self::empty();
        for kind in [ContainerKind::Root, ContainerKind::Group] {
            registry.register(kind, codec::GROUP_TAG, Arc::new(codec::build_group));
            registry.register(kind, codec::CONTACT_TAG, Arc::new(codec::build_contact));
        }
        registry.register(ContainerKind::Contact, codec::VIA_TAG, Arc::new(codec::build_via));
        registry
    }
}

impl fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self
            .factories
            .keys()
            .map(|(kind, tag)| format!("{kind}/{tag}"))
            .collect();
        keys.sort();
        f.debug_struct("FactoryRegistry")
            .field("factories", &keys)
            .finish()
    }
}

/// State threaded through a (possibly nested) deserialization
pub struct BuildContext<'a> {
    registry: &'a FactoryRegistry,
    diagnostics: Vec<DataValidityError>,
}

impl<'a> BuildContext<'a> {
    pub fn new(registry: &'a FactoryRegistry) -> Self {
        Self {
            registry,
            diagnostics: Vec::new(),
        }
    }

    pub fn registry(&self) -> &FactoryRegistry {
        self.registry
    }

    /// Build one node; unknown tags produce an opaque node
    pub fn build(&mut self, kind: ContainerKind, element: &Element) -> Result<Node, DataValidityError> {
        match self.registry.lookup(kind, &element.name) {
            Some(factory) => {
                let factory = factory.clone();
                factory(element, self)
            }
            None => Ok(Node::opaque(element.clone())),
        }
    }

    /// Build every child element of `element` and append it to `parent`.
    ///
    /// Children that fail to build or to insert are recorded as diagnostics
    /// and skipped; their siblings are still processed.
    pub fn build_children(&mut self, parent: &mut Node, element: &Element) {
        let Some(kind) = ContainerKind::of(parent) else {
            return;
        };
        for child in &element.children {
            let child = match child {
                XmlNode::Element(child) => child,
                XmlNode::Text(text) => {
                    if !text.trim().is_empty() {
                        self.report(DataValidityError::new(
                            element.name.clone(),
                            "unexpected text content",
                        ));
                    }
                    continue;
                }
                XmlNode::Comment(_) => continue,
            };
            let node = match self.build(kind, child) {
                Ok(node) => node,
                Err(e) => {
                    self.report(e);
                    continue;
                }
            };
            if let Err(e) = parent.push_child(node) {
                self.report(DataValidityError::new(child.name.clone(), e.to_string()));
            }
        }
    }

    /// Record a contained data problem
    pub fn report(&mut self, error: DataValidityError) {
        warn!(element = %error.element, reason = %error.reason, "Skipping invalid roster data");
        self.diagnostics.push(error);
    }

    pub fn diagnostics(&self) -> &[DataValidityError] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<DataValidityError> {
        self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Via;

    #[test]
    fn test_default_registry_contents() {
        let reg = FactoryRegistry::default();
        assert!(reg.contains(ContainerKind::Root, "group"));
        assert!(reg.contains(ContainerKind::Group, "contact"));
        assert!(reg.contains(ContainerKind::Contact, "via"));
        assert!(!reg.contains(ContainerKind::Contact, "group"));
    }

    #[test]
    fn test_unknown_tag_becomes_opaque() {
        let reg = FactoryRegistry::default();
        let el = Element::new("x-note").with_attr("k", "v");
        let (node, diags) = reg.build(ContainerKind::Group, &el);
        let node = node.unwrap();
        assert!(matches!(node.kind(), NodeKind::Opaque(_)));
        assert_eq!(node.attribute("k"), Some("v"));
        assert!(diags.is_empty());
    }

    #[test]
    fn test_reregistration_replaces() {
        let mut reg = FactoryRegistry::default();
        let replaced = reg.register(
            ContainerKind::Group,
            "contact",
            Arc::new(|_el: &Element, _ctx: &mut BuildContext<'_>| {
                Ok(Node::contact(Some("fixed")))
            }),
        );
        assert!(replaced.is_some());

        let (node, _) = reg.build(ContainerKind::Group, &Element::new("contact"));
        assert_eq!(node.unwrap().label(), Some("fixed"));

        // Root registration is independent of Group
        let (node, _) = reg.build(ContainerKind::Root, &Element::new("contact"));
        assert_eq!(node.unwrap().label(), None);
    }

    #[test]
    fn test_nested_failures_become_diagnostics() {
        let reg = FactoryRegistry::default();
        let el = Element::new("contact")
            .with_child(Element::new("via").with_attr("account", "me@x").with_attr("peer", "a@x"))
            .with_child(Element::new("via").with_attr("account", "me@x"))
            .with_child(Element::new("via").with_attr("account", "me@x").with_attr("peer", "a@x"))
            .with_child(Element::new("via").with_attr("account", "me@x").with_attr("peer", "b@x"));

        let (node, diags) = reg.build(ContainerKind::Group, &el);
        let node = node.unwrap();
        let expected = vec![
            Via::new("me@x", "a@x").unwrap(),
            Via::new("me@x", "b@x").unwrap(),
        ];
        assert_eq!(node.vias(), expected);
        assert_eq!(diags.len(), 2);
    }
}
