//! Id-keyed view of one synced tag's document
//!
//! A synced document is a root element whose children are keyed by their
//! `id` attribute. Children without an id are carried along untouched and
//! never reported as changes.

use std::collections::HashSet;

use tracing::warn;

use crate::error::{DataValidityError, RosterError, RosterResult};
use crate::xml::{Element, XmlNode};

use super::events::ChangeKind;

/// Attribute that identifies an element within its tag
pub const ID_ATTR: &str = "id";

/// Difference for one element between two observed versions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub kind: ChangeKind,
    pub id: String,
    /// The new element, or the last known one for `Removed`
    pub element: Element,
}

/// Outcome of [`SyncedDataSet::upsert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Replaced,
    Unchanged,
}

fn element_id(element: &Element) -> Option<&str> {
    element.attr(ID_ATTR).filter(|id| !id.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedDataSet {
    tag: String,
    /// Root element without children
    template: Element,
    children: Vec<XmlNode>,
}

impl SyncedDataSet {
    /// Empty data set whose document root is `<tag/>`
    pub fn new(tag: impl Into<String>) -> Self {
        let tag = tag.into();
        Self {
            template: Element::new(tag.clone()),
            tag,
            children: Vec::new(),
        }
    }

    /// Read a fetched document; `None` yields an empty set.
    ///
    /// Later duplicates of an id are dropped with a warning.
    pub fn from_document(tag: impl Into<String>, document: Option<&Element>) -> Self {
        let mut set = Self::new(tag);
        let Some(document) = document else {
            return set;
        };
        set.template = document.shallow_clone();

        let mut seen = HashSet::new();
        for child in &document.children {
            if let XmlNode::Element(el) = child {
                if let Some(id) = element_id(el) {
                    if !seen.insert(id.to_string()) {
                        warn!(tag = %set.tag, id, "Dropping duplicate id in synced document");
                        continue;
                    }
                }
            }
            set.children.push(child.clone());
        }
        set
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn to_document(&self) -> Element {
        let mut document = self.template.clone();
        document.children = self.children.clone();
        document
    }

    /// Keyed elements in document order
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            XmlNode::Element(el) if element_id(el).is_some() => Some(el),
            _ => None,
        })
    }

    pub fn ids(&self) -> Vec<&str> {
        self.elements().filter_map(element_id).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Element> {
        self.elements().find(|el| element_id(el) == Some(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Number of keyed elements
    pub fn len(&self) -> usize {
        self.elements().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.children.iter().position(|c| match c {
            XmlNode::Element(el) => element_id(el) == Some(id),
            _ => false,
        })
    }

    fn require_id(element: &Element) -> RosterResult<String> {
        element_id(element).map(str::to_string).ok_or_else(|| {
            DataValidityError::missing_attribute(element.name.clone(), ID_ATTR).into()
        })
    }

    /// Add a new element; fails with `DuplicateId` if the id exists
    pub fn insert(&mut self, element: Element) -> RosterResult<()> {
        let id = Self::require_id(&element)?;
        if self.contains(&id) {
            return Err(RosterError::DuplicateId {
                tag: self.tag.clone(),
                id,
            });
        }
        self.children.push(XmlNode::Element(element));
        Ok(())
    }

    /// Insert or replace by id
    pub fn upsert(&mut self, element: Element) -> RosterResult<Upsert> {
        let id = Self::require_id(&element)?;
        match self.position(&id) {
            Some(pos) => {
                let slot = &mut self.children[pos];
                if *slot == XmlNode::Element(element.clone()) {
                    return Ok(Upsert::Unchanged);
                }
                *slot = XmlNode::Element(element);
                Ok(Upsert::Replaced)
            }
            None => {
                self.children.push(XmlNode::Element(element));
                Ok(Upsert::Inserted)
            }
        }
    }

    /// Remove by id; returns the removed element
    pub fn remove(&mut self, id: &str) -> Option<Element> {
        let pos = self.position(id)?;
        match self.children.remove(pos) {
            XmlNode::Element(el) => Some(el),
            _ => None,
        }
    }

    /// Changes that turn `self` into `newer`: Removed, then Modified, then
    /// Inserted
    pub fn diff(&self, newer: &SyncedDataSet) -> Vec<Change> {
        let mut changes = Vec::new();

        for old in self.elements() {
            let id = element_id(old).unwrap_or_default();
            if !newer.contains(id) {
                changes.push(Change {
                    kind: ChangeKind::Removed,
                    id: id.to_string(),
                    element: old.clone(),
                });
            }
        }

        let mut inserted = Vec::new();
        for new in newer.elements() {
            let id = element_id(new).unwrap_or_default();
            match self.get(id) {
                Some(old) if old == new => {}
                Some(_) => changes.push(Change {
                    kind: ChangeKind::Modified,
                    id: id.to_string(),
                    element: new.clone(),
                }),
                None => inserted.push(Change {
                    kind: ChangeKind::Inserted,
                    id: id.to_string(),
                    element: new.clone(),
                }),
            }
        }

        changes.extend(inserted);
        changes
    }
}
