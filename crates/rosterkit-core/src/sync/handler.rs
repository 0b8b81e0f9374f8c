//! Handlers that apply remote changes of a synced tag to the roster

use tracing::{debug, warn};

use crate::error::{RosterError, RosterResult};
use crate::roster::Roster;
use crate::types::{NodeId, SyncId};
use crate::xml::Element;

use super::dataset::ID_ATTR;
use super::engine::SyncEngine;
use super::events::ChangeKind;

/// Applies one remote change of a tag to the roster.
///
/// Called with the roster write-locked; all changes from one refresh are
/// applied under the same lock.
pub trait SyncedTagHandler: Send + Sync {
    fn handle(&self, roster: &mut Roster, kind: ChangeKind, element: &Element) -> RosterResult<()>;

    /// Whether [`handle`](Self::handle) would accept a local change.
    ///
    /// Runs before a local write reaches the store; an error aborts the
    /// write.
    fn check(&self, _roster: &Roster, _kind: ChangeKind, _element: &Element) -> RosterResult<()> {
        Ok(())
    }
}

impl<F> SyncedTagHandler for F
where
    F: Fn(&mut Roster, ChangeKind, &Element) -> RosterResult<()> + Send + Sync,
{
    fn handle(&self, roster: &mut Roster, kind: ChangeKind, element: &Element) -> RosterResult<()> {
        self(roster, kind, element)
    }
}

/// Mirrors a tag's elements as children of one roster container.
///
/// Elements are matched to nodes by their `id` attribute. A modification is
/// applied as remove followed by insert, so the node is rebuilt through the
/// factory registry.
#[derive(Debug, Clone)]
pub struct RosterMirror {
    tag: String,
    target: NodeId,
}

impl RosterMirror {
    pub fn new(tag: impl Into<String>, target: NodeId) -> Self {
        Self {
            tag: tag.into(),
            target,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn target(&self) -> NodeId {
        self.target
    }

    /// Node currently mirroring `id`
    pub fn node_for(&self, roster: &Roster, id: &str) -> Option<NodeId> {
        roster.find_by_attribute(self.target, ID_ATTR, id)
    }

    fn remove_node(&self, roster: &mut Roster, id: &str) -> RosterResult<()> {
        if let Some(node) = self.node_for(roster, id) {
            roster.remove(node)?;
        }
        Ok(())
    }

    fn insert_node(&self, roster: &mut Roster, element: &Element) -> RosterResult<()> {
        match roster.append_from_document(self.target, element)? {
            Some(node) => debug!(tag = %self.tag, %node, "Mirrored element into roster"),
            None => warn!(tag = %self.tag, element = %element.name, "Synced element not mirrored"),
        }
        Ok(())
    }

    fn upsert_node(&self, roster: &mut Roster, element: &Element) -> RosterResult<()> {
        if let Some(id) = element.attr(ID_ATTR) {
            self.remove_node(roster, id)?;
        }
        self.insert_node(roster, element)
    }

    /// Write `element` to the tag and mirror it locally.
    ///
    /// An element without an `id` gets a fresh one. The write is refused
    /// before reaching the store if the roster would not accept the node.
    /// The mirror must be the handler registered for its tag. Returns the
    /// element's id.
    pub async fn publish_update(&self, engine: &SyncEngine, mut element: Element) -> RosterResult<String> {
        let id = match element.attr(ID_ATTR) {
            Some(id) => id.to_string(),
            None => {
                let id = SyncId::new().to_string();
                element.set_attr(ID_ATTR, id.clone());
                id
            }
        };

        engine.apply_update(&self.tag, element).await?;
        Ok(id)
    }

    /// Remove `id` from the tag and from the roster
    pub async fn publish_remove(&self, engine: &SyncEngine, id: &str) -> RosterResult<()> {
        engine.apply_remove(&self.tag, id).await
    }
}

impl SyncedTagHandler for RosterMirror {
    fn handle(&self, roster: &mut Roster, kind: ChangeKind, element: &Element) -> RosterResult<()> {
        let id = element.attr(ID_ATTR).ok_or_else(|| {
            RosterError::InvalidState(format!("synced <{}> without id", element.name))
        })?;
        match kind {
            ChangeKind::Inserted => self.upsert_node(roster, element),
            ChangeKind::Removed => self.remove_node(roster, id),
            ChangeKind::Modified => {
                self.remove_node(roster, id)?;
                self.insert_node(roster, element)
            }
        }
    }

    fn check(&self, roster: &Roster, kind: ChangeKind, element: &Element) -> RosterResult<()> {
        if kind == ChangeKind::Removed {
            return Ok(());
        }
        let replacing = element
            .attr(ID_ATTR)
            .and_then(|id| self.node_for(roster, id));
        roster.check_from_document(self.target, element, replacing)
    }
}
