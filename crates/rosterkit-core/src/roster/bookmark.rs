//! Group chat bookmarks as a plugin node kind
//!
//! A bookmark remembers a multi-user chat room reachable through one of the
//! user's accounts. It claims the room's via in its group, so a room cannot
//! be bookmarked twice in the same group. Child elements such as client
//! `<extensions>` are kept on the node and written back as they were read.
//!
//! ```text
//! <bookmark account="alice@example.org" address="room@chat.example.org"
//!           label="Team" nick="alice" autojoin="true"/>
//! ```

use std::any::Any;
use std::sync::Arc;

use crate::error::DataValidityError;
use crate::types::Via;
use crate::xml::Element;

use super::codec::{copy_extra_attributes, retain_content};
use super::factory::{BuildContext, ContainerKind, FactoryRegistry};
use super::node::{Node, PluginNode};

pub const BOOKMARK_TAG: &str = "bookmark";

const KNOWN_ATTRS: &[&str] = &["account", "address", "label", "nick", "autojoin"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bookmark {
    via: Via,
    label: Option<String>,
    nickname: Option<String>,
    autojoin: bool,
}

impl Bookmark {
    pub fn new(account: &str, address: &str) -> Result<Self, DataValidityError> {
        let via = Via::new(account, address)
            .map_err(|e| DataValidityError::new(BOOKMARK_TAG, e.reason))?;
        Ok(Self {
            via,
            label: None,
            nickname: None,
            autojoin: false,
        })
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }

    pub fn with_autojoin(mut self, autojoin: bool) -> Self {
        self.autojoin = autojoin;
        self
    }

    /// Room address and the account it is joined from
    pub fn via(&self) -> &Via {
        &self.via
    }

    pub fn nickname(&self) -> Option<&str> {
        self.nickname.as_deref()
    }

    pub fn autojoin(&self) -> bool {
        self.autojoin
    }

    pub fn into_node(self) -> Node {
        Node::plugin(Box::new(self))
    }
}

impl PluginNode for Bookmark {
    fn tag(&self) -> &str {
        BOOKMARK_TAG
    }

    fn vias(&self) -> Vec<Via> {
        vec![self.via.clone()]
    }

    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn to_element(&self) -> Element {
        let mut el = Element::new(BOOKMARK_TAG)
            .with_attr("account", self.via.account())
            .with_attr("address", self.via.peer());
        if let Some(label) = &self.label {
            el.set_attr("label", label.as_str());
        }
        if let Some(nick) = &self.nickname {
            el.set_attr("nick", nick.as_str());
        }
        el.set_attr("autojoin", if self.autojoin { "true" } else { "false" });
        el
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Factory for `<bookmark>`
pub fn build_bookmark(element: &Element, _ctx: &mut BuildContext<'_>) -> Result<Node, DataValidityError> {
    let account = element
        .attr("account")
        .ok_or_else(|| DataValidityError::missing_attribute(BOOKMARK_TAG, "account"))?;
    let address = element
        .attr("address")
        .ok_or_else(|| DataValidityError::missing_attribute(BOOKMARK_TAG, "address"))?;

    let mut bookmark = Bookmark::new(account, address)?;
    if let Some(label) = element.attr("label") {
        bookmark = bookmark.with_label(label);
    }
    if let Some(nick) = element.attr("nick") {
        bookmark = bookmark.with_nickname(nick);
    }
    if let Some(raw) = element.attr("autojoin") {
        let autojoin = parse_bool(raw).ok_or_else(|| {
            DataValidityError::new(BOOKMARK_TAG, format!("autojoin must be a boolean, got {raw:?}"))
        })?;
        bookmark = bookmark.with_autojoin(autojoin);
    }

    let mut node = bookmark.into_node();
    copy_extra_attributes(&mut node, element, KNOWN_ATTRS);
    retain_content(&mut node, element);
    Ok(node)
}

/// Enable `<bookmark>` children in the root and in groups
pub fn register(registry: &mut FactoryRegistry) {
    for kind in [ContainerKind::Root, ContainerKind::Group] {
        registry.register(kind, BOOKMARK_TAG, Arc::new(build_bookmark));
    }
}
