//! Error types for the roster and its synchronization engine

use thiserror::Error;

use crate::sync::StoreError;
use crate::types::{NodeId, Via};

/// Main error type for roster operations
#[derive(Error, Debug)]
pub enum RosterError {
    /// A via is already claimed by another node in the target scope
    #[error("Via conflict: {via} is already registered in {scope}")]
    ViaConflict { via: Via, scope: NodeId },

    /// A subgroup with the same label already exists in the target group
    #[error("Duplicate group: {scope} already has a subgroup labelled {label:?}")]
    DuplicateGroup { label: String, scope: NodeId },

    /// Lifecycle misuse (double attach, detaching the root, cycles)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The parent cannot hold a child of this kind
    #[error("Invalid child: a {parent} cannot contain a {child}")]
    InvalidChild { parent: String, child: String },

    /// No node with the given id is part of the roster
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// A registered hook vetoed the attach
    #[error("Attach rejected by hook: {0}")]
    HookRejected(String),

    /// Malformed input data
    #[error("Data validity error: {0}")]
    DataValidity(#[from] DataValidityError),

    /// Optimistic-concurrency retries exhausted, or a concurrent write to
    /// the same element was detected
    #[error("Sync conflict on {tag}/{id} after {attempts} attempt(s)")]
    SyncConflict { tag: String, id: String, attempts: u32 },

    /// `insert` of an id that already exists in the data set
    #[error("Duplicate id {id} in synced tag {tag}")]
    DuplicateId { tag: String, id: String },

    /// The remote store failed
    #[error("Remote store error: {0}")]
    Store(#[from] StoreError),

    /// A sync operation was cancelled before it completed
    #[error("Sync of tag {0} cancelled")]
    Cancelled(String),

    /// The XML document could not be read or written
    #[error("XML error: {0}")]
    Xml(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using RosterError
pub type RosterResult<T> = Result<T, RosterError>;

/// Malformed attributes or content found while building a node from
/// external data.
///
/// These are contained at the container boundary: they are logged and the
/// offending entry is skipped, its siblings are still processed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("<{element}>: {reason}")]
pub struct DataValidityError {
    pub element: String,
    pub reason: String,
}

impl DataValidityError {
    pub fn new(element: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            element: element.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a required attribute that is absent
    pub fn missing_attribute(element: impl Into<String>, attribute: &str) -> Self {
        Self::new(element, format!("missing attribute {attribute:?}"))
    }
}
