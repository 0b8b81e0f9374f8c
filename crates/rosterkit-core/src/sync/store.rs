//! Remote private-storage seam
//!
//! The store holds one XML document per tag with a monotonically increasing
//! version. Writes are conditional on the version the writer last saw; that
//! compare-and-swap is what the engine's optimistic concurrency rests on.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use crate::xml::Element;

/// Buffer size for store notifications.
const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

/// Version of a tag's document. `Version(0)` means "never written".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Version(pub u64);

impl Version {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A document as fetched from the store
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionedDocument {
    pub version: Version,
    pub document: Option<Element>,
}

/// A tag's document changed in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreNotification {
    pub tag: String,
    pub version: Version,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The conditional write lost against a newer version
    #[error("Version mismatch: expected {expected}, store has {current}")]
    VersionMismatch { expected: Version, current: Version },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed document: {0}")]
    Malformed(String),
}

/// Remote storage for synced tags
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn fetch(&self, tag: &str) -> Result<VersionedDocument, StoreError>;

    /// Replace the tag's document if its version is still `expected`
    async fn replace(
        &self,
        tag: &str,
        expected: Version,
        document: Element,
    ) -> Result<Version, StoreError>;

    /// Notifications for writes by any client, including this one
    fn subscribe(&self) -> broadcast::Receiver<StoreNotification>;
}

#[derive(Default)]
struct MemoryStoreInner {
    documents: HashMap<String, VersionedDocument>,
    /// Writes from "another device" applied just before the next replace
    injected: HashMap<String, VecDeque<Element>>,
    replace_calls: u64,
}

impl MemoryStoreInner {
    fn write(&mut self, tag: &str, document: Element) -> Version {
        let entry = self.documents.entry(tag.to_string()).or_default();
        entry.version = entry.version.next();
        entry.document = Some(document);
        entry.version
    }
}

/// In-process [`RemoteStore`]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
    notify_tx: broadcast::Sender<StoreNotification>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (notify_tx, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(MemoryStoreInner::default()),
            notify_tx,
        }
    }

    /// Unconditional write, as another client would do
    pub fn put(&self, tag: &str, document: Element) -> Version {
        let version = self.inner.lock().write(tag, document);
        self.notify(tag, version);
        version
    }

    /// Queue a write that lands right before the next `replace` of `tag`,
    /// making that replace lose the race
    pub fn inject_before_next_replace(&self, tag: &str, document: Element) {
        self.inner
            .lock()
            .injected
            .entry(tag.to_string())
            .or_default()
            .push_back(document);
    }

    pub fn document(&self, tag: &str) -> Option<Element> {
        self.inner
            .lock()
            .documents
            .get(tag)
            .and_then(|d| d.document.clone())
    }

    pub fn version(&self, tag: &str) -> Version {
        self.inner
            .lock()
            .documents
            .get(tag)
            .map(|d| d.version)
            .unwrap_or_default()
    }

    /// Number of `replace` calls received, successful or not
    pub fn replace_calls(&self) -> u64 {
        self.inner.lock().replace_calls
    }

    fn notify(&self, tag: &str, version: Version) {
        let _ = self.notify_tx.send(StoreNotification {
            tag: tag.to_string(),
            version,
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn fetch(&self, tag: &str) -> Result<VersionedDocument, StoreError> {
        Ok(self
            .inner
            .lock()
            .documents
            .get(tag)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace(
        &self,
        tag: &str,
        expected: Version,
        document: Element,
    ) -> Result<Version, StoreError> {
        let (injected, result) = {
            let mut inner = self.inner.lock();
            inner.replace_calls += 1;

            let edit = inner.injected.get_mut(tag).and_then(VecDeque::pop_front);
            let injected = edit.map(|edit| inner.write(tag, edit));

            let current = inner
                .documents
                .get(tag)
                .map(|d| d.version)
                .unwrap_or_default();
            let result = if current == expected {
                Ok(inner.write(tag, document))
            } else {
                Err(StoreError::VersionMismatch { expected, current })
            };
            (injected, result)
        };

        if let Some(version) = injected {
            debug!(tag, %version, "Applied injected concurrent write");
            self.notify(tag, version);
        }
        if let Ok(version) = result {
            self.notify(tag, version);
        }
        result
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreNotification> {
        self.notify_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_missing_tag() {
        let store = MemoryStore::new();
        let doc = store.fetch("bookmarks").await.unwrap();
        assert_eq!(doc.version, Version(0));
        assert!(doc.document.is_none());
    }

    #[tokio::test]
    async fn test_conditional_replace() {
        let store = MemoryStore::new();
        let v1 = store
            .replace("t", Version(0), Element::new("t"))
            .await
            .unwrap();
        assert_eq!(v1, Version(1));

        let err = store
            .replace("t", Version(0), Element::new("t"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::VersionMismatch {
                expected: Version(0),
                current: Version(1)
            }
        );
        assert_eq!(store.replace_calls(), 2);
    }

    #[tokio::test]
    async fn test_injected_write_wins_the_race() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();
        store.inject_before_next_replace("t", Element::new("t").with_attr("by", "other"));

        let err = store
            .replace("t", Version(0), Element::new("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionMismatch { .. }));
        assert_eq!(store.document("t").unwrap().attr("by"), Some("other"));
        assert_eq!(rx.recv().await.unwrap().version, Version(1));

        // Only the next replace is affected
        store
            .replace("t", Version(1), Element::new("t"))
            .await
            .unwrap();
    }
}
