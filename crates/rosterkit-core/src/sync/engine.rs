//! Optimistic-concurrency sync engine for roster private data
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SyncEngine                                                     │
//! │  ├── store: Arc<dyn RemoteStore>                                │
//! │  ├── roster: SharedRoster (write-locked once per refresh)       │
//! │  ├── tags: HashMap<tag, TagState>                               │
//! │  │   ├── status: Unsynced | Syncing | Synced                    │
//! │  │   ├── base: last observed (version, data set)                │
//! │  │   ├── handler: Arc<dyn SyncedTagHandler>                     │
//! │  │   └── gate: tokio Mutex serializing work on the tag          │
//! │  ├── listener: store notifications → background refresh        │
//! │  └── event_tx: broadcast::Sender<SyncEvent>                     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Local mutation
//!
//! ```text
//! stage on base ──► unchanged? ──yes──► done, no write
//!       │
//!       ▼
//! replace(tag, base.version) ──ok──► base = staged, Committed
//!       │ version mismatch
//!       ▼
//! backoff ─► refetch ─► dispatch remote diff ─► same id touched?
//!       ▲                                        │ no (or LocalWins)
//!       └────────────────────────────────────────┘
//! ```
//!
//! Staged state lives only in the operation's future. Dropping that future,
//! or shutting the engine down while it backs off, leaves the tag
//! `Unsynced` with its last observed base intact.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConflictPolicy, SyncConfig};
use crate::error::{DataValidityError, RosterError, RosterResult};
use crate::roster::SharedRoster;
use crate::xml::Element;

use super::dataset::{Change, SyncedDataSet, Upsert, ID_ATTR};
use super::events::{ChangeKind, SyncEvent, TagStatus};
use super::handler::SyncedTagHandler;
use super::store::{RemoteStore, StoreError, StoreNotification, Version};

/// Last observed remote state of a tag
#[derive(Debug, Clone)]
struct Snapshot {
    version: Version,
    dataset: SyncedDataSet,
}

struct TagState {
    status: TagStatus,
    base: Option<Snapshot>,
    handler: Arc<dyn SyncedTagHandler>,
    gate: Arc<tokio::sync::Mutex<()>>,
}

/// A local mutation, replayable on a fresh base
#[derive(Debug, Clone)]
enum LocalOp {
    Insert(Element),
    Update(Element),
    Remove(String),
}

impl LocalOp {
    fn id(&self) -> &str {
        match self {
            LocalOp::Insert(el) | LocalOp::Update(el) => el.attr(ID_ATTR).unwrap_or_default(),
            LocalOp::Remove(id) => id,
        }
    }

    /// Apply to `dataset`; `Ok(false)` if nothing changed
    fn stage(&self, dataset: &mut SyncedDataSet, overwrite: bool) -> RosterResult<bool> {
        match self {
            LocalOp::Insert(el) if !overwrite => dataset.insert(el.clone()).map(|_| true),
            LocalOp::Insert(el) | LocalOp::Update(el) => {
                Ok(dataset.upsert(el.clone())? != Upsert::Unchanged)
            }
            LocalOp::Remove(id) => Ok(dataset.remove(id).is_some()),
        }
    }
}

fn require_id(element: &Element) -> RosterResult<()> {
    match element.attr(ID_ATTR) {
        Some(id) if !id.is_empty() => Ok(()),
        _ => Err(DataValidityError::missing_attribute(element.name.clone(), ID_ATTR).into()),
    }
}

struct EngineInner {
    store: Arc<dyn RemoteStore>,
    roster: SharedRoster,
    config: SyncConfig,
    tags: RwLock<HashMap<String, TagState>>,
    event_tx: broadcast::Sender<SyncEvent>,
    cancel: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

/// Marks a tag `Syncing` while alive; resolves to `Unsynced` unless
/// [`SyncingGuard::finish`] is called
struct SyncingGuard<'a> {
    inner: &'a EngineInner,
    tag: &'a str,
    done: bool,
}

impl<'a> SyncingGuard<'a> {
    fn enter(inner: &'a EngineInner, tag: &'a str) -> Self {
        inner.set_status(tag, TagStatus::Syncing);
        Self {
            inner,
            tag,
            done: false,
        }
    }

    fn finish(mut self, status: TagStatus) {
        self.done = true;
        self.inner.set_status(self.tag, status);
    }
}

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.inner.set_status(self.tag, TagStatus::Unsynced);
        }
    }
}

/// Keeps registered tags of a [`SharedRoster`] in sync with a [`RemoteStore`]
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(MemoryStore::new());
/// let roster = Roster::new().into_shared();
/// let target = roster.read().root_id();
///
/// let engine = SyncEngine::new(store, roster.clone(), SyncConfig::default());
/// let mirror = Arc::new(RosterMirror::new("bookmarks", target));
/// engine.register_tag("bookmarks", mirror.clone());
/// engine.sync_tag("bookmarks").await?;
/// engine.start();
///
/// mirror.publish_update(&engine, bookmark_element).await?;
/// ```
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn RemoteStore>, roster: SharedRoster, config: SyncConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            inner: Arc::new(EngineInner {
                store,
                roster,
                config,
                tags: RwLock::new(HashMap::new()),
                event_tx,
                cancel: CancellationToken::new(),
                listener: Mutex::new(None),
            }),
        }
    }

    pub fn roster(&self) -> SharedRoster {
        self.inner.roster.clone()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Register the handler for `tag`. A later registration replaces it;
    /// returns whether one was replaced.
    pub fn register_tag(&self, tag: impl Into<String>, handler: Arc<dyn SyncedTagHandler>) -> bool {
        let tag = tag.into();
        let mut tags = self.inner.tags.write();
        match tags.get_mut(&tag) {
            Some(state) => {
                state.handler = handler;
                debug!(%tag, "Replaced synced tag handler");
                true
            }
            None => {
                debug!(%tag, "Registered synced tag");
                tags.insert(
                    tag,
                    TagState {
                        status: TagStatus::Unsynced,
                        base: None,
                        handler,
                        gate: Arc::new(tokio::sync::Mutex::new(())),
                    },
                );
                false
            }
        }
    }

    /// Registered tags, sorted
    pub fn tags(&self) -> Vec<String> {
        self.inner.tag_names()
    }

    /// `Unsynced` for unknown tags
    pub fn status(&self, tag: &str) -> TagStatus {
        self.inner
            .tags
            .read()
            .get(tag)
            .map(|s| s.status)
            .unwrap_or_default()
    }

    /// Last observed version of `tag`
    pub fn version(&self, tag: &str) -> Option<Version> {
        self.inner.base(tag).map(|b| b.version)
    }

    /// Last observed data of `tag`
    pub fn dataset(&self, tag: &str) -> Option<SyncedDataSet> {
        self.inner.base(tag).map(|b| b.dataset)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Fetch `tag` and dispatch everything that changed since the last
    /// observation (everything, the first time)
    pub async fn sync_tag(&self, tag: &str) -> RosterResult<Vec<Change>> {
        self.inner.refresh(tag).await
    }

    /// Add an element; fails with `DuplicateId` if its id already exists
    pub async fn insert(&self, tag: &str, element: Element) -> RosterResult<()> {
        require_id(&element)?;
        self.inner.apply_local(tag, LocalOp::Insert(element), false).await
    }

    /// Insert or replace by id
    pub async fn update(&self, tag: &str, element: Element) -> RosterResult<()> {
        require_id(&element)?;
        self.inner.apply_local(tag, LocalOp::Update(element), false).await
    }

    /// Remove by id; removing an absent id succeeds without a write
    pub async fn remove(&self, tag: &str, id: &str) -> RosterResult<()> {
        self.inner
            .apply_local(tag, LocalOp::Remove(id.to_string()), false)
            .await
    }

    /// [`update`](Self::update), also applied to the roster through the
    /// tag's handler.
    ///
    /// The handler checks the change before the store is written and
    /// applies it before any later remote change of the tag is dispatched.
    pub async fn apply_update(&self, tag: &str, element: Element) -> RosterResult<()> {
        require_id(&element)?;
        self.inner.apply_local(tag, LocalOp::Update(element), true).await
    }

    /// [`remove`](Self::remove), also applied to the roster through the
    /// tag's handler
    pub async fn apply_remove(&self, tag: &str, id: &str) -> RosterResult<()> {
        self.inner
            .apply_local(tag, LocalOp::Remove(id.to_string()), true)
            .await
    }

    /// Start listening for store notifications. Calling it again is a no-op.
    pub fn start(&self) {
        let mut listener = self.inner.listener.lock();
        if listener.is_some() {
            return;
        }
        let rx = self.inner.store.subscribe();
        let inner = self.inner.clone();
        *listener = Some(tokio::spawn(inner.listen(rx)));
        info!("Sync listener started");
    }

    /// Stop the listener and cancel operations waiting to retry.
    ///
    /// The engine cannot be restarted afterwards.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handle = self.inner.listener.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("Sync engine shut down");
    }
}

impl EngineInner {
    fn emit(&self, event: SyncEvent) {
        let _ = self.event_tx.send(event);
    }

    fn tag_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tags.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn set_status(&self, tag: &str, status: TagStatus) {
        let changed = {
            let mut tags = self.tags.write();
            match tags.get_mut(tag) {
                Some(state) if state.status != status => {
                    state.status = status;
                    true
                }
                _ => false,
            }
        };
        if changed {
            debug!(tag, %status, "Tag status changed");
            self.emit(SyncEvent::StatusChanged {
                tag: tag.to_string(),
                status,
            });
        }
    }

    fn gate(&self, tag: &str) -> RosterResult<Arc<tokio::sync::Mutex<()>>> {
        self.tags
            .read()
            .get(tag)
            .map(|s| s.gate.clone())
            .ok_or_else(|| RosterError::InvalidState(format!("tag {tag:?} is not registered")))
    }

    fn base(&self, tag: &str) -> Option<Snapshot> {
        self.tags.read().get(tag).and_then(|s| s.base.clone())
    }

    fn set_base(&self, tag: &str, snapshot: Snapshot) {
        if let Some(state) = self.tags.write().get_mut(tag) {
            state.base = Some(snapshot);
        }
    }

    /// Base is older than `version` (or missing)
    fn is_stale(&self, tag: &str, version: Version) -> bool {
        self.tags
            .read()
            .get(tag)
            .map(|s| s.base.as_ref().map_or(true, |b| version > b.version))
            .unwrap_or(false)
    }

    async fn fetch_snapshot(&self, tag: &str) -> RosterResult<Snapshot> {
        let fetched = self.store.fetch(tag).await?;
        Ok(Snapshot {
            version: fetched.version,
            dataset: SyncedDataSet::from_document(tag, fetched.document.as_ref()),
        })
    }

    /// Fetch, diff against the base, adopt the fetched state and dispatch.
    /// The caller holds the tag's gate.
    async fn refresh_locked(&self, tag: &str) -> RosterResult<(Snapshot, Vec<Change>)> {
        let old = self
            .base(tag)
            .map(|b| b.dataset)
            .unwrap_or_else(|| SyncedDataSet::new(tag));
        let fresh = self.fetch_snapshot(tag).await?;
        let changes = old.diff(&fresh.dataset);
        self.set_base(tag, fresh.clone());
        if !changes.is_empty() {
            self.dispatch(tag, &changes);
        }
        Ok((fresh, changes))
    }

    /// Apply remote changes under one roster write lock
    fn dispatch(&self, tag: &str, changes: &[Change]) {
        let Some(handler) = self.tags.read().get(tag).map(|s| s.handler.clone()) else {
            return;
        };

        let mut failures = Vec::new();
        {
            let mut roster = self.roster.write();
            for change in changes {
                if let Err(e) = handler.handle(&mut roster, change.kind, &change.element) {
                    warn!(tag, id = %change.id, kind = %change.kind, error = %e, "Tag handler failed");
                    failures.push((change.id.clone(), e.to_string()));
                }
            }
        }

        info!(tag, changes = changes.len(), failed = failures.len(), "Applied remote changes");
        for change in changes {
            self.emit(SyncEvent::RemoteChange {
                tag: tag.to_string(),
                kind: change.kind,
                id: change.id.clone(),
            });
        }
        for (id, message) in failures {
            self.emit(SyncEvent::HandlerError {
                tag: tag.to_string(),
                id,
                message,
            });
        }
    }

    async fn refresh(&self, tag: &str) -> RosterResult<Vec<Change>> {
        let gate = self.gate(tag)?;
        let _permit = gate.lock().await;
        let guard = SyncingGuard::enter(self, tag);
        let (_, changes) = self.refresh_locked(tag).await?;
        guard.finish(TagStatus::Synced);
        Ok(changes)
    }

    fn handler(&self, tag: &str) -> RosterResult<Arc<dyn SyncedTagHandler>> {
        self.tags
            .read()
            .get(tag)
            .map(|s| s.handler.clone())
            .ok_or_else(|| RosterError::InvalidState(format!("tag {tag:?} is not registered")))
    }

    /// `op` applied to the roster, relative to `base`
    fn roster_change(op: &LocalOp, base: &SyncedDataSet) -> Option<(ChangeKind, Element)> {
        match op {
            LocalOp::Insert(el) | LocalOp::Update(el) => {
                let kind = if base.contains(op.id()) {
                    ChangeKind::Modified
                } else {
                    ChangeKind::Inserted
                };
                Some((kind, el.clone()))
            }
            LocalOp::Remove(id) => base.get(id).map(|el| (ChangeKind::Removed, el.clone())),
        }
    }

    async fn apply_local(&self, tag: &str, op: LocalOp, mirror: bool) -> RosterResult<()> {
        let gate = self.gate(tag)?;
        let _permit = gate.lock().await;
        let guard = SyncingGuard::enter(self, tag);

        let mut snapshot = match self.base(tag) {
            Some(snapshot) => snapshot,
            None => self.refresh_locked(tag).await?.0,
        };

        let id = op.id().to_string();
        let mut attempts: u32 = 0;
        let mut overwrite = false;

        loop {
            let mut staged = snapshot.dataset.clone();
            let changed = match op.stage(&mut staged, overwrite) {
                Ok(changed) => changed,
                Err(e) => {
                    guard.finish(TagStatus::Synced);
                    return Err(e);
                }
            };
            if !changed {
                debug!(tag, %id, "Local mutation changes nothing, skipping write");
                guard.finish(TagStatus::Synced);
                return Ok(());
            }

            let roster_change = mirror
                .then(|| Self::roster_change(&op, &snapshot.dataset))
                .flatten();
            if let Some((kind, element)) = &roster_change {
                let checked = self
                    .handler(tag)
                    .and_then(|h| h.check(&self.roster.read(), *kind, element));
                if let Err(e) = checked {
                    debug!(tag, %id, error = %e, "Roster refused local mutation, skipping write");
                    guard.finish(TagStatus::Synced);
                    return Err(e);
                }
            }

            attempts += 1;
            let document = staged.to_document();
            match self.store.replace(tag, snapshot.version, document).await {
                Ok(version) => {
                    debug!(tag, %id, %version, attempts, "Committed local mutation");
                    self.set_base(
                        tag,
                        Snapshot {
                            version,
                            dataset: staged,
                        },
                    );
                    let applied = match roster_change {
                        Some((kind, element)) => self.apply_committed(tag, &id, kind, &element),
                        None => Ok(()),
                    };
                    self.emit(SyncEvent::Committed {
                        tag: tag.to_string(),
                        version,
                        id,
                    });
                    guard.finish(TagStatus::Synced);
                    return applied;
                }
                Err(StoreError::VersionMismatch { expected, current }) => {
                    if attempts > self.config.max_retries {
                        warn!(tag, %id, attempts, "Giving up after repeated version mismatches");
                        self.emit(SyncEvent::Conflict {
                            tag: tag.to_string(),
                            id: id.clone(),
                            attempts,
                        });
                        guard.finish(TagStatus::Unsynced);
                        return Err(RosterError::SyncConflict {
                            tag: tag.to_string(),
                            id,
                            attempts,
                        });
                    }

                    let delay = self.config.retry_delay(attempts);
                    debug!(
                        tag,
                        %id,
                        attempt = attempts,
                        %expected,
                        %current,
                        ?delay,
                        "Conditional write lost, retrying"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            return Err(RosterError::Cancelled(tag.to_string()));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }

                    let (fresh, changes) = self.refresh_locked(tag).await?;
                    snapshot = fresh;
                    if changes.iter().any(|c| c.id == id) {
                        match self.config.conflict_policy {
                            ConflictPolicy::Reject => {
                                warn!(tag, %id, "Remote change to the same element, dropping local mutation");
                                self.emit(SyncEvent::Conflict {
                                    tag: tag.to_string(),
                                    id: id.clone(),
                                    attempts,
                                });
                                guard.finish(TagStatus::Synced);
                                return Err(RosterError::SyncConflict {
                                    tag: tag.to_string(),
                                    id,
                                    attempts,
                                });
                            }
                            ConflictPolicy::LocalWins => {
                                debug!(tag, %id, "Replaying local mutation over remote change");
                                overwrite = true;
                            }
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Apply a committed local change to the roster. The caller holds the
    /// tag's gate, so no later remote change can overtake it.
    fn apply_committed(
        &self,
        tag: &str,
        id: &str,
        kind: ChangeKind,
        element: &Element,
    ) -> RosterResult<()> {
        let handler = self.handler(tag)?;
        let result = handler.handle(&mut self.roster.write(), kind, element);
        if let Err(e) = &result {
            warn!(tag, %id, %kind, error = %e, "Committed change not applied to roster");
            self.emit(SyncEvent::HandlerError {
                tag: tag.to_string(),
                id: id.to_string(),
                message: e.to_string(),
            });
        }
        result
    }

    async fn listen(self: Arc<Self>, mut rx: broadcast::Receiver<StoreNotification>) {
        loop {
            let received = tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = rx.recv() => received,
            };
            match received {
                Ok(notification) => {
                    if self.is_stale(&notification.tag, notification.version) {
                        self.spawn_refresh(notification.tag);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Store notifications lagged, refreshing every tag");
                    for tag in self.tag_names() {
                        self.spawn_refresh(tag);
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Sync listener stopped");
    }

    fn spawn_refresh(self: &Arc<Self>, tag: String) {
        let inner = self.clone();
        tokio::spawn(async move {
            if let Err(e) = inner.refresh(&tag).await {
                warn!(%tag, error = %e, "Background refresh failed");
            }
        });
    }
}
