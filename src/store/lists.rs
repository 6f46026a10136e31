//! List store: the process-wide view of the user's lists.

use std::sync::{Arc, Mutex, RwLock, Weak};

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::gateway::{FeedHandle, Gateway};
use crate::models::{ChangeEvent, EventType, List, ListPatch, NewList};
use crate::reorder::splice_move;
use crate::validate;

/// Snapshot of the list store's state at one version.
#[derive(Debug, Clone, Default)]
pub struct ListState {
    pub lists: Vec<List>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub selected_id: Option<Uuid>,
}

/// Fields accepted when creating a list. Position is assigned by the store;
/// a missing color falls back to the palette default.
#[derive(Debug, Clone)]
pub struct CreateList {
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
}

struct Subscription {
    feed: FeedHandle<List>,
    pump: JoinHandle<()>,
}

pub struct ListStore {
    gateway: Arc<Gateway>,
    state: RwLock<ListState>,
    version: watch::Sender<u64>,
    subscription: Mutex<Option<Subscription>>,
    weak: Weak<Self>,
}

impl ListStore {
    pub fn new(gateway: Arc<Gateway>) -> Arc<Self> {
        let (version, _) = watch::channel(0);
        Arc::new_cyclic(|weak| Self {
            gateway,
            state: RwLock::new(ListState::default()),
            version,
            subscription: Mutex::new(None),
            weak: weak.clone(),
        })
    }

    pub fn snapshot(&self) -> ListState {
        self.state.read().expect("list state lock").clone()
    }

    /// Wake-up channel for observers: the value increments on every state
    /// mutation.
    pub fn changed(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ListState) -> R) -> R {
        let result = f(&mut self.state.write().expect("list state lock"));
        self.bump();
        result
    }

    // ── Actions ───────────────────────────────────────────────────────

    /// Replace local state with the backend's current rows. Concurrent
    /// calls are not coalesced; whichever response lands last wins.
    pub async fn fetch(&self) -> Result<Vec<List>, StoreError> {
        self.with_state(|s| {
            s.is_loading = true;
            s.error = None;
        });

        let result = self.gateway.get_lists().await;
        match result {
            Ok(lists) => {
                self.with_state(|s| {
                    s.lists = lists.clone();
                    s.is_loading = false;
                });
                Ok(lists)
            }
            Err(err) => {
                self.with_state(|s| {
                    s.error = Some(err.to_string());
                    s.is_loading = false;
                });
                Err(err.into())
            }
        }
    }

    /// Create a list at the end of the current order. Local state is only
    /// touched on success, so there is nothing to roll back.
    pub async fn create(&self, fields: CreateList) -> Result<List, StoreError> {
        self.with_state(|s| s.error = None);

        validate::validate_list_name(&fields.name)?;
        validate::validate_description(fields.description.as_deref())?;
        validate::validate_color(fields.color.as_deref())?;

        let position = self.snapshot().lists.len() as i32;
        let new = NewList {
            name: fields.name,
            description: fields.description,
            color: Some(
                fields
                    .color
                    .unwrap_or_else(|| validate::default_color().to_string()),
            ),
            position,
        };

        match self.gateway.create_list(&new).await {
            Ok(mut list) => {
                list.task_count = 0;
                self.with_state(|s| s.lists.push(list.clone()));
                Ok(list)
            }
            Err(err) => {
                self.with_state(|s| s.error = Some(err.to_string()));
                Err(err.into())
            }
        }
    }

    /// Persist a partial update, then merge the returned row into the
    /// matching local entity. No optimistic pre-mutation.
    pub async fn update(&self, id: Uuid, patch: ListPatch) -> Result<List, StoreError> {
        self.with_state(|s| s.error = None);

        if let Some(name) = patch.name.as_deref() {
            validate::validate_list_name(name)?;
        }
        validate::validate_description(patch.description.as_deref())?;
        validate::validate_color(patch.color.as_deref())?;

        match self.gateway.update_list(id, &patch).await {
            Ok(updated) => {
                self.with_state(|s| {
                    if let Some(existing) = s.lists.iter_mut().find(|l| l.id == id) {
                        merge_row(existing, &updated);
                    }
                });
                Ok(updated)
            }
            Err(err) => {
                self.with_state(|s| s.error = Some(err.to_string()));
                Err(err.into())
            }
        }
    }

    /// Delete by identity. Failure leaves local state untouched; deleting
    /// an identity the backend no longer has is not an error.
    pub async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.with_state(|s| s.error = None);

        match self.gateway.delete_list(id).await {
            Ok(()) => {
                self.with_state(|s| {
                    s.lists.retain(|l| l.id != id);
                    if s.selected_id == Some(id) {
                        s.selected_id = None;
                    }
                });
                Ok(())
            }
            Err(err) => {
                self.with_state(|s| s.error = Some(err.to_string()));
                Err(err.into())
            }
        }
    }

    /// Persist a full reordering: one position update per entity, issued
    /// concurrently. On success the local sequence is replaced in the new
    /// order. On any individual failure the local sequence stays at its
    /// pre-reorder order and the already-applied remote updates are
    /// compensated best-effort back to their previous positions.
    pub async fn reorder(&self, ordered_ids: &[Uuid]) -> Result<(), StoreError> {
        self.with_state(|s| s.error = None);
        let previous = self.snapshot().lists;

        let updates = ordered_ids
            .iter()
            .enumerate()
            .map(|(index, id)| {
                let patch = ListPatch::position(index as i32);
                async move { self.gateway.update_list(*id, &patch).await }
            });
        let results = join_all(updates).await;

        if let Some(err) = results.into_iter().find_map(Result::err) {
            let compensation = previous
                .iter()
                .map(|l| {
                    let patch = ListPatch::position(l.position);
                    async move { self.gateway.update_list(l.id, &patch).await }
                });
            for result in join_all(compensation).await {
                if let Err(comp_err) = result {
                    warn!(error = %comp_err, "Reorder compensation failed; remote order may diverge");
                }
            }
            self.with_state(|s| s.error = Some(err.to_string()));
            return Err(err.into());
        }

        self.with_state(|s| {
            let mut next = Vec::with_capacity(ordered_ids.len());
            for (index, id) in ordered_ids.iter().enumerate() {
                if let Some(mut list) = previous.iter().find(|l| l.id == *id).cloned() {
                    list.position = index as i32;
                    next.push(list);
                }
            }
            s.lists = next;
        });
        Ok(())
    }

    /// Apply a drag gesture: splice the entity at `from` in at `to`, then
    /// persist the recomputed order. Meaningless gestures are no-ops.
    pub async fn move_list(&self, from: usize, to: usize) -> Result<(), StoreError> {
        let lists = self.snapshot().lists;
        let Some(next) = splice_move(&lists, from, to) else {
            return Ok(());
        };
        let ordered_ids: Vec<Uuid> = next.iter().map(|l| l.id).collect();
        self.reorder(&ordered_ids).await
    }

    /// Pure local selection; no network call.
    pub fn select(&self, id: Option<Uuid>) {
        self.with_state(|s| s.selected_id = id);
    }

    pub fn clear_error(&self) {
        self.with_state(|s| s.error = None);
    }

    // ── Change feed ───────────────────────────────────────────────────

    /// Attach the remote change feed. Idempotent: a second call while a
    /// subscription is live keeps the existing channel.
    pub fn subscribe_to_changes(&self) {
        let mut slot = self.subscription.lock().expect("subscription lock");
        if slot.is_some() {
            return;
        }

        let mut feed = self.gateway.subscribe_lists();
        let mut events = feed.take_events().expect("fresh feed has its receiver");
        let weak = self.weak.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(store) = weak.upgrade() else { break };
                store.apply_change(event);
            }
        });
        *slot = Some(Subscription { feed, pump });
    }

    /// Tear down the feed subscription, if any.
    pub fn unsubscribe_from_changes(&self) {
        if let Some(sub) = self.subscription.lock().expect("subscription lock").take() {
            sub.feed.shutdown();
            sub.pump.abort();
        }
    }

    /// Merge one feed event into local state. Events for identities we do
    /// not hold are no-ops; after every mutation the sequence is re-sorted
    /// by position so out-of-order delivery cannot corrupt display order.
    pub fn apply_change(&self, event: ChangeEvent<List>) {
        self.with_state(|s| {
            match event.event_type {
                EventType::Insert => {
                    if let Some(mut row) = event.new {
                        row.task_count = 0;
                        if !s.lists.iter().any(|l| l.id == row.id) {
                            s.lists.push(row);
                        }
                    }
                }
                EventType::Update => {
                    if let Some(row) = event.new {
                        if let Some(existing) = s.lists.iter_mut().find(|l| l.id == row.id) {
                            merge_row(existing, &row);
                        }
                    }
                }
                EventType::Delete => {
                    if let Some(row) = event.old {
                        s.lists.retain(|l| l.id != row.id);
                    }
                }
            }
            s.lists.sort_by_key(|l| l.position);
        });
    }
}

impl Drop for ListStore {
    fn drop(&mut self) {
        if let Some(sub) = self.subscription.lock().expect("subscription lock").take() {
            sub.feed.shutdown();
            sub.pump.abort();
        }
    }
}

/// Overwrite a local row with a server row, preserving the locally-derived
/// task count (server rows carry it only on full reads).
fn merge_row(existing: &mut List, incoming: &List) {
    let task_count = existing.task_count;
    *existing = incoming.clone();
    existing.task_count = task_count;
}
