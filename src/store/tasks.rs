//! Task store: the tasks of one list at a time.
//!
//! The store is scoped by `fetch(list_id)`; every subsequent action and the
//! change-feed subscription apply to that list until re-scoped. Search is
//! the exception: it queries across all of the user's tasks and leaves the
//! scoped sequence alone.

use std::sync::{Arc, Mutex, RwLock, Weak};

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::gateway::{FeedHandle, Gateway};
use crate::models::{ChangeEvent, EventType, NewTask, Priority, Task, TaskPatch};
use crate::reorder::splice_move;
use crate::validate;

#[derive(Debug, Clone, Default)]
pub struct TaskState {
    pub tasks: Vec<Task>,
    /// The list the store is currently scoped to.
    pub list_id: Option<Uuid>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub selected_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct CreateTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<Priority>,
}

struct Subscription {
    feed: FeedHandle<Task>,
    pump: JoinHandle<()>,
    /// Scope the feed was opened with; re-scoping invalidates it.
    list_id: Option<Uuid>,
}

pub struct TaskStore {
    gateway: Arc<Gateway>,
    state: RwLock<TaskState>,
    version: watch::Sender<u64>,
    subscription: Mutex<Option<Subscription>>,
    weak: Weak<Self>,
}

impl TaskStore {
    pub fn new(gateway: Arc<Gateway>) -> Arc<Self> {
        let (version, _) = watch::channel(0);
        Arc::new_cyclic(|weak| Self {
            gateway,
            state: RwLock::new(TaskState::default()),
            version,
            subscription: Mutex::new(None),
            weak: weak.clone(),
        })
    }

    pub fn snapshot(&self) -> TaskState {
        self.state.read().expect("task state lock").clone()
    }

    pub fn changed(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut TaskState) -> R) -> R {
        let result = f(&mut self.state.write().expect("task state lock"));
        self.bump();
        result
    }

    fn scope(&self) -> Result<Uuid, StoreError> {
        self.snapshot().list_id.ok_or(StoreError::NoListSelected)
    }

    // ── Actions ───────────────────────────────────────────────────────

    /// Scope the store to one list and replace local state with its tasks.
    /// Concurrent calls are not coalesced; the later response wins.
    pub async fn fetch(&self, list_id: Uuid) -> Result<Vec<Task>, StoreError> {
        self.with_state(|s| {
            s.list_id = Some(list_id);
            s.is_loading = true;
            s.error = None;
        });

        match self.gateway.get_tasks(list_id).await {
            Ok(tasks) => {
                self.with_state(|s| {
                    s.tasks = tasks.clone();
                    s.is_loading = false;
                });
                Ok(tasks)
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

    /// Create a task at the end of the scoped list.
    pub async fn create(&self, fields: CreateTask) -> Result<Task, StoreError> {
        self.with_state(|s| s.error = None);
        validate::validate_task_title(&fields.title)?;
        let list_id = self.scope()?;

        let position = self.snapshot().tasks.len() as i32;
        let new = NewTask {
            list_id,
            title: fields.title,
            description: fields.description,
            priority: fields.priority,
            position,
        };

        match self.gateway.create_task(&new).await {
            Ok(task) => {
                self.with_state(|s| s.tasks.push(task.clone()));
                Ok(task)
            }
            Err(err) => {
                self.with_state(|s| s.error = Some(err.to_string()));
                Err(err.into())
            }
        }
    }

    pub async fn update(&self, id: Uuid, patch: TaskPatch) -> Result<Task, StoreError> {
        self.with_state(|s| s.error = None);
        if let Some(title) = patch.title.as_deref() {
            validate::validate_task_title(title)?;
        }

        match self.gateway.update_task(id, &patch).await {
            Ok(updated) => {
                self.with_state(|s| {
                    if let Some(existing) = s.tasks.iter_mut().find(|t| t.id == id) {
                        *existing = updated.clone();
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

    /// Flip a task's completion flag. The flag is the task's only terminal
    /// state; nothing else changes.
    pub async fn toggle_complete(&self, id: Uuid) -> Result<Task, StoreError> {
        let completed = self
            .snapshot()
            .tasks
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.completed)
            .unwrap_or(false);
        self.update(id, TaskPatch::completed(!completed)).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.with_state(|s| s.error = None);

        match self.gateway.delete_task(id).await {
            Ok(()) => {
                self.with_state(|s| {
                    s.tasks.retain(|t| t.id != id);
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

    /// Case-insensitive title search across all lists. Results are returned
    /// to the caller; the scoped sequence is not touched.
    pub async fn search(&self, query: &str) -> Result<Vec<Task>, StoreError> {
        self.with_state(|s| s.error = None);
        match self.gateway.search_tasks(query).await {
            Ok(tasks) => Ok(tasks),
            Err(err) => {
                self.with_state(|s| s.error = Some(err.to_string()));
                Err(err.into())
            }
        }
    }

    /// Persist a full reordering of the scoped list; same contract as the
    /// list store's reorder, including best-effort compensation on partial
    /// failure.
    pub async fn reorder(&self, ordered_ids: &[Uuid]) -> Result<(), StoreError> {
        self.with_state(|s| s.error = None);
        let previous = self.snapshot().tasks;

        let updates = ordered_ids
            .iter()
            .enumerate()
            .map(|(index, id)| {
                let patch = TaskPatch::position(index as i32);
                async move { self.gateway.update_task(*id, &patch).await }
            });
        let results = join_all(updates).await;

        if let Some(err) = results.into_iter().find_map(Result::err) {
            let compensation = previous
                .iter()
                .map(|t| {
                    let patch = TaskPatch::position(t.position);
                    async move { self.gateway.update_task(t.id, &patch).await }
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
                if let Some(mut task) = previous.iter().find(|t| t.id == *id).cloned() {
                    task.position = index as i32;
                    next.push(task);
                }
            }
            s.tasks = next;
        });
        Ok(())
    }

    pub async fn move_task(&self, from: usize, to: usize) -> Result<(), StoreError> {
        let tasks = self.snapshot().tasks;
        let Some(next) = splice_move(&tasks, from, to) else {
            return Ok(());
        };
        let ordered_ids: Vec<Uuid> = next.iter().map(|t| t.id).collect();
        self.reorder(&ordered_ids).await
    }

    pub fn select(&self, id: Option<Uuid>) {
        self.with_state(|s| s.selected_id = id);
    }

    pub fn clear_error(&self) {
        self.with_state(|s| s.error = None);
    }

    // ── Change feed ───────────────────────────────────────────────────

    /// Attach the change feed for the current scope. Idempotent while the
    /// scope is unchanged; re-scoping replaces the subscription.
    pub fn subscribe_to_changes(&self) {
        let list_id = self.snapshot().list_id;
        let mut slot = self.subscription.lock().expect("subscription lock");
        if let Some(sub) = slot.as_ref() {
            if sub.list_id == list_id {
                return;
            }
            sub.feed.shutdown();
            sub.pump.abort();
        }

        let mut feed = self.gateway.subscribe_tasks(list_id);
        let mut events = feed.take_events().expect("fresh feed has its receiver");
        let weak = self.weak.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(store) = weak.upgrade() else { break };
                store.apply_change(event);
            }
        });
        *slot = Some(Subscription {
            feed,
            pump,
            list_id,
        });
    }

    pub fn unsubscribe_from_changes(&self) {
        if let Some(sub) = self.subscription.lock().expect("subscription lock").take() {
            sub.feed.shutdown();
            sub.pump.abort();
        }
    }

    /// Merge one feed event into the scoped sequence; rows for other lists
    /// are ignored. Re-sorts after every mutation so out-of-order delivery
    /// cannot corrupt display order.
    pub fn apply_change(&self, event: ChangeEvent<Task>) {
        self.with_state(|s| {
            match event.event_type {
                EventType::Insert => {
                    if let Some(row) = event.new {
                        let in_scope = s.list_id.is_none_or(|id| id == row.list_id);
                        if in_scope && !s.tasks.iter().any(|t| t.id == row.id) {
                            s.tasks.push(row);
                        }
                    }
                }
                EventType::Update => {
                    if let Some(row) = event.new {
                        if let Some(existing) = s.tasks.iter_mut().find(|t| t.id == row.id) {
                            *existing = row;
                        }
                    }
                }
                EventType::Delete => {
                    if let Some(row) = event.old {
                        s.tasks.retain(|t| t.id != row.id);
                    }
                }
            }
            s.tasks
                .sort_by(|a, b| (a.position, a.created_at).cmp(&(b.position, b.created_at)));
        });
    }
}

impl Drop for TaskStore {
    fn drop(&mut self) {
        if let Some(sub) = self.subscription.lock().expect("subscription lock").take() {
            sub.feed.shutdown();
            sub.pump.abort();
        }
    }
}
