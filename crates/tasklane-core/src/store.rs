//! The in-memory owner of the task collection.
//!
//! Every mutation waits for the gateway to confirm before touching the
//! collection, so a failed round trip leaves it exactly as it was. Fetches are
//! sequence-numbered: a response that arrives after a newer fetch was issued
//! is dropped.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{PersistenceError, StoreError, ValidationError};
use crate::gateway::{Gateway, GatewayMode, PageQuery, TaskPage};
use crate::task::{NewTask, Task, TaskId, normalize_text};
use crate::view::{
    Paging, SortOrder, StatusFilter, ViewSettings, derive_view, filter_tasks, total_pages,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestStatus {
    #[default]
    Idle,
    Loading,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub total_items: u64,
    pub total_pages: u32,
}

/// Read model handed to renderers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSnapshot {
    pub tasks: Vec<Task>,
    pub settings: ViewSettings,
    pub status: RequestStatus,
    pub error: Option<String>,
    pub totals: Totals,
}

#[derive(Debug, Default)]
struct StoreState {
    tasks: Vec<Task>,
    settings: ViewSettings,
    status: RequestStatus,
    error: Option<String>,
    totals: Totals,
    owner: Option<u64>,
    fetch_seq: u64,
    loaded: bool,
}

impl StoreState {
    fn recompute_local_totals(&mut self) {
        let total = filter_tasks(&self.tasks, self.settings.status).len() as u64;
        self.totals = Totals {
            total_items: total,
            total_pages: total_pages(total, self.settings.items_per_page),
        };
    }

    fn replace_task(&mut self, task: Task) -> bool {
        match self.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(slot) => {
                *slot = task;
                true
            }
            None => false,
        }
    }

    fn remove_task(&mut self, id: TaskId) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        self.tasks.len() != before
    }
}

pub struct TaskStore {
    gateway: Arc<dyn Gateway>,
    state: Mutex<StoreState>,
}

impl TaskStore {
    pub fn new(gateway: Arc<dyn Gateway>, settings: ViewSettings) -> Self {
        Self {
            gateway,
            state: Mutex::new(StoreState {
                settings,
                ..StoreState::default()
            }),
        }
    }

    pub fn mode(&self) -> GatewayMode {
        self.gateway.mode()
    }

    /// Owner id attached to tasks created from now on.
    pub fn set_owner(&self, user_id: Option<u64>) {
        self.state.lock().owner = user_id;
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.lock();
        StoreSnapshot {
            tasks: state.tasks.clone(),
            settings: state.settings.clone(),
            status: state.status,
            error: state.error.clone(),
            totals: state.totals,
        }
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.state.lock().tasks.clone()
    }

    pub fn settings(&self) -> ViewSettings {
        self.state.lock().settings.clone()
    }

    pub fn status(&self) -> RequestStatus {
        self.state.lock().status
    }

    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    pub fn totals(&self) -> Totals {
        self.state.lock().totals
    }

    /// The list to display for the current settings.
    pub fn view(&self) -> Vec<Task> {
        let paging = self.mode().paging();
        let state = self.state.lock();
        derive_view(&state.tasks, &state.settings, paging)
    }

    #[instrument(skip(self))]
    pub async fn fetch(&self) -> Result<(), StoreError> {
        let (seq, query) = {
            let mut state = self.state.lock();
            state.fetch_seq += 1;
            state.status = RequestStatus::Loading;
            state.error = None;
            let query = PageQuery {
                page: state.settings.current_page,
                limit: state.settings.items_per_page,
                status: state.settings.status,
            };
            (state.fetch_seq, query)
        };

        let result = self.gateway.load(&query).await;

        let mut state = self.state.lock();
        if seq != state.fetch_seq {
            debug!(seq, latest = state.fetch_seq, "dropping superseded fetch response");
            return Ok(());
        }

        match result {
            Ok(page) => {
                self.apply_page(&mut state, page);
                state.status = RequestStatus::Idle;
                Ok(())
            }
            Err(err) => Err(fail(&mut state, err)),
        }
    }

    fn apply_page(&self, state: &mut StoreState, page: TaskPage) {
        debug!(count = page.tasks.len(), total = page.total, "applying fetched tasks");
        state.tasks = page.tasks;
        state.loaded = true;
        match self.mode() {
            GatewayMode::Local => state.recompute_local_totals(),
            GatewayMode::Remote => {
                state.settings.current_page = page.page.max(1);
                state.settings.items_per_page = page.limit.max(1);
                state.totals = Totals {
                    total_items: page.total,
                    total_pages: page.total_pages,
                };
            }
        }
    }

    #[instrument(skip(self, text))]
    pub async fn create(&self, text: &str) -> Result<Task, StoreError> {
        let draft = match NewTask::new(text) {
            Ok(draft) => draft,
            Err(err) => return Err(self.reject(err)),
        };
        self.ensure_loaded().await?;
        let draft = draft.with_owner(self.state.lock().owner);

        self.begin();
        let created = match self.gateway.create(&draft).await {
            Ok(task) => task,
            Err(err) => return Err(fail(&mut self.state.lock(), err)),
        };

        let to_save = {
            let mut state = self.state.lock();
            if !state.replace_task(created.clone()) {
                state.tasks.insert(0, created.clone());
            }
            self.after_count_change(&mut state, 1);
            state.status = RequestStatus::Idle;
            self.local_copy(&state)
        };
        self.persist(to_save).await;

        info!(id = created.id, "task created");
        Ok(created)
    }

    /// Flips completion. The new value is whatever the gateway returns.
    /// A missing id is a silent no-op.
    #[instrument(skip(self))]
    pub async fn toggle(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        self.ensure_loaded().await?;
        let Some(current) = self.find(id) else {
            debug!(id, "toggle target absent; ignoring");
            return Ok(None);
        };

        self.begin();
        let result = self.gateway.toggle(&current).await;
        self.confirm(id, result).await
    }

    #[instrument(skip(self, text))]
    pub async fn update(&self, id: TaskId, text: &str) -> Result<Option<Task>, StoreError> {
        let text = match normalize_text(text) {
            Ok(text) => text,
            Err(err) => return Err(self.reject(err)),
        };
        self.ensure_loaded().await?;
        let Some(current) = self.find(id) else {
            debug!(id, "update target absent; ignoring");
            return Ok(None);
        };

        self.begin();
        let result = self.gateway.update_text(&current, &text).await;
        self.confirm(id, result).await
    }

    /// Removes the task once the gateway confirms. Returns whether anything
    /// was removed; a missing id is not an error.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: TaskId) -> Result<bool, StoreError> {
        self.ensure_loaded().await?;
        if self.find(id).is_none() {
            debug!(id, "delete target absent; ignoring");
            return Ok(false);
        }

        self.begin();
        match self.gateway.delete(id).await {
            Ok(()) => {}
            Err(PersistenceError::NotFound(_)) => {
                debug!(id, "server no longer has task; dropping locally");
            }
            Err(err) => return Err(fail(&mut self.state.lock(), err)),
        }

        let (removed, to_save) = {
            let mut state = self.state.lock();
            let removed = state.remove_task(id);
            if removed {
                self.after_count_change(&mut state, -1);
            }
            state.status = RequestStatus::Idle;
            (removed, self.local_copy(&state))
        };
        self.persist(to_save).await;

        info!(id, removed, "task deleted");
        Ok(removed)
    }

    pub fn set_filter(&self, status: StatusFilter) {
        self.update_settings(|s| s.set_status(status));
    }

    pub fn set_sort_order(&self, order: SortOrder) {
        self.update_settings(|s| s.set_sort_order(order));
    }

    pub fn set_items_per_page(&self, items_per_page: u32) {
        self.update_settings(|s| s.set_items_per_page(items_per_page));
    }

    pub fn set_page(&self, page: u32) {
        self.update_settings(|s| s.set_page(page));
    }

    /// Clears the message only; status and data are left alone.
    pub fn clear_error(&self) {
        self.state.lock().error = None;
    }

    fn update_settings(&self, apply: impl FnOnce(&mut ViewSettings)) {
        let mode = self.mode();
        let mut state = self.state.lock();
        apply(&mut state.settings);
        if mode == GatewayMode::Local {
            state.recompute_local_totals();
        }
        debug!(settings = ?state.settings, "view settings changed");
    }

    /// Local saves write the whole collection, so it has to be read from
    /// storage before the first mutation.
    async fn ensure_loaded(&self) -> Result<(), StoreError> {
        if self.mode() != GatewayMode::Local {
            return Ok(());
        }
        let loaded = self.state.lock().loaded;
        if !loaded {
            debug!("collection not loaded yet; fetching before mutation");
            self.fetch().await?;
        }
        Ok(())
    }

    fn find(&self, id: TaskId) -> Option<Task> {
        self.state.lock().tasks.iter().find(|t| t.id == id).cloned()
    }

    fn begin(&self) {
        self.state.lock().status = RequestStatus::Loading;
    }

    fn reject(&self, err: ValidationError) -> StoreError {
        debug!(error = %err, "rejected input");
        self.state.lock().error = Some(err.to_string());
        StoreError::Validation(err)
    }

    async fn confirm(
        &self,
        id: TaskId,
        result: Result<Task, PersistenceError>,
    ) -> Result<Option<Task>, StoreError> {
        let (confirmed, to_save) = {
            let mut state = self.state.lock();
            match result {
                Ok(task) => {
                    // The target may have been deleted while in flight.
                    let applied = state.replace_task(task.clone());
                    if !applied {
                        debug!(id, "confirmed task vanished locally; ignoring");
                    }
                    state.status = RequestStatus::Idle;
                    (applied.then_some(task), self.local_copy(&state))
                }
                Err(PersistenceError::NotFound(_)) => {
                    debug!(id, "server no longer has task; dropping locally");
                    if state.remove_task(id) {
                        self.after_count_change(&mut state, -1);
                    }
                    state.status = RequestStatus::Idle;
                    (None, self.local_copy(&state))
                }
                Err(err) => return Err(fail(&mut state, err)),
            }
        };
        self.persist(to_save).await;
        Ok(confirmed)
    }

    fn after_count_change(&self, state: &mut StoreState, delta: i64) {
        match self.mode() {
            GatewayMode::Local => state.recompute_local_totals(),
            GatewayMode::Remote => {
                state.totals.total_items = if delta >= 0 {
                    state.totals.total_items.saturating_add(delta.unsigned_abs())
                } else {
                    state.totals.total_items.saturating_sub(delta.unsigned_abs())
                };
                state.totals.total_pages =
                    total_pages(state.totals.total_items, state.settings.items_per_page);
            }
        }
    }

    /// The collection to hand to `Gateway::save`, for gateways that keep
    /// the whole collection.
    fn local_copy(&self, state: &StoreState) -> Option<Vec<Task>> {
        (self.mode().paging() == Paging::Client).then(|| state.tasks.clone())
    }

    async fn persist(&self, tasks: Option<Vec<Task>>) {
        if let Some(tasks) = tasks {
            self.gateway.save(&tasks).await;
        }
    }
}

fn fail(state: &mut StoreState, err: PersistenceError) -> StoreError {
    warn!(error = %err, "gateway call failed");
    state.status = RequestStatus::Failed;
    state.error = Some(err.to_string());
    StoreError::Persistence(err)
}
