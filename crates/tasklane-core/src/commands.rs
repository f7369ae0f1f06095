//! User intents mapped onto the task store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, instrument, warn};

use crate::error::StoreError;
use crate::gateway::GatewayMode;
use crate::store::{RequestStatus, TaskStore};
use crate::task::{Task, TaskId};
use crate::view::{SortOrder, StatusFilter};

pub struct TaskCommands {
    store: Arc<TaskStore>,
    submitting: AtomicBool,
}

/// Clears the submitting flag however the create ends.
struct SubmitGuard<'a>(&'a AtomicBool);

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl TaskCommands {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self {
            store,
            submitting: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// True while an add is in flight; input controls should be disabled.
    pub fn is_submitting(&self) -> bool {
        self.submitting.load(Ordering::SeqCst)
    }

    pub fn is_loading(&self) -> bool {
        self.store.status() == RequestStatus::Loading || self.is_submitting()
    }

    /// Filter and sort controls follow the store's loading flag only.
    pub fn controls_disabled(&self) -> bool {
        self.store.status() == RequestStatus::Loading
    }

    pub async fn load(&self) -> Result<(), StoreError> {
        self.store.fetch().await
    }

    #[instrument(skip(self, text))]
    pub async fn add(&self, text: &str) -> Result<Task, StoreError> {
        self.submitting.store(true, Ordering::SeqCst);
        let _guard = SubmitGuard(&self.submitting);

        let task = self.store.create(text).await?;
        self.refresh_after_mutation().await;
        Ok(task)
    }

    #[instrument(skip(self, text))]
    pub async fn edit(&self, id: TaskId, text: &str) -> Result<Option<Task>, StoreError> {
        let task = self.store.update(id, text.trim()).await?;
        self.refresh_after_mutation().await;
        Ok(task)
    }

    #[instrument(skip(self))]
    pub async fn toggle(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let task = self.store.toggle(id).await?;
        self.refresh_after_mutation().await;
        Ok(task)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: TaskId) -> Result<bool, StoreError> {
        let removed = self.store.remove(id).await?;
        self.refresh_after_mutation().await;
        Ok(removed)
    }

    pub async fn change_filter(&self, status: StatusFilter) -> Result<(), StoreError> {
        self.store.set_filter(status);
        self.refetch_if_remote().await
    }

    pub fn change_sort(&self, order: SortOrder) {
        self.store.set_sort_order(order);
    }

    pub async fn change_page(&self, page: u32) -> Result<(), StoreError> {
        self.store.set_page(page);
        self.refetch_if_remote().await
    }

    pub async fn change_items_per_page(&self, items_per_page: u32) -> Result<(), StoreError> {
        self.store.set_items_per_page(items_per_page);
        self.refetch_if_remote().await
    }

    pub fn clear_error(&self) {
        self.store.clear_error();
    }

    /// Server totals and paging are authoritative only for the remote
    /// gateway; the local store already holds the full truth.
    async fn refresh_after_mutation(&self) {
        if self.store.mode() != GatewayMode::Remote {
            return;
        }
        if let Err(err) = self.store.fetch().await {
            warn!(error = %err, "refresh after mutation failed");
        }
    }

    async fn refetch_if_remote(&self) -> Result<(), StoreError> {
        match self.store.mode() {
            GatewayMode::Remote => self.store.fetch().await,
            GatewayMode::Local => {
                debug!("local gateway; no refetch needed");
                Ok(())
            }
        }
    }
}
