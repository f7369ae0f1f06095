use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use super::{Gateway, GatewayMode, PageQuery, TaskPage};
use crate::error::PersistenceError;
use crate::storage::{KeyValueStore, TODOS_KEY};
use crate::task::{NewTask, Task, TaskId, validate_tasks};

/// Keeps the collection as a JSON array under the `todos` key.
pub struct LocalGateway {
    storage: Arc<dyn KeyValueStore>,
    last_id: Mutex<TaskId>,
}

impl LocalGateway {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            storage,
            last_id: Mutex::new(0),
        }
    }

    /// Reads the stored collection. Anything missing, unreadable or
    /// malformed comes back as an empty collection.
    #[instrument(skip(self))]
    pub fn read_all(&self) -> Vec<Task> {
        let raw = match self.storage.get_item(TODOS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("no stored tasks");
                return vec![];
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "failed reading stored tasks; starting empty");
                return vec![];
            }
        };

        match decode_tasks(&raw) {
            Ok(tasks) => {
                self.observe_ids(&tasks);
                debug!(count = tasks.len(), "loaded stored tasks");
                tasks
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "stored tasks are not a valid task array; starting empty");
                vec![]
            }
        }
    }

    /// Writes the collection. Failures are logged; the caller's in-memory
    /// copy stays the source of truth for the session.
    #[instrument(skip(self, tasks), fields(count = tasks.len()))]
    pub fn write_all(&self, tasks: &[Task]) {
        let payload = match serde_json::to_string(tasks) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "failed encoding tasks; not saved");
                return;
            }
        };
        if let Err(err) = self.storage.set_item(TODOS_KEY, &payload) {
            warn!(error = %format!("{err:#}"), "failed saving tasks to local storage");
        }
    }

    fn observe_ids(&self, tasks: &[Task]) {
        let mut last = self.last_id.lock();
        if let Some(max) = tasks.iter().map(|t| t.id).max() {
            *last = (*last).max(max);
        }
    }

    /// Millisecond clock, bumped past the previous id so bursts stay unique.
    fn next_id(&self) -> TaskId {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let mut last = self.last_id.lock();
        let id = now.max(last.saturating_add(1));
        *last = id;
        id
    }
}

fn decode_tasks(raw: &str) -> anyhow::Result<Vec<Task>> {
    let tasks = serde_json::from_str::<Vec<Task>>(raw)?;
    validate_tasks(tasks)
}

#[async_trait]
impl Gateway for LocalGateway {
    fn mode(&self) -> GatewayMode {
        GatewayMode::Local
    }

    async fn load(&self, query: &PageQuery) -> Result<TaskPage, PersistenceError> {
        Ok(TaskPage::complete(self.read_all(), query))
    }

    async fn create(&self, draft: &NewTask) -> Result<Task, PersistenceError> {
        let task = draft.clone().into_task(self.next_id(), Utc::now());
        debug!(id = task.id, "assigned local task id");
        Ok(task)
    }

    async fn update_text(&self, current: &Task, text: &str) -> Result<Task, PersistenceError> {
        Ok(Task {
            text: text.to_string(),
            ..current.clone()
        })
    }

    async fn toggle(&self, current: &Task) -> Result<Task, PersistenceError> {
        Ok(Task {
            completed: !current.completed,
            ..current.clone()
        })
    }

    async fn delete(&self, _id: TaskId) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn save(&self, tasks: &[Task]) {
        self.write_all(tasks);
    }
}
