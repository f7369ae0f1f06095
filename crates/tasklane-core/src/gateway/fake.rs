//! Scripted in-memory gateway for unit tests.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Gateway, GatewayMode, PageQuery, TaskPage};
use crate::error::PersistenceError;
use crate::task::{NewTask, Task, TaskId};
use crate::view::{Paging, SortOrder, ViewSettings, derive_view};

pub(crate) struct FakeGateway {
    mode: GatewayMode,
    pub server: Mutex<Vec<Task>>,
    next_id: Mutex<TaskId>,
    failures: Mutex<VecDeque<PersistenceError>>,
    load_delays: Mutex<VecDeque<Duration>>,
    create_delays: Mutex<VecDeque<Duration>>,
    pub calls: Mutex<Vec<String>>,
    pub saved: Mutex<Vec<Vec<Task>>>,
}

impl FakeGateway {
    pub fn new(mode: GatewayMode, server: Vec<Task>) -> Self {
        let next_id = server.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        Self {
            mode,
            server: Mutex::new(server),
            next_id: Mutex::new(next_id),
            failures: Mutex::new(VecDeque::new()),
            load_delays: Mutex::new(VecDeque::new()),
            create_delays: Mutex::new(VecDeque::new()),
            calls: Mutex::new(vec![]),
            saved: Mutex::new(vec![]),
        }
    }

    /// The next gateway call fails with `err`.
    pub fn fail_next(&self, err: PersistenceError) {
        self.failures.lock().push_back(err);
    }

    pub fn delay_next_load(&self, delay: Duration) {
        self.load_delays.lock().push_back(delay);
    }

    pub fn delay_next_create(&self, delay: Duration) {
        self.create_delays.lock().push_back(delay);
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == name).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    fn enter(&self, name: &str) -> Result<(), PersistenceError> {
        self.calls.lock().push(name.to_string());
        match self.failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn replace(&self, task: &Task) {
        let mut server = self.server.lock();
        if let Some(slot) = server.iter_mut().find(|t| t.id == task.id) {
            *slot = task.clone();
        }
    }
}

pub(crate) fn task(id: TaskId, text: &str, completed: bool) -> Task {
    Task {
        id,
        text: text.to_string(),
        completed,
        created_at: None,
        user_id: None,
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    fn mode(&self) -> GatewayMode {
        self.mode
    }

    async fn load(&self, query: &PageQuery) -> Result<TaskPage, PersistenceError> {
        // Captured before the delay so a slow load returns older data.
        let snapshot = self.server.lock().clone();
        let delay = self.load_delays.lock().pop_front();
        let outcome = self.enter("load");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        outcome?;

        match self.mode {
            GatewayMode::Local => Ok(TaskPage::complete(snapshot, query)),
            GatewayMode::Remote => {
                let all = ViewSettings {
                    status: query.status,
                    sort_order: SortOrder::Newest,
                    current_page: 1,
                    items_per_page: u32::MAX,
                };
                let matching = derive_view(&snapshot, &all, Paging::Server);
                let settings = ViewSettings {
                    current_page: query.page,
                    items_per_page: query.limit,
                    ..all
                };
                let total = matching.len() as u64;
                let tasks = derive_view(&matching, &settings, Paging::Client);
                Ok(TaskPage {
                    tasks,
                    total,
                    page: query.page,
                    limit: query.limit,
                    total_pages: crate::view::total_pages(total, query.limit),
                })
            }
        }
    }

    async fn create(&self, draft: &NewTask) -> Result<Task, PersistenceError> {
        let delay = self.create_delays.lock().pop_front();
        self.enter("create")?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let id = {
            let mut next = self.next_id.lock();
            let id = *next;
            *next += 1;
            id
        };
        let task = Task {
            id,
            text: draft.text.clone(),
            completed: draft.completed,
            created_at: None,
            user_id: draft.user_id,
        };
        self.server.lock().push(task.clone());
        Ok(task)
    }

    async fn update_text(&self, current: &Task, text: &str) -> Result<Task, PersistenceError> {
        self.enter("update")?;
        let task = Task {
            text: text.to_string(),
            ..current.clone()
        };
        self.replace(&task);
        Ok(task)
    }

    async fn toggle(&self, current: &Task) -> Result<Task, PersistenceError> {
        self.enter("toggle")?;
        let task = Task {
            completed: !current.completed,
            ..current.clone()
        };
        self.replace(&task);
        Ok(task)
    }

    async fn delete(&self, id: TaskId) -> Result<(), PersistenceError> {
        self.enter("delete")?;
        self.server.lock().retain(|t| t.id != id);
        Ok(())
    }

    async fn save(&self, tasks: &[Task]) {
        self.calls.lock().push("save".to_string());
        self.saved.lock().push(tasks.to_vec());
    }
}
