//! Persistence boundary between the task store and whatever actually keeps
//! the tasks: device-local storage or a REST service.

pub mod local;
pub mod remote;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;

use crate::error::PersistenceError;
use crate::task::{NewTask, Task, TaskId};
use crate::view::{Paging, StatusFilter, total_pages};

pub use local::LocalGateway;
pub use remote::RemoteGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMode {
    /// `load` returns the whole collection and the store is authoritative.
    Local,
    /// `load` returns one server-side page and the server is authoritative.
    Remote,
}

impl GatewayMode {
    pub fn paging(self) -> Paging {
        match self {
            GatewayMode::Local => Paging::Client,
            GatewayMode::Remote => Paging::Server,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub page: u32,
    pub limit: u32,
    pub status: StatusFilter,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

impl TaskPage {
    /// A page holding the complete collection, as local storage returns it.
    pub fn complete(tasks: Vec<Task>, query: &PageQuery) -> Self {
        let total = tasks.len() as u64;
        Self {
            tasks,
            total,
            page: query.page,
            limit: query.limit,
            total_pages: total_pages(total, query.limit),
        }
    }
}

#[async_trait]
pub trait Gateway: Send + Sync {
    fn mode(&self) -> GatewayMode;

    async fn load(&self, query: &PageQuery) -> Result<TaskPage, PersistenceError>;

    async fn create(&self, draft: &NewTask) -> Result<Task, PersistenceError>;

    async fn update_text(&self, current: &Task, text: &str) -> Result<Task, PersistenceError>;

    async fn toggle(&self, current: &Task) -> Result<Task, PersistenceError>;

    async fn delete(&self, id: TaskId) -> Result<(), PersistenceError>;

    /// Writes the full collection after a confirmed mutation. Backends that
    /// persist every call on their own leave this as a no-op.
    async fn save(&self, _tasks: &[Task]) {}
}
