use std::str::FromStr;

use anyhow::anyhow;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::{Gateway, GatewayMode, PageQuery, TaskPage};
use crate::error::PersistenceError;
use crate::http::ApiClient;
use crate::task::{NewTask, Task, TaskId, validate_tasks};
use crate::view::{StatusFilter, total_pages};

/// How the server expects a completion flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToggleStyle {
    /// `PATCH /todos/{id}/toggle`, server decides the new value.
    #[default]
    Route,
    /// `PATCH /todos/{id} {"completed": !current}`.
    Patch,
}

impl FromStr for ToggleStyle {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "route" => Ok(Self::Route),
            "patch" => Ok(Self::Patch),
            other => Err(anyhow!("invalid api.toggle value: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMethod {
    #[default]
    Put,
    Patch,
}

impl FromStr for UpdateMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "put" => Ok(Self::Put),
            "patch" => Ok(Self::Patch),
            other => Err(anyhow!("invalid api.update value: {other}")),
        }
    }
}

#[derive(Serialize)]
struct TextPatch<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct CompletedPatch {
    completed: bool,
}

/// REST-backed gateway; the server owns ids, totals and paging.
pub struct RemoteGateway {
    api: ApiClient,
    toggle_style: ToggleStyle,
    update_method: UpdateMethod,
}

impl RemoteGateway {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            toggle_style: ToggleStyle::default(),
            update_method: UpdateMethod::default(),
        }
    }

    pub fn with_toggle_style(mut self, style: ToggleStyle) -> Self {
        self.toggle_style = style;
        self
    }

    pub fn with_update_method(mut self, method: UpdateMethod) -> Self {
        self.update_method = method;
        self
    }

    fn task_url(&self, id: TaskId) -> String {
        self.api.url(&format!("/todos/{id}"))
    }
}

/// `/todos?page=&limit=[&filter=]`; `all` sends no filter.
pub fn list_path(query: &PageQuery) -> String {
    let mut path = format!("/todos?page={}&limit={}", query.page.max(1), query.limit.max(1));
    if query.status != StatusFilter::All {
        path.push_str("&filter=");
        path.push_str(query.status.as_str());
    }
    path
}

/// Decodes a list response. Accepts the paged envelope or a bare array;
/// anything that is not a task array becomes an empty page.
pub fn decode_page(body: Value, query: &PageQuery) -> TaskPage {
    let (data, envelope) = match body {
        Value::Array(items) => (Value::Array(items), None),
        Value::Object(mut map) => (map.remove("data").unwrap_or(Value::Null), Some(map)),
        other => {
            warn!(kind = %json_kind(&other), "list response is not an object; treating as empty");
            (Value::Null, None)
        }
    };

    let tasks = match data {
        Value::Array(_) => serde_json::from_value::<Vec<Task>>(data)
            .map_err(anyhow::Error::from)
            .and_then(validate_tasks)
            .unwrap_or_else(|err| {
                warn!(error = %format!("{err:#}"), "list response holds malformed tasks; treating as empty");
                vec![]
            }),
        other => {
            warn!(kind = %json_kind(&other), "list response data is not an array; treating as empty");
            vec![]
        }
    };

    let field = |name: &str| {
        envelope
            .as_ref()
            .and_then(|map| map.get(name))
            .and_then(Value::as_u64)
    };

    let total = field("total").unwrap_or(tasks.len() as u64);
    let page = field("page")
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(query.page);
    let limit = field("limit")
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v > 0)
        .unwrap_or(query.limit);
    let pages = field("totalPages")
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or_else(|| total_pages(total, limit));

    TaskPage {
        tasks,
        total,
        page,
        limit,
        total_pages: pages,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn not_found_as(id: TaskId) -> impl Fn(PersistenceError) -> PersistenceError {
    move |err| match err {
        PersistenceError::Http { status: 404, .. } => PersistenceError::NotFound(id),
        other => other,
    }
}

#[async_trait]
impl Gateway for RemoteGateway {
    fn mode(&self) -> GatewayMode {
        GatewayMode::Remote
    }

    #[instrument(skip(self))]
    async fn load(&self, query: &PageQuery) -> Result<TaskPage, PersistenceError> {
        let url = self.api.url(&list_path(query));
        let response = self.api.send(|client| client.get(&url)).await?;
        let body: Value = response.json().await?;
        let page = decode_page(body, query);
        debug!(count = page.tasks.len(), total = page.total, "fetched page");
        Ok(page)
    }

    #[instrument(skip(self, draft))]
    async fn create(&self, draft: &NewTask) -> Result<Task, PersistenceError> {
        let url = self.api.url("/todos");
        let response = self
            .api
            .send(|client| client.post(&url).json(draft))
            .await?;
        Ok(response.json::<Task>().await?)
    }

    #[instrument(skip(self, current, text), fields(id = current.id))]
    async fn update_text(&self, current: &Task, text: &str) -> Result<Task, PersistenceError> {
        let url = self.task_url(current.id);
        let body = TextPatch { text };
        let response = self
            .api
            .send(|client| match self.update_method {
                UpdateMethod::Put => client.put(&url).json(&body),
                UpdateMethod::Patch => client.patch(&url).json(&body),
            })
            .await
            .map_err(not_found_as(current.id))?;
        Ok(response.json::<Task>().await?)
    }

    #[instrument(skip(self, current), fields(id = current.id))]
    async fn toggle(&self, current: &Task) -> Result<Task, PersistenceError> {
        let response = match self.toggle_style {
            ToggleStyle::Route => {
                let url = self.api.url(&format!("/todos/{}/toggle", current.id));
                self.api.send(|client| client.patch(&url)).await
            }
            ToggleStyle::Patch => {
                let url = self.task_url(current.id);
                let body = CompletedPatch {
                    completed: !current.completed,
                };
                self.api
                    .send(|client| client.patch(&url).json(&body))
                    .await
            }
        }
        .map_err(not_found_as(current.id))?;
        Ok(response.json::<Task>().await?)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: TaskId) -> Result<(), PersistenceError> {
        let url = self.task_url(id);
        self.api
            .send(|client| client.delete(&url))
            .await
            .map_err(not_found_as(id))?;
        Ok(())
    }
}
