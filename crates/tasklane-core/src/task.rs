use std::collections::HashSet;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub type TaskId = u64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,

    #[serde(alias = "title")]
    pub text: String,

    #[serde(default)]
    pub completed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
}

/// Payload for a task that does not exist yet; the gateway assigns the id.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub text: String,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
}

impl NewTask {
    pub fn new(text: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            text: normalize_text(text)?,
            completed: false,
            user_id: None,
        })
    }

    pub fn with_owner(mut self, user_id: Option<u64>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn into_task(self, id: TaskId, now: DateTime<Utc>) -> Task {
        Task {
            id,
            text: self.text,
            completed: self.completed,
            created_at: Some(now),
            user_id: self.user_id,
        }
    }
}

/// Trims task text and rejects it when nothing is left.
pub fn normalize_text(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::field(
            "text",
            "task text cannot be empty",
        ));
    }
    Ok(trimmed.to_string())
}

/// Checks a decoded collection: every id unique, every text non-blank.
/// One bad entry rejects the whole collection.
pub fn validate_tasks(tasks: Vec<Task>) -> anyhow::Result<Vec<Task>> {
    let mut seen = HashSet::with_capacity(tasks.len());
    for task in &tasks {
        if task.text.trim().is_empty() {
            return Err(anyhow!("task {} has empty text", task.id));
        }
        if !seen.insert(task.id) {
            return Err(anyhow!("task id {} appears more than once", task.id));
        }
    }
    Ok(tasks)
}
