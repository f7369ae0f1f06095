use thiserror::Error;

use crate::task::TaskId;

/// One rejected input field and the message to show next to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Input rejected before any I/O was attempted.
#[derive(Error, Debug, Clone, PartialEq, Eq, Default)]
#[error("{}", join_messages(.fields))]
pub struct ValidationError {
    pub fields: Vec<FieldError>,
}

impl ValidationError {
    pub fn field(field: &'static str, message: impl Into<String>) -> Self {
        let mut err = Self::default();
        err.push(field, message);
        err
    }

    pub fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.fields.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn message_for(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.field == field)
            .map(|f| f.message.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// `Ok(())` when nothing was pushed, otherwise the collected errors.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

fn join_messages(fields: &[FieldError]) -> String {
    if fields.is_empty() {
        return "invalid input".to_string();
    }
    fields
        .iter()
        .map(|f| f.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Storage or network failure talking to the backing store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("storage failure: {0}")]
    Storage(String),

    #[error("network failure: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("server responded {status}: {message}")]
    Http { status: u16, message: String },

    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("session expired; please log in again")]
    Unauthorized,

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for PersistenceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PersistenceError::Timeout
        } else if err.is_decode() {
            PersistenceError::Decode(err.to_string())
        } else {
            PersistenceError::Network(err.to_string())
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
