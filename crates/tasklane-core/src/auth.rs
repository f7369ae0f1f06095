use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::{StoreError, ValidationError};
use crate::http::ApiClient;
use crate::storage::{ACCESS_TOKEN_KEY, KeyValueStore, REFRESH_TOKEN_KEY};

const EMAIL_PATTERN: &str = r"\S+@\S+\.\S+";
const PASSWORD_MIN: usize = 6;
const PASSWORD_MAX: usize = 30;
const AGE_MAX: i64 = 150;

/// Access and refresh tokens kept in device-local storage.
pub struct AuthSession {
    storage: Arc<dyn KeyValueStore>,
}

impl AuthSession {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self { storage }
    }

    pub fn access_token(&self) -> Option<String> {
        self.read(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read(REFRESH_TOKEN_KEY)
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }

    pub fn set_access_token(&self, token: &str) {
        self.write(ACCESS_TOKEN_KEY, token);
    }

    pub fn store_tokens(&self, access_token: &str, refresh_token: &str) {
        self.write(ACCESS_TOKEN_KEY, access_token);
        self.write(REFRESH_TOKEN_KEY, refresh_token);
    }

    #[instrument(skip(self))]
    pub fn logout(&self) {
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            if let Err(err) = self.storage.remove_item(key) {
                warn!(key, error = %format!("{err:#}"), "failed clearing token");
            }
        }
        info!("session cleared");
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.storage.get_item(key) {
            Ok(value) => value.filter(|v| !v.trim().is_empty()),
            Err(err) => {
                warn!(key, error = %format!("{err:#}"), "failed reading token");
                None
            }
        }
    }

    fn write(&self, key: &str, value: &str) {
        if let Err(err) = self.storage.set_item(key, value) {
            warn!(key, error = %format!("{err:#}"), "failed saving token");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: u64,
    pub email: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<i64>,
}

impl Registration {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut err = ValidationError::default();
        check_email(&self.email, &mut err);
        check_password("password", &self.password, &mut err);
        if let Some(age) = self.age
            && !(0..=AGE_MAX).contains(&age)
        {
            err.push("age", format!("age must be between 0 and {AGE_MAX}"));
        }
        err.into_result()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Login {
    pub email: String,
    pub password: String,
}

impl Login {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut err = ValidationError::default();
        check_email(&self.email, &mut err);
        if self.password.is_empty() {
            err.push("password", "password is required");
        }
        err.into_result()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChange {
    pub old_password: String,
    pub new_password: String,
}

impl PasswordChange {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut err = ValidationError::default();
        if self.old_password.is_empty() {
            err.push("oldPassword", "current password is required");
        }
        check_password("newPassword", &self.new_password, &mut err);
        err.into_result()
    }
}

fn email_regex() -> Result<&'static Regex, &'static regex::Error> {
    static EMAIL_RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    EMAIL_RE.get_or_init(|| Regex::new(EMAIL_PATTERN)).as_ref()
}

fn check_email(email: &str, err: &mut ValidationError) {
    let email = email.trim();
    if email.is_empty() {
        err.push("email", "email is required");
        return;
    }
    match email_regex() {
        Ok(re) if re.is_match(email) => {}
        Ok(_) => err.push("email", "email format is invalid"),
        Err(regex_err) => {
            warn!(error = %regex_err, "email pattern unavailable");
            err.push("email", "email could not be checked");
        }
    }
}

fn check_password(field: &'static str, password: &str, err: &mut ValidationError) {
    let len = password.chars().count();
    if len == 0 {
        err.push(field, "password is required");
    } else if len < PASSWORD_MIN {
        err.push(
            field,
            format!("password must be at least {PASSWORD_MIN} characters"),
        );
    } else if len > PASSWORD_MAX {
        err.push(
            field,
            format!("password cannot be longer than {PASSWORD_MAX} characters"),
        );
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    user: User,
    access_token: String,
    refresh_token: String,
}

/// Auth endpoints of the task service.
pub struct AuthClient {
    api: ApiClient,
    session: Arc<AuthSession>,
}

impl AuthClient {
    pub fn new(api: ApiClient, session: Arc<AuthSession>) -> Self {
        Self { api, session }
    }

    #[instrument(skip(self, data), fields(email = %data.email))]
    pub async fn register(&self, data: &Registration) -> Result<User, StoreError> {
        data.validate()?;
        let url = self.api.url("/auth/register");
        let response = self
            .api
            .send_anonymous(|client| client.post(&url).json(data))
            .await?;
        self.accept(response).await
    }

    #[instrument(skip(self, data), fields(email = %data.email))]
    pub async fn login(&self, data: &Login) -> Result<User, StoreError> {
        data.validate()?;
        let url = self.api.url("/auth/login");
        let response = self
            .api
            .send_anonymous(|client| client.post(&url).json(data))
            .await?;
        self.accept(response).await
    }

    #[instrument(skip(self))]
    pub async fn profile(&self) -> Result<User, StoreError> {
        let url = self.api.url("/auth/me");
        let response = self.api.send(|client| client.get(&url)).await?;
        let user = response
            .json::<User>()
            .await
            .map_err(crate::error::PersistenceError::from)?;
        Ok(user)
    }

    #[instrument(skip(self, data))]
    pub async fn change_password(&self, data: &PasswordChange) -> Result<(), StoreError> {
        data.validate()?;
        let url = self.api.url("/auth/change-password");
        self.api
            .send(|client| client.post(&url).json(data))
            .await?;
        info!("password changed");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<(), StoreError> {
        self.api.refresh(&self.session).await?;
        Ok(())
    }

    pub fn logout(&self) {
        self.session.logout();
    }

    async fn accept(&self, response: reqwest::Response) -> Result<User, StoreError> {
        let body = response
            .json::<AuthResponse>()
            .await
            .map_err(crate::error::PersistenceError::from)?;
        self.session
            .store_tokens(&body.access_token, &body.refresh_token);
        info!(user_id = body.user.id, "authenticated");
        Ok(body.user)
    }
}
