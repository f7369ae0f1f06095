use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::AuthSession;
use crate::error::PersistenceError;

/// Shared HTTP plumbing: base URL, transport timeout, bearer token and the
/// one-shot refresh on 401.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    session: Option<Arc<AuthSession>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        session: Option<Arc<AuthSession>>,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn session(&self) -> Option<&Arc<AuthSession>> {
        self.session.as_ref()
    }

    /// Sends without credentials; used by login, registration and refresh.
    pub async fn send_anonymous<F>(&self, build: F) -> Result<Response, PersistenceError>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let response = build(&self.client).send().await?;
        check_status(response).await
    }

    /// Sends with the session's bearer token. A 401 triggers one refresh and
    /// one retry; if that is impossible the session is logged out.
    pub async fn send<F>(&self, build: F) -> Result<Response, PersistenceError>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let response = self.attempt(&build).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check_status(response).await;
        }

        let Some(session) = self.session.as_ref() else {
            return Err(PersistenceError::Unauthorized);
        };

        if let Err(err) = self.refresh(session).await {
            warn!(error = %err, "token refresh failed; logging out");
            session.logout();
            return Err(PersistenceError::Unauthorized);
        }

        let retried = self.attempt(&build).await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            warn!("request still unauthorized after refresh; logging out");
            session.logout();
            return Err(PersistenceError::Unauthorized);
        }
        check_status(retried).await
    }

    async fn attempt<F>(&self, build: &F) -> Result<Response, PersistenceError>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let mut request = build(&self.client);
        if let Some(token) = self.session.as_ref().and_then(|s| s.access_token()) {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        debug!(status = response.status().as_u16(), url = %response.url(), "response");
        Ok(response)
    }

    /// Exchanges the stored refresh token for a new access token.
    pub async fn refresh(&self, session: &AuthSession) -> Result<(), PersistenceError> {
        let Some(refresh_token) = session.refresh_token() else {
            return Err(PersistenceError::Unauthorized);
        };

        info!("refreshing access token");
        let url = self.url("/auth/refresh");
        let response = self
            .send_anonymous(|client| {
                client.post(&url).json(&RefreshRequest {
                    refresh_token: &refresh_token,
                })
            })
            .await?;
        let body: RefreshResponse = response.json().await?;
        session.set_access_token(&body.access_token);
        Ok(())
    }
}

/// Maps non-success statuses to `PersistenceError::Http`, preferring the
/// server's `message` field for the text. A 401 stays `Http` here; only
/// authenticated sends turn it into `Unauthorized`.
pub async fn check_status(response: Response) -> Result<Response, PersistenceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });

    Err(PersistenceError::Http {
        status: status.as_u16(),
        message,
    })
}
