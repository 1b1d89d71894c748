// SPDX-License-Identifier: MIT
//! External time-tracking API client.
//!
//! [`TrackerApi`] is the seam the executor and workspace cache call through;
//! [`HttpTrackerClient`] is the reqwest implementation. Every operation takes
//! the calling workspace's installation token — the client itself is
//! stateless and shared across workspaces.
//!
//! 429 and 5xx responses surface as distinct [`ApiError`] variants so the
//! executor's backoff logic can react to them.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::retry::RetryDecision;

/// Page size for list endpoints.
pub const PAGE_SIZE: usize = 200;

/// Header carrying the workspace installation token.
const TOKEN_HEADER: &str = "X-Addon-Token";

/// Methods permitted for generic `openapi_call` actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMethod {
    Get,
    Post,
}

impl std::fmt::Display for CallMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallMethod::Get => write!(f, "GET"),
            CallMethod::Post => write!(f, "POST"),
        }
    }
}

/// Error surface for outbound API calls.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("rate limited (retry-after {retry_after_ms:?} ms)")]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("server error: status {status}")]
    Server { status: u16, body: String },
    #[error("request rejected: status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// Retry classification for this error.
    ///
    /// 429 is always retryable (within the attempt bound). 5xx/transport are
    /// retried only for idempotent calls — a mutating call that may have
    /// landed must not be replayed.
    pub fn retry_decision(&self, idempotent: bool) -> RetryDecision {
        match self {
            ApiError::RateLimited { retry_after_ms } => match retry_after_ms {
                Some(ms) => RetryDecision::RetryAfterMs(*ms),
                None => RetryDecision::Retry,
            },
            ApiError::Server { .. } | ApiError::Transport(_) if idempotent => {
                RetryDecision::Retry
            }
            _ => RetryDecision::Fatal,
        }
    }
}

/// Operations the engine needs from the external API.
///
/// Tests substitute a scripted implementation; production uses
/// [`HttpTrackerClient`].
#[async_trait]
pub trait TrackerApi: Send + Sync {
    async fn get_time_entry(
        &self,
        workspace_id: &str,
        entry_id: &str,
        token: &str,
    ) -> Result<Value, ApiError>;

    async fn update_time_entry(
        &self,
        workspace_id: &str,
        entry_id: &str,
        patch: &Value,
        token: &str,
    ) -> Result<Value, ApiError>;

    async fn list_tags(
        &self,
        workspace_id: &str,
        page: usize,
        token: &str,
    ) -> Result<Vec<Value>, ApiError>;

    async fn create_tag(
        &self,
        workspace_id: &str,
        name: &str,
        token: &str,
    ) -> Result<Value, ApiError>;

    async fn list_projects(
        &self,
        workspace_id: &str,
        page: usize,
        token: &str,
    ) -> Result<Vec<Value>, ApiError>;

    async fn list_clients(
        &self,
        workspace_id: &str,
        page: usize,
        token: &str,
    ) -> Result<Vec<Value>, ApiError>;

    async fn list_users(
        &self,
        workspace_id: &str,
        page: usize,
        token: &str,
    ) -> Result<Vec<Value>, ApiError>;

    async fn list_tasks(
        &self,
        workspace_id: &str,
        project_id: &str,
        page: usize,
        token: &str,
    ) -> Result<Vec<Value>, ApiError>;

    /// Generic call used by `openapi_call` actions. The path has already been
    /// validated against the calling workspace's prefix.
    async fn call(
        &self,
        method: CallMethod,
        path: &str,
        body: Option<&Value>,
        token: &str,
    ) -> Result<String, ApiError>;
}

// ─── Reqwest implementation ──────────────────────────────────────────────────

/// Production client over reqwest with fixed connect/read timeouts.
pub struct HttpTrackerClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTrackerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn send(
        &self,
        method: CallMethod,
        path: &str,
        body: Option<&Value>,
        token: &str,
    ) -> Result<String, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "tracker api call");
        let mut req = match method {
            CallMethod::Get => self.http.get(&url),
            CallMethod::Post => self.http.post(&url),
        };
        req = req.header(TOKEN_HEADER, token);
        if let Some(b) = body {
            req = req.json(b);
        }
        into_body(req.send().await?).await
    }

    async fn send_put(
        &self,
        path: &str,
        body: &Value,
        token: &str,
    ) -> Result<String, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(method = "PUT", %url, "tracker api call");
        let req = self.http.put(&url).header(TOKEN_HEADER, token).json(body);
        into_body(req.send().await?).await
    }

    async fn get_json(&self, path: &str, token: &str) -> Result<Value, ApiError> {
        let body = self.send(CallMethod::Get, path, None, token).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn get_array(&self, path: &str, token: &str) -> Result<Vec<Value>, ApiError> {
        match self.get_json(path, token).await? {
            Value::Array(items) => Ok(items),
            // Some endpoints wrap the page in an envelope.
            Value::Object(mut map) => match map.remove("items") {
                Some(Value::Array(items)) => Ok(items),
                _ => Ok(Vec::new()),
            },
            _ => Ok(Vec::new()),
        }
    }
}

fn paged(path: &str, page: usize) -> String {
    format!("{path}?page={page}&page-size={PAGE_SIZE}")
}

/// Map a response to its body, or the typed error for non-2xx statuses.
async fn into_body(resp: reqwest::Response) -> Result<String, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.text().await?);
    }
    if status.as_u16() == 429 {
        let retry_after_ms = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|secs| secs * 1_000);
        return Err(ApiError::RateLimited { retry_after_ms });
    }
    let body = truncate(resp.text().await.unwrap_or_default());
    if status.is_server_error() {
        Err(ApiError::Server {
            status: status.as_u16(),
            body,
        })
    } else {
        Err(ApiError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

fn truncate(body: String) -> String {
    if body.len() <= 512 {
        body
    } else {
        body.chars().take(512).collect()
    }
}

#[async_trait]
impl TrackerApi for HttpTrackerClient {
    async fn get_time_entry(
        &self,
        workspace_id: &str,
        entry_id: &str,
        token: &str,
    ) -> Result<Value, ApiError> {
        self.get_json(
            &format!("/workspaces/{workspace_id}/time-entries/{entry_id}"),
            token,
        )
        .await
    }

    async fn update_time_entry(
        &self,
        workspace_id: &str,
        entry_id: &str,
        patch: &Value,
        token: &str,
    ) -> Result<Value, ApiError> {
        let body = self
            .send_put(
                &format!("/workspaces/{workspace_id}/time-entries/{entry_id}"),
                patch,
                token,
            )
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn list_tags(
        &self,
        workspace_id: &str,
        page: usize,
        token: &str,
    ) -> Result<Vec<Value>, ApiError> {
        self.get_array(&paged(&format!("/workspaces/{workspace_id}/tags"), page), token)
            .await
    }

    async fn create_tag(
        &self,
        workspace_id: &str,
        name: &str,
        token: &str,
    ) -> Result<Value, ApiError> {
        let body = self
            .send(
                CallMethod::Post,
                &format!("/workspaces/{workspace_id}/tags"),
                Some(&serde_json::json!({ "name": name })),
                token,
            )
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn list_projects(
        &self,
        workspace_id: &str,
        page: usize,
        token: &str,
    ) -> Result<Vec<Value>, ApiError> {
        self.get_array(
            &paged(&format!("/workspaces/{workspace_id}/projects"), page),
            token,
        )
        .await
    }

    async fn list_clients(
        &self,
        workspace_id: &str,
        page: usize,
        token: &str,
    ) -> Result<Vec<Value>, ApiError> {
        self.get_array(
            &paged(&format!("/workspaces/{workspace_id}/clients"), page),
            token,
        )
        .await
    }

    async fn list_users(
        &self,
        workspace_id: &str,
        page: usize,
        token: &str,
    ) -> Result<Vec<Value>, ApiError> {
        self.get_array(&paged(&format!("/workspaces/{workspace_id}/users"), page), token)
            .await
    }

    async fn list_tasks(
        &self,
        workspace_id: &str,
        project_id: &str,
        page: usize,
        token: &str,
    ) -> Result<Vec<Value>, ApiError> {
        self.get_array(
            &paged(
                &format!("/workspaces/{workspace_id}/projects/{project_id}/tasks"),
                page,
            ),
            token,
        )
        .await
    }

    async fn call(
        &self,
        method: CallMethod,
        path: &str,
        body: Option<&Value>,
        token: &str,
    ) -> Result<String, ApiError> {
        self.send(method, path, body, token).await
    }
}
