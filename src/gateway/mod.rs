//! Remote data gateway — a thin, typed wrapper over the hosted backend's
//! CRUD and change-feed API.
//!
//! Every operation is a single network round trip. Nothing here retries:
//! failures surface immediately as [`GatewayError`] values carrying the
//! backend's human-readable message, and retry is the caller's decision.

pub mod auth;
pub mod feed;

use std::sync::{Arc, RwLock};

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::config::Config;
use crate::errors::GatewayError;
use crate::models::{List, ListPatch, NewList, NewTask, Profile, ProfilePatch, Task, TaskPatch};

pub use feed::FeedHandle;

/// Shared bearer-token slot. The auth layer writes it on every session
/// change; every data request reads it. Requests made without a token carry
/// only the service access key.
#[derive(Debug, Default)]
pub struct BearerToken(RwLock<Option<String>>);

impl BearerToken {
    pub fn set(&self, token: Option<String>) {
        *self.0.write().expect("bearer token lock") = token;
    }

    pub fn get(&self) -> Option<String> {
        self.0.read().expect("bearer token lock").clone()
    }
}

pub struct Gateway {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
    bearer: Arc<BearerToken>,
}

impl Gateway {
    pub fn new(config: &Config, bearer: Arc<BearerToken>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.service_url.clone(),
            service_key: config.service_key.clone(),
            bearer,
        }
    }

    // ── Lists ─────────────────────────────────────────────────────────

    /// All lists visible to the bearer, ascending by position. Each row
    /// carries the backend-computed `task_count` aggregate.
    pub async fn get_lists(&self) -> Result<Vec<List>, GatewayError> {
        self.get_json(&format!("{}/api/lists", self.base_url)).await
    }

    pub async fn create_list(&self, new: &NewList) -> Result<List, GatewayError> {
        self.post_json(&format!("{}/api/lists", self.base_url), new)
            .await
    }

    pub async fn update_list(&self, id: Uuid, patch: &ListPatch) -> Result<List, GatewayError> {
        self.patch_json(&format!("{}/api/lists/{}", self.base_url, id), patch)
            .await
    }

    pub async fn delete_list(&self, id: Uuid) -> Result<(), GatewayError> {
        self.delete(&format!("{}/api/lists/{}", self.base_url, id))
            .await
    }

    // ── Tasks ─────────────────────────────────────────────────────────

    /// Tasks of one list, ascending by position then creation time.
    pub async fn get_tasks(&self, list_id: Uuid) -> Result<Vec<Task>, GatewayError> {
        self.get_json(&format!("{}/api/lists/{}/tasks", self.base_url, list_id))
            .await
    }

    pub async fn create_task(&self, new: &NewTask) -> Result<Task, GatewayError> {
        self.post_json(&format!("{}/api/tasks", self.base_url), new)
            .await
    }

    pub async fn update_task(&self, id: Uuid, patch: &TaskPatch) -> Result<Task, GatewayError> {
        self.patch_json(&format!("{}/api/tasks/{}", self.base_url, id), patch)
            .await
    }

    pub async fn delete_task(&self, id: Uuid) -> Result<(), GatewayError> {
        self.delete(&format!("{}/api/tasks/{}", self.base_url, id))
            .await
    }

    /// Case-insensitive substring search over task titles, across all of
    /// the bearer's lists.
    pub async fn search_tasks(&self, query: &str) -> Result<Vec<Task>, GatewayError> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/api/tasks/search", self.base_url),
            [("q", query)],
        )
        .expect("valid search url");
        self.get_json(url.as_str()).await
    }

    // ── Profiles ──────────────────────────────────────────────────────

    /// Fetch a profile row. A missing row is `Ok(None)`, not an error — the
    /// profile may legitimately not exist yet for a fresh account.
    pub async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, GatewayError> {
        let resp = self
            .request(reqwest::Method::GET, &format!("{}/api/profiles/{}", self.base_url, id))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(decode(resp).await?))
    }

    pub async fn update_profile(
        &self,
        id: Uuid,
        patch: &ProfilePatch,
    ) -> Result<Profile, GatewayError> {
        self.patch_json(&format!("{}/api/profiles/{}", self.base_url, id), patch)
            .await
    }

    // ── Change feed ───────────────────────────────────────────────────

    /// Open the change feed for the `lists` table.
    pub fn subscribe_lists(&self) -> FeedHandle<List> {
        feed::open(
            self.client.clone(),
            format!("{}/api/feed/lists", self.base_url),
            self.service_key.clone(),
            self.bearer.clone(),
            "lists",
        )
    }

    /// Open the change feed for the `tasks` table, optionally filtered to
    /// one list's tasks.
    pub fn subscribe_tasks(&self, list_id: Option<Uuid>) -> FeedHandle<Task> {
        let url = match list_id {
            Some(id) => format!("{}/api/feed/tasks?list_id={}", self.base_url, id),
            None => format!("{}/api/feed/tasks", self.base_url),
        };
        feed::open(
            self.client.clone(),
            url,
            self.service_key.clone(),
            self.bearer.clone(),
            "tasks",
        )
    }

    // ── Request plumbing ──────────────────────────────────────────────

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, url)
            .header("apikey", &self.service_key);
        if let Some(token) = self.bearer.get() {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, GatewayError> {
        tracing::debug!(url, "gateway GET");
        decode(self.request(reqwest::Method::GET, url).send().await?).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, GatewayError> {
        tracing::debug!(url, "gateway POST");
        decode(
            self.request(reqwest::Method::POST, url)
                .json(body)
                .send()
                .await?,
        )
        .await
    }

    async fn patch_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, GatewayError> {
        tracing::debug!(url, "gateway PATCH");
        decode(
            self.request(reqwest::Method::PATCH, url)
                .json(body)
                .send()
                .await?,
        )
        .await
    }

    async fn delete(&self, url: &str) -> Result<(), GatewayError> {
        tracing::debug!(url, "gateway DELETE");
        let resp = self.request(reqwest::Method::DELETE, url).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(backend_error(resp).await)
        }
    }
}

/// Decode a 2xx response body, or turn a non-2xx response into a
/// [`GatewayError::Backend`] carrying the server's message.
pub(crate) async fn decode<T: DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, GatewayError> {
    if resp.status().is_success() {
        Ok(resp.json().await?)
    } else {
        Err(backend_error(resp).await)
    }
}

/// Extract the error message from a failed response. The backend wraps
/// messages as `{"error": "..."}`; fall back to the raw body text.
pub(crate) async fn backend_error(resp: reqwest::Response) -> GatewayError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or(body);
    GatewayError::Backend { status, message }
}
