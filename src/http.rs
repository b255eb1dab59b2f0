//! Remote completion store over HTTP.
//!
//! Sessions are created with `POST {base}/sessions` and finalized with
//! `PATCH {base}/sessions/{id}`. Calls are blocking from the caller's point of
//! view: the store owns a tokio runtime and is meant to run on the
//! [`CompletionRecorder`](crate::CompletionRecorder) worker thread, never on
//! the tracking path. 429 and 5xx responses are retried with backoff.

use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;

use crate::{CompletionRecord, CompletionStore, Result, RouteSummary, TrackerError};

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 8_000;
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Serialize)]
struct CreateSessionBody<'a> {
    route_id: &'a str,
    route_name: &'a str,
    planned_distance_km: f64,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct FinalizeSessionBody<'a> {
    status: &'static str,
    duration_minutes: u64,
    distance_km: f64,
    notes: Option<&'a str>,
    /// `[lat, lng]` pairs
    path: Vec<[f64; 2]>,
}

/// Backends return either numeric or string ids
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RemoteId {
    Text(String),
    Number(i64),
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    id: RemoteId,
}

fn http_error(message: impl Into<String>) -> TrackerError {
    TrackerError::Persistence {
        message: message.into(),
    }
}

/// Exponential backoff for the given retry attempt (1-based), capped.
fn backoff_for(attempt: u32) -> Duration {
    let ms = BASE_BACKOFF_MS.saturating_mul(1 << attempt.saturating_sub(1).min(16));
    Duration::from_millis(ms.min(MAX_BACKOFF_MS))
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Completion store that writes to a remote backend.
pub struct RemoteCompletionStore {
    runtime: Runtime,
    client: Client,
    base_url: String,
    auth_header: String,
}

impl RemoteCompletionStore {
    /// Create a store for `base_url` authenticating with `api_key`.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let auth = base64::engine::general_purpose::STANDARD.encode(format!("API_KEY:{}", api_key));

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| http_error(format!("Failed to create HTTP client: {}", e)))?;
        let runtime =
            Runtime::new().map_err(|e| http_error(format!("Failed to create runtime: {}", e)))?;

        Ok(Self {
            runtime,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header: format!("Basic {}", auth),
        })
    }

    fn sessions_url(&self) -> String {
        format!("{}/sessions", self.base_url)
    }

    fn session_url(&self, session_id: &str) -> String {
        format!("{}/sessions/{}", self.base_url, session_id)
    }

    /// Send a request, retrying throttled and server errors.
    async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retries = 0;
        loop {
            let response = build()
                .header("Authorization", &self.auth_header)
                .send()
                .await
                .map_err(|e| http_error(format!("Request failed: {}", e)))?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            if should_retry(status) && retries < MAX_RETRIES {
                retries += 1;
                let backoff = backoff_for(retries);
                warn!(
                    "[RemoteStore] HTTP {}, retry {} after {:?}",
                    status, retries, backoff
                );
                tokio::time::sleep(backoff).await;
                continue;
            }
            return Err(http_error(format!("HTTP {}", status)));
        }
    }
}

impl CompletionStore for RemoteCompletionStore {
    fn create_session(&mut self, route: &RouteSummary) -> Result<String> {
        let url = self.sessions_url();
        let body = CreateSessionBody {
            route_id: &route.route_id,
            route_name: &route.name,
            planned_distance_km: route.total_distance_km,
            started_at: Utc::now(),
        };

        let this = &*self;
        let created: CreateSessionResponse = this.runtime.block_on(async {
            let response = this
                .send_with_retry(|| this.client.post(&url).json(&body))
                .await?;
            response
                .json::<CreateSessionResponse>()
                .await
                .map_err(|e| http_error(format!("Invalid create response: {}", e)))
        })?;

        let id = match created.id {
            RemoteId::Text(id) => id,
            RemoteId::Number(id) => id.to_string(),
        };
        debug!("[RemoteStore] Created session {}", id);
        Ok(id)
    }

    fn finalize_session(&mut self, session_id: &str, record: &CompletionRecord) -> Result<()> {
        let url = self.session_url(session_id);
        let body = FinalizeSessionBody {
            status: record.status.as_str(),
            duration_minutes: record.duration_minutes,
            distance_km: record.distance_km,
            notes: record.notes.as_deref(),
            path: record
                .path
                .iter()
                .map(|c| [c.latitude, c.longitude])
                .collect(),
        };

        let this = &*self;
        this.runtime.block_on(async {
            this.send_with_retry(|| this.client.patch(&url).json(&body))
                .await
                .map(|_| ())
        })?;
        debug!("[RemoteStore] Finalized session {}", session_id);
        Ok(())
    }
}
