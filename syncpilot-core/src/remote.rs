//! Remote-call collaborator.
//!
//! The core never talks to the backend directly; it goes through
//! [`RemoteCall`]. [`HttpRemote`] is a JSON-over-HTTP implementation used by
//! the worker binary.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};

/// Classifier attached to failures caused by the transport itself.
pub const NETWORK_ERROR_CODE: &str = "network_error";

/// Result of invoking a remote method.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RemoteOutcome {
    pub success: bool,

    /// Payload on success, or the server's current state on failure
    pub data: Option<Value>,

    pub error: Option<String>,

    /// Machine-readable error classifier (e.g. "version_conflict")
    pub code: Option<String>,
}

impl RemoteOutcome {
    pub fn ok(data: Option<Value>) -> Self {
        Self {
            success: true,
            data,
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>, code: Option<&str>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            code: code.map(str::to_string),
        }
    }

    /// Attaches the server-reported state to a failure.
    pub fn with_server_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn error_message(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.code.clone())
            .unwrap_or_else(|| "remote call failed".to_string())
    }
}

/// Performs a remote mutation.
///
/// Implementations own their retry policy for transient failures; the
/// orchestrator calls each operation once per pass.
#[async_trait]
pub trait RemoteCall: Send + Sync {
    async fn invoke(&self, method: &str, params: &Map<String, Value>) -> RemoteOutcome;
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    success: Option<bool>,
    data: Option<Value>,
    error: Option<String>,
    code: Option<String>,
}

/// Calls `POST {base_url}/{method}` with the params as the JSON body.
#[derive(Clone)]
pub struct HttpRemote {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(SyncError::Config("remote base URL must not be empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { base_url, client })
    }

    pub fn endpoint(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method.trim_start_matches('/'))
    }
}

/// Default classifier for HTTP statuses that carry no explicit code.
fn status_code_classifier(status: StatusCode) -> Option<&'static str> {
    match status {
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => Some("version_conflict"),
        StatusCode::NOT_FOUND => Some("not_found"),
        StatusCode::GONE => Some("deleted"),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Some("timeout"),
        s if s.is_server_error() => Some("server_unavailable"),
        _ => None,
    }
}

#[async_trait]
impl RemoteCall for HttpRemote {
    async fn invoke(&self, method: &str, params: &Map<String, Value>) -> RemoteOutcome {
        let url = self.endpoint(method);
        debug!("POST {}", url);

        let response = match self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .json(params)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Request to {} failed: {}", url, e);
                return RemoteOutcome::failure(e.to_string(), Some(NETWORK_ERROR_CODE));
            }
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body: Option<ResponseBody> = serde_json::from_str(&text).ok();

        if status.is_success() {
            return match body {
                Some(ResponseBody {
                    success: Some(false),
                    data,
                    error,
                    code,
                }) => RemoteOutcome {
                    success: false,
                    data,
                    error: error.or_else(|| Some(format!("{} reported failure", method))),
                    code,
                },
                Some(body) => RemoteOutcome::ok(body.data),
                None if text.trim().is_empty() => RemoteOutcome::ok(None),
                None => RemoteOutcome::ok(serde_json::from_str(&text).ok()),
            };
        }

        let (data, error, code) = match body {
            Some(body) => (body.data, body.error, body.code),
            None => (None, None, None),
        };
        RemoteOutcome {
            success: false,
            data,
            error: error.or_else(|| Some(format!("HTTP {}", status))),
            code: code.or_else(|| status_code_classifier(status).map(str::to_string)),
        }
    }
}
