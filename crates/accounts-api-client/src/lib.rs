#![cfg_attr(test, allow(clippy::expect_used))]

//! HTTP client for the accounts API.
//!
//! Every endpoint decodes into a typed result at this boundary: transport, status and decode
//! failures surface as [`AccountsApiError`], while the API's "HTTP 200 with an `error` field"
//! convention surfaces as [`MutationOutcome::Rejected`] or [`PlanLookup::Rejected`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone)]
pub struct AccountsApiClientConfig {
    pub base_url: String,
    /// Per-request timeout. `None` lets a hung call wait forever.
    pub timeout_ms: Option<u64>,
}

impl AccountsApiClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: None,
        }
    }
}

impl Default for AccountsApiClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

#[derive(Debug, Clone)]
pub struct AccountsApiClient {
    base_url: String,
    timeout: Option<Duration>,
    http: reqwest::Client,
}

#[derive(Debug, Error)]
pub enum AccountsApiError {
    #[error("accounts_client_base_url_missing")]
    BaseUrlMissing,
    #[error("accounts_client_invalid_path")]
    InvalidPath,
    #[error("accounts_request_failed:{message}")]
    Request { message: String },
    #[error("accounts_read_failed:{message}")]
    Read { message: String },
    #[error("accounts_http_{status}:{body}")]
    Http { status: StatusCode, body: String },
    #[error("accounts_json_decode_failed:{message}")]
    Decode { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub workflow_id: String,
    #[serde(default)]
    pub run_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowType {
    #[serde(default)]
    pub name: String,
}

/// One open account workflow as reported by `GET /api/accounts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub execution: WorkflowExecution,
    #[serde(rename = "type", default)]
    pub workflow_type: WorkflowType,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub execution_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<i32>,
    #[serde(default)]
    pub memo: serde_json::Value,
}

impl AccountRecord {
    #[must_use]
    pub fn workflow_id(&self) -> &str {
        self.execution.workflow_id.as_str()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListAccountsResponse {
    #[serde(default)]
    executions: Option<Vec<AccountRecord>>,
}

impl ListAccountsResponse {
    #[must_use]
    pub fn new(executions: Vec<AccountRecord>) -> Self {
        Self {
            executions: Some(executions),
        }
    }

    /// Missing and `null` result sets both read as empty.
    #[must_use]
    pub fn into_accounts(self) -> Vec<AccountRecord> {
        self.executions.unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanLookup {
    Plan(String),
    Rejected { message: String },
}

#[derive(Debug, Deserialize)]
struct PlanLookupWire {
    #[serde(default)]
    plan: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl From<PlanLookupWire> for PlanLookup {
    fn from(wire: PlanLookupWire) -> Self {
        if let Some(message) = wire.error.and_then(non_empty_string) {
            return Self::Rejected { message };
        }
        match wire.plan {
            Some(plan) => Self::Plan(plan),
            None => Self::Rejected {
                message: "plan missing from response".to_string(),
            },
        }
    }
}

/// The two subscription tiers an account can be moved between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Trial,
    Premium,
}

impl PlanTier {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Premium => "premium",
        }
    }

    /// Target tier for a toggle. Only `trial` moves up; every other current value moves to
    /// `trial`.
    #[must_use]
    pub fn toggle_target(current_plan: &str) -> Self {
        if current_plan == Self::Trial.as_str() {
            Self::Premium
        } else {
            Self::Trial
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateAccountRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpgradeAccountRequest {
    pub account: String,
    pub actor: String,
    pub to: PlanTier,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteAccountRequest {
    pub account: String,
    pub actor: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    Applied { valid_from: Option<DateTime<Utc>> },
    Rejected { message: String },
}

impl MutationOutcome {
    /// Any 200 body is a success unless it is an object carrying a non-empty `error` string.
    #[must_use]
    pub fn from_body(bytes: &[u8]) -> Self {
        let Ok(body) = serde_json::from_slice::<serde_json::Value>(bytes) else {
            return Self::Applied { valid_from: None };
        };
        if let Some(message) = body
            .get("error")
            .and_then(serde_json::Value::as_str)
            .and_then(|value| non_empty_string(value.to_string()))
        {
            return Self::Rejected { message };
        }
        let valid_from = body
            .get("valid_from")
            .and_then(serde_json::Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|value| value.with_timezone(&Utc));
        Self::Applied { valid_from }
    }

    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// The remote operations the console depends on.
#[async_trait]
pub trait AccountsApi: Send + Sync {
    async fn list_accounts(&self) -> Result<ListAccountsResponse, AccountsApiError>;

    async fn account_plan(&self, workflow_id: &str) -> Result<PlanLookup, AccountsApiError>;

    async fn create_account(
        &self,
        request: &CreateAccountRequest,
    ) -> Result<MutationOutcome, AccountsApiError>;

    async fn upgrade_account(
        &self,
        request: &UpgradeAccountRequest,
    ) -> Result<MutationOutcome, AccountsApiError>;

    async fn delete_account(
        &self,
        request: &DeleteAccountRequest,
    ) -> Result<MutationOutcome, AccountsApiError>;
}

impl AccountsApiClient {
    pub fn new(config: AccountsApiClientConfig) -> Result<Self, AccountsApiError> {
        let base_url = normalize_base_url(&config.base_url)?;
        Ok(Self {
            base_url,
            timeout: config.timeout_ms.map(|ms| Duration::from_millis(ms.max(1))),
            http: reqwest::Client::new(),
        })
    }

    pub fn from_base_url(base_url: Option<&str>) -> Result<Self, AccountsApiError> {
        Self::new(AccountsApiClientConfig::new(
            base_url.unwrap_or(DEFAULT_BASE_URL),
        ))
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.base_url, trimmed))
        }
    }

    #[must_use]
    pub fn accounts_path() -> &'static str {
        "/api/accounts"
    }

    #[must_use]
    pub fn plan_path() -> &'static str {
        "/api/plan"
    }

    #[must_use]
    pub fn upgrade_path() -> &'static str {
        "/api/account/upgrade"
    }

    #[must_use]
    pub fn delete_path() -> &'static str {
        "/api/account/delete"
    }

    async fn send_get(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<reqwest::Response, AccountsApiError> {
        let url = self.endpoint(path).ok_or(AccountsApiError::InvalidPath)?;
        let mut request = self
            .http
            .get(url.as_str())
            .header("x-request-id", request_id());
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        request
            .send()
            .await
            .map_err(|error| AccountsApiError::Request {
                message: error.to_string(),
            })
    }

    async fn send_post<Req>(
        &self,
        path: &str,
        payload: &Req,
    ) -> Result<reqwest::Response, AccountsApiError>
    where
        Req: Serialize + ?Sized,
    {
        let url = self.endpoint(path).ok_or(AccountsApiError::InvalidPath)?;
        let mut request = self
            .http
            .post(url.as_str())
            .header("x-request-id", request_id())
            .json(payload);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        request
            .send()
            .await
            .map_err(|error| AccountsApiError::Request {
                message: error.to_string(),
            })
    }

    async fn post_mutation<Req>(
        &self,
        path: &str,
        payload: &Req,
    ) -> Result<MutationOutcome, AccountsApiError>
    where
        Req: Serialize + ?Sized,
    {
        let response = self.send_post(path, payload).await?;
        let bytes = read_success_body(response).await?;
        Ok(MutationOutcome::from_body(&bytes))
    }
}

#[async_trait]
impl AccountsApi for AccountsApiClient {
    async fn list_accounts(&self) -> Result<ListAccountsResponse, AccountsApiError> {
        let response = self.send_get(Self::accounts_path(), &[]).await?;
        let bytes = read_success_body(response).await?;
        let accounts = decode_optional_json::<ListAccountsResponse>(&bytes)?.unwrap_or_default();
        tracing::debug!(
            accounts = accounts.executions.as_ref().map_or(0, Vec::len),
            "listed account workflows"
        );
        Ok(accounts)
    }

    async fn account_plan(&self, workflow_id: &str) -> Result<PlanLookup, AccountsApiError> {
        let response = self
            .send_get(Self::plan_path(), &[("account", workflow_id)])
            .await?;
        let bytes = read_success_body(response).await?;
        let wire = serde_json::from_slice::<PlanLookupWire>(&bytes).map_err(|error| {
            AccountsApiError::Decode {
                message: error.to_string(),
            }
        })?;
        Ok(PlanLookup::from(wire))
    }

    async fn create_account(
        &self,
        request: &CreateAccountRequest,
    ) -> Result<MutationOutcome, AccountsApiError> {
        self.post_mutation(Self::accounts_path(), request).await
    }

    async fn upgrade_account(
        &self,
        request: &UpgradeAccountRequest,
    ) -> Result<MutationOutcome, AccountsApiError> {
        self.post_mutation(Self::upgrade_path(), request).await
    }

    async fn delete_account(
        &self,
        request: &DeleteAccountRequest,
    ) -> Result<MutationOutcome, AccountsApiError> {
        self.post_mutation(Self::delete_path(), request).await
    }
}

pub fn format_http_error(status: StatusCode, body: &[u8]) -> AccountsApiError {
    let body = non_empty_string(String::from_utf8_lossy(body).to_string())
        .unwrap_or_else(|| "<empty>".to_string());
    AccountsApiError::Http { status, body }
}

fn request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

fn normalize_base_url(base_url: &str) -> Result<String, AccountsApiError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(AccountsApiError::BaseUrlMissing);
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

async fn read_success_body(response: reqwest::Response) -> Result<Vec<u8>, AccountsApiError> {
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| AccountsApiError::Read {
            message: error.to_string(),
        })?;

    if !status.is_success() {
        return Err(format_http_error(status, &bytes));
    }
    Ok(bytes.to_vec())
}

fn decode_optional_json<T>(bytes: &[u8]) -> Result<Option<T>, AccountsApiError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice::<Option<T>>(bytes).map_err(|error| AccountsApiError::Decode {
        message: error.to_string(),
    })
}

/// Timestamps are display-only, so a value that is not an RFC 3339 string reads as absent
/// instead of failing the whole listing.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(raw)) => match DateTime::parse_from_rfc3339(&raw) {
            Ok(parsed) => Some(parsed.with_timezone(&Utc)),
            Err(error) => {
                tracing::debug!(
                    raw = %raw,
                    error = %error,
                    "ignoring unparseable account timestamp"
                );
                None
            }
        },
        Some(other) => {
            tracing::debug!(value = %other, "ignoring non-string account timestamp");
            None
        }
    })
}

fn non_empty_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
