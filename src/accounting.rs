//! Policy, spend and run accounting collaborators
//!
//! The router reads org policy and spend status from a `PolicyStore` and
//! records one audit run per provider attempt in a `RunLedger`. Both are
//! remote in production (see `rpc`); `InMemoryStore` backs the CLI when no
//! store is configured, and tests.

use crate::llm::provider::{ProviderId, TokenUsage};
use crate::policy::{Feature, OrgPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Collaborator failures; never surfaced to router callers
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Store request failed: {0}")]
    Request(String),
    #[error("Store returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid store response: {0}")]
    InvalidResponse(String),
}

/// Spend status as reported by the store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpendCapStatus {
    #[serde(default)]
    pub cap_reached: bool,
    #[serde(default)]
    pub alert_threshold_reached: bool,
    pub monthly_cap: Option<f64>,
    pub current_spend: Option<f64>,
}

/// Outcome of the pre-call spend check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpendCheck {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl SpendCheck {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Run status written when a run is closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Metadata for opening a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStart {
    pub org_id: String,
    pub user_id: String,
    pub feature: Feature,
    pub provider: ProviderId,
    pub model: String,
    pub metadata: serde_json::Value,
}

/// Final state of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunCompletion {
    pub run_id: String,
    pub status: RunStatus,
    pub usage: Option<TokenUsage>,
    pub error_message: Option<String>,
}

impl RunCompletion {
    pub fn completed(run_id: &str, usage: TokenUsage) -> Self {
        Self {
            run_id: run_id.to_string(),
            status: RunStatus::Completed,
            usage: Some(usage),
            error_message: None,
        }
    }

    pub fn failed(run_id: &str, error_message: impl Into<String>) -> Self {
        Self {
            run_id: run_id.to_string(),
            status: RunStatus::Failed,
            usage: None,
            error_message: Some(error_message.into()),
        }
    }

    pub fn cancelled(run_id: &str, error_message: impl Into<String>) -> Self {
        Self {
            run_id: run_id.to_string(),
            status: RunStatus::Cancelled,
            usage: None,
            error_message: Some(error_message.into()),
        }
    }
}

/// Source of org policy and spend status
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn get_org_policy(&self, org_id: &str) -> Result<Option<OrgPolicy>, StoreError>;

    async fn check_spend_cap(&self, org_id: &str) -> Result<Option<SpendCapStatus>, StoreError>;
}

/// Audit log of provider runs
#[async_trait]
pub trait RunLedger: Send + Sync {
    /// Open a run and return its id
    async fn start_run(&self, run: &RunStart) -> Result<String, StoreError>;

    async fn complete_run(&self, completion: &RunCompletion) -> Result<(), StoreError>;
}

/// One run as kept by the in-memory ledger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub start: RunStart,
    pub status: RunStatus,
    pub usage: Option<TokenUsage>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Process-local policy store and run ledger
#[derive(Debug, Default)]
pub struct InMemoryStore {
    policies: DashMap<String, OrgPolicy>,
    spend: DashMap<String, SpendCapStatus>,
    runs: DashMap<String, RunRecord>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_policy(&self, org_id: &str, policy: OrgPolicy) {
        self.policies.insert(org_id.to_string(), policy);
    }

    pub fn set_spend(&self, org_id: &str, status: SpendCapStatus) {
        self.spend.insert(org_id.to_string(), status);
    }

    pub fn run(&self, run_id: &str) -> Option<RunRecord> {
        self.runs.get(run_id).map(|r| r.clone())
    }

    /// All runs, oldest first
    pub fn runs(&self) -> Vec<RunRecord> {
        let mut runs: Vec<_> = self.runs.iter().map(|r| r.clone()).collect();
        runs.sort_by_key(|r| r.started_at);
        runs
    }
}

#[async_trait]
impl PolicyStore for InMemoryStore {
    async fn get_org_policy(&self, org_id: &str) -> Result<Option<OrgPolicy>, StoreError> {
        Ok(self.policies.get(org_id).map(|p| p.clone()))
    }

    async fn check_spend_cap(&self, org_id: &str) -> Result<Option<SpendCapStatus>, StoreError> {
        Ok(self.spend.get(org_id).map(|s| s.clone()))
    }
}

#[async_trait]
impl RunLedger for InMemoryStore {
    async fn start_run(&self, run: &RunStart) -> Result<String, StoreError> {
        let run_id = Uuid::new_v4().to_string();
        self.runs.insert(
            run_id.clone(),
            RunRecord {
                run_id: run_id.clone(),
                start: run.clone(),
                status: RunStatus::Running,
                usage: None,
                error_message: None,
                started_at: Utc::now(),
                completed_at: None,
            },
        );
        Ok(run_id)
    }

    async fn complete_run(&self, completion: &RunCompletion) -> Result<(), StoreError> {
        let mut record = self.runs.get_mut(&completion.run_id).ok_or_else(|| {
            StoreError::InvalidResponse(format!("unknown run {}", completion.run_id))
        })?;
        record.status = completion.status;
        record.usage = completion.usage;
        record.error_message = completion.error_message.clone();
        record.completed_at = Some(Utc::now());
        Ok(())
    }
}

/// Rejection text shown to callers when the monthly cap is hit
pub fn spend_cap_reason(status: &SpendCapStatus) -> String {
    format!(
        "Monthly spend cap of ${} reached. Current spend: ${}",
        status.monthly_cap.unwrap_or_default(),
        status.current_spend.unwrap_or_default()
    )
}
