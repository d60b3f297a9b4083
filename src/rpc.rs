//! Remote procedure client for the policy, spend and run store
//!
//! Calls PostgREST-style stored procedures at `POST {url}/rest/v1/rpc/<fn>`
//! with the service key sent both as `apikey` and as a bearer token.
//! Set-returning procedures answer with a JSON array; only the first row is
//! used.

use crate::accounting::{
    PolicyStore, RunCompletion, RunLedger, RunStart, SpendCapStatus, StoreError,
};
use crate::policy::OrgPolicy;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for the store's stored procedures
pub struct RpcStore {
    client: Client,
    base_url: String,
    service_key: String,
}

impl RpcStore {
    pub fn new(base_url: &str, service_key: impl Into<String>) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.into(),
        })
    }

    async fn call<P: Serialize + ?Sized>(&self, function: &str, params: &P) -> Result<Value, StoreError> {
        debug!(function, "Calling store procedure");

        let response = self
            .client
            .post(format!("{}/rest/v1/rpc/{function}", self.base_url))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .json(params)
            .send()
            .await
            .map_err(|e| StoreError::Request(format!("{function}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Request(format!("{function}: {e}")))?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|e| StoreError::InvalidResponse(format!("{function}: {e}")))
    }

    /// First row of a set-returning procedure, or the value itself
    fn first_row<T: DeserializeOwned>(value: Value) -> Result<Option<T>, StoreError> {
        let row = match value {
            Value::Null => return Ok(None),
            Value::Array(rows) => match rows.into_iter().next() {
                Some(row) => row,
                None => return Ok(None),
            },
            other => other,
        };
        serde_json::from_value(row)
            .map(Some)
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl PolicyStore for RpcStore {
    async fn get_org_policy(&self, org_id: &str) -> Result<Option<OrgPolicy>, StoreError> {
        let value = self
            .call("get_org_llm_policy", &json!({ "p_org_id": org_id }))
            .await?;
        Self::first_row(value)
    }

    async fn check_spend_cap(&self, org_id: &str) -> Result<Option<SpendCapStatus>, StoreError> {
        let value = self
            .call("check_ai_spend_cap", &json!({ "p_org_id": org_id }))
            .await?;
        Self::first_row(value)
    }
}

#[async_trait]
impl RunLedger for RpcStore {
    async fn start_run(&self, run: &RunStart) -> Result<String, StoreError> {
        let params = json!({
            "p_org_id": run.org_id,
            "p_user_id": run.user_id,
            "p_feature": run.feature,
            "p_provider": run.provider,
            "p_model": run.model,
            "p_metadata": run.metadata,
        });
        let value = self.call("start_ai_run", &params).await?;

        match Self::first_row::<Value>(value)? {
            Some(Value::String(id)) => Ok(id),
            Some(Value::Object(row)) => row
                .get("id")
                .or_else(|| row.get("run_id"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| StoreError::InvalidResponse("start_ai_run row has no id".into())),
            _ => Err(StoreError::InvalidResponse(
                "start_ai_run returned no run id".into(),
            )),
        }
    }

    async fn complete_run(&self, completion: &RunCompletion) -> Result<(), StoreError> {
        let params = json!({
            "p_run_id": completion.run_id,
            "p_status": completion.status,
            "p_input_tokens": completion.usage.map(|u| u.input_tokens),
            "p_output_tokens": completion.usage.map(|u| u.output_tokens),
            "p_error_message": completion.error_message,
        });
        self.call("complete_ai_run", &params).await?;
        Ok(())
    }
}
