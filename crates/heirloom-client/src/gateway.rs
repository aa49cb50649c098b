//! HTTP adapter for a ledger gateway exposing simulate, submit, transaction
//! status and account lookup as JSON routes.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::config::HeirloomConfig;
use crate::request::OperationRequest;
use crate::rpc::{
    AccountState, LedgerRpc, RpcError, SimulationResponse, SubmissionHandle, TransactionStatus,
};
use crate::signer::SignedEnvelope;

pub const SIMULATE_PATH: &str = "/v1/simulate";
pub const SUBMIT_PATH: &str = "/v1/submit";
pub const TRANSACTIONS_PATH: &str = "/v1/transactions";
pub const ACCOUNTS_PATH: &str = "/v1/accounts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitStatus {
    Pending,
    Duplicate,
    Error,
    TryAgainLater,
}

impl SubmitStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Duplicate => "duplicate",
            Self::Error => "error",
            Self::TryAgainLater => "try_again_later",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponseV1 {
    pub hash: String,
    pub status: SubmitStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_result: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountResponseV1 {
    pub id: Address,
    pub sequence: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayErrorEnvelope {
    pub error: GatewayErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct HttpLedgerClient {
    base_url: String,
    auth_token: Option<String>,
    http: reqwest::Client,
}

impl HttpLedgerClient {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| RpcError::Transport(error.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: auth_token
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            http,
        })
    }

    pub fn from_config(config: &HeirloomConfig, auth_token: Option<String>) -> Result<Self, RpcError> {
        Self::new(config.rpc_url.clone(), auth_token, config.gateway_timeout)
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<TReq, TRes>(&self, path: &str, body: &TReq) -> Result<TRes, RpcError>
    where
        TReq: Serialize + ?Sized,
        TRes: for<'de> Deserialize<'de>,
    {
        let request = self.http.post(format!("{}{}", self.base_url, path)).json(body);
        self.send(self.authorize(request)).await
    }

    async fn get_json<TRes>(&self, path: &str) -> Result<TRes, RpcError>
    where
        TRes: for<'de> Deserialize<'de>,
    {
        let request = self.http.get(format!("{}{}", self.base_url, path));
        self.send(self.authorize(request)).await
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_token.as_ref() {
            Some(token) => request.header("authorization", format!("Bearer {token}")),
            None => request,
        }
    }

    async fn send<TRes>(&self, request: reqwest::RequestBuilder) -> Result<TRes, RpcError>
    where
        TRes: for<'de> Deserialize<'de>,
    {
        let response = request
            .send()
            .await
            .map_err(|error| RpcError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let status_u16 = status.as_u16();
            let body_bytes = response
                .bytes()
                .await
                .map_err(|error| RpcError::Transport(error.to_string()))?;
            if let Ok(parsed) = serde_json::from_slice::<GatewayErrorEnvelope>(&body_bytes) {
                return Err(RpcError::Api {
                    status: status_u16,
                    code: parsed.error.code,
                    message: parsed.error.message,
                });
            }
            let text = String::from_utf8_lossy(body_bytes.as_ref()).to_string();
            return Err(RpcError::Api {
                status: status_u16,
                code: "gateway_error".to_string(),
                message: text,
            });
        }

        response
            .json::<TRes>()
            .await
            .map_err(|error| RpcError::Parse(error.to_string()))
    }
}

#[async_trait]
impl LedgerRpc for HttpLedgerClient {
    async fn load_account_state(&self, account: &Address) -> Result<AccountState, RpcError> {
        let response: AccountResponseV1 = self
            .get_json(&format!("{ACCOUNTS_PATH}/{account}"))
            .await?;
        if &response.id != account {
            return Err(RpcError::Parse(format!(
                "account lookup for {account} returned {}",
                response.id
            )));
        }
        Ok(AccountState {
            sequence: response.sequence,
        })
    }

    async fn simulate(&self, request: &OperationRequest) -> Result<SimulationResponse, RpcError> {
        self.post_json(SIMULATE_PATH, request).await
    }

    async fn submit(&self, envelope: &SignedEnvelope) -> Result<SubmissionHandle, RpcError> {
        let response: SubmitResponseV1 = self.post_json(SUBMIT_PATH, envelope).await?;
        match response.status {
            SubmitStatus::Pending | SubmitStatus::Duplicate => {
                Ok(SubmissionHandle::new(response.hash))
            }
            SubmitStatus::Error | SubmitStatus::TryAgainLater => Err(RpcError::Rejected {
                status: response.status.as_str().to_string(),
                detail: response
                    .error_result
                    .unwrap_or_else(|| format!("transaction {}", response.hash)),
            }),
        }
    }

    async fn get_status(&self, handle: &SubmissionHandle) -> Result<TransactionStatus, RpcError> {
        self.get_json(&format!("{TRANSACTIONS_PATH}/{handle}")).await
    }
}
