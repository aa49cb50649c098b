//! The ledger RPC boundary: simulation, submission, status lookup and
//! account loading. Everything the pipeline needs from the network goes
//! through [`LedgerRpc`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::request::OperationRequest;
use crate::signer::SignedEnvelope;
use crate::value::ScValue;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("api error ({status}) {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("submission rejected with status {status}: {detail}")]
    Rejected { status: String, detail: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub sequence: i64,
}

/// Resource figures returned by a successful simulation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEstimate {
    pub min_resource_fee: u64,
    #[serde(default)]
    pub cpu_instructions: u64,
    #[serde(default)]
    pub read_bytes: u32,
    #[serde(default)]
    pub write_bytes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SimulationResponse {
    Success {
        return_value: ScValue,
        resources: ResourceEstimate,
        #[serde(default)]
        transaction_data: String,
    },
    Error {
        diagnostic: String,
    },
}

/// Opaque identifier the ledger returns for an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionHandle(String);

impl SubmissionHandle {
    #[must_use]
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubmissionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransactionStatus {
    NotFound,
    Success {
        #[serde(default)]
        ledger: Option<u32>,
    },
    Failed {
        #[serde(default)]
        result_code: Option<String>,
    },
}

#[async_trait]
pub trait LedgerRpc: Send + Sync {
    async fn load_account_state(&self, account: &Address) -> Result<AccountState, RpcError>;

    /// Evaluates the request against current ledger state without applying it.
    async fn simulate(&self, request: &OperationRequest) -> Result<SimulationResponse, RpcError>;

    /// Accepted submissions return a handle. A rejection at submit time is
    /// [`RpcError::Rejected`].
    async fn submit(&self, envelope: &SignedEnvelope) -> Result<SubmissionHandle, RpcError>;

    async fn get_status(&self, handle: &SubmissionHandle) -> Result<TransactionStatus, RpcError>;
}
