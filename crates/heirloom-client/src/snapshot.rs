use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::address::Address;
use crate::error::HeirloomError;
use crate::request::{ContractCall, RequestBuilder, ViewCall};
use crate::rpc::LedgerRpc;
use crate::simulate::{PreflightSimulator, SimulationOutcome};
use crate::value::ScValue;

/// Decoded contract fields as seen by one refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractState {
    pub owner: Address,
    pub beneficiary: Address,
    pub check_in_period: u64,
    /// Unix seconds of the most recent check-in.
    pub last_check_in: u64,
    pub balance: i128,
}

impl ContractState {
    /// Unix second after which the beneficiary may claim.
    #[must_use]
    pub fn deadline(&self) -> u64 {
        self.last_check_in.saturating_add(self.check_in_period)
    }

    #[must_use]
    pub fn is_claimable_at(&self, unix_seconds: u64) -> bool {
        unix_seconds > self.deadline()
    }

    #[must_use]
    pub fn last_check_in_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::try_from(self.last_check_in).ok()?, 0)
    }

    #[must_use]
    pub fn deadline_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::try_from(self.deadline()).ok()?, 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ContractSnapshot {
    Uninitialized,
    Initialized(ContractState),
}

impl ContractSnapshot {
    #[must_use]
    pub fn state(&self) -> Option<&ContractState> {
        match self {
            Self::Initialized(state) => Some(state),
            Self::Uninitialized => None,
        }
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        matches!(self, Self::Initialized(_))
    }
}

pub struct SnapshotReader {
    rpc: Arc<dyn LedgerRpc>,
    simulator: PreflightSimulator,
    builder: RequestBuilder,
}

impl SnapshotReader {
    pub fn new(rpc: Arc<dyn LedgerRpc>, builder: RequestBuilder) -> Self {
        Self {
            simulator: PreflightSimulator::new(rpc.clone()),
            rpc,
            builder,
        }
    }

    /// Reads the descriptive fields and the balance concurrently and merges
    /// them into one snapshot.
    pub async fn read(&self, caller: &Address) -> Result<ContractSnapshot, HeirloomError> {
        let account = self
            .rpc
            .load_account_state(caller)
            .await
            .map_err(|error| HeirloomError::Rpc(error.to_string()))?;
        let info_request =
            self.builder
                .prepare(&ContractCall::View(ViewCall::GetInfo), caller, &account)?;
        let balance_request =
            self.builder
                .prepare(&ContractCall::View(ViewCall::GetBalance), caller, &account)?;

        let (info, balance) = futures::future::join(
            self.simulator.simulate(&info_request),
            self.simulator.simulate(&balance_request),
        )
        .await;

        let snapshot = merge_reads(info, balance).inspect_err(|error| {
            if matches!(error, HeirloomError::PartialRefreshFailed(_)) {
                tracing::warn!(caller = %caller, reason = %error, "balance read failed after info read");
            }
        })?;
        tracing::info!(
            caller = %caller,
            initialized = snapshot.is_initialized(),
            "snapshot read"
        );
        Ok(snapshot)
    }

    pub async fn can_claim(&self, caller: &Address) -> Result<bool, HeirloomError> {
        let request = self
            .builder
            .build(self.rpc.as_ref(), &ContractCall::View(ViewCall::CanClaim), caller)
            .await?;
        match self.simulator.simulate(&request).await? {
            SimulationOutcome::Success(call) => call.return_value.as_bool().ok_or_else(|| {
                HeirloomError::Rpc(format!(
                    "can_claim returned {} instead of bool",
                    call.return_value.type_name()
                ))
            }),
            SimulationOutcome::Failure(reason) => Err(reason.into()),
        }
    }
}

fn merge_reads(
    info: Result<SimulationOutcome, HeirloomError>,
    balance: Result<SimulationOutcome, HeirloomError>,
) -> Result<ContractSnapshot, HeirloomError> {
    let info = match info? {
        SimulationOutcome::Success(call) => call,
        SimulationOutcome::Failure(reason) => {
            tracing::debug!(reason = %reason, "info read failed, contract treated as uninitialized");
            return Ok(ContractSnapshot::Uninitialized);
        }
    };
    let (owner, beneficiary, check_in_period, last_check_in) = decode_info(&info.return_value)?;

    let balance = match balance {
        Ok(SimulationOutcome::Success(call)) => call.return_value.as_i128().ok_or_else(|| {
            HeirloomError::PartialRefreshFailed(format!(
                "get_balance returned {} instead of i128",
                call.return_value.type_name()
            ))
        })?,
        Ok(SimulationOutcome::Failure(reason)) => {
            return Err(HeirloomError::PartialRefreshFailed(reason.to_string()));
        }
        Err(error) => return Err(HeirloomError::PartialRefreshFailed(error.to_string())),
    };

    Ok(ContractSnapshot::Initialized(ContractState {
        owner,
        beneficiary,
        check_in_period,
        last_check_in,
        balance,
    }))
}

/// `get_info` returns `(owner, beneficiary, check_in_period, last_check_in)`.
fn decode_info(value: &ScValue) -> Result<(Address, Address, u64, u64), HeirloomError> {
    let malformed = || HeirloomError::Rpc(format!("get_info returned unexpected {value:?}"));
    let fields = value.as_vec().ok_or_else(malformed)?;
    let [owner, beneficiary, period, last_check_in] = fields else {
        return Err(malformed());
    };
    Ok((
        owner.as_address().cloned().ok_or_else(malformed)?,
        beneficiary.as_address().cloned().ok_or_else(malformed)?,
        period.as_u64().ok_or_else(malformed)?,
        last_check_in.as_u64().ok_or_else(malformed)?,
    ))
}
