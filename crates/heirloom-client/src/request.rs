//! Operation requests: a validated contract call bound to a source account,
//! sequence number, fee tier and timeout.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address::{Address, AddressKind};
use crate::config::{FeePolicy, HeirloomConfig};
use crate::error::HeirloomError;
use crate::rpc::{AccountState, LedgerRpc};
use crate::value::ScValue;

/// Token amounts carry seven decimal places on the ledger.
pub const TOKEN_DECIMALS: u32 = 7;
const STROOPS_PER_UNIT: i128 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeTier {
    Read,
    Write,
}

impl FeeTier {
    #[must_use]
    pub fn fee(self, policy: &FeePolicy) -> u32 {
        match self {
            Self::Read => policy.read_fee(),
            Self::Write => policy.write_fee(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Initialize,
    Deposit,
    CheckIn,
    OwnerWithdraw,
    Claim,
}

impl MutationKind {
    pub const ALL: [Self; 5] = [
        Self::Initialize,
        Self::Deposit,
        Self::CheckIn,
        Self::OwnerWithdraw,
        Self::Claim,
    ];

    #[must_use]
    pub fn function_name(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Deposit => "deposit",
            Self::CheckIn => "check_in",
            Self::OwnerWithdraw => "owner_withdraw",
            Self::Claim => "claim",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.function_name())
    }
}

/// A state-changing contract call with its typed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Initialize {
        owner: Address,
        beneficiary: Address,
        check_in_period: u64,
        token: Address,
    },
    Deposit {
        from: Address,
        amount: i128,
    },
    CheckIn {
        owner: Address,
    },
    OwnerWithdraw {
        owner: Address,
    },
    Claim {
        beneficiary: Address,
    },
}

impl Mutation {
    #[must_use]
    pub fn kind(&self) -> MutationKind {
        match self {
            Self::Initialize { .. } => MutationKind::Initialize,
            Self::Deposit { .. } => MutationKind::Deposit,
            Self::CheckIn { .. } => MutationKind::CheckIn,
            Self::OwnerWithdraw { .. } => MutationKind::OwnerWithdraw,
            Self::Claim { .. } => MutationKind::Claim,
        }
    }

    #[must_use]
    pub fn args(&self) -> Vec<ScValue> {
        match self {
            Self::Initialize {
                owner,
                beneficiary,
                check_in_period,
                token,
            } => vec![
                ScValue::Address(owner.clone()),
                ScValue::Address(beneficiary.clone()),
                ScValue::U64(*check_in_period),
                ScValue::Address(token.clone()),
            ],
            Self::Deposit { from, amount } => {
                vec![ScValue::Address(from.clone()), ScValue::I128(*amount)]
            }
            Self::CheckIn { owner } | Self::OwnerWithdraw { owner } => {
                vec![ScValue::Address(owner.clone())]
            }
            Self::Claim { beneficiary } => vec![ScValue::Address(beneficiary.clone())],
        }
    }

    pub fn validate(&self) -> Result<(), HeirloomError> {
        match self {
            Self::Initialize {
                owner,
                beneficiary,
                check_in_period,
                token,
            } => {
                require_kind("owner", owner, AddressKind::Account)?;
                require_kind("beneficiary", beneficiary, AddressKind::Account)?;
                require_kind("token", token, AddressKind::Contract)?;
                if *check_in_period == 0 {
                    return Err(HeirloomError::Validation(
                        "check-in period must be greater than zero".to_string(),
                    ));
                }
                Ok(())
            }
            Self::Deposit { from, amount } => {
                require_kind("from", from, AddressKind::Account)?;
                if *amount <= 0 {
                    return Err(HeirloomError::Validation(
                        "deposit amount must be greater than zero".to_string(),
                    ));
                }
                Ok(())
            }
            Self::CheckIn { owner } | Self::OwnerWithdraw { owner } => {
                require_kind("owner", owner, AddressKind::Account)
            }
            Self::Claim { beneficiary } => {
                require_kind("beneficiary", beneficiary, AddressKind::Account)
            }
        }
    }
}

fn require_kind(field: &str, address: &Address, kind: AddressKind) -> Result<(), HeirloomError> {
    if address.kind() == kind {
        Ok(())
    } else {
        Err(HeirloomError::Validation(format!(
            "{field} must be a {kind} address, got {}",
            address.kind()
        )))
    }
}

/// Read-only contract functions, always evaluated by simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewCall {
    GetInfo,
    GetBalance,
    CanClaim,
}

impl ViewCall {
    #[must_use]
    pub fn function_name(self) -> &'static str {
        match self {
            Self::GetInfo => "get_info",
            Self::GetBalance => "get_balance",
            Self::CanClaim => "can_claim",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCall {
    Mutate(Mutation),
    View(ViewCall),
}

impl ContractCall {
    #[must_use]
    pub fn function_name(&self) -> &'static str {
        match self {
            Self::Mutate(mutation) => mutation.kind().function_name(),
            Self::View(view) => view.function_name(),
        }
    }

    #[must_use]
    pub fn args(&self) -> Vec<ScValue> {
        match self {
            Self::Mutate(mutation) => mutation.args(),
            Self::View(_) => Vec::new(),
        }
    }

    #[must_use]
    pub fn fee_tier(&self) -> FeeTier {
        match self {
            Self::Mutate(_) => FeeTier::Write,
            Self::View(_) => FeeTier::Read,
        }
    }

    pub fn validate(&self) -> Result<(), HeirloomError> {
        match self {
            Self::Mutate(mutation) => mutation.validate(),
            Self::View(_) => Ok(()),
        }
    }
}

impl From<Mutation> for ContractCall {
    fn from(value: Mutation) -> Self {
        Self::Mutate(value)
    }
}

impl From<ViewCall> for ContractCall {
    fn from(value: ViewCall) -> Self {
        Self::View(value)
    }
}

/// A fully specified, unsigned contract invocation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    request_id: Uuid,
    contract_id: Address,
    function: String,
    args: Vec<ScValue>,
    fee_tier: FeeTier,
    fee: u32,
    source: Address,
    sequence: i64,
    timeout_seconds: u64,
    network_passphrase: String,
}

impl OperationRequest {
    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    #[must_use]
    pub fn contract_id(&self) -> &Address {
        &self.contract_id
    }

    #[must_use]
    pub fn function(&self) -> &str {
        &self.function
    }

    #[must_use]
    pub fn args(&self) -> &[ScValue] {
        &self.args
    }

    #[must_use]
    pub fn fee_tier(&self) -> FeeTier {
        self.fee_tier
    }

    #[must_use]
    pub fn fee(&self) -> u32 {
        self.fee
    }

    #[must_use]
    pub fn source(&self) -> &Address {
        &self.source
    }

    #[must_use]
    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    #[must_use]
    pub fn network_passphrase(&self) -> &str {
        &self.network_passphrase
    }
}

#[derive(Debug, Clone)]
pub struct RequestBuilder {
    contract_id: Address,
    network_passphrase: String,
    fees: FeePolicy,
    timeout: Duration,
}

impl RequestBuilder {
    #[must_use]
    pub fn from_config(config: &HeirloomConfig) -> Self {
        Self {
            contract_id: config.contract_id.clone(),
            network_passphrase: config.network_passphrase.clone(),
            fees: config.fees,
            timeout: config.tx_timeout,
        }
    }

    /// Validates the call, loads the source account and binds the request to
    /// the next sequence number. Invalid arguments never reach the network.
    pub async fn build<R>(
        &self,
        rpc: &R,
        call: &ContractCall,
        source: &Address,
    ) -> Result<OperationRequest, HeirloomError>
    where
        R: LedgerRpc + ?Sized,
    {
        call.validate()?;
        let account = rpc
            .load_account_state(source)
            .await
            .map_err(|error| HeirloomError::Rpc(error.to_string()))?;
        let request = self.prepare(call, source, &account)?;
        tracing::debug!(
            function = request.function(),
            fee = request.fee(),
            sequence = request.sequence(),
            request_id = %request.request_id(),
            "request built"
        );
        Ok(request)
    }

    /// Builds a request against an already loaded account state.
    pub fn prepare(
        &self,
        call: &ContractCall,
        source: &Address,
        account: &AccountState,
    ) -> Result<OperationRequest, HeirloomError> {
        call.validate()?;
        require_kind("source", source, AddressKind::Account)?;
        let sequence = account.sequence.checked_add(1).ok_or_else(|| {
            HeirloomError::Rpc(format!("sequence overflow for account {source}"))
        })?;
        let fee_tier = call.fee_tier();

        Ok(OperationRequest {
            request_id: Uuid::now_v7(),
            contract_id: self.contract_id.clone(),
            function: call.function_name().to_string(),
            args: call.args(),
            fee_tier,
            fee: fee_tier.fee(&self.fees),
            source: source.clone(),
            sequence,
            timeout_seconds: self.timeout.as_secs(),
            network_passphrase: self.network_passphrase.clone(),
        })
    }
}

/// Parses a human token amount ("12.5") into base units.
pub fn parse_token_amount(raw: &str) -> Result<i128, HeirloomError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(HeirloomError::Validation("amount is empty".to_string()));
    }
    if trimmed.starts_with('-') || trimmed.starts_with('+') {
        return Err(HeirloomError::Validation(format!(
            "amount must be a plain positive number: {trimmed}"
        )));
    }
    let (whole, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(HeirloomError::Validation(format!("invalid amount: {trimmed}")));
    }
    if fraction.len() > TOKEN_DECIMALS as usize {
        return Err(HeirloomError::Validation(format!(
            "amount has more than {TOKEN_DECIMALS} decimal places: {trimmed}"
        )));
    }
    let all_digits = |part: &str| part.chars().all(|ch| ch.is_ascii_digit());
    if !all_digits(whole) || !all_digits(fraction) {
        return Err(HeirloomError::Validation(format!("invalid amount: {trimmed}")));
    }

    let whole_units = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<i128>()
            .map_err(|error| HeirloomError::Validation(format!("invalid amount: {error}")))?
    };
    let mut padded = fraction.to_string();
    while padded.len() < TOKEN_DECIMALS as usize {
        padded.push('0');
    }
    let fraction_units = padded
        .parse::<i128>()
        .map_err(|error| HeirloomError::Validation(format!("invalid amount: {error}")))?;

    let amount = whole_units
        .checked_mul(STROOPS_PER_UNIT)
        .and_then(|units| units.checked_add(fraction_units))
        .ok_or_else(|| HeirloomError::Validation(format!("amount out of range: {trimmed}")))?;
    if amount <= 0 {
        return Err(HeirloomError::Validation(
            "amount must be greater than zero".to_string(),
        ));
    }
    Ok(amount)
}

/// Renders base units with all seven decimals, e.g. `12.5000000`.
#[must_use]
pub fn format_token_amount(amount: i128) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let magnitude = amount.unsigned_abs();
    let per_unit = STROOPS_PER_UNIT.unsigned_abs();
    format!(
        "{sign}{}.{:0width$}",
        magnitude / per_unit,
        magnitude % per_unit,
        width = TOKEN_DECIMALS as usize
    )
}

pub fn parse_period_seconds(raw: &str) -> Result<u64, HeirloomError> {
    let trimmed = raw.trim();
    let seconds = trimmed.parse::<u64>().map_err(|error| {
        HeirloomError::Validation(format!("invalid check-in period {trimmed:?}: {error}"))
    })?;
    if seconds == 0 {
        return Err(HeirloomError::Validation(
            "check-in period must be greater than zero".to_string(),
        ));
    }
    Ok(seconds)
}
