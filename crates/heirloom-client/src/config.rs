use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::address::Address;

pub const DEFAULT_RPC_URL: &str = "https://soroban-testnet.stellar.org";
pub const DEFAULT_CONTRACT_ID: &str = "CDHBPMDG6HM6755ZRITJKGLZL7A6UY24Z4QFXZQA6ZDAATK7BYAM3RE5";
pub const DEFAULT_TOKEN_ID: &str = "CDLZFC3SYJYDZT7K67VZ75HPJVIEUVNIXF47ZG2FB2RMQQVU2HHGCYSC";
pub const DEFAULT_NETWORK: &str = "TESTNET";
pub const DEFAULT_NETWORK_PASSPHRASE: &str = "Test SDF Network ; September 2015";
pub const DEFAULT_BASE_FEE: u32 = 100;
pub const DEFAULT_WRITE_FEE_MULTIPLIER: u32 = 1_000;
pub const DEFAULT_TX_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_MAX_POLLS: u32 = 10;
pub const DEFAULT_GATEWAY_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid HEIRLOOM_CONTRACT_ID: {0}")]
    InvalidContractId(String),
    #[error("invalid HEIRLOOM_TOKEN_ID: {0}")]
    InvalidTokenId(String),
    #[error("invalid HEIRLOOM_RPC_URL: {0}")]
    InvalidRpcUrl(String),
    #[error("invalid HEIRLOOM_BASE_FEE: {0}")]
    InvalidBaseFee(String),
    #[error("invalid HEIRLOOM_WRITE_FEE_MULTIPLIER: {0}")]
    InvalidWriteFeeMultiplier(String),
    #[error("invalid HEIRLOOM_TX_TIMEOUT_SECONDS: {0}")]
    InvalidTxTimeoutSeconds(String),
    #[error("invalid HEIRLOOM_POLL_INTERVAL_MS: {0}")]
    InvalidPollIntervalMs(String),
    #[error("invalid HEIRLOOM_MAX_POLLS: {0}")]
    InvalidMaxPolls(String),
    #[error("invalid HEIRLOOM_GATEWAY_TIMEOUT_MS: {0}")]
    InvalidGatewayTimeoutMs(String),
}

/// Fee tiers for read and write calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePolicy {
    pub base_fee: u32,
    pub write_fee_multiplier: u32,
}

impl FeePolicy {
    #[must_use]
    pub fn read_fee(&self) -> u32 {
        self.base_fee
    }

    #[must_use]
    pub fn write_fee(&self) -> u32 {
        self.base_fee.saturating_mul(self.write_fee_multiplier)
    }
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            base_fee: DEFAULT_BASE_FEE,
            write_fee_multiplier: DEFAULT_WRITE_FEE_MULTIPLIER,
        }
    }
}

/// Confirmation polling budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_polls: DEFAULT_MAX_POLLS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeirloomConfig {
    pub rpc_url: String,
    pub contract_id: Address,
    pub token_id: Address,
    pub network: String,
    pub network_passphrase: String,
    pub fees: FeePolicy,
    pub tx_timeout: Duration,
    pub poll: PollPolicy,
    pub gateway_timeout: Duration,
}

impl HeirloomConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source. Unset or blank
    /// variables fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| -> String {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let rpc_url = normalize_rpc_url(&var("HEIRLOOM_RPC_URL", DEFAULT_RPC_URL))?;
        let contract_id = Address::contract(&var("HEIRLOOM_CONTRACT_ID", DEFAULT_CONTRACT_ID))
            .map_err(|error| ConfigError::InvalidContractId(error.to_string()))?;
        let token_id = Address::contract(&var("HEIRLOOM_TOKEN_ID", DEFAULT_TOKEN_ID))
            .map_err(|error| ConfigError::InvalidTokenId(error.to_string()))?;
        let network = var("HEIRLOOM_NETWORK", DEFAULT_NETWORK).to_ascii_uppercase();
        let network_passphrase = var("HEIRLOOM_NETWORK_PASSPHRASE", DEFAULT_NETWORK_PASSPHRASE);

        let base_fee = var("HEIRLOOM_BASE_FEE", &DEFAULT_BASE_FEE.to_string())
            .parse::<u32>()
            .map_err(|error| ConfigError::InvalidBaseFee(error.to_string()))?;
        if base_fee == 0 {
            return Err(ConfigError::InvalidBaseFee("must be > 0".to_string()));
        }
        let write_fee_multiplier = var(
            "HEIRLOOM_WRITE_FEE_MULTIPLIER",
            &DEFAULT_WRITE_FEE_MULTIPLIER.to_string(),
        )
        .parse::<u32>()
        .map_err(|error| ConfigError::InvalidWriteFeeMultiplier(error.to_string()))?;
        if write_fee_multiplier == 0 {
            return Err(ConfigError::InvalidWriteFeeMultiplier(
                "must be > 0".to_string(),
            ));
        }
        let tx_timeout_seconds = var(
            "HEIRLOOM_TX_TIMEOUT_SECONDS",
            &DEFAULT_TX_TIMEOUT_SECONDS.to_string(),
        )
        .parse::<u64>()
        .map_err(|error| ConfigError::InvalidTxTimeoutSeconds(error.to_string()))?;
        let poll_interval_ms = var(
            "HEIRLOOM_POLL_INTERVAL_MS",
            &DEFAULT_POLL_INTERVAL_MS.to_string(),
        )
        .parse::<u64>()
        .map_err(|error| ConfigError::InvalidPollIntervalMs(error.to_string()))?;
        let max_polls = var("HEIRLOOM_MAX_POLLS", &DEFAULT_MAX_POLLS.to_string())
            .parse::<u32>()
            .map_err(|error| ConfigError::InvalidMaxPolls(error.to_string()))?;
        if max_polls == 0 {
            return Err(ConfigError::InvalidMaxPolls("must be > 0".to_string()));
        }
        let gateway_timeout_ms = var(
            "HEIRLOOM_GATEWAY_TIMEOUT_MS",
            &DEFAULT_GATEWAY_TIMEOUT_MS.to_string(),
        )
        .parse::<u64>()
        .map_err(|error| ConfigError::InvalidGatewayTimeoutMs(error.to_string()))?;

        Ok(Self {
            rpc_url,
            contract_id,
            token_id,
            network,
            network_passphrase,
            fees: FeePolicy {
                base_fee,
                write_fee_multiplier,
            },
            tx_timeout: Duration::from_secs(tx_timeout_seconds),
            poll: PollPolicy {
                interval: Duration::from_millis(poll_interval_ms),
                max_polls,
            },
            gateway_timeout: Duration::from_millis(gateway_timeout_ms),
        })
    }

    /// Default testnet config pointed at the given contract.
    #[must_use]
    pub fn for_contract(contract_id: Address, token_id: Address) -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            contract_id,
            token_id,
            network: DEFAULT_NETWORK.to_string(),
            network_passphrase: DEFAULT_NETWORK_PASSPHRASE.to_string(),
            fees: FeePolicy::default(),
            tx_timeout: Duration::from_secs(DEFAULT_TX_TIMEOUT_SECONDS),
            poll: PollPolicy::default(),
            gateway_timeout: Duration::from_millis(DEFAULT_GATEWAY_TIMEOUT_MS),
        }
    }
}

fn normalize_rpc_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ConfigError::InvalidRpcUrl(format!(
            "{trimmed} must start with http:// or https://"
        )));
    }
    let Some((_, remainder)) = trimmed.split_once("://") else {
        return Err(ConfigError::InvalidRpcUrl(trimmed.to_string()));
    };
    if remainder.is_empty() || remainder.starts_with('/') {
        return Err(ConfigError::InvalidRpcUrl(trimmed.to_string()));
    }
    Ok(trimmed.to_string())
}
