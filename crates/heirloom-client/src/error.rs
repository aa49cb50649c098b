use thiserror::Error;

use crate::address::AddressError;

/// Classified reason a preflight simulation predicted failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationFailure {
    #[error("contract is not initialized")]
    NotInitialized,
    #[error("caller is not authorized for this function")]
    Unauthorized,
    #[error("contract is already initialized")]
    AlreadyInitialized,
    #[error("simulation failed: {0}")]
    Unclassified(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeirloomError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("{0}")]
    Simulation(SimulationFailure),

    #[error("signature request was declined")]
    SignerDeclined,

    #[error("signer unavailable: {0}")]
    SignerUnavailable(String),

    #[error("signer is on network {actual}, expected {expected}")]
    WrongNetwork { expected: String, actual: String },

    #[error("submit failed: {0}")]
    Submit(String),

    #[error("transaction {handle} failed on ledger: {reason}")]
    TransactionFailed { handle: String, reason: String },

    #[error("transaction {handle} not confirmed after {polls} polls; refresh to check whether it landed")]
    PollTimedOut { handle: String, polls: u32 },

    #[error("snapshot refresh incomplete: {0}")]
    PartialRefreshFailed(String),

    #[error("another operation is already in flight")]
    AlreadyInFlight,

    #[error("no signer identity connected")]
    NotConnected,

    #[error("ledger rpc error: {0}")]
    Rpc(String),
}

/// What the UI should offer after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPrompt {
    None,
    InstallOrUnlockSigner,
    SwitchNetwork,
    RefreshSnapshot,
    TryAgain,
}

impl HeirloomError {
    #[must_use]
    pub fn retry_prompt(&self) -> RetryPrompt {
        match self {
            Self::Validation(_)
            | Self::Simulation(_)
            | Self::SignerDeclined
            | Self::TransactionFailed { .. }
            | Self::AlreadyInFlight => RetryPrompt::None,
            Self::SignerUnavailable(_) | Self::NotConnected => RetryPrompt::InstallOrUnlockSigner,
            Self::WrongNetwork { .. } => RetryPrompt::SwitchNetwork,
            Self::PollTimedOut { .. } | Self::PartialRefreshFailed(_) => {
                RetryPrompt::RefreshSnapshot
            }
            Self::Submit(_) | Self::Rpc(_) => RetryPrompt::TryAgain,
        }
    }

    /// True for errors raised before anything was sent to the ledger.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::AlreadyInFlight | Self::NotConnected
        )
    }
}

impl From<SimulationFailure> for HeirloomError {
    fn from(value: SimulationFailure) -> Self {
        Self::Simulation(value)
    }
}

impl From<AddressError> for HeirloomError {
    fn from(value: AddressError) -> Self {
        Self::Validation(value.to_string())
    }
}
