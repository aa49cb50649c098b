use std::sync::Arc;

use crate::error::{HeirloomError, SimulationFailure};
use crate::request::OperationRequest;
use crate::rpc::{LedgerRpc, ResourceEstimate, SimulationResponse};
use crate::value::ScValue;

const ALREADY_INITIALIZED_PATTERNS: &[&str] = &["already initialized"];
const NOT_INITIALIZED_PATTERNS: &[&str] = &["not initialized", "token not set", "missingvalue"];
const UNAUTHORIZED_PATTERNS: &[&str] = &[
    "only owner",
    "only beneficiary",
    "require_auth",
    "error(auth",
];

/// Data needed to finalize and sign a call that simulated cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedCall {
    pub return_value: ScValue,
    pub resources: ResourceEstimate,
    pub transaction_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulationOutcome {
    Success(SimulatedCall),
    Failure(SimulationFailure),
}

impl SimulationOutcome {
    pub fn into_result(self) -> Result<SimulatedCall, SimulationFailure> {
        match self {
            Self::Success(call) => Ok(call),
            Self::Failure(failure) => Err(failure),
        }
    }
}

/// Maps a node diagnostic onto a failure class. Every contract panic carries
/// `Error(WasmVm, InvalidAction)`, so classes are told apart by the panic
/// message first and by the host error kind last.
#[must_use]
pub fn classify_diagnostic(diagnostic: &str) -> SimulationFailure {
    let lowered = diagnostic.to_ascii_lowercase();
    let matches_any = |patterns: &[&str]| patterns.iter().any(|pattern| lowered.contains(pattern));

    if matches_any(ALREADY_INITIALIZED_PATTERNS) {
        SimulationFailure::AlreadyInitialized
    } else if matches_any(NOT_INITIALIZED_PATTERNS) {
        SimulationFailure::NotInitialized
    } else if matches_any(UNAUTHORIZED_PATTERNS) {
        SimulationFailure::Unauthorized
    } else {
        SimulationFailure::Unclassified(diagnostic.trim().to_string())
    }
}

pub struct PreflightSimulator {
    rpc: Arc<dyn LedgerRpc>,
}

impl PreflightSimulator {
    pub fn new(rpc: Arc<dyn LedgerRpc>) -> Self {
        Self { rpc }
    }

    /// Transport and decode problems are `Err(Rpc)`; a diagnostic from the
    /// node is `Ok(Failure)`.
    pub async fn simulate(
        &self,
        request: &OperationRequest,
    ) -> Result<SimulationOutcome, HeirloomError> {
        let response = self
            .rpc
            .simulate(request)
            .await
            .map_err(|error| HeirloomError::Rpc(error.to_string()))?;

        match response {
            SimulationResponse::Success {
                return_value,
                resources,
                transaction_data,
            } => {
                tracing::info!(
                    function = request.function(),
                    request_id = %request.request_id(),
                    min_resource_fee = resources.min_resource_fee,
                    "simulation succeeded"
                );
                Ok(SimulationOutcome::Success(SimulatedCall {
                    return_value,
                    resources,
                    transaction_data,
                }))
            }
            SimulationResponse::Error { diagnostic } => {
                let failure = classify_diagnostic(&diagnostic);
                tracing::warn!(
                    function = request.function(),
                    request_id = %request.request_id(),
                    reason = %failure,
                    "simulation predicted failure"
                );
                Ok(SimulationOutcome::Failure(failure))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::classify_diagnostic;
    use crate::error::SimulationFailure;

    #[test]
    fn known_diagnostics_are_classified() {
        assert_eq!(
            classify_diagnostic(
                "HostError: Error(WasmVm, InvalidAction) ... \"Contract already initialized\""
            ),
            SimulationFailure::AlreadyInitialized
        );
        assert_eq!(
            classify_diagnostic("panicked: Only owner can check in"),
            SimulationFailure::Unauthorized
        );
        assert_eq!(
            classify_diagnostic("HostError: Error(Auth, InvalidAction)"),
            SimulationFailure::Unauthorized
        );
        assert_eq!(
            classify_diagnostic("HostError: Error(WasmVm, InvalidAction) \"Contract not initialized\""),
            SimulationFailure::NotInitialized
        );
        assert_eq!(
            classify_diagnostic("HostError: Error(WasmVm, InvalidAction) \"Only beneficiary can claim\""),
            SimulationFailure::Unauthorized
        );
        assert_eq!(
            classify_diagnostic("HostError: Error(Storage, MissingValue)"),
            SimulationFailure::NotInitialized
        );
        assert_eq!(
            classify_diagnostic("TOKEN NOT SET"),
            SimulationFailure::NotInitialized
        );
    }

    #[test]
    fn unknown_diagnostic_text_is_preserved() {
        assert_eq!(
            classify_diagnostic("HostError: Error(WasmVm, InvalidAction) \"Check-in period has not passed yet\""),
            SimulationFailure::Unclassified(
                "HostError: Error(WasmVm, InvalidAction) \"Check-in period has not passed yet\"".to_string()
            )
        );
        let diagnostic = "  HostError: Error(Budget, ExceededLimit)\n";
        assert_eq!(
            classify_diagnostic(diagnostic),
            SimulationFailure::Unclassified("HostError: Error(Budget, ExceededLimit)".to_string())
        );
    }
}
