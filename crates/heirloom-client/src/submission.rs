//! Submit-once, poll-until-terminal confirmation loop.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::PollPolicy;
use crate::error::HeirloomError;
use crate::rpc::{LedgerRpc, SubmissionHandle, TransactionStatus};
use crate::signer::SignedEnvelope;

/// Time source for the poll loop.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SubmissionPhase {
    Built,
    Submitted,
    Polling { attempt: u32 },
    Confirmed,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The node refused the envelope; nothing was recorded on the ledger.
    Submit(String),
    /// The transaction was included but the ledger marked it failed.
    Ledger(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submit(reason) => write!(f, "submit error: {reason}"),
            Self::Ledger(reason) => write!(f, "ledger failure: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    Success,
    Failed { reason: FailureReason },
    /// Inconclusive. The transaction may still land.
    TimedOut,
}

impl TransactionOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    #[must_use]
    pub fn is_inconclusive(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReport {
    pub handle: Option<SubmissionHandle>,
    pub outcome: TransactionOutcome,
    pub polls: u32,
    pub ledger: Option<u32>,
    pub phases: Vec<SubmissionPhase>,
}

impl SubmissionReport {
    /// The error a caller should see for a non-successful outcome.
    #[must_use]
    pub fn error(&self) -> Option<HeirloomError> {
        let handle = self
            .handle
            .as_ref()
            .map(|handle| handle.as_str().to_string())
            .unwrap_or_default();
        match &self.outcome {
            TransactionOutcome::Success => None,
            TransactionOutcome::Failed {
                reason: FailureReason::Submit(reason),
            } => Some(HeirloomError::Submit(reason.clone())),
            TransactionOutcome::Failed {
                reason: FailureReason::Ledger(reason),
            } => Some(HeirloomError::TransactionFailed {
                handle,
                reason: reason.clone(),
            }),
            TransactionOutcome::TimedOut => Some(HeirloomError::PollTimedOut {
                handle,
                polls: self.polls,
            }),
        }
    }

    #[must_use]
    pub fn final_phase(&self) -> Option<SubmissionPhase> {
        self.phases.last().copied()
    }
}

pub struct SubmissionMachine {
    rpc: Arc<dyn LedgerRpc>,
    clock: Arc<dyn Clock>,
    policy: PollPolicy,
}

impl SubmissionMachine {
    pub fn new(rpc: Arc<dyn LedgerRpc>, clock: Arc<dyn Clock>, policy: PollPolicy) -> Self {
        Self { rpc, clock, policy }
    }

    /// Sends the envelope exactly once, then polls up to `max_polls` times
    /// with `interval` between queries.
    pub async fn run(&self, envelope: &SignedEnvelope) -> SubmissionReport {
        let mut phases = vec![SubmissionPhase::Built];

        let handle = match self.rpc.submit(envelope).await {
            Ok(handle) => handle,
            Err(error) => {
                tracing::warn!(
                    function = %envelope.function,
                    request_id = %envelope.request_id,
                    reason = %error,
                    "submission rejected"
                );
                phases.push(SubmissionPhase::Failed);
                return SubmissionReport {
                    handle: None,
                    outcome: TransactionOutcome::Failed {
                        reason: FailureReason::Submit(error.to_string()),
                    },
                    polls: 0,
                    ledger: None,
                    phases,
                };
            }
        };
        phases.push(SubmissionPhase::Submitted);
        tracing::info!(
            function = %envelope.function,
            handle = %handle,
            "submission accepted"
        );

        let max_polls = self.policy.max_polls.max(1);
        for attempt in 1..=max_polls {
            phases.push(SubmissionPhase::Polling { attempt });
            tracing::debug!(handle = %handle, attempt, max_polls, "polling transaction status");

            match self.rpc.get_status(&handle).await {
                Ok(TransactionStatus::NotFound) => {}
                Ok(TransactionStatus::Success { ledger }) => {
                    phases.push(SubmissionPhase::Confirmed);
                    tracing::info!(handle = %handle, ledger = ?ledger, polls = attempt, "transaction confirmed");
                    return SubmissionReport {
                        handle: Some(handle),
                        outcome: TransactionOutcome::Success,
                        polls: attempt,
                        ledger,
                        phases,
                    };
                }
                Ok(TransactionStatus::Failed { result_code }) => {
                    let reason = result_code.unwrap_or_else(|| "unknown result".to_string());
                    phases.push(SubmissionPhase::Failed);
                    tracing::warn!(handle = %handle, reason = %reason, "transaction failed on ledger");
                    return SubmissionReport {
                        handle: Some(handle),
                        outcome: TransactionOutcome::Failed {
                            reason: FailureReason::Ledger(reason),
                        },
                        polls: attempt,
                        ledger: None,
                        phases,
                    };
                }
                Err(error) => {
                    tracing::warn!(handle = %handle, attempt, reason = %error, "status poll failed");
                }
            }

            if attempt < max_polls {
                self.clock.sleep(self.policy.interval).await;
            }
        }

        phases.push(SubmissionPhase::TimedOut);
        tracing::warn!(handle = %handle, polls = max_polls, "transaction not confirmed within poll budget");
        SubmissionReport {
            handle: Some(handle),
            outcome: TransactionOutcome::TimedOut,
            polls: max_polls,
            ledger: None,
            phases,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    use super::{
        Clock, FailureReason, SubmissionMachine, SubmissionPhase, TransactionOutcome,
    };
    use crate::address::Address;
    use crate::config::PollPolicy;
    use crate::error::HeirloomError;
    use crate::request::OperationRequest;
    use crate::rpc::{
        AccountState, LedgerRpc, RpcError, SimulationResponse, SubmissionHandle, TransactionStatus,
    };
    use crate::signer::SignedEnvelope;

    const OWNER: &str = "GBGBAKLJP3RVQ4K5HIKKFLOYC7CLAFSRIQG6QCBXD54BMWWJBXCYD5UV";

    #[derive(Default)]
    struct CountingClock {
        sleeps: AtomicU32,
    }

    #[async_trait]
    impl Clock for CountingClock {
        async fn sleep(&self, _duration: Duration) {
            self.sleeps.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ScriptedStatus {
        submit_error: Option<RpcError>,
        statuses: Mutex<VecDeque<Result<TransactionStatus, RpcError>>>,
        status_calls: AtomicU32,
    }

    impl ScriptedStatus {
        fn new(statuses: Vec<Result<TransactionStatus, RpcError>>) -> Self {
            Self {
                submit_error: None,
                statuses: Mutex::new(statuses.into()),
                status_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LedgerRpc for ScriptedStatus {
        async fn load_account_state(&self, _account: &Address) -> Result<AccountState, RpcError> {
            Ok(AccountState { sequence: 0 })
        }

        async fn simulate(
            &self,
            _request: &OperationRequest,
        ) -> Result<SimulationResponse, RpcError> {
            Err(RpcError::Transport("not scripted".to_string()))
        }

        async fn submit(&self, _envelope: &SignedEnvelope) -> Result<SubmissionHandle, RpcError> {
            match &self.submit_error {
                Some(error) => Err(error.clone()),
                None => Ok(SubmissionHandle::new("abc123")),
            }
        }

        async fn get_status(
            &self,
            _handle: &SubmissionHandle,
        ) -> Result<TransactionStatus, RpcError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            self.statuses
                .lock()
                .await
                .pop_front()
                .unwrap_or(Ok(TransactionStatus::NotFound))
        }
    }

    fn envelope() -> Result<SignedEnvelope, HeirloomError> {
        Ok(SignedEnvelope {
            request_id: Uuid::now_v7(),
            function: "check_in".to_string(),
            signer: Address::account(OWNER)?,
            payload: "signed".to_string(),
        })
    }

    fn machine(rpc: Arc<ScriptedStatus>, clock: Arc<CountingClock>) -> SubmissionMachine {
        SubmissionMachine::new(
            rpc,
            clock,
            PollPolicy {
                interval: Duration::from_secs(1),
                max_polls: 10,
            },
        )
    }

    #[tokio::test]
    async fn confirms_after_not_found_polls() -> Result<(), HeirloomError> {
        let rpc = Arc::new(ScriptedStatus::new(vec![
            Ok(TransactionStatus::NotFound),
            Ok(TransactionStatus::NotFound),
            Ok(TransactionStatus::Success { ledger: Some(812) }),
        ]));
        let clock = Arc::new(CountingClock::default());
        let report = machine(rpc.clone(), clock.clone()).run(&envelope()?).await;

        assert_eq!(report.outcome, TransactionOutcome::Success);
        assert_eq!(report.polls, 3);
        assert_eq!(report.ledger, Some(812));
        assert_eq!(clock.sleeps.load(Ordering::SeqCst), 2);
        assert_eq!(report.final_phase(), Some(SubmissionPhase::Confirmed));
        assert_eq!(report.error(), None);
        Ok(())
    }

    #[tokio::test]
    async fn times_out_after_budget() -> Result<(), HeirloomError> {
        let rpc = Arc::new(ScriptedStatus::new(Vec::new()));
        let clock = Arc::new(CountingClock::default());
        let report = machine(rpc.clone(), clock.clone()).run(&envelope()?).await;

        assert_eq!(report.outcome, TransactionOutcome::TimedOut);
        assert!(report.outcome.is_inconclusive());
        assert_eq!(rpc.status_calls.load(Ordering::SeqCst), 10);
        assert_eq!(clock.sleeps.load(Ordering::SeqCst), 9);
        assert_eq!(
            report.error(),
            Some(HeirloomError::PollTimedOut {
                handle: "abc123".to_string(),
                polls: 10,
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn transport_errors_consume_attempts() -> Result<(), HeirloomError> {
        let rpc = Arc::new(ScriptedStatus::new(vec![
            Err(RpcError::Transport("connection reset".to_string())),
            Ok(TransactionStatus::NotFound),
            Err(RpcError::Transport("connection reset".to_string())),
            Ok(TransactionStatus::Success { ledger: None }),
        ]));
        let clock = Arc::new(CountingClock::default());
        let report = machine(rpc.clone(), clock).run(&envelope()?).await;

        assert_eq!(report.outcome, TransactionOutcome::Success);
        assert_eq!(report.polls, 4);
        Ok(())
    }

    #[tokio::test]
    async fn ledger_failure_ends_polling() -> Result<(), HeirloomError> {
        let rpc = Arc::new(ScriptedStatus::new(vec![
            Ok(TransactionStatus::NotFound),
            Ok(TransactionStatus::Failed {
                result_code: Some("txFAILED".to_string()),
            }),
        ]));
        let clock = Arc::new(CountingClock::default());
        let report = machine(rpc.clone(), clock).run(&envelope()?).await;

        assert_eq!(
            report.outcome,
            TransactionOutcome::Failed {
                reason: FailureReason::Ledger("txFAILED".to_string()),
            }
        );
        assert_eq!(rpc.status_calls.load(Ordering::SeqCst), 2);
        assert!(matches!(
            report.error(),
            Some(HeirloomError::TransactionFailed { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn submit_error_is_not_retried_or_polled() -> Result<(), HeirloomError> {
        let mut scripted = ScriptedStatus::new(Vec::new());
        scripted.submit_error = Some(RpcError::Rejected {
            status: "error".to_string(),
            detail: "txBAD_SEQ".to_string(),
        });
        let rpc = Arc::new(scripted);
        let clock = Arc::new(CountingClock::default());
        let report = machine(rpc.clone(), clock.clone()).run(&envelope()?).await;

        assert!(matches!(
            report.outcome,
            TransactionOutcome::Failed {
                reason: FailureReason::Submit(_)
            }
        ));
        assert_eq!(report.handle, None);
        assert_eq!(rpc.status_calls.load(Ordering::SeqCst), 0);
        assert_eq!(clock.sleeps.load(Ordering::SeqCst), 0);
        assert_eq!(
            report.phases,
            vec![SubmissionPhase::Built, SubmissionPhase::Failed]
        );
        Ok(())
    }
}
