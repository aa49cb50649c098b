//! An in-memory ledger that evaluates the Heirloom contract rules, applies
//! submitted transactions when they "land", and counts every RPC call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use heirloom_client::{
    AccountState, Address, LedgerRpc, OperationRequest, ResourceEstimate, RpcError, ScValue,
    SignedEnvelope, SimulationResponse, SubmissionHandle, TransactionStatus,
};

use crate::gate::Gate;

pub const DEFAULT_SEQUENCE: i64 = 4_096;
pub const MIN_RESOURCE_FEE: u64 = 31_250;

const PANIC_PREFIX: &str = "HostError: Error(WasmVm, InvalidAction)";
const AUTH_FAILURE: &str = "HostError: Error(Auth, InvalidAction)";

/// Contract storage as the ledger sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WillState {
    pub owner: Address,
    pub beneficiary: Address,
    pub check_in_period: u64,
    pub last_check_in: u64,
}

#[derive(Debug)]
struct PendingTransaction {
    request: OperationRequest,
    visible_after: u32,
    polls_seen: u32,
    resolved: Option<TransactionStatus>,
    dropped: bool,
}

#[derive(Debug)]
struct LedgerInner {
    will: Option<WillState>,
    balance: i128,
    now: u64,
    ledger_seq: u32,
    sequences: HashMap<Address, i64>,
    transactions: HashMap<String, PendingTransaction>,
    not_found_polls: u32,
    balance_failure: Option<String>,
    info_transport_failure: bool,
    submit_rejection: Option<(String, String)>,
    apply_failure: Option<String>,
}

#[derive(Debug, Default)]
struct Counters {
    accounts: AtomicUsize,
    simulations: AtomicUsize,
    submissions: AtomicUsize,
    status_queries: AtomicUsize,
}

#[derive(Debug)]
pub struct MemoryLedger {
    inner: Mutex<LedgerInner>,
    counters: Counters,
    simulated: Mutex<Vec<String>>,
    simulation_gate: Mutex<Option<Arc<Gate>>>,
}

impl MemoryLedger {
    #[must_use]
    pub fn new(now: u64) -> Self {
        Self {
            inner: Mutex::new(LedgerInner {
                will: None,
                balance: 0,
                now,
                ledger_seq: 1_000,
                sequences: HashMap::new(),
                transactions: HashMap::new(),
                not_found_polls: 0,
                balance_failure: None,
                info_transport_failure: false,
                submit_rejection: None,
                apply_failure: None,
            }),
            counters: Counters::default(),
            simulated: Mutex::new(Vec::new()),
            simulation_gate: Mutex::new(None),
        }
    }

    /// A ledger whose contract is already initialized with `will`.
    #[must_use]
    pub fn with_will(now: u64, will: WillState, balance: i128) -> Self {
        let ledger = Self::new(now);
        {
            let mut inner = ledger.lock();
            inner.will = Some(will);
            inner.balance = balance;
        }
        ledger
    }

    /// Status queries that answer `NotFound` before a new submission lands.
    pub fn set_not_found_polls(&self, polls: u32) {
        self.lock().not_found_polls = polls;
    }

    /// Makes every `get_balance` simulation fail with `diagnostic`.
    pub fn fail_balance_reads(&self, diagnostic: Option<&str>) {
        self.lock().balance_failure = diagnostic.map(str::to_string);
    }

    /// Makes `get_info` simulations fail at the transport level.
    pub fn fail_info_transport(&self, fail: bool) {
        self.lock().info_transport_failure = fail;
    }

    /// Rejects the next submission with the given gateway status.
    pub fn reject_next_submit(&self, status: &str, detail: &str) {
        self.lock().submit_rejection = Some((status.to_string(), detail.to_string()));
    }

    /// Fails the next transaction that lands with `diagnostic`, as if the
    /// ledger state changed between simulation and inclusion.
    pub fn fail_next_apply(&self, diagnostic: &str) {
        self.lock().apply_failure = Some(diagnostic.to_string());
    }

    /// Parks every following simulation until the gate is released.
    pub fn hold_simulations(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self
            .simulation_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(gate.clone());
        gate
    }

    /// Token balance change made outside this client, e.g. a direct transfer.
    pub fn set_balance(&self, balance: i128) {
        self.lock().balance = balance;
    }

    pub fn advance(&self, seconds: u64) {
        let mut inner = self.lock();
        inner.now = inner.now.saturating_add(seconds);
    }

    #[must_use]
    pub fn now(&self) -> u64 {
        self.lock().now
    }

    #[must_use]
    pub fn will(&self) -> Option<WillState> {
        self.lock().will.clone()
    }

    #[must_use]
    pub fn balance(&self) -> i128 {
        self.lock().balance
    }

    /// Applies every submitted transaction that has not resolved yet.
    pub fn land_pending(&self) -> usize {
        let mut inner = self.lock();
        let hashes: Vec<String> = inner
            .transactions
            .iter()
            .filter(|(_, tx)| tx.resolved.is_none() && !tx.dropped)
            .map(|(hash, _)| hash.clone())
            .collect();
        for hash in &hashes {
            inner.resolve(hash);
        }
        hashes.len()
    }

    /// Forgets unresolved transactions so they never land.
    pub fn drop_pending(&self) -> usize {
        let mut inner = self.lock();
        let mut dropped = 0;
        for tx in inner.transactions.values_mut() {
            if tx.resolved.is_none() && !tx.dropped {
                tx.dropped = true;
                dropped += 1;
            }
        }
        dropped
    }

    #[must_use]
    pub fn account_loads(&self) -> usize {
        self.counters.accounts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn simulations(&self) -> usize {
        self.counters.simulations.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn submissions(&self) -> usize {
        self.counters.submissions.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn status_queries(&self) -> usize {
        self.counters.status_queries.load(Ordering::SeqCst)
    }

    /// Function names in simulation order.
    #[must_use]
    pub fn simulated_functions(&self) -> Vec<String> {
        self.simulated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.account_loads() + self.simulations() + self.submissions() + self.status_queries()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LedgerInner {
    fn resolve(&mut self, hash: &str) {
        let Some(request) = self
            .transactions
            .get(hash)
            .map(|tx| tx.request.clone())
        else {
            return;
        };
        let status = match self.apply(&request) {
            Ok(()) => {
                self.ledger_seq = self.ledger_seq.saturating_add(1);
                TransactionStatus::Success {
                    ledger: Some(self.ledger_seq),
                }
            }
            Err(diagnostic) => TransactionStatus::Failed {
                result_code: Some(format!("txFAILED: {diagnostic}")),
            },
        };
        if let Some(tx) = self.transactions.get_mut(hash) {
            tx.resolved = Some(status);
        }
    }

    fn apply(&mut self, request: &OperationRequest) -> Result<(), String> {
        if let Some(diagnostic) = self.apply_failure.take() {
            return Err(diagnostic);
        }
        self.evaluate(request)?;
        let now = self.now;
        match request.function() {
            "initialize" => {
                let args = request.args();
                let (Some(owner), Some(beneficiary), Some(period)) = (
                    args.first().and_then(ScValue::as_address),
                    args.get(1).and_then(ScValue::as_address),
                    args.get(2).and_then(ScValue::as_u64),
                ) else {
                    return Err("malformed initialize arguments".to_string());
                };
                self.will = Some(WillState {
                    owner: owner.clone(),
                    beneficiary: beneficiary.clone(),
                    check_in_period: period,
                    last_check_in: now,
                });
            }
            "deposit" => {
                let amount = request
                    .args()
                    .get(1)
                    .and_then(ScValue::as_i128)
                    .unwrap_or_default();
                self.balance = self.balance.saturating_add(amount);
            }
            "check_in" => {
                if let Some(will) = self.will.as_mut() {
                    will.last_check_in = now;
                }
            }
            "owner_withdraw" | "claim" => self.balance = 0,
            other => return Err(format!("{other} is not a mutating function")),
        }
        Ok(())
    }

    /// Runs the contract rules without changing state.
    fn evaluate(&self, request: &OperationRequest) -> Result<ScValue, String> {
        let function = request.function();
        let arg_address = request.args().first().and_then(ScValue::as_address);
        let is_view = matches!(function, "get_info" | "get_balance" | "can_claim");
        if !is_view && arg_address != Some(request.source()) {
            return Err(AUTH_FAILURE.to_string());
        }

        if function == "initialize" {
            if self.will.is_some() {
                return Err(panic_message("Contract already initialized"));
            }
            return Ok(ScValue::Void);
        }

        let Some(will) = self.will.as_ref() else {
            return Err(match function {
                "get_balance" => panic_message("Token not set"),
                _ => panic_message("Contract not initialized"),
            });
        };
        let deadline = will.last_check_in.saturating_add(will.check_in_period);

        match function {
            "deposit" | "check_in" | "owner_withdraw" => {
                if arg_address != Some(&will.owner) {
                    return Err(panic_message(match function {
                        "deposit" => "Only owner can deposit",
                        "check_in" => "Only owner can check in",
                        _ => "Only owner can withdraw",
                    }));
                }
                Ok(ScValue::Void)
            }
            "claim" => {
                if arg_address != Some(&will.beneficiary) {
                    return Err(panic_message("Only beneficiary can claim"));
                }
                if self.now <= deadline {
                    return Err(panic_message("Check-in period has not passed yet"));
                }
                Ok(ScValue::Void)
            }
            "get_info" => Ok(ScValue::Vec(vec![
                ScValue::Address(will.owner.clone()),
                ScValue::Address(will.beneficiary.clone()),
                ScValue::U64(will.check_in_period),
                ScValue::U64(will.last_check_in),
            ])),
            "get_balance" => match &self.balance_failure {
                Some(diagnostic) => Err(diagnostic.clone()),
                None => Ok(ScValue::I128(self.balance)),
            },
            "can_claim" => Ok(ScValue::Bool(self.now > deadline)),
            other => Err(format!("HostError: Error(WasmVm, MissingValue) unknown function {other}")),
        }
    }
}

fn panic_message(message: &str) -> String {
    format!("{PANIC_PREFIX}\nEvent log (newest first):\n  contract panicked: \"{message}\"")
}

fn decode_payload(payload: &str) -> Result<OperationRequest, RpcError> {
    let bytes = STANDARD
        .decode(payload)
        .map_err(|error| RpcError::Parse(format!("envelope payload is not base64: {error}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|error| RpcError::Parse(format!("envelope payload is not a request: {error}")))
}

#[async_trait]
impl LedgerRpc for MemoryLedger {
    async fn load_account_state(&self, account: &Address) -> Result<AccountState, RpcError> {
        self.counters.accounts.fetch_add(1, Ordering::SeqCst);
        let inner = self.lock();
        Ok(AccountState {
            sequence: inner
                .sequences
                .get(account)
                .copied()
                .unwrap_or(DEFAULT_SEQUENCE),
        })
    }

    async fn simulate(&self, request: &OperationRequest) -> Result<SimulationResponse, RpcError> {
        self.counters.simulations.fetch_add(1, Ordering::SeqCst);
        self.simulated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.function().to_string());
        let gate = self
            .simulation_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }

        let inner = self.lock();
        if inner.info_transport_failure && request.function() == "get_info" {
            return Err(RpcError::Transport("connection reset by peer".to_string()));
        }
        Ok(match inner.evaluate(request) {
            Ok(return_value) => SimulationResponse::Success {
                return_value,
                resources: ResourceEstimate {
                    min_resource_fee: MIN_RESOURCE_FEE,
                    cpu_instructions: 1_250_000,
                    read_bytes: 512,
                    write_bytes: 128,
                },
                transaction_data: format!("footprint:{}", request.function()),
            },
            Err(diagnostic) => SimulationResponse::Error { diagnostic },
        })
    }

    async fn submit(&self, envelope: &SignedEnvelope) -> Result<SubmissionHandle, RpcError> {
        self.counters.submissions.fetch_add(1, Ordering::SeqCst);
        let request = decode_payload(&envelope.payload)?;
        let hash = envelope.digest();

        let mut inner = self.lock();
        if let Some((status, detail)) = inner.submit_rejection.take() {
            return Err(RpcError::Rejected { status, detail });
        }
        if inner.transactions.contains_key(&hash) {
            return Ok(SubmissionHandle::new(hash));
        }
        let current = inner
            .sequences
            .get(request.source())
            .copied()
            .unwrap_or(DEFAULT_SEQUENCE);
        if request.sequence() != current + 1 {
            return Err(RpcError::Rejected {
                status: "error".to_string(),
                detail: format!(
                    "txBAD_SEQ: expected {}, got {}",
                    current + 1,
                    request.sequence()
                ),
            });
        }
        inner
            .sequences
            .insert(request.source().clone(), request.sequence());
        let visible_after = inner.not_found_polls;
        inner.transactions.insert(
            hash.clone(),
            PendingTransaction {
                request,
                visible_after,
                polls_seen: 0,
                resolved: None,
                dropped: false,
            },
        );
        tracing::debug!(hash = %hash, visible_after, "memory ledger accepted submission");
        Ok(SubmissionHandle::new(hash))
    }

    async fn get_status(&self, handle: &SubmissionHandle) -> Result<TransactionStatus, RpcError> {
        self.counters.status_queries.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.lock();
        let hash = handle.as_str();
        let ready = match inner.transactions.get_mut(hash) {
            None => return Ok(TransactionStatus::NotFound),
            Some(tx) if tx.dropped => return Ok(TransactionStatus::NotFound),
            Some(tx) => {
                if let Some(status) = tx.resolved.clone() {
                    return Ok(status);
                }
                if tx.polls_seen < tx.visible_after {
                    tx.polls_seen += 1;
                    false
                } else {
                    true
                }
            }
        };
        if !ready {
            return Ok(TransactionStatus::NotFound);
        }
        inner.resolve(hash);
        Ok(inner
            .transactions
            .get(hash)
            .and_then(|tx| tx.resolved.clone())
            .unwrap_or(TransactionStatus::NotFound))
    }
}
