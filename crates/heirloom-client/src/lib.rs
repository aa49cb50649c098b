//! Client core for the Heirloom digital-will contract.
//!
//! Every state change runs through one pipeline: build the request, preflight
//! it by simulation, ask the external signer for a signature, submit once and
//! poll for confirmation, then refresh the contract snapshot. A session
//! allows one mutating pipeline at a time.

mod address;
mod config;
mod error;
mod gateway;
mod guard;
mod request;
mod rpc;
mod session;
mod signer;
mod simulate;
mod snapshot;
mod submission;
mod value;

pub use address::{Address, AddressError, AddressKind};
pub use config::{ConfigError, FeePolicy, HeirloomConfig, PollPolicy};
pub use error::{HeirloomError, RetryPrompt, SimulationFailure};
pub use gateway::{
    ACCOUNTS_PATH, AccountResponseV1, GatewayErrorBody, GatewayErrorEnvelope, HttpLedgerClient,
    SIMULATE_PATH, SUBMIT_PATH, SubmitResponseV1, SubmitStatus, TRANSACTIONS_PATH,
};
pub use guard::{InFlightGuard, InFlightPermit, RefreshCoalescer};
pub use request::{
    ContractCall, FeeTier, Mutation, MutationKind, OperationRequest, RequestBuilder,
    TOKEN_DECIMALS, ViewCall, format_token_amount, parse_period_seconds, parse_token_amount,
};
pub use rpc::{
    AccountState, LedgerRpc, ResourceEstimate, RpcError, SimulationResponse, SubmissionHandle,
    TransactionStatus,
};
pub use session::{HeirloomSession, SnapshotRefresh, TransactionReceipt};
pub use signer::{PreparedTransaction, SignedEnvelope, SignerError, SignerGateway, WalletSigner};
pub use simulate::{PreflightSimulator, SimulatedCall, SimulationOutcome, classify_diagnostic};
pub use snapshot::{ContractSnapshot, ContractState, SnapshotReader};
pub use submission::{
    Clock, FailureReason, SubmissionMachine, SubmissionPhase, SubmissionReport, TokioClock,
    TransactionOutcome,
};
pub use value::ScValue;
