//! The connected session: owns the single-flight guard, the refresh
//! coalescer and the last authoritative snapshot for one signer identity.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use uuid::Uuid;

use crate::address::Address;
use crate::config::HeirloomConfig;
use crate::error::HeirloomError;
use crate::guard::{InFlightGuard, RefreshCoalescer};
use crate::request::{ContractCall, Mutation, MutationKind, RequestBuilder};
use crate::rpc::{LedgerRpc, SubmissionHandle};
use crate::signer::{PreparedTransaction, SignerGateway, WalletSigner};
use crate::simulate::PreflightSimulator;
use crate::snapshot::{ContractSnapshot, SnapshotReader};
use crate::submission::{
    Clock, SubmissionMachine, SubmissionReport, TokioClock, TransactionOutcome,
};

/// Result of one mutating operation that reached the submission stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub mutation: MutationKind,
    pub request_id: Uuid,
    pub total_fee: u64,
    pub submission: SubmissionReport,
    /// Post-confirmation snapshot. Only present on success.
    pub snapshot: Option<ContractSnapshot>,
    pub refresh_error: Option<HeirloomError>,
}

impl TransactionReceipt {
    #[must_use]
    pub fn outcome(&self) -> &TransactionOutcome {
        &self.submission.outcome
    }

    #[must_use]
    pub fn handle(&self) -> Option<&SubmissionHandle> {
        self.submission.handle.as_ref()
    }

    /// Turns a non-successful outcome into its error.
    pub fn into_result(self) -> Result<Self, HeirloomError> {
        match self.submission.error() {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }
}

#[derive(Debug, Clone)]
struct Connection {
    identity: Address,
    last_snapshot: Option<ContractSnapshot>,
}

#[derive(Debug, Default)]
struct SessionState {
    connection: Option<Connection>,
    mutation_generation: u64,
}

/// A snapshot read and whether it replaced the session's stored snapshot.
/// A non-authoritative read overlapped a mutation and may predate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRefresh {
    pub snapshot: ContractSnapshot,
    pub authoritative: bool,
}

/// What a coalesced refresh observed when it started.
#[derive(Debug, Clone)]
struct RefreshRun {
    started_generation: u64,
    started_in_flight: bool,
    result: Result<ContractSnapshot, HeirloomError>,
}

pub struct HeirloomSession {
    config: HeirloomConfig,
    rpc: Arc<dyn LedgerRpc>,
    builder: RequestBuilder,
    simulator: PreflightSimulator,
    signer: SignerGateway,
    submission: SubmissionMachine,
    snapshots: Arc<SnapshotReader>,
    guard: InFlightGuard,
    refreshes: RefreshCoalescer<RefreshRun>,
    state: Mutex<SessionState>,
}

impl HeirloomSession {
    pub fn new(
        config: HeirloomConfig,
        rpc: Arc<dyn LedgerRpc>,
        signer: Arc<dyn WalletSigner>,
    ) -> Self {
        Self::with_clock(config, rpc, signer, Arc::new(TokioClock))
    }

    pub fn with_clock(
        config: HeirloomConfig,
        rpc: Arc<dyn LedgerRpc>,
        signer: Arc<dyn WalletSigner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let builder = RequestBuilder::from_config(&config);
        Self {
            simulator: PreflightSimulator::new(rpc.clone()),
            signer: SignerGateway::new(signer),
            submission: SubmissionMachine::new(rpc.clone(), clock, config.poll),
            snapshots: Arc::new(SnapshotReader::new(rpc.clone(), builder.clone())),
            guard: InFlightGuard::new(),
            refreshes: RefreshCoalescer::new(),
            state: Mutex::new(SessionState::default()),
            builder,
            rpc,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &HeirloomConfig {
        &self.config
    }

    /// Checks the signer is reachable and on the configured network, binds
    /// its identity to the session and loads an initial snapshot. A failed
    /// initial refresh is logged and does not fail the connection.
    pub async fn connect(&self) -> Result<Address, HeirloomError> {
        let identity = self.signer.connect(&self.config.network).await?;
        self.lock_state().connection = Some(Connection {
            identity: identity.clone(),
            last_snapshot: None,
        });
        tracing::info!(
            identity = %identity,
            contract = %self.config.contract_id,
            network = %self.config.network,
            "session connected"
        );

        if let Err(error) = self.refresh_snapshot().await {
            tracing::warn!(identity = %identity, reason = %error, "initial snapshot refresh failed");
        }
        Ok(identity)
    }

    pub fn disconnect(&self) {
        let previous = self.lock_state().connection.take();
        if let Some(connection) = previous {
            tracing::info!(identity = %connection.identity, "session disconnected");
        }
    }

    #[must_use]
    pub fn identity(&self) -> Option<Address> {
        self.lock_state()
            .connection
            .as_ref()
            .map(|connection| connection.identity.clone())
    }

    /// The last snapshot known to reflect every confirmed mutation.
    #[must_use]
    pub fn last_snapshot(&self) -> Option<ContractSnapshot> {
        self.lock_state()
            .connection
            .as_ref()
            .and_then(|connection| connection.last_snapshot.clone())
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.guard.is_held()
    }

    #[must_use]
    pub fn mutation_generation(&self) -> u64 {
        self.lock_state().mutation_generation
    }

    pub async fn initialize(
        &self,
        beneficiary: &str,
        check_in_period: u64,
    ) -> Result<TransactionReceipt, HeirloomError> {
        let owner = self.require_identity()?;
        let beneficiary = Address::account(beneficiary)?;
        self.execute(Mutation::Initialize {
            owner,
            beneficiary,
            check_in_period,
            token: self.config.token_id.clone(),
        })
        .await
    }

    pub async fn deposit(&self, amount: i128) -> Result<TransactionReceipt, HeirloomError> {
        let from = self.require_identity()?;
        self.execute(Mutation::Deposit { from, amount }).await
    }

    pub async fn check_in(&self) -> Result<TransactionReceipt, HeirloomError> {
        let owner = self.require_identity()?;
        self.execute(Mutation::CheckIn { owner }).await
    }

    pub async fn owner_withdraw(&self) -> Result<TransactionReceipt, HeirloomError> {
        let owner = self.require_identity()?;
        self.execute(Mutation::OwnerWithdraw { owner }).await
    }

    pub async fn claim(&self) -> Result<TransactionReceipt, HeirloomError> {
        let beneficiary = self.require_identity()?;
        self.execute(Mutation::Claim { beneficiary }).await
    }

    /// Runs build, simulate, sign and submit for one mutation while holding
    /// the session's in-flight permit. A second call while one is running
    /// fails with `AlreadyInFlight` before touching the network.
    pub async fn execute(&self, mutation: Mutation) -> Result<TransactionReceipt, HeirloomError> {
        mutation.validate()?;
        let identity = self.require_identity()?;
        let kind = mutation.kind();
        let _permit = self.guard.try_acquire().inspect_err(|_| {
            tracing::warn!(function = %kind, "rejected: another operation is in flight");
        })?;
        let generation = self.bump_generation();

        let call = ContractCall::Mutate(mutation);
        let request = self.builder.build(self.rpc.as_ref(), &call, &identity).await?;
        let request_id = request.request_id();
        tracing::debug!(function = %kind, request_id = %request_id, generation, "pipeline started");

        let simulated = self.simulator.simulate(&request).await?.into_result()?;
        let prepared = PreparedTransaction::assemble(request, &simulated);
        let envelope = self.signer.sign(&prepared, &identity).await?;
        let submission = self.submission.run(&envelope).await;

        // The post-confirmation read bypasses the coalescer so it cannot join
        // a refresh that started before the transaction landed.
        let (snapshot, refresh_error) = if submission.outcome.is_success() {
            match self.snapshots.read(&identity).await {
                Ok(snapshot) => {
                    self.store_snapshot(&identity, &snapshot);
                    (Some(snapshot), None)
                }
                Err(error) => {
                    tracing::warn!(
                        function = %kind,
                        reason = %error,
                        "post-confirmation refresh failed"
                    );
                    (None, Some(error))
                }
            }
        } else {
            (None, None)
        };

        Ok(TransactionReceipt {
            mutation: kind,
            request_id,
            total_fee: prepared.total_fee(),
            submission,
            snapshot,
            refresh_error,
        })
    }

    /// Reads the current contract state. Concurrent calls for the same
    /// identity share one read. A result only replaces the stored snapshot
    /// when no mutation overlapped it; use [`Self::refresh`] to learn which.
    pub async fn refresh_snapshot(&self) -> Result<ContractSnapshot, HeirloomError> {
        self.refresh().await.map(|refresh| refresh.snapshot)
    }

    /// Like [`Self::refresh_snapshot`], but also reports whether the read
    /// became the session's stored snapshot.
    pub async fn refresh(&self) -> Result<SnapshotRefresh, HeirloomError> {
        let identity = self.require_identity()?;
        let reader = self.snapshots.clone();
        let caller = identity.clone();
        let started_generation = self.mutation_generation();
        let started_in_flight = self.guard.is_held();

        let run = self
            .refreshes
            .run(identity.as_str(), move || {
                async move {
                    RefreshRun {
                        started_generation,
                        started_in_flight,
                        result: reader.read(&caller).await,
                    }
                }
                .boxed()
            })
            .await;

        let snapshot = match run.result {
            Ok(snapshot) => snapshot,
            Err(error) => {
                tracing::warn!(identity = %identity, reason = %error, "snapshot refresh failed");
                return Err(error);
            }
        };

        let authoritative = !run.started_in_flight
            && self.store_if_current(&identity, &snapshot, run.started_generation);
        if !authoritative {
            tracing::warn!(
                identity = %identity,
                "refresh overlapped a mutation, result not stored"
            );
        }
        Ok(SnapshotRefresh {
            snapshot,
            authoritative,
        })
    }

    /// Whether the contract currently allows the beneficiary to claim.
    pub async fn claim_eligibility(&self) -> Result<bool, HeirloomError> {
        let identity = self.require_identity()?;
        self.snapshots.can_claim(&identity).await
    }

    fn require_identity(&self) -> Result<Address, HeirloomError> {
        self.identity().ok_or(HeirloomError::NotConnected)
    }

    fn bump_generation(&self) -> u64 {
        let mut state = self.lock_state();
        state.mutation_generation = state.mutation_generation.wrapping_add(1);
        state.mutation_generation
    }

    /// Stores a refresh result unless a mutation holds the guard or started
    /// after `started_generation`. The generation is bumped under the same
    /// lock, so no mutation can begin between the check and the store.
    fn store_if_current(
        &self,
        identity: &Address,
        snapshot: &ContractSnapshot,
        started_generation: u64,
    ) -> bool {
        let mut state = self.lock_state();
        if self.guard.is_held() || state.mutation_generation != started_generation {
            return false;
        }
        Self::store_locked(&mut state, identity, snapshot)
    }

    fn store_snapshot(&self, identity: &Address, snapshot: &ContractSnapshot) {
        let mut state = self.lock_state();
        Self::store_locked(&mut state, identity, snapshot);
    }

    fn store_locked(
        state: &mut SessionState,
        identity: &Address,
        snapshot: &ContractSnapshot,
    ) -> bool {
        match state.connection.as_mut() {
            Some(connection) if &connection.identity == identity => {
                connection.last_snapshot = Some(snapshot.clone());
                tracing::info!(
                    identity = %identity,
                    initialized = snapshot.is_initialized(),
                    "snapshot refreshed"
                );
                true
            }
            _ => {
                tracing::debug!(identity = %identity, "identity changed, snapshot dropped");
                false
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::{Connection, HeirloomSession};
    use crate::address::Address;
    use crate::config::HeirloomConfig;
    use crate::error::HeirloomError;
    use crate::request::OperationRequest;
    use crate::rpc::{
        AccountState, LedgerRpc, RpcError, SimulationResponse, SubmissionHandle,
        TransactionStatus,
    };
    use crate::signer::{PreparedTransaction, SignedEnvelope, SignerError, WalletSigner};
    use crate::snapshot::ContractSnapshot;

    const OWNER: &str = "GBGBAKLJP3RVQ4K5HIKKFLOYC7CLAFSRIQG6QCBXD54BMWWJBXCYD5UV";
    const CONTRACT: &str = "CDGIGIOWG5OESTIEH7OQEYHSDPAOYUO2ZSPWVO37SCONZUYEDN4L7FVM";
    const TOKEN: &str = "CA6ENHU5NRMHLU32IPZVHVHYRZQ7Z6ASYZXO4NCXIZNEBMG2IFJ6AUB2";

    struct OfflineLedger;

    #[async_trait]
    impl LedgerRpc for OfflineLedger {
        async fn load_account_state(&self, _account: &Address) -> Result<AccountState, RpcError> {
            Err(RpcError::Transport("offline".to_string()))
        }

        async fn simulate(
            &self,
            _request: &OperationRequest,
        ) -> Result<SimulationResponse, RpcError> {
            Err(RpcError::Transport("offline".to_string()))
        }

        async fn submit(&self, _envelope: &SignedEnvelope) -> Result<SubmissionHandle, RpcError> {
            Err(RpcError::Transport("offline".to_string()))
        }

        async fn get_status(
            &self,
            _handle: &SubmissionHandle,
        ) -> Result<TransactionStatus, RpcError> {
            Err(RpcError::Transport("offline".to_string()))
        }
    }

    struct LockedWallet;

    #[async_trait]
    impl WalletSigner for LockedWallet {
        async fn connected_identity(&self) -> Result<Address, SignerError> {
            Err(SignerError::Unavailable("locked".to_string()))
        }

        async fn network(&self) -> Result<String, SignerError> {
            Err(SignerError::Unavailable("locked".to_string()))
        }

        async fn request_signature(
            &self,
            _transaction: &PreparedTransaction,
            _signer: &Address,
        ) -> Result<SignedEnvelope, SignerError> {
            Err(SignerError::Declined)
        }
    }

    fn session_for(identity: &Address) -> Result<HeirloomSession, HeirloomError> {
        let config = HeirloomConfig::for_contract(
            Address::contract(CONTRACT)?,
            Address::contract(TOKEN)?,
        );
        let session = HeirloomSession::new(config, Arc::new(OfflineLedger), Arc::new(LockedWallet));
        session.lock_state().connection = Some(Connection {
            identity: identity.clone(),
            last_snapshot: None,
        });
        Ok(session)
    }

    #[test]
    fn refresh_started_before_a_mutation_is_not_stored() -> Result<(), HeirloomError> {
        let owner = Address::account(OWNER)?;
        let session = session_for(&owner)?;
        let started = session.mutation_generation();
        session.bump_generation();

        let stored = session.store_if_current(&owner, &ContractSnapshot::Uninitialized, started);
        assert!(!stored);
        assert_eq!(session.last_snapshot(), None);

        let current = session.mutation_generation();
        let stored = session.store_if_current(&owner, &ContractSnapshot::Uninitialized, current);
        assert!(stored);
        assert_eq!(session.last_snapshot(), Some(ContractSnapshot::Uninitialized));
        Ok(())
    }

    #[test]
    fn refresh_is_not_stored_while_a_mutation_holds_the_guard() -> Result<(), HeirloomError> {
        let owner = Address::account(OWNER)?;
        let session = session_for(&owner)?;
        let generation = session.mutation_generation();

        let permit = session.guard.try_acquire()?;
        assert!(!session.store_if_current(&owner, &ContractSnapshot::Uninitialized, generation));
        drop(permit);
        assert!(session.store_if_current(&owner, &ContractSnapshot::Uninitialized, generation));
        Ok(())
    }

    #[test]
    fn refresh_for_a_previous_identity_is_dropped() -> Result<(), HeirloomError> {
        let owner = Address::account(OWNER)?;
        let session = session_for(&owner)?;
        session.disconnect();
        let generation = session.mutation_generation();
        assert!(!session.store_if_current(&owner, &ContractSnapshot::Uninitialized, generation));
        Ok(())
    }
}
