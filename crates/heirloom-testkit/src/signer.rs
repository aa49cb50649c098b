use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use heirloom_client::{Address, PreparedTransaction, SignedEnvelope, SignerError, WalletSigner};
use uuid::Uuid;

use crate::gate::Gate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerMode {
    Approve,
    Decline,
    Unavailable(String),
    /// Signs, but returns an envelope correlated to a different request.
    Mismatch,
}

#[derive(Debug)]
struct SignerConfig {
    network: String,
    mode: SignerMode,
    hold: Option<Arc<Gate>>,
}

/// A wallet stand-in that approves, declines or fails on command and
/// encodes the request itself as the signed payload.
#[derive(Debug)]
pub struct ScriptedSigner {
    identity: Address,
    config: Mutex<SignerConfig>,
    signature_requests: AtomicUsize,
}

impl ScriptedSigner {
    #[must_use]
    pub fn new(identity: Address, network: &str) -> Self {
        Self {
            identity,
            config: Mutex::new(SignerConfig {
                network: network.to_string(),
                mode: SignerMode::Approve,
                hold: None,
            }),
            signature_requests: AtomicUsize::new(0),
        }
    }

    pub fn set_mode(&self, mode: SignerMode) {
        self.lock().mode = mode;
    }

    pub fn set_network(&self, network: &str) {
        self.lock().network = network.to_string();
    }

    /// Parks every following signature request until released.
    pub fn hold(&self) -> Arc<Gate> {
        let hold = Arc::new(Gate::default());
        self.lock().hold = Some(hold.clone());
        hold
    }

    pub fn clear_hold(&self) {
        self.lock().hold = None;
    }

    #[must_use]
    pub fn signature_requests(&self) -> usize {
        self.signature_requests.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn identity(&self) -> &Address {
        &self.identity
    }

    fn lock(&self) -> MutexGuard<'_, SignerConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl WalletSigner for ScriptedSigner {
    async fn connected_identity(&self) -> Result<Address, SignerError> {
        match &self.lock().mode {
            SignerMode::Unavailable(reason) => Err(SignerError::Unavailable(reason.clone())),
            _ => Ok(self.identity.clone()),
        }
    }

    async fn network(&self) -> Result<String, SignerError> {
        let config = self.lock();
        match &config.mode {
            SignerMode::Unavailable(reason) => Err(SignerError::Unavailable(reason.clone())),
            _ => Ok(config.network.clone()),
        }
    }

    async fn request_signature(
        &self,
        transaction: &PreparedTransaction,
        signer: &Address,
    ) -> Result<SignedEnvelope, SignerError> {
        self.signature_requests.fetch_add(1, Ordering::SeqCst);
        let hold = self.lock().hold.clone();
        if let Some(hold) = hold {
            hold.pass().await;
        }

        let mode = self.lock().mode.clone();
        let request = transaction.request();
        let request_id = match mode {
            SignerMode::Approve => request.request_id(),
            SignerMode::Mismatch => Uuid::nil(),
            SignerMode::Decline => return Err(SignerError::Declined),
            SignerMode::Unavailable(reason) => return Err(SignerError::Unavailable(reason)),
        };
        if signer != &self.identity {
            return Err(SignerError::Unavailable(format!(
                "no key for {signer} in this wallet"
            )));
        }

        let encoded = serde_json::to_vec(request)
            .map_err(|error| SignerError::Unavailable(error.to_string()))?;
        Ok(SignedEnvelope {
            request_id,
            function: request.function().to_string(),
            signer: signer.clone(),
            payload: STANDARD.encode(encoded),
        })
    }
}
