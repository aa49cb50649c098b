//! External signer boundary. The signer holds the keys; this crate only asks
//! it for a signature over a finalized transaction.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::address::{Address, AddressKind};
use crate::error::HeirloomError;
use crate::request::OperationRequest;
use crate::simulate::SimulatedCall;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    #[error("user declined the signature request")]
    Declined,
    #[error("signer unavailable: {0}")]
    Unavailable(String),
}

impl From<SignerError> for HeirloomError {
    fn from(value: SignerError) -> Self {
        match value {
            SignerError::Declined => Self::SignerDeclined,
            SignerError::Unavailable(reason) => Self::SignerUnavailable(reason),
        }
    }
}

/// A request assembled with its simulation data and final fee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedTransaction {
    request: OperationRequest,
    resource_fee: u64,
    total_fee: u64,
    transaction_data: String,
}

impl PreparedTransaction {
    #[must_use]
    pub fn assemble(request: OperationRequest, simulated: &SimulatedCall) -> Self {
        let resource_fee = simulated.resources.min_resource_fee;
        let total_fee = u64::from(request.fee()).saturating_add(resource_fee);
        Self {
            request,
            resource_fee,
            total_fee,
            transaction_data: simulated.transaction_data.clone(),
        }
    }

    #[must_use]
    pub fn request(&self) -> &OperationRequest {
        &self.request
    }

    #[must_use]
    pub fn resource_fee(&self) -> u64 {
        self.resource_fee
    }

    #[must_use]
    pub fn total_fee(&self) -> u64 {
        self.total_fee
    }

    #[must_use]
    pub fn transaction_data(&self) -> &str {
        &self.transaction_data
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub request_id: Uuid,
    pub function: String,
    pub signer: Address,
    /// Signed transaction bytes, encoded by the signer.
    pub payload: String,
}

impl SignedEnvelope {
    /// Hex SHA-256 of the payload, used to correlate log lines.
    #[must_use]
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.payload.as_bytes()))
    }
}

#[async_trait]
pub trait WalletSigner: Send + Sync {
    async fn connected_identity(&self) -> Result<Address, SignerError>;

    async fn network(&self) -> Result<String, SignerError>;

    async fn request_signature(
        &self,
        transaction: &PreparedTransaction,
        signer: &Address,
    ) -> Result<SignedEnvelope, SignerError>;
}

pub struct SignerGateway {
    signer: Arc<dyn WalletSigner>,
}

impl SignerGateway {
    pub fn new(signer: Arc<dyn WalletSigner>) -> Self {
        Self { signer }
    }

    /// Resolves the connected identity after checking the signer is on the
    /// expected network.
    pub async fn connect(&self, expected_network: &str) -> Result<Address, HeirloomError> {
        let network = self.signer.network().await.map_err(|error| {
            tracing::warn!(reason = %error, "signer network lookup failed");
            HeirloomError::from(error)
        })?;
        if !network.trim().eq_ignore_ascii_case(expected_network.trim()) {
            tracing::warn!(
                expected = expected_network,
                actual = %network,
                "signer is on the wrong network"
            );
            return Err(HeirloomError::WrongNetwork {
                expected: expected_network.to_string(),
                actual: network,
            });
        }

        let identity = self.signer.connected_identity().await.map_err(|error| {
            tracing::warn!(reason = %error, "signer identity lookup failed");
            HeirloomError::from(error)
        })?;
        if identity.kind() != AddressKind::Account {
            return Err(HeirloomError::SignerUnavailable(format!(
                "signer identity {identity} is not an account"
            )));
        }
        Ok(identity)
    }

    /// Single attempt; declines and unavailability are reported, never retried.
    pub async fn sign(
        &self,
        transaction: &PreparedTransaction,
        identity: &Address,
    ) -> Result<SignedEnvelope, HeirloomError> {
        let request = transaction.request();
        let envelope = match self.signer.request_signature(transaction, identity).await {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::warn!(
                    function = request.function(),
                    request_id = %request.request_id(),
                    reason = %error,
                    "signature not obtained"
                );
                return Err(error.into());
            }
        };

        if envelope.request_id != request.request_id() || envelope.function != request.function() {
            tracing::warn!(
                expected_request_id = %request.request_id(),
                actual_request_id = %envelope.request_id,
                "signer returned an envelope for a different request"
            );
            return Err(HeirloomError::SignerUnavailable(format!(
                "signer returned envelope for {} ({}) instead of {} ({})",
                envelope.function,
                envelope.request_id,
                request.function(),
                request.request_id()
            )));
        }

        tracing::info!(
            function = request.function(),
            request_id = %request.request_id(),
            digest = %envelope.digest(),
            total_fee = transaction.total_fee(),
            "signature obtained"
        );
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::{PreparedTransaction, SignedEnvelope, SignerError, SignerGateway, WalletSigner};
    use crate::address::Address;
    use crate::config::HeirloomConfig;
    use crate::error::HeirloomError;
    use crate::request::{ContractCall, Mutation, RequestBuilder};
    use crate::rpc::{AccountState, ResourceEstimate};
    use crate::simulate::SimulatedCall;
    use crate::value::ScValue;

    const OWNER: &str = "GBGBAKLJP3RVQ4K5HIKKFLOYC7CLAFSRIQG6QCBXD54BMWWJBXCYD5UV";
    const CONTRACT: &str = "CDGIGIOWG5OESTIEH7OQEYHSDPAOYUO2ZSPWVO37SCONZUYEDN4L7FVM";
    const TOKEN: &str = "CA6ENHU5NRMHLU32IPZVHVHYRZQ7Z6ASYZXO4NCXIZNEBMG2IFJ6AUB2";

    enum Behavior {
        Echo,
        WrongRequest,
        Fail(SignerError),
    }

    struct FixedSigner {
        network: String,
        behavior: Behavior,
    }

    #[async_trait]
    impl WalletSigner for FixedSigner {
        async fn connected_identity(&self) -> Result<Address, SignerError> {
            Address::account(OWNER).map_err(|error| SignerError::Unavailable(error.to_string()))
        }

        async fn network(&self) -> Result<String, SignerError> {
            Ok(self.network.clone())
        }

        async fn request_signature(
            &self,
            transaction: &PreparedTransaction,
            signer: &Address,
        ) -> Result<SignedEnvelope, SignerError> {
            let request_id = match &self.behavior {
                Behavior::Echo => transaction.request().request_id(),
                Behavior::WrongRequest => Uuid::nil(),
                Behavior::Fail(error) => return Err(error.clone()),
            };
            Ok(SignedEnvelope {
                request_id,
                function: transaction.request().function().to_string(),
                signer: signer.clone(),
                payload: "signed".to_string(),
            })
        }
    }

    fn prepared() -> Result<(PreparedTransaction, Address), HeirloomError> {
        let owner = Address::account(OWNER)?;
        let config =
            HeirloomConfig::for_contract(Address::contract(CONTRACT)?, Address::contract(TOKEN)?);
        let request = RequestBuilder::from_config(&config).prepare(
            &ContractCall::from(Mutation::CheckIn { owner: owner.clone() }),
            &owner,
            &AccountState { sequence: 9 },
        )?;
        let simulated = SimulatedCall {
            return_value: ScValue::Void,
            resources: ResourceEstimate {
                min_resource_fee: 2_500,
                ..ResourceEstimate::default()
            },
            transaction_data: "data".to_string(),
        };
        Ok((PreparedTransaction::assemble(request, &simulated), owner))
    }

    fn gateway(network: &str, behavior: Behavior) -> SignerGateway {
        SignerGateway::new(Arc::new(FixedSigner {
            network: network.to_string(),
            behavior,
        }))
    }

    #[test]
    fn total_fee_adds_resource_fee_to_tier_fee() -> Result<(), HeirloomError> {
        let (transaction, _) = prepared()?;
        assert_eq!(transaction.resource_fee(), 2_500);
        assert_eq!(transaction.total_fee(), 102_500);
        assert_eq!(transaction.transaction_data(), "data");
        Ok(())
    }

    #[tokio::test]
    async fn declined_and_unavailable_stay_distinct() -> Result<(), HeirloomError> {
        let (transaction, owner) = prepared()?;
        let declined = gateway("TESTNET", Behavior::Fail(SignerError::Declined))
            .sign(&transaction, &owner)
            .await;
        assert_eq!(declined, Err(HeirloomError::SignerDeclined));

        let locked = gateway(
            "TESTNET",
            Behavior::Fail(SignerError::Unavailable("locked".to_string())),
        )
        .sign(&transaction, &owner)
        .await;
        assert_eq!(locked, Err(HeirloomError::SignerUnavailable("locked".to_string())));
        Ok(())
    }

    #[tokio::test]
    async fn mismatched_envelope_is_rejected() -> Result<(), HeirloomError> {
        let (transaction, owner) = prepared()?;
        let result = gateway("TESTNET", Behavior::WrongRequest)
            .sign(&transaction, &owner)
            .await;
        assert!(matches!(result, Err(HeirloomError::SignerUnavailable(_))));

        let envelope = gateway("TESTNET", Behavior::Echo)
            .sign(&transaction, &owner)
            .await?;
        assert_eq!(envelope.digest().len(), 64);
        Ok(())
    }

    #[tokio::test]
    async fn connect_checks_network_case_insensitively() -> Result<(), HeirloomError> {
        let identity = gateway("testnet", Behavior::Echo).connect("TESTNET").await?;
        assert_eq!(identity.as_str(), OWNER);

        let wrong = gateway("PUBLIC", Behavior::Echo).connect("TESTNET").await;
        assert_eq!(
            wrong,
            Err(HeirloomError::WrongNetwork {
                expected: "TESTNET".to_string(),
                actual: "PUBLIC".to_string(),
            })
        );
        Ok(())
    }
}
