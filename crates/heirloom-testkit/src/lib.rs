//! Test doubles for heirloom-client: a rule-enforcing in-memory ledger, a
//! scripted signer, an instant clock and an axum gateway over the ledger.

mod clock;
mod gate;
mod gateway;
mod ledger;
mod signer;

use heirloom_client::{Address, AddressError, HeirloomConfig};

pub use clock::InstantClock;
pub use gate::Gate;
pub use gateway::{MockGateway, spawn_mock_gateway};
pub use ledger::{DEFAULT_SEQUENCE, MIN_RESOURCE_FEE, MemoryLedger, WillState};
pub use signer::{ScriptedSigner, SignerMode};

pub const OWNER: &str = "GBGBAKLJP3RVQ4K5HIKKFLOYC7CLAFSRIQG6QCBXD54BMWWJBXCYD5UV";
pub const BENEFICIARY: &str = "GBLO2AQ35M22ZDFFLDJQI7BOLAWVTAOU3Y2HFAC42DC5A5JRGM3CIAWU";
pub const STRANGER: &str = "GCFMUTZWO5HYFJT4KB6LTSLGPFEC4LGHM7ZNHBICE2KVPJLGWCJPWC2Q";
pub const CONTRACT: &str = "CDGIGIOWG5OESTIEH7OQEYHSDPAOYUO2ZSPWVO37SCONZUYEDN4L7FVM";
pub const TOKEN: &str = "CA6ENHU5NRMHLU32IPZVHVHYRZQ7Z6ASYZXO4NCXIZNEBMG2IFJ6AUB2";

/// Ledger clock at the start of every scenario.
pub const GENESIS_UNIX: u64 = 1_767_225_600;

pub fn account(raw: &str) -> Result<Address, AddressError> {
    Address::account(raw)
}

/// Testnet config for the fixture contract with a 1 ms poll interval.
pub fn test_config() -> Result<HeirloomConfig, AddressError> {
    let mut config =
        HeirloomConfig::for_contract(Address::contract(CONTRACT)?, Address::contract(TOKEN)?);
    config.poll.interval = std::time::Duration::from_millis(1);
    Ok(config)
}

/// A will owned by [`OWNER`] for [`BENEFICIARY`], last checked in at `last_check_in`.
pub fn owner_will(check_in_period: u64, last_check_in: u64) -> Result<WillState, AddressError> {
    Ok(WillState {
        owner: Address::account(OWNER)?,
        beneficiary: Address::account(BENEFICIARY)?,
        check_in_period,
        last_check_in,
    })
}
