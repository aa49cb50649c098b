//! Ledger addresses in their base32 strkey form.
//!
//! A strkey is 56 base32 characters decoding to 35 bytes: one version byte,
//! a 32-byte payload and a CRC16-XModem checksum stored little-endian.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const STRKEY_LEN: usize = 56;
const RAW_LEN: usize = 35;
const VERSION_ACCOUNT: u8 = 6 << 3;
const VERSION_CONTRACT: u8 = 2 << 3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,
    #[error("address must be {STRKEY_LEN} characters, got {0}")]
    Length(usize),
    #[error("address contains invalid character {0:?}")]
    InvalidCharacter(char),
    #[error("address checksum mismatch")]
    Checksum,
    #[error("unknown address version byte {0:#04x}")]
    UnknownVersion(u8),
    #[error("expected {expected} address, got {found} address")]
    WrongKind {
        expected: AddressKind,
        found: AddressKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressKind {
    Account,
    Contract,
}

impl AddressKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Contract => "contract",
        }
    }

    fn from_version_byte(byte: u8) -> Result<Self, AddressError> {
        match byte {
            VERSION_ACCOUNT => Ok(Self::Account),
            VERSION_CONTRACT => Ok(Self::Contract),
            other => Err(AddressError::UnknownVersion(other)),
        }
    }
}

impl fmt::Display for AddressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A syntactically valid account (`G...`) or contract (`C...`) address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    kind: AddressKind,
    strkey: String,
}

impl Address {
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let strkey = raw.trim();
        if strkey.is_empty() {
            return Err(AddressError::Empty);
        }
        if strkey.len() != STRKEY_LEN {
            return Err(AddressError::Length(strkey.chars().count()));
        }

        let decoded = decode_base32(strkey)?;
        if decoded.len() != RAW_LEN {
            return Err(AddressError::Length(strkey.len()));
        }
        let (body, checksum) = decoded.split_at(RAW_LEN - 2);
        let expected = u16::from(checksum[0]) | (u16::from(checksum[1]) << 8);
        if crc16_xmodem(body) != expected {
            return Err(AddressError::Checksum);
        }

        Ok(Self {
            kind: AddressKind::from_version_byte(body[0])?,
            strkey: strkey.to_string(),
        })
    }

    pub fn account(raw: &str) -> Result<Self, AddressError> {
        Self::parse(raw)?.expect_kind(AddressKind::Account)
    }

    pub fn contract(raw: &str) -> Result<Self, AddressError> {
        Self::parse(raw)?.expect_kind(AddressKind::Contract)
    }

    fn expect_kind(self, expected: AddressKind) -> Result<Self, AddressError> {
        if self.kind == expected {
            Ok(self)
        } else {
            Err(AddressError::WrongKind {
                expected,
                found: self.kind,
            })
        }
    }

    #[must_use]
    pub fn kind(&self) -> AddressKind {
        self.kind
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.strkey
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.strkey)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.strkey
    }
}

fn decode_base32(input: &str) -> Result<Vec<u8>, AddressError> {
    let mut out = Vec::with_capacity(RAW_LEN);
    let mut buffer: u32 = 0;
    let mut bits: u32 = 0;
    for ch in input.chars() {
        let value = match ch {
            'A'..='Z' => u32::from(ch) - u32::from('A'),
            '2'..='7' => u32::from(ch) - u32::from('2') + 26,
            other => return Err(AddressError::InvalidCharacter(other)),
        };
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
            buffer &= (1 << bits) - 1;
        }
    }
    Ok(out)
}

fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for byte in data {
        crc ^= u16::from(*byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 == 0 {
                crc << 1
            } else {
                (crc << 1) ^ 0x1021
            };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::{Address, AddressError, AddressKind};

    const OWNER: &str = "GBGBAKLJP3RVQ4K5HIKKFLOYC7CLAFSRIQG6QCBXD54BMWWJBXCYD5UV";
    const CONTRACT: &str = "CDHBPMDG6HM6755ZRITJKGLZL7A6UY24Z4QFXZQA6ZDAATK7BYAM3RE5";

    #[test]
    fn account_strkey_parses() {
        let address = Address::account(OWNER);
        assert!(matches!(address, Ok(ref a) if a.kind() == AddressKind::Account));
    }

    #[test]
    fn contract_strkey_parses_and_trims() {
        let padded = format!("  {CONTRACT}\n");
        let address = Address::contract(&padded);
        assert!(matches!(address, Ok(ref a) if a.as_str() == CONTRACT));
    }

    #[test]
    fn flipped_character_fails_checksum() {
        let corrupted = "GBGBAKLJP3AVQ4K5HIKKFLOYC7CLAFSRIQG6QCBXD54BMWWJBXCYD5UV";
        assert_eq!(Address::parse(corrupted), Err(AddressError::Checksum));
    }

    #[test]
    fn lowercase_is_rejected() {
        let lowered = OWNER.to_ascii_lowercase();
        assert!(matches!(
            Address::parse(&lowered),
            Err(AddressError::InvalidCharacter(_))
        ));
    }

    #[test]
    fn short_input_reports_length() {
        assert_eq!(Address::parse("GABC"), Err(AddressError::Length(4)));
        assert_eq!(Address::parse("   "), Err(AddressError::Empty));
    }

    #[test]
    fn kind_mismatch_is_reported() {
        assert_eq!(
            Address::account(CONTRACT),
            Err(AddressError::WrongKind {
                expected: AddressKind::Account,
                found: AddressKind::Contract,
            })
        );
    }

    #[test]
    fn serde_round_trip_validates() -> Result<(), serde_json::Error> {
        let address: Address = serde_json::from_str(&format!("\"{OWNER}\""))?;
        assert_eq!(address.as_str(), OWNER);
        assert!(serde_json::from_str::<Address>("\"GNOPE\"").is_err());
        Ok(())
    }
}
