//! Types for the identity client

use crate::errors::IdentityError;
use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chain address of the connected wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalletAddress(pub Address);

impl WalletAddress {
    pub fn new(address: Address) -> Self {
        Self(address)
    }

    pub fn as_address(&self) -> Address {
        self.0
    }
}

impl From<Address> for WalletAddress {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

impl FromStr for WalletAddress {
    type Err = <Address as FromStr>::Err;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        raw.trim().parse().map(Self)
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity token id assigned by the contract. `0` means "no identity".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct IdentityToken(pub u64);

impl IdentityToken {
    pub const NONE: IdentityToken = IdentityToken(0);

    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    pub fn to_u256(self) -> U256 {
        U256::from(self.0)
    }
}

impl TryFrom<U256> for IdentityToken {
    type Error = IdentityError;

    fn try_from(value: U256) -> Result<Self, Self::Error> {
        if value > U256::from(u64::MAX) {
            return Err(IdentityError::TokenOverflow(value));
        }
        Ok(Self(value.as_limbs()[0]))
    }
}

impl fmt::Display for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// On-chain identity record as the UI renders it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: IdentityToken,
    pub handle: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintRequest {
    pub platform_id: u64,
    pub handle: String,
}

impl MintRequest {
    pub fn new(platform_id: u64, handle: impl Into<String>) -> Self {
        Self {
            platform_id,
            handle: handle.into(),
        }
    }
}

/// A mint handed to the chain but not yet confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMint {
    pub tx_hash: B256,
    pub request: MintRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
}
