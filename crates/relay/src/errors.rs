//! Error types for the relay channel

use crate::provider::ProviderError;
use alloy_primitives::{Address, B256};
use thiserror::Error;

/// Why the relay network could not be brought up for this session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    #[error("wallet exposes no accounts")]
    NoAccounts,

    #[error("paymaster {paymaster} is not wired to a relay hub and forwarder")]
    SponsorNotConfigured { paymaster: Address },

    #[error("paymaster {paymaster} rejected the request: {reason}")]
    SponsorRejected { paymaster: Address, reason: String },

    #[error("no responsive relay servers")]
    NoActiveRelays,

    #[error("relay handshake failed: {0}")]
    Handshake(String),
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("no wallet provider available")]
    NoWalletProvider,

    #[error("relay unavailable: {0}")]
    Unavailable(UnavailableReason),

    /// A relay refused the meta-transaction; carries the relay's own message.
    #[error("{0}")]
    Rejected(String),

    #[error("transaction {tx_hash} reverted: {reason}")]
    Reverted { tx_hash: B256, reason: String },

    #[error("timed out waiting for transaction {0}")]
    Timeout(B256),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url error: {0}")]
    Url(#[from] url::ParseError),

    #[error("abi error: {0}")]
    Abi(#[from] alloy_sol_types::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("parse error: {0}")]
    Parse(String),
}

impl RelayError {
    pub(crate) fn parse_error(msg: impl Into<String>) -> Self {
        RelayError::Parse(msg.into())
    }

    /// True for failures that mean gasless submission is off for the session.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            RelayError::NoWalletProvider | RelayError::Unavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
