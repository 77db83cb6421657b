//! Error types for the identity client

use alloy_primitives::U256;
use gasless_relay::RelayError;
use thiserror::Error;

/// Caller mistakes rejected before anything touches the network.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("gasless transactions are unavailable: no relay channel")]
    NoRelayChannel,

    #[error("handle must not be empty")]
    EmptyHandle,
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    /// Revert or rejection reported by the identity contract, verbatim.
    #[error("{0}")]
    Contract(String),

    #[error("token 0 is the no-identity sentinel and has no profile")]
    ZeroToken,

    #[error("token id {0} does not fit in 64 bits")]
    TokenOverflow(U256),

    #[error("abi error: {0}")]
    Abi(#[from] alloy_sol_types::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl IdentityError {
    pub fn is_precondition(&self) -> bool {
        matches!(self, IdentityError::Precondition(_))
    }
}

pub type Result<T> = std::result::Result<T, IdentityError>;
