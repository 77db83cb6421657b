//! Identity contract client
//!
//! [`IdentityContract`] is the seam between the workflow and the chain. The
//! on-chain implementation talks to the identity registry through a
//! [`RelayChannel`], so every call it makes is either a plain read or a
//! sponsored meta-transaction.

use crate::abi::IIdentityRegistry;
use crate::errors::{IdentityError, Result};
use crate::types::{IdentityToken, MintReceipt, MintRequest, PendingMint, Profile, WalletAddress};
use alloy_primitives::{Address, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use gasless_relay::{RelayChannel, RelayError};
use std::sync::Arc;
use tracing::{debug, info};

#[async_trait]
pub trait IdentityContract: Send + Sync {
    /// Token owned by `owner`, or [`IdentityToken::NONE`].
    async fn resolve_owner_token(&self, owner: WalletAddress) -> Result<IdentityToken>;

    /// Profile stored under `token`. Token `0` is refused.
    async fn read_profile(&self, token: IdentityToken) -> Result<Profile>;

    /// Hand a mint to the chain. Success of the mint is only known after
    /// [`IdentityContract::confirm`].
    async fn submit_mint(&self, request: &MintRequest) -> Result<PendingMint>;

    async fn confirm(&self, pending: PendingMint) -> Result<MintReceipt>;
}

/// Identity registry reached through the relay channel.
#[derive(Debug, Clone)]
pub struct RelayIdentityContract {
    address: Address,
    channel: Arc<RelayChannel>,
}

impl RelayIdentityContract {
    pub fn new(address: Address, channel: Arc<RelayChannel>) -> Self {
        Self { address, channel }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn channel(&self) -> &Arc<RelayChannel> {
        &self.channel
    }
}

#[async_trait]
impl IdentityContract for RelayIdentityContract {
    async fn resolve_owner_token(&self, owner: WalletAddress) -> Result<IdentityToken> {
        let call = IIdentityRegistry::walletOfOwnerCall {
            owner: owner.as_address(),
        };
        let raw = self.channel.call(self.address, call.abi_encode()).await?;
        let token = IIdentityRegistry::walletOfOwnerCall::abi_decode_returns(&raw, true)?._0;
        debug!(%owner, %token, "walletOfOwner");
        IdentityToken::try_from(token)
    }

    async fn read_profile(&self, token: IdentityToken) -> Result<Profile> {
        if token.is_none() {
            return Err(IdentityError::ZeroToken);
        }
        let call = IIdentityRegistry::profilesCall {
            tokenId: token.to_u256(),
        };
        let raw = self.channel.call(self.address, call.abi_encode()).await?;
        let record = IIdentityRegistry::profilesCall::abi_decode_returns(&raw, true)?;
        debug!(%token, handle = %record.handle, platform_id = %record.platformId, "profiles");
        Ok(Profile {
            id: token,
            handle: record.handle,
        })
    }

    async fn submit_mint(&self, request: &MintRequest) -> Result<PendingMint> {
        let call = IIdentityRegistry::mintCall {
            platformId: U256::from(request.platform_id),
            handle: request.handle.clone(),
        };
        let tx_hash = self
            .channel
            .send_transaction(self.address, call.abi_encode())
            .await?;
        info!(%tx_hash, handle = %request.handle, "mint submitted");
        Ok(PendingMint {
            tx_hash,
            request: request.clone(),
        })
    }

    async fn confirm(&self, pending: PendingMint) -> Result<MintReceipt> {
        match self.channel.wait_for_receipt(pending.tx_hash).await {
            Ok(receipt) => Ok(MintReceipt {
                tx_hash: receipt.tx_hash,
                block_number: receipt.block_number,
            }),
            Err(RelayError::Reverted { reason, .. }) => Err(IdentityError::Contract(reason)),
            Err(err) => Err(err.into()),
        }
    }
}
