//! Profile resolution for a wallet address

use crate::contract::IdentityContract;
use crate::errors::Result;
use crate::types::{Profile, WalletAddress};
use std::sync::Arc;
use tracing::debug;

/// Resolves the identity of a wallet in two reads: owner → token, then
/// token → profile. Token `0` short-circuits to "no identity".
#[derive(Clone)]
pub struct ProfileResolver {
    contract: Arc<dyn IdentityContract>,
}

/// Result of a resolution, tagged with the address it was made for.
#[derive(Debug)]
pub struct TaggedResolution {
    pub address: WalletAddress,
    pub profile: Result<Option<Profile>>,
}

impl ProfileResolver {
    pub fn new(contract: Arc<dyn IdentityContract>) -> Self {
        Self { contract }
    }

    pub async fn resolve(&self, address: WalletAddress) -> Result<Option<Profile>> {
        let token = self.contract.resolve_owner_token(address).await?;
        if token.is_none() {
            debug!(%address, "wallet owns no identity");
            return Ok(None);
        }

        let profile = self.contract.read_profile(token).await?;
        debug!(%address, %token, handle = %profile.handle, "identity resolved");
        Ok(Some(Profile {
            id: token,
            handle: profile.handle,
        }))
    }

    pub async fn resolve_tagged(&self, address: WalletAddress) -> TaggedResolution {
        TaggedResolution {
            address,
            profile: self.resolve(address).await,
        }
    }
}
