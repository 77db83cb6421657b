//! In-memory identity registry
//!
//! Mirrors the on-chain registry rules (one identity per owner, unique
//! handles, ids counted from 1) without a chain. Mints go through the same
//! submit / confirm split as relayed ones, so callers see the same
//! lifecycle. Test hooks can fail, hold, or count individual calls.

use crate::contract::IdentityContract;
use crate::errors::{IdentityError, Result};
use crate::types::{IdentityToken, MintReceipt, MintRequest, PendingMint, Profile, WalletAddress};
use alloy_primitives::{keccak256, Address, B256};
use async_trait::async_trait;
use gasless_relay::RelayError;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

const MAX_HANDLE_LEN: usize = 31;

#[derive(Debug, Clone)]
struct StoredProfile {
    owner: Address,
    platform_id: u64,
    handle: String,
}

#[derive(Debug, Clone)]
struct PendingEntry {
    owner: Address,
    request: MintRequest,
}

#[derive(Debug)]
pub struct InMemoryIdentityRegistry {
    /// Account whose mints are submitted
    signer: RwLock<Address>,
    /// Token id → profile
    profiles: Arc<RwLock<HashMap<u64, StoredProfile>>>,
    /// Owner → token id
    owner_to_token: Arc<RwLock<HashMap<Address, u64>>>,
    pending: Mutex<HashMap<B256, PendingEntry>>,
    next_id: AtomicU64,
    block_number: AtomicU64,
    hooks: Mutex<Hooks>,
    submit_calls: AtomicUsize,
    owner_reads: AtomicUsize,
    profile_reads: AtomicUsize,
}

#[derive(Debug, Default)]
struct Hooks {
    fail_next_submit: Option<String>,
    fail_reads: Option<String>,
    confirm_gate: Option<Arc<Notify>>,
    read_gates: HashMap<Address, Arc<Notify>>,
}

impl InMemoryIdentityRegistry {
    pub fn new() -> Self {
        Self {
            signer: RwLock::new(Address::ZERO),
            profiles: Arc::new(RwLock::new(HashMap::new())),
            owner_to_token: Arc::new(RwLock::new(HashMap::new())),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            block_number: AtomicU64::new(1),
            hooks: Mutex::new(Hooks::default()),
            submit_calls: AtomicUsize::new(0),
            owner_reads: AtomicUsize::new(0),
            profile_reads: AtomicUsize::new(0),
        }
    }

    pub fn with_signer(self, signer: Address) -> Self {
        self.set_signer(signer);
        self
    }

    pub fn set_signer(&self, signer: Address) {
        *self.signer.write() = signer;
    }

    /// Record an existing identity, bypassing the mint flow.
    pub fn seed(&self, owner: Address, token: IdentityToken, handle: impl Into<String>) {
        let stored = StoredProfile {
            owner,
            platform_id: 1,
            handle: handle.into(),
        };
        self.profiles.write().insert(token.0, stored);
        self.owner_to_token.write().insert(owner, token.0);
        self.next_id.fetch_max(token.0 + 1, Ordering::SeqCst);
    }

    /// Make the next `submit_mint` fail with `message`, as a refusing relay
    /// would.
    pub fn fail_next_submit(&self, message: impl Into<String>) {
        self.hooks.lock().fail_next_submit = Some(message.into());
    }

    /// Make every read fail with `message`; `None` restores reads.
    pub fn fail_reads(&self, message: Option<String>) {
        self.hooks.lock().fail_reads = message;
    }

    /// Hold the next confirmation until the returned gate is notified.
    pub fn pause_confirmations(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.hooks.lock().confirm_gate = Some(gate.clone());
        gate
    }

    /// Hold the next owner lookup for `owner` until the gate is notified.
    pub fn pause_reads(&self, owner: Address) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.hooks.lock().read_gates.insert(owner, gate.clone());
        gate
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn owner_reads(&self) -> usize {
        self.owner_reads.load(Ordering::SeqCst)
    }

    pub fn profile_reads(&self) -> usize {
        self.profile_reads.load(Ordering::SeqCst)
    }

    pub fn token_of(&self, owner: Address) -> IdentityToken {
        IdentityToken(self.owner_to_token.read().get(&owner).copied().unwrap_or(0))
    }

    fn read_failure(&self) -> Result<()> {
        match self.hooks.lock().fail_reads.clone() {
            Some(message) => Err(IdentityError::Contract(message)),
            None => Ok(()),
        }
    }

    /// Apply the registry rules to a pending mint.
    fn apply(&self, entry: PendingEntry) -> Result<IdentityToken> {
        let handle = entry.request.handle;
        if handle.len() > MAX_HANDLE_LEN {
            return Err(IdentityError::Contract("handle too long".to_string()));
        }
        if !handle
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(IdentityError::Contract(
                "handle contains invalid characters".to_string(),
            ));
        }

        let mut profiles = self.profiles.write();
        let mut owners = self.owner_to_token.write();
        if profiles.values().any(|stored| stored.handle == handle) {
            return Err(IdentityError::Contract("handle already taken".to_string()));
        }
        if owners.contains_key(&entry.owner) {
            return Err(IdentityError::Contract(
                "owner already has an identity".to_string(),
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        profiles.insert(
            id,
            StoredProfile {
                owner: entry.owner,
                platform_id: entry.request.platform_id,
                handle,
            },
        );
        owners.insert(entry.owner, id);
        Ok(IdentityToken(id))
    }
}

impl Default for InMemoryIdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityContract for InMemoryIdentityRegistry {
    async fn resolve_owner_token(&self, owner: WalletAddress) -> Result<IdentityToken> {
        self.owner_reads.fetch_add(1, Ordering::SeqCst);
        let gate = self.hooks.lock().read_gates.remove(&owner.as_address());
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.read_failure()?;
        Ok(self.token_of(owner.as_address()))
    }

    async fn read_profile(&self, token: IdentityToken) -> Result<Profile> {
        if token.is_none() {
            return Err(IdentityError::ZeroToken);
        }
        self.profile_reads.fetch_add(1, Ordering::SeqCst);
        self.read_failure()?;
        let profiles = self.profiles.read();
        let stored = profiles
            .get(&token.0)
            .ok_or_else(|| IdentityError::Contract(format!("no profile for token {token}")))?;
        debug!(%token, owner = %stored.owner, platform_id = stored.platform_id, "profile read");
        Ok(Profile {
            id: token,
            handle: stored.handle.clone(),
        })
    }

    async fn submit_mint(&self, request: &MintRequest) -> Result<PendingMint> {
        let attempt = self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.hooks.lock().fail_next_submit.take();
        if let Some(message) = scripted {
            return Err(RelayError::Rejected(message).into());
        }

        let owner = *self.signer.read();
        let mut preimage = owner.to_vec();
        preimage.extend_from_slice(request.handle.as_bytes());
        preimage.extend_from_slice(&(attempt as u64).to_be_bytes());
        let tx_hash = keccak256(&preimage);

        self.pending.lock().insert(
            tx_hash,
            PendingEntry {
                owner,
                request: request.clone(),
            },
        );
        debug!(%tx_hash, %owner, handle = %request.handle, "mint queued");
        Ok(PendingMint {
            tx_hash,
            request: request.clone(),
        })
    }

    async fn confirm(&self, pending: PendingMint) -> Result<MintReceipt> {
        let gate = self.hooks.lock().confirm_gate.take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let entry = self
            .pending
            .lock()
            .remove(&pending.tx_hash)
            .ok_or_else(|| IdentityError::Contract(format!("unknown transaction {}", pending.tx_hash)))?;
        let block_number = self.block_number.fetch_add(1, Ordering::SeqCst);
        let token = self.apply(entry)?;
        debug!(tx_hash = %pending.tx_hash, %token, block_number, "mint confirmed");
        Ok(MintReceipt {
            tx_hash: pending.tx_hash,
            block_number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: Address = Address::repeat_byte(0xa1);
    const BOB: Address = Address::repeat_byte(0xb0);

    async fn mint(registry: &InMemoryIdentityRegistry, handle: &str) -> Result<MintReceipt> {
        let pending = registry.submit_mint(&MintRequest::new(1, handle)).await?;
        registry.confirm(pending).await
    }

    #[tokio::test]
    async fn ids_start_at_one_and_owners_resolve() {
        let registry = InMemoryIdentityRegistry::new().with_signer(BOB);
        assert!(registry
            .resolve_owner_token(WalletAddress(BOB))
            .await
            .unwrap()
            .is_none());

        mint(&registry, "bob").await.unwrap();

        let token = registry.resolve_owner_token(WalletAddress(BOB)).await.unwrap();
        assert_eq!(token, IdentityToken(1));
        assert_eq!(registry.read_profile(token).await.unwrap().handle, "bob");
    }

    #[tokio::test]
    async fn taken_handle_reverts_on_confirmation() {
        let registry = InMemoryIdentityRegistry::new().with_signer(BOB);
        registry.seed(ALICE, IdentityToken(7), "bob");

        let pending = registry.submit_mint(&MintRequest::new(1, "bob")).await.unwrap();
        let err = registry.confirm(pending).await.unwrap_err();
        assert_eq!(err.to_string(), "handle already taken");
        assert!(registry.token_of(BOB).is_none());
    }

    #[tokio::test]
    async fn one_identity_per_owner() {
        let registry = InMemoryIdentityRegistry::new().with_signer(BOB);
        mint(&registry, "bob").await.unwrap();
        let err = mint(&registry, "bobby").await.unwrap_err();
        assert_eq!(err.to_string(), "owner already has an identity");
    }

    #[tokio::test]
    async fn handle_rules_are_enforced() {
        let registry = InMemoryIdentityRegistry::new().with_signer(BOB);
        let err = mint(&registry, "Bob!").await.unwrap_err();
        assert_eq!(err.to_string(), "handle contains invalid characters");
        let err = mint(&registry, &"b".repeat(32)).await.unwrap_err();
        assert_eq!(err.to_string(), "handle too long");
    }

    #[tokio::test]
    async fn seeded_ids_advance_the_counter() {
        let registry = InMemoryIdentityRegistry::new().with_signer(BOB);
        registry.seed(ALICE, IdentityToken(7), "alice");
        mint(&registry, "bob").await.unwrap();
        assert_eq!(registry.token_of(BOB), IdentityToken(8));
    }

    #[tokio::test]
    async fn scripted_submit_failure_is_verbatim() {
        let registry = InMemoryIdentityRegistry::new();
        registry.fail_next_submit("Paymaster balance too low");
        let err = registry
            .submit_mint(&MintRequest::new(1, "bob"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Paymaster balance too low");
        assert_eq!(registry.submit_calls(), 1);
    }

    #[tokio::test]
    async fn zero_token_has_no_profile() {
        let registry = InMemoryIdentityRegistry::new();
        assert!(matches!(
            registry.read_profile(IdentityToken::NONE).await,
            Err(IdentityError::ZeroToken)
        ));
        assert_eq!(registry.profile_reads(), 0);
    }
}
