//! Session context
//!
//! One [`IdentitySession`] owns the relay-backed contract client, the
//! resolver and the mint orchestrator for a connected wallet, and exposes
//! the state a UI renders. Resolutions are tagged with the address and an
//! epoch captured when they started; a result arriving after the address
//! changed is dropped. An applied resolution that finds a profile also
//! settles a mint whose wait was abandoned.

use crate::config::GaslessConfig;
use crate::contract::{IdentityContract, RelayIdentityContract};
use crate::errors::Result;
use crate::mint::{MintOrchestrator, MintOutcome, MintState};
use crate::resolution::{ProfileResolver, TaggedResolution};
use crate::types::{Profile, WalletAddress};
use gasless_relay::{
    HttpRelayTransport, RelayChannelBuilder, RelayError, RelayTransport, WalletProvider,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Whether gasless submission is possible in this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Ready,
    /// No wallet provider was injected
    NoProvider,
    /// The relay network could not be brought up
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    AddressChanged(Option<WalletAddress>),
    ProfileResolved {
        address: WalletAddress,
        profile: Option<Profile>,
    },
    Error(String),
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    Applied,
    /// The address changed while resolving; the result was dropped
    Stale,
    NoAddress,
    NoChannel,
}

/// Snapshot of everything a UI renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub address: Option<WalletAddress>,
    pub profile: Option<Profile>,
    pub mint_state: MintState,
    pub handle_input: String,
    /// Empty when there is no error
    pub last_error: String,
    pub channel: ChannelStatus,
}

#[derive(Debug, Default)]
struct SessionState {
    address: Option<WalletAddress>,
    epoch: u64,
    profile: Option<Profile>,
    last_error: String,
}

pub struct IdentitySession {
    channel: ChannelStatus,
    resolver: Option<ProfileResolver>,
    mint: MintOrchestrator,
    state: RwLock<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl IdentitySession {
    /// Bring up the relay channel over `provider` and bind the identity
    /// contract to it. A failed handshake still yields a session, one whose
    /// [`ChannelStatus`] says why nothing can be submitted.
    pub async fn init(
        config: &GaslessConfig,
        provider: Option<Arc<dyn WalletProvider>>,
        transport: Arc<dyn RelayTransport>,
    ) -> Self {
        let builder = RelayChannelBuilder::with_transport(config.relay.clone(), transport);
        match builder.build(provider).await {
            Ok(channel) => {
                let contract =
                    RelayIdentityContract::new(config.identity_contract, Arc::new(channel));
                info!(identity_contract = %config.identity_contract, "identity client ready");
                Self::assemble(ChannelStatus::Ready, Some(Arc::new(contract)), config.platform_id)
            }
            Err(RelayError::NoWalletProvider) => {
                Self::assemble(ChannelStatus::NoProvider, None, config.platform_id)
            }
            Err(err) => {
                Self::assemble(ChannelStatus::Unavailable(err.to_string()), None, config.platform_id)
            }
        }
    }

    /// [`Self::init`] with relay servers reached over HTTP.
    pub async fn connect(
        config: &GaslessConfig,
        provider: Option<Arc<dyn WalletProvider>>,
    ) -> Result<Self> {
        let transport = HttpRelayTransport::new(config.relay.http_timeout())?;
        Ok(Self::init(config, provider, Arc::new(transport)).await)
    }

    /// Session over an already constructed contract client.
    pub fn with_contract(contract: Arc<dyn IdentityContract>, platform_id: u64) -> Self {
        Self::assemble(ChannelStatus::Ready, Some(contract), platform_id)
    }

    fn assemble(
        channel: ChannelStatus,
        contract: Option<Arc<dyn IdentityContract>>,
        platform_id: u64,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            channel,
            resolver: contract.clone().map(ProfileResolver::new),
            mint: MintOrchestrator::new(contract, platform_id),
            state: RwLock::new(SessionState::default()),
            events,
        }
    }

    pub fn channel_status(&self) -> &ChannelStatus {
        &self.channel
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_mint(&self) -> broadcast::Receiver<MintState> {
        self.mint.subscribe()
    }

    pub fn set_handle_input(&self, handle: impl Into<String>) {
        self.mint.set_handle_input(handle);
    }

    pub fn view(&self) -> SessionView {
        let state = self.state.read();
        SessionView {
            address: state.address,
            profile: state.profile.clone(),
            mint_state: self.mint.state(),
            handle_input: self.mint.handle_input(),
            last_error: state.last_error.clone(),
            channel: self.channel.clone(),
        }
    }

    /// Switch to `address` (or to no wallet) and resolve its identity.
    pub async fn set_address(&self, address: Option<WalletAddress>) -> Result<ResolveOutcome> {
        let epoch = {
            let mut state = self.state.write();
            state.address = address;
            state.epoch += 1;
            state.profile = None;
            state.epoch
        };
        self.emit(SessionEvent::AddressChanged(address));
        self.resolve_for(address, epoch).await
    }

    /// Resolve the current address again.
    pub async fn refresh(&self) -> Result<ResolveOutcome> {
        let (address, epoch) = {
            let state = self.state.read();
            (state.address, state.epoch)
        };
        self.resolve_for(address, epoch).await
    }

    async fn resolve_for(&self, address: Option<WalletAddress>, epoch: u64) -> Result<ResolveOutcome> {
        let Some(address) = address else {
            return Ok(ResolveOutcome::NoAddress);
        };
        let Some(resolver) = &self.resolver else {
            debug!(%address, "no identity client; skipping resolution");
            return Ok(ResolveOutcome::NoChannel);
        };

        let TaggedResolution { address, profile } = resolver.resolve_tagged(address).await;

        let mut state = self.state.write();
        if state.epoch != epoch || state.address != Some(address) {
            debug!(%address, epoch, current_epoch = state.epoch, "discarding stale resolution");
            return Ok(ResolveOutcome::Stale);
        }
        match profile {
            Ok(profile) => {
                state.profile = profile.clone();
                state.last_error.clear();
                drop(state);
                if profile.is_some() && self.mint.settle_owned() {
                    debug!(%address, "resolved profile settled an in-flight mint");
                }
                self.emit(SessionEvent::ProfileResolved { address, profile });
                Ok(ResolveOutcome::Applied)
            }
            Err(err) => {
                state.last_error = err.to_string();
                drop(state);
                warn!(%address, error = %err, "identity resolution failed");
                self.emit(SessionEvent::Error(err.to_string()));
                Err(err)
            }
        }
    }

    /// Mint `handle` for the connected wallet. A confirmed mint re-resolves
    /// the profile; a failed one is recorded as the session error.
    pub async fn submit(&self, handle: &str) -> Result<MintOutcome> {
        let outcome = self.mint.submit(handle).await?;
        match &outcome {
            MintOutcome::Confirmed(_) => {
                self.state.write().last_error.clear();
                if let Err(err) = self.refresh().await {
                    warn!(error = %err, "profile refresh after mint failed");
                }
            }
            MintOutcome::Failed(message) => {
                self.state.write().last_error = message.clone();
                self.emit(SessionEvent::Error(message.clone()));
            }
            MintOutcome::AlreadyInFlight | MintOutcome::Superseded => {}
        }
        Ok(outcome)
    }

    /// Wallet disconnected: forget the address, profile, error and mint
    /// progress.
    pub fn teardown(&self) {
        {
            let mut state = self.state.write();
            state.address = None;
            state.epoch += 1;
            state.profile = None;
            state.last_error.clear();
        }
        self.mint.reset();
        info!("session torn down");
        self.emit(SessionEvent::Disconnected);
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}
