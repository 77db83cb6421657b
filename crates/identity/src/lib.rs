//! Gasless Identity Mint
//!
//! A wallet holder claims a unique on-chain identity handle without paying
//! gas. The identity registry is reached through a fee-relay channel
//! (`gasless-relay`); this crate resolves whether the wallet already owns an
//! identity and drives a single in-flight mint at a time.

pub mod abi;
pub mod config;
pub mod contract;
pub mod errors;
pub mod logging;
pub mod mint;
pub mod registry;
pub mod resolution;
pub mod session;
pub mod types;

pub use crate::config::GaslessConfig;
pub use contract::{IdentityContract, RelayIdentityContract};
pub use errors::*;
pub use logging::{init_logging, LogFormat};
pub use mint::{MintOrchestrator, MintOutcome, MintState};
pub use registry::InMemoryIdentityRegistry;
pub use resolution::{ProfileResolver, TaggedResolution};
pub use session::{ChannelStatus, IdentitySession, ResolveOutcome, SessionEvent, SessionView};
pub use types::*;
