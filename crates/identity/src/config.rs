//! Deployment configuration
//!
//! Built-in defaults describe the reference deployment. A TOML file and
//! `GASLESS_`-prefixed environment variables override them, in that order
//! (`GASLESS_RELAY__PAYMASTER_ADDRESS` reaches into the nested relay table).

use crate::errors::Result;
use alloy_primitives::{address, Address};
use config::{Config, Environment, File as ConfigFile};
use gasless_relay::RelayConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_IDENTITY_CONTRACT: Address =
    address!("20c1Dec4ca935c5848B0F8Ea963713d8F3594c02");
pub const DEFAULT_PLATFORM_ID: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaslessConfig {
    /// Identity registry receiving `mint` calls
    pub identity_contract: Address,
    /// Platform namespace every mint is made under
    pub platform_id: u64,
    /// `pretty`, `compact` or `json`
    pub log_format: String,
    pub relay: RelayConfig,
}

impl Default for GaslessConfig {
    fn default() -> Self {
        Self {
            identity_contract: DEFAULT_IDENTITY_CONTRACT,
            platform_id: DEFAULT_PLATFORM_ID,
            log_format: "pretty".to_string(),
            relay: RelayConfig::default(),
        }
    }
}

impl GaslessConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(ConfigFile::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("GASLESS")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("relay.preferred_relays")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }
}
