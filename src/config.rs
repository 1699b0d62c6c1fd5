use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::chain::{rootstock_testnet, NetworkDescriptor};

pub const DEFAULT_EVENT_NAME: &str = "MessageSent";

/// Largest `decimals` value wallets accept for a native currency.
const MAX_CURRENCY_DECIMALS: u8 = 36;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Network {0} has no RPC url")]
    MissingRpcUrl(String),

    #[error("Native currency decimals out of range: {0}")]
    Decimals(u8),

    #[error("Event name must not be empty")]
    EmptyEventName,

    #[error("Malformed configuration: {0}")]
    Malformed(String),
}

/// Fixed deployment parameters. Never user input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Network every connect attempt switches the wallet to.
    #[serde(default = "rootstock_testnet")]
    pub network: NetworkDescriptor,
    /// Contract event surfaced by the event subscriber.
    #[serde(default = "default_event_name")]
    pub event_name: String,
}

fn default_event_name() -> String {
    DEFAULT_EVENT_NAME.to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { network: rootstock_testnet(), event_name: default_event_name() }
    }
}

impl ConnectionConfig {
    pub fn new(network: NetworkDescriptor) -> Self {
        Self { network, ..Default::default() }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| ConfigError::Malformed(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.rpc_urls.is_empty() {
            return Err(ConfigError::MissingRpcUrl(self.network.chain_name.clone()));
        }

        let decimals = self.network.native_currency.decimals;
        if decimals > MAX_CURRENCY_DECIMALS {
            return Err(ConfigError::Decimals(decimals));
        }

        if self.event_name.trim().is_empty() {
            return Err(ConfigError::EmptyEventName);
        }

        Ok(())
    }
}
