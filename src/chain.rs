use std::{fmt::Display, num::ParseIntError, str::FromStr};

use derive_more::{From, Into};
use log::error;
use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use url::Url;

/// Numeric chain identifier. Wallets exchange it as a `0x`-prefixed hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, From, Into)]
pub struct ChainId(pub u64);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("Chain id provided in bad format")]
    BadFormat,

    #[error(transparent)]
    ParseIntError(#[from] ParseIntError),
}

impl ChainId {
    pub fn to_hex(&self) -> String {
        format!("{:#x}", self.0)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl FromStr for ChainId {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ChainError::BadFormat);
        }

        // Integer parsing tolerates a leading `+`; chain ids are digits only.
        let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => (hex, 16),
            None => (s, 10),
        };
        if digits.is_empty() || digits.starts_with(['+', '-']) {
            return Err(ChainError::BadFormat);
        }

        Ok(Self(u64::from_str_radix(digits, radix)?))
    }
}

impl Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl PartialEq<u64> for ChainId {
    fn eq(&self, other: &u64) -> bool {
        self.0 == *other
    }
}

impl Serialize for ChainId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D>(deserializer: D) -> Result<ChainId, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        s.parse::<ChainId>().map_err(D::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Everything a wallet needs to add a network, laid out exactly like the
/// `wallet_addEthereumChain` parameter object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDescriptor {
    pub chain_id: ChainId,
    pub chain_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<Url>,
    #[serde(default)]
    pub block_explorer_urls: Vec<Url>,
}

impl NetworkDescriptor {
    pub fn is_target(&self, chain_id: ChainId) -> bool {
        self.chain_id == chain_id
    }

    pub fn rpc_url(&self) -> Option<&Url> {
        self.rpc_urls.first()
    }

    pub fn explorer_url(&self) -> Option<&Url> {
        self.block_explorer_urls.first()
    }
}

fn descriptor(
    chain_id: u64,
    chain_name: &str,
    symbol: &str,
    rpc_url: &str,
    explorer_url: &str,
) -> NetworkDescriptor {
    NetworkDescriptor {
        chain_id: ChainId(chain_id),
        chain_name: chain_name.to_string(),
        native_currency: NativeCurrency {
            name: symbol.to_string(),
            symbol: symbol.to_string(),
            decimals: 18,
        },
        rpc_urls: preset_url(chain_name, rpc_url),
        block_explorer_urls: preset_url(chain_name, explorer_url),
    }
}

fn preset_url(chain_name: &str, url: &str) -> Vec<Url> {
    match Url::parse(url) {
        Ok(url) => vec![url],
        Err(err) => {
            error!("Bad {chain_name} preset url {url:?}: {err}");
            Vec::new()
        }
    }
}

pub const ROOTSTOCK_MAINNET_CHAIN_ID: ChainId = ChainId(30);
pub const ROOTSTOCK_TESTNET_CHAIN_ID: ChainId = ChainId(31);

pub fn rootstock_mainnet() -> NetworkDescriptor {
    descriptor(
        ROOTSTOCK_MAINNET_CHAIN_ID.0,
        "Rootstock Mainnet",
        "RBTC",
        "https://public-node.rsk.co",
        "https://explorer.rsk.co",
    )
}

pub fn rootstock_testnet() -> NetworkDescriptor {
    descriptor(
        ROOTSTOCK_TESTNET_CHAIN_ID.0,
        "Rootstock Testnet",
        "tRBTC",
        "https://public-node.testnet.rsk.co",
        "https://explorer.testnet.rootstock.io/",
    )
}
