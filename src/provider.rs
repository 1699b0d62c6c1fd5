use std::{fmt, rc::Rc};

use async_trait::async_trait;
use ethers::types::Address;
use serde::{Deserialize, Serialize};

use super::{
    chain::{ChainId, NetworkDescriptor},
    subscription::Subscription,
};

/// The user rejected the request.
pub const USER_REJECTED_REQUEST: i64 = 4001;
/// The requested account or method has not been authorized by the user.
pub const UNAUTHORIZED: i64 = 4100;
/// The provider is disconnected from all chains.
pub const DISCONNECTED: i64 = 4900;
/// The provider is not connected to the requested chain.
pub const CHAIN_DISCONNECTED: i64 = 4901;
/// `wallet_switchEthereumChain` was asked for a chain the wallet does not know.
pub const UNRECOGNIZED_CHAIN: i64 = 4902;
/// A request of the same kind is already awaiting the user.
pub const REQUEST_PENDING: i64 = -32002;
pub const INTERNAL_ERROR: i64 = -32603;

/// Error object returned by an EIP-1193 provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("Provider error {code}: {message}")]
pub struct ProviderError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ProviderError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }

    pub fn user_rejected() -> Self {
        Self::new(USER_REJECTED_REQUEST, "User rejected the request.")
    }

    pub fn unrecognized_chain(chain_id: ChainId) -> Self {
        Self::new(UNRECOGNIZED_CHAIN, format!("Unrecognized chain ID \"{chain_id}\"."))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }

    pub fn is_unrecognized_chain(&self) -> bool {
        self.code == UNRECOGNIZED_CHAIN
    }

    pub fn is_user_rejection(&self) -> bool {
        self.code == USER_REJECTED_REQUEST
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderEventKind {
    AccountsChanged,
    ChainChanged,
    Disconnect,
}

impl ProviderEventKind {
    pub const ALL: [ProviderEventKind; 3] =
        [Self::AccountsChanged, Self::ChainChanged, Self::Disconnect];

    /// Event name used by `provider.on(...)`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccountsChanged => "accountsChanged",
            Self::ChainChanged => "chainChanged",
            Self::Disconnect => "disconnect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<Address>),
    /// Hex encoded chain id, as reported by the wallet.
    ChainChanged(String),
    Disconnect,
}

impl ProviderEvent {
    pub fn kind(&self) -> ProviderEventKind {
        match self {
            Self::AccountsChanged(_) => ProviderEventKind::AccountsChanged,
            Self::ChainChanged(_) => ProviderEventKind::ChainChanged,
            Self::Disconnect => ProviderEventKind::Disconnect,
        }
    }
}

pub type Listener = Rc<dyn Fn(ProviderEvent)>;

/// Capability to authorize transactions for one account on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignerHandle {
    pub address: Address,
    pub chain_id: ChainId,
}

/// Wallet capability injected into the page (EIP-1193 style).
#[async_trait(?Send)]
pub trait WalletProvider {
    /// `eth_chainId`, hex encoded.
    async fn chain_id(&self) -> Result<String, ProviderError>;

    /// `wallet_switchEthereumChain`.
    async fn switch_chain(&self, chain_id: ChainId) -> Result<(), ProviderError>;

    /// `wallet_addEthereumChain`.
    async fn add_chain(&self, network: &NetworkDescriptor) -> Result<(), ProviderError>;

    /// `eth_requestAccounts`. May prompt the user.
    async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError>;

    /// `eth_accounts`. Already authorized accounts, never prompts.
    async fn accounts(&self) -> Result<Vec<Address>, ProviderError>;

    /// Network the provider is currently bound to.
    async fn network(&self) -> Result<ChainId, ProviderError>;

    /// Signer for the currently selected account.
    async fn signer(&self) -> Result<SignerHandle, ProviderError>;

    fn subscribe(&self, kind: ProviderEventKind, listener: Listener) -> Subscription;
}

/// A provider bound to the chain it was created for.
///
/// Signers derived from a handle whose chain no longer matches the wallet
/// are refused, so a handle kept across a chain change cannot sign for the
/// wrong network.
#[derive(Clone)]
pub struct ProviderHandle {
    provider: Rc<dyn WalletProvider>,
    chain_id: ChainId,
}

impl ProviderHandle {
    pub fn bind(provider: Rc<dyn WalletProvider>, chain_id: ChainId) -> Self {
        Self { provider, chain_id }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn provider(&self) -> &Rc<dyn WalletProvider> {
        &self.provider
    }

    pub async fn signer(&self) -> Result<SignerHandle, ProviderError> {
        let signer = self.provider.signer().await?;
        if signer.chain_id != self.chain_id {
            return Err(ProviderError::new(
                CHAIN_DISCONNECTED,
                format!("network changed: {} => {}", self.chain_id, signer.chain_id),
            ));
        }
        Ok(signer)
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandle").field("chain_id", &self.chain_id).finish()
    }
}
