pub mod chain;
pub mod config;
pub mod connection;
pub mod contract;
pub mod event;
#[cfg(target_arch = "wasm32")]
pub mod injected;
pub mod listener;
pub mod provider;
pub mod store;
pub mod subscription;

#[cfg(test)]
pub(crate) mod testing;

pub use self::{
    chain::{ChainId, NetworkDescriptor},
    config::ConnectionConfig,
    connection::{ConnectionManager, ConnectionState, Status},
    contract::{ContractHandle, EventId, RawEvent},
    event::Event,
    listener::{ContractEventSubscriber, EventRecord, Origin},
    provider::{ProviderHandle, SignerHandle, WalletProvider},
    store::{MessageSender, StoredValue},
    subscription::Subscription,
};

use self::{chain::ChainError, contract::ContractError, provider::ProviderError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("No wallet provider detected")]
    ProviderUnavailable,

    #[error("Chain switch rejected: {0}")]
    ChainSwitchRejected(ProviderError),

    #[error("Chain {0} is not known to the wallet")]
    UnrecognizedChain(ChainId),

    #[error("Account request rejected: {0}")]
    AccountRequestRejected(ProviderError),

    #[error("Wallet returned no accounts")]
    NoAccounts,

    #[error("Connect attempt superseded by a disconnect")]
    Superseded,

    #[error("Wallet is not connected")]
    NotConnected,

    #[error("Value must not be empty")]
    EmptyValue,

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Could not load past events: {0}")]
    EventQueryFailed(ContractError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Chain(#[from] ChainError),
}
