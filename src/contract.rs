use std::rc::Rc;

use async_trait::async_trait;
use ethers::{
    abi::Token,
    types::{TransactionReceipt, H256},
};

use super::{provider::SignerHandle, subscription::Subscription};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractError {
    #[error("Call reverted: {0}")]
    Reverted(String),

    #[error("Transaction rejected by signer: {0}")]
    Rejected(String),

    #[error("Transaction dropped before confirmation")]
    Dropped,

    #[error("Event query failed: {0}")]
    Query(String),

    #[error("Rpc error: {0}")]
    Rpc(String),
}

/// Stable identity of an emitted log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId {
    pub transaction_hash: H256,
    pub log_index: u64,
}

/// An event occurrence as delivered by the RPC layer: identity (when the
/// source provides one) plus the positional, ABI-decoded arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub id: Option<EventId>,
    pub args: Vec<Token>,
}

impl RawEvent {
    pub fn new(args: Vec<Token>) -> Self {
        Self { id: None, args }
    }

    pub fn with_id(mut self, transaction_hash: H256, log_index: u64) -> Self {
        self.id = Some(EventId { transaction_hash, log_index });
        self
    }
}

pub type EventHandler = Rc<dyn Fn(RawEvent)>;

/// A submitted transaction awaiting inclusion.
#[async_trait(?Send)]
pub trait PendingTransaction {
    fn hash(&self) -> H256;

    async fn wait(self: Box<Self>) -> Result<TransactionReceipt, ContractError>;
}

/// Deployed contract storing a single string and emitting events.
#[async_trait(?Send)]
pub trait ContractHandle {
    async fn get(&self) -> Result<String, ContractError>;

    async fn set(
        &self,
        signer: &SignerHandle,
        value: &str,
    ) -> Result<Box<dyn PendingTransaction>, ContractError>;

    /// Submits `sendMessage(message)`, which emits the contract's message event
    /// once mined.
    async fn send_message(
        &self,
        signer: &SignerHandle,
        message: &str,
    ) -> Result<Box<dyn PendingTransaction>, ContractError>;

    /// Registers `handler` for live occurrences of `event`. Dropping the
    /// returned subscription is the `off` call.
    fn on(&self, event: &str, handler: EventHandler) -> Subscription;

    /// All past occurrences of `event`.
    async fn query_filter(&self, event: &str) -> Result<Vec<RawEvent>, ContractError>;
}
