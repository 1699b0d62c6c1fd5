//! Scripted wallet and contract doubles shared by the unit tests.

use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use async_trait::async_trait;
use ethers::{
    abi::Token,
    types::{Address, TransactionReceipt, H256, U256, U64},
};
use futures::channel::oneshot;

use crate::{
    chain::{ChainId, NetworkDescriptor},
    contract::{ContractError, ContractHandle, EventHandler, PendingTransaction, RawEvent},
    provider::{
        Listener, ProviderError, ProviderEvent, ProviderEventKind, SignerHandle, WalletProvider,
        UNAUTHORIZED,
    },
    subscription::Subscription,
};

pub fn address(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

pub fn message_sent(sender: Address, payload: &str, timestamp: u64) -> RawEvent {
    RawEvent::new(vec![
        Token::Address(sender),
        Token::String(payload.to_string()),
        Token::Uint(U256::from(timestamp)),
    ])
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ChainId,
    SwitchChain(ChainId),
    AddChain(NetworkDescriptor),
    RequestAccounts,
    Accounts,
    Network,
    Signer,
}

type Registry<T> = Rc<RefCell<Vec<(u64, T)>>>;

fn register<T: 'static>(registry: &Registry<T>, next_id: &Cell<u64>, entry: T) -> Subscription {
    let id = next_id.get();
    next_id.set(id + 1);
    registry.borrow_mut().push((id, entry));

    let registry: Weak<RefCell<Vec<(u64, T)>>> = Rc::downgrade(registry);
    Subscription::new(move || {
        if let Some(registry) = registry.upgrade() {
            registry.borrow_mut().retain(|(entry_id, _)| *entry_id != id);
        }
    })
}

async fn pass(gate: &RefCell<Option<oneshot::Receiver<()>>>) {
    let gate = gate.borrow_mut().take();
    if let Some(gate) = gate {
        let _ = gate.await;
    }
}

#[derive(Default)]
pub struct MockProvider {
    chain: RefCell<String>,
    authorized: RefCell<Vec<Address>>,
    approved: RefCell<Vec<Address>>,
    switch_error: RefCell<Option<ProviderError>>,
    add_error: RefCell<Option<ProviderError>>,
    accounts_error: RefCell<Option<ProviderError>>,
    accounts_gate: RefCell<Option<oneshot::Receiver<()>>>,
    signer_gate: RefCell<Option<oneshot::Receiver<()>>>,
    calls: RefCell<Vec<Call>>,
    listeners: Registry<(ProviderEventKind, Listener)>,
    next_id: Cell<u64>,
}

impl MockProvider {
    /// A wallet on `chain` that grants `address(1)` when asked for accounts.
    pub fn new(chain: &str) -> Rc<Self> {
        let provider = Self::default();
        *provider.chain.borrow_mut() = chain.to_string();
        *provider.approved.borrow_mut() = vec![address(1)];
        Rc::new(provider)
    }

    /// Marks `accounts` as already authorized for this site.
    pub fn authorize(&self, accounts: Vec<Address>) {
        *self.approved.borrow_mut() = accounts.clone();
        *self.authorized.borrow_mut() = accounts;
    }

    pub fn set_chain(&self, chain: &str) {
        *self.chain.borrow_mut() = chain.to_string();
    }

    pub fn fail_switch(&self, err: ProviderError) {
        *self.switch_error.borrow_mut() = Some(err);
    }

    pub fn fail_add(&self, err: ProviderError) {
        *self.add_error.borrow_mut() = Some(err);
    }

    pub fn fail_accounts(&self, err: ProviderError) {
        *self.accounts_error.borrow_mut() = Some(err);
    }

    /// Holds the next `eth_requestAccounts` until the sender fires or drops.
    pub fn hold_request_accounts(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.accounts_gate.borrow_mut() = Some(rx);
        tx
    }

    /// Holds the next signer derivation until the sender fires or drops.
    pub fn hold_signer(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.signer_gate.borrow_mut() = Some(rx);
        tx
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.borrow().iter().filter(|call| pred(call)).count()
    }

    pub fn listener_count(&self, kind: ProviderEventKind) -> usize {
        self.listeners.borrow().iter().filter(|(_, (k, _))| *k == kind).count()
    }

    pub fn emit(&self, event: ProviderEvent) {
        let kind = event.kind();
        let listeners = self
            .listeners
            .borrow()
            .iter()
            .filter(|(_, (k, _))| *k == kind)
            .map(|(_, (_, listener))| listener.clone())
            .collect::<Vec<_>>();
        for listener in listeners {
            listener(event.clone());
        }
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn current_chain(&self) -> Result<ChainId, ProviderError> {
        self.chain.borrow().parse::<ChainId>().map_err(|err| ProviderError::internal(err.to_string()))
    }
}

#[async_trait(?Send)]
impl WalletProvider for MockProvider {
    async fn chain_id(&self) -> Result<String, ProviderError> {
        self.record(Call::ChainId);
        Ok(self.chain.borrow().clone())
    }

    async fn switch_chain(&self, chain_id: ChainId) -> Result<(), ProviderError> {
        self.record(Call::SwitchChain(chain_id));
        if let Some(err) = self.switch_error.borrow_mut().take() {
            return Err(err);
        }
        self.set_chain(&chain_id.to_hex());
        Ok(())
    }

    async fn add_chain(&self, network: &NetworkDescriptor) -> Result<(), ProviderError> {
        self.record(Call::AddChain(network.clone()));
        if let Some(err) = self.add_error.borrow_mut().take() {
            return Err(err);
        }
        self.set_chain(&network.chain_id.to_hex());
        Ok(())
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        self.record(Call::RequestAccounts);
        pass(&self.accounts_gate).await;
        if let Some(err) = self.accounts_error.borrow_mut().take() {
            return Err(err);
        }
        let approved = self.approved.borrow().clone();
        *self.authorized.borrow_mut() = approved.clone();
        Ok(approved)
    }

    async fn accounts(&self) -> Result<Vec<Address>, ProviderError> {
        self.record(Call::Accounts);
        Ok(self.authorized.borrow().clone())
    }

    async fn network(&self) -> Result<ChainId, ProviderError> {
        self.record(Call::Network);
        self.current_chain()
    }

    async fn signer(&self) -> Result<SignerHandle, ProviderError> {
        self.record(Call::Signer);
        pass(&self.signer_gate).await;
        let address = self
            .authorized
            .borrow()
            .first()
            .copied()
            .ok_or_else(|| ProviderError::new(UNAUTHORIZED, "no authorized account"))?;
        Ok(SignerHandle { address, chain_id: self.current_chain()? })
    }

    fn subscribe(&self, kind: ProviderEventKind, listener: Listener) -> Subscription {
        register(&self.listeners, &self.next_id, (kind, listener))
    }
}

pub struct MockTransaction {
    hash: H256,
    error: Option<ContractError>,
    reverted: bool,
    gate: Option<oneshot::Receiver<()>>,
    /// Runs once the transaction is mined successfully.
    on_confirm: Box<dyn FnOnce()>,
}

#[async_trait(?Send)]
impl PendingTransaction for MockTransaction {
    fn hash(&self) -> H256 {
        self.hash
    }

    async fn wait(self: Box<Self>) -> Result<TransactionReceipt, ContractError> {
        let MockTransaction { hash, error, reverted, gate, on_confirm } = *self;
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if let Some(err) = error {
            return Err(err);
        }
        let mut receipt = TransactionReceipt::default();
        receipt.transaction_hash = hash;
        if reverted {
            receipt.status = Some(U64::zero());
        } else {
            receipt.status = Some(U64::one());
            on_confirm();
        }
        Ok(receipt)
    }
}

fn dispatch(handlers: &Registry<(String, EventHandler)>, event: &str, raw: RawEvent) {
    let handlers = handlers
        .borrow()
        .iter()
        .filter(|(_, (name, _))| name == event)
        .map(|(_, (_, handler))| handler.clone())
        .collect::<Vec<_>>();
    for handler in handlers {
        handler(raw.clone());
    }
}

#[derive(Default)]
pub struct MockContract {
    stored: Rc<RefCell<String>>,
    get_error: RefCell<Option<ContractError>>,
    send_error: RefCell<Option<ContractError>>,
    wait_error: RefCell<Option<ContractError>>,
    wait_gate: RefCell<Option<oneshot::Receiver<()>>>,
    revert: Cell<bool>,
    history: RefCell<Option<Result<Vec<RawEvent>, ContractError>>>,
    history_gate: RefCell<Option<oneshot::Receiver<()>>>,
    writes: RefCell<Vec<(SignerHandle, String)>>,
    messages: RefCell<Vec<(SignerHandle, String)>>,
    nonce: Cell<u64>,
    queries: Cell<usize>,
    handlers: Registry<(String, EventHandler)>,
    next_id: Cell<u64>,
}

impl MockContract {
    pub fn new(stored: &str) -> Rc<Self> {
        let contract = Self::default();
        *contract.stored.borrow_mut() = stored.to_string();
        Rc::new(contract)
    }

    pub fn stored(&self) -> String {
        self.stored.borrow().clone()
    }

    pub fn fail_get(&self, err: ContractError) {
        *self.get_error.borrow_mut() = Some(err);
    }

    pub fn fail_send(&self, err: ContractError) {
        *self.send_error.borrow_mut() = Some(err);
    }

    pub fn fail_wait(&self, err: ContractError) {
        *self.wait_error.borrow_mut() = Some(err);
    }

    /// Holds the next transaction's confirmation until the sender fires or drops.
    pub fn hold_wait(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.wait_gate.borrow_mut() = Some(rx);
        tx
    }

    pub fn revert_next(&self) {
        self.revert.set(true);
    }

    pub fn set_history(&self, history: Result<Vec<RawEvent>, ContractError>) {
        *self.history.borrow_mut() = Some(history);
    }

    pub fn hold_history(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.history_gate.borrow_mut() = Some(rx);
        tx
    }

    pub fn writes(&self) -> Vec<(SignerHandle, String)> {
        self.writes.borrow().clone()
    }

    pub fn messages(&self) -> Vec<(SignerHandle, String)> {
        self.messages.borrow().clone()
    }

    pub fn queries(&self) -> usize {
        self.queries.get()
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.borrow().iter().filter(|(_, (name, _))| name == event).count()
    }

    pub fn emit(&self, event: &str, raw: RawEvent) {
        dispatch(&self.handlers, event, raw);
    }

    fn submit(
        &self,
        on_confirm: Box<dyn FnOnce()>,
    ) -> Result<Box<dyn PendingTransaction>, ContractError> {
        if let Some(err) = self.send_error.borrow_mut().take() {
            return Err(err);
        }
        let nonce = self.nonce.get() + 1;
        self.nonce.set(nonce);
        Ok(Box::new(MockTransaction {
            hash: H256::from_low_u64_be(nonce),
            error: self.wait_error.borrow_mut().take(),
            reverted: self.revert.replace(false),
            gate: self.wait_gate.borrow_mut().take(),
            on_confirm,
        }))
    }
}

#[async_trait(?Send)]
impl ContractHandle for MockContract {
    async fn get(&self) -> Result<String, ContractError> {
        if let Some(err) = self.get_error.borrow_mut().take() {
            return Err(err);
        }
        Ok(self.stored())
    }

    async fn set(
        &self,
        signer: &SignerHandle,
        value: &str,
    ) -> Result<Box<dyn PendingTransaction>, ContractError> {
        self.writes.borrow_mut().push((signer.clone(), value.to_string()));
        let stored = self.stored.clone();
        let value = value.to_string();
        self.submit(Box::new(move || *stored.borrow_mut() = value))
    }

    async fn send_message(
        &self,
        signer: &SignerHandle,
        message: &str,
    ) -> Result<Box<dyn PendingTransaction>, ContractError> {
        self.messages.borrow_mut().push((signer.clone(), message.to_string()));
        let handlers = self.handlers.clone();
        let nonce = self.nonce.get() + 1;
        let event = message_sent(signer.address, message, nonce)
            .with_id(H256::from_low_u64_be(nonce), 0);
        self.submit(Box::new(move || dispatch(&handlers, "MessageSent", event)))
    }

    fn on(&self, event: &str, handler: EventHandler) -> Subscription {
        register(&self.handlers, &self.next_id, (event.to_string(), handler))
    }

    async fn query_filter(&self, _event: &str) -> Result<Vec<RawEvent>, ContractError> {
        self.queries.set(self.queries.get() + 1);
        pass(&self.history_gate).await;
        self.history.borrow_mut().take().unwrap_or_else(|| Ok(Vec::new()))
    }
}
