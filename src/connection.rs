use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use ethers::types::Address;
use futures::task::{LocalSpawn, LocalSpawnExt};
use log::{debug, error, warn};

use super::{
    chain::{ChainId, NetworkDescriptor},
    config::ConnectionConfig,
    event::Event,
    provider::{
        ProviderError, ProviderEvent, ProviderEventKind, ProviderHandle, SignerHandle,
        WalletProvider,
    },
    subscription::Subscription,
    Error,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Account {
    address: Address,
    signer: SignerHandle,
}

/// Wallet connection as seen by the UI.
///
/// Address and signer live in one slot, so a signer can only ever be
/// observed together with its address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    account: Option<Account>,
    chain_id: Option<ChainId>,
    in_flight: usize,
}

impl ConnectionState {
    pub fn address(&self) -> Option<Address> {
        self.account.as_ref().map(|account| account.address)
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.chain_id.map(|chain_id| chain_id.as_u64())
    }

    pub fn signer(&self) -> Option<&SignerHandle> {
        self.account.as_ref().map(|account| &account.signer)
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight > 0
    }

    pub fn is_connected(&self) -> bool {
        self.account.is_some()
    }

    pub fn status(&self) -> Status {
        if self.account.is_some() {
            Status::Connected
        } else if self.in_flight > 0 {
            Status::Connecting
        } else {
            Status::Disconnected
        }
    }
}

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    handle: Option<ProviderHandle>,
    /// Bumped by every reset to disconnected.
    epoch: u64,
    /// Bumped by every commit of a provider handle or signer.
    revision: u64,
    subscriptions: Vec<Subscription>,
    reconnect_attempted: bool,
}

impl Inner {
    /// Empties the connection. Returns whether anything was held.
    fn reset(&mut self) -> bool {
        self.epoch += 1;
        let held =
            self.state.account.is_some() || self.state.chain_id.is_some() || self.handle.is_some();
        self.state.account = None;
        self.state.chain_id = None;
        self.handle = None;
        held
    }
}

struct Shared {
    provider: Option<Rc<dyn WalletProvider>>,
    config: ConnectionConfig,
    spawner: Rc<dyn LocalSpawn>,
    listener: Option<Box<dyn Fn(Event)>>,
    inner: RefCell<Inner>,
}

/// Owns the wallet connection and keeps it in step with the wallet.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Rc<Shared>,
}

/// Clears the loading flag on every exit path of a connect attempt.
struct LoadingGuard<'a> {
    manager: &'a ConnectionManager,
}

impl<'a> LoadingGuard<'a> {
    fn acquire(manager: &'a ConnectionManager) -> Self {
        let started = {
            let mut inner = manager.shared.inner.borrow_mut();
            inner.state.in_flight += 1;
            inner.state.in_flight == 1
        };
        if started {
            manager.notify(Event::Loading(true));
        }
        Self { manager }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let finished = {
            let mut inner = self.manager.shared.inner.borrow_mut();
            inner.state.in_flight = inner.state.in_flight.saturating_sub(1);
            inner.state.in_flight == 0
        };
        if finished {
            self.manager.notify(Event::Loading(false));
        }
    }
}

impl ConnectionManager {
    pub fn new(
        provider: Option<Rc<dyn WalletProvider>>,
        config: ConnectionConfig,
        spawner: Rc<dyn LocalSpawn>,
        listener: Option<Box<dyn Fn(Event)>>,
    ) -> Self {
        Self {
            shared: Rc::new(Shared {
                provider,
                config,
                spawner,
                listener,
                inner: RefCell::new(Inner::default()),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.borrow().state.clone()
    }

    pub fn status(&self) -> Status {
        self.shared.inner.borrow().state.status()
    }

    pub fn is_loading(&self) -> bool {
        self.shared.inner.borrow().state.is_loading()
    }

    pub fn address(&self) -> Option<Address> {
        self.shared.inner.borrow().state.address()
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.shared.inner.borrow().state.chain_id()
    }

    /// The signer as of now. Contract writers should call this at the moment
    /// of use instead of keeping a copy.
    pub fn signer(&self) -> Option<SignerHandle> {
        self.shared.inner.borrow().state.signer().cloned()
    }

    pub fn provider_handle(&self) -> Option<ProviderHandle> {
        self.shared.inner.borrow().handle.clone()
    }

    pub fn network(&self) -> &NetworkDescriptor {
        &self.shared.config.network
    }

    pub fn has_provider(&self) -> bool {
        self.shared.provider.is_some()
    }

    /// Registers the wallet event handlers and kicks off the one-time silent
    /// reconnect. Calling it again while active is a no-op.
    pub fn activate(&self) {
        let Some(provider) = self.shared.provider.clone() else {
            debug!("No wallet provider, nothing to activate");
            return;
        };

        if !self.shared.inner.borrow().subscriptions.is_empty() {
            return;
        }

        let subscriptions = ProviderEventKind::ALL
            .iter()
            .map(|kind| {
                let weak = Rc::downgrade(&self.shared);
                provider.subscribe(
                    *kind,
                    Rc::new(move |event: ProviderEvent| {
                        if let Some(manager) = ConnectionManager::upgrade(&weak) {
                            manager.handle_event(event);
                        }
                    }),
                )
            })
            .collect::<Vec<_>>();

        let reconnect = {
            let mut inner = self.shared.inner.borrow_mut();
            inner.subscriptions = subscriptions;
            !std::mem::replace(&mut inner.reconnect_attempted, true)
        };

        if reconnect {
            let this = self.clone();
            self.spawn(async move {
                this.reconnect(provider).await;
            });
        }
    }

    /// Unregisters every wallet event handler.
    pub fn deactivate(&self) {
        let subscriptions = std::mem::take(&mut self.shared.inner.borrow_mut().subscriptions);
        debug!("Releasing {} wallet subscriptions", subscriptions.len());
        drop(subscriptions);
    }

    pub async fn connect(&self) -> Result<(), Error> {
        let provider = self.shared.provider.clone().ok_or(Error::ProviderUnavailable)?;
        let epoch = self.shared.inner.borrow().epoch;
        let _loading = LoadingGuard::acquire(self);

        let result = match self.establish(&provider).await {
            Ok((handle, signer)) => self.commit(epoch, handle, signer),
            Err(err) => Err(err),
        };

        if let Err(err) = &result {
            error!("Failed to connect: {err}");
            if !matches!(err, Error::Superseded) && self.shared.inner.borrow().epoch == epoch {
                self.reset();
            }
        }
        result
    }

    /// Forgets the connection. Idempotent; also invalidates any connect
    /// attempt still in flight.
    pub fn disconnect(&self) {
        self.reset();
    }

    async fn establish(
        &self,
        provider: &Rc<dyn WalletProvider>,
    ) -> Result<(ProviderHandle, SignerHandle), Error> {
        let network = &self.shared.config.network;

        let current = provider.chain_id().await?.parse::<ChainId>()?;
        if !network.is_target(current) {
            debug!("Wallet on chain {current}, switching to {}", network.chain_id);
            self.switch_chain(provider, network).await?;
        }

        let accounts =
            provider.request_accounts().await.map_err(Error::AccountRequestRejected)?;
        let address = accounts.first().copied().ok_or(Error::NoAccounts)?;

        let chain_id = provider.network().await?;
        let handle = ProviderHandle::bind(provider.clone(), chain_id);
        let signer = handle.signer().await?;

        if signer.address != address {
            warn!("Wallet granted {address:?} but signs as {:?}", signer.address);
        }

        Ok((handle, signer))
    }

    async fn switch_chain(
        &self,
        provider: &Rc<dyn WalletProvider>,
        network: &NetworkDescriptor,
    ) -> Result<(), Error> {
        match provider.switch_chain(network.chain_id).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_unrecognized_chain() => {
                debug!("Chain {} unknown to wallet, requesting addition", network.chain_id);
                provider.add_chain(network).await.map_err(|err| {
                    if err.is_unrecognized_chain() {
                        Error::UnrecognizedChain(network.chain_id)
                    } else {
                        Error::ChainSwitchRejected(err)
                    }
                })
            }
            Err(err) => Err(Error::ChainSwitchRejected(err)),
        }
    }

    /// The committed address is the signer's own, whatever the account
    /// request returned.
    fn commit(
        &self,
        epoch: u64,
        handle: ProviderHandle,
        signer: SignerHandle,
    ) -> Result<(), Error> {
        let chain_id = handle.chain_id();
        let address = signer.address;
        {
            let mut inner = self.shared.inner.borrow_mut();
            if inner.epoch != epoch {
                warn!("Discarding connect result for {address:?}, disconnected meanwhile");
                return Err(Error::Superseded);
            }
            inner.revision += 1;
            inner.handle = Some(handle);
            inner.state.account = Some(Account { address, signer });
            inner.state.chain_id = Some(chain_id);
        }
        debug!("Connected {address:?} on chain {chain_id}");
        self.notify(Event::Connected);
        self.notify(Event::ChainChanged(chain_id.as_u64()));
        self.notify(Event::AccountsChanged(vec![address]));
        Ok(())
    }

    fn reset(&self) {
        let held = self.shared.inner.borrow_mut().reset();
        if held {
            debug!("Wallet disconnected");
            self.notify(Event::Disconnected);
        }
    }

    async fn reconnect(&self, provider: Rc<dyn WalletProvider>) {
        match provider.accounts().await {
            Ok(_) if self.state().is_connected() => debug!("Already connected, skipping reconnect"),
            Ok(accounts) if !accounts.is_empty() => {
                debug!("Wallet already authorized, reconnecting");
                if let Err(err) = self.connect().await {
                    warn!("Silent reconnect failed: {err}");
                }
            }
            Ok(_) => debug!("No authorized account, skipping reconnect"),
            Err(err) => warn!("Could not read authorized accounts: {err}"),
        }
    }

    fn handle_event(&self, event: ProviderEvent) {
        debug!("Wallet event {event:?}");
        match event {
            ProviderEvent::AccountsChanged(accounts) => self.accounts_changed(accounts),
            ProviderEvent::ChainChanged(hex) => self.chain_changed(&hex),
            ProviderEvent::Disconnect => self.reset(),
        }
    }

    fn accounts_changed(&self, accounts: Vec<Address>) {
        let Some(&address) = accounts.first() else {
            self.reset();
            return;
        };

        let (handle, epoch, revision) = {
            let mut inner = self.shared.inner.borrow_mut();
            let Some(handle) = inner.handle.clone() else {
                debug!("Ignoring account change to {address:?} while disconnected");
                return;
            };
            inner.revision += 1;
            (handle, inner.epoch, inner.revision)
        };

        debug!("Account changed to {address:?}, refreshing signer");
        self.refresh_signer(handle, epoch, revision);
    }

    fn chain_changed(&self, hex: &str) {
        let chain_id = match hex.parse::<ChainId>() {
            Ok(chain_id) => chain_id,
            Err(err) => {
                warn!("Ignoring malformed chain id {hex:?}: {err}");
                return;
            }
        };

        let refresh = {
            let mut inner = self.shared.inner.borrow_mut();
            inner.state.chain_id = Some(chain_id);
            match (&self.shared.provider, inner.state.account.is_some()) {
                (Some(provider), true) => {
                    let handle = ProviderHandle::bind(provider.clone(), chain_id);
                    inner.handle = Some(handle.clone());
                    inner.revision += 1;
                    Some((handle, inner.epoch, inner.revision))
                }
                _ => None,
            }
        };
        self.notify(Event::ChainChanged(chain_id.as_u64()));

        let Some((handle, epoch, revision)) = refresh else {
            return;
        };

        self.refresh_signer(handle, epoch, revision);
    }

    fn refresh_signer(&self, handle: ProviderHandle, epoch: u64, revision: u64) {
        let this = self.clone();
        self.spawn(async move {
            let signer = handle.signer().await;
            this.apply_signer(epoch, revision, signer);
        });
    }

    /// Applies a signer derived in the background, unless the connection
    /// moved on while it was being derived. Address and signer are taken
    /// together from the signer, so the newest account the wallet reports
    /// wins even when a later chain change superseded the account refresh.
    /// A failed derivation leaves nothing trustworthy and disconnects.
    fn apply_signer(
        &self,
        epoch: u64,
        revision: u64,
        signer: Result<SignerHandle, ProviderError>,
    ) {
        if !self.is_current(epoch, revision) {
            debug!("Dropping stale signer refresh");
            return;
        }

        let signer = match signer {
            Ok(signer) => signer,
            Err(err) => {
                warn!("Could not refresh signer, disconnecting: {err}");
                self.reset();
                return;
            }
        };

        let changed = {
            let mut inner = self.shared.inner.borrow_mut();
            let Some(account) = inner.state.account.as_mut() else {
                return;
            };
            let changed = account.address != signer.address;
            account.address = signer.address;
            account.signer = signer;
            changed.then_some(account.address)
        };
        if let Some(address) = changed {
            self.notify(Event::AccountsChanged(vec![address]));
        }
    }

    fn is_current(&self, epoch: u64, revision: u64) -> bool {
        let inner = self.shared.inner.borrow();
        inner.epoch == epoch && inner.revision == revision
    }

    fn spawn(&self, future: impl std::future::Future<Output = ()> + 'static) {
        if let Err(err) = self.shared.spawner.spawn_local(future) {
            error!("Failed to spawn wallet task: {err}");
        }
    }

    fn notify(&self, event: Event) {
        if let Some(listener) = &self.shared.listener {
            listener(event);
        }
    }

    fn upgrade(weak: &Weak<Shared>) -> Option<Self> {
        weak.upgrade().map(|shared| Self { shared })
    }
}
