use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use ethers::types::{TransactionReceipt, U64};
use log::{debug, warn};

use super::{
    contract::{ContractHandle, PendingTransaction},
    provider::SignerHandle,
    Error,
};

/// Raises a pending counter for as long as it lives.
struct PendingGuard<'a>(&'a Cell<usize>);

impl<'a> PendingGuard<'a> {
    fn acquire(counter: &'a Cell<usize>) -> Self {
        counter.set(counter.get() + 1);
        Self(counter)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

fn writable<'a>(signer: Option<&'a SignerHandle>, input: &str) -> Result<&'a SignerHandle, Error> {
    let signer = signer.ok_or(Error::NotConnected)?;
    if input.is_empty() {
        return Err(Error::EmptyValue);
    }
    Ok(signer)
}

/// Waits for `tx` to be mined. A reverted receipt is a failure like any other.
async fn confirm(tx: Box<dyn PendingTransaction>) -> Result<TransactionReceipt, Error> {
    let hash = tx.hash();
    let receipt = tx.wait().await.map_err(|err| Error::TransactionFailed(err.to_string()))?;
    if receipt.status == Some(U64::zero()) {
        return Err(Error::TransactionFailed(format!("transaction {hash:?} reverted")));
    }
    Ok(receipt)
}

/// The contract's stored string, as last confirmed on chain.
pub struct StoredValue {
    contract: Rc<dyn ContractHandle>,
    value: RefCell<Option<String>>,
    fetching: Cell<usize>,
    updating: Cell<usize>,
}

impl StoredValue {
    pub fn new(contract: Rc<dyn ContractHandle>) -> Self {
        Self {
            contract,
            value: RefCell::new(None),
            fetching: Cell::new(0),
            updating: Cell::new(0),
        }
    }

    pub fn value(&self) -> Option<String> {
        self.value.borrow().clone()
    }

    pub fn is_fetching(&self) -> bool {
        self.fetching.get() > 0
    }

    pub fn is_updating(&self) -> bool {
        self.updating.get() > 0
    }

    /// Re-reads the value. On failure the previous value is kept.
    pub async fn refresh(&self) -> Result<String, Error> {
        let _fetching = PendingGuard::acquire(&self.fetching);
        let value = self.contract.get().await?;
        *self.value.borrow_mut() = Some(value.clone());
        Ok(value)
    }

    /// Writes `value` and waits for confirmation. The displayed value only
    /// changes once the transaction is mined successfully.
    pub async fn update(
        &self,
        signer: Option<&SignerHandle>,
        value: &str,
    ) -> Result<TransactionReceipt, Error> {
        let signer = writable(signer, value)?;

        let _updating = PendingGuard::acquire(&self.updating);
        let tx = self
            .contract
            .set(signer, value)
            .await
            .map_err(|err| Error::TransactionFailed(err.to_string()))?;
        debug!("Submitted {:?} from {:?}", tx.hash(), signer.address);
        let receipt = confirm(tx).await?;

        let confirmed = match self.contract.get().await {
            Ok(confirmed) => confirmed,
            Err(err) => {
                warn!("Re-read after update failed, showing submitted value: {err}");
                value.to_string()
            }
        };
        *self.value.borrow_mut() = Some(confirmed);
        Ok(receipt)
    }
}

/// Sends messages through the contract. Delivery shows up as a contract event,
/// so nothing is cached here.
pub struct MessageSender {
    contract: Rc<dyn ContractHandle>,
    sending: Cell<usize>,
}

impl MessageSender {
    pub fn new(contract: Rc<dyn ContractHandle>) -> Self {
        Self { contract, sending: Cell::new(0) }
    }

    pub fn is_sending(&self) -> bool {
        self.sending.get() > 0
    }

    pub async fn send(
        &self,
        signer: Option<&SignerHandle>,
        message: &str,
    ) -> Result<TransactionReceipt, Error> {
        let signer = writable(signer, message)?;

        let _sending = PendingGuard::acquire(&self.sending);
        let tx = self
            .contract
            .send_message(signer, message)
            .await
            .map_err(|err| Error::TransactionFailed(err.to_string()))?;
        debug!("Sent message in {:?} from {:?}", tx.hash(), signer.address);
        confirm(tx).await
    }
}
