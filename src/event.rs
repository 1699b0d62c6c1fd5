use ethers::types::Address;

/// Notifications a [`ConnectionManager`](crate::connection::ConnectionManager)
/// delivers to its UI listener after each state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connected,
    Disconnected,
    Loading(bool),
    ChainChanged(u64),
    AccountsChanged(Vec<Address>),
}
