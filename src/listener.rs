use std::{
    cell::RefCell,
    collections::HashSet,
    fmt::Display,
    rc::{Rc, Weak},
};

use chrono::{DateTime, SecondsFormat};
use ethers::{
    abi::Token,
    types::{Address, U256},
};
use futures::task::{LocalSpawn, LocalSpawnExt};
use log::{debug, error, warn};
use thiserror::Error;

use super::{
    contract::{ContractError, ContractHandle, EventId, RawEvent},
    subscription::Subscription,
    Error,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Returned by the one-shot history query.
    Historical,
    /// Delivered by the live subscription.
    Live,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Expected 3 event arguments, got {0}")]
    Arity(usize),

    #[error("Argument {index} is not {expected}")]
    ArgumentType { index: usize, expected: &'static str },

    #[error("Timestamp {0} does not fit in 64 bits")]
    Timestamp(U256),
}

/// One decoded `(sender, payload, timestamp)` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub sender: Address,
    pub payload: String,
    /// Unix seconds.
    pub timestamp: u64,
    pub origin: Origin,
    pub id: Option<EventId>,
}

impl EventRecord {
    pub fn decode(event: &RawEvent, origin: Origin) -> Result<Self, DecodeError> {
        let [sender, payload, timestamp] = event.args.as_slice() else {
            return Err(DecodeError::Arity(event.args.len()));
        };

        let Token::Address(sender) = sender else {
            return Err(DecodeError::ArgumentType { index: 0, expected: "an address" });
        };
        let Token::String(payload) = payload else {
            return Err(DecodeError::ArgumentType { index: 1, expected: "a string" });
        };
        let Token::Uint(timestamp) = timestamp else {
            return Err(DecodeError::ArgumentType { index: 2, expected: "an unsigned integer" });
        };
        if *timestamp > U256::from(u64::MAX) {
            return Err(DecodeError::Timestamp(*timestamp));
        }

        Ok(Self {
            sender: *sender,
            payload: payload.clone(),
            timestamp: timestamp.as_u64(),
            origin,
            id: event.id,
        })
    }
}

impl Display for EventRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let at = i64::try_from(self.timestamp)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_else(|| self.timestamp.to_string());
        write!(f, "Sender: {:?}; Message: {}; At: {};", self.sender, self.payload, at)
    }
}

#[derive(Default)]
struct Feed {
    records: Vec<EventRecord>,
    seen: HashSet<EventId>,
    subscription: Option<Subscription>,
    /// Bumped on every activation so late history from an older one is ignored.
    session: u64,
    history_error: Option<ContractError>,
    history_loaded: bool,
}

impl Feed {
    fn is_current(&self, session: u64) -> bool {
        self.subscription.is_some() && self.session == session
    }
}

struct Shared {
    contract: Rc<dyn ContractHandle>,
    event_name: String,
    spawner: Rc<dyn LocalSpawn>,
    listener: Option<Box<dyn Fn(&EventRecord)>>,
    feed: RefCell<Feed>,
}

/// Live, append-only view of one contract event, seeded with its history.
///
/// Historical occurrences are merged into the same sequence once the query
/// resolves. Occurrences carrying an [`EventId`] are recorded once no matter
/// which stream delivers them first; the rest keep their [`Origin`].
#[derive(Clone)]
pub struct ContractEventSubscriber {
    shared: Rc<Shared>,
}

impl ContractEventSubscriber {
    pub fn new(
        contract: Rc<dyn ContractHandle>,
        event_name: impl Into<String>,
        spawner: Rc<dyn LocalSpawn>,
        listener: Option<Box<dyn Fn(&EventRecord)>>,
    ) -> Self {
        Self {
            shared: Rc::new(Shared {
                contract,
                event_name: event_name.into(),
                spawner,
                listener,
                feed: RefCell::new(Feed::default()),
            }),
        }
    }

    pub fn event_name(&self) -> &str {
        &self.shared.event_name
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.shared.feed.borrow().records.clone()
    }

    pub fn len(&self) -> usize {
        self.shared.feed.borrow().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_active(&self) -> bool {
        self.shared.feed.borrow().subscription.is_some()
    }

    pub fn history_loaded(&self) -> bool {
        self.shared.feed.borrow().history_loaded
    }

    /// Why the history query failed, if it did. Live events keep flowing
    /// either way.
    pub fn history_error(&self) -> Option<Error> {
        self.shared.feed.borrow().history_error.clone().map(Error::EventQueryFailed)
    }

    /// Starts the live subscription and the history query. The two are
    /// independent: a failing query leaves the subscription running.
    pub fn activate(&self) {
        if self.is_active() {
            return;
        }

        let name = self.shared.event_name.clone();
        let weak = Rc::downgrade(&self.shared);
        let session = self.shared.feed.borrow().session + 1;
        let subscription = self.shared.contract.on(
            &name,
            Rc::new(move |event: RawEvent| {
                if let Some(subscriber) = Self::upgrade(&weak) {
                    subscriber.append(session, &event, Origin::Live);
                }
            }),
        );

        {
            let mut feed = self.shared.feed.borrow_mut();
            feed.session = session;
            feed.subscription = Some(subscription);
            feed.history_error = None;
            feed.history_loaded = false;
        }
        debug!("Listening for {name}");

        let contract = self.shared.contract.clone();
        let weak = Rc::downgrade(&self.shared);
        let spawned = self.shared.spawner.spawn_local(async move {
            let history = contract.query_filter(&name).await;
            if let Some(subscriber) = Self::upgrade(&weak) {
                subscriber.merge_history(session, history);
            }
        });
        if let Err(err) = spawned {
            error!("Failed to spawn history query for {}: {err}", self.shared.event_name);
        }
    }

    /// Unregisters the live listener and discards the collected records.
    pub fn deactivate(&self) {
        let subscription = {
            let mut feed = self.shared.feed.borrow_mut();
            feed.records.clear();
            feed.seen.clear();
            feed.subscription.take()
        };
        if let Some(subscription) = subscription {
            debug!("Stopped listening for {}", self.shared.event_name);
            subscription.unsubscribe();
        }
    }

    fn merge_history(&self, session: u64, history: Result<Vec<RawEvent>, ContractError>) {
        if !self.shared.feed.borrow().is_current(session) {
            debug!("Ignoring history for inactive {} feed", self.shared.event_name);
            return;
        }

        match history {
            Ok(events) => {
                debug!("Past {} events: {}", self.shared.event_name, events.len());
                for event in &events {
                    self.append(session, event, Origin::Historical);
                }
                self.shared.feed.borrow_mut().history_loaded = true;
            }
            Err(err) => {
                warn!("Error querying past {} events: {err}", self.shared.event_name);
                self.shared.feed.borrow_mut().history_error = Some(err);
            }
        }
    }

    fn append(&self, session: u64, event: &RawEvent, origin: Origin) {
        let record = match EventRecord::decode(event, origin) {
            Ok(record) => record,
            Err(err) => {
                warn!("Skipping undecodable {} event: {err}", self.shared.event_name);
                return;
            }
        };

        {
            let mut feed = self.shared.feed.borrow_mut();
            if !feed.is_current(session) {
                return;
            }
            if let Some(id) = record.id {
                if !feed.seen.insert(id) {
                    debug!("Duplicate {} event {id:?}", self.shared.event_name);
                    return;
                }
            }
            feed.records.push(record.clone());
        }

        if let Some(listener) = &self.shared.listener {
            listener(&record);
        }
    }

    fn upgrade(weak: &Weak<Shared>) -> Option<Self> {
        weak.upgrade().map(|shared| Self { shared })
    }
}
