//! Message delivery between a client and parties.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use dpgraph_core::id::PartyId;

use crate::address_book::AddressBook;
use crate::codec::encode_response;
use crate::config::PartyConfig;
use crate::error::{RemoteError, Result};
use crate::message::{Response, WireError};
use crate::party::Party;

/// Receipt for a posted message; redeemed with [`Transport::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ticket(pub u64);

pub trait Transport: Send + Sync {
    /// Deliver now and wait for the reply. Messages posted earlier are
    /// delivered first.
    fn request(&self, to: &PartyId, message: Vec<u8>) -> Result<Vec<u8>>;

    /// Queue for delivery without waiting.
    fn post(&self, to: &PartyId, message: Vec<u8>) -> Result<Ticket>;

    /// The reply to a posted message, once delivered. Taking it consumes it.
    fn poll(&self, ticket: Ticket) -> Result<Option<Vec<u8>>>;

    /// Deliver everything queued; returns how many messages went out.
    fn flush(&self) -> Result<usize>;
}

struct Envelope {
    ticket: Ticket,
    to: PartyId,
    bytes: Vec<u8>,
}

/// In-process network with a single FIFO mailbox.
#[derive(Default)]
pub struct VirtualNetwork {
    book: Mutex<AddressBook>,
    mailbox: Mutex<VecDeque<Envelope>>,
    replies: Mutex<HashMap<Ticket, Vec<u8>>>,
    next_ticket: AtomicU64,
}

fn lock<'a, T>(m: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    m.lock()
        .map_err(|_| RemoteError::Remote(format!("virtual network {what} poisoned")))
}

impl VirtualNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// One party per config. Every `known_parties` entry must name another
    /// configured party.
    pub fn from_configs(configs: &[PartyConfig]) -> Result<Self> {
        let net = Self::new();
        for config in configs {
            net.add_party(Arc::new(Party::from_config(config)?))?;
        }
        let book = lock(&net.book, "address book")?;
        for config in configs {
            if let Some(missing) = config.known_parties.iter().find(|p| !book.contains(p)) {
                return Err(RemoteError::UnknownParty(missing.clone()));
            }
        }
        drop(book);
        Ok(net)
    }

    /// Register `party`, replacing (with a warning) any party with its id.
    pub fn add_party(&self, party: Arc<Party>) -> Result<()> {
        lock(&self.book, "address book")?.add(party);
        Ok(())
    }

    /// Known party with `party`'s id, registering it on first reference.
    pub fn reference(&self, party: &Arc<Party>) -> Result<Arc<Party>> {
        Ok(lock(&self.book, "address book")?.reference(party))
    }

    /// Forget `id`. Messages already queued for it fail with `UnknownParty`.
    pub fn remove_party(&self, id: &PartyId) -> Result<Option<Arc<Party>>> {
        Ok(lock(&self.book, "address book")?.remove(id))
    }

    pub fn party(&self, id: &PartyId) -> Result<Arc<Party>> {
        lock(&self.book, "address book")?.get(id)
    }

    pub fn party_ids(&self) -> Result<Vec<PartyId>> {
        Ok(lock(&self.book, "address book")?.ids())
    }

    /// Messages waiting for delivery.
    pub fn pending(&self) -> Result<usize> {
        Ok(lock(&self.mailbox, "mailbox")?.len())
    }

    /// Deliver queued messages in order.
    pub fn pump(&self) -> Result<usize> {
        let mut delivered = 0;
        loop {
            // Pop under the lock, deliver outside it.
            let next = lock(&self.mailbox, "mailbox")?.pop_front();
            let Some(envelope) = next else {
                return Ok(delivered);
            };
            // A failed delivery still answers the ticket.
            let reply = match self.deliver(&envelope.to, &envelope.bytes) {
                Ok(reply) => reply,
                Err(e) => encode_response(&Response::Error(WireError::from(&e)))?,
            };
            lock(&self.replies, "reply table")?.insert(envelope.ticket, reply);
            delivered += 1;
        }
    }

    fn deliver(&self, to: &PartyId, bytes: &[u8]) -> Result<Vec<u8>> {
        let party = self.party(to)?;
        party.receive(bytes)
    }
}

impl Transport for VirtualNetwork {
    fn request(&self, to: &PartyId, message: Vec<u8>) -> Result<Vec<u8>> {
        self.pump()?;
        self.deliver(to, &message)
    }

    fn post(&self, to: &PartyId, message: Vec<u8>) -> Result<Ticket> {
        // Fail fast on an unknown destination instead of at delivery.
        self.party(to)?;
        let ticket = Ticket(self.next_ticket.fetch_add(1, Ordering::Relaxed));
        lock(&self.mailbox, "mailbox")?.push_back(Envelope {
            ticket,
            to: to.clone(),
            bytes: message,
        });
        Ok(ticket)
    }

    fn poll(&self, ticket: Ticket) -> Result<Option<Vec<u8>>> {
        Ok(lock(&self.replies, "reply table")?.remove(&ticket))
    }

    fn flush(&self) -> Result<usize> {
        self.pump()
    }
}
