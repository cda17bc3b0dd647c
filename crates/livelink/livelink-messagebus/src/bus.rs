//! The transport boundary and an in-process reference bus.
//!
//! A [`Transport`] is one addressed endpoint: it can send to a peer, publish to
//! every peer, and pull its own inbound queue. [`LocalBus`] routes envelopes
//! between endpoints in the same process over unbounded crossbeam channels,
//! which keeps delivery FIFO per sender/recipient pair.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use hashbrown::HashMap;
use thiserror::Error;

use crate::messages::{Address, Envelope, Message};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("no endpoint registered at {0}")]
    UnknownRecipient(Address),
    #[error("endpoint {0} is closed")]
    Closed(Address),
    #[error("message codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// One addressed endpoint on a message bus.
pub trait Transport: Send + Sync + 'static {
    fn address(&self) -> Address;

    /// Deliver to a single peer.
    fn send(&self, to: Address, message: Message) -> Result<(), BusError>;

    /// Deliver to every other endpoint; returns how many were reached.
    fn publish(&self, message: Message) -> Result<usize, BusError>;

    /// Wait up to `timeout` for the next inbound envelope. `Ok(None)` on
    /// timeout, `Err(Closed)` once the endpoint has been released.
    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Envelope>, BusError>;

    fn try_recv(&self) -> Result<Option<Envelope>, BusError> {
        self.recv_timeout(Duration::ZERO)
    }

    /// Release the endpoint. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

#[derive(Debug, Default)]
struct Routes {
    table: RwLock<HashMap<Address, Sender<Envelope>>>,
}

impl Routes {
    fn lookup(&self, to: Address) -> Option<Sender<Envelope>> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&to)
            .cloned()
    }

    fn peers(&self, except: Address) -> Vec<(Address, Sender<Envelope>)> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(addr, _)| **addr != except)
            .map(|(addr, tx)| (*addr, tx.clone()))
            .collect()
    }

    fn insert(&self, addr: Address, tx: Sender<Envelope>) {
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(addr, tx);
    }

    fn remove(&self, addr: Address) {
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&addr);
    }

    fn len(&self) -> usize {
        self.table.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// In-process bus. Cloning shares the same routing table.
#[derive(Clone, Debug, Default)]
pub struct LocalBus {
    routes: Arc<Routes>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh endpoint with a random address.
    pub fn endpoint(&self) -> LocalEndpoint {
        let (tx, rx) = channel::unbounded();
        let address = Address::new();
        self.routes.insert(address, tx);
        LocalEndpoint {
            address,
            routes: Arc::clone(&self.routes),
            inbox: rx,
            closed: AtomicBool::new(false),
        }
    }

    /// Number of open endpoints.
    pub fn endpoint_count(&self) -> usize {
        self.routes.len()
    }
}

#[derive(Debug)]
pub struct LocalEndpoint {
    address: Address,
    routes: Arc<Routes>,
    inbox: Receiver<Envelope>,
    closed: AtomicBool,
}

impl LocalEndpoint {
    fn envelope(&self, message: Message) -> Envelope {
        Envelope {
            sender: self.address,
            message,
        }
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.is_closed() {
            return Err(BusError::Closed(self.address));
        }
        Ok(())
    }
}

impl Transport for LocalEndpoint {
    fn address(&self) -> Address {
        self.address
    }

    fn send(&self, to: Address, message: Message) -> Result<(), BusError> {
        self.ensure_open()?;
        let tx = self.routes.lookup(to).ok_or(BusError::UnknownRecipient(to))?;
        tx.send(self.envelope(message))
            .map_err(|_| BusError::UnknownRecipient(to))
    }

    fn publish(&self, message: Message) -> Result<usize, BusError> {
        self.ensure_open()?;
        let mut reached = 0;
        for (addr, tx) in self.routes.peers(self.address) {
            match tx.send(self.envelope(message.clone())) {
                Ok(()) => reached += 1,
                Err(_) => log::debug!("publish: {addr} went away"),
            }
        }
        Ok(reached)
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Envelope>, BusError> {
        self.ensure_open()?;
        let received = if timeout.is_zero() {
            self.inbox.try_recv().map_err(|e| e.is_disconnected())
        } else {
            self.inbox.recv_timeout(timeout).map_err(|e| e.is_disconnected())
        };
        match received {
            Ok(envelope) => Ok(Some(envelope)),
            Err(true) => Err(BusError::Closed(self.address)),
            Err(false) => Ok(None),
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.routes.remove(self.address);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for LocalEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}
