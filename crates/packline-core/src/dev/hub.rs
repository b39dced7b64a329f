//! Fan-out of [`HotMessage`]s to connected clients.
//!
//! Each client has its own bounded queue, filled with `try_send` so a slow
//! client never stalls the rebuild loop. A full or closed queue is a
//! delivery error for that client only. A client that missed a message gets
//! a `full-reload` before anything else, since its module state is unknown.

use super::message::HotMessage;
use crate::error::BuildError;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Receiving side of one client.
#[derive(Debug)]
pub struct Subscription {
    pub id: u64,
    pub rx: mpsc::Receiver<HotMessage>,
}

#[derive(Debug)]
struct Client {
    tx: mpsc::Sender<HotMessage>,
    missed: bool,
}

#[derive(Debug)]
pub struct NotificationHub {
    clients: Mutex<BTreeMap<u64, Client>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl NotificationHub {
    /// Hub whose clients queue up to `capacity` messages.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            clients: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Register a client. Its queue starts with `connected`.
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_with(None)
    }

    /// Register a client whose queue starts with `connected`, then
    /// `greeting` if there is room. A greeting that does not fit counts as a
    /// missed message.
    pub fn subscribe_with(&self, greeting: Option<HotMessage>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        // Fresh queue, cannot be full.
        let _ = tx.try_send(HotMessage::Connected { client: id });
        let mut missed = false;
        if let Some(greeting) = greeting {
            let kind = greeting.kind();
            if tx.try_send(greeting).is_err() {
                missed = true;
                let err = BuildError::ServerDelivery {
                    client: id,
                    reason: "queue full".to_string(),
                };
                warn!(client = id, code = err.code(), message = kind, "{err}");
            }
        }
        self.clients.lock().unwrap().insert(id, Client { tx, missed });
        debug!(client = id, "client connected");
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: u64) {
        if self.clients.lock().unwrap().remove(&id).is_some() {
            debug!(client = id, "client disconnected");
        }
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// Queue `message` for every client, in subscription order.
    ///
    /// Returns one `ServerDelivery` error per client that could not take it;
    /// closed clients are dropped.
    pub fn broadcast(&self, message: &HotMessage) -> Vec<BuildError> {
        let mut failures = Vec::new();
        let mut clients = self.clients.lock().unwrap();
        let mut closed = Vec::new();

        for (&id, client) in clients.iter_mut() {
            let result = if client.missed && !matches!(message, HotMessage::FullReload { .. }) {
                client
                    .tx
                    .try_send(HotMessage::full_reload("missed updates"))
                    .map(|()| client.missed = false)
            } else {
                client.tx.try_send(message.clone()).map(|()| client.missed = false)
            };

            match result {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    client.missed = true;
                    let err = BuildError::ServerDelivery {
                        client: id,
                        reason: "queue full".to_string(),
                    };
                    warn!(client = id, code = err.code(), message = message.kind(), "{err}");
                    failures.push(err);
                }
                Err(TrySendError::Closed(_)) => {
                    closed.push(id);
                    let err = BuildError::ServerDelivery {
                        client: id,
                        reason: "client gone".to_string(),
                    };
                    warn!(client = id, code = err.code(), message = message.kind(), "{err}");
                    failures.push(err);
                }
            }
        }
        for id in closed {
            clients.remove(&id);
        }
        failures
    }
}
