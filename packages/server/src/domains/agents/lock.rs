//! Superseding lock - per (agent, chat) serialization with a single waiter slot.
//!
//! At most one holder and one waiter exist per key. A new request arriving
//! while a waiter is queued replaces it; the replaced request fails with
//! [`Superseded`] and never runs. Releasing hands the lock to the waiter if
//! there is one, otherwise the key is dropped from the table.
//!
//! Acquisition is split in two so callers can register in delivery order
//! without awaiting:
//!
//! ```ignore
//! let ticket = lock.acquire(key);      // synchronous, ordered
//! match ticket.wait().await {          // may suspend behind the holder
//!     Ok(_guard) => { /* protected section; released on drop */ }
//!     Err(Superseded) => { /* a newer request took our place */ }
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::common::{ChatId, MemberId};

/// The unit of serialization: one agent answering in one chat.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey {
    pub agent_id: MemberId,
    pub chat_id: ChatId,
}

impl RoutingKey {
    pub fn new(agent_id: MemberId, chat_id: ChatId) -> Self {
        Self { agent_id, chat_id }
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.agent_id, self.chat_id)
    }
}

/// A newer request replaced this one while it was waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("superseded by a newer request")]
pub struct Superseded;

/// Present while the key is held.
struct Slot {
    waiter: Option<oneshot::Sender<()>>,
}

#[derive(Clone, Default)]
pub struct SupersedingLock {
    slots: Arc<DashMap<RoutingKey, Slot>>,
}

impl SupersedingLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request for `key`.
    ///
    /// Grants immediately when the key is idle; otherwise takes the waiter
    /// slot, superseding any previous waiter.
    pub fn acquire(&self, key: RoutingKey) -> Ticket {
        let state = match self.slots.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(Slot { waiter: None });
                TicketState::Granted
            }
            Entry::Occupied(mut occupied) => {
                let (tx, rx) = oneshot::channel();
                // Dropping the previous sender fails its wait with Superseded.
                occupied.get_mut().waiter = Some(tx);
                TicketState::Waiting(rx)
            }
        };

        Ticket {
            lock: self.clone(),
            key,
            state: Some(state),
        }
    }

    fn release(&self, key: &RoutingKey) {
        loop {
            let Entry::Occupied(mut occupied) = self.slots.entry(key.clone()) else {
                return;
            };
            match occupied.get_mut().waiter.take() {
                Some(waiter) => {
                    if waiter.send(()).is_ok() {
                        return;
                    }
                    // Waiter went away; check the slot again.
                }
                None => {
                    occupied.remove();
                    return;
                }
            }
        }
    }

    /// Whether some request currently holds `key`.
    pub fn is_held(&self, key: &RoutingKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Whether a request is queued behind the holder of `key`.
    pub fn has_waiter(&self, key: &RoutingKey) -> bool {
        self.slots
            .get(key)
            .map(|slot| slot.waiter.is_some())
            .unwrap_or(false)
    }

    /// Number of held keys.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

enum TicketState {
    Granted,
    Waiting(oneshot::Receiver<()>),
}

/// A registered request. Resolve it with [`Ticket::wait`].
///
/// Dropping a ticket gives up its place; if the lock was already handed to
/// it, the lock is released again.
#[must_use = "a ticket holds or waits for the lock until dropped"]
pub struct Ticket {
    lock: SupersedingLock,
    key: RoutingKey,
    state: Option<TicketState>,
}

impl Ticket {
    pub fn key(&self) -> &RoutingKey {
        &self.key
    }

    /// Wait until this request holds the lock.
    pub async fn wait(mut self) -> Result<LockGuard, Superseded> {
        let granted = match &mut self.state {
            Some(TicketState::Granted) => true,
            Some(TicketState::Waiting(rx)) => rx.await.is_ok(),
            None => false,
        };
        self.state = None;

        if granted {
            Ok(LockGuard {
                lock: self.lock.clone(),
                key: self.key.clone(),
            })
        } else {
            Err(Superseded)
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        match self.state.take() {
            Some(TicketState::Granted) => self.lock.release(&self.key),
            Some(TicketState::Waiting(mut rx)) => {
                // Close first so a concurrent release either lands before this
                // point or fails its send and moves on.
                rx.close();
                if rx.try_recv().is_ok() {
                    self.lock.release(&self.key);
                }
            }
            None => {}
        }
    }
}

/// Holds the lock for a key; releases on drop.
pub struct LockGuard {
    lock: SupersedingLock,
    key: RoutingKey,
}

impl LockGuard {
    pub fn key(&self) -> &RoutingKey {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.lock.release(&self.key);
    }
}
