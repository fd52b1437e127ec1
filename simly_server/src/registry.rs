// Address-keyed registry of live client sessions.
//
// The registry owns every `ClientSession` by value and is itself owned by the
// loop thread, so it needs no locking. Other threads never touch it: they
// send commands that the loop applies between ticks (see `server.rs`), which
// means an iteration in progress can never observe a concurrent removal.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::error::{Result, ServerError};
use crate::session::ClientSession;

/// Mapping from remote address (`ip:port`) to session.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, ClientSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under its own address. Fails without side effects
    /// if that address is already present; the rejected session is dropped,
    /// which closes its socket.
    pub fn add(&mut self, session: ClientSession) -> Result<()> {
        match self.sessions.entry(session.address().to_string()) {
            Entry::Occupied(entry) => Err(ServerError::DuplicateKey(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(session);
                Ok(())
            }
        }
    }

    pub fn remove(&mut self, address: &str) -> Option<ClientSession> {
        self.sessions.remove(address)
    }

    /// Remove every session, handing them back to the caller.
    pub fn drain(&mut self) -> Vec<ClientSession> {
        self.sessions.drain().map(|(_, session)| session).collect()
    }

    pub fn get(&self, address: &str) -> Option<&ClientSession> {
        self.sessions.get(address)
    }

    pub fn get_mut(&mut self, address: &str) -> Option<&mut ClientSession> {
        self.sessions.get_mut(address)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.sessions.contains_key(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientSession> {
        self.sessions.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClientSession> {
        self.sessions.values_mut()
    }

    /// Snapshot of registered addresses.
    pub fn addresses(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    /// Addresses of sessions flagged closed this tick.
    pub fn closed_addresses(&self) -> Vec<String> {
        self.sessions
            .values()
            .filter(|s| s.is_closed())
            .map(|s| s.address().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
