use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;

use crate::entity::EntityId;

use super::protocol::UserCmd;

pub const DEFAULT_CLIENT_TIMEOUT: f64 = 120.0;

/// Server-side state for one connected peer.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    pub addr: SocketAddr,
    pub client_id: u32,
    pub name: String,
    pub entity: Option<EntityId>,
    pub user_cmd: UserCmd,
    /// Game clock seconds of the last datagram from this peer.
    pub last_receive_time: f64,
    /// Set until the peer has been sent a full snapshot.
    pub needs_full_state: bool,
}

impl ClientRecord {
    pub fn new(addr: SocketAddr, client_id: u32, name: String, now: f64) -> Self {
        Self {
            addr,
            client_id,
            name,
            entity: None,
            user_cmd: UserCmd::default(),
            last_receive_time: now,
            needs_full_state: true,
        }
    }

    pub fn is_timed_out(&self, now: f64, timeout: f64) -> bool {
        now - self.last_receive_time >= timeout
    }

    pub fn touch(&mut self, now: f64) {
        self.last_receive_time = now;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClientTableError {
    #[error("Server full")]
    Full,
}

/// Connected peers keyed by address. Each peer times out on its own clock.
#[derive(Debug)]
pub struct ClientTable {
    clients_by_addr: HashMap<SocketAddr, u32>,
    clients: BTreeMap<u32, ClientRecord>,
    next_client_id: u32,
    max_clients: usize,
    timeout: f64,
}

impl ClientTable {
    pub fn new(max_clients: usize) -> Self {
        Self::with_timeout(max_clients, DEFAULT_CLIENT_TIMEOUT)
    }

    pub fn with_timeout(max_clients: usize, timeout: f64) -> Self {
        Self {
            clients_by_addr: HashMap::new(),
            clients: BTreeMap::new(),
            next_client_id: 1,
            max_clients,
            timeout,
        }
    }

    pub fn timeout(&self) -> f64 {
        self.timeout
    }

    /// Returns the record for `addr`, creating it on first contact.
    /// The bool is true when the record is new.
    pub fn get_or_create(
        &mut self,
        addr: SocketAddr,
        name: &str,
        now: f64,
    ) -> Result<(&mut ClientRecord, bool), ClientTableError> {
        let existing = self
            .clients_by_addr
            .get(&addr)
            .copied()
            .filter(|id| self.clients.contains_key(id));

        let (client_id, created) = match existing {
            Some(client_id) => (client_id, false),
            None => {
                if self.clients.len() >= self.max_clients {
                    return Err(ClientTableError::Full);
                }
                let client_id = self.next_client_id;
                self.next_client_id += 1;
                self.clients_by_addr.insert(addr, client_id);
                (client_id, true)
            }
        };

        let record = self
            .clients
            .entry(client_id)
            .or_insert_with(|| ClientRecord::new(addr, client_id, name.to_string(), now));

        Ok((record, created))
    }

    pub fn get_by_addr(&self, addr: &SocketAddr) -> Option<&ClientRecord> {
        self.clients_by_addr
            .get(addr)
            .and_then(|id| self.clients.get(id))
    }

    pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<&mut ClientRecord> {
        let id = self.clients_by_addr.get(addr)?;
        self.clients.get_mut(id)
    }

    pub fn get(&self, client_id: u32) -> Option<&ClientRecord> {
        self.clients.get(&client_id)
    }

    pub fn touch(&mut self, addr: &SocketAddr, now: f64) -> bool {
        match self.get_by_addr_mut(addr) {
            Some(record) => {
                record.touch(now);
                true
            }
            None => false,
        }
    }

    pub fn remove_by_addr(&mut self, addr: &SocketAddr) -> Option<ClientRecord> {
        let client_id = self.clients_by_addr.remove(addr)?;
        self.clients.remove(&client_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientRecord> {
        self.clients.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClientRecord> {
        self.clients.values_mut()
    }

    /// Removes and returns every peer that has been silent for the timeout.
    pub fn cleanup_timed_out(&mut self, now: f64) -> Vec<ClientRecord> {
        let timed_out: Vec<SocketAddr> = self
            .clients
            .values()
            .filter(|c| c.is_timed_out(now, self.timeout))
            .map(|c| c.addr)
            .collect();

        timed_out
            .iter()
            .filter_map(|addr| self.remove_by_addr(addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }
}
