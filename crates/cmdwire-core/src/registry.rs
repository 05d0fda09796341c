//! Client registry: who is connected to a server, under which name and group.
//!
//! Every connected client has one [`ClientIdentity`].  The remote socket
//! address is the unique key; names and groups are optional labels that the
//! client picks itself and can change at any time.
//!
//! # Identity lifecycle (for beginners)
//!
//! ```text
//! accept + $CLTHELLO$  ──►  insert  ──►  change_name / change_group  ──►  remove
//! ```
//!
//! - `insert`: the join handshake completed; the identity becomes visible to
//!   lookups and broadcasts.
//! - `change_name` / `change_group`: the client sent `$CHNAME$` / `$CHGROUP$`.
//!   Group membership is evaluated at send time, so a client that leaves
//!   `"g1"` stops receiving `"g1"` broadcasts immediately.
//! - `remove`: the connection closed for any reason.
//!
//! # Lookups
//!
//! Addresses are unique, names are not.  [`ClientRegistry::lookup`] therefore
//! returns *every* match in join order, and [`ClientRegistry::lookup_one`]
//! makes callers that need exactly one identity handle the zero and many cases
//! explicitly.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Opaque handle for one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Everything a server knows about one connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    pub connection: ConnectionId,
    pub addr: SocketAddr,
    pub name: Option<String>,
    pub group: Option<String>,
}

impl ClientIdentity {
    pub fn new(addr: SocketAddr, name: Option<String>, group: Option<String>) -> Self {
        Self {
            connection: ConnectionId::new(),
            addr,
            name,
            group,
        }
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.group.as_deref() == Some(group)
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}@{}", self.addr),
            None => write!(f, "{}", self.addr),
        }
    }
}

/// How to pick clients out of the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientSelector {
    /// Exact remote address; matches at most one client.
    ByAddress(SocketAddr),
    /// Display name; may match any number of clients.
    ByName(String),
}

impl FromStr for ClientSelector {
    type Err = std::convert::Infallible;

    /// Text that parses as `ip:port` selects by address; anything else is a
    /// name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ClientSelector::from(s))
    }
}

impl From<&str> for ClientSelector {
    fn from(s: &str) -> Self {
        match s.parse::<SocketAddr>() {
            Ok(addr) => ClientSelector::ByAddress(addr),
            Err(_) => ClientSelector::ByName(s.to_string()),
        }
    }
}

impl From<String> for ClientSelector {
    fn from(s: String) -> Self {
        ClientSelector::from(s.as_str())
    }
}

impl From<SocketAddr> for ClientSelector {
    fn from(addr: SocketAddr) -> Self {
        ClientSelector::ByAddress(addr)
    }
}

impl From<&ClientIdentity> for ClientSelector {
    fn from(identity: &ClientIdentity) -> Self {
        ClientSelector::ByAddress(identity.addr)
    }
}

impl fmt::Display for ClientSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientSelector::ByAddress(addr) => write!(f, "{addr}"),
            ClientSelector::ByName(name) => f.write_str(name),
        }
    }
}

/// Lookup failures for callers that need exactly one identity.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no client matches {0}")]
    NotFound(String),

    #[error("{count} clients are named {name:?}")]
    AmbiguousName { name: String, count: usize },
}

/// In-memory registry of connected clients.
///
/// Owned by the server's poll loop; inline handlers mutate it through
/// `&mut` without locking.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<SocketAddr, ClientIdentity>,
    order: Vec<SocketAddr>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `identity`, replacing any previous entry for the same address.
    pub fn insert(&mut self, identity: ClientIdentity) {
        let addr = identity.addr;
        if self.clients.insert(addr, identity).is_none() {
            self.order.push(addr);
        }
    }

    /// Removes and returns the identity at `addr`.
    pub fn remove(&mut self, addr: &SocketAddr) -> Option<ClientIdentity> {
        let removed = self.clients.remove(addr)?;
        self.order.retain(|a| a != addr);
        Some(removed)
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&ClientIdentity> {
        self.clients.get(addr)
    }

    /// Every identity matching `selector`, in join order.
    pub fn lookup(&self, selector: &ClientSelector) -> Vec<ClientIdentity> {
        match selector {
            ClientSelector::ByAddress(addr) => self.clients.get(addr).cloned().into_iter().collect(),
            ClientSelector::ByName(name) => self
                .iter()
                .filter(|c| c.name.as_deref() == Some(name.as_str()))
                .cloned()
                .collect(),
        }
    }

    /// Exactly one identity matching `selector`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] on zero matches,
    /// [`RegistryError::AmbiguousName`] when several clients share the name.
    pub fn lookup_one(&self, selector: &ClientSelector) -> Result<ClientIdentity, RegistryError> {
        let mut matches = self.lookup(selector);
        match matches.len() {
            0 => Err(RegistryError::NotFound(selector.to_string())),
            1 => Ok(matches.remove(0)),
            count => Err(RegistryError::AmbiguousName {
                name: selector.to_string(),
                count,
            }),
        }
    }

    /// Sets the name of the client at `addr` and returns the previous one.
    ///
    /// Returns `None` if no client is connected at `addr`.
    pub fn change_name(&mut self, addr: &SocketAddr, name: Option<String>) -> Option<Option<String>> {
        let client = self.clients.get_mut(addr)?;
        Some(std::mem::replace(&mut client.name, name))
    }

    /// Sets the group of the client at `addr` and returns the previous one.
    pub fn change_group(&mut self, addr: &SocketAddr, group: Option<String>) -> Option<Option<String>> {
        let client = self.clients.get_mut(addr)?;
        Some(std::mem::replace(&mut client.group, group))
    }

    /// Current members of `group`, in join order.
    pub fn group_members(&self, group: &str) -> Vec<ClientIdentity> {
        self.iter().filter(|c| c.in_group(group)).cloned().collect()
    }

    /// Snapshot of every identity, in join order.
    pub fn all(&self) -> Vec<ClientIdentity> {
        self.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientIdentity> {
        self.order.iter().filter_map(|addr| self.clients.get(addr))
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
