//! Registry of currently-connected peers.
//!
//! Entries are kept in connection order and keyed by IPv4 address; one
//! transport per address. The wire form of the peer list is rebuilt inside
//! every mutation so readers always see a blob consistent with the entries.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

use crate::network::MSG_PEER_LIST;

/// Shared write half of a peer's connection. The receiver task shuts it
/// down on eviction; every other holder then sees send errors.
pub type PeerHandle = Arc<Mutex<OwnedWriteHalf>>;

struct PeerEntry {
    addr: Ipv4Addr,
    handle: PeerHandle,
}

/// The set of connected peers plus the pre-serialized peer-list message.
pub struct PeerRegistry {
    entries: Vec<PeerEntry>,
    wire: Vec<u8>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        let mut registry = PeerRegistry {
            entries: Vec::new(),
            wire: Vec::new(),
        };
        registry.rebuild_wire();
        registry
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a connection to `addr` already exists.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.entries.iter().any(|entry| entry.addr == addr)
    }

    /// Appends a peer. Returns `false` (and keeps the existing transport)
    /// when the address is already registered.
    pub fn add(&mut self, addr: Ipv4Addr, handle: PeerHandle) -> bool {
        if self.contains(addr) {
            return false;
        }
        self.entries.push(PeerEntry { addr, handle });
        self.rebuild_wire();
        true
    }

    /// Drops the entry for `addr`, if any. Returns whether one was removed.
    pub fn remove(&mut self, addr: Ipv4Addr) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.addr != addr);
        let removed = self.entries.len() != before;
        if removed {
            self.rebuild_wire();
        }
        removed
    }

    /// The cached peer-list message: type byte, big-endian count, then one
    /// 4-byte address per peer with the first printable octet first.
    pub fn peer_list_wire(&self) -> &[u8] {
        &self.wire
    }

    /// Snapshot of the entries for lock-free iteration during a broadcast.
    pub fn handles(&self) -> Vec<(Ipv4Addr, PeerHandle)> {
        self.entries
            .iter()
            .map(|entry| (entry.addr, entry.handle.clone()))
            .collect()
    }

    fn rebuild_wire(&mut self) {
        let mut wire = Vec::with_capacity(5 + 4 * self.entries.len());
        wire.push(MSG_PEER_LIST);
        wire.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
        for entry in &self.entries {
            wire.extend_from_slice(&entry.addr.octets());
        }
        self.wire = wire;
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn test_handle() -> PeerHandle {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (outbound, _) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (_read, write) = outbound.unwrap().into_split();
        Arc::new(Mutex::new(write))
    }

    #[test]
    fn empty_registry_wire() {
        let registry = PeerRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.peer_list_wire(), &[2, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn add_remove_rebuild_the_wire() {
        let handle = test_handle().await;
        let mut registry = PeerRegistry::new();

        assert!(registry.add(Ipv4Addr::new(192, 168, 0, 1), handle.clone()));
        assert!(registry.add(Ipv4Addr::new(10, 0, 0, 7), handle.clone()));
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.peer_list_wire(),
            &[2, 0, 0, 0, 2, 192, 168, 0, 1, 10, 0, 0, 7]
        );

        assert!(registry.remove(Ipv4Addr::new(192, 168, 0, 1)));
        assert_eq!(registry.peer_list_wire(), &[2, 0, 0, 0, 1, 10, 0, 0, 7]);
        assert!(!registry.remove(Ipv4Addr::new(192, 168, 0, 1)));
    }

    #[tokio::test]
    async fn duplicate_addresses_are_rejected() {
        let handle = test_handle().await;
        let mut registry = PeerRegistry::new();

        assert!(registry.add(Ipv4Addr::new(10, 0, 0, 7), handle.clone()));
        assert!(!registry.add(Ipv4Addr::new(10, 0, 0, 7), handle));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(Ipv4Addr::new(10, 0, 0, 7)));
    }
}
