//! Shared node state: the active archive behind a reader/writer lock and
//! the peer registry behind a mutex, handed to every task as one context.

use std::net::Ipv4Addr;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use crate::archive::{Archive, ArchiveError, MinedMessage};
use crate::config::NetworkConfig;
use crate::network::PeerRegistry;

/// Handle on everything the tasks share. Cheap to clone.
#[derive(Clone)]
pub struct Node {
    archive: Arc<RwLock<Archive>>,
    peers: Arc<Mutex<PeerRegistry>>,
    local_addr: Ipv4Addr,
    net: NetworkConfig,
}

impl Node {
    pub fn new(local_addr: Ipv4Addr, net: NetworkConfig) -> Self {
        Node {
            archive: Arc::new(RwLock::new(Archive::new())),
            peers: Arc::new(Mutex::new(PeerRegistry::new())),
            local_addr,
            net,
        }
    }

    /// The public address of this machine, used to skip self-connections.
    pub fn local_addr(&self) -> Ipv4Addr {
        self.local_addr
    }

    pub fn net(&self) -> &NetworkConfig {
        &self.net
    }

    pub fn peers(&self) -> &Mutex<PeerRegistry> {
        &self.peers
    }

    pub fn archive(&self) -> &RwLock<Archive> {
        &self.archive
    }

    /// Mines a user line into the archive and broadcasts the grown blob to
    /// every connected peer, all under the archive write lock so no reader
    /// observes a half-published state.
    pub async fn submit_line(&self, line: &[u8]) -> Result<MinedMessage, ArchiveError> {
        let mut archive = self.archive.write().await;
        let mined = archive.append(line)?;
        self.broadcast(&archive).await;
        Ok(mined)
    }

    /// Best-effort send of the archive to a snapshot of the registry. Send
    /// errors are logged and the peer is left for its receiver task to
    /// evict on the next timeout.
    async fn broadcast(&self, archive: &Archive) {
        let snapshot = self.peers.lock().await.handles();
        debug!("publishing archive to {} peer(s)", snapshot.len());
        for (addr, handle) in snapshot {
            let mut writer = handle.lock().await;
            if let Err(e) = writer.write_all(archive.as_bytes()).await {
                warn!("failed to publish archive to {addr}: {e}");
            }
        }
    }

    /// Considers a peer-supplied archive as a replacement for the active
    /// one: it must be strictly longer and its hash chain must check out.
    /// The count is compared again under the write lock, since validation
    /// runs with no lock held.
    pub async fn consider_replacement(&self, mut candidate: Archive) -> bool {
        let current = self.archive.read().await.count();
        if candidate.count() <= current {
            debug!(
                "candidate archive ({} messages) is not longer than ours ({current}), dropping",
                candidate.count()
            );
            return false;
        }
        if let Err(e) = candidate.validate() {
            warn!("candidate archive rejected: {e}");
            return false;
        }

        let mut archive = self.archive.write().await;
        let accepted = archive.replace(candidate);
        if accepted {
            info!("active archive replaced ({} messages)", archive.count());
            println!("---------- active archive replaced ----------");
        }
        accepted
    }

    /// Renders the active archive for display.
    pub async fn render_archive(&self) -> String {
        self.archive.read().await.to_string()
    }
}
