//! Per-peer tasks: a requester that polls the peer on a fixed cadence and a
//! receiver that dispatches everything the peer sends.
//!
//! Each connection is split once: the receiver owns the read half, while the
//! write half is shared (registry entry, requester, broadcasts). The receiver
//! alone decides when the connection dies: it shuts the write half down and
//! evicts the peer, after which every other writer sees send errors.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::Mutex;
use tokio::time;

use crate::error::NodeError;
use crate::network::{
    codec, PeerHandle, PeerRegistry, TimedReader, MSG_ARCHIVE_REQUEST, MSG_ARCHIVE_RESPONSE,
    MSG_PEER_LIST, MSG_PEER_REQUEST, TCP_PORT,
};
use crate::node::Node;

/// Registers a freshly established connection and spawns its task pair.
///
/// The caller must hold the registry lock; keeping the whole
/// check-connect-register-spawn window inside one critical section is what
/// rules out duplicate connections under concurrently processed peer lists.
/// A connection to an already-registered address is dropped on the floor.
pub fn register_and_spawn(
    node: &Node,
    registry: &mut PeerRegistry,
    stream: TcpStream,
) -> Result<(), NodeError> {
    let addr = match stream.peer_addr()? {
        SocketAddr::V4(v4) => *v4.ip(),
        other => return Err(NodeError::NotIpv4(other)),
    };
    if registry.contains(addr) {
        debug!("peer {addr} is already connected, dropping duplicate transport");
        return Ok(());
    }

    let (read_half, write_half) = stream.into_split();
    let handle: PeerHandle = Arc::new(Mutex::new(write_half));
    registry.add(addr, handle.clone());
    info!("connected to peer {addr}");

    tokio::spawn(requester(node.clone(), addr, handle.clone()));
    tokio::spawn(receiver(node.clone(), addr, read_half, handle));
    Ok(())
}

/// Opens a TCP connection to `addr` on the fixed port, bounded by `timeout`.
pub async fn connect_with_timeout(addr: Ipv4Addr, timeout: Duration) -> io::Result<TcpStream> {
    match time::timeout(timeout, TcpStream::connect((addr, TCP_PORT))).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "connection attempt timed out",
        )),
    }
}

/// Resolves `host` (an address or hostname) and tries each IPv4 candidate
/// until one connects within the timeout.
pub async fn connect_to(host: &str, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for resolved in lookup_host((host, TCP_PORT)).await? {
        let SocketAddr::V4(v4) = resolved else {
            continue;
        };
        match connect_with_timeout(*v4.ip(), timeout).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("connect to {} failed: {e}", v4.ip());
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "no usable ipv4 address")
    }))
}

/// Periodically polls the peer: a peer-request every interval, plus an
/// archive-request every `archive_request_every` iterations. Any send error
/// means the receiver shut the connection down, so the task just ends.
async fn requester(node: Node, addr: Ipv4Addr, handle: PeerHandle) {
    let interval = node.net().peer_request_interval();
    let every = node.net().archive_request_every;
    let mut ticks = 0u32;
    loop {
        if send_byte(&handle, MSG_PEER_REQUEST).await.is_err() {
            debug!("peer request to {addr} failed, ending requester");
            return;
        }
        ticks += 1;
        if ticks == every {
            if send_byte(&handle, MSG_ARCHIVE_REQUEST).await.is_err() {
                debug!("archive request to {addr} failed, ending requester");
                return;
            }
            ticks = 0;
        }
        time::sleep(interval).await;
    }
}

async fn send_byte(handle: &PeerHandle, byte: u8) -> io::Result<()> {
    handle.lock().await.write_all(&[byte]).await
}

/// Receives and dispatches messages from one peer until the connection is
/// lost or stays silent past the read timeout, then evicts the peer.
async fn receiver(node: Node, addr: Ipv4Addr, read_half: OwnedReadHalf, handle: PeerHandle) {
    let mut reader = TimedReader::new(read_half, node.net().read_timeout());

    loop {
        let message_type = match codec::read_u8(&mut reader).await {
            Ok(t) => t,
            Err(e) => {
                warn!("peer {addr}: {e}; closing connection");
                break;
            }
        };

        let handled = match message_type {
            MSG_PEER_REQUEST => send_peer_list(&node, &handle).await,
            MSG_PEER_LIST => process_peer_list(&node, &mut reader).await,
            MSG_ARCHIVE_REQUEST => send_archive(&node, addr, &handle).await,
            MSG_ARCHIVE_RESPONSE => process_archive(&node, addr, &mut reader).await,
            other => {
                debug!("unknown message type {other} from {addr}, ignoring");
                Ok(())
            }
        };
        if let Err(e) = handled {
            warn!("peer {addr}: {e}; closing connection");
            break;
        }
    }

    // Sole-closer duty: shut the shared write half down so the requester's
    // next send fails, then drop the peer from the registry.
    let _ = handle.lock().await.shutdown().await;
    node.peers().lock().await.remove(addr);
    info!("peer {addr} disconnected");
}

/// Replies with the registry's cached peer-list blob. The registry lock is
/// released before the send.
async fn send_peer_list(node: &Node, handle: &PeerHandle) -> io::Result<()> {
    let wire = node.peers().lock().await.peer_list_wire().to_vec();
    handle.lock().await.write_all(&wire).await
}

/// Serves the active archive, unless it is still empty. The blob is copied
/// under the read lock and sent without it.
async fn send_archive(node: &Node, addr: Ipv4Addr, handle: &PeerHandle) -> io::Result<()> {
    let blob = {
        let archive = node.archive().read().await;
        if archive.is_empty() {
            debug!("archive request from {addr} ignored, archive is empty");
            None
        } else {
            Some(archive.as_bytes().to_vec())
        }
    };
    match blob {
        Some(bytes) => handle.lock().await.write_all(&bytes).await,
        None => Ok(()),
    }
}

/// Ingests a peer list: every address we are not yet connected to (and that
/// is not ourselves) gets a bounded connection attempt. The registry stays
/// locked across each check-connect-register sequence.
async fn process_peer_list<R>(node: &Node, reader: &mut TimedReader<R>) -> io::Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let addrs = codec::read_peer_list(reader).await?;
    debug!("processing peer list with {} entries", addrs.len());

    for addr in addrs {
        if addr == node.local_addr() {
            continue;
        }

        let mut registry = node.peers().lock().await;
        if registry.contains(addr) {
            continue;
        }
        info!("attempting to connect to new peer {addr}");
        match connect_with_timeout(addr, node.net().connect_timeout()).await {
            Ok(stream) => {
                if let Err(e) = register_and_spawn(node, &mut registry, stream) {
                    warn!("could not set up peer {addr}: {e}");
                }
            }
            Err(e) => warn!("could not connect to peer {addr}: {e}"),
        }
    }
    Ok(())
}

/// Ingests an archive response and offers it to the engine as a
/// replacement. An invalid or short candidate costs the peer nothing.
async fn process_archive<R>(node: &Node, addr: Ipv4Addr, reader: &mut TimedReader<R>) -> io::Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let candidate = codec::read_archive(reader).await?;
    debug!(
        "received archive with {} messages from {addr}:\n{candidate}",
        candidate.count()
    );
    node.consider_replacement(candidate).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn test_node() -> Node {
        Node::new(Ipv4Addr::new(10, 0, 0, 7), NetworkConfig::default())
    }

    #[tokio::test]
    async fn own_address_is_never_connected() {
        let node = test_node();

        // A peer list carrying only our own address.
        let (mut tx, rx) = tokio::io::duplex(64);
        tx.write_all(&[0, 0, 0, 1, 10, 0, 0, 7]).await.unwrap();

        let mut reader = TimedReader::new(rx, Duration::from_secs(5));
        process_peer_list(&node, &mut reader).await.unwrap();
        assert!(node.peers().lock().await.is_empty());
    }

    #[tokio::test]
    async fn received_archive_replaces_a_shorter_one() {
        let node = test_node();
        node.submit_line(b"old").await.unwrap();

        let mut longer = node.archive().read().await.clone();
        longer.append(b"new").unwrap();
        longer.append(b"news").unwrap();

        let (mut tx, rx) = tokio::io::duplex(1024);
        tx.write_all(&longer.as_bytes()[1..]).await.unwrap();
        drop(tx);

        let mut reader = TimedReader::new(rx, Duration::from_secs(5));
        process_archive(&node, Ipv4Addr::LOCALHOST, &mut reader)
            .await
            .unwrap();
        assert_eq!(node.archive().read().await.count(), 3);
    }

    #[tokio::test]
    async fn concurrent_duplicate_connections_register_once() {
        let node = test_node();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Two live transports to the same peer IP. Keep the client ends open
        // so neither receiver sees EOF and evicts the entry mid-test.
        let (client_a, accepted_a) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (client_b, accepted_b) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let _client_a = client_a.unwrap();
        let _client_b = client_b.unwrap();
        let (stream_a, _) = accepted_a.unwrap();
        let (stream_b, _) = accepted_b.unwrap();

        // Race both registrations; each task takes the registry lock for its
        // whole check-and-register sequence, so exactly one may win.
        let node_a = node.clone();
        let node_b = node.clone();
        let task_a = tokio::spawn(async move {
            let mut registry = node_a.peers().lock().await;
            register_and_spawn(&node_a, &mut registry, stream_a)
        });
        let task_b = tokio::spawn(async move {
            let mut registry = node_b.peers().lock().await;
            register_and_spawn(&node_b, &mut registry, stream_b)
        });
        let (done_a, done_b) = tokio::join!(task_a, task_b);
        done_a.unwrap().unwrap();
        done_b.unwrap().unwrap();

        let registry = node.peers().lock().await;
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(Ipv4Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn receiver_serves_the_peer_list() {
        let node = test_node();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let mut client = client.unwrap();
        let (server_stream, _) = accepted.unwrap();

        {
            let mut registry = node.peers().lock().await;
            register_and_spawn(&node, &mut registry, server_stream).unwrap();
            assert_eq!(registry.len(), 1);
        }

        client.write_all(&[MSG_PEER_REQUEST]).await.unwrap();

        // The peer's requester may interleave its own polls; skip those.
        let mut byte = [0u8; 1];
        loop {
            client.read_exact(&mut byte).await.unwrap();
            if byte[0] == MSG_PEER_LIST {
                break;
            }
        }
        let mut body = [0u8; 8];
        client.read_exact(&mut body).await.unwrap();
        assert_eq!(&body[..4], &[0, 0, 0, 1]);
        assert_eq!(&body[4..], &[127, 0, 0, 1]);
    }
}
