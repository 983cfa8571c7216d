//! Inbound connection listener: accepts peers on the fixed port and hands
//! each one to the per-peer task pair.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use log::{error, info, warn};
use tokio::net::TcpSocket;

use crate::network::{peer, TCP_PORT};
use crate::node::Node;

/// Accept loop for incoming peers. Bind or listen failures end only this
/// task; the node keeps serving its outbound connections. Accept errors are
/// logged and the loop continues.
pub async fn run(node: Node) {
    let listener = {
        let bind = || -> std::io::Result<tokio::net::TcpListener> {
            let socket = TcpSocket::new_v4()?;
            socket.set_reuseaddr(true)?;
            socket.bind(SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::UNSPECIFIED,
                TCP_PORT,
            )))?;
            socket.listen(node.net().listen_backlog)
        };
        match bind() {
            Ok(listener) => listener,
            Err(e) => {
                error!("could not listen for incoming peers on port {TCP_PORT}: {e}");
                return;
            }
        }
    };
    info!("waiting for incoming peer connections on port {TCP_PORT}");

    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                info!("incoming peer connection from {remote}");
                let mut registry = node.peers().lock().await;
                if let Err(e) = peer::register_and_spawn(&node, &mut registry, stream) {
                    warn!("could not set up incoming peer {remote}: {e}");
                }
            }
            Err(e) => {
                warn!("failed to accept a peer connection: {e}");
            }
        }
    }
}
