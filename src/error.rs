use std::net::SocketAddr;

use thiserror::Error;

/// Errors raised while setting up a peer connection.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer address {0} is not ipv4")]
    NotIpv4(SocketAddr),
}
