//! Peer networking: wire constants, stream codec, the connected-peer
//! registry, the inbound listener and the per-peer task pair.

pub mod codec;
pub mod listener;
pub mod peer;
pub mod peers;

pub use self::codec::TimedReader;
pub use self::peers::{PeerHandle, PeerRegistry};

/// TCP port every participant listens on. Fixed by the wire protocol.
pub const TCP_PORT: u16 = 51511;

// Single-byte message types, the first byte of every logical message.
pub const MSG_PEER_REQUEST: u8 = 1;
pub const MSG_PEER_LIST: u8 = 2;
pub const MSG_ARCHIVE_REQUEST: u8 = 3;
pub const MSG_ARCHIVE_RESPONSE: u8 = 4;
