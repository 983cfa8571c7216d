//! Chat archive: blob layout, hash-chain validation and proof-of-work mining.

pub mod engine;

pub use self::engine::{Archive, ArchiveError, MinedMessage, Record, Records};

/// Byte length of the blob header (type byte + big-endian message count).
pub const HEADER_LEN: usize = 5;

/// Byte length of a mined nonce.
pub const NONCE_LEN: usize = 16;

/// Byte length of an MD5 digest.
pub const DIGEST_LEN: usize = 16;

/// Fixed per-record overhead: length byte + nonce + digest.
pub const RECORD_OVERHEAD: usize = 1 + NONCE_LEN + DIGEST_LEN;

/// Maximum content bytes in a single message.
pub const MAX_CONTENT_LEN: usize = 255;

/// The hash domain spans at most this many trailing records.
pub const WINDOW_RECORDS: u32 = 20;
