//! The archive engine: a single owned byte blob holding every chat message,
//! chained by MD5 over a sliding window of the trailing 20 records.
//!
//! Blob layout: `type(1) ‖ count(4, BE) ‖ records`, where each record is
//! `length(1) ‖ content(length) ‖ nonce(16) ‖ digest(16)`. The digest of a
//! record covers everything from the window start through that record's nonce,
//! and becomes part of the window hashed for the next record.

use std::fmt;

use thiserror::Error;

use super::{DIGEST_LEN, HEADER_LEN, MAX_CONTENT_LEN, NONCE_LEN, RECORD_OVERHEAD, WINDOW_RECORDS};
use crate::network::MSG_ARCHIVE_RESPONSE;

/// Errors produced while appending to or validating an archive.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArchiveError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("message exceeds {MAX_CONTENT_LEN} bytes")]
    MessageTooLong,

    #[error("illegal byte 0x{0:02x} in message content")]
    IllegalContent(u8),

    #[error("archive truncated at record {0}")]
    Truncated(u32),

    #[error("digest of record {0} does not start with two zero bytes")]
    DigestPrefix(u32),

    #[error("digest mismatch at record {0}")]
    DigestMismatch(u32),
}

/// Summary of a freshly mined message, for reporting to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinedMessage {
    /// Content length in bytes.
    pub length: u8,
    /// The nonce that produced a valid digest.
    pub nonce: [u8; NONCE_LEN],
    /// The winning digest (first two bytes are zero).
    pub digest: [u8; DIGEST_LEN],
}

/// The chat archive: an ordered, hash-chained, append-only list of messages
/// kept in the exact byte form that goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    bytes: Vec<u8>,
    count: u32,
    /// Byte index of the start of the hash window that the next mined record
    /// will cover. Equals `HEADER_LEN` until the archive holds 19 messages.
    offset: usize,
}

impl Archive {
    /// A new, empty archive: header only, so any valid peer archive wins.
    pub fn new() -> Self {
        let mut bytes = Vec::with_capacity(HEADER_LEN);
        bytes.push(MSG_ARCHIVE_RESPONSE);
        bytes.extend_from_slice(&0u32.to_be_bytes());
        Archive {
            bytes,
            count: 0,
            offset: HEADER_LEN,
        }
    }

    /// Wraps a blob received from a peer. The hash chain is NOT checked here;
    /// callers must run [`Archive::validate`] before trusting the result.
    pub fn from_blob(bytes: Vec<u8>, count: u32) -> Self {
        Archive {
            bytes,
            count,
            offset: HEADER_LEN,
        }
    }

    /// Number of messages in the archive.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// True when the archive holds no messages.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Total blob length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Start of the hash window for the next record to be mined.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The full wire form; the leading byte already carries the message type.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Iterate over the records of the blob. Stops early on a malformed tail,
    /// so it is safe to call on archives that have not been validated.
    pub fn records(&self) -> Records<'_> {
        Records {
            bytes: &self.bytes,
            at: HEADER_LEN,
            remaining: self.count,
        }
    }

    /// Parses and mines a user-supplied line into the archive.
    ///
    /// The line is scanned up to a newline or NUL terminator; every content
    /// byte must be printable ASCII. On success the blob grows by one record
    /// whose digest starts with two zero bytes, found by counting a 128-bit
    /// little-endian nonce up from zero.
    pub fn append(&mut self, line: &[u8]) -> Result<MinedMessage, ArchiveError> {
        let content = parse_message(line)?;
        let length = content.len();

        let record_start = self.bytes.len();
        self.bytes.reserve(length + RECORD_OVERHEAD);
        self.bytes.push(length as u8);
        self.bytes.extend_from_slice(content);
        self.bytes.extend_from_slice(&[0u8; NONCE_LEN]);
        self.bytes.extend_from_slice(&[0u8; DIGEST_LEN]);

        let nonce_at = record_start + 1 + length;
        let digest_at = nonce_at + NONCE_LEN;

        // Mine in place: the nonce bytes are part of the hashed window.
        let mut attempt: u128 = 0;
        let digest = loop {
            self.bytes[nonce_at..digest_at].copy_from_slice(&attempt.to_le_bytes());
            let computed = md5::compute(&self.bytes[self.offset..digest_at]);
            if computed.0[0] == 0 && computed.0[1] == 0 {
                break computed.0;
            }
            attempt = attempt.wrapping_add(1);
        };
        self.bytes[digest_at..digest_at + DIGEST_LEN].copy_from_slice(&digest);

        self.count += 1;
        self.bytes[1..HEADER_LEN].copy_from_slice(&self.count.to_be_bytes());

        // Once 20 records exist, the window slides: the record currently at
        // `offset` falls out of the domain of the next mine.
        if self.count >= WINDOW_RECORDS {
            self.offset += self.bytes[self.offset] as usize + RECORD_OVERHEAD;
        }

        Ok(MinedMessage {
            length: length as u8,
            nonce: attempt.to_le_bytes(),
            digest,
        })
    }

    /// Walks the whole blob and checks the hash chain of every record.
    ///
    /// Two cursors track the sliding window: `begin` (left edge) and `end`
    /// (record walker). The engine `offset` is recomputed along the way so an
    /// accepted archive is immediately ready for mining. On failure the
    /// archive state is unspecified and the value should be discarded.
    pub fn validate(&mut self) -> Result<(), ArchiveError> {
        let mut begin = HEADER_LEN;
        let mut end = HEADER_LEN;
        let mut window = 0usize;
        self.offset = HEADER_LEN;

        for i in 1..=self.count {
            let length = *self.bytes.get(end).ok_or(ArchiveError::Truncated(i))? as usize;
            end += length + 1 + NONCE_LEN;
            window += length + 1 + NONCE_LEN;

            let digest = self
                .bytes
                .get(end..end + DIGEST_LEN)
                .ok_or(ArchiveError::Truncated(i))?;
            if digest[0] != 0 || digest[1] != 0 {
                return Err(ArchiveError::DigestPrefix(i));
            }

            if i > WINDOW_RECORDS - 1 {
                self.offset += self.bytes[self.offset] as usize + RECORD_OVERHEAD;
            }
            if i > WINDOW_RECORDS {
                let evicted = self.bytes[begin] as usize + RECORD_OVERHEAD;
                window -= evicted;
                begin += evicted;
            }

            let computed = md5::compute(&self.bytes[begin..begin + window]);
            if computed.0[..] != *digest {
                return Err(ArchiveError::DigestMismatch(i));
            }

            // The digest joins the window hashed for the following records.
            end += DIGEST_LEN;
            window += DIGEST_LEN;
        }
        Ok(())
    }

    /// Commits `candidate` as the active archive when it is strictly longer.
    ///
    /// The candidate must already have passed [`Archive::validate`]; this only
    /// re-checks the count so callers can drop and re-take their lock between
    /// validation and commit.
    pub fn replace(&mut self, candidate: Archive) -> bool {
        if candidate.count > self.count {
            *self = candidate;
            true
        } else {
            false
        }
    }
}

impl Default for Archive {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "---------- archive ----------")?;
        writeln!(f, "messages: {}, bytes: {}", self.count, self.bytes.len())?;
        for record in self.records() {
            writeln!(
                f,
                "msg[{}]: {}",
                record.content.len(),
                String::from_utf8_lossy(record.content)
            )?;
            writeln!(f, "nonce: {}", hex::encode(record.nonce))?;
            writeln!(f, "md5: {}", hex::encode(record.digest))?;
        }
        write!(f, "---------- end of archive ----------")
    }
}

/// Borrowed view of one record inside the blob.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    pub content: &'a [u8],
    pub nonce: &'a [u8],
    pub digest: &'a [u8],
}

/// Iterator over the records of an archive blob.
pub struct Records<'a> {
    bytes: &'a [u8],
    at: usize,
    remaining: u32,
}

impl<'a> Iterator for Records<'a> {
    type Item = Record<'a>;

    fn next(&mut self) -> Option<Record<'a>> {
        if self.remaining == 0 {
            return None;
        }
        let length = *self.bytes.get(self.at)? as usize;
        let content = self.bytes.get(self.at + 1..self.at + 1 + length)?;
        let nonce = self
            .bytes
            .get(self.at + 1 + length..self.at + 1 + length + NONCE_LEN)?;
        let digest = self
            .bytes
            .get(self.at + 1 + length + NONCE_LEN..self.at + length + RECORD_OVERHEAD)?;
        self.at += length + RECORD_OVERHEAD;
        self.remaining -= 1;
        Some(Record {
            content,
            nonce,
            digest,
        })
    }
}

/// Scans a user line up to a newline or NUL terminator, rejecting empty
/// content, oversize content and anything outside printable ASCII.
fn parse_message(line: &[u8]) -> Result<&[u8], ArchiveError> {
    let mut end = line.len();
    for (i, &byte) in line.iter().enumerate() {
        if byte == b'\n' || byte == 0 {
            end = i;
            break;
        }
        if !(32..=126).contains(&byte) {
            return Err(ArchiveError::IllegalContent(byte));
        }
    }
    let content = &line[..end];
    if content.is_empty() {
        return Err(ArchiveError::EmptyMessage);
    }
    if content.len() > MAX_CONTENT_LEN {
        return Err(ArchiveError::MessageTooLong);
    }
    Ok(content)
}
