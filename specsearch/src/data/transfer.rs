//! Flat little-endian wire format for result sets.
//!
//! Layout: an `i32` match count, then for every match an `i32` flag set, `f64` score,
//! `f64` mixture weight, `i32` name length in UTF-16 code units and the code units
//! themselves as `u16`. The whole block is one contiguous buffer.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;
use tracing::{debug, warn};

use speccore::data::matches::{Match, MatchFlags, ResultSet};

use crate::error::SearchError;

const COUNT_BYTES: usize = 4;
/// Fixed bytes of one match before its name: flags, score, weight, name length.
const MATCH_HEADER_BYTES: usize = 4 + 8 + 8 + 4;

/// Exact size of the encoded block.
pub fn encoded_len(results: &ResultSet) -> usize {
    COUNT_BYTES
        + results
            .iter()
            .map(|m| MATCH_HEADER_BYTES + 2 * m.name.encode_utf16().count())
            .sum::<usize>()
}

pub fn encode_results(results: &ResultSet) -> Result<Vec<u8>, SearchError> {
    let mut buffer = Vec::with_capacity(encoded_len(results));
    write_results(&mut buffer, results)?;
    Ok(buffer)
}

pub fn write_results<W: Write>(writer: &mut W, results: &ResultSet) -> Result<(), SearchError> {
    writer.write_i32::<LittleEndian>(to_i32(results.len(), "match count")?)?;
    for m in results {
        let name: Vec<u16> = m.name.encode_utf16().collect();
        writer.write_i32::<LittleEndian>(m.flags.bits() as i32)?;
        writer.write_f64::<LittleEndian>(m.score)?;
        writer.write_f64::<LittleEndian>(m.mixture_weight)?;
        writer.write_i32::<LittleEndian>(to_i32(name.len(), "name length")?)?;
        for unit in name {
            writer.write_u16::<LittleEndian>(unit)?;
        }
    }
    Ok(())
}

/// Decodes a block produced by [`encode_results`]. Truncated blocks, negative counts,
/// invalid UTF-16 and trailing bytes are rejected.
pub fn decode_results(bytes: &[u8]) -> Result<ResultSet, SearchError> {
    let mut cursor = Cursor::new(bytes);
    let count = read_count(&mut cursor, "match count")?;
    if count.saturating_mul(MATCH_HEADER_BYTES) > remaining(&cursor) {
        return Err(truncated());
    }

    let mut matches = Vec::with_capacity(count);
    for _ in 0..count {
        let flags = MatchFlags::from_bits_retain(cursor.read_i32::<LittleEndian>().map_err(|_| truncated())? as u32);
        let score = cursor.read_f64::<LittleEndian>().map_err(|_| truncated())?;
        let mixture_weight = cursor.read_f64::<LittleEndian>().map_err(|_| truncated())?;
        let name_len = read_count(&mut cursor, "name length")?;
        if name_len.saturating_mul(2) > remaining(&cursor) {
            return Err(truncated());
        }
        let mut units = vec![0u16; name_len];
        cursor.read_u16_into::<LittleEndian>(&mut units).map_err(|_| truncated())?;
        let name = String::from_utf16(&units)
            .map_err(|e| SearchError::InvalidInput(format!("match name is not valid UTF-16: {}", e)))?;
        matches.push(Match { name, score, mixture_weight, flags });
    }

    let trailing = remaining(&cursor);
    if trailing > 0 {
        return Err(SearchError::InvalidInput(format!("{} trailing bytes after result block", trailing)));
    }
    Ok(ResultSet::new(matches))
}

fn read_count<R: Read>(reader: &mut R, what: &str) -> Result<usize, SearchError> {
    let value = reader.read_i32::<LittleEndian>().map_err(|_| truncated())?;
    usize::try_from(value).map_err(|_| SearchError::InvalidInput(format!("negative {}: {}", what, value)))
}

fn to_i32(value: usize, what: &str) -> Result<i32, SearchError> {
    i32::try_from(value).map_err(|_| SearchError::InvalidInput(format!("{} {} does not fit the wire format", what, value)))
}

fn remaining(cursor: &Cursor<&[u8]>) -> usize {
    cursor.get_ref().len().saturating_sub(cursor.position() as usize)
}

fn truncated() -> SearchError {
    SearchError::InvalidInput("truncated result block".to_string())
}

/// Identifies a published block and tells the receiver how many bytes to expect.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TransferTicket {
    pub id: u64,
    pub byte_len: usize,
}

struct PublishedBlock {
    bytes: Arc<[u8]>,
    published_at: Instant,
}

/// Encoded result blocks handed to a receiver, kept alive until it acknowledges them or
/// a grace period runs out.
pub struct TransferLedger {
    grace: Duration,
    next_id: AtomicU64,
    blocks: Mutex<BTreeMap<u64, PublishedBlock>>,
}

impl TransferLedger {
    pub fn new(grace: Duration) -> Self {
        TransferLedger { grace, next_id: AtomicU64::new(1), blocks: Mutex::new(BTreeMap::new()) }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn publish(&self, results: &ResultSet) -> Result<TransferTicket, SearchError> {
        self.publish_at(results, Instant::now())
    }

    pub fn publish_at(&self, results: &ResultSet, now: Instant) -> Result<TransferTicket, SearchError> {
        let bytes: Arc<[u8]> = encode_results(results)?.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let ticket = TransferTicket { id, byte_len: bytes.len() };
        self.blocks.lock().insert(id, PublishedBlock { bytes, published_at: now });
        debug!("published transfer block {} ({} bytes)", id, ticket.byte_len);
        Ok(ticket)
    }

    /// The bytes of a block that is still alive.
    pub fn block(&self, id: u64) -> Option<Arc<[u8]>> {
        self.blocks.lock().get(&id).map(|block| block.bytes.clone())
    }

    /// Releases a block after the receiver has copied it. Returns false for unknown ids.
    pub fn acknowledge(&self, id: u64) -> bool {
        self.blocks.lock().remove(&id).is_some()
    }

    /// Drops blocks published more than the grace period before `now`.
    pub fn release_expired(&self, now: Instant) -> usize {
        let mut blocks = self.blocks.lock();
        let before = blocks.len();
        blocks.retain(|_, block| now.saturating_duration_since(block.published_at) <= self.grace);
        let released = before - blocks.len();
        if released > 0 {
            warn!("released {} unacknowledged transfer blocks", released);
        }
        released
    }

    pub fn outstanding(&self) -> usize {
        self.blocks.lock().len()
    }
}
