//! Multi-chunk message splitting and reassembly
//!
//! Message bodies larger than [`MAX_CHUNK_PAYLOAD`] bytes travel as several
//! `MSG` commands sharing one `Message-ID`:
//!
//! - chunk 0 carries every original header plus `Message-ID` and `Chunks: n`
//! - chunk i (1..n) carries only `Message-ID` and `Chunk: i`
//!
//! Bodies at or below the limit are sent as-is with no `Message-ID` header.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::errors::ChunkError;
use crate::protocol::mime::{
    MimeHeaders, MimeMessage, HEADER_CHUNK, HEADER_CHUNKS, HEADER_MESSAGE_ID,
};
use crate::types::{MessageId, TimeSource, Timestamp};
use crate::Result;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Maximum body bytes per `MSG` chunk
pub const MAX_CHUNK_PAYLOAD: usize = 1400;

/// Maximum chunks accepted for one message
pub const DEFAULT_MAX_CHUNKS: u32 = 256;

/// Abandoned partial messages are dropped after this long (5 minutes)
pub const DEFAULT_REASSEMBLY_EXPIRY: Duration = Duration::from_secs(300);

// ----------------------------------------------------------------------------
// Chunker
// ----------------------------------------------------------------------------

/// Splits outbound messages on the chunk size limit
#[derive(Debug, Clone)]
pub struct MessageChunker {
    max_payload: usize,
}

impl MessageChunker {
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload: max_payload.max(1),
        }
    }

    pub fn needs_chunking(&self, body_len: usize) -> bool {
        body_len > self.max_payload
    }

    /// Number of chunks a body of this size is split into
    pub fn chunk_count(&self, body_len: usize) -> usize {
        if self.needs_chunking(body_len) {
            body_len.div_ceil(self.max_payload)
        } else {
            1
        }
    }

    /// Split a message under a freshly generated message id
    pub fn split(&self, message: MimeMessage) -> Vec<MimeMessage> {
        self.split_with_id(message, MessageId::generate())
    }

    /// Split a message using the given message id
    pub fn split_with_id(&self, message: MimeMessage, message_id: MessageId) -> Vec<MimeMessage> {
        if !self.needs_chunking(message.body().len()) {
            return vec![message];
        }

        let (headers, body) = message.into_parts();
        let pieces: Vec<&[u8]> = body.chunks(self.max_payload).collect();
        let total = pieces.len();
        debug!(
            "Splitting {} byte message into {} chunks ({})",
            body.len(),
            total,
            message_id
        );

        pieces
            .into_iter()
            .enumerate()
            .map(|(index, piece)| {
                let mut chunk_headers = if index == 0 {
                    let mut first = headers.clone();
                    first.set(HEADER_MESSAGE_ID, message_id.as_str());
                    first.set(HEADER_CHUNKS, total.to_string());
                    first
                } else {
                    let mut rest = MimeHeaders::new();
                    rest.set(HEADER_MESSAGE_ID, message_id.as_str());
                    rest
                };
                if index > 0 {
                    chunk_headers.set(HEADER_CHUNK, index.to_string());
                }
                MimeMessage::from_parts(chunk_headers, piece.to_vec())
            })
            .collect()
    }
}

impl Default for MessageChunker {
    fn default() -> Self {
        Self::new(MAX_CHUNK_PAYLOAD)
    }
}

// ----------------------------------------------------------------------------
// Reassembler
// ----------------------------------------------------------------------------

/// Chunks received so far for one message id
#[derive(Debug)]
struct PartialMessage {
    headers: MimeHeaders,
    total: u32,
    /// Bodies of chunk 0 and every chunk after it, in index order
    pieces: Vec<Vec<u8>>,
    started_at: Timestamp,
}

impl PartialMessage {
    fn next_index(&self) -> u32 {
        self.pieces.len() as u32
    }

    fn is_expired(&self, now: Timestamp, expiry: Duration) -> bool {
        now - self.started_at >= expiry.as_millis() as u64
    }
}

/// Rebuilds chunked messages in strict index order
#[derive(Debug)]
pub struct ChunkReassembler<T: TimeSource> {
    buffers: HashMap<MessageId, PartialMessage>,
    time_source: T,
    expiry: Option<Duration>,
    max_chunks: u32,
}

impl<T: TimeSource> ChunkReassembler<T> {
    pub fn new(time_source: T) -> Self {
        Self {
            buffers: HashMap::new(),
            time_source,
            expiry: Some(DEFAULT_REASSEMBLY_EXPIRY),
            max_chunks: DEFAULT_MAX_CHUNKS,
        }
    }

    /// Set the expiry for abandoned buffers; `None` keeps them for the session lifetime
    pub fn with_expiry(mut self, expiry: Option<Duration>) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn with_max_chunks(mut self, max_chunks: u32) -> Self {
        self.max_chunks = max_chunks;
        self
    }

    /// Accept one inbound message.
    ///
    /// Returns the message itself when it is not chunked, `None` while chunks
    /// are still outstanding, and the reassembled message on the last chunk.
    /// A chunk that does not continue a buffered sequence is an error and the
    /// buffer for that message id is discarded.
    pub fn accept(&mut self, message: MimeMessage) -> Result<Option<MimeMessage>> {
        self.prune_expired();

        let Some(message_id) = message.header(HEADER_MESSAGE_ID).map(MessageId::new) else {
            return Ok(Some(message));
        };
        let chunks = message.header(HEADER_CHUNKS).map(str::to_string);
        let chunk = message.header(HEADER_CHUNK).map(str::to_string);

        if let Some(value) = chunks {
            let total = parse_counter(HEADER_CHUNKS, &value)?;
            if total > self.max_chunks {
                return Err(ChunkError::TooManyChunks {
                    count: total,
                    max: self.max_chunks,
                }
                .into());
            }
            if total <= 1 {
                return Ok(Some(strip_chunk_headers(message)));
            }

            let (headers, body) = message.into_parts();
            trace!("First chunk of {} ({} expected)", message_id, total);
            self.buffers.insert(
                message_id,
                PartialMessage {
                    headers,
                    total,
                    pieces: vec![body],
                    started_at: self.time_source.now(),
                },
            );
            return Ok(None);
        }

        let Some(value) = chunk else {
            return Ok(Some(message));
        };
        let index = parse_counter(HEADER_CHUNK, &value)?;

        let Some(partial) = self.buffers.get_mut(&message_id) else {
            warn!("Chunk {} of {} has no first chunk", index, message_id);
            return Err(ChunkError::MissingFirstChunk {
                message_id: message_id.to_string(),
                index,
            }
            .into());
        };

        let expected = partial.next_index();
        if index != expected {
            self.buffers.remove(&message_id);
            warn!(
                "Chunk out of order for {}: expected {}, got {}",
                message_id, expected, index
            );
            return Err(ChunkError::OutOfOrder {
                message_id: message_id.to_string(),
                expected,
                actual: index,
            }
            .into());
        }

        let (_, body) = message.into_parts();
        partial.pieces.push(body);
        if index + 1 < partial.total {
            return Ok(None);
        }

        let Some(complete) = self.buffers.remove(&message_id) else {
            return Ok(None);
        };
        let body: Vec<u8> = complete.pieces.concat();
        debug!(
            "Reassembled {} from {} chunks ({} bytes)",
            message_id,
            complete.total,
            body.len()
        );
        Ok(Some(strip_chunk_headers(MimeMessage::from_parts(
            complete.headers,
            body,
        ))))
    }

    /// Drop buffers older than the configured expiry
    pub fn prune_expired(&mut self) {
        let Some(expiry) = self.expiry else {
            return;
        };
        let now = self.time_source.now();
        let before = self.buffers.len();
        self.buffers
            .retain(|_, partial| !partial.is_expired(now, expiry));
        let removed = before - self.buffers.len();
        if removed > 0 {
            debug!("Dropped {} abandoned partial messages", removed);
        }
    }

    /// Number of messages with outstanding chunks
    pub fn pending_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}

fn parse_counter(header: &'static str, value: &str) -> Result<u32> {
    value.trim().parse::<u32>().map_err(|_| {
        ChunkError::InvalidHeader {
            header,
            value: value.to_string(),
        }
        .into()
    })
}

fn strip_chunk_headers(message: MimeMessage) -> MimeMessage {
    let (mut headers, body) = message.into_parts();
    headers.remove(HEADER_MESSAGE_ID);
    headers.remove(HEADER_CHUNKS);
    headers.remove(HEADER_CHUNK);
    MimeMessage::from_parts(headers, body)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
