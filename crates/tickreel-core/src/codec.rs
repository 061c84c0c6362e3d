//! Segment Payload Codec
//!
//! This module defines how a segment — a contiguous range of ticks and
//! their opaque payloads — is turned into bytes and back.
//!
//! ## The Contract
//!
//! `decode(encode(s)) == s` for any well-formed segment. Tick keys are
//! preserved exactly and the logical mapping is never reordered (the
//! in-memory representation is an ordered map). The engine never inspects
//! payloads; all knowledge of the payload type lives here and in the
//! caller's tick callback.
//!
//! ## Frame Layout
//!
//! Each `segment_{k}.dat` file is one self-describing frame:
//!
//! ```text
//! ┌──────────┬─────────┬─────────────┬───────┬────────────────────┐
//! │ magic    │ version │ compression │ crc32 │ body               │
//! │ "TKSG"   │ u16     │ u16         │ u32   │ JSON, maybe LZ4'd  │
//! │ 4 bytes  │ 2 bytes │ 2 bytes     │ 4 B   │ rest of file       │
//! └──────────┴─────────┴─────────────┴───────┴────────────────────┘
//! ```
//!
//! The CRC is computed over the *raw* (uncompressed) JSON body, so
//! corruption is detected regardless of the compression flag. The body is
//! a JSON object with three keys — `firstTick`, `lastTick`, and `data`,
//! whose keys are decimal tick strings. Decoding tolerates numeric or
//! string tick keys.
//!
//! ## Validation on Decode
//!
//! 1. Frame is at least header-sized
//! 2. Magic bytes match
//! 3. Version is supported (currently v1)
//! 4. Compression id is known
//! 5. Body decompresses (when compressed)
//! 6. CRC32 of the raw body matches
//! 7. Body parses as a segment record
//!
//! ## Usage
//! ```ignore
//! let codec = JsonCodec::new(Compression::Lz4);
//! let bytes = codec.encode(&segment)?;
//! let back: SegmentData<MyPayload> = codec.decode(&bytes)?;
//! assert_eq!(segment, back);
//! ```

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Magic bytes at the start of every segment frame
pub const SEGMENT_MAGIC: [u8; 4] = *b"TKSG";

/// Current frame version
pub const SEGMENT_VERSION: u16 = 1;

/// Frame header size: magic + version + compression + crc32
pub const FRAME_HEADER_SIZE: usize = 12;

/// Compression applied to the frame body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u16)]
pub enum Compression {
    None = 0,
    #[default]
    Lz4 = 1,
}

impl TryFrom<u16> for Compression {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lz4),
            _ => Err(Error::InvalidCompression(value)),
        }
    }
}

/// One segment: a `tick → payload` mapping for a half-open tick interval,
/// plus the first and last tick actually present.
///
/// Invariants: every key lies within the segment's interval, keys are
/// unique (map semantics), and a segment is immutable after its final
/// flush. The ordered map keeps iteration in tick order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentData<T> {
    /// Lowest tick present in `data`
    pub first_tick: u64,

    /// Highest tick present in `data`
    pub last_tick: u64,

    /// The recorded payloads, keyed by tick
    pub data: BTreeMap<u64, T>,
}

impl<T> SegmentData<T> {
    /// Build a segment from a tick-keyed map, deriving the tick bounds.
    /// An empty map yields `first_tick == last_tick == 0`.
    pub fn from_map(data: BTreeMap<u64, T>) -> Self {
        let first_tick = data.keys().next().copied().unwrap_or(0);
        let last_tick = data.keys().next_back().copied().unwrap_or(0);
        Self {
            first_tick,
            last_tick,
            data,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Payload recorded at `tick`, if any.
    pub fn get(&self, tick: u64) -> Option<&T> {
        self.data.get(&tick)
    }

    /// Smallest tick `>= tick` with a payload, if any.
    pub fn first_tick_at_or_after(&self, tick: u64) -> Option<u64> {
        self.data.range(tick..).next().map(|(t, _)| *t)
    }
}

/// Encodes and decodes segments. Implementations must be pure: no
/// observable state, and `decode ∘ encode` must be the identity. All
/// segments within one recording directory use the same codec.
pub trait PayloadCodec<T>: Send + Sync {
    fn encode(&self, segment: &SegmentData<T>) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<SegmentData<T>>;
}

/// The default codec: framed, checksummed, optionally LZ4-compressed JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    compression: Compression,
}

impl JsonCodec {
    pub fn new(compression: Compression) -> Self {
        Self { compression }
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }
}

impl<T> PayloadCodec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn encode(&self, segment: &SegmentData<T>) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(segment)?;
        let crc = crc32fast::hash(&body);

        let framed_body = match self.compression {
            Compression::None => body,
            Compression::Lz4 => lz4_flex::compress_prepend_size(&body),
        };

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + framed_body.len());
        buf.put_slice(&SEGMENT_MAGIC);
        buf.put_u16(SEGMENT_VERSION);
        buf.put_u16(self.compression as u16);
        buf.put_u32(crc);
        buf.put_slice(&framed_body);

        Ok(buf.to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<SegmentData<T>> {
        if bytes.len() < FRAME_HEADER_SIZE {
            return Err(Error::Corrupt("frame smaller than header".to_string()));
        }

        let mut cursor = bytes;

        let mut magic = [0u8; 4];
        cursor.copy_to_slice(&mut magic);
        if magic != SEGMENT_MAGIC {
            return Err(Error::InvalidMagic);
        }

        let version = cursor.get_u16();
        if version != SEGMENT_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        let compression = Compression::try_from(cursor.get_u16())?;
        let stored_crc = cursor.get_u32();

        let body = match compression {
            Compression::None => cursor.to_vec(),
            Compression::Lz4 => lz4_flex::decompress_size_prepended(cursor)
                .map_err(|e| Error::Decompression(e.to_string()))?,
        };

        if crc32fast::hash(&body) != stored_crc {
            return Err(Error::CrcMismatch);
        }

        Ok(serde_json::from_slice(&body)?)
    }
}
