//! Binary data-packet codec.
//!
//! Wire format (all integers little-endian, no padding):
//!
//! ```text
//! header  [version:1][size:4][type_flags:4][id:8][number:8][timestamp:8]   33 bytes
//! payload [nch:2]×S [block:2]×S [samples: f32 × block × nch]×S
//! ```
//!
//! `size` counts the header too.  `S` is the number of bits set in
//! `type_flags`; per-signal fields appear in ascending bit order.  Each
//! signal's samples are time-major: all channels of sample 0, then all
//! channels of sample 1, and so on.
//!
//! Unpacking scatters every signal into a sample-major output buffer whose
//! rows are one record stride wide:
//!
//! ```text
//! out[t * stride + offset(signal) + channel] = sample(signal, t, channel)
//! ```

use arrayvec::ArrayVec;
use thiserror::Error;

use crate::catalog::SignalTypeId;
use crate::domain::channel_map::OffsetTable;

/// Size of the fixed packet header in bytes.
pub const HEADER_SIZE: usize = 33;

const SAMPLE_SIZE: usize = std::mem::size_of::<f32>();

/// Errors raised while decoding a data packet.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// The header buffer is shorter than [`HEADER_SIZE`].
    #[error("packet header needs {HEADER_SIZE} bytes, got {0}")]
    ShortHeader(usize),

    /// The header's `size` field is smaller than the header itself.
    #[error("declared packet size {0} is smaller than the header")]
    SizeBelowHeader(u32),

    /// The payload ends before the data its counts describe.
    #[error("payload truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// A subscribed signal would write past the end of a sample row.
    #[error("signal at column {offset} with {channels} channels overflows a row of {stride}")]
    RowOverflow {
        offset: usize,
        channels: usize,
        stride: usize,
    },

    /// Subscribed signals in one packet disagree on block size.
    #[error("signal block size {found} differs from packet block size {expected}")]
    InconsistentBlockSize { expected: u16, found: u16 },

    /// A scratch buffer could not grow to the size a packet needs.
    #[error("could not grow buffer to {requested} elements")]
    BufferGrowth { requested: usize },
}

// ── Header ────────────────────────────────────────────────────────────────────

/// The fixed 33-byte header preceding every data packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    pub version: u8,
    /// Total packet size, header included.
    pub size: u32,
    pub type_flags: u32,
    /// Connection id.
    pub id: u64,
    /// Sequence number.
    pub number: u64,
    pub timestamp: u64,
}

impl PacketHeader {
    /// Decodes a header from the first [`HEADER_SIZE`] bytes of `bytes`.
    ///
    /// # Errors
    ///
    /// [`PacketError::ShortHeader`] if fewer than [`HEADER_SIZE`] bytes are
    /// available.
    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < HEADER_SIZE {
            return Err(PacketError::ShortHeader(bytes.len()));
        }
        Ok(Self {
            version: bytes[0],
            size: u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
            type_flags: u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]),
            id: read_u64_le(&bytes[9..17]),
            number: read_u64_le(&bytes[17..25]),
            timestamp: read_u64_le(&bytes[25..33]),
        })
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0] = self.version;
        out[1..5].copy_from_slice(&self.size.to_le_bytes());
        out[5..9].copy_from_slice(&self.type_flags.to_le_bytes());
        out[9..17].copy_from_slice(&self.id.to_le_bytes());
        out[17..25].copy_from_slice(&self.number.to_le_bytes());
        out[25..33].copy_from_slice(&self.timestamp.to_le_bytes());
        out
    }

    /// Number of payload bytes following the header.
    ///
    /// # Errors
    ///
    /// [`PacketError::SizeBelowHeader`] if `size` cannot even cover the header.
    pub fn payload_len(&self) -> Result<usize, PacketError> {
        (self.size as usize)
            .checked_sub(HEADER_SIZE)
            .ok_or(PacketError::SizeBelowHeader(self.size))
    }
}

fn read_u64_le(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}

// ── Type-flag decoding ────────────────────────────────────────────────────────

/// Where one signal of a packet goes in the sample row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotTarget {
    /// Reserved bit, or a type the session did not subscribe to.
    Absent,
    /// Start column of the signal's channels.
    Present(usize),
}

/// Decodes a packet's `type_flags` against the session's offset table.
///
/// Returns one [`SlotTarget`] per set bit, in ascending bit order; the
/// length of the result is the packet's signal count.
///
/// # Examples
///
/// ```rust
/// use tia_core::domain::channel_map::OffsetTable;
/// use tia_core::catalog::SignalTypeId;
/// use tia_core::protocol::{decode_type_flags, SlotTarget};
///
/// let mut offsets = OffsetTable::new();
/// offsets.set(SignalTypeId::from_bit(1).unwrap(), Some(5));
///
/// let slots = decode_type_flags(0b011, &offsets);
/// assert_eq!(slots.as_slice(), &[SlotTarget::Absent, SlotTarget::Present(5)]);
/// ```
pub fn decode_type_flags(type_flags: u32, offsets: &OffsetTable) -> ArrayVec<SlotTarget, 32> {
    let mut slots = ArrayVec::new();
    let mut remaining = type_flags;
    while remaining != 0 {
        let bit = remaining.trailing_zeros();
        remaining &= remaining - 1;
        let target = SignalTypeId::from_bit(bit)
            .and_then(|id| offsets.get(id))
            .map_or(SlotTarget::Absent, SlotTarget::Present);
        slots.push(target);
    }
    slots
}

// ── Unpacking ─────────────────────────────────────────────────────────────────

/// Scatters a packet payload into `out`, returning the number of sample rows
/// written.
///
/// The row count is the block size of the subscribed signals.  Absent slots
/// are skipped by their own `channels * block_size`, so a reserved or
/// unsubscribed sub-block never constrains the rows.  `out` grows to
/// `rows * stride` samples when it is too small and is never shrunk.
/// Columns of signals missing from this packet keep their previous values.
/// A packet with no subscribed signals yields zero rows.
///
/// # Errors
///
/// Returns [`PacketError`] if the payload is shorter than its counts
/// describe, subscribed signals disagree on block size, a present slot would
/// write past `stride`, or `out` cannot grow.  `out` may be partially written
/// on error.
pub fn unpack(
    payload: &[u8],
    slots: &[SlotTarget],
    stride: usize,
    out: &mut Vec<f32>,
) -> Result<usize, PacketError> {
    let signals = slots.len();
    let prefix_len = signals * 2 * std::mem::size_of::<u16>();
    ensure_len(payload, prefix_len)?;

    let read_u16 = |index: usize| u16::from_le_bytes([payload[index * 2], payload[index * 2 + 1]]);
    let channels_of = |i: usize| read_u16(i) as usize;
    let block_of = |i: usize| read_u16(signals + i);

    let mut packet_rows: Option<u16> = None;
    for (i, slot) in slots.iter().enumerate() {
        if *slot == SlotTarget::Absent {
            continue;
        }
        let found = block_of(i);
        match packet_rows {
            None => packet_rows = Some(found),
            Some(expected) if expected != found => {
                return Err(PacketError::InconsistentBlockSize { expected, found });
            }
            Some(_) => {}
        }
    }
    let rows = packet_rows.map_or(0, usize::from);
    grow_buffer(out, rows * stride)?;

    let mut cursor = prefix_len;
    for (i, slot) in slots.iter().enumerate() {
        let channels = channels_of(i);
        let block_bytes = usize::from(block_of(i)) * channels * SAMPLE_SIZE;
        ensure_len(payload, cursor + block_bytes)?;
        let block = &payload[cursor..cursor + block_bytes];
        cursor += block_bytes;

        let SlotTarget::Present(offset) = *slot else {
            continue;
        };
        if offset + channels > stride {
            return Err(PacketError::RowOverflow {
                offset,
                channels,
                stride,
            });
        }
        if channels == 0 {
            continue;
        }
        for (t, frame) in block.chunks_exact(channels * SAMPLE_SIZE).enumerate() {
            let row = &mut out[t * stride + offset..t * stride + offset + channels];
            for (dst, raw) in row.iter_mut().zip(frame.chunks_exact(SAMPLE_SIZE)) {
                *dst = f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            }
        }
    }

    Ok(rows)
}

/// Grows `buf` to at least `len` elements, zero-filling the new tail.
///
/// Never shrinks.  Uses a fallible reservation, so a hostile size from the
/// wire becomes [`PacketError::BufferGrowth`] instead of an abort.
///
/// # Errors
///
/// [`PacketError::BufferGrowth`] if the allocator refuses the reservation.
pub fn grow_buffer<T: Copy + Default>(buf: &mut Vec<T>, len: usize) -> Result<(), PacketError> {
    if buf.len() >= len {
        return Ok(());
    }
    buf.try_reserve_exact(len - buf.len())
        .map_err(|_| PacketError::BufferGrowth { requested: len })?;
    buf.resize(len, T::default());
    Ok(())
}

fn ensure_len(payload: &[u8], needed: usize) -> Result<(), PacketError> {
    if payload.len() < needed {
        return Err(PacketError::Truncated {
            needed,
            available: payload.len(),
        });
    }
    Ok(())
}

// ── Encoding (fake servers, benches) ──────────────────────────────────────────

/// One signal's data for [`encode_packet`].
#[derive(Debug, Clone, Copy)]
pub struct SignalBlock<'a> {
    pub channels: u16,
    pub block_size: u16,
    /// `block_size * channels` samples, time-major.
    pub samples: &'a [f32],
}

/// Builds a complete data packet.
///
/// `blocks` must be in ascending bit order of `header.type_flags`; the
/// header's `size` field is overwritten with the real packet length.
pub fn encode_packet(header: PacketHeader, blocks: &[SignalBlock<'_>]) -> Vec<u8> {
    let sample_bytes: usize = blocks.iter().map(|b| b.samples.len() * SAMPLE_SIZE).sum();
    let total = HEADER_SIZE + blocks.len() * 4 + sample_bytes;

    let header = PacketHeader {
        size: total as u32,
        ..header
    };
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&header.encode());
    for block in blocks {
        out.extend_from_slice(&block.channels.to_le_bytes());
    }
    for block in blocks {
        out.extend_from_slice(&block.block_size.to_le_bytes());
    }
    for block in blocks {
        for sample in block.samples {
            out.extend_from_slice(&sample.to_le_bytes());
        }
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
