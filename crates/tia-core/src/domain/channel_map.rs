//! Channel map, offset table, and the finalized channel layout.
//!
//! A [`ChannelLayout`] is the product of one successful metadata exchange.  It
//! fixes, for the lifetime of a session:
//!
//! - the canonical channel order (ascending signal-type mask, declaration
//!   order within a type);
//! - for every subscribed signal type, the column at which its channels start
//!   inside one sample row (the [`OffsetTable`]);
//! - the row width, or *record stride*, which is the total channel count.
//!
//! ```text
//! declared:  <signal type="emg" numChannels="1"/> <signal type="eeg" numChannels="2"/>
//! canonical: [eeg:1, eeg:2, emg:1]
//! offsets:   eeg → 0, emg → 2, every other type → absent
//! row:       | eeg:1 | eeg:2 | emg:1 |   (stride 3)
//! ```
//!
//! The layout is immutable once built; the data-channel worker reads it
//! through an `Arc` without locking.

use crate::catalog::{SignalTypeDescriptor, SignalTypeId, SIGNAL_TYPE_COUNT};

/// Text reported for unit/transducer/prefiltering when a type has none.
pub const UNKNOWN_FIELD: &str = "Unknown";

/// Semantic domain of a channel, as seen by acquisition consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainCategory {
    /// Electroencephalography channels (`eeg`).
    Eeg,
    /// Event / trigger channels (`event`).
    Trigger,
    /// Everything else.
    Sensor,
}

impl DomainCategory {
    /// Every category, in reporting order.
    pub const ALL: [DomainCategory; 3] = [Self::Eeg, Self::Trigger, Self::Sensor];

    /// Classifies a literal signal type name.
    pub fn for_type_name(name: &str) -> Self {
        match name {
            "eeg" => Self::Eeg,
            "event" => Self::Trigger,
            _ => Self::Sensor,
        }
    }
}

/// Numeric representation of samples as delivered on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    Float32,
}

impl SampleType {
    pub fn size_bytes(self) -> usize {
        match self {
            SampleType::Float32 => 4,
        }
    }
}

/// One physical channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMapEntry {
    pub category: DomainCategory,
    pub sample_type: SampleType,
    /// `None` only while the enclosing `<signal>` block is still open.
    pub label: Option<String>,
    pub signal_type: SignalTypeId,
}

impl ChannelMapEntry {
    pub(crate) fn unlabeled(category: DomainCategory, signal_type: SignalTypeId) -> Self {
        Self {
            category,
            sample_type: SampleType::Float32,
            label: None,
            signal_type,
        }
    }

    pub fn descriptor(&self) -> &'static SignalTypeDescriptor {
        self.signal_type.descriptor()
    }

    /// The channel label, or an empty string if none was assigned.
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("")
    }
}

// ── Offset table ──────────────────────────────────────────────────────────────

/// Per-signal-type start column within a sample row.
///
/// While metadata is being parsed each slot holds the running channel count
/// of its type; [`OffsetTable::finalize`] turns the counts into prefix-sum
/// start offsets.  A slot is `None` ("absent") when the type is not part of
/// the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OffsetTable {
    slots: [Option<usize>; SIGNAL_TYPE_COUNT],
}

impl OffsetTable {
    /// Creates a table with every slot absent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the start column of `id`, or `None` if the type is absent.
    pub fn get(&self, id: SignalTypeId) -> Option<usize> {
        self.slots[id.index()]
    }

    /// Overwrites one slot.
    pub fn set(&mut self, id: SignalTypeId, offset: Option<usize>) {
        self.slots[id.index()] = offset;
    }

    /// Marks every slot absent.
    pub fn clear(&mut self) {
        self.slots = [None; SIGNAL_TYPE_COUNT];
    }

    /// Adds `count` channels to the running count of `id`.
    pub(crate) fn add_channels(&mut self, id: SignalTypeId, count: usize) {
        let slot = &mut self.slots[id.index()];
        *slot = Some(slot.unwrap_or(0) + count);
    }

    /// Converts running counts to start offsets in ascending-mask order and
    /// returns the total channel count.  Types with zero channels end up
    /// absent.
    pub(crate) fn finalize(&mut self) -> usize {
        let mut next = 0;
        for id in SignalTypeId::all() {
            let slot = &mut self.slots[id.index()];
            match *slot {
                Some(count) if count > 0 => {
                    *slot = Some(next);
                    next += count;
                }
                _ => *slot = None,
            }
        }
        next
    }

    /// Iterates over the present slots as `(type, offset)` pairs.
    pub fn present(&self) -> impl Iterator<Item = (SignalTypeId, usize)> + '_ {
        SignalTypeId::all().filter_map(|id| self.get(id).map(|off| (id, off)))
    }
}

// ── Channel info ──────────────────────────────────────────────────────────────

/// Value range reported for a channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleRange {
    Double { min: f64, max: f64 },
    Int32 { min: i32, max: i32 },
}

impl SampleRange {
    const DOUBLE: SampleRange = SampleRange::Double {
        min: -262_144.0,
        max: 262_143.968_75,
    };
    const INT32: SampleRange = SampleRange::Int32 {
        min: -8_388_608,
        max: 8_388_607,
    };
}

/// Descriptive metadata for a single channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelInfo<'a> {
    pub label: &'a str,
    pub is_int: bool,
    pub unit: &'static str,
    pub transducer: &'static str,
    pub prefiltering: &'static str,
    /// Scaling range guessed from whether the type is integer-valued.
    pub range: SampleRange,
}

// ── Finalized layout ──────────────────────────────────────────────────────────

/// The canonical channel map and offset table of one session.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelLayout {
    channels: Vec<ChannelMapEntry>,
    offsets: OffsetTable,
    sampling_rate: u32,
    block_size: u32,
    signal_count: usize,
}

impl ChannelLayout {
    pub(crate) fn new(
        channels: Vec<ChannelMapEntry>,
        offsets: OffsetTable,
        sampling_rate: u32,
        block_size: u32,
        signal_count: usize,
    ) -> Self {
        Self {
            channels,
            offsets,
            sampling_rate,
            block_size,
            signal_count,
        }
    }

    pub fn channels(&self) -> &[ChannelMapEntry] {
        &self.channels
    }

    pub fn offsets(&self) -> &OffsetTable {
        &self.offsets
    }

    /// Total channel count across all signals.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Width of one sample row, in samples.
    pub fn record_stride(&self) -> usize {
        self.channels.len()
    }

    /// Width of one sample row, in bytes.
    pub fn sample_row_bytes(&self) -> usize {
        self.record_stride() * SampleType::Float32.size_bytes()
    }

    /// Master sampling frequency in Hz.
    pub fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    /// Samples per packet per signal.
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Number of `<signal>` blocks declared by the server.
    pub fn signal_count(&self) -> usize {
        self.signal_count
    }

    /// Number of channels in `category`.
    pub fn category_count(&self, category: DomainCategory) -> usize {
        self.channels.iter().filter(|c| c.category == category).count()
    }

    /// Index in [`channels`](Self::channels) of the `n`-th channel of `category`.
    pub fn nth_channel_index(&self, category: DomainCategory, n: usize) -> Option<usize> {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.category == category)
            .nth(n)
            .map(|(i, _)| i)
    }

    /// Describes the `n`-th channel of `category`.
    pub fn channel_info(&self, category: DomainCategory, n: usize) -> Option<ChannelInfo<'_>> {
        let entry = &self.channels[self.nth_channel_index(category, n)?];
        let desc = entry.descriptor();
        Some(ChannelInfo {
            label: entry.label(),
            is_int: desc.is_int,
            unit: desc.unit.unwrap_or(UNKNOWN_FIELD),
            transducer: desc.transducer.unwrap_or(UNKNOWN_FIELD),
            prefiltering: desc.prefiltering.unwrap_or(UNKNOWN_FIELD),
            range: if desc.is_int {
                SampleRange::INT32
            } else {
                SampleRange::DOUBLE
            },
        })
    }

    /// Initial scratch packet buffer size for this layout, in bytes.
    ///
    /// Covers the per-signal count/size prefix plus one full block of every
    /// channel.  Packets that declare more are handled by growing the buffer.
    pub fn initial_packet_capacity(&self) -> usize {
        self.signal_count * 2 * std::mem::size_of::<u16>()
            + self.block_size as usize * self.channel_count() * SampleType::Float32.size_bytes()
    }

    /// Initial sample buffer size for this layout, in samples.
    pub fn initial_block_capacity(&self) -> usize {
        self.block_size as usize * self.record_stride()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
