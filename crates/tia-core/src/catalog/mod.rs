//! Signal type catalog.
//!
//! Every TiA signal belongs to one of a fixed set of signal types ("eeg",
//! "emg", "event", ...).  Each type owns exactly one bit of the 32-bit
//! `type_flags` field in data packets, and carries a few static properties
//! (unit, transducer, prefiltering) that are reported with every channel of
//! that type.
//!
//! The catalog is a read-only table.  Two lookups are provided:
//!
//! - by type name, used while parsing the XML metadata document;
//! - by bit position, used for every data packet.  This one is a dense
//!   32-entry array computed at compile time, so decoding a packet never
//!   scans the table.
//!
//! Table entries are stored in ascending mask order, so iterating catalog
//! indices from 0 upward visits signal types in wire order.

mod table;

pub use table::SIGNAL_TYPE_COUNT;

use table::CATALOG_TABLE;

/// Static properties of one TiA signal type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalTypeDescriptor {
    /// Type name as written in the `type` attribute of `<signal>`.
    pub name: &'static str,
    /// Single-bit mask identifying the type in packet `type_flags`.
    pub mask: u32,
    /// Whether samples arrive only on change (buttons, mouse, ...).
    pub aperiodic: bool,
    /// Whether sample values are integral.
    pub is_int: bool,
    pub unit: Option<&'static str>,
    pub transducer: Option<&'static str>,
    pub prefiltering: Option<&'static str>,
}

/// The signal type catalog, indexed by [`SignalTypeId`].
pub static SIGNAL_TYPES: [SignalTypeDescriptor; SIGNAL_TYPE_COUNT] = CATALOG_TABLE;

/// Maps a bit position (0..32) to a catalog index.
const BIT_LOOKUP: [Option<u8>; 32] = build_bit_lookup();

const fn build_bit_lookup() -> [Option<u8>; 32] {
    let mut lookup = [None; 32];
    let mut i = 0;
    while i < SIGNAL_TYPE_COUNT {
        let bit = CATALOG_TABLE[i].mask.trailing_zeros() as usize;
        lookup[bit] = Some(i as u8);
        i += 1;
    }
    lookup
}

/// Index of a signal type within [`SIGNAL_TYPES`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SignalTypeId(u8);

impl SignalTypeId {
    /// Looks up a signal type by its name (case-sensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        SIGNAL_TYPES
            .iter()
            .position(|d| d.name == name)
            .map(|i| Self(i as u8))
    }

    /// Looks up the signal type owning bit `bit` of the `type_flags` field.
    ///
    /// Returns `None` for reserved bits and for `bit >= 32`.
    pub fn from_bit(bit: u32) -> Option<Self> {
        BIT_LOOKUP.get(bit as usize).copied().flatten().map(Self)
    }

    /// Iterates over every catalog entry in ascending mask order.
    pub fn all() -> impl Iterator<Item = SignalTypeId> {
        (0..SIGNAL_TYPE_COUNT as u8).map(Self)
    }

    /// Position of this type in [`SIGNAL_TYPES`].
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn descriptor(self) -> &'static SignalTypeDescriptor {
        &SIGNAL_TYPES[self.index()]
    }

    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    pub fn mask(self) -> u32 {
        self.descriptor().mask
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
