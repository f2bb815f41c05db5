//! The compiled-in TiA signal type table.
//!
//! Masks are the bit values carried in the `type_flags` field of every data
//! packet.  Bits 13–15 and 22–31 are reserved by the protocol and have no
//! entry here.

use super::SignalTypeDescriptor;

/// Number of signal types known to this client.
pub const SIGNAL_TYPE_COUNT: usize = 19;

const fn periodic(name: &'static str, mask: u32, unit: Option<&'static str>) -> SignalTypeDescriptor {
    SignalTypeDescriptor {
        name,
        mask,
        aperiodic: false,
        is_int: false,
        unit,
        transducer: None,
        prefiltering: None,
    }
}

pub(super) const CATALOG_TABLE: [SignalTypeDescriptor; SIGNAL_TYPE_COUNT] = [
    periodic("eeg", 0x0000_0001, Some("uV")),
    periodic("emg", 0x0000_0002, Some("uV")),
    periodic("eog", 0x0000_0004, Some("uV")),
    periodic("ecg", 0x0000_0008, None),
    periodic("hr", 0x0000_0010, None),
    periodic("bp", 0x0000_0020, None),
    SignalTypeDescriptor {
        name: "button",
        mask: 0x0000_0040,
        aperiodic: true,
        is_int: true,
        unit: Some("Boolean"),
        transducer: None,
        prefiltering: Some("No filtering"),
    },
    SignalTypeDescriptor {
        name: "joystick",
        mask: 0x0000_0080,
        aperiodic: true,
        is_int: false,
        unit: None,
        transducer: None,
        prefiltering: Some("No filtering"),
    },
    periodic("sensors", 0x0000_0100, None),
    periodic("nirs", 0x0000_0200, None),
    periodic("fmri", 0x0000_0400, None),
    SignalTypeDescriptor {
        name: "mouse",
        mask: 0x0000_0800,
        aperiodic: true,
        is_int: false,
        unit: None,
        transducer: None,
        prefiltering: Some("No filtering"),
    },
    SignalTypeDescriptor {
        name: "mouse-button",
        mask: 0x0000_1000,
        aperiodic: true,
        is_int: false,
        unit: Some("Boolean"),
        transducer: None,
        prefiltering: Some("No filtering"),
    },
    periodic("user1", 0x0001_0000, None),
    periodic("user2", 0x0002_0000, None),
    periodic("user3", 0x0004_0000, None),
    periodic("user4", 0x0008_0000, None),
    periodic("undefined", 0x0010_0000, None),
    SignalTypeDescriptor {
        name: "event",
        mask: 0x0020_0000,
        aperiodic: false,
        is_int: false,
        unit: Some("Boolean"),
        transducer: Some("Triggers and Status"),
        prefiltering: Some("No filtering"),
    },
];
