//! Domain entities for the TiA client.
//!
//! Pure logic with no sockets and no async runtime: the channel map that a
//! metadata document describes, and the parser that builds it.
//!
//! # How a session's layout comes to be (for beginners)
//!
//! A TiA server can stream any mix of signal types: a 32-channel EEG cap, a
//! few EMG electrodes, a trigger line.  Before any data flows, the client asks
//! for a metadata document that lists every signal and its channel count.
//!
//! The client turns that list into a fixed *sample row*: every channel of
//! every signal gets one column, ordered by signal type.  Data packets are
//! later scattered into rows of exactly this shape, so downstream consumers
//! always see the same column for the same physical channel.

/// Canonical channel map, offset table and channel descriptions.
pub mod channel_map;

/// XML metadata document parser.
pub mod metadata;
