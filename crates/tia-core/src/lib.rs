//! # tia-core
//!
//! Shared library for the TiA (TOBI interface A) acquisition client: the
//! signal type catalog, the metadata parser that turns a server's XML signal
//! declaration into a fixed channel layout, control-channel framing, and the
//! binary data-packet codec.
//!
//! This crate performs no I/O.  Sockets, tasks, and configuration live in
//! `tia-client`.
//!
//! # Architecture overview (for beginners)
//!
//! A TiA server streams biosignals (EEG, EMG, triggers, ...) to clients over
//! two TCP connections:
//!
//! - a **control** connection carrying short text requests and responses
//!   (`CheckProtocolVersion`, `GetMetaInfo`, `StartDataTransmission`, ...);
//! - a **data** connection carrying binary packets, each tagged with a
//!   bitmask saying which signal types it contains.
//!
//! The modules mirror that split:
//!
//! - **`catalog`** – The fixed table of signal types and the bit each one
//!   owns in a packet's bitmask.
//!
//! - **`domain`** – The channel layout.  Built once from the metadata
//!   document, it says which column of a sample row each channel lands in.
//!
//! - **`protocol`** – Request encoding, response validation and the
//!   handshake state machine for the control connection; header decoding,
//!   bitmask decoding and sample unpacking for the data connection.

pub mod catalog;
pub mod domain;
pub mod protocol;

pub use catalog::{SignalTypeDescriptor, SignalTypeId, SIGNAL_TYPES, SIGNAL_TYPE_COUNT};
pub use domain::channel_map::{
    ChannelInfo, ChannelLayout, ChannelMapEntry, DomainCategory, OffsetTable, SampleRange,
    SampleType,
};
pub use domain::metadata::{parse_metadata, MetadataError, MetadataParser};
pub use protocol::control::{Answer, Command, ControlState, ProtocolError, Response, ResponseHead};
pub use protocol::endpoint::{Endpoint, EndpointError};
pub use protocol::packet::{
    decode_type_flags, encode_packet, grow_buffer, unpack, PacketError, PacketHeader, SignalBlock,
    SlotTarget,
};
