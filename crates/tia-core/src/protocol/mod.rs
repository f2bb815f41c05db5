//! TiA wire protocol: control-channel framing, endpoint strings, and the
//! binary data-packet codec.

pub mod control;
pub mod endpoint;
pub mod packet;

pub use control::{Command, ControlState, ProtocolError, Response, ResponseHead};
pub use endpoint::{Endpoint, EndpointError, DEFAULT_HOST, DEFAULT_PORT};
pub use packet::{decode_type_flags, grow_buffer, unpack, PacketError, PacketHeader, SlotTarget, HEADER_SIZE};
