//! Infrastructure adapters for the client.

/// Address resolution, the control channel and the data-channel reader.
pub mod network;

/// Sample/error sink implementations.
pub mod sinks;

/// Configuration persistence.
pub mod storage;
