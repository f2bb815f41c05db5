//! tia-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does tia-client do? (for beginners)
//!
//! A TiA server sits next to an amplifier and streams its samples over the
//! network.  This crate is the receiving end:
//!
//! 1. Connects to the server's control port and checks the protocol version.
//! 2. Fetches the metadata document and builds the session's channel layout.
//! 3. Asks for a data port, connects to it, and spawns a reader task that
//!    decodes every packet into rows of the layout.
//! 4. Forwards each decoded block to a [`SampleSink`].  Any fatal reader
//!    error goes to an [`ErrorSink`] exactly once.
//! 5. Sends start/stop commands on request and tears everything down in
//!    order on close.
//!
//! [`SampleSink`]: application::acquire::SampleSink
//! [`ErrorSink`]: application::acquire::ErrorSink

/// Application layer: the acquisition session use case and its sink ports.
pub mod application;

/// Infrastructure layer: sockets, the reader task, sink adapters, config.
pub mod infrastructure;
