//! Sample and error sink implementations.
//!
//! The ports themselves ([`SampleSink`], [`ErrorSink`]) live in the
//! application layer.  This module provides:
//!
//! - [`mock::RecordingSink`]: keeps every block and error in memory, for tests;
//! - [`stats::StatsSink`]: counts blocks and logs throughput, used by the CLI.
//!
//! [`SampleSink`]: crate::application::acquire::SampleSink
//! [`ErrorSink`]: crate::application::acquire::ErrorSink

pub mod mock;
pub mod stats;
