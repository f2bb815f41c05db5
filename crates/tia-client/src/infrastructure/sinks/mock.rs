//! Recording sink for tests.
//!
//! Every block passed to [`SampleSink::write_block`] is copied into a
//! `Mutex<Vec<...>>`, and every reported error is stored as its display
//! text, so assertions can inspect exactly what the reader delivered and in
//! what order.
//!
//! # `should_fail` flag
//!
//! Set `should_fail = true` to make `write_block` reject every block.  This
//! drives the reader's sink-failure path without a real downstream buffer.

use std::sync::Mutex;

use crate::application::acquire::{ErrorSink, SampleSink, SinkError};
use crate::infrastructure::network::data_reader::ReaderError;

/// A sink that records all calls.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub blocks: Mutex<Vec<Vec<f32>>>,
    pub errors: Mutex<Vec<String>>,
    /// When `true`, `write_block` returns [`SinkError`] without recording.
    pub should_fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    /// Copies of every recorded block, in delivery order.
    pub fn blocks(&self) -> Vec<Vec<f32>> {
        self.blocks.lock().map(|b| b.clone()).unwrap_or_default()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().map(|e| e.len()).unwrap_or_default()
    }
}

impl SampleSink for RecordingSink {
    fn write_block(&self, samples: &[f32]) -> Result<(), SinkError> {
        if self.should_fail {
            return Err(SinkError("mock failure".into()));
        }
        self.blocks
            .lock()
            .map_err(|_| SinkError("poisoned".into()))?
            .push(samples.to_vec());
        Ok(())
    }
}

impl ErrorSink for RecordingSink {
    fn report(&self, error: &ReaderError) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(error.to_string());
        }
    }
}
