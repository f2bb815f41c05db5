//! Counting sink used by the command-line client.
//!
//! Discards samples after counting them, logging a progress line every
//! `log_every` blocks.  The reader's terminal error is logged and kept so the
//! binary can exit non-zero.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::{error, info};

use crate::application::acquire::{ErrorSink, SampleSink, SinkError};
use crate::infrastructure::network::data_reader::ReaderError;

#[derive(Debug)]
pub struct StatsSink {
    log_every: u64,
    blocks: AtomicU64,
    samples: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl StatsSink {
    pub fn new(log_every: u64) -> Self {
        Self {
            log_every: log_every.max(1),
            blocks: AtomicU64::new(0),
            samples: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn blocks(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }
}

impl SampleSink for StatsSink {
    fn write_block(&self, samples: &[f32]) -> Result<(), SinkError> {
        let count = samples.len() as u64;
        let total = self.samples.fetch_add(count, Ordering::Relaxed) + count;
        let blocks = self.blocks.fetch_add(1, Ordering::Relaxed) + 1;
        if blocks % self.log_every == 0 {
            info!("{blocks} blocks, {total} samples received");
        }
        Ok(())
    }
}

impl ErrorSink for StatsSink {
    fn report(&self, e: &ReaderError) {
        error!("acquisition stopped: {e}");
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(e.to_string());
        }
    }
}
