//! AcquisitionSession: opens a TiA session, runs the reader, tears it down.
//!
//! The session owns the control connection and the data-reader task.  Decoded
//! blocks and reader failures leave through two ports defined here,
//! [`SampleSink`] and [`ErrorSink`], implemented in the infrastructure layer.
//!
//! # Lifecycle
//!
//! ```text
//! open()   connect control → CheckProtocolVersion → GetMetaInfo
//!          → GetDataConnection → connect data → spawn reader
//! start()  StartDataTransmission      (repeatable with stop())
//! stop()   StopDataTransmission
//! close()  cancel reader → join reader → close control
//! ```
//!
//! Dropping a session without calling [`AcquisitionSession::close`] still
//! cancels the reader task.

use std::sync::Arc;

use thiserror::Error;
use tia_core::domain::channel_map::{ChannelInfo, ChannelLayout, DomainCategory};
use tia_core::protocol::control::ControlState;
use tokio::net::TcpStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{info, warn};

use crate::infrastructure::network::control::{ControlChannel, ControlError};
use crate::infrastructure::network::data_reader::{DataReader, ReaderError, ReaderSummary};
use crate::infrastructure::network::{connect, connect_str, ConnectionError};

/// Device type reported in [`DeviceCapabilities`].
pub const DEVICE_TYPE: &str = "TOBI interface A";

/// A sample sink refused a block.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("sample sink rejected block: {0}")]
pub struct SinkError(pub String);

/// Receives decoded sample blocks, one call per packet, in wire order.
///
/// `samples` holds whole rows of [`ChannelLayout::record_stride`] values;
/// its byte length is `samples.len() * 4`.
#[cfg_attr(test, mockall::automock)]
pub trait SampleSink: Send + Sync {
    fn write_block(&self, samples: &[f32]) -> Result<(), SinkError>;
}

/// Receives the single error that ends a reader task.
#[cfg_attr(test, mockall::automock)]
pub trait ErrorSink: Send + Sync {
    fn report(&self, error: &ReaderError);
}

/// Top-level session failure.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Control(#[from] ControlError),

    /// The reader task panicked.
    #[error("data reader task failed: {0}")]
    Reader(#[from] tokio::task::JoinError),
}

/// Static description of an open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub device_type: &'static str,
    /// The endpoint string the session was opened with.
    pub device_id: String,
    pub sampling_rate: u32,
    pub channel_count: usize,
    pub block_size: u32,
    pub signal_count: usize,
    pub eeg_channels: usize,
    pub trigger_channels: usize,
    pub sensor_channels: usize,
}

/// One open TiA session.
pub struct AcquisitionSession {
    device_id: String,
    control: ControlChannel<TcpStream>,
    layout: Arc<ChannelLayout>,
    reader: DataReader,
    /// Cancels the reader if the session is dropped without `close`.
    _cancel_on_drop: DropGuard,
}

impl AcquisitionSession {
    /// Connects to `endpoint` and runs the handshake up to a live reader.
    ///
    /// Blocks go to `samples` once [`start`](Self::start) is called and the
    /// server begins sending.
    ///
    /// # Errors
    ///
    /// [`SessionError::Connection`] if either connection fails,
    /// [`SessionError::Control`] if any handshake step fails.  Nothing is left
    /// running on error.
    pub async fn open(
        endpoint: &str,
        default_port: u16,
        samples: Arc<dyn SampleSink>,
        errors: Arc<dyn ErrorSink>,
    ) -> Result<Self, SessionError> {
        let (control_endpoint, stream) = connect_str(endpoint, default_port).await?;
        info!("control connection to {control_endpoint} established");

        let mut control = ControlChannel::new(stream);
        control.check_version().await?;
        let layout = Arc::new(control.fetch_metadata().await?);
        info!(
            "metadata: {} signals, {} channels, {} Hz, block size {}",
            layout.signal_count(),
            layout.channel_count(),
            layout.sampling_rate(),
            layout.block_size()
        );

        let data_port = control.negotiate_data().await?;
        let data_endpoint = control_endpoint.with_port(data_port);
        let data_stream = connect(&data_endpoint).await?;
        info!("data connection to {data_endpoint} established");

        let cancel = CancellationToken::new();
        let reader = DataReader::spawn(
            data_stream,
            Arc::clone(&layout),
            samples,
            errors,
            cancel.child_token(),
        );

        Ok(Self {
            device_id: endpoint.to_string(),
            control,
            layout,
            reader,
            _cancel_on_drop: cancel.drop_guard(),
        })
    }

    pub fn layout(&self) -> &ChannelLayout {
        &self.layout
    }

    pub fn control_state(&self) -> ControlState {
        self.control.state()
    }

    /// Whether the reader task is still running.
    pub fn is_reading(&self) -> bool {
        !self.reader.is_finished()
    }

    pub fn capabilities(&self) -> DeviceCapabilities {
        let layout = &self.layout;
        DeviceCapabilities {
            device_type: DEVICE_TYPE,
            device_id: self.device_id.clone(),
            sampling_rate: layout.sampling_rate(),
            channel_count: layout.channel_count(),
            block_size: layout.block_size(),
            signal_count: layout.signal_count(),
            eeg_channels: layout.category_count(DomainCategory::Eeg),
            trigger_channels: layout.category_count(DomainCategory::Trigger),
            sensor_channels: layout.category_count(DomainCategory::Sensor),
        }
    }

    /// Describes the `n`-th channel of `category`.
    pub fn channel_info(&self, category: DomainCategory, n: usize) -> Option<ChannelInfo<'_>> {
        self.layout.channel_info(category, n)
    }

    /// Sends `StartDataTransmission`.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        self.control.start().await?;
        info!("data transmission started");
        Ok(())
    }

    /// Sends `StopDataTransmission`.
    pub async fn stop(&mut self) -> Result<(), SessionError> {
        self.control.stop().await?;
        info!("data transmission stopped");
        Ok(())
    }

    /// Asks the server for its state-connection port.
    pub async fn state_connection_port(&mut self) -> Result<u16, SessionError> {
        Ok(self.control.negotiate_state().await?)
    }

    /// Cancels the reader, waits for it, then closes the control connection.
    ///
    /// # Errors
    ///
    /// [`SessionError::Reader`] if the reader task panicked.  A failure to
    /// shut down the control socket is only logged.
    pub async fn close(self) -> Result<ReaderSummary, SessionError> {
        let Self {
            device_id,
            mut control,
            reader,
            ..
        } = self;
        let summary = reader.shutdown().await?;
        if let Err(e) = control.close().await {
            warn!("closing control connection: {e}");
        }
        info!("session {device_id} closed");
        Ok(summary)
    }
}
