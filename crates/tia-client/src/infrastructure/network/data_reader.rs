//! Data-channel reader task.
//!
//! One tokio task per session owns the data connection and both scratch
//! buffers.  Each loop iteration:
//!
//! 1. reads the 33-byte packet header;
//! 2. grows the packet buffer if the payload is larger than any seen so far
//!    (a refused allocation is a [`PacketError::BufferGrowth`]);
//! 3. reads the payload;
//! 4. decodes the type flags against the session's offset table;
//! 5. unpacks the payload into sample rows;
//! 6. hands the rows to the [`SampleSink`].
//!
//! Steps 1 and 3 race the session's [`CancellationToken`], so a silent server
//! never blocks teardown.  Any failure ends the task after exactly one call to
//! [`ErrorSink::report`]; cancellation ends it silently.  The scratch buffers
//! are locals of the task body and are freed on every exit path.

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tia_core::domain::channel_map::ChannelLayout;
use tia_core::protocol::packet::{
    decode_type_flags, grow_buffer, unpack, PacketError, PacketHeader, HEADER_SIZE,
};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::acquire::{ErrorSink, SampleSink, SinkError};

/// Errors that end the reader task.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("data channel I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("bad data packet: {0}")]
    Packet(#[from] PacketError),

    #[error("{0}")]
    Sink(#[from] SinkError),
}

/// Why the reader task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    Cancelled,
    /// An error was reported to the error sink.
    Failed,
}

/// What the reader task did before it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderSummary {
    pub exit: ReaderExit,
    pub packets: u64,
    pub blocks: u64,
}

/// Handle to a running reader task.
#[derive(Debug)]
pub struct DataReader {
    cancel: CancellationToken,
    handle: JoinHandle<ReaderSummary>,
}

impl DataReader {
    /// Spawns the reader task on the current runtime.
    ///
    /// `cancel` is usually a child of the session token, so cancelling the
    /// session also stops the reader.
    pub fn spawn<R>(
        stream: R,
        layout: Arc<ChannelLayout>,
        samples: Arc<dyn SampleSink>,
        errors: Arc<dyn ErrorSink>,
        cancel: CancellationToken,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut packets = 0;
            let mut blocks = 0;
            let result = tokio::select! {
                _ = task_cancel.cancelled() => Ok(()),
                result = read_loop(stream, &layout, samples.as_ref(), &mut packets, &mut blocks) => result,
            };
            let exit = match result {
                Ok(()) => {
                    debug!("data reader cancelled after {packets} packets");
                    ReaderExit::Cancelled
                }
                Err(e) => {
                    warn!("data reader stopped after {packets} packets: {e}");
                    errors.report(&e);
                    ReaderExit::Failed
                }
            };
            ReaderSummary {
                exit,
                packets,
                blocks,
            }
        });
        Self { cancel, handle }
    }

    /// Whether the task has stopped on its own or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Requests cancellation and waits for the task to exit.
    ///
    /// # Errors
    ///
    /// Returns the [`tokio::task::JoinError`] if the task panicked.
    pub async fn shutdown(self) -> Result<ReaderSummary, tokio::task::JoinError> {
        self.cancel.cancel();
        let summary = self.handle.await?;
        info!(
            "data reader joined: {:?}, {} packets, {} blocks",
            summary.exit, summary.packets, summary.blocks
        );
        Ok(summary)
    }
}

/// Packet and sample buffers owned by one reader task.
struct ScratchBuffers {
    packet: Vec<u8>,
    samples: Vec<f32>,
}

impl ScratchBuffers {
    fn for_layout(layout: &ChannelLayout) -> Self {
        Self {
            packet: vec![0; layout.initial_packet_capacity()],
            samples: vec![0.0; layout.initial_block_capacity()],
        }
    }

    fn payload_mut(&mut self, len: usize) -> Result<&mut [u8], PacketError> {
        if self.packet.len() < len {
            debug!("growing packet buffer {} → {len} bytes", self.packet.len());
            grow_buffer(&mut self.packet, len)?;
        }
        Ok(&mut self.packet[..len])
    }
}

/// Runs until the stream fails, a packet is bad, or the sink rejects a block.
///
/// Only returns `Ok` through cancellation in the caller's `select!`.
async fn read_loop<R>(
    mut stream: R,
    layout: &ChannelLayout,
    sink: &dyn SampleSink,
    packets: &mut u64,
    blocks: &mut u64,
) -> Result<(), ReaderError>
where
    R: AsyncRead + Unpin,
{
    let mut buffers = ScratchBuffers::for_layout(layout);
    let stride = layout.record_stride();
    let mut header_bytes = [0u8; HEADER_SIZE];

    loop {
        stream.read_exact(&mut header_bytes).await?;
        let header = PacketHeader::decode(&header_bytes)?;
        let payload_len = header.payload_len()?;

        let payload = buffers.payload_mut(payload_len)?;
        stream.read_exact(payload).await?;
        *packets += 1;

        let slots = decode_type_flags(header.type_flags, layout.offsets());
        let rows = unpack(&buffers.packet[..payload_len], &slots, stride, &mut buffers.samples)?;
        if rows == 0 {
            continue;
        }

        sink.write_block(&buffers.samples[..rows * stride])?;
        *blocks += 1;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::acquire::{MockErrorSink, MockSampleSink};
    use crate::infrastructure::sinks::mock::RecordingSink;
    use tia_core::domain::metadata::parse_metadata;
    use tia_core::protocol::packet::{encode_packet, SignalBlock};
    use tokio::io::AsyncWriteExt;

    fn layout() -> Arc<ChannelLayout> {
        let xml = r#"<tiaMetaInfo>
          <masterSignal samplingRate="100" blockSize="2"/>
          <signal type="eeg" samplingRate="100" blockSize="2" numChannels="2"/>
        </tiaMetaInfo>"#;
        Arc::new(parse_metadata(xml.as_bytes()).unwrap())
    }

    fn eeg_packet(samples: &[f32], block_size: u16) -> Vec<u8> {
        encode_packet(
            PacketHeader {
                version: 1,
                type_flags: 0x1,
                ..Default::default()
            },
            &[SignalBlock { channels: 2, block_size, samples }],
        )
    }

    #[tokio::test]
    async fn test_blocks_reach_sink_in_wire_order() {
        // Arrange
        let (mut server, client) = tokio::io::duplex(4096);
        let sink = Arc::new(RecordingSink::new());
        let reader = DataReader::spawn(
            client,
            layout(),
            sink.clone(),
            sink.clone(),
            CancellationToken::new(),
        );

        // Act
        server.write_all(&eeg_packet(&[1.0, 2.0, 3.0, 4.0], 2)).await.unwrap();
        server.write_all(&eeg_packet(&[5.0, 6.0, 7.0, 8.0], 2)).await.unwrap();
        drop(server);
        while !reader.is_finished() {
            tokio::task::yield_now().await;
        }
        let summary = reader.shutdown().await.unwrap();

        // Assert: EOF after two packets is reported once
        assert_eq!(
            sink.blocks(),
            vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]
        );
        assert_eq!(summary.packets, 2);
        assert_eq!(summary.blocks, 2);
        assert_eq!(summary.exit, ReaderExit::Failed);
        assert_eq!(sink.error_count(), 1);
    }

    #[tokio::test]
    async fn test_packet_larger_than_announced_is_delivered_whole() {
        let (mut server, client) = tokio::io::duplex(4096);
        let sink = Arc::new(RecordingSink::new());
        let reader = DataReader::spawn(client, layout(), sink.clone(), sink.clone(), CancellationToken::new());
        let samples: Vec<f32> = (0..32).map(|v| v as f32).collect();

        server.write_all(&eeg_packet(&samples, 16)).await.unwrap();
        drop(server);
        while !reader.is_finished() {
            tokio::task::yield_now().await;
        }
        reader.shutdown().await.unwrap();

        assert_eq!(sink.blocks(), vec![samples]);
    }

    #[tokio::test]
    async fn test_cancel_while_blocked_delivers_nothing_and_releases_buffers() {
        // Arrange: keep the server half open but silent
        let (_server, client) = tokio::io::duplex(64);
        let sink = Arc::new(RecordingSink::new());
        let cancel = CancellationToken::new();
        let reader = DataReader::spawn(client, layout(), sink.clone(), sink.clone(), cancel.clone());
        tokio::task::yield_now().await;

        // Act
        let summary = reader.shutdown().await.unwrap();

        // Assert
        assert_eq!(summary.exit, ReaderExit::Cancelled);
        assert_eq!(summary.packets, 0);
        assert!(sink.blocks().is_empty());
        assert_eq!(sink.error_count(), 0);
        // The task and everything it owned are gone.
        assert_eq!(Arc::strong_count(&sink), 1);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_mid_payload_delivers_nothing() {
        let (mut server, client) = tokio::io::duplex(4096);
        let sink = Arc::new(RecordingSink::new());
        let reader = DataReader::spawn(client, layout(), sink.clone(), sink.clone(), CancellationToken::new());
        let packet = eeg_packet(&[1.0, 2.0, 3.0, 4.0], 2);

        server.write_all(&packet[..HEADER_SIZE + 3]).await.unwrap();
        tokio::task::yield_now().await;
        let summary = reader.shutdown().await.unwrap();

        assert_eq!(summary.exit, ReaderExit::Cancelled);
        assert!(sink.blocks().is_empty());
    }

    #[tokio::test]
    async fn test_sink_failure_is_reported_once() {
        // Arrange
        let (mut server, client) = tokio::io::duplex(4096);
        let mut samples = MockSampleSink::new();
        samples
            .expect_write_block()
            .times(1)
            .returning(|_| Err(SinkError("buffer full".into())));
        let mut errors = MockErrorSink::new();
        errors
            .expect_report()
            .withf(|e| matches!(e, ReaderError::Sink(_)))
            .times(1)
            .return_const(());
        let reader = DataReader::spawn(
            client,
            layout(),
            Arc::new(samples),
            Arc::new(errors),
            CancellationToken::new(),
        );

        // Act: second packet must never be read
        server.write_all(&eeg_packet(&[1.0, 2.0, 3.0, 4.0], 2)).await.unwrap();
        server.write_all(&eeg_packet(&[1.0, 2.0, 3.0, 4.0], 2)).await.unwrap();
        while !reader.is_finished() {
            tokio::task::yield_now().await;
        }
        let summary = reader.shutdown().await.unwrap();

        // Assert (mock expectations are checked on drop)
        assert_eq!(summary.exit, ReaderExit::Failed);
        assert_eq!(summary.blocks, 0);
    }

    #[tokio::test]
    async fn test_size_below_header_is_packet_error() {
        let (mut server, client) = tokio::io::duplex(4096);
        let mut samples = MockSampleSink::new();
        samples.expect_write_block().never();
        let mut errors = MockErrorSink::new();
        errors
            .expect_report()
            .withf(|e| matches!(e, ReaderError::Packet(PacketError::SizeBelowHeader(8))))
            .times(1)
            .return_const(());
        let reader = DataReader::spawn(
            client,
            layout(),
            Arc::new(samples),
            Arc::new(errors),
            CancellationToken::new(),
        );
        let header = PacketHeader {
            size: 8,
            ..Default::default()
        };

        server.write_all(&header.encode()).await.unwrap();
        while !reader.is_finished() {
            tokio::task::yield_now().await;
        }

        assert_eq!(reader.shutdown().await.unwrap().exit, ReaderExit::Failed);
    }

    #[test]
    fn test_refused_packet_buffer_growth_is_packet_error() {
        // Arrange
        let mut buffers = ScratchBuffers::for_layout(&layout());
        let before = buffers.packet.len();

        // Act
        let result = buffers.payload_mut(usize::MAX).map(|p| p.len());

        // Assert
        assert_eq!(result, Err(PacketError::BufferGrowth { requested: usize::MAX }));
        assert_eq!(buffers.packet.len(), before);
    }

    #[tokio::test]
    async fn test_reserved_sub_block_does_not_stop_reader() {
        // Arrange: eeg 2ch x 2 plus a reserved bit-31 block of a different size
        let (mut server, client) = tokio::io::duplex(4096);
        let sink = Arc::new(RecordingSink::new());
        let reader = DataReader::spawn(client, layout(), sink.clone(), sink.clone(), CancellationToken::new());
        let packet = encode_packet(
            PacketHeader {
                type_flags: 0x1 | (1 << 31),
                ..Default::default()
            },
            &[
                SignalBlock { channels: 2, block_size: 2, samples: &[1.0, 2.0, 3.0, 4.0] },
                SignalBlock { channels: 1, block_size: 3, samples: &[9.0, 9.0, 9.0] },
            ],
        );

        // Act
        server.write_all(&packet).await.unwrap();
        while sink.blocks().is_empty() && !reader.is_finished() {
            tokio::task::yield_now().await;
        }
        let summary = reader.shutdown().await.unwrap();

        // Assert
        assert_eq!(sink.blocks(), vec![vec![1.0, 2.0, 3.0, 4.0]]);
        assert_eq!(summary.exit, ReaderExit::Cancelled);
        assert_eq!(sink.error_count(), 0);
    }
}
