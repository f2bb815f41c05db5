//! Async control channel.
//!
//! Wraps any bidirectional byte stream (a `TcpStream` in production, a
//! scripted mock in tests) and performs one request/response exchange at a
//! time.  Framing and validation come from
//! [`tia_core::protocol::control`]; this type only moves bytes and keeps the
//! handshake state.
//!
//! A failed exchange on the wire (I/O error or malformed response) leaves the
//! stream at an unknown position, so the channel moves to
//! [`ControlState::Closed`] and refuses further commands.  A command rejected
//! for being out of order, or a well-framed metadata payload that fails to
//! parse, leaves the state unchanged.

use std::io;

use thiserror::Error;
use tia_core::domain::channel_map::ChannelLayout;
use tia_core::domain::metadata::{parse_metadata, MetadataError};
use tia_core::protocol::control::{
    Command, ControlState, ProtocolError, Response, ResponseHead, PROTOCOL_VERSION,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

/// Errors raised by a control-channel exchange.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control channel I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// The command is not legal in the current handshake state.
    #[error("{command} is not allowed in state {state}")]
    OutOfOrder {
        command: Command,
        state: ControlState,
    },

    /// A response that must carry a payload had none.
    #[error("response to {0} carried no payload")]
    MissingPayload(Command),

    /// The announced `Content-Length` could not be allocated.
    #[error("could not allocate a {0}-byte response payload")]
    PayloadAllocation(usize),
}

/// One control connection and its handshake state.
#[derive(Debug)]
pub struct ControlChannel<S> {
    stream: BufReader<S>,
    state: ControlState,
    line: String,
}

impl<S> ControlChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            state: ControlState::Idle,
            line: String::new(),
        }
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    /// Sends `command` and reads its full response.
    ///
    /// # Errors
    ///
    /// [`ControlError::OutOfOrder`] without touching the wire if the state
    /// does not permit `command`; otherwise any I/O or framing failure.
    pub async fn perform(&mut self, command: Command) -> Result<Response, ControlError> {
        if !self.state.permits(command) {
            return Err(ControlError::OutOfOrder {
                command,
                state: self.state,
            });
        }

        match self.exchange(command).await {
            Ok(response) => {
                if command != Command::FetchMetadata {
                    self.state = self.state.after(command);
                }
                Ok(response)
            }
            Err(e) => {
                warn!("{command} failed: {e}");
                self.state = ControlState::Closed;
                Err(e)
            }
        }
    }

    async fn exchange(&mut self, command: Command) -> Result<Response, ControlError> {
        debug!("→ {command}");
        self.stream.write_all(command.encode().as_bytes()).await?;
        self.stream.flush().await?;

        let version_line = self.next_line().await?;
        let answer_line = self.next_line().await?;
        let content_line = self.next_line().await?;
        let head = ResponseHead::parse(command, &version_line, &answer_line, &content_line)?;
        let (major, minor) = head.version;
        debug!(
            "← TiA {major}.{minor} {:?} (content length {:?})",
            head.answer, head.content_length
        );
        if major != PROTOCOL_VERSION.0 {
            warn!(
                "server speaks TiA {major}.{minor}, client speaks {}.{}",
                PROTOCOL_VERSION.0, PROTOCOL_VERSION.1
            );
        }

        let payload = match head.content_length {
            Some(length) => {
                // One separator line precedes the payload bytes.
                self.next_line().await?;
                let mut payload = Vec::new();
                payload
                    .try_reserve_exact(length)
                    .map_err(|_| ControlError::PayloadAllocation(length))?;
                payload.resize(length, 0);
                self.stream.read_exact(&mut payload).await.map_err(eof_as_protocol)?;
                Some(payload)
            }
            None => None,
        };

        Ok(Response {
            answer: head.answer,
            payload,
        })
    }

    async fn next_line(&mut self) -> Result<String, ControlError> {
        self.line.clear();
        let read = self.stream.read_line(&mut self.line).await?;
        if read == 0 {
            return Err(ProtocolError::UnexpectedEof.into());
        }
        Ok(std::mem::take(&mut self.line))
    }

    /// `CheckProtocolVersion`.
    pub async fn check_version(&mut self) -> Result<(), ControlError> {
        self.perform(Command::VersionCheck).await.map(drop)
    }

    /// `GetMetaInfo`, parsed into a channel layout.
    ///
    /// The state only advances to [`ControlState::MetadataLoaded`] when the
    /// payload parses.
    pub async fn fetch_metadata(&mut self) -> Result<ChannelLayout, ControlError> {
        let response = self.perform(Command::FetchMetadata).await?;
        let payload = response
            .payload
            .ok_or(ControlError::MissingPayload(Command::FetchMetadata))?;
        let layout = parse_metadata(&payload)?;
        self.state = self.state.after(Command::FetchMetadata);
        Ok(layout)
    }

    /// `GetDataConnection: TCP`, returning the data port.
    pub async fn negotiate_data(&mut self) -> Result<u16, ControlError> {
        self.port_query(Command::NegotiateData).await
    }

    /// `GetServerStateConnection`, returning the state port.
    pub async fn negotiate_state(&mut self) -> Result<u16, ControlError> {
        self.port_query(Command::NegotiateState).await
    }

    pub async fn start(&mut self) -> Result<(), ControlError> {
        self.perform(Command::Start).await.map(drop)
    }

    pub async fn stop(&mut self) -> Result<(), ControlError> {
        self.perform(Command::Stop).await.map(drop)
    }

    async fn port_query(&mut self, command: Command) -> Result<u16, ControlError> {
        let response = self.perform(command).await?;
        // `parse_answer` only yields ports for port commands.
        response.port().ok_or(ControlError::MissingPayload(command))
    }

    /// Shuts down the write side and marks the channel closed.
    pub async fn close(&mut self) -> Result<(), ControlError> {
        self.state = ControlState::Closed;
        self.stream.get_mut().shutdown().await?;
        Ok(())
    }
}

fn eof_as_protocol(e: io::Error) -> ControlError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ProtocolError::UnexpectedEof.into()
    } else {
        e.into()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    const METADATA: &str = r#"<tiaMetaInfo><masterSignal samplingRate="100" blockSize="1"/><signal type="eeg" samplingRate="100" blockSize="1" numChannels="2"/></tiaMetaInfo>"#;

    fn metainfo_response(xml: &str) -> Vec<u8> {
        format!("TiA 1.0\nMetaInfo\nContent-Length: {}\n\n{xml}", xml.len()).into_bytes()
    }

    #[tokio::test]
    async fn test_version_check_writes_request_and_reads_ok() {
        // Arrange
        let mock = Builder::new()
            .write(b"TiA 1.0\nCheckProtocolVersion\n\n")
            .read(b"TiA 1.0\nOK\n\n")
            .build();
        let mut channel = ControlChannel::new(mock);

        // Act
        channel.check_version().await.expect("version check");

        // Assert
        assert_eq!(channel.state(), ControlState::VersionChecked);
    }

    #[tokio::test]
    async fn test_full_handshake_reaches_streaming() {
        let mock = Builder::new()
            .write(b"TiA 1.0\nCheckProtocolVersion\n\n")
            .read(b"TiA 1.0\nOK\n\n")
            .write(b"TiA 1.0\nGetMetaInfo\n\n")
            .read(&metainfo_response(METADATA))
            .write(b"TiA 1.0\nGetDataConnection: TCP\n\n")
            .read(b"TiA 1.0\nDataConnectionPort: 38501\n\n")
            .write(b"TiA 1.0\nStartDataTransmission\n\n")
            .read(b"TiA 1.0\nOK\n\n")
            .build();
        let mut channel = ControlChannel::new(mock);

        channel.check_version().await.unwrap();
        let layout = channel.fetch_metadata().await.unwrap();
        let port = channel.negotiate_data().await.unwrap();
        channel.start().await.unwrap();

        assert_eq!(layout.channel_count(), 2);
        assert_eq!(port, 38501);
        assert_eq!(channel.state(), ControlState::Streaming);
    }

    #[tokio::test]
    async fn test_out_of_order_command_does_not_touch_the_wire() {
        // An empty script fails the test if anything is written.
        let mock = Builder::new().build();
        let mut channel = ControlChannel::new(mock);

        let result = channel.start().await;

        assert!(matches!(
            result,
            Err(ControlError::OutOfOrder { command: Command::Start, state: ControlState::Idle })
        ));
        assert_eq!(channel.state(), ControlState::Idle);
    }

    #[tokio::test]
    async fn test_error_answer_closes_channel() {
        let mock = Builder::new()
            .write(b"TiA 1.0\nCheckProtocolVersion\n\n")
            .read(b"TiA 1.0\nError\n\n")
            .build();
        let mut channel = ControlChannel::new(mock);

        let result = channel.check_version().await;

        assert!(matches!(
            result,
            Err(ControlError::Protocol(ProtocolError::UnexpectedAnswer { .. }))
        ));
        assert_eq!(channel.state(), ControlState::Closed);
    }

    #[tokio::test]
    async fn test_malformed_content_line_is_protocol_error() {
        let mock = Builder::new()
            .write(b"TiA 1.0\nCheckProtocolVersion\n\n")
            .read(b"TiA 1.0\nOK\nX-Other: 1\n")
            .build();
        let mut channel = ControlChannel::new(mock);

        let result = channel.check_version().await;

        assert!(matches!(
            result,
            Err(ControlError::Protocol(ProtocolError::MalformedContentLine(_)))
        ));
    }

    #[tokio::test]
    async fn test_connection_closed_mid_response_is_unexpected_eof() {
        let mock = Builder::new()
            .write(b"TiA 1.0\nCheckProtocolVersion\n\n")
            .read(b"TiA 1.0\n")
            .build();
        let mut channel = ControlChannel::new(mock);

        let result = channel.check_version().await;

        assert!(matches!(result, Err(ControlError::Protocol(ProtocolError::UnexpectedEof))));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_unexpected_eof() {
        let mock = Builder::new()
            .write(b"TiA 1.0\nCheckProtocolVersion\n\n")
            .read(b"TiA 1.0\nOK\n\n")
            .write(b"TiA 1.0\nGetMetaInfo\n\n")
            .read(b"TiA 1.0\nMetaInfo\nContent-Length: 100\n\n<tiaMetaInfo>")
            .build();
        let mut channel = ControlChannel::new(mock);
        channel.check_version().await.unwrap();

        let result = channel.fetch_metadata().await;

        assert!(matches!(result, Err(ControlError::Protocol(ProtocolError::UnexpectedEof))));
    }

    #[tokio::test]
    async fn test_bad_metadata_keeps_state_at_version_checked() {
        let bad = r#"<tiaMetaInfo><masterSignal samplingRate="100" blockSize="1"/><signal type="eeg" samplingRate="50" blockSize="1" numChannels="2"/></tiaMetaInfo>"#;
        let mock = Builder::new()
            .write(b"TiA 1.0\nCheckProtocolVersion\n\n")
            .read(b"TiA 1.0\nOK\n\n")
            .write(b"TiA 1.0\nGetMetaInfo\n\n")
            .read(&metainfo_response(bad))
            .build();
        let mut channel = ControlChannel::new(mock);
        channel.check_version().await.unwrap();

        let result = channel.fetch_metadata().await;

        assert!(matches!(
            result,
            Err(ControlError::Metadata(MetadataError::MasterMismatch { .. }))
        ));
        assert_eq!(channel.state(), ControlState::VersionChecked);
    }

    #[tokio::test]
    async fn test_metainfo_without_payload_is_missing_payload() {
        let mock = Builder::new()
            .write(b"TiA 1.0\nCheckProtocolVersion\n\n")
            .read(b"TiA 1.0\nOK\n\n")
            .write(b"TiA 1.0\nGetMetaInfo\n\n")
            .read(b"TiA 1.0\nMetaInfo\n\n")
            .build();
        let mut channel = ControlChannel::new(mock);
        channel.check_version().await.unwrap();

        let result = channel.fetch_metadata().await;

        assert!(matches!(result, Err(ControlError::MissingPayload(Command::FetchMetadata))));
    }

    #[tokio::test]
    async fn test_payload_on_ok_response_is_read_and_ignored() {
        let mock = Builder::new()
            .write(b"TiA 1.0\nCheckProtocolVersion\n\n")
            .read(b"TiA 1.0\nOK\nContent-Length: 3\n\nabc")
            .write(b"TiA 1.0\nGetServerStateConnection\n\n")
            .read(b"TiA 1.0\nServerStateConnectionPort: 9000\n\n")
            .build();
        let mut channel = ControlChannel::new(mock);

        channel.check_version().await.unwrap();
        let port = channel.negotiate_state().await.unwrap();

        assert_eq!(port, 9000);
        assert_eq!(channel.state(), ControlState::VersionChecked);
    }

    #[tokio::test]
    async fn test_unallocatable_content_length_closes_channel() {
        // Arrange
        let mock = Builder::new()
            .write(b"TiA 1.0\nCheckProtocolVersion\n\n")
            .read(b"TiA 1.0\nOK\n\n")
            .write(b"TiA 1.0\nGetMetaInfo\n\n")
            .read(format!("TiA 1.0\nMetaInfo\nContent-Length: {}\n\n", usize::MAX).as_bytes())
            .build();
        let mut channel = ControlChannel::new(mock);
        channel.check_version().await.unwrap();

        // Act
        let result = channel.fetch_metadata().await;

        // Assert
        assert!(matches!(result, Err(ControlError::PayloadAllocation(n)) if n == usize::MAX));
        assert_eq!(channel.state(), ControlState::Closed);
    }

    #[tokio::test]
    async fn test_rejected_metadata_does_not_touch_fetched_layout() {
        // Arrange: one session fetches a good layout
        let mock = Builder::new()
            .write(b"TiA 1.0\nCheckProtocolVersion\n\n")
            .read(b"TiA 1.0\nOK\n\n")
            .write(b"TiA 1.0\nGetMetaInfo\n\n")
            .read(&metainfo_response(METADATA))
            .build();
        let mut channel = ControlChannel::new(mock);
        channel.check_version().await.unwrap();
        let layout = channel.fetch_metadata().await.unwrap();
        let snapshot = layout.clone();

        // Act: a broken document goes through a fresh parser
        let bad = r#"<tiaMetaInfo><masterSignal samplingRate="100" blockSize="1"/><signal type="eeg" samplingRate="100" blockSize="1" numChannels="2"><channel nr="9" label="X"/></signal></tiaMetaInfo>"#;
        let rejected = parse_metadata(bad.as_bytes());

        // Assert
        assert!(matches!(rejected, Err(MetadataError::ChannelOutOfRange { nr: 9, count: 2 })));
        assert_eq!(layout, snapshot);
        assert_eq!(layout.channel_count(), 2);
        assert_eq!(layout.channels()[1].label(), "eeg:2");
        assert_eq!(channel.state(), ControlState::MetadataLoaded);
    }
}
