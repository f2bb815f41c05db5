//! Control-channel framing and handshake state machine.
//!
//! The control channel is a line-oriented text protocol.  Every request is a
//! version line, a command line and an empty line:
//!
//! ```text
//! TiA 1.0\n
//! GetMetaInfo\n
//! \n
//! ```
//!
//! Every response is a version line, an answer line, and then either an empty
//! line or a `Content-Length` line introducing a payload:
//!
//! ```text
//! TiA 1.0\n                 TiA 1.0\n
//! OK\n                      MetaInfo\n
//! \n                        Content-Length: 1234\n
//!                           \n
//!                           <1234 bytes of XML>
//! ```
//!
//! This module does no I/O.  It encodes requests, validates the three header
//! lines of a response, and tracks which commands are legal next.  The async
//! transport lives in the client crate.

use std::fmt;

use thiserror::Error;

/// Protocol name sent in every version line.
pub const PROTOCOL_NAME: &str = "TiA";
/// Protocol version this client speaks.
pub const PROTOCOL_VERSION: (u32, u32) = (1, 0);

const CONTENT_LENGTH_PREFIX: &str = "Content-Length:";

/// Errors raised while validating a control-channel response.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The first response line is not `TiA <major>.<minor>`.
    #[error("malformed version line {0:?}")]
    MalformedVersionLine(String),

    /// The answer line does not match what the command expects.
    #[error("unexpected answer to {command}: expected {expected:?}, got {actual:?}")]
    UnexpectedAnswer {
        command: Command,
        expected: &'static str,
        actual: String,
    },

    /// A port answer carried something other than a valid TCP port.
    #[error("invalid port in answer {0:?}")]
    InvalidPort(String),

    /// The third response line is neither empty nor `Content-Length: <N>`.
    #[error("malformed content line {0:?}")]
    MalformedContentLine(String),

    /// The connection closed before a full response arrived.
    #[error("connection closed in the middle of a response")]
    UnexpectedEof,
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// A control-channel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    VersionCheck,
    FetchMetadata,
    NegotiateData,
    Start,
    Stop,
    NegotiateState,
}

impl Command {
    /// The command line sent on the wire.
    pub fn request_text(self) -> &'static str {
        match self {
            Command::VersionCheck => "CheckProtocolVersion",
            Command::FetchMetadata => "GetMetaInfo",
            Command::NegotiateData => "GetDataConnection: TCP",
            Command::Start => "StartDataTransmission",
            Command::Stop => "StopDataTransmission",
            Command::NegotiateState => "GetServerStateConnection",
        }
    }

    /// The answer token that signals success.
    ///
    /// For port negotiations this is the prefix before `: <port>`.
    pub fn expected_answer(self) -> &'static str {
        match self {
            Command::VersionCheck | Command::Start | Command::Stop => "OK",
            Command::FetchMetadata => "MetaInfo",
            Command::NegotiateData => "DataConnectionPort",
            Command::NegotiateState => "ServerStateConnectionPort",
        }
    }

    /// Encodes the full request frame.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tia_core::protocol::Command;
    ///
    /// assert_eq!(Command::Start.encode(), "TiA 1.0\nStartDataTransmission\n\n");
    /// ```
    pub fn encode(self) -> String {
        format!(
            "{PROTOCOL_NAME} {}.{}\n{}\n\n",
            PROTOCOL_VERSION.0,
            PROTOCOL_VERSION.1,
            self.request_text()
        )
    }

    /// Validates the answer line of a response to this command.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::UnexpectedAnswer`] on a token mismatch,
    /// [`ProtocolError::InvalidPort`] if a port answer has a bad number.
    pub fn parse_answer(self, line: &str) -> Result<Answer, ProtocolError> {
        let line = trim_line_end(line);
        let expected = self.expected_answer();
        let mismatch = || ProtocolError::UnexpectedAnswer {
            command: self,
            expected,
            actual: line.to_string(),
        };

        match self {
            Command::VersionCheck | Command::Start | Command::Stop => {
                if line == expected {
                    Ok(Answer::Ok)
                } else {
                    Err(mismatch())
                }
            }
            Command::FetchMetadata => {
                if line == expected {
                    Ok(Answer::MetaInfo)
                } else {
                    Err(mismatch())
                }
            }
            Command::NegotiateData | Command::NegotiateState => {
                let (token, value) = line.split_once(':').ok_or_else(mismatch)?;
                if token != expected {
                    return Err(mismatch());
                }
                let port = parse_port(value.trim())
                    .ok_or_else(|| ProtocolError::InvalidPort(line.to_string()))?;
                Ok(Answer::Port(port))
            }
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.request_text())
    }
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// A validated answer line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Ok,
    MetaInfo,
    Port(u16),
}

/// The three header lines of a response, validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHead {
    /// Protocol version the server announced.
    pub version: (u32, u32),
    pub answer: Answer,
    /// Byte length of the payload that follows, if any.
    pub content_length: Option<usize>,
}

impl ResponseHead {
    /// Validates the three header lines of a response to `command`.
    ///
    /// Lines are checked in wire order and the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns the [`ProtocolError`] of the first malformed line.
    pub fn parse(
        command: Command,
        version_line: &str,
        answer_line: &str,
        content_line: &str,
    ) -> Result<Self, ProtocolError> {
        let version = parse_version_line(version_line)?;
        let answer = command.parse_answer(answer_line)?;
        let content_length = parse_content_line(content_line)?;
        Ok(Self {
            version,
            answer,
            content_length,
        })
    }
}

/// A complete response, payload included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub answer: Answer,
    pub payload: Option<Vec<u8>>,
}

impl Response {
    /// The negotiated port, for port answers.
    pub fn port(&self) -> Option<u16> {
        match self.answer {
            Answer::Port(port) => Some(port),
            _ => None,
        }
    }
}

/// Parses `TiA <major>.<minor>`.
///
/// Any well-formed version is accepted; compatibility is established by the
/// `CheckProtocolVersion` exchange, not by this line.
pub fn parse_version_line(line: &str) -> Result<(u32, u32), ProtocolError> {
    let trimmed = trim_line_end(line);
    let malformed = || ProtocolError::MalformedVersionLine(trimmed.to_string());

    let (name, version) = trimmed.split_once(' ').ok_or_else(malformed)?;
    if name != PROTOCOL_NAME {
        return Err(malformed());
    }
    let (major, minor) = version.split_once('.').ok_or_else(malformed)?;
    Ok((parse_digits(major).ok_or_else(malformed)?, parse_digits(minor).ok_or_else(malformed)?))
}

/// Parses the third response line: empty, or `Content-Length: <N>`.
pub fn parse_content_line(line: &str) -> Result<Option<usize>, ProtocolError> {
    let trimmed = trim_line_end(line);
    if trimmed.is_empty() {
        return Ok(None);
    }
    let malformed = || ProtocolError::MalformedContentLine(trimmed.to_string());
    let value = trimmed
        .strip_prefix(CONTENT_LENGTH_PREFIX)
        .ok_or_else(malformed)?;
    let length = parse_digits(value.trim()).ok_or_else(malformed)?;
    Ok(Some(length as usize))
}

fn trim_line_end(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

/// Parses a non-empty run of ASCII digits.  Rejects signs and whitespace.
fn parse_digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_port(s: &str) -> Option<u16> {
    let port = parse_digits(s)?;
    u16::try_from(port).ok().filter(|&p| p != 0)
}

// ── Handshake state machine ───────────────────────────────────────────────────

/// Where a control connection is in the handshake.
///
/// ```text
/// Idle ─VersionCheck→ VersionChecked ─FetchMetadata→ MetadataLoaded
///      ─NegotiateData→ DataNegotiated ─Start→ Streaming ⇄ Stopped
/// ```
///
/// `NegotiateState` is valid in every open state after the version check and
/// leaves the state unchanged.  `Closed` accepts nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlState {
    #[default]
    Idle,
    VersionChecked,
    MetadataLoaded,
    DataNegotiated,
    Streaming,
    Stopped,
    Closed,
}

impl ControlState {
    /// Whether `command` may be sent in this state.
    pub fn permits(self, command: Command) -> bool {
        use ControlState::*;
        match command {
            Command::VersionCheck => self == Idle,
            Command::FetchMetadata => self == VersionChecked,
            Command::NegotiateData => self == MetadataLoaded,
            Command::Start | Command::Stop => matches!(self, DataNegotiated | Streaming | Stopped),
            Command::NegotiateState => !matches!(self, Idle | Closed),
        }
    }

    /// The state after `command` succeeded.
    ///
    /// Only meaningful when [`permits`](Self::permits) returned `true`.
    pub fn after(self, command: Command) -> ControlState {
        match command {
            Command::VersionCheck => ControlState::VersionChecked,
            Command::FetchMetadata => ControlState::MetadataLoaded,
            Command::NegotiateData => ControlState::DataNegotiated,
            Command::Start => ControlState::Streaming,
            Command::Stop => ControlState::Stopped,
            Command::NegotiateState => self,
        }
    }
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
