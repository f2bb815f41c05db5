//! TiA metadata document parser.
//!
//! The server describes its signals in an XML document returned by the
//! `GetMetaInfo` request:
//!
//! ```xml
//! <tiaMetaInfo version="1.0">
//!   <masterSignal samplingRate="512" blockSize="8"/>
//!   <signal type="eeg" samplingRate="512" blockSize="8" numChannels="2">
//!     <channel nr="1" label="C3"/>
//!     <channel nr="2" label="C4"/>
//!   </signal>
//!   <signal type="event" samplingRate="512" blockSize="8" numChannels="1"/>
//! </tiaMetaInfo>
//! ```
//!
//! [`MetadataParser`] walks the document as a stream of pull events and
//! builds a [`ChannelLayout`].  Element handling is order-sensitive:
//!
//! | event                 | effect                                                    |
//! |-----------------------|-----------------------------------------------------------|
//! | `<tiaMetaInfo>`       | every offset slot reset to absent                          |
//! | `<masterSignal>`      | reference sampling rate and block size recorded            |
//! | `<signal>`            | `numChannels` unlabeled channels appended, count recorded  |
//! | `<channel>`           | label of channel `nr` (1-based) of the open block replaced |
//! | `</signal>`           | unlabeled channels of the block named `"<type>:<pos>"`     |
//! | `</tiaMetaInfo>`      | channels stable-sorted by mask, counts → start offsets     |
//!
//! Any violation aborts the parse.  Nothing is published until the root
//! element closes, so a failed document never replaces a previously
//! finalized layout.

use std::io::BufRead;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use thiserror::Error;
use tracing::debug;

use crate::catalog::SignalTypeId;
use crate::domain::channel_map::{ChannelLayout, ChannelMapEntry, DomainCategory, OffsetTable};

const ROOT_ELEMENT: &[u8] = b"tiaMetaInfo";
const MASTER_ELEMENT: &[u8] = b"masterSignal";
const SIGNAL_ELEMENT: &[u8] = b"signal";
const CHANNEL_ELEMENT: &[u8] = b"channel";

/// Errors raised while building a channel layout from metadata.
#[derive(Debug, Error, PartialEq)]
pub enum MetadataError {
    /// The document is not well-formed XML.
    #[error("malformed XML at byte {position}: {message}")]
    Xml { position: u64, message: String },

    #[error("<{element}> is missing required attribute `{attribute}`")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    #[error("<{element}> attribute `{attribute}` has invalid value {value:?}")]
    InvalidAttribute {
        element: &'static str,
        attribute: &'static str,
        value: String,
    },

    /// A `<signal>` appeared before any `<masterSignal>`.
    #[error("<signal> declared before <masterSignal>")]
    MissingMasterSignal,

    /// A signal's sampling rate or block size differs from the master signal.
    #[error(
        "signal `{signal_type}` runs at {rate} Hz / block {block_size}, \
         master is {master_rate} Hz / block {master_block_size}"
    )]
    MasterMismatch {
        signal_type: String,
        rate: u32,
        block_size: u32,
        master_rate: u32,
        master_block_size: u32,
    },

    #[error("unknown signal type `{0}`")]
    UnknownSignalType(String),

    /// A `<channel nr>` lies outside `1..=numChannels` of its block.
    #[error("channel nr {nr} out of range for a block of {count} channels")]
    ChannelOutOfRange { nr: i64, count: usize },

    #[error("<channel> outside of a <signal> block")]
    ChannelOutsideSignal,

    #[error("<signal> nested inside another <signal>")]
    NestedSignal,

    /// The document ended before `</tiaMetaInfo>`.
    #[error("metadata document ended before </tiaMetaInfo>")]
    Incomplete,

    /// The channel map could not grow by a signal's `numChannels`.
    #[error("could not allocate {requested} more channel map entries")]
    Allocation { requested: usize },
}

/// Reference timing every signal must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MasterSignal {
    sampling_rate: u32,
    block_size: u32,
}

/// State of the `<signal>` block currently open.
#[derive(Debug, Clone)]
struct ParsingState {
    category: DomainCategory,
    channel_count: usize,
    type_name: String,
    /// Index in the channel list of the block's first channel.
    first_channel: usize,
}

#[derive(Debug, Clone)]
enum Phase {
    Idle,
    InSignal(ParsingState),
    InChannel(ParsingState),
}

/// Streaming builder for a [`ChannelLayout`].
///
/// Feed it pull events with [`MetadataParser::parse`], or use the
/// [`parse_metadata`] convenience wrapper for an in-memory document.
#[derive(Debug)]
pub struct MetadataParser {
    phase: Phase,
    master: Option<MasterSignal>,
    channels: Vec<ChannelMapEntry>,
    offsets: OffsetTable,
    signal_count: usize,
    layout: Option<ChannelLayout>,
}

impl Default for MetadataParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataParser {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            master: None,
            channels: Vec::new(),
            offsets: OffsetTable::new(),
            signal_count: 0,
            layout: None,
        }
    }

    /// Parses a complete document from `source`.
    ///
    /// # Errors
    ///
    /// Returns the first [`MetadataError`] encountered; the parser is consumed
    /// either way.
    pub fn parse<R: BufRead>(mut self, source: R) -> Result<ChannelLayout, MetadataError> {
        let mut reader = Reader::from_reader(source);
        reader.config_mut().trim_text(true);
        let mut buf = Vec::new();

        loop {
            let event = reader.read_event_into(&mut buf).map_err(|e| MetadataError::Xml {
                position: reader.buffer_position() as u64,
                message: e.to_string(),
            })?;
            match event {
                Event::Start(e) => self.open(&e)?,
                Event::Empty(e) => {
                    self.open(&e)?;
                    self.close(e.name().as_ref())?;
                }
                Event::End(e) => self.close(e.name().as_ref())?,
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        self.layout.ok_or(MetadataError::Incomplete)
    }

    fn open(&mut self, element: &BytesStart<'_>) -> Result<(), MetadataError> {
        match element.name().as_ref() {
            ROOT_ELEMENT => {
                self.offsets.clear();
                Ok(())
            }
            MASTER_ELEMENT => self.open_master_signal(element),
            SIGNAL_ELEMENT => self.open_signal(element),
            CHANNEL_ELEMENT => self.open_channel(element),
            _ => Ok(()),
        }
    }

    fn close(&mut self, name: &[u8]) -> Result<(), MetadataError> {
        match name {
            SIGNAL_ELEMENT => {
                if let Phase::InSignal(state) = std::mem::replace(&mut self.phase, Phase::Idle) {
                    self.close_signal(&state);
                }
            }
            CHANNEL_ELEMENT => {
                if let Phase::InChannel(state) = std::mem::replace(&mut self.phase, Phase::Idle) {
                    self.phase = Phase::InSignal(state);
                }
            }
            ROOT_ELEMENT => self.finalize(),
            _ => {}
        }
        Ok(())
    }

    fn open_master_signal(&mut self, element: &BytesStart<'_>) -> Result<(), MetadataError> {
        let attrs = Attributes::read(element)?;
        let master = MasterSignal {
            sampling_rate: attrs.number("masterSignal", "samplingRate")?,
            block_size: attrs.number("masterSignal", "blockSize")?,
        };
        debug!(
            "master signal: {} Hz, block size {}",
            master.sampling_rate, master.block_size
        );
        self.master = Some(master);
        Ok(())
    }

    fn open_signal(&mut self, element: &BytesStart<'_>) -> Result<(), MetadataError> {
        if !matches!(self.phase, Phase::Idle) {
            return Err(MetadataError::NestedSignal);
        }
        let attrs = Attributes::read(element)?;
        let type_name = attrs.require("signal", "type")?.to_string();
        let channel_count: u32 = attrs.number("signal", "numChannels")?;
        let rate: u32 = attrs.number("signal", "samplingRate")?;
        let block_size: u32 = attrs.number("signal", "blockSize")?;

        let master = self.master.ok_or(MetadataError::MissingMasterSignal)?;
        if rate != master.sampling_rate || block_size != master.block_size {
            return Err(MetadataError::MasterMismatch {
                signal_type: type_name,
                rate,
                block_size,
                master_rate: master.sampling_rate,
                master_block_size: master.block_size,
            });
        }

        let category = DomainCategory::for_type_name(&type_name);
        let signal_type = SignalTypeId::from_name(&type_name)
            .ok_or_else(|| MetadataError::UnknownSignalType(type_name.clone()))?;

        let channel_count = channel_count as usize;
        let first_channel = self.channels.len();
        reserve_entries(&mut self.channels, channel_count)?;
        self.channels.extend(
            std::iter::repeat_with(|| ChannelMapEntry::unlabeled(category, signal_type))
                .take(channel_count),
        );
        self.offsets.add_channels(signal_type, channel_count);
        self.signal_count += 1;

        debug!("signal `{type_name}`: {channel_count} channels");
        self.phase = Phase::InSignal(ParsingState {
            category,
            channel_count,
            type_name,
            first_channel,
        });
        Ok(())
    }

    fn open_channel(&mut self, element: &BytesStart<'_>) -> Result<(), MetadataError> {
        let state = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::InSignal(state) => state,
            _ => return Err(MetadataError::ChannelOutsideSignal),
        };
        let attrs = Attributes::read(element)?;
        let nr: i64 = attrs.number("channel", "nr")?;
        let label = attrs.require("channel", "label")?;

        if nr < 1 || nr as u64 > state.channel_count as u64 {
            return Err(MetadataError::ChannelOutOfRange {
                nr,
                count: state.channel_count,
            });
        }
        let index = state.first_channel + (nr - 1) as usize;
        self.channels[index].label = Some(label.to_string());

        self.phase = Phase::InChannel(state);
        Ok(())
    }

    fn close_signal(&mut self, state: &ParsingState) {
        let block = &mut self.channels[state.first_channel..state.first_channel + state.channel_count];
        for (position, channel) in block.iter_mut().enumerate() {
            debug_assert_eq!(channel.category, state.category);
            if channel.label.is_none() {
                channel.label = Some(format!("{}:{}", state.type_name, position + 1));
            }
        }
    }

    fn finalize(&mut self) {
        let mut channels = std::mem::take(&mut self.channels);
        // `sort_by_key` is stable: channels of one type keep declaration order.
        channels.sort_by_key(|c| c.signal_type.mask());
        let mut offsets = self.offsets;
        let total = offsets.finalize();
        debug_assert_eq!(total, channels.len());

        let master = self.master.unwrap_or(MasterSignal {
            sampling_rate: 0,
            block_size: 0,
        });
        self.layout = Some(ChannelLayout::new(
            channels,
            offsets,
            master.sampling_rate,
            master.block_size,
            self.signal_count,
        ));
    }
}

/// Parses an in-memory metadata document.
///
/// # Errors
///
/// Returns [`MetadataError`] if the document is malformed or violates the
/// element rules described in the module docs.
///
/// # Examples
///
/// ```rust
/// use tia_core::domain::metadata::parse_metadata;
///
/// let xml = br#"<tiaMetaInfo>
///     <masterSignal samplingRate="256" blockSize="1"/>
///     <signal type="eeg" samplingRate="256" blockSize="1" numChannels="2"/>
/// </tiaMetaInfo>"#;
/// let layout = parse_metadata(xml).unwrap();
/// assert_eq!(layout.channel_count(), 2);
/// assert_eq!(layout.channels()[1].label(), "eeg:2");
/// ```
pub fn parse_metadata(xml: &[u8]) -> Result<ChannelLayout, MetadataError> {
    MetadataParser::new().parse(xml)
}

/// Fallible reservation for `extra` more channel map entries.
fn reserve_entries(channels: &mut Vec<ChannelMapEntry>, extra: usize) -> Result<(), MetadataError> {
    channels
        .try_reserve_exact(extra)
        .map_err(|_| MetadataError::Allocation { requested: extra })
}

// ── Attribute helpers ─────────────────────────────────────────────────────────

struct Attributes(Vec<(Vec<u8>, String)>);

impl Attributes {
    fn read(element: &BytesStart<'_>) -> Result<Self, MetadataError> {
        let mut pairs = Vec::new();
        for attr in element.attributes() {
            let attr = attr.map_err(|e| MetadataError::Xml {
                position: 0,
                message: e.to_string(),
            })?;
            let value = attr.unescape_value().map_err(|e| MetadataError::Xml {
                position: 0,
                message: e.to_string(),
            })?;
            pairs.push((attr.key.as_ref().to_vec(), value.into_owned()));
        }
        Ok(Self(pairs))
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.as_slice() == name.as_bytes())
            .map(|(_, value)| value.as_str())
    }

    fn require(&self, element: &'static str, attribute: &'static str) -> Result<&str, MetadataError> {
        self.get(attribute)
            .ok_or(MetadataError::MissingAttribute { element, attribute })
    }

    fn number<T: std::str::FromStr>(
        &self,
        element: &'static str,
        attribute: &'static str,
    ) -> Result<T, MetadataError> {
        let raw = self.require(element, attribute)?;
        raw.trim().parse().map_err(|_| MetadataError::InvalidAttribute {
            element,
            attribute,
            value: raw.to_string(),
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
