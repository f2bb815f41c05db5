//! Integration tests for metadata parsing through the public API.
//!
//! These build complete layouts from realistic server documents and check the
//! properties downstream consumers rely on: canonical channel order, offsets,
//! default labels and channel descriptions.

use tia_core::{
    decode_type_flags, parse_metadata, DomainCategory, MetadataError, SampleRange, SignalTypeId,
    SlotTarget,
};

const TWO_SIGNALS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<tiaMetaInfo version="1.0">
  <subject id="anon" firstName="" surname=""/>
  <masterSignal samplingRate="250" blockSize="10"/>
  <signal type="eeg" samplingRate="250" blockSize="10" numChannels="2"/>
  <signal type="emg" samplingRate="250" blockSize="10" numChannels="1"/>
</tiaMetaInfo>"#;

fn labels(xml: &str) -> Vec<String> {
    parse_metadata(xml.as_bytes())
        .expect("document must parse")
        .channels()
        .iter()
        .map(|c| c.label().to_string())
        .collect()
}

#[test]
fn test_two_signals_produce_default_labels_and_offsets() {
    // Act
    let layout = parse_metadata(TWO_SIGNALS.as_bytes()).expect("parse");

    // Assert
    assert_eq!(labels(TWO_SIGNALS), vec!["eeg:1", "eeg:2", "emg:1"]);
    let eeg = SignalTypeId::from_name("eeg").unwrap();
    let emg = SignalTypeId::from_name("emg").unwrap();
    assert_eq!(layout.offsets().get(eeg), Some(0));
    assert_eq!(layout.offsets().get(emg), Some(2));
    assert_eq!(layout.record_stride(), 3);
    assert_eq!(layout.sample_row_bytes(), 12);
}

#[test]
fn test_channel_label_override_touches_only_that_channel() {
    let xml = TWO_SIGNALS.replace(
        r#"numChannels="2"/>"#,
        r#"numChannels="2"><channel nr="2" label="Fp2"/></signal>"#,
    );

    assert_eq!(labels(&xml), vec!["eeg:1", "Fp2", "emg:1"]);
}

#[test]
fn test_every_offset_is_within_the_row() {
    let xml = r#"<tiaMetaInfo>
      <masterSignal samplingRate="100" blockSize="1"/>
      <signal type="event" samplingRate="100" blockSize="1" numChannels="1"/>
      <signal type="button" samplingRate="100" blockSize="1" numChannels="4"/>
      <signal type="eeg" samplingRate="100" blockSize="1" numChannels="8"/>
      <signal type="user2" samplingRate="100" blockSize="1" numChannels="2"/>
    </tiaMetaInfo>"#;

    let layout = parse_metadata(xml.as_bytes()).expect("parse");

    let total = layout.channel_count();
    assert_eq!(total, 15);
    let present: Vec<_> = layout.offsets().present().collect();
    assert_eq!(present.len(), 4);
    for (_, offset) in &present {
        assert!(*offset < total);
    }
    let masks: Vec<u32> = layout.channels().iter().map(|c| c.signal_type.mask()).collect();
    assert!(masks.windows(2).all(|w| w[0] <= w[1]), "channels must be in mask order");
}

#[test]
fn test_category_counts_and_channel_info() {
    let xml = r#"<tiaMetaInfo>
      <masterSignal samplingRate="512" blockSize="4"/>
      <signal type="eeg" samplingRate="512" blockSize="4" numChannels="3"/>
      <signal type="event" samplingRate="512" blockSize="4" numChannels="1"/>
      <signal type="button" samplingRate="512" blockSize="4" numChannels="2"/>
    </tiaMetaInfo>"#;

    let layout = parse_metadata(xml.as_bytes()).expect("parse");

    assert_eq!(layout.category_count(DomainCategory::Eeg), 3);
    assert_eq!(layout.category_count(DomainCategory::Trigger), 1);
    assert_eq!(layout.category_count(DomainCategory::Sensor), 2);

    let trigger = layout.channel_info(DomainCategory::Trigger, 0).expect("trigger");
    assert_eq!(trigger.label, "event:1");
    assert_eq!(trigger.transducer, "Triggers and Status");
    assert_eq!(trigger.unit, "Boolean");

    let button = layout.channel_info(DomainCategory::Sensor, 1).expect("button");
    assert_eq!(button.label, "button:2");
    assert!(matches!(button.range, SampleRange::Int32 { .. }));
}

#[test]
fn test_block_size_mismatch_fails_whole_document() {
    let xml = TWO_SIGNALS.replace(
        r#"<signal type="emg" samplingRate="250" blockSize="10""#,
        r#"<signal type="emg" samplingRate="250" blockSize="20""#,
    );

    let result = parse_metadata(xml.as_bytes());

    assert!(matches!(
        result,
        Err(MetadataError::MasterMismatch { block_size: 20, master_block_size: 10, .. })
    ));
}

#[test]
fn test_layout_drives_type_flag_decoding() {
    // Arrange: only emg subscribed; packet carries eeg and emg
    let xml = r#"<tiaMetaInfo>
      <masterSignal samplingRate="250" blockSize="10"/>
      <signal type="emg" samplingRate="250" blockSize="10" numChannels="2"/>
    </tiaMetaInfo>"#;
    let layout = parse_metadata(xml.as_bytes()).expect("parse");

    // Act
    let slots = decode_type_flags(0b11, layout.offsets());

    // Assert
    assert_eq!(slots.as_slice(), &[SlotTarget::Absent, SlotTarget::Present(0)]);
}
