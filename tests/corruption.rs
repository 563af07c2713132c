//! Corruption and truncation behavior: every malformed stream must surface
//! a structured error (never a panic), and the error kind must distinguish
//! "feed me more bytes" from "this stream is broken".

use kvir::protocol::tag;
use kvir::{Decoded, Deserializer, IrError, IrRead, Serializer, SliceReader};
use serde_json::{json, Value as Json};

fn encode_stream(records: &[Json]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut producer = Serializer::new();
    producer
        .write_preamble(&mut out, "yyyy-MM-dd HH:mm:ss", "java", "UTC", 0)
        .unwrap();
    for record in records {
        producer.encode_record(&mut out, record).unwrap();
    }
    producer.write_end_of_stream(&mut out).unwrap();
    out
}

/// Decode records until the stream ends or an error surfaces.
fn drain(bytes: &[u8]) -> std::result::Result<Vec<Json>, IrError> {
    let mut reader = SliceReader::new(bytes);
    let mut consumer = Deserializer::new();
    consumer.read_preamble(&mut reader)?;
    let mut records = Vec::new();
    loop {
        match consumer.decode_record(&mut reader)? {
            Decoded::Record(record) => records.push(record),
            Decoded::EndOfStream => return Ok(records),
        }
    }
}

/// Byte offset of the first record (metadata JSON may contain any byte, so
/// tag searches must start past the preamble).
fn preamble_len(bytes: &[u8]) -> usize {
    let mut reader = SliceReader::new(bytes);
    Deserializer::new().read_preamble(&mut reader).unwrap();
    reader.position()
}

// --- Truncation ---

#[test]
fn test_missing_terminator_is_incomplete_not_eof() {
    let bytes = encode_stream(&[json!({"a": 1}), json!({"b": "two words here"})]);
    let truncated = &bytes[..bytes.len() - 1];
    let err = drain(truncated).unwrap_err();
    assert!(
        matches!(err, IrError::IncompleteStream(_)),
        "expected IncompleteStream, got {err:?}"
    );
}

#[test]
fn test_every_truncation_point_fails_cleanly() {
    let bytes = encode_stream(&[
        json!({"k1": "value1", "k5": {"k6": 77.66}}),
        json!({"arr": [1, 0.1, "s"], "k1": "other"}),
    ]);
    for cut in 0..bytes.len() {
        let err = drain(&bytes[..cut]).unwrap_err();
        // Truncation may land inside any structure; whatever surfaces must
        // be a structured error rather than a panic or a bogus success.
        match err {
            IrError::IncompleteStream(_)
            | IrError::Corrupt(_)
            | IrError::Decode(_)
            | IrError::UnknownTag { .. }
            | IrError::Json(_) => {}
            other => panic!("unexpected error kind at cut {cut}: {other:?}"),
        }
    }
}

// --- Unknown tags ---

#[test]
fn test_unknown_tag_in_value_position() {
    let bytes = encode_stream(&[json!({"a": 1})]);
    let record_start = preamble_len(&bytes);

    // Record 1 as emitted, then a crafted second record that reuses node 1
    // but pairs it with 0x7f where a value tag belongs.
    let mut body = bytes[record_start..bytes.len() - 1].to_vec();
    body.extend_from_slice(&[tag::KEY_ID_UBYTE, 1, 0x7f]);

    let mut preamble_reader = SliceReader::new(&bytes);
    let mut consumer = Deserializer::new();
    consumer.read_preamble(&mut preamble_reader).unwrap();
    let mut reader = SliceReader::new(&body);
    consumer.decode_record(&mut reader).unwrap();
    let tree_size = consumer.schema().size();

    let err = consumer.decode_record(&mut reader).unwrap_err();
    assert!(matches!(err, IrError::UnknownTag { tag: 0x7f, .. }));
    // No announcements preceded the bad value, so the tree is unchanged
    // from just before the record.
    assert_eq!(consumer.schema().size(), tree_size);
}

#[test]
fn test_unassigned_empty_marker_byte_is_unknown() {
    // 0x5d sits next to the empty-record marker but is not in the catalog.
    let bytes = encode_stream(&[json!({"a": 1})]);
    let record_start = preamble_len(&bytes);
    let mut body = bytes[record_start..bytes.len() - 1].to_vec();
    body.extend_from_slice(&[tag::KEY_ID_UBYTE, 1, 0x5d]);

    let mut preamble_reader = SliceReader::new(&bytes);
    let mut consumer = Deserializer::new();
    consumer.read_preamble(&mut preamble_reader).unwrap();
    let mut reader = SliceReader::new(&body);
    consumer.decode_record(&mut reader).unwrap();
    let err = consumer.decode_record(&mut reader).unwrap_err();
    assert!(matches!(err, IrError::UnknownTag { tag: 0x5d, .. }));
}

// --- Array payload corruption ---

#[test]
fn test_flipping_the_array_payload_tail_is_detected() {
    let record = json!([1, 0.1, false, "s", null, {"k0": "v"}]);
    let bytes = encode_stream(&[record.clone()]);
    let body_start = preamble_len(&bytes);
    let begin = body_start
        + bytes[body_start..]
            .iter()
            .position(|&b| b == tag::ARRAY_BEGIN)
            .unwrap();
    let end = bytes.iter().rposition(|&b| b == tag::ARRAY_END).unwrap();

    // The byte just before ArrayEnd is the tail of the logtype (the
    // closing bracket of the JSON text). Flipping it breaks the JSON.
    let mut flipped = bytes.clone();
    flipped[end - 1] ^= 0x01;
    match drain(&flipped) {
        Err(IrError::Decode(_)) => {}
        Ok(records) => assert_ne!(records, [record.clone()], "corruption must not go unnoticed"),
        Err(other) => panic!("expected a decode error, got {other:?}"),
    }

    // Sweep every byte of the framed payload: each flip either errors or
    // yields a demonstrably different array.
    for i in begin + 1..end {
        let mut flipped = bytes.clone();
        flipped[i] ^= 0x01;
        match drain(&flipped) {
            Ok(records) => assert_ne!(records, [record.clone()], "flip at {i} went unnoticed"),
            Err(_) => {}
        }
    }
}

// --- Numeric payload corruption ---

#[test]
fn test_flipping_numeric_payload_bytes_changes_the_value() {
    let record = json!({"n": 0x01020304});
    let bytes = encode_stream(&[record.clone()]);
    // Locate the i32 value: tag then four payload bytes.
    let body_start = preamble_len(&bytes);
    let pos = body_start
        + bytes[body_start..]
            .iter()
            .position(|&b| b == tag::VALUE_INT32)
            .unwrap();
    for i in pos + 1..pos + 5 {
        let mut flipped = bytes.clone();
        flipped[i] ^= 0xff;
        match drain(&flipped) {
            Ok(records) => assert_ne!(records, [record.clone()], "flip at {i} went unnoticed"),
            Err(_) => {}
        }
    }
}

// --- Preamble corruption ---

#[test]
fn test_unsupported_version_is_rejected() {
    let bytes = encode_stream(&[]);
    // Rewrite the metadata VERSION in place (same length: 0.0.1 -> 9.0.1).
    let mut hacked = bytes.clone();
    let needle = b"\"VERSION\":\"0.0.1\"";
    let at = hacked
        .windows(needle.len())
        .position(|w| w == needle)
        .unwrap();
    hacked[at + 11] = b'9';
    let err = drain(&hacked).unwrap_err();
    assert!(matches!(
        err,
        IrError::UnsupportedVersion {
            support: kvir::VersionSupport::TooNew,
            ..
        }
    ));
}

#[test]
fn test_metadata_length_overrunning_the_buffer_is_incomplete() {
    let bytes = encode_stream(&[]);
    let mut hacked = bytes.clone();
    // Inflate the u8 metadata length past the end of the stream.
    assert_eq!(hacked[5], 0x11);
    hacked[6] = 0xff;
    let err = drain(&hacked).unwrap_err();
    assert!(matches!(err, IrError::IncompleteStream(_)));
}

#[test]
fn test_metadata_garbage_json_is_rejected() {
    let bytes = encode_stream(&[]);
    let mut hacked = bytes.clone();
    hacked[9] = b'!';
    let err = drain(&hacked).unwrap_err();
    assert!(matches!(err, IrError::Json(_) | IrError::Corrupt(_)));
}

// --- Delimiter corruption ---

#[test]
fn test_missing_record_delimiter_is_corrupt() {
    let bytes = encode_stream(&[json!({"a": 1}), json!({"a": 2})]);
    // Drop the first record's delimiter byte.
    let body_start = preamble_len(&bytes);
    let delim_at = body_start
        + bytes[body_start..]
            .iter()
            .position(|&b| b == tag::RECORD_DELIM)
            .unwrap();
    let mut hacked = bytes.clone();
    hacked.remove(delim_at);
    let err = drain(&hacked).unwrap_err();
    assert!(matches!(err, IrError::Corrupt(_)));
}
