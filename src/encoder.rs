//! Record serializer: the producer half of the codec.
//!
//! ## Stream Layout
//!
//! ```text
//! [Preamble: magic + EncodingJson + metadata JSON] [Record]* [Eof]
//! ```
//!
//! Each record is committed atomically: a depth-first walk of the record
//! tree fills a key buffer and a value buffer while growing the schema
//! tree, and only after the walk succeeds are the new-node announcements,
//! the key ids, the values, and the record delimiter appended to the
//! output. Announcements therefore always precede any reference to their
//! ids, and values are matched positionally against the key list.
//!
//! A failed walk reverts the schema tree to its pre-record snapshot, so
//! the tree the consumer mirrors never contains growth from a record that
//! was not emitted.

use serde_json::Value as Json;
use tracing::{debug, trace};

use crate::clp::{encode_clp_string, VarWidth};
use crate::error::{IrError, Result};
use crate::metadata::Metadata;
use crate::protocol::{metadata as meta_tag, tag, FOUR_BYTE_ENCODING_MAGIC};
use crate::schema::{NodeId, NodeType, SchemaTree, EvolutionMode, ROOT_ID};
use crate::value::{write_int, write_str};
use crate::wire::{BeNumeric, IrWrite};

/// Streaming producer for one IR stream.
///
/// Holds the producer-side schema tree for the lifetime of the stream.
/// Key-value streams always use the four-byte-encoding magic; the
/// eight-byte variant exists for legacy text streams and is only accepted
/// on the decode side.
#[derive(Debug)]
pub struct Serializer {
    schema: SchemaTree,
    preamble_written: bool,
    eos_written: bool,
}

impl Serializer {
    pub fn new() -> Self {
        Self {
            schema: SchemaTree::new(EvolutionMode::Strict),
            preamble_written: false,
            eos_written: false,
        }
    }

    /// The producer-side schema tree.
    pub fn schema(&self) -> &SchemaTree {
        &self.schema
    }

    /// Write the stream preamble: magic number, metadata encoding byte,
    /// and the length-prefixed metadata JSON.
    pub fn write_preamble(
        &mut self,
        writer: &mut impl IrWrite,
        timestamp_pattern: &str,
        timestamp_pattern_syntax: &str,
        tz_id: &str,
        reference_timestamp: i64,
    ) -> Result<()> {
        if self.preamble_written {
            return Err(IrError::not_ready("preamble already written"));
        }
        let metadata = Metadata::new_four_byte(
            timestamp_pattern,
            timestamp_pattern_syntax,
            tz_id,
            reference_timestamp,
        );
        let json = metadata.to_json_bytes()?;

        let mut buf = Vec::with_capacity(FOUR_BYTE_ENCODING_MAGIC.len() + 4 + json.len());
        buf.extend_from_slice(&FOUR_BYTE_ENCODING_MAGIC);
        buf.push(meta_tag::ENCODING_JSON);
        if json.len() <= u8::MAX as usize {
            buf.push(meta_tag::LENGTH_UBYTE);
            (json.len() as u8).put_be(&mut buf);
        } else if json.len() <= meta_tag::MAX_METADATA_LEN {
            buf.push(meta_tag::LENGTH_USHORT);
            (json.len() as u16).put_be(&mut buf);
        } else {
            return Err(IrError::encode_failed(format!(
                "metadata of {} bytes exceeds the u16 length range",
                json.len()
            )));
        }
        buf.extend_from_slice(&json);
        writer.write_all(&buf)?;

        self.preamble_written = true;
        debug!(metadata_len = json.len(), "wrote stream preamble");
        Ok(())
    }

    /// Serialize one record.
    ///
    /// The record root must be a JSON object or array. On failure nothing
    /// is written and the schema tree is reverted to its pre-record state.
    pub fn encode_record(&mut self, writer: &mut impl IrWrite, record: &Json) -> Result<()> {
        if !self.preamble_written {
            return Err(IrError::not_ready("encode_record before write_preamble"));
        }
        if self.eos_written {
            return Err(IrError::not_ready("encode_record after end of stream"));
        }

        self.schema.snapshot();
        match self.encode_record_inner(record) {
            Ok(bytes) => writer.write_all(&bytes),
            Err(e) => {
                self.schema.revert()?;
                Err(e)
            }
        }
    }

    /// Terminate the stream.
    pub fn write_end_of_stream(&mut self, writer: &mut impl IrWrite) -> Result<()> {
        if !self.preamble_written {
            return Err(IrError::not_ready("end of stream before write_preamble"));
        }
        if self.eos_written {
            return Err(IrError::not_ready("end of stream already written"));
        }
        writer.write_all(&[crate::protocol::EOF])?;
        self.eos_written = true;
        Ok(())
    }

    // --- Record body ---

    fn encode_record_inner(&mut self, record: &Json) -> Result<Vec<u8>> {
        let mut walk = RecordWalk::default();
        match record {
            Json::Object(map) => {
                for (key, child) in map {
                    self.walk_entry(ROOT_ID, key, child, &mut walk)?;
                }
            }
            // A root-level array occupies a single unnamed Array node
            // under the root.
            Json::Array(_) => self.walk_entry(ROOT_ID, "", record, &mut walk)?,
            other => {
                return Err(IrError::encode_failed(format!(
                    "record root must be an object or array, got {other}"
                )));
            }
        }

        let mut out = Vec::new();
        for &id in &walk.inserted_ids {
            self.schema.get(id)?.write_announcement(&mut out)?;
            trace!(id, "announced schema node");
        }
        if walk.key_buf.is_empty() {
            out.push(tag::VALUE_EMPTY);
        } else {
            out.extend_from_slice(&walk.key_buf);
            out.extend_from_slice(&walk.value_buf);
        }
        out.push(tag::RECORD_DELIM);
        Ok(out)
    }

    /// Visit one `(key, child)` entry under `parent_id`, growing the
    /// schema and the walk buffers.
    fn walk_entry(
        &mut self,
        parent_id: NodeId,
        key: &str,
        child: &Json,
        walk: &mut RecordWalk,
    ) -> Result<()> {
        match child {
            Json::Object(map) if !map.is_empty() => {
                let id = self.claim_node(parent_id, key, NodeType::Obj, walk)?;
                for (child_key, grandchild) in map {
                    self.walk_entry(id, child_key, grandchild, walk)?;
                }
            }
            Json::Object(_) => {
                let id = self.claim_node(parent_id, key, NodeType::Obj, walk)?;
                push_key_id(id, &mut walk.key_buf)?;
                walk.value_buf.push(tag::EMPTY_OBJ);
            }
            Json::Array(items) if items.is_empty() => {
                let id = self.claim_node(parent_id, key, NodeType::Array, walk)?;
                push_key_id(id, &mut walk.key_buf)?;
                walk.value_buf.push(tag::EMPTY_ARRAY);
            }
            Json::Array(_) => {
                let id = self.claim_node(parent_id, key, NodeType::Array, walk)?;
                push_key_id(id, &mut walk.key_buf)?;
                walk.value_buf.push(tag::ARRAY_BEGIN);
                let json_text = serde_json::to_string(child)?;
                let clp = encode_clp_string(&json_text, VarWidth::FourByte);
                walk.value_buf.push(tag::VALUE_CLP_FOUR_BYTE);
                clp.write_payload(&mut walk.value_buf)?;
                walk.value_buf.push(tag::ARRAY_END);
            }
            Json::Null => {
                let id = self.claim_node(parent_id, key, NodeType::Obj, walk)?;
                push_key_id(id, &mut walk.key_buf)?;
                walk.value_buf.push(tag::VALUE_NULL);
            }
            Json::Bool(b) => {
                let id = self.claim_node(parent_id, key, NodeType::Bool, walk)?;
                push_key_id(id, &mut walk.key_buf)?;
                walk.value_buf.push(if *b { tag::VALUE_TRUE } else { tag::VALUE_FALSE });
            }
            Json::Number(n) => {
                if let Some(value) = n.as_i64() {
                    let id = self.claim_node(parent_id, key, NodeType::Int, walk)?;
                    push_key_id(id, &mut walk.key_buf)?;
                    let prev = self.schema.prev_val(id)?;
                    write_int(value.wrapping_sub(prev), &mut walk.value_buf);
                    self.schema.set_prev_val(id, value)?;
                } else if n.is_u64() {
                    // as_f64 would accept these with silent precision loss.
                    return Err(IrError::encode_failed(format!(
                        "integer {n} is outside the i64 encodable range"
                    )));
                } else if let Some(value) = n.as_f64() {
                    let id = self.claim_node(parent_id, key, NodeType::Float, walk)?;
                    push_key_id(id, &mut walk.key_buf)?;
                    walk.value_buf.push(tag::VALUE_DOUBLE);
                    value.put_be(&mut walk.value_buf);
                } else {
                    return Err(IrError::encode_failed(format!(
                        "number {n} is outside the i64/f64 encodable range"
                    )));
                }
            }
            Json::String(s) => {
                let id = self.claim_node(parent_id, key, NodeType::Str, walk)?;
                push_key_id(id, &mut walk.key_buf)?;
                // Tokenizable text (anything with a space) goes through the
                // CLP subcodec; opaque identifiers stay raw.
                if s.contains(' ') {
                    let clp = encode_clp_string(s, VarWidth::FourByte);
                    walk.value_buf.push(tag::VALUE_CLP_FOUR_BYTE);
                    clp.write_payload(&mut walk.value_buf)?;
                } else {
                    write_str(s, &mut walk.value_buf)?;
                }
            }
        }
        Ok(())
    }

    fn claim_node(
        &mut self,
        parent_id: NodeId,
        key: &str,
        node_type: NodeType,
        walk: &mut RecordWalk,
    ) -> Result<NodeId> {
        let (id, inserted) = self.schema.try_insert(parent_id, key, node_type)?;
        if inserted {
            walk.inserted_ids.push(id);
        }
        Ok(id)
    }
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-record scratch state of the DFS walk.
#[derive(Default)]
struct RecordWalk {
    key_buf: Vec<u8>,
    value_buf: Vec<u8>,
    inserted_ids: Vec<NodeId>,
}

/// Append a key-id reference with the smallest tag that fits.
fn push_key_id(id: NodeId, buf: &mut Vec<u8>) -> Result<()> {
    if id <= u8::MAX as usize {
        buf.push(tag::KEY_ID_UBYTE);
        (id as u8).put_be(buf);
    } else if id <= u16::MAX as usize {
        buf.push(tag::KEY_ID_USHORT);
        (id as u16).put_be(buf);
    } else {
        return Err(IrError::encode_failed(format!(
            "key id {id} exceeds the u16 reference range"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ready_serializer(out: &mut Vec<u8>) -> Serializer {
        let mut s = Serializer::new();
        s.write_preamble(out, "yyyy-MM-dd HH:mm:ss", "java", "UTC", 0).unwrap();
        s
    }

    // --- Lifecycle ---

    #[test]
    fn test_encode_before_preamble_is_not_ready() {
        let mut s = Serializer::new();
        let mut out = Vec::new();
        let err = s.encode_record(&mut out, &json!({})).unwrap_err();
        assert!(matches!(err, IrError::NotReady(_)));
    }

    #[test]
    fn test_encode_after_end_of_stream_is_not_ready() {
        let mut out = Vec::new();
        let mut s = ready_serializer(&mut out);
        s.write_end_of_stream(&mut out).unwrap();
        let err = s.encode_record(&mut out, &json!({})).unwrap_err();
        assert!(matches!(err, IrError::NotReady(_)));
    }

    #[test]
    fn test_preamble_layout() {
        let mut out = Vec::new();
        ready_serializer(&mut out);
        assert_eq!(out[..4], FOUR_BYTE_ENCODING_MAGIC);
        assert_eq!(out[4], meta_tag::ENCODING_JSON);
        assert_eq!(out[5], meta_tag::LENGTH_UBYTE);
        let len = out[6] as usize;
        assert_eq!(out.len(), 7 + len);
        let meta = Metadata::from_json_bytes(&out[7..]).unwrap();
        assert_eq!(meta.tz_id, "UTC");
    }

    #[test]
    fn test_stream_ends_with_eof_byte() {
        let mut out = Vec::new();
        let mut s = ready_serializer(&mut out);
        s.encode_record(&mut out, &json!({"a": 1})).unwrap();
        s.write_end_of_stream(&mut out).unwrap();
        assert_eq!(*out.last().unwrap(), crate::protocol::EOF);
    }

    // --- Record bodies ---

    #[test]
    fn test_empty_record_is_value_empty_marker() {
        let mut out = Vec::new();
        let mut s = ready_serializer(&mut out);
        let preamble_len = out.len();
        s.encode_record(&mut out, &json!({})).unwrap();
        assert_eq!(out[preamble_len..], [tag::VALUE_EMPTY, tag::RECORD_DELIM]);
    }

    #[test]
    fn test_scalar_record_layout() {
        let mut out = Vec::new();
        let mut s = ready_serializer(&mut out);
        let preamble_len = out.len();
        s.encode_record(&mut out, &json!({"k4": 33})).unwrap();
        assert_eq!(
            out[preamble_len..],
            [
                // announcement of node 1 = (root, "k4", Int)
                tag::NODE_INT,
                tag::NODE_PARENT_ID_UBYTE,
                0x00,
                tag::NODE_NAME_LEN_UBYTE,
                0x02,
                b'k',
                b'4',
                // key list
                tag::KEY_ID_UBYTE,
                0x01,
                // value (delta from 0)
                tag::VALUE_INT8,
                33,
                tag::RECORD_DELIM,
            ]
        );
    }

    #[test]
    fn test_repeat_record_reuses_announced_nodes() {
        let mut out = Vec::new();
        let mut s = ready_serializer(&mut out);
        s.encode_record(&mut out, &json!({"k4": 33})).unwrap();
        let after_first = out.len();
        s.encode_record(&mut out, &json!({"k4": 33})).unwrap();
        // No announcement, key id 1, zero delta, delimiter.
        assert_eq!(
            out[after_first..],
            [tag::KEY_ID_UBYTE, 0x01, tag::VALUE_INT8, 0, tag::RECORD_DELIM]
        );
    }

    #[test]
    fn test_integer_delta_sequence_on_the_wire() {
        let mut out = Vec::new();
        let mut s = ready_serializer(&mut out);
        let mut deltas = Vec::new();
        for v in [100i64, 101, 102, 100, 0] {
            let start = out.len();
            s.encode_record(&mut out, &json!({"seq": v})).unwrap();
            let body = &out[start..];
            // Value sits between the key id and the delimiter.
            let value = &body[body.len() - 3..body.len() - 1];
            assert_eq!(value[0], tag::VALUE_INT8);
            deltas.push(value[1] as i8 as i64);
        }
        assert_eq!(deltas, [100, 1, 1, -2, -100]);
    }

    #[test]
    fn test_array_is_framed_and_clp_encoded() {
        let mut out = Vec::new();
        let mut s = ready_serializer(&mut out);
        let start = out.len();
        s.encode_record(&mut out, &json!({"a": [1, 2]})).unwrap();
        let body = &out[start..];
        let begin = body.iter().position(|&b| b == tag::ARRAY_BEGIN).unwrap();
        assert_eq!(body[begin + 1], tag::VALUE_CLP_FOUR_BYTE);
        assert_eq!(body[body.len() - 2], tag::ARRAY_END);
    }

    #[test]
    fn test_empty_containers_use_single_byte_markers() {
        let mut out = Vec::new();
        let mut s = ready_serializer(&mut out);
        let start = out.len();
        s.encode_record(&mut out, &json!({"o": {}, "a": []})).unwrap();
        let body = &out[start..];
        assert!(body.contains(&tag::EMPTY_OBJ));
        assert!(body.contains(&tag::EMPTY_ARRAY));
    }

    #[test]
    fn test_key_id_tag_boundaries() {
        for (id, expected) in [
            (0usize, vec![tag::KEY_ID_UBYTE, 0]),
            (255, vec![tag::KEY_ID_UBYTE, 255]),
            (256, vec![tag::KEY_ID_USHORT, 0x01, 0x00]),
            (65535, vec![tag::KEY_ID_USHORT, 0xff, 0xff]),
        ] {
            let mut buf = Vec::new();
            push_key_id(id, &mut buf).unwrap();
            assert_eq!(buf, expected, "id {id}");
        }
        let mut buf = Vec::new();
        let err = push_key_id(65536, &mut buf).unwrap_err();
        assert!(matches!(err, IrError::EncodeFailed(_)));
    }

    #[test]
    fn test_u64_beyond_i64_fails_and_reverts() {
        let mut out = Vec::new();
        let mut s = ready_serializer(&mut out);
        let before = out.len();
        let record = json!({"ok": 1, "big": u64::MAX});
        let err = s.encode_record(&mut out, &record).unwrap_err();
        assert!(matches!(err, IrError::EncodeFailed(_)));
        assert_eq!(out.len(), before, "nothing was written");
        assert_eq!(s.schema().size(), 1, "schema growth was reverted");
    }

    #[test]
    fn test_scalar_root_is_rejected() {
        let mut out = Vec::new();
        let mut s = ready_serializer(&mut out);
        let err = s.encode_record(&mut out, &json!(42)).unwrap_err();
        assert!(matches!(err, IrError::EncodeFailed(_)));
    }

    #[test]
    fn test_failed_record_restores_delta_registers() {
        let mut out = Vec::new();
        let mut s = ready_serializer(&mut out);
        s.encode_record(&mut out, &json!({"seq": 100})).unwrap();
        // "seq" leaf is walked (updating its register) before "bad" fails.
        let err = s
            .encode_record(&mut out, &json!({"seq": 500, "bad": u64::MAX}))
            .unwrap_err();
        assert!(matches!(err, IrError::EncodeFailed(_)));
        let start = out.len();
        s.encode_record(&mut out, &json!({"seq": 101})).unwrap();
        let body = &out[start..];
        // Delta is computed against 100, not the rolled-back 500.
        assert_eq!(body[body.len() - 3..body.len() - 1], [tag::VALUE_INT8, 1]);
    }
}
