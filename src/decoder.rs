//! Record deserializer: the consumer half of the codec.
//!
//! The decoder mirrors the producer's schema tree by applying the in-band
//! node announcements in stream order, then reassembles each record from
//! its key-id list and positional values. Every tag, length, and value
//! type is validated against the mirrored tree; after each accepted record
//! the consumer tree is structurally identical to the producer's.
//!
//! Per record the tag stream drives a small state machine:
//! announcements (`ExpectSchemaOrKey`), then key ids (`ExpectMoreKeys`),
//! then one value per key id (`ExpectValues`), then the record delimiter.
//! Any unexpected tag fails the record, and a failed record poisons the
//! decoder — the partially-grown tree cannot be resynchronized with the
//! producer, so recovery means discarding the decoder.

use hashbrown::HashMap;
use serde_json::Value as Json;
use tracing::{debug, trace};

use crate::clp::decode_clp_string;
use crate::error::{IrError, Result};
use crate::metadata::Metadata;
use crate::protocol::{
    metadata as meta_tag, tag, EIGHT_BYTE_ENCODING_MAGIC, EOF, FOUR_BYTE_ENCODING_MAGIC,
    MAGIC_NUMBER_LEN,
};
use crate::schema::{EvolutionMode, NodeId, NodeType, SchemaTree, ROOT_ID};
use crate::value::{read_value, Value};
use crate::wire::IrRead;

/// Outcome of [`Deserializer::decode_record`].
#[derive(Debug, PartialEq)]
pub enum Decoded {
    Record(Json),
    /// The stream terminator was consumed; the stream is complete.
    EndOfStream,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    AwaitPreamble,
    Streaming,
    Finished,
    Poisoned,
}

/// Streaming consumer for one IR stream.
///
/// Holds the consumer-side schema tree for the lifetime of the stream. The
/// tree is permissive: growth that a strict producer would refuse is
/// accepted, because the stream has already been emitted.
#[derive(Debug)]
pub struct Deserializer {
    schema: SchemaTree,
    state: State,
}

impl Deserializer {
    pub fn new() -> Self {
        Self {
            schema: SchemaTree::new(EvolutionMode::Permissive),
            state: State::AwaitPreamble,
        }
    }

    /// The consumer-side schema tree.
    pub fn schema(&self) -> &SchemaTree {
        &self.schema
    }

    /// Read and validate the stream preamble, returning its metadata.
    pub fn read_preamble(&mut self, reader: &mut impl IrRead) -> Result<Metadata> {
        if State::AwaitPreamble != self.state {
            return Err(IrError::not_ready("preamble already read"));
        }

        let mut magic = [0u8; MAGIC_NUMBER_LEN];
        reader.try_read_exact(&mut magic)?;
        let four_byte = match magic {
            FOUR_BYTE_ENCODING_MAGIC => true,
            EIGHT_BYTE_ENCODING_MAGIC => false,
            _ => return Err(IrError::corrupt(format!("bad magic number {magic:02x?}"))),
        };

        let encoding: u8 = reader.try_read_numeric()?;
        if meta_tag::ENCODING_JSON != encoding {
            return Err(IrError::corrupt(format!(
                "unsupported metadata encoding 0x{encoding:02x}"
            )));
        }
        let len_tag: u8 = reader.try_read_numeric()?;
        let len = match len_tag {
            meta_tag::LENGTH_UBYTE => reader.try_read_numeric::<u8>()? as usize,
            meta_tag::LENGTH_USHORT => reader.try_read_numeric::<u16>()? as usize,
            other => {
                return Err(IrError::corrupt(format!(
                    "bad metadata length tag 0x{other:02x}"
                )));
            }
        };
        let json = reader.try_read_bytes(len)?;
        let metadata = Metadata::from_json_bytes(&json)?;
        metadata.check_version()?;
        if four_byte && metadata.reference_timestamp.is_none() {
            return Err(IrError::corrupt(
                "four-byte-encoding stream is missing REFERENCE_TIMESTAMP",
            ));
        }

        self.state = State::Streaming;
        debug!(version = %metadata.version, "accepted stream preamble");
        Ok(metadata)
    }

    /// Decode the next record, or consume the stream terminator.
    pub fn decode_record(&mut self, reader: &mut impl IrRead) -> Result<Decoded> {
        match self.state {
            State::AwaitPreamble => {
                return Err(IrError::not_ready("decode_record before read_preamble"))
            }
            State::Poisoned => {
                return Err(IrError::not_ready(
                    "decoder is poisoned by an earlier failure",
                ))
            }
            // Bytes after the terminator are ignored.
            State::Finished => return Ok(Decoded::EndOfStream),
            State::Streaming => {}
        }

        match self.decode_record_inner(reader) {
            Ok(decoded) => Ok(decoded),
            Err(e) => {
                self.state = State::Poisoned;
                Err(e)
            }
        }
    }

    fn decode_record_inner(&mut self, reader: &mut impl IrRead) -> Result<Decoded> {
        // Schema growth phase.
        let mut next = reader.try_read_numeric::<u8>()?;
        loop {
            if EOF == next {
                self.state = State::Finished;
                return Ok(Decoded::EndOfStream);
            }
            if !tag::is_schema_node_type(next) {
                break;
            }
            self.apply_announcement(reader, next)?;
            next = reader.try_read_numeric::<u8>()?;
        }

        // Key-id list.
        let mut ids: Vec<NodeId> = Vec::new();
        while tag::is_key_id(next) {
            let id = match next {
                tag::KEY_ID_UBYTE => reader.try_read_numeric::<u8>()? as NodeId,
                _ => reader.try_read_numeric::<u16>()? as NodeId,
            };
            if id >= self.schema.size() {
                return Err(IrError::corrupt(format!(
                    "key id {id} references past the end of the schema"
                )));
            }
            ids.push(id);
            next = reader.try_read_numeric::<u8>()?;
        }

        if ids.is_empty() {
            if tag::VALUE_EMPTY != next {
                return Err(IrError::corrupt(format!(
                    "expected empty-record marker, got tag 0x{next:02x}"
                )));
            }
            self.expect_record_delim(reader)?;
            return Ok(Decoded::Record(Json::Object(serde_json::Map::new())));
        }

        // Value phase: one value per key id, in order. The tag that ended
        // the key loop introduces the first value.
        let mut values = Vec::with_capacity(ids.len());
        for (idx, &id) in ids.iter().enumerate() {
            let value_tag = if 0 == idx {
                next
            } else {
                reader.try_read_numeric::<u8>()?
            };
            let value = self.read_checked_value(reader, value_tag, id)?;
            values.push(value);
        }
        self.expect_record_delim(reader)?;

        let record = self.reassemble(&ids, values)?;
        Ok(Decoded::Record(record))
    }

    /// Consume one schema-node announcement whose type tag has already
    /// been read, and grow the mirror tree.
    fn apply_announcement(&mut self, reader: &mut impl IrRead, type_tag: u8) -> Result<()> {
        let node_type =
            NodeType::from_wire_tag(type_tag).expect("caller dispatched on a type tag");

        let parent_tag: u8 = reader.try_read_numeric()?;
        let parent_id = match parent_tag {
            tag::NODE_PARENT_ID_UBYTE => reader.try_read_numeric::<u8>()? as NodeId,
            tag::NODE_PARENT_ID_USHORT => reader.try_read_numeric::<u16>()? as NodeId,
            other => {
                return Err(IrError::corrupt(format!(
                    "expected parent-id tag in announcement, got 0x{other:02x}"
                )));
            }
        };

        let len_tag: u8 = reader.try_read_numeric()?;
        let name_len = match len_tag {
            tag::NODE_NAME_LEN_UBYTE => reader.try_read_numeric::<u8>()? as usize,
            tag::NODE_NAME_LEN_USHORT => reader.try_read_numeric::<u16>()? as usize,
            other => {
                return Err(IrError::corrupt(format!(
                    "expected name-length tag in announcement, got 0x{other:02x}"
                )));
            }
        };
        let mut key_name = String::new();
        reader.try_read_string(name_len, &mut key_name)?;

        if self.schema.lookup(parent_id, &key_name, node_type).is_some() {
            return Err(IrError::corrupt(format!(
                "announcement duplicates schema node ({parent_id}, {key_name:?})"
            )));
        }
        let id = self.schema.insert(parent_id, &key_name, node_type)?;
        trace!(id, parent_id, key = %key_name, "grew schema tree");
        Ok(())
    }

    /// Read a value, validate it against the schema node it lands on, and
    /// resolve integer deltas.
    fn read_checked_value(
        &mut self,
        reader: &mut impl IrRead,
        value_tag: u8,
        id: NodeId,
    ) -> Result<Value> {
        let value = if tag::ARRAY_BEGIN == value_tag {
            let inner_tag: u8 = reader.try_read_numeric()?;
            let inner = read_value(reader, inner_tag)?;
            if !matches!(inner, Value::ClpStr(_)) {
                return Err(IrError::corrupt(
                    "array frame must contain a CLP-encoded string",
                ));
            }
            let end: u8 = reader.try_read_numeric()?;
            if tag::ARRAY_END != end {
                return Err(IrError::corrupt(format!(
                    "array frame not terminated, got tag 0x{end:02x}"
                )));
            }
            inner
        } else {
            read_value(reader, value_tag)?
        };

        let node = self.schema.get(id)?;
        if !value.matches_node_type(node.node_type()) {
            return Err(IrError::corrupt(format!(
                "value {value:?} does not match node {} of type {:?}",
                id,
                node.node_type()
            )));
        }

        if let Value::Int(delta) = value {
            let curr = self.schema.prev_val(id)?.wrapping_add(delta);
            self.schema.set_prev_val(id, curr)?;
            return Ok(Value::Int(curr));
        }
        Ok(value)
    }

    fn expect_record_delim(&mut self, reader: &mut impl IrRead) -> Result<()> {
        let delim: u8 = reader.try_read_numeric()?;
        if tag::RECORD_DELIM != delim {
            return Err(IrError::corrupt(format!(
                "record not terminated, got tag 0x{delim:02x}"
            )));
        }
        Ok(())
    }

    // --- Reconstruction ---

    /// Materialize the record tree from leaf ids and their values by
    /// walking each id back to the root through parent links. Interior
    /// `Obj` nodes shared by several leaves are materialized once.
    fn reassemble(&self, ids: &[NodeId], values: Vec<Value>) -> Result<Json> {
        let mut leaf_values: HashMap<NodeId, Value> = HashMap::with_capacity(ids.len());
        for (&id, value) in ids.iter().zip(values) {
            if leaf_values.insert(id, value).is_some() {
                return Err(IrError::corrupt(format!(
                    "key id {id} appears twice in one record"
                )));
            }
        }

        // A root-level array rides as a single unnamed Array leaf.
        if 1 == ids.len() {
            let node = self.schema.get(ids[0])?;
            if ROOT_ID == node.parent_id()
                && node.key_name().is_empty()
                && NodeType::Array == node.node_type()
            {
                return self.render_leaf(ids[0], &leaf_values[&ids[0]]);
            }
        }

        let mut reachable = vec![false; self.schema.size()];
        for &id in ids {
            let mut cursor = id;
            while ROOT_ID != cursor && !reachable[cursor] {
                reachable[cursor] = true;
                cursor = self.schema.get(cursor)?.parent_id();
            }
        }

        self.render_object(ROOT_ID, &reachable, &leaf_values)
    }

    fn render_object(
        &self,
        node_id: NodeId,
        reachable: &[bool],
        leaf_values: &HashMap<NodeId, Value>,
    ) -> Result<Json> {
        let node = self.schema.get(node_id)?;
        let mut map = serde_json::Map::new();
        for &child_id in node.children() {
            if !reachable[child_id] {
                continue;
            }
            let child = self.schema.get(child_id)?;
            let rendered = if let Some(value) = leaf_values.get(&child_id) {
                if child.children().iter().any(|&grandchild| reachable[grandchild]) {
                    return Err(IrError::corrupt(format!(
                        "node {child_id} is both a leaf and an interior object"
                    )));
                }
                self.render_leaf(child_id, value)?
            } else {
                self.render_object(child_id, reachable, leaf_values)?
            };
            map.insert(child.key_name().to_string(), rendered);
        }
        Ok(Json::Object(map))
    }

    fn render_leaf(&self, id: NodeId, value: &Value) -> Result<Json> {
        let node_type = self.schema.get(id)?.node_type();
        let json = match value {
            Value::Null => Json::Null,
            Value::Int(v) => Json::from(*v),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(Json::Number)
                .ok_or_else(|| IrError::corrupt("non-finite float is not representable"))?,
            Value::Bool(b) => Json::Bool(*b),
            Value::Str(s) => Json::String(s.clone()),
            Value::EmptyObj => Json::Object(serde_json::Map::new()),
            Value::EmptyArray => Json::Array(Vec::new()),
            Value::ClpStr(clp) => {
                let text = decode_clp_string(clp)?;
                if NodeType::Array == node_type {
                    let parsed: Json = serde_json::from_str(&text)
                        .map_err(|e| IrError::decode(format!("array payload is not JSON: {e}")))?;
                    if !parsed.is_array() {
                        return Err(IrError::decode("array payload decoded to a non-array"));
                    }
                    parsed
                } else {
                    Json::String(text)
                }
            }
        };
        Ok(json)
    }
}

impl Default for Deserializer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Serializer;
    use crate::wire::SliceReader;
    use serde_json::json;

    fn encode_stream(records: &[Json]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut s = Serializer::new();
        s.write_preamble(&mut out, "yyyy-MM-dd HH:mm:ss", "java", "UTC", 0).unwrap();
        for record in records {
            s.encode_record(&mut out, record).unwrap();
        }
        s.write_end_of_stream(&mut out).unwrap();
        out
    }

    fn decode_all(bytes: &[u8]) -> Vec<Json> {
        let mut reader = SliceReader::new(bytes);
        let mut d = Deserializer::new();
        d.read_preamble(&mut reader).unwrap();
        let mut records = Vec::new();
        loop {
            match d.decode_record(&mut reader).unwrap() {
                Decoded::Record(r) => records.push(r),
                Decoded::EndOfStream => return records,
            }
        }
    }

    // --- Lifecycle ---

    #[test]
    fn test_decode_before_preamble_is_not_ready() {
        let mut d = Deserializer::new();
        let mut reader = SliceReader::new(&[]);
        let err = d.decode_record(&mut reader).unwrap_err();
        assert!(matches!(err, IrError::NotReady(_)));
    }

    #[test]
    fn test_bytes_after_terminator_are_ignored() {
        let mut bytes = encode_stream(&[json!({"a": 1})]);
        bytes.extend_from_slice(b"trailing garbage");
        let mut reader = SliceReader::new(&bytes);
        let mut d = Deserializer::new();
        d.read_preamble(&mut reader).unwrap();
        assert!(matches!(d.decode_record(&mut reader).unwrap(), Decoded::Record(_)));
        assert_eq!(d.decode_record(&mut reader).unwrap(), Decoded::EndOfStream);
        assert_eq!(d.decode_record(&mut reader).unwrap(), Decoded::EndOfStream);
    }

    #[test]
    fn test_bad_magic_is_corrupt() {
        let mut bytes = encode_stream(&[]);
        bytes[0] ^= 0xff;
        let mut reader = SliceReader::new(&bytes);
        let err = Deserializer::new().read_preamble(&mut reader).unwrap_err();
        assert!(matches!(err, IrError::Corrupt(_)));
    }

    #[test]
    fn test_poisoned_decoder_stays_poisoned() {
        let mut bytes = encode_stream(&[json!({"a": 1})]);
        // Truncate mid-record.
        bytes.truncate(bytes.len() - 3);
        let mut reader = SliceReader::new(&bytes);
        let mut d = Deserializer::new();
        d.read_preamble(&mut reader).unwrap();
        assert!(d.decode_record(&mut reader).is_err());
        let err = d.decode_record(&mut reader).unwrap_err();
        assert!(matches!(err, IrError::NotReady(_)));
    }

    // --- Record decode ---

    #[test]
    fn test_decode_empty_record() {
        let records = decode_all(&encode_stream(&[json!({})]));
        assert_eq!(records, [json!({})]);
    }

    #[test]
    fn test_decode_nested_record() {
        let record = json!({"a": {"b": {"c": 1}}, "d": "x"});
        let records = decode_all(&encode_stream(&[record.clone()]));
        assert_eq!(records, [record]);
    }

    #[test]
    fn test_shared_interior_nodes_are_deduplicated() {
        let record = json!({"outer": {"x": 1, "y": 2.5, "z": null}});
        let records = decode_all(&encode_stream(&[record.clone()]));
        assert_eq!(records, [record]);
    }

    #[test]
    fn test_consumer_tree_mirrors_producer_tree() {
        let streams = [
            json!({"k1": "v", "k0": {"k1": {"k2": false}}}),
            json!({"k1": 31, "k0": {"k1": {"k2": "f"}}}),
        ];
        let mut out = Vec::new();
        let mut s = Serializer::new();
        s.write_preamble(&mut out, "", "", "UTC", 0).unwrap();
        let mut d = Deserializer::new();
        let mut consumed = 0;
        for record in &streams {
            s.encode_record(&mut out, record).unwrap();
            let mut reader = SliceReader::new(&out[consumed..]);
            if 0 == consumed {
                d.read_preamble(&mut reader).unwrap();
            }
            d.decode_record(&mut reader).unwrap();
            consumed += reader.position();
            assert_eq!(s.schema(), d.schema(), "trees diverged after a record");
        }
    }

    #[test]
    fn test_duplicate_announcement_is_corrupt() {
        let bytes = encode_stream(&[json!({"a": 1})]);
        let mut reader = SliceReader::new(&bytes);
        let mut d = Deserializer::new();
        d.read_preamble(&mut reader).unwrap();
        // Replay the same record body twice: the second copy re-announces
        // the same (parent, name, type) triple, which must be rejected.
        let body_start = reader.position();
        let body_end = bytes.len() - 1; // strip the stream terminator
        let mut replay = bytes[body_start..body_end].to_vec();
        replay.extend_from_slice(&bytes[body_start..body_end]);
        let mut reader = SliceReader::new(&replay);
        d.decode_record(&mut reader).unwrap();
        let err = d.decode_record(&mut reader).unwrap_err();
        assert!(matches!(err, IrError::Corrupt(_)));
    }

    #[test]
    fn test_key_id_past_schema_end_is_corrupt() {
        let bytes = encode_stream(&[json!({})]);
        let mut reader = SliceReader::new(&bytes);
        let mut d = Deserializer::new();
        d.read_preamble(&mut reader).unwrap();
        let record_start = reader.position();
        // Hand-craft a record referencing node 9 of a one-node schema.
        let mut crafted = bytes[..record_start].to_vec();
        crafted.extend_from_slice(&[tag::KEY_ID_UBYTE, 9, tag::VALUE_NULL, tag::RECORD_DELIM]);
        let mut reader = SliceReader::new(&crafted);
        let mut d = Deserializer::new();
        d.read_preamble(&mut reader).unwrap();
        let err = d.decode_record(&mut reader).unwrap_err();
        assert!(matches!(err, IrError::Corrupt(_)));
    }

    #[test]
    fn test_type_mismatch_is_corrupt() {
        let bytes = encode_stream(&[json!({"n": 1})]);
        let mut reader = SliceReader::new(&bytes);
        let mut d = Deserializer::new();
        d.read_preamble(&mut reader).unwrap();
        let record_start = reader.position();
        // Re-issue the announcement, then pair the Int node with a bool.
        let body = &bytes[record_start..bytes.len() - 1];
        let mut crafted = bytes[..record_start].to_vec();
        let announcement_len = 6; // parent tag+id, type, len tag+len, "n"
        crafted.extend_from_slice(&body[..announcement_len]);
        crafted.extend_from_slice(&[tag::KEY_ID_UBYTE, 1, tag::VALUE_TRUE, tag::RECORD_DELIM]);
        let mut reader = SliceReader::new(&crafted);
        let mut d = Deserializer::new();
        d.read_preamble(&mut reader).unwrap();
        let err = d.decode_record(&mut reader).unwrap_err();
        assert!(matches!(err, IrError::Corrupt(_)));
    }
}
