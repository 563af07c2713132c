//! Legacy unstructured text stream codec.
//!
//! Before records were key-value trees, a stream carried plain log
//! messages: one CLP-encoded message per event plus a timestamp. The two
//! magic numbers in the preamble distinguish the variants — eight-byte
//! streams store absolute epoch-millisecond timestamps, four-byte streams
//! store deltas against the previous message (seeded by the preamble's
//! `REFERENCE_TIMESTAMP`) and pack variables into four-byte words.
//!
//! A text stream is `Preamble · Message* · 0x00`, where each message is a
//! CLP payload (variables, then logtype) followed by one timestamp field.

use tracing::debug;

use crate::clp::{decode_clp_string, encode_clp_string, ClpEncodedText, VarWidth};
use crate::error::{IrError, Result};
use crate::metadata::Metadata;
use crate::protocol::{
    metadata as meta_tag, tag, EIGHT_BYTE_ENCODING_MAGIC, EOF, FOUR_BYTE_ENCODING_MAGIC,
    MAGIC_NUMBER_LEN,
};
use crate::wire::{BeNumeric, IrRead, IrWrite};

/// One decoded log event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub message: String,
}

/// Outcome of [`LogEventDeserializer::decode_event`].
#[derive(Debug, PartialEq, Eq)]
pub enum DecodedEvent {
    Event(LogEvent),
    EndOfStream,
}

// ============================================================================
// Encoding
// ============================================================================

/// Streaming producer for one legacy text stream.
#[derive(Debug)]
pub struct LogEventSerializer {
    width: VarWidth,
    /// Previous timestamp, for four-byte delta encoding.
    prev_timestamp: i64,
    preamble_written: bool,
    eos_written: bool,
}

impl LogEventSerializer {
    /// Four-byte variant: delta timestamps, four-byte encoded variables.
    pub fn four_byte() -> Self {
        Self {
            width: VarWidth::FourByte,
            prev_timestamp: 0,
            preamble_written: false,
            eos_written: false,
        }
    }

    /// Eight-byte variant: absolute timestamps, eight-byte encoded
    /// variables.
    pub fn eight_byte() -> Self {
        Self {
            width: VarWidth::EightByte,
            ..Self::four_byte()
        }
    }

    /// Write the stream preamble. For the four-byte variant
    /// `reference_timestamp` seeds the delta chain; the eight-byte variant
    /// ignores it.
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
        let (magic, metadata) = match self.width {
            VarWidth::FourByte => (
                FOUR_BYTE_ENCODING_MAGIC,
                Metadata::new_four_byte(
                    timestamp_pattern,
                    timestamp_pattern_syntax,
                    tz_id,
                    reference_timestamp,
                ),
            ),
            VarWidth::EightByte => (
                EIGHT_BYTE_ENCODING_MAGIC,
                Metadata::new_eight_byte(timestamp_pattern, timestamp_pattern_syntax, tz_id),
            ),
        };
        let json = metadata.to_json_bytes()?;

        let mut buf = Vec::with_capacity(MAGIC_NUMBER_LEN + 4 + json.len());
        buf.extend_from_slice(&magic);
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

        self.prev_timestamp = reference_timestamp;
        self.preamble_written = true;
        debug!(metadata_len = json.len(), "wrote text stream preamble");
        Ok(())
    }

    /// Serialize one log event.
    pub fn encode_event(
        &mut self,
        writer: &mut impl IrWrite,
        timestamp: i64,
        message: &str,
    ) -> Result<()> {
        if !self.preamble_written {
            return Err(IrError::not_ready("encode_event before write_preamble"));
        }
        if self.eos_written {
            return Err(IrError::not_ready("encode_event after end of stream"));
        }

        let mut buf = Vec::new();
        let clp = encode_clp_string(message, self.width);
        clp.write_payload(&mut buf)?;
        match self.width {
            VarWidth::EightByte => {
                buf.push(tag::TIMESTAMP_VAL);
                timestamp.put_be(&mut buf);
            }
            VarWidth::FourByte => {
                write_timestamp_delta(timestamp.wrapping_sub(self.prev_timestamp), &mut buf);
                self.prev_timestamp = timestamp;
            }
        }
        writer.write_all(&buf)
    }

    /// Terminate the stream.
    pub fn write_end_of_stream(&mut self, writer: &mut impl IrWrite) -> Result<()> {
        if !self.preamble_written {
            return Err(IrError::not_ready("end of stream before write_preamble"));
        }
        if self.eos_written {
            return Err(IrError::not_ready("end of stream already written"));
        }
        writer.write_all(&[EOF])?;
        self.eos_written = true;
        Ok(())
    }
}

/// Append a timestamp delta with the smallest tag that fits.
fn write_timestamp_delta(delta: i64, buf: &mut Vec<u8>) {
    if i8::try_from(delta).is_ok() {
        buf.push(tag::TIMESTAMP_DELTA_BYTE);
        (delta as i8).put_be(buf);
    } else if i16::try_from(delta).is_ok() {
        buf.push(tag::TIMESTAMP_DELTA_SHORT);
        (delta as i16).put_be(buf);
    } else if i32::try_from(delta).is_ok() {
        buf.push(tag::TIMESTAMP_DELTA_INT);
        (delta as i32).put_be(buf);
    } else {
        buf.push(tag::TIMESTAMP_DELTA_LONG);
        delta.put_be(buf);
    }
}

// ============================================================================
// Decoding
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    AwaitPreamble,
    Streaming,
    Finished,
    Poisoned,
}

/// Streaming consumer for one legacy text stream. The variant is taken
/// from the magic number in the preamble.
#[derive(Debug)]
pub struct LogEventDeserializer {
    width: VarWidth,
    prev_timestamp: i64,
    state: State,
}

impl LogEventDeserializer {
    pub fn new() -> Self {
        Self {
            width: VarWidth::FourByte,
            prev_timestamp: 0,
            state: State::AwaitPreamble,
        }
    }

    /// Read and validate the stream preamble, returning its metadata.
    pub fn read_preamble(&mut self, reader: &mut impl IrRead) -> Result<Metadata> {
        if State::AwaitPreamble != self.state {
            return Err(IrError::not_ready("preamble already read"));
        }

        let mut magic = [0u8; MAGIC_NUMBER_LEN];
        reader.try_read_exact(&mut magic)?;
        let width = match magic {
            FOUR_BYTE_ENCODING_MAGIC => VarWidth::FourByte,
            EIGHT_BYTE_ENCODING_MAGIC => VarWidth::EightByte,
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

        if VarWidth::FourByte == width {
            let reference = metadata
                .reference_timestamp
                .as_deref()
                .ok_or_else(|| {
                    IrError::corrupt("four-byte-encoding stream is missing REFERENCE_TIMESTAMP")
                })?
                .parse::<i64>()
                .map_err(|_| IrError::corrupt("REFERENCE_TIMESTAMP is not an integer"))?;
            self.prev_timestamp = reference;
        }

        self.width = width;
        self.state = State::Streaming;
        debug!(version = %metadata.version, "accepted text stream preamble");
        Ok(metadata)
    }

    /// Decode the next log event, or consume the stream terminator.
    pub fn decode_event(&mut self, reader: &mut impl IrRead) -> Result<DecodedEvent> {
        match self.state {
            State::AwaitPreamble => {
                return Err(IrError::not_ready("decode_event before read_preamble"))
            }
            State::Poisoned => {
                return Err(IrError::not_ready(
                    "decoder is poisoned by an earlier failure",
                ))
            }
            State::Finished => return Ok(DecodedEvent::EndOfStream),
            State::Streaming => {}
        }

        match self.decode_event_inner(reader) {
            Ok(decoded) => Ok(decoded),
            Err(e) => {
                self.state = State::Poisoned;
                Err(e)
            }
        }
    }

    fn decode_event_inner(&mut self, reader: &mut impl IrRead) -> Result<DecodedEvent> {
        let first_tag: u8 = reader.try_read_numeric()?;
        if EOF == first_tag {
            self.state = State::Finished;
            return Ok(DecodedEvent::EndOfStream);
        }

        let clp = ClpEncodedText::read_payload_from(reader, self.width, first_tag)?;
        let message = decode_clp_string(&clp)?;
        let timestamp = self.read_timestamp(reader)?;
        Ok(DecodedEvent::Event(LogEvent { timestamp, message }))
    }

    fn read_timestamp(&mut self, reader: &mut impl IrRead) -> Result<i64> {
        let ts_tag: u8 = reader.try_read_numeric()?;
        match (self.width, ts_tag) {
            (VarWidth::EightByte, tag::TIMESTAMP_VAL) => reader.try_read_numeric::<i64>(),
            (VarWidth::FourByte, _) => {
                let delta = match ts_tag {
                    tag::TIMESTAMP_DELTA_BYTE => reader.try_read_numeric::<i8>()? as i64,
                    tag::TIMESTAMP_DELTA_SHORT => reader.try_read_numeric::<i16>()? as i64,
                    tag::TIMESTAMP_DELTA_INT => reader.try_read_numeric::<i32>()? as i64,
                    tag::TIMESTAMP_DELTA_LONG => reader.try_read_numeric::<i64>()?,
                    other => {
                        return Err(IrError::corrupt(format!(
                            "expected timestamp delta tag, got 0x{other:02x}"
                        )));
                    }
                };
                let timestamp = self.prev_timestamp.wrapping_add(delta);
                self.prev_timestamp = timestamp;
                Ok(timestamp)
            }
            (VarWidth::EightByte, other) => Err(IrError::corrupt(format!(
                "expected timestamp tag, got 0x{other:02x}"
            ))),
        }
    }
}

impl Default for LogEventDeserializer {
    fn default() -> Self {
        Self::new()
    }
}
