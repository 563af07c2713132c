//! CLP string subcodec.
//!
//! Tokenizable text (log messages, serialized arrays) is stored as a
//! *logtype* — the message with every variable token replaced by a
//! placeholder byte — plus the variables themselves, split into *encoded
//! variables* (integers/floats packed into fixed-width words) and
//! *dictionary variables* (raw byte strings). Repetitive messages collapse
//! to a shared logtype, which is what an outer compressor feeds on.
//!
//! The subcodec is exposed through a narrow seam:
//! [`encode_clp_string`] / [`decode_clp_string`] convert between text and
//! [`ClpEncodedText`], and [`ClpEncodedText::write_payload`] /
//! [`ClpEncodedText::read_payload`] move the triple across the wire. The
//! record codec treats the triple as opaque.

use crate::error::{IrError, Result};
use crate::protocol::clp_tag;
use crate::wire::{BeNumeric, IrRead};

// ============================================================================
// Types
// ============================================================================

/// Width of encoded variables in a CLP string payload.
///
/// Four-byte streams pack integer variables into i32 words and send
/// everything else to the dictionary; eight-byte streams pack i64 integers
/// and IEEE-754 doubles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarWidth {
    FourByte,
    EightByte,
}

impl VarWidth {
    /// Encoded-variable marker tag for this width.
    pub fn var_marker(self) -> u8 {
        match self {
            VarWidth::FourByte => clp_tag::VAR_FOUR_BYTE,
            VarWidth::EightByte => clp_tag::VAR_EIGHT_BYTE,
        }
    }
}

/// The output triple of the CLP string subcodec: logtype, encoded
/// variables (in text order), and dictionary variables (in text order).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClpEncodedText {
    width: VarWidth,
    logtype: Vec<u8>,
    encoded_vars: Vec<u64>,
    dict_vars: Vec<Vec<u8>>,
}

impl ClpEncodedText {
    pub fn width(&self) -> VarWidth {
        self.width
    }

    pub fn logtype(&self) -> &[u8] {
        &self.logtype
    }

    pub fn encoded_vars(&self) -> &[u64] {
        &self.encoded_vars
    }

    pub fn dict_vars(&self) -> &[Vec<u8>] {
        &self.dict_vars
    }
}

// ============================================================================
// Tokenization
// ============================================================================

/// Token characters are alphanumerics, the sign/point/joiner set, and all
/// non-ASCII bytes; everything else delimits. Keeping `.`, `-`, `+` and `_`
/// inside tokens lets numbers and identifiers survive intact.
#[inline]
fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'+' | b'_') || b >= 0x80
}

/// A token is a variable iff it contains a decimal digit.
#[inline]
fn is_variable(token: &[u8]) -> bool {
    token.iter().any(u8::is_ascii_digit)
}

/// Integer tokens become encoded variables only when the textual form
/// survives a parse/format round trip (no leading zeros, no `+`) and the
/// value fits the stream's variable width.
fn as_encoded_int(token: &[u8], width: VarWidth) -> Option<i64> {
    let text = std::str::from_utf8(token).ok()?;
    let value: i64 = text.parse().ok()?;
    if value.to_string() != text {
        return None;
    }
    match width {
        VarWidth::FourByte if i32::try_from(value).is_err() => None,
        _ => Some(value),
    }
}

/// Float tokens become encoded variables only in eight-byte streams, and
/// only when the textual form survives a parse/format round trip.
fn as_encoded_float(token: &[u8], width: VarWidth) -> Option<f64> {
    if VarWidth::FourByte == width {
        return None;
    }
    let text = std::str::from_utf8(token).ok()?;
    if !text.contains('.') {
        return None;
    }
    let value: f64 = text.parse().ok()?;
    if !value.is_finite() || value.to_string() != text {
        return None;
    }
    Some(value)
}

/// Append `bytes` to the logtype, escaping placeholder bytes and the
/// escape byte itself.
fn append_constant(bytes: &[u8], logtype: &mut Vec<u8>) {
    for &b in bytes {
        if matches!(
            b,
            clp_tag::PLACEHOLDER_INT
                | clp_tag::PLACEHOLDER_DICT
                | clp_tag::PLACEHOLDER_FLOAT
                | clp_tag::PLACEHOLDER_ESCAPE
        ) {
            logtype.push(clp_tag::PLACEHOLDER_ESCAPE);
        }
        logtype.push(b);
    }
}

// ============================================================================
// Encode / decode (text <-> triple)
// ============================================================================

/// Encode `text` into the CLP triple.
pub fn encode_clp_string(text: &str, width: VarWidth) -> ClpEncodedText {
    let bytes = text.as_bytes();
    let mut logtype = Vec::with_capacity(bytes.len());
    let mut encoded_vars = Vec::new();
    let mut dict_vars: Vec<Vec<u8>> = Vec::new();

    let mut pos = 0;
    while pos < bytes.len() {
        if !is_token_byte(bytes[pos]) {
            let start = pos;
            while pos < bytes.len() && !is_token_byte(bytes[pos]) {
                pos += 1;
            }
            append_constant(&bytes[start..pos], &mut logtype);
            continue;
        }

        let start = pos;
        while pos < bytes.len() && is_token_byte(bytes[pos]) {
            pos += 1;
        }
        let token = &bytes[start..pos];
        if !is_variable(token) {
            append_constant(token, &mut logtype);
        } else if let Some(value) = as_encoded_int(token, width) {
            logtype.push(clp_tag::PLACEHOLDER_INT);
            encoded_vars.push(match width {
                VarWidth::FourByte => (value as i32) as u32 as u64,
                VarWidth::EightByte => value as u64,
            });
        } else if let Some(value) = as_encoded_float(token, width) {
            logtype.push(clp_tag::PLACEHOLDER_FLOAT);
            encoded_vars.push(value.to_bits());
        } else {
            logtype.push(clp_tag::PLACEHOLDER_DICT);
            dict_vars.push(token.to_vec());
        }
    }

    ClpEncodedText {
        width,
        logtype,
        encoded_vars,
        dict_vars,
    }
}

/// Re-expand a CLP triple back into the original text.
pub fn decode_clp_string(encoded: &ClpEncodedText) -> Result<String> {
    let mut out: Vec<u8> = Vec::with_capacity(encoded.logtype.len());
    let mut next_encoded = encoded.encoded_vars.iter();
    let mut next_dict = encoded.dict_vars.iter();

    let mut iter = encoded.logtype.iter().copied();
    while let Some(b) = iter.next() {
        match b {
            clp_tag::PLACEHOLDER_ESCAPE => {
                let literal = iter
                    .next()
                    .ok_or_else(|| IrError::decode("dangling escape in logtype"))?;
                out.push(literal);
            }
            clp_tag::PLACEHOLDER_INT => {
                let raw = *next_encoded
                    .next()
                    .ok_or_else(|| IrError::decode("logtype references a missing encoded var"))?;
                let value = match encoded.width {
                    VarWidth::FourByte => (raw as u32 as i32) as i64,
                    VarWidth::EightByte => raw as i64,
                };
                out.extend_from_slice(value.to_string().as_bytes());
            }
            clp_tag::PLACEHOLDER_FLOAT => {
                if VarWidth::FourByte == encoded.width {
                    return Err(IrError::decode(
                        "float variables are not representable in four-byte streams",
                    ));
                }
                let raw = *next_encoded
                    .next()
                    .ok_or_else(|| IrError::decode("logtype references a missing encoded var"))?;
                out.extend_from_slice(f64::from_bits(raw).to_string().as_bytes());
            }
            clp_tag::PLACEHOLDER_DICT => {
                let var = next_dict
                    .next()
                    .ok_or_else(|| IrError::decode("logtype references a missing dict var"))?;
                out.extend_from_slice(var);
            }
            other => out.push(other),
        }
    }

    if next_encoded.next().is_some() || next_dict.next().is_some() {
        return Err(IrError::decode("unused variables after logtype expansion"));
    }
    String::from_utf8(out).map_err(|_| IrError::decode("expanded text is not valid UTF-8"))
}

// ============================================================================
// Wire payload
// ============================================================================

fn write_len_prefixed(
    base_tag_ubyte: u8,
    base_tag_ushort: u8,
    base_tag_uint: u8,
    bytes: &[u8],
    buf: &mut Vec<u8>,
) -> Result<()> {
    let len = bytes.len();
    if len <= u8::MAX as usize {
        buf.push(base_tag_ubyte);
        (len as u8).put_be(buf);
    } else if len <= u16::MAX as usize {
        buf.push(base_tag_ushort);
        (len as u16).put_be(buf);
    } else if len <= u32::MAX as usize {
        buf.push(base_tag_uint);
        (len as u32).put_be(buf);
    } else {
        return Err(IrError::encode_failed("CLP payload segment exceeds u32 length"));
    }
    buf.extend_from_slice(bytes);
    Ok(())
}

impl ClpEncodedText {
    /// Serialize the payload that follows the value tag: the variables in
    /// text order, then the logtype, whose length prefix terminates the
    /// value.
    pub fn write_payload(&self, buf: &mut Vec<u8>) -> Result<()> {
        let mut next_encoded = self.encoded_vars.iter();
        let mut next_dict = self.dict_vars.iter();

        let mut iter = self.logtype.iter().copied();
        while let Some(b) = iter.next() {
            match b {
                clp_tag::PLACEHOLDER_ESCAPE => {
                    iter.next();
                }
                clp_tag::PLACEHOLDER_INT | clp_tag::PLACEHOLDER_FLOAT => {
                    let raw = *next_encoded.next().ok_or_else(|| {
                        IrError::encode_failed("logtype/encoded-var count mismatch")
                    })?;
                    buf.push(self.width.var_marker());
                    match self.width {
                        VarWidth::FourByte => (raw as u32).put_be(buf),
                        VarWidth::EightByte => raw.put_be(buf),
                    }
                }
                clp_tag::PLACEHOLDER_DICT => {
                    let var = next_dict.next().ok_or_else(|| {
                        IrError::encode_failed("logtype/dict-var count mismatch")
                    })?;
                    write_len_prefixed(
                        clp_tag::VAR_STR_LEN_UBYTE,
                        clp_tag::VAR_STR_LEN_USHORT,
                        clp_tag::VAR_STR_LEN_UINT,
                        var,
                        buf,
                    )?;
                }
                _ => {}
            }
        }
        if next_encoded.next().is_some() || next_dict.next().is_some() {
            return Err(IrError::encode_failed("variables left over after logtype walk"));
        }

        write_len_prefixed(
            clp_tag::LOGTYPE_LEN_UBYTE,
            clp_tag::LOGTYPE_LEN_USHORT,
            clp_tag::LOGTYPE_LEN_UINT,
            &self.logtype,
            buf,
        )
    }

    /// Deserialize a payload written by [`write_payload`]: variable entries
    /// until a logtype length prefix, then the logtype bytes.
    ///
    /// [`write_payload`]: ClpEncodedText::write_payload
    pub fn read_payload(reader: &mut impl IrRead, width: VarWidth) -> Result<Self> {
        let first_tag = reader.try_read_numeric()?;
        Self::read_payload_from(reader, width, first_tag)
    }

    /// [`read_payload`](ClpEncodedText::read_payload) for callers that have
    /// already consumed the payload's first tag (the legacy text-stream
    /// decoder reads one tag ahead to spot the stream terminator).
    pub fn read_payload_from(
        reader: &mut impl IrRead,
        width: VarWidth,
        first_tag: u8,
    ) -> Result<Self> {
        let mut encoded_vars = Vec::new();
        let mut dict_vars = Vec::new();

        let mut tag = first_tag;
        loop {
            match tag {
                t if t == width.var_marker() => {
                    let raw = match width {
                        VarWidth::FourByte => reader.try_read_numeric::<u32>()? as u64,
                        VarWidth::EightByte => reader.try_read_numeric::<u64>()?,
                    };
                    encoded_vars.push(raw);
                }
                clp_tag::VAR_STR_LEN_UBYTE => {
                    let len = reader.try_read_numeric::<u8>()? as usize;
                    dict_vars.push(reader.try_read_bytes(len)?);
                }
                clp_tag::VAR_STR_LEN_USHORT => {
                    let len = reader.try_read_numeric::<u16>()? as usize;
                    dict_vars.push(reader.try_read_bytes(len)?);
                }
                clp_tag::VAR_STR_LEN_UINT => {
                    let len = reader.try_read_numeric::<u32>()? as usize;
                    dict_vars.push(reader.try_read_bytes(len)?);
                }
                clp_tag::LOGTYPE_LEN_UBYTE => {
                    let len = reader.try_read_numeric::<u8>()? as usize;
                    let logtype = reader.try_read_bytes(len)?;
                    return Ok(Self { width, logtype, encoded_vars, dict_vars });
                }
                clp_tag::LOGTYPE_LEN_USHORT => {
                    let len = reader.try_read_numeric::<u16>()? as usize;
                    let logtype = reader.try_read_bytes(len)?;
                    return Ok(Self { width, logtype, encoded_vars, dict_vars });
                }
                clp_tag::LOGTYPE_LEN_UINT => {
                    let len = reader.try_read_numeric::<u32>()? as usize;
                    let logtype = reader.try_read_bytes(len)?;
                    return Ok(Self { width, logtype, encoded_vars, dict_vars });
                }
                other => {
                    return Err(IrError::decode(format!(
                        "unexpected tag 0x{other:02x} in CLP payload at offset {}",
                        reader.position()
                    )));
                }
            }
            tag = reader.try_read_numeric()?;
        }
    }
}
