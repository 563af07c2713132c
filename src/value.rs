//! Tagged scalar values and their wire codec.
//!
//! A [`Value`] is what sits at a leaf of a record: a scalar, an explicit
//! null, a CLP-encoded string, or an empty-container marker. Every value is
//! self-describing on the wire — one tag byte, then the payload the tag
//! dictates.
//!
//! Integer leaves are delta-encoded per schema node (the encoder emits
//! `curr - prev`, the decoder adds it back); the functions here encode and
//! decode whatever integer they are handed, and the record codec owns the
//! delta registers.

use crate::clp::{ClpEncodedText, VarWidth};
use crate::error::{IrError, Result};
use crate::protocol::tag;
use crate::schema::NodeType;
use crate::wire::{BeNumeric, IrRead};

/// A decoded leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Explicit null; occupies an `Obj`-typed schema node.
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Raw (length-prefixed) string.
    Str(String),
    /// CLP-encoded string; matches `Str` nodes (tokenizable text) and
    /// `Array` nodes (arrays ride as CLP-encoded JSON).
    ClpStr(ClpEncodedText),
    /// `{}` leaf.
    EmptyObj,
    /// `[]` leaf.
    EmptyArray,
}

impl Value {
    /// Whether this value may occupy a schema node of `node_type`, per the
    /// fixed mapping: `Int→Int`, `Float→Float`, `Bool→Bool`,
    /// `Str↔{Str,ClpStr}`, `Null/EmptyObj↔Obj`, `ClpStr/EmptyArray↔Array`.
    pub fn matches_node_type(&self, node_type: NodeType) -> bool {
        match self {
            Value::Null | Value::EmptyObj => NodeType::Obj == node_type,
            Value::Int(_) => NodeType::Int == node_type,
            Value::Float(_) => NodeType::Float == node_type,
            Value::Bool(_) => NodeType::Bool == node_type,
            Value::Str(_) => NodeType::Str == node_type,
            Value::ClpStr(_) => matches!(node_type, NodeType::Str | NodeType::Array),
            Value::EmptyArray => NodeType::Array == node_type,
        }
    }

    /// Schema node type a record leaf of this value takes when first
    /// inserted.
    pub fn insertion_node_type(&self) -> NodeType {
        match self {
            Value::Null | Value::EmptyObj => NodeType::Obj,
            Value::Int(_) => NodeType::Int,
            Value::Float(_) => NodeType::Float,
            Value::Bool(_) => NodeType::Bool,
            Value::Str(_) => NodeType::Str,
            Value::ClpStr(_) | Value::EmptyArray => NodeType::Array,
        }
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Append a signed integer with the smallest tag that fits.
pub fn write_int(value: i64, buf: &mut Vec<u8>) {
    if i8::try_from(value).is_ok() {
        buf.push(tag::VALUE_INT8);
        (value as i8).put_be(buf);
    } else if i16::try_from(value).is_ok() {
        buf.push(tag::VALUE_INT16);
        (value as i16).put_be(buf);
    } else if i32::try_from(value).is_ok() {
        buf.push(tag::VALUE_INT32);
        (value as i32).put_be(buf);
    } else {
        buf.push(tag::VALUE_INT64);
        value.put_be(buf);
    }
}

/// Append a raw string with the smallest length prefix that fits.
pub fn write_str(s: &str, buf: &mut Vec<u8>) -> Result<()> {
    let len = s.len();
    if len <= u8::MAX as usize {
        buf.push(tag::LENGTH_UBYTE);
        (len as u8).put_be(buf);
    } else if len <= u16::MAX as usize {
        buf.push(tag::LENGTH_USHORT);
        (len as u16).put_be(buf);
    } else if len <= u32::MAX as usize {
        buf.push(tag::LENGTH_UINT);
        (len as u32).put_be(buf);
    } else {
        return Err(IrError::encode_failed(format!(
            "string of {len} bytes exceeds the u32 length range"
        )));
    }
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Append one value, tag first.
pub fn write_value(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Null => buf.push(tag::VALUE_NULL),
        Value::Int(v) => write_int(*v, buf),
        Value::Float(v) => {
            buf.push(tag::VALUE_DOUBLE);
            v.put_be(buf);
        }
        Value::Bool(true) => buf.push(tag::VALUE_TRUE),
        Value::Bool(false) => buf.push(tag::VALUE_FALSE),
        Value::Str(s) => write_str(s, buf)?,
        Value::ClpStr(clp) => {
            buf.push(match clp.width() {
                VarWidth::FourByte => tag::VALUE_CLP_FOUR_BYTE,
                VarWidth::EightByte => tag::VALUE_CLP_EIGHT_BYTE,
            });
            clp.write_payload(buf)?;
        }
        Value::EmptyObj => buf.push(tag::EMPTY_OBJ),
        Value::EmptyArray => buf.push(tag::EMPTY_ARRAY),
    }
    Ok(())
}

// ============================================================================
// Decoding
// ============================================================================

fn read_str(reader: &mut impl IrRead, len_tag: u8) -> Result<String> {
    let len = match len_tag {
        tag::LENGTH_UBYTE => reader.try_read_numeric::<u8>()? as usize,
        tag::LENGTH_USHORT => reader.try_read_numeric::<u16>()? as usize,
        tag::LENGTH_UINT => reader.try_read_numeric::<u32>()? as usize,
        _ => unreachable!("caller dispatched on a length tag"),
    };
    let mut out = String::new();
    reader.try_read_string(len, &mut out)?;
    Ok(out)
}

/// Decode the value introduced by `value_tag`, which the caller has already
/// consumed.
pub fn read_value(reader: &mut impl IrRead, value_tag: u8) -> Result<Value> {
    let value = match value_tag {
        tag::VALUE_INT8 => Value::Int(reader.try_read_numeric::<i8>()? as i64),
        tag::VALUE_INT16 => Value::Int(reader.try_read_numeric::<i16>()? as i64),
        tag::VALUE_INT32 => Value::Int(reader.try_read_numeric::<i32>()? as i64),
        tag::VALUE_INT64 => Value::Int(reader.try_read_numeric::<i64>()?),
        tag::VALUE_DOUBLE => Value::Float(reader.try_read_numeric::<f64>()?),
        tag::VALUE_TRUE => Value::Bool(true),
        tag::VALUE_FALSE => Value::Bool(false),
        tag::LENGTH_UBYTE | tag::LENGTH_USHORT | tag::LENGTH_UINT => {
            Value::Str(read_str(reader, value_tag)?)
        }
        tag::VALUE_CLP_FOUR_BYTE => {
            Value::ClpStr(ClpEncodedText::read_payload(reader, VarWidth::FourByte)?)
        }
        tag::VALUE_CLP_EIGHT_BYTE => {
            Value::ClpStr(ClpEncodedText::read_payload(reader, VarWidth::EightByte)?)
        }
        tag::VALUE_NULL => Value::Null,
        tag::EMPTY_OBJ => Value::EmptyObj,
        tag::EMPTY_ARRAY => Value::EmptyArray,
        other => {
            return Err(IrError::UnknownTag {
                tag: other,
                position: reader.position(),
            })
        }
    };
    Ok(value)
}
