//! # kvir
//!
//! Schema-adaptive binary IR codec for semi-structured (JSON-shaped) log
//! records.
//!
//! A producer serializes a stream of records into a compact,
//! self-describing byte stream; a consumer turns that stream back into the
//! original records. The key/type structure of the records is learned
//! incrementally and announced in-band as a growing schema tree, so
//! repeated field sets shrink to small integer ids.
//!
//! This crate provides:
//! - The schema tree: typed key nodes with dense ids, uniqueness by
//!   `(parent, name, type)`, and snapshot/revert for mid-record rollback
//! - The wire format: single-byte tags, big-endian numerics, magic
//!   numbers, and a JSON metadata preamble
//! - [`Serializer`] / [`Deserializer`]: the streaming record codec pair,
//!   including integer delta encoding and CLP string encoding for
//!   tokenizable text and arrays
//!
//! ## Design Principles
//!
//! 1. **Synchronous and non-shared**: each codec instance owns its schema
//!    tree; all I/O goes through the supplied reader/writer seams
//! 2. **Producer → consumer only**: the schema flows in-band with the
//!    data; there is no negotiation and no random access
//! 3. **Structural errors**: the codec never logs, prints, or retries —
//!    failures surface as [`IrError`] values
//!
//! ## Example
//!
//! ```
//! use kvir::{Serializer, Deserializer, Decoded, SliceReader};
//! use serde_json::json;
//!
//! let mut buf = Vec::new();
//! let mut producer = Serializer::new();
//! producer.write_preamble(&mut buf, "yyyy-MM-dd HH:mm:ss", "java", "UTC", 0)?;
//! producer.encode_record(&mut buf, &json!({"level": "info", "pid": 4102}))?;
//! producer.write_end_of_stream(&mut buf)?;
//!
//! let mut reader = SliceReader::new(&buf);
//! let mut consumer = Deserializer::new();
//! consumer.read_preamble(&mut reader)?;
//! assert!(matches!(consumer.decode_record(&mut reader)?, Decoded::Record(_)));
//! assert!(matches!(consumer.decode_record(&mut reader)?, Decoded::EndOfStream));
//! # Ok::<(), kvir::IrError>(())
//! ```

pub mod clp;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod metadata;
pub mod protocol;
pub mod schema;
pub mod text;
pub mod value;
pub mod wire;

// Re-export main types
pub use clp::{decode_clp_string, encode_clp_string, ClpEncodedText, VarWidth};
pub use decoder::{Decoded, Deserializer};
pub use encoder::Serializer;
pub use error::{IrError, Result};
pub use metadata::{validate_protocol_version, Metadata, VersionSupport};
pub use schema::{EvolutionMode, NodeId, NodeType, SchemaNode, SchemaTree, ROOT_ID};
pub use text::{DecodedEvent, LogEvent, LogEventDeserializer, LogEventSerializer};
pub use value::Value;
pub use wire::{BeNumeric, IrRead, IrWrite, SliceReader};
