//! Wire protocol constants.
//!
//! The IR stream is a tag-driven binary grammar: every field is prefixed by
//! a single tag byte from the closed catalog below. All multi-byte integers
//! are big-endian two's complement.
//!
//! ## Stream layout
//!
//! ```text
//! [Magic (4)] [EncodingJson] [len tag + metadata JSON] [Record]* [Eof]
//! ```
//!
//! Within a record: schema-node announcements, then the key-id list, then
//! one value per key id, then [`tag::RECORD_DELIM`]. A record with zero
//! keys carries the single [`tag::VALUE_EMPTY`] byte in place of keys and
//! values.

// ============================================================================
// Magic numbers
// ============================================================================

/// Magic bytes opening a stream whose CLP-encoded text uses four-byte
/// encoded variables (the key-value record variant).
pub const FOUR_BYTE_ENCODING_MAGIC: [u8; 4] = [0xfd, 0x2f, 0xb5, 0x29];

/// Magic bytes for the eight-byte encoded-variable variant (legacy text
/// streams; accepted by the decoder).
pub const EIGHT_BYTE_ENCODING_MAGIC: [u8; 4] = [0xfd, 0x2f, 0xb5, 0x30];

/// Size of a magic number in bytes.
pub const MAGIC_NUMBER_LEN: usize = 4;

/// Largest single length-prefixed payload (string, key name, dictionary
/// variable, logtype) the decoder will allocate for. Lengths beyond this
/// are rejected before allocation.
pub const MAX_PAYLOAD_LEN: usize = 256 * 1024 * 1024;

/// End-of-stream terminator byte.
pub const EOF: u8 = 0x00;

// ============================================================================
// Metadata (preamble)
// ============================================================================

/// Constants for the JSON metadata preamble.
pub mod metadata {
    /// Metadata payload encoding discriminator: JSON.
    pub const ENCODING_JSON: u8 = 0x01;

    /// Metadata length prefix follows as u8.
    pub const LENGTH_UBYTE: u8 = 0x11;
    /// Metadata length prefix follows as u16.
    pub const LENGTH_USHORT: u8 = 0x12;

    /// Largest metadata JSON payload the format can carry (u16 length).
    pub const MAX_METADATA_LEN: usize = u16::MAX as usize;

    pub const VERSION_KEY: &str = "VERSION";
    pub const VERSION_VALUE: &str = "0.0.1";

    pub const TIMESTAMP_PATTERN_KEY: &str = "TIMESTAMP_PATTERN";
    pub const TIMESTAMP_PATTERN_SYNTAX_KEY: &str = "TIMESTAMP_PATTERN_SYNTAX";
    pub const TIME_ZONE_ID_KEY: &str = "TZ_ID";
    pub const REFERENCE_TIMESTAMP_KEY: &str = "REFERENCE_TIMESTAMP";

    pub const VARIABLES_SCHEMA_ID_KEY: &str = "VARIABLES_SCHEMA_ID";
    pub const VARIABLE_ENCODING_METHODS_ID_KEY: &str = "VARIABLE_ENCODING_METHODS_ID";

    /// Identifier of the variable tokenization rules in use.
    pub const VARIABLES_SCHEMA_VERSION: &str = "2.0";
    /// Identifier of the variable encoding methods in use.
    pub const VARIABLE_ENCODING_METHODS_VERSION: &str = "1.0";
}

// ============================================================================
// Payload tags
// ============================================================================

/// Single-byte tags for record payloads. Byte values are normative: the
/// decoder rejects any stream that reuses a tag outside its catalog slot.
pub mod tag {
    // --- Length prefixes (also the raw-string value tags) ---
    pub const LENGTH_UBYTE: u8 = 0x11;
    pub const LENGTH_USHORT: u8 = 0x12;
    pub const LENGTH_UINT: u8 = 0x13;

    // --- Timestamps (legacy text streams) ---
    /// Absolute epoch-milliseconds timestamp (eight-byte streams).
    pub const TIMESTAMP_VAL: u8 = 0x30;
    // Timestamp deltas against the previous message (four-byte streams).
    pub const TIMESTAMP_DELTA_BYTE: u8 = 0x31;
    pub const TIMESTAMP_DELTA_SHORT: u8 = 0x32;
    pub const TIMESTAMP_DELTA_INT: u8 = 0x33;
    pub const TIMESTAMP_DELTA_LONG: u8 = 0x34;

    // --- Scalar values ---
    pub const VALUE_INT8: u8 = 0x50;
    pub const VALUE_INT16: u8 = 0x51;
    pub const VALUE_INT32: u8 = 0x52;
    pub const VALUE_INT64: u8 = 0x53;
    pub const VALUE_TRUE: u8 = 0x54;
    pub const VALUE_FALSE: u8 = 0x55;
    pub const VALUE_DOUBLE: u8 = 0x56;

    /// CLP-encoded string with four-byte encoded variables.
    pub const VALUE_CLP_FOUR_BYTE: u8 = 0x57;
    /// CLP-encoded string with eight-byte encoded variables.
    pub const VALUE_CLP_EIGHT_BYTE: u8 = 0x58;

    /// Marker for a record with zero keys.
    pub const VALUE_EMPTY: u8 = 0x5e;
    /// Explicit null leaf.
    pub const VALUE_NULL: u8 = 0x5f;

    // --- Key-id references ---
    pub const KEY_ID_UBYTE: u8 = 0x60;
    pub const KEY_ID_USHORT: u8 = 0x61;

    // --- Array framing ---
    pub const ARRAY_BEGIN: u8 = 0x62;
    pub const ARRAY_END: u8 = 0x63;

    /// Record terminator.
    pub const RECORD_DELIM: u8 = 0x64;

    // --- Schema-node announcements ---
    pub const NODE_PARENT_ID_UBYTE: u8 = 0x65;
    pub const NODE_PARENT_ID_USHORT: u8 = 0x66;
    pub const NODE_NAME_LEN_UBYTE: u8 = 0x69;
    pub const NODE_NAME_LEN_USHORT: u8 = 0x6a;

    /// Empty-array leaf marker.
    pub const EMPTY_ARRAY: u8 = 0x6e;
    /// Empty-object leaf marker.
    pub const EMPTY_OBJ: u8 = 0x6f;

    // --- Schema-node types ---
    pub const NODE_INT: u8 = 0x71;
    pub const NODE_FLOAT: u8 = 0x72;
    pub const NODE_BOOL: u8 = 0x73;
    pub const NODE_STR: u8 = 0x74;
    pub const NODE_ARRAY: u8 = 0x75;
    pub const NODE_OBJ: u8 = 0x76;

    /// Whether `t` announces a new schema-tree node.
    #[inline]
    pub fn is_schema_node_type(t: u8) -> bool {
        (NODE_INT..=NODE_OBJ).contains(&t)
    }

    /// Whether `t` is a key-id reference tag.
    #[inline]
    pub fn is_key_id(t: u8) -> bool {
        KEY_ID_UBYTE == t || KEY_ID_USHORT == t
    }
}

// ============================================================================
// CLP string payload tags (subcodec-internal)
// ============================================================================

/// Tags used inside a CLP-encoded string payload, between the value tag and
/// the logtype that terminates it.
pub mod clp_tag {
    /// One four-byte encoded variable follows.
    pub const VAR_FOUR_BYTE: u8 = 0x18;
    /// One eight-byte encoded variable follows.
    pub const VAR_EIGHT_BYTE: u8 = 0x19;

    // Dictionary-variable length prefixes.
    pub const VAR_STR_LEN_UBYTE: u8 = 0x11;
    pub const VAR_STR_LEN_USHORT: u8 = 0x12;
    pub const VAR_STR_LEN_UINT: u8 = 0x13;

    // Logtype length prefixes. Reading one of these ends the variable list.
    pub const LOGTYPE_LEN_UBYTE: u8 = 0x21;
    pub const LOGTYPE_LEN_USHORT: u8 = 0x22;
    pub const LOGTYPE_LEN_UINT: u8 = 0x23;

    // Placeholder bytes inside a logtype.
    pub const PLACEHOLDER_INT: u8 = 0x11;
    pub const PLACEHOLDER_DICT: u8 = 0x12;
    pub const PLACEHOLDER_FLOAT: u8 = 0x13;
    pub const PLACEHOLDER_ESCAPE: u8 = b'\\';
}
