//! Stream metadata: the JSON document carried in the preamble, and
//! validation of its protocol version.

use serde::{Deserialize, Serialize};

use crate::error::{IrError, Result};
use crate::protocol::metadata as keys;

// ============================================================================
// Metadata document
// ============================================================================

/// Parsed preamble metadata.
///
/// Field names on the wire are the upper-case keys of the protocol; unknown
/// keys in an incoming document are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(rename = "VERSION")]
    pub version: String,

    #[serde(rename = "VARIABLES_SCHEMA_ID")]
    pub variables_schema_id: String,

    #[serde(rename = "VARIABLE_ENCODING_METHODS_ID")]
    pub variable_encoding_methods_id: String,

    #[serde(rename = "TIMESTAMP_PATTERN")]
    pub timestamp_pattern: String,

    #[serde(rename = "TIMESTAMP_PATTERN_SYNTAX")]
    pub timestamp_pattern_syntax: String,

    #[serde(rename = "TZ_ID")]
    pub tz_id: String,

    /// Present only in four-byte-encoding streams, where message timestamps
    /// are deltas against this reference. Stored as a decimal string.
    #[serde(rename = "REFERENCE_TIMESTAMP", skip_serializing_if = "Option::is_none")]
    pub reference_timestamp: Option<String>,
}

impl Metadata {
    /// Metadata for a new four-byte-encoding stream.
    pub fn new_four_byte(
        timestamp_pattern: &str,
        timestamp_pattern_syntax: &str,
        tz_id: &str,
        reference_timestamp: i64,
    ) -> Self {
        Self {
            version: keys::VERSION_VALUE.to_string(),
            variables_schema_id: keys::VARIABLES_SCHEMA_VERSION.to_string(),
            variable_encoding_methods_id: keys::VARIABLE_ENCODING_METHODS_VERSION.to_string(),
            timestamp_pattern: timestamp_pattern.to_string(),
            timestamp_pattern_syntax: timestamp_pattern_syntax.to_string(),
            tz_id: tz_id.to_string(),
            reference_timestamp: Some(reference_timestamp.to_string()),
        }
    }

    /// Metadata for a new eight-byte-encoding stream, which carries
    /// absolute timestamps and so has no reference timestamp.
    pub fn new_eight_byte(
        timestamp_pattern: &str,
        timestamp_pattern_syntax: &str,
        tz_id: &str,
    ) -> Self {
        Self {
            reference_timestamp: None,
            ..Self::new_four_byte(timestamp_pattern, timestamp_pattern_syntax, tz_id, 0)
        }
    }

    /// Serialize to the compact JSON carried on the wire.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse from preamble bytes. Unknown keys are ignored; missing
    /// required keys fail.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Validate `VERSION` against the supported range, failing the decode
    /// unless it is supported.
    pub fn check_version(&self) -> Result<()> {
        match validate_protocol_version(&self.version) {
            VersionSupport::Supported => Ok(()),
            support => Err(IrError::UnsupportedVersion {
                version: self.version.clone(),
                support,
            }),
        }
    }
}

// ============================================================================
// Version validation
// ============================================================================

/// Verdict of protocol-version validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSupport {
    Supported,
    TooOld,
    TooNew,
    Invalid,
}

/// Validate a `VERSION` value against the version this codec writes
/// ([`VERSION_VALUE`](crate::protocol::metadata::VERSION_VALUE)).
///
/// The string must be well-formed semver (`major.minor.patch` with optional
/// `-prerelease` and `+build` parts); anything else is `Invalid`. A higher
/// release triple is `TooNew`, a lower one `TooOld`; a prerelease of the
/// supported triple predates it and is `TooOld`.
pub fn validate_protocol_version(version: &str) -> VersionSupport {
    let Some(parsed) = parse_semver(version) else {
        return VersionSupport::Invalid;
    };
    let supported =
        parse_semver(keys::VERSION_VALUE).expect("the codec's own version is well-formed");

    match parsed.release.cmp(&supported.release) {
        std::cmp::Ordering::Greater => VersionSupport::TooNew,
        std::cmp::Ordering::Less => VersionSupport::TooOld,
        std::cmp::Ordering::Equal if parsed.prerelease => VersionSupport::TooOld,
        std::cmp::Ordering::Equal => VersionSupport::Supported,
    }
}

struct Semver {
    release: (u64, u64, u64),
    prerelease: bool,
}

/// Minimal semver parser covering the grammar the preamble permits.
fn parse_semver(version: &str) -> Option<Semver> {
    let (version, build) = match version.split_once('+') {
        Some((v, b)) => (v, Some(b)),
        None => (version, None),
    };
    let (version, prerelease) = match version.split_once('-') {
        Some((v, p)) => (v, Some(p)),
        None => (version, None),
    };

    let mut parts = version.split('.');
    let major = parse_numeric_ident(parts.next()?)?;
    let minor = parse_numeric_ident(parts.next()?)?;
    let patch = parse_numeric_ident(parts.next()?)?;
    if parts.next().is_some() {
        return None;
    }

    if let Some(prerelease) = prerelease {
        for ident in prerelease.split('.') {
            if !is_valid_prerelease_ident(ident) {
                return None;
            }
        }
    }
    if let Some(build) = build {
        for ident in build.split('.') {
            if ident.is_empty() || !ident.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
                return None;
            }
        }
    }

    Some(Semver {
        release: (major, minor, patch),
        prerelease: prerelease.is_some(),
    })
}

/// Numeric identifier: digits only, no leading zero (except "0" itself).
fn parse_numeric_ident(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if s.len() > 1 && s.starts_with('0') {
        return None;
    }
    s.parse().ok()
}

fn is_valid_prerelease_ident(ident: &str) -> bool {
    if ident.is_empty() || !ident.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
        return false;
    }
    // Numeric prerelease identifiers must not carry leading zeros.
    if ident.bytes().all(|b| b.is_ascii_digit()) && ident.len() > 1 && ident.starts_with('0') {
        return false;
    }
    true
}
