//! Trace identifiers.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A 128-bit trace identifier, split into its high and low 64-bit halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TraceId {
    /// Most significant 64 bits; zero for 64-bit IDs.
    pub high: u64,
    /// Least significant 64 bits.
    pub low: u64,
}

/// Reasons a trace ID cannot be parsed or decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceIdError {
    /// The hex string is empty.
    #[error("trace ID is empty")]
    Empty,
    /// The hex string has more than 32 characters.
    #[error("TraceID cannot be longer than 32 hex characters: {0}")]
    TooLong(String),
    /// The string contains something other than hex digits.
    #[error("trace ID is not a hex string: {0}")]
    NotHex(String),
    /// The binary form is not exactly 16 bytes.
    #[error("trace ID must be 16 bytes, got {0}")]
    InvalidLength(usize),
}

impl TraceId {
    /// Builds a trace ID from its two halves.
    pub fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }

    /// Big-endian 16-byte form used by the storage protocol and OTLP.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.high.to_be_bytes());
        bytes[8..].copy_from_slice(&self.low.to_be_bytes());
        bytes
    }

    /// Decodes the big-endian 16-byte form.
    ///
    /// # Arguments
    /// * `bytes` - Raw trace ID bytes as found on storage spans
    ///
    /// # Returns
    /// The trace ID, or [`TraceIdError::InvalidLength`] for any other length
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TraceIdError> {
        if bytes.len() != 16 {
            return Err(TraceIdError::InvalidLength(bytes.len()));
        }
        let mut high = [0u8; 8];
        let mut low = [0u8; 8];
        high.copy_from_slice(&bytes[..8]);
        low.copy_from_slice(&bytes[8..]);
        Ok(Self::new(u64::from_be_bytes(high), u64::from_be_bytes(low)))
    }
}

impl FromStr for TraceId {
    type Err = TraceIdError;

    /// Parses 1 to 32 hex digits. Anything past the last 16 digits is the high half.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(TraceIdError::Empty);
        }
        if s.len() > 32 {
            return Err(TraceIdError::TooLong(s.to_string()));
        }
        // from_str_radix tolerates a leading '+', so check digits up front.
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TraceIdError::NotHex(s.to_string()));
        }

        let parse = |digits: &str| {
            u64::from_str_radix(digits, 16).map_err(|_| TraceIdError::NotHex(s.to_string()))
        };
        if s.len() > 16 {
            let (high, low) = s.split_at(s.len() - 16);
            Ok(Self::new(parse(high)?, parse(low)?))
        } else {
            Ok(Self::new(0, parse(s)?))
        }
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.high == 0 {
            write!(f, "{:016x}", self.low)
        } else {
            write!(f, "{:016x}{:016x}", self.high, self.low)
        }
    }
}
