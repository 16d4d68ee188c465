/*!
 * Policy JSON
 * Parsing for sandbox policy files, data group lists and identity files
 */

use crate::core::limits::JSON_SIMD_THRESHOLD;
use serde::{de::DeserializeOwned, Serialize};

pub type JsonResult<T> = Result<T, JsonError>;

#[derive(Debug, thiserror::Error)]
pub enum JsonError {
    #[error("{parser} rejected {len} bytes: {message}")]
    Malformed {
        parser: JsonParser,
        len: usize,
        message: String,
    },
    #[error("Encoding failed: {0}")]
    Encode(String),
}

/// Parser picked for one input
///
/// Policy documents run to tens of kilobytes and go through simd-json.
/// Data group lists and small test fixtures stay on serde_json.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonParser {
    Simd,
    Serde,
}

impl JsonParser {
    pub const fn for_len(len: usize) -> Self {
        if len > JSON_SIMD_THRESHOLD {
            JsonParser::Simd
        } else {
            JsonParser::Serde
        }
    }

    /// Decode `bytes` with this parser
    pub fn parse<T: DeserializeOwned>(self, bytes: &[u8]) -> JsonResult<T> {
        let parsed = match self {
            // simd-json works in place on its own copy
            JsonParser::Simd => {
                let mut scratch = bytes.to_vec();
                simd_json::from_slice(&mut scratch).map_err(|e| e.to_string())
            }
            JsonParser::Serde => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
        };
        parsed.map_err(|message| JsonError::Malformed {
            parser: self,
            len: bytes.len(),
            message,
        })
    }
}

impl std::fmt::Display for JsonParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JsonParser::Simd => write!(f, "simd-json"),
            JsonParser::Serde => write!(f, "serde_json"),
        }
    }
}

/// Decode a policy file or request payload, picking the parser by size
#[inline]
pub fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> JsonResult<T> {
    JsonParser::for_len(bytes.len()).parse(bytes)
}

/// Pretty output for the dry-run call log
pub fn to_string_pretty<T: Serialize>(value: &T) -> JsonResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| JsonError::Encode(e.to_string()))
}
