use std::borrow::Cow;
use std::str::FromStr;

use crate::fs::{FsError, Result};

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;

/// Named character encodings accepted wherever text crosses into or out of a
/// file's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Utf8,
    /// 7-bit; the high bit of every byte is dropped when decoding.
    Ascii,
    /// One byte per code unit. Also known as `binary`.
    Latin1,
    Utf16Le,
    Base64,
    Hex,
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding::Utf8
    }
}

impl FromStr for Encoding {
    type Err = FsError;

    fn from_str(name: &str) -> Result<Self> {
        let encoding = match name.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Encoding::Utf8,
            "ascii" => Encoding::Ascii,
            "latin1" | "binary" => Encoding::Latin1,
            "utf16le" | "utf-16le" | "ucs2" | "ucs-2" => Encoding::Utf16Le,
            "base64" => Encoding::Base64,
            "hex" => Encoding::Hex,
            _ => {
                return Err(FsError::InvalidArgument(format!(
                    "unknown encoding: {:?}",
                    name
                )))
            }
        };
        Ok(encoding)
    }
}

impl Encoding {
    /// Converts text to the bytes it represents under this encoding.
    pub fn encode(self, text: &str) -> Result<Vec<u8>> {
        match self {
            Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
            Encoding::Ascii | Encoding::Latin1 => {
                Ok(text.encode_utf16().map(|unit| unit as u8).collect())
            }
            Encoding::Utf16Le => Ok(text
                .encode_utf16()
                .flat_map(|unit| unit.to_le_bytes().to_vec())
                .collect()),
            Encoding::Base64 => {
                let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
                STANDARD_NO_PAD
                    .decode(compact.trim_end_matches('='))
                    .map_err(|e| FsError::InvalidArgument(format!("invalid base64: {}", e)))
            }
            Encoding::Hex => hex::decode(text)
                .map_err(|e| FsError::InvalidArgument(format!("invalid hex: {}", e))),
        }
    }

    /// Renders bytes as text under this encoding. Invalid UTF-8 and UTF-16
    /// sequences are replaced rather than rejected.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Ascii => bytes.iter().map(|&b| (b & 0x7f) as char).collect(),
            Encoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            Encoding::Utf16Le => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
            Encoding::Base64 => STANDARD.encode(bytes),
            Encoding::Hex => hex::encode(bytes),
        }
    }
}

/// File content as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataArg {
    Text { text: String, encoding: Encoding },
    Bytes(Vec<u8>),
}

impl DataArg {
    pub fn text<S: Into<String>>(text: S, encoding: Encoding) -> Self {
        DataArg::Text {
            text: text.into(),
            encoding,
        }
    }

    /// The raw bytes this argument stands for.
    pub fn to_bytes(&self) -> Result<Cow<'_, [u8]>> {
        match self {
            DataArg::Text {
                text,
                encoding: Encoding::Utf8,
            } => Ok(Cow::Borrowed(text.as_bytes())),
            DataArg::Text { text, encoding } => encoding.encode(text).map(Cow::Owned),
            DataArg::Bytes(bytes) => Ok(Cow::Borrowed(bytes)),
        }
    }
}

impl From<&str> for DataArg {
    fn from(text: &str) -> Self {
        DataArg::text(text, Encoding::Utf8)
    }
}

impl From<String> for DataArg {
    fn from(text: String) -> Self {
        DataArg::text(text, Encoding::Utf8)
    }
}

impl From<Vec<u8>> for DataArg {
    fn from(bytes: Vec<u8>) -> Self {
        DataArg::Bytes(bytes)
    }
}

impl From<&[u8]> for DataArg {
    fn from(bytes: &[u8]) -> Self {
        DataArg::Bytes(bytes.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for DataArg {
    fn from(bytes: &[u8; N]) -> Self {
        DataArg::Bytes(bytes.to_vec())
    }
}
