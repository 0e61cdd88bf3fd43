//! Wire format of a process log.
//!
//! One JSON object per line: `{"type":"stdout","data":"<base64>","eof":true}`.
//! `data` is omitted when empty and `eof` is omitted when false.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::log::error::LogError;

/// The stream a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamTag {
    Stdout,
    Stderr,
    Stdin,
}

impl StreamTag {
    /// Every tag, in the order terminal records are written.
    pub const ALL: [StreamTag; 3] = [StreamTag::Stdout, StreamTag::Stderr, StreamTag::Stdin];

    pub fn as_str(self) -> &'static str {
        match self {
            StreamTag::Stdout => "stdout",
            StreamTag::Stderr => "stderr",
            StreamTag::Stdin => "stdin",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            StreamTag::Stdout => 0,
            StreamTag::Stderr => 1,
            StreamTag::Stdin => 2,
        }
    }
}

impl fmt::Display for StreamTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamTag {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(StreamTag::Stdout),
            "stderr" => Ok(StreamTag::Stderr),
            "stdin" => Ok(StreamTag::Stdin),
            other => Err(LogError::UnknownTag(other.to_string())),
        }
    }
}

/// One framed record of a process log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "type")]
    pub tag: StreamTag,
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "encode_data",
        deserialize_with = "decode_data"
    )]
    pub data: Vec<u8>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub eof: bool,
}

impl LogRecord {
    pub fn data(tag: StreamTag, data: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            data: data.into(),
            eof: false,
        }
    }

    pub fn terminal(tag: StreamTag) -> Self {
        Self {
            tag,
            data: Vec::new(),
            eof: true,
        }
    }

    /// Encodes the record as a single newline-terminated line.
    pub fn to_line(&self) -> Result<Vec<u8>, LogError> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }

    /// Decodes one line. Trailing `\r\n` / `\n` is ignored.
    pub fn from_line(line: &[u8]) -> Result<Self, LogError> {
        let trimmed = line
            .strip_suffix(b"\n")
            .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
            .unwrap_or(line);
        serde_json::from_slice(trimmed).map_err(|source| LogError::Decode {
            line: String::from_utf8_lossy(trimmed).into_owned(),
            source: Arc::new(source),
        })
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn encode_data<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(data))
}

fn decode_data<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    // Older writers emit `"data": null` for records without payload.
    let encoded: Option<String> = Option::deserialize(deserializer)?;
    match encoded {
        Some(encoded) => STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom),
        None => Ok(Vec::new()),
    }
}
