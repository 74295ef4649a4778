//! # Function Messages
//!
//! Frames exchanged once a client is attached to an instance.
//!
//! ```text
//! KIND(1) || LENGTH(4, BE) || FUNCTION_ID(36) || DATA
//! ```
//!
//! `LENGTH` covers the function id and the data. Every message names its
//! instance, so a message is meaningful regardless of the socket carrying it.

use crate::error::Error;
use crate::error::Result;
use crate::frame::Header;
use crate::frame::RequestKind;
use crate::frame::HEADER_LEN;
use crate::frame::frame;
use crate::frame::utf8;

/// Width of a function id on the wire: a hyphenated UUID.
pub const FUNCTION_ID_LEN: usize = 36;

/// Identifier of an instance, a canonical hyphenated UUID string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(String);

impl FunctionId {
    /// Allocates a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().hyphenated().to_string())
    }

    /// Parses a canonical hyphenated UUID.
    pub fn parse(id: &str) -> Result<Self> {
        if id.len() != FUNCTION_ID_LEN {
            return Err(Error::MalformedFrame(format!(
                "function id len {} doesn't match {}",
                id.len(),
                FUNCTION_ID_LEN
            )));
        }
        uuid::Uuid::try_parse(id)
            .map_err(|e| Error::MalformedFrame(format!("invalid function id {:?}: {}", id, e)))?;
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FunctionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for FunctionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// The closed set of function-message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Server-detected failure of the instance (not of the executed code).
    FunctionErr = 0x4,
    /// A record the function emitted on its error channel.
    Error = 0x5,
    /// A record the function emitted on its output channel.
    Output = 0x6,
    /// Client data for the function's input.
    Input = 0x7,
}

impl MessageKind {
    pub fn from_u8(kind: u8) -> Result<Self> {
        match kind {
            0x4 => Ok(Self::FunctionErr),
            0x5 => Ok(Self::Error),
            0x6 => Ok(Self::Output),
            0x7 => Ok(Self::Input),
            other => Err(Error::UnknownKind(other)),
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        kind as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionMessage {
    pub kind: MessageKind,
    pub function_id: FunctionId,
    pub data: Vec<u8>,
}

impl FunctionMessage {
    pub fn new(kind: MessageKind, function_id: FunctionId, data: impl Into<Vec<u8>>) -> Self {
        Self { kind, function_id, data: data.into() }
    }

    pub fn output(function_id: FunctionId, data: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageKind::Output, function_id, data)
    }

    pub fn error(function_id: FunctionId, data: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageKind::Error, function_id, data)
    }

    pub fn input(function_id: FunctionId, data: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageKind::Input, function_id, data)
    }

    pub fn function_err(function_id: FunctionId, reason: &str) -> Self {
        Self::new(MessageKind::FunctionErr, function_id, reason.as_bytes())
    }

    /// Bytes this message occupies on the wire.
    pub fn framed_len(&self) -> usize {
        HEADER_LEN + FUNCTION_ID_LEN + self.data.len()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let header = Header::new(self.kind.into(), FUNCTION_ID_LEN + self.data.len())?;
        let mut out = frame(header.encode().as_slice(), self.function_id.as_str().as_bytes());
        out.extend_from_slice(&self.data);
        Ok(out)
    }

    /// Decodes a message body whose header has already been read.
    pub fn decode(kind: u8, payload: &[u8]) -> Result<Self> {
        let kind = MessageKind::from_u8(kind)?;
        if payload.len() < FUNCTION_ID_LEN {
            return Err(Error::MalformedFrame(format!(
                "function message payload {} shorter than function id",
                payload.len()
            )));
        }
        let (id, data) = payload.split_at(FUNCTION_ID_LEN);
        let function_id = FunctionId::parse(&utf8(id)?)?;
        Ok(Self { kind, function_id, data: data.to_vec() })
    }
}

/// A frame a client may send while attached.
///
/// Close travels as a regular request frame; everything else is a function
/// message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFrame {
    Message(FunctionMessage),
    Close { function_id: String },
}

impl SessionFrame {
    pub fn decode(kind: u8, payload: &[u8]) -> Result<Self> {
        if kind == u8::from(RequestKind::Close) {
            return Ok(Self::Close { function_id: utf8(payload)? });
        }
        Ok(Self::Message(FunctionMessage::decode(kind, payload)?))
    }
}
