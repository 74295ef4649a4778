//! # Request Frames
//!
//! Defines the request/response envelope exchanged before a client attaches to
//! an instance.
//!
//! ## Layout
//!
//! ```text
//! request:  KIND(1) || LENGTH(4, BE) || PAYLOAD
//! response: KIND(1) || FLAG(1) || LENGTH(4, BE) || PAYLOAD
//! ```
//!
//! Store and Execute payloads are JSON objects; Open and Close carry the raw
//! function id. A response mirrors the kind of the request it answers.

use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;
use crate::error::Result;

/// Size of a request or function-message header.
pub const HEADER_LEN: usize = 5;

/// Size of a response header.
pub const RESPONSE_HEADER_LEN: usize = 6;

/// Largest payload any frame may advertise.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// Checks a payload length against `MAX_PAYLOAD_LEN` and narrows it for the wire.
pub(crate) fn wire_len(len: usize) -> Result<u32> {
    if len > MAX_PAYLOAD_LEN {
        return Err(Error::PayloadTooLarge(len));
    }
    // MAX_PAYLOAD_LEN fits in a u32
    Ok(len as u32)
}

/// Header shared by requests and function messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: u8,
    pub len: u32,
}

impl Header {
    pub fn new(kind: u8, payload_len: usize) -> Result<Self> {
        Ok(Self { kind, len: wire_len(payload_len)? })
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.kind;
        out[1..].copy_from_slice(&self.len.to_be_bytes());
        out
    }

    /// Decodes a header. The slice must be exactly `HEADER_LEN` bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; HEADER_LEN] = bytes.try_into().map_err(|_| {
            Error::MalformedFrame(format!("header len {} doesn't match {}", bytes.len(), HEADER_LEN))
        })?;
        let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        if len as usize > MAX_PAYLOAD_LEN {
            return Err(Error::PayloadTooLarge(len as usize));
        }
        Ok(Self { kind: bytes[0], len })
    }

    pub fn payload_len(&self) -> usize {
        self.len as usize
    }
}

/// The closed set of request kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestKind {
    Store = 0x0,
    Execute = 0x1,
    Open = 0x2,
    Close = 0x3,
}

impl RequestKind {
    pub fn from_u8(kind: u8) -> Result<Self> {
        match kind {
            0x0 => Ok(Self::Store),
            0x1 => Ok(Self::Execute),
            0x2 => Ok(Self::Open),
            0x3 => Ok(Self::Close),
            other => Err(Error::UnknownKind(other)),
        }
    }
}

impl From<RequestKind> for u8 {
    fn from(kind: RequestKind) -> Self {
        kind as u8
    }
}

/// Body of a Store request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRequest {
    pub name: String,
    pub code: String,
}

/// Body of an Execute request.
///
/// `call` is the textual invocation expression; `token` names a stored function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub call: String,
    pub token: String,
}

/// A client -> server request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Store(StoreRequest),
    Execute(ExecuteRequest),
    Open { function_id: String },
    Close { function_id: String },
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Store(_) => RequestKind::Store,
            Self::Execute(_) => RequestKind::Execute,
            Self::Open { .. } => RequestKind::Open,
            Self::Close { .. } => RequestKind::Close,
        }
    }

    /// Encodes header and payload into one buffer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = match self {
            Self::Store(body) => to_json(body)?,
            Self::Execute(body) => to_json(body)?,
            Self::Open { function_id } | Self::Close { function_id } => function_id.as_bytes().to_vec(),
        };
        Ok(frame(Header::new(self.kind().into(), payload.len())?.encode().as_slice(), &payload))
    }

    /// Decodes a request body whose header has already been read.
    ///
    /// # Errors
    /// `UnknownKind` for kinds outside the request set, `MalformedFrame` when the
    /// payload does not match the kind.
    pub fn decode(kind: u8, payload: &[u8]) -> Result<Self> {
        match RequestKind::from_u8(kind)? {
            RequestKind::Store => Ok(Self::Store(from_json(payload)?)),
            RequestKind::Execute => Ok(Self::Execute(from_json(payload)?)),
            RequestKind::Open => Ok(Self::Open { function_id: utf8(payload)? }),
            RequestKind::Close => Ok(Self::Close { function_id: utf8(payload)? }),
        }
    }
}

/// Success/error flag of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Success = 0x0,
    Error = 0x1,
}

/// Header of a server -> client response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub kind: u8,
    pub status: Status,
    pub len: u32,
}

impl ResponseHeader {
    pub fn encode(&self) -> [u8; RESPONSE_HEADER_LEN] {
        let mut out = [0u8; RESPONSE_HEADER_LEN];
        out[0] = self.kind;
        out[1] = self.status as u8;
        out[2..].copy_from_slice(&self.len.to_be_bytes());
        out
    }

    /// Decodes a header. The slice must be exactly `RESPONSE_HEADER_LEN` bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; RESPONSE_HEADER_LEN] = bytes.try_into().map_err(|_| {
            Error::MalformedFrame(format!(
                "response header len {} doesn't match {}",
                bytes.len(),
                RESPONSE_HEADER_LEN
            ))
        })?;
        let status = match bytes[1] {
            0x0 => Status::Success,
            0x1 => Status::Error,
            other => return Err(Error::MalformedFrame(format!("invalid status flag {:#04x}", other))),
        };
        let len = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        if len as usize > MAX_PAYLOAD_LEN {
            return Err(Error::PayloadTooLarge(len as usize));
        }
        Ok(Self { kind: bytes[0], status, len })
    }

    pub fn payload_len(&self) -> usize {
        self.len as usize
    }
}

/// A server -> client response.
///
/// Error responses keep the raw kind byte so a request with an unknown kind can
/// still be answered in kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Store { token: String },
    Execute { function_id: String },
    Error { kind: u8, message: String },
}

impl Response {
    pub fn error(kind: impl Into<u8>, message: impl Into<String>) -> Self {
        Self::Error { kind: kind.into(), message: message.into() }
    }

    pub fn kind(&self) -> u8 {
        match self {
            Self::Store { .. } => RequestKind::Store.into(),
            Self::Execute { .. } => RequestKind::Execute.into(),
            Self::Error { kind, .. } => *kind,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let (status, payload) = match self {
            Self::Store { token } => (Status::Success, token.as_bytes()),
            Self::Execute { function_id } => (Status::Success, function_id.as_bytes()),
            Self::Error { message, .. } => (Status::Error, message.as_bytes()),
        };
        let header = ResponseHeader { kind: self.kind(), status, len: wire_len(payload.len())? };
        Ok(frame(header.encode().as_slice(), payload))
    }

    /// Decodes a response body whose header has already been read.
    pub fn decode(header: &ResponseHeader, payload: &[u8]) -> Result<Self> {
        if header.payload_len() != payload.len() {
            return Err(Error::MalformedFrame(format!(
                "payload len {} doesn't match header len {}",
                payload.len(),
                header.len
            )));
        }
        let text = utf8(payload)?;
        match header.status {
            Status::Error => Ok(Self::Error { kind: header.kind, message: text }),
            Status::Success => match RequestKind::from_u8(header.kind)? {
                RequestKind::Store => Ok(Self::Store { token: text }),
                RequestKind::Execute => Ok(Self::Execute { function_id: text }),
                // Open and Close never succeed with a response
                RequestKind::Open | RequestKind::Close => Err(Error::UnknownKind(header.kind)),
            },
        }
    }
}

pub(crate) fn frame(header: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(header.len() + payload.len());
    out.extend_from_slice(header);
    out.extend_from_slice(payload);
    out
}

pub(crate) fn utf8(payload: &[u8]) -> Result<String> {
    String::from_utf8(payload.to_vec()).map_err(|e| Error::MalformedFrame(format!("invalid utf-8: {}", e)))
}

fn to_json<T: Serialize>(body: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(body).map_err(|e| Error::MalformedFrame(e.to_string()))
}

fn from_json<T: for<'de> Deserialize<'de>>(payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload).map_err(|e| Error::MalformedFrame(e.to_string()))
}
