//! # Producer Records
//!
//! Framing spoken between the server and an execution process.
//!
//! ```text
//! output: FLAG(1) || LENGTH(4, BE) || DATA     (process -> output log)
//! input:  LENGTH(4, BE) || DATA                (server -> process stdin)
//! ```
//!
//! The flag lets one append-only log carry both output channels while keeping
//! record boundaries and origin.

use crate::error::Error;
use crate::error::Result;
use crate::frame::MAX_PAYLOAD_LEN;
use crate::frame::frame;
use crate::frame::wire_len;
use crate::message::FunctionId;
use crate::message::FunctionMessage;

/// Size of an output record header.
pub const RECORD_HEADER_LEN: usize = 5;

/// Size of an input record header.
pub const INPUT_HEADER_LEN: usize = 4;

/// Which producer channel a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Channel {
    Stdout = 0x0,
    Stderr = 0x1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub channel: Channel,
    pub len: u32,
}

impl RecordHeader {
    pub fn encode(&self) -> [u8; RECORD_HEADER_LEN] {
        let mut out = [0u8; RECORD_HEADER_LEN];
        out[0] = self.channel as u8;
        out[1..].copy_from_slice(&self.len.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; RECORD_HEADER_LEN] = bytes.try_into().map_err(|_| {
            Error::MalformedFrame(format!(
                "record header len {} doesn't match {}",
                bytes.len(),
                RECORD_HEADER_LEN
            ))
        })?;
        let channel = match bytes[0] {
            0x0 => Channel::Stdout,
            0x1 => Channel::Stderr,
            other => return Err(Error::MalformedFrame(format!("invalid error flag {:#04x}", other))),
        };
        let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        if len as usize > MAX_PAYLOAD_LEN {
            return Err(Error::PayloadTooLarge(len as usize));
        }
        Ok(Self { channel, len })
    }

    /// Header plus payload, i.e. how far this record advances a log cursor.
    pub fn framed_len(&self) -> u64 {
        RECORD_HEADER_LEN as u64 + u64::from(self.len)
    }
}

/// One unit of data produced by an execution process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRecord {
    pub channel: Channel,
    pub data: Vec<u8>,
}

impl OutputRecord {
    pub fn stdout(data: impl Into<Vec<u8>>) -> Self {
        Self { channel: Channel::Stdout, data: data.into() }
    }

    pub fn stderr(data: impl Into<Vec<u8>>) -> Self {
        Self { channel: Channel::Stderr, data: data.into() }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let header = RecordHeader { channel: self.channel, len: wire_len(self.data.len())? };
        Ok(frame(header.encode().as_slice(), &self.data))
    }

    /// Output becomes an Output message, error-flagged data an Error message.
    pub fn into_message(self, function_id: FunctionId) -> FunctionMessage {
        match self.channel {
            Channel::Stdout => FunctionMessage::output(function_id, self.data),
            Channel::Stderr => FunctionMessage::error(function_id, self.data),
        }
    }
}

/// Data bound for an execution process's input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRecord {
    pub data: Vec<u8>,
}

impl InputRecord {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let len = wire_len(self.data.len())?;
        Ok(frame(&len.to_be_bytes(), &self.data))
    }

    /// Decodes the length prefix of an input record.
    pub fn decode_len(bytes: &[u8]) -> Result<usize> {
        let bytes: [u8; INPUT_HEADER_LEN] = bytes.try_into().map_err(|_| {
            Error::MalformedFrame(format!(
                "input header len {} doesn't match {}",
                bytes.len(),
                INPUT_HEADER_LEN
            ))
        })?;
        let len = u32::from_be_bytes(bytes) as usize;
        if len > MAX_PAYLOAD_LEN {
            return Err(Error::PayloadTooLarge(len));
        }
        Ok(len)
    }
}
