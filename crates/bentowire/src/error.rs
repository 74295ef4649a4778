//! # Error Definitions
//!
//! The central ledger of codec failures.
//!
//! `MalformedFrame` and `PayloadTooLarge` break framing and are fatal to the
//! connection that produced them. `UnknownKind` is raised only after the whole
//! payload has been consumed, so the stream stays aligned and the caller may
//! answer with an error frame and carry on.

/// Failures while encoding or decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A header or payload did not have the shape its kind requires.
    MalformedFrame(String),
    /// The kind byte is outside the closed set for this frame family.
    UnknownKind(u8),
    /// The advertised or supplied payload exceeds `MAX_PAYLOAD_LEN`.
    PayloadTooLarge(usize),
    /// The execution payload handed to a driver could not be decoded.
    InvalidPayload(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedFrame(msg) => write!(f, "Malformed frame: {}", msg),
            Self::UnknownKind(kind) => write!(f, "Unknown frame kind: {:#04x}", kind),
            Self::PayloadTooLarge(len) => write!(f, "Payload too large: {} bytes", len),
            Self::InvalidPayload(msg) => write!(f, "Invalid execution payload: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Whether the error leaves the byte stream in an unknown state.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::UnknownKind(_))
    }
}

/// A specialized Result type for codec operations.
pub type Result<T> = std::result::Result<T, Error>;
