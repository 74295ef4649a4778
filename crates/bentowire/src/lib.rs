//! # Bentowire
//!
//! The binary protocol of the bento function server.
//!
//! ## Frame families
//!
//! - **Requests/Responses**: Store, Execute, Open and Close, answered with a
//!   success/error flag ([`frame`]).
//! - **Function messages**: Output, Error, Input and FunctionErr, exchanged
//!   while a client is attached to an instance ([`message`]).
//! - **Producer records**: what an execution process writes to its output log
//!   and reads from its input pipe ([`record`]).
//!
//! All numeric fields are fixed-width, big-endian and unsigned. Kinds are decoded
//! once into closed enums; unknown kind bytes are rejected, never skipped.
//! The crate does no I/O.

pub mod error;
pub mod frame;
pub mod message;
pub mod payload;
pub mod record;

pub use error::Error;
pub use error::Result;
pub use frame::ExecuteRequest;
pub use frame::HEADER_LEN;
pub use frame::Header;
pub use frame::MAX_PAYLOAD_LEN;
pub use frame::RESPONSE_HEADER_LEN;
pub use frame::Request;
pub use frame::RequestKind;
pub use frame::Response;
pub use frame::ResponseHeader;
pub use frame::Status;
pub use frame::StoreRequest;
pub use message::FUNCTION_ID_LEN;
pub use message::FunctionId;
pub use message::FunctionMessage;
pub use message::MessageKind;
pub use message::SessionFrame;
pub use payload::ExecPayload;
pub use record::Channel;
pub use record::INPUT_HEADER_LEN;
pub use record::InputRecord;
pub use record::OutputRecord;
pub use record::RECORD_HEADER_LEN;
pub use record::RecordHeader;

#[cfg(test)]
mod tests;
