//! # Frame Transport
//!
//! Splits a client byte stream into `{kind, payload}` frames.
//!
//! Bytes are accumulated until a whole frame is buffered, then handed out
//! without the header. The header's length bound is checked before any payload
//! is buffered, so an oversized frame is rejected up front.
//!
//! `fill` performs a single read and only touches the buffer after that read
//! completes, so it can sit in a `select!` next to other event sources without
//! losing bytes when another branch wins.

use bentowire::HEADER_LEN;
use bentowire::Header;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;

const READ_CHUNK: usize = 16 * 1024;

/// Errors that end a connection.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    /// The peer broke framing; nothing after this point can be trusted.
    Protocol(bentowire::Error),
    /// The stream ended in the middle of a frame.
    Truncated(usize),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Connection I/O error: {}", e),
            Self::Protocol(e) => write!(f, "Protocol violation: {}", e),
            Self::Truncated(n) => write!(f, "Stream ended inside a frame ({} bytes buffered)", n),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<bentowire::Error> for Error {
    fn from(e: bentowire::Error) -> Self {
        Self::Protocol(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A frame with its header stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: u8,
    pub payload: Vec<u8>,
}

pub struct FrameReader<R> {
    reader: R,
    acc: Vec<u8>,
    read_buf: Box<[u8]>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            acc: Vec::with_capacity(2 * READ_CHUNK),
            read_buf: vec![0u8; READ_CHUNK].into_boxed_slice(),
        }
    }

    /// Pops the next complete frame out of the buffer.
    pub fn take_frame(&mut self) -> Result<Option<Frame>> {
        if self.acc.len() < HEADER_LEN {
            return Ok(None);
        }
        let header = Header::decode(&self.acc[..HEADER_LEN])?;
        let frame_len = HEADER_LEN + header.payload_len();
        if self.acc.len() < frame_len {
            return Ok(None);
        }
        let payload = self.acc[HEADER_LEN..frame_len].to_vec();
        self.acc.drain(..frame_len);
        Ok(Some(Frame { kind: header.kind, payload }))
    }

    /// Reads once from the stream into the buffer. Returns 0 at end of stream.
    pub async fn fill(&mut self) -> Result<usize> {
        let n = self.reader.read(&mut self.read_buf).await?;
        self.acc.extend_from_slice(&self.read_buf[..n]);
        Ok(n)
    }

    /// Waits for the next frame.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly on a frame boundary.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.take_frame()? {
                return Ok(Some(frame));
            }
            if self.fill().await? == 0 {
                return match self.acc.len() {
                    0 => Ok(None),
                    n => Err(Error::Truncated(n)),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[tokio::test]
    async fn frames_split_across_reads_are_reassembled() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut frames = FrameReader::new(rx);

        let bytes = bentowire::Request::Open { function_id: "x".repeat(40) }.encode().unwrap();
        let writer = tokio::spawn(async move {
            for chunk in bytes.chunks(3) {
                tx.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
            tx.write_all(&[0x9, 0, 0, 0, 0]).await.unwrap();
        });

        let frame = frames.next_frame().await.unwrap().unwrap();
        assert_eq!(frame, Frame { kind: 0x2, payload: "x".repeat(40).into_bytes() });
        let frame = frames.next_frame().await.unwrap().unwrap();
        assert_eq!(frame, Frame { kind: 0x9, payload: Vec::new() });

        writer.await.unwrap();
        assert!(frames.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_header_is_rejected_before_payload() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut frames = FrameReader::new(rx);
        tx.write_all(&[0x0, 0x7f, 0xff, 0xff, 0xff]).await.unwrap();
        assert!(matches!(frames.next_frame().await, Err(Error::Protocol(_))));
    }
}
