//! # Record Log
//!
//! Append-only files used as queues between an execution process and the server.
//!
//! The process owns the write end (the log is its stdout or stderr) and only
//! ever appends. The server owns a read cursor per attachment and reads with
//! positional I/O, so a reader never disturbs the writer and several readers
//! over the lifetime of an instance can each start where the last one stopped.
//!
//! ## Invariants
//! - **Whole Records**: `next_record` moves the cursor only past complete
//!   records. A record the producer is still writing is left for a later call.
//! - **Exact Rewind**: `rewind` moves the cursor back by a byte count the caller
//!   obtained from `LogRecord::framed_len`, landing on a record boundary.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;

use bentowire::OutputRecord;
use bentowire::RECORD_HEADER_LEN;
use bentowire::RecordHeader;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    /// The log holds bytes that are not a producer record.
    Corrupt(bentowire::Error),
    /// A rewind would move the cursor before the start of the log.
    Rewind { by: u64, position: u64 },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Log I/O error: {}", e),
            Self::Corrupt(e) => write!(f, "Corrupt log record: {}", e),
            Self::Rewind { by, position } => {
                write!(f, "Cannot rewind {} bytes from position {}", by, position)
            }
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
        Self::Corrupt(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A record read from the log together with the log bytes it occupied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub record: OutputRecord,
    pub framed_len: u64,
}

/// Read cursor over an output log.
#[derive(Debug)]
pub struct LogReader {
    file: File,
    position: u64,
}

impl LogReader {
    /// Opens the log read-only with the cursor at `position`.
    pub fn open(path: &Path, position: u64) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self { file, position })
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes in the log that the cursor has not passed yet.
    pub fn remaining(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len().saturating_sub(self.position))
    }

    /// Reads the record under the cursor and advances past it.
    ///
    /// Returns `Ok(None)` without moving when the log does not yet hold a whole
    /// record.
    pub fn next_record(&mut self) -> Result<Option<LogRecord>> {
        let available = self.remaining()?;
        if available < RECORD_HEADER_LEN as u64 {
            return Ok(None);
        }

        let mut header = [0u8; RECORD_HEADER_LEN];
        self.file.read_exact_at(&mut header, self.position)?;
        let header = RecordHeader::decode(&header)?;
        if available < header.framed_len() {
            return Ok(None);
        }

        let mut data = vec![0u8; header.len as usize];
        self.file.read_exact_at(&mut data, self.position + RECORD_HEADER_LEN as u64)?;
        self.position += header.framed_len();

        Ok(Some(LogRecord {
            record: OutputRecord { channel: header.channel, data },
            framed_len: header.framed_len(),
        }))
    }

    /// Moves the cursor back so the last `by` bytes of records are read again.
    pub fn rewind(&mut self, by: u64) -> Result<()> {
        if by > self.position {
            return Err(Error::Rewind { by, position: self.position });
        }
        self.position -= by;
        Ok(())
    }
}

/// Tail over an unframed log, such as a process's stderr.
#[derive(Debug)]
pub struct ErrorTail {
    file: File,
    position: u64,
}

impl ErrorTail {
    /// Opens the log with the tail at `position`.
    pub fn open(path: &Path, position: u64) -> Result<Self> {
        Ok(Self { file: File::open(path)?, position })
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns whatever was appended since the last call, up to `limit` bytes.
    pub fn drain(&mut self, limit: usize) -> Result<Vec<u8>> {
        let available = self.file.metadata()?.len().saturating_sub(self.position);
        let len = available.min(limit as u64) as usize;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = self.file.read_at(&mut buf[filled..], self.position + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        self.position += filled as u64;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn append(file: &mut File, bytes: &[u8]) {
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
    }

    fn record(data: &str) -> Vec<u8> {
        OutputRecord::stdout(data).encode().unwrap()
    }

    #[test]
    fn partial_records_are_left_for_later() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.out");
        let mut writer = File::create(&path).unwrap();
        let mut reader = LogReader::open(&path, 0).unwrap();

        assert_eq!(reader.next_record().unwrap(), None);

        let bytes = record("hello");
        append(&mut writer, &bytes[..3]);
        assert_eq!(reader.next_record().unwrap(), None);
        assert_eq!(reader.position(), 0);

        append(&mut writer, &bytes[3..7]);
        assert_eq!(reader.next_record().unwrap(), None);
        assert_eq!(reader.position(), 0);

        append(&mut writer, &bytes[7..]);
        let got = reader.next_record().unwrap().unwrap();
        assert_eq!(got.record, OutputRecord::stdout("hello"));
        assert_eq!(got.framed_len, bytes.len() as u64);
        assert_eq!(reader.position(), bytes.len() as u64);
        assert_eq!(reader.remaining().unwrap(), 0);
    }

    #[test]
    fn records_keep_their_channel_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.out");
        let mut writer = File::create(&path).unwrap();
        append(&mut writer, &record("one"));
        append(&mut writer, &OutputRecord::stderr("two").encode().unwrap());
        append(&mut writer, &record(""));

        let mut reader = LogReader::open(&path, 0).unwrap();
        let got: Vec<_> = std::iter::from_fn(|| reader.next_record().unwrap()).map(|r| r.record).collect();
        assert_eq!(
            got,
            vec![OutputRecord::stdout("one"), OutputRecord::stderr("two"), OutputRecord::stdout("")]
        );
    }

    #[test]
    fn rewind_rereads_exactly_the_unsent_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.out");
        let mut writer = File::create(&path).unwrap();
        for data in ["a", "bb", "ccc"] {
            append(&mut writer, &record(data));
        }

        let mut reader = LogReader::open(&path, 0).unwrap();
        let first = reader.next_record().unwrap().unwrap();
        let second = reader.next_record().unwrap().unwrap();
        let third = reader.next_record().unwrap().unwrap();

        reader.rewind(second.framed_len + third.framed_len).unwrap();
        assert_eq!(reader.position(), first.framed_len);
        assert_eq!(reader.next_record().unwrap().unwrap(), second);

        assert!(matches!(reader.rewind(1_000), Err(Error::Rewind { .. })));
    }

    #[test]
    fn reader_resumes_from_a_saved_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.out");
        let mut writer = File::create(&path).unwrap();
        append(&mut writer, &record("delivered"));
        append(&mut writer, &record("pending"));

        let cursor = record("delivered").len() as u64;
        let mut reader = LogReader::open(&path, cursor).unwrap();
        assert_eq!(reader.next_record().unwrap().unwrap().record, OutputRecord::stdout("pending"));
    }

    #[test]
    fn corrupt_flag_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.out");
        std::fs::write(&path, [0x7, 0, 0, 0, 0]).unwrap();
        let mut reader = LogReader::open(&path, 0).unwrap();
        assert!(matches!(reader.next_record(), Err(Error::Corrupt(_))));
    }

    #[test]
    fn error_tail_drains_appended_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.err");
        let mut writer = File::create(&path).unwrap();
        let mut tail = ErrorTail::open(&path, 0).unwrap();

        assert!(tail.drain(1024).unwrap().is_empty());
        append(&mut writer, b"Traceback (most recent call last):\n");
        assert_eq!(tail.drain(9).unwrap(), b"Traceback");
        assert_eq!(tail.drain(1024).unwrap(), b" (most recent call last):\n");
        assert!(tail.drain(1024).unwrap().is_empty());
    }

    #[test]
    fn error_tail_skips_text_before_its_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.err");
        let mut writer = File::create(&path).unwrap();
        append(&mut writer, b"reported\n");

        let mut tail = ErrorTail::open(&path, 9).unwrap();
        assert!(tail.drain(1024).unwrap().is_empty());
        append(&mut writer, b"fresh\n");
        assert_eq!(tail.drain(1024).unwrap(), b"fresh\n");
        assert_eq!(tail.position(), 15);
    }
}
