//! # Bentoapi
//!
//! What an execution process uses to talk to the server that launched it.
//!
//! The server starts a driver as `<command> <entrypoint> <payload>`. The driver
//! reads its `call` and `code` from [`payload`], then exchanges records with the
//! server over its standard streams:
//!
//! - stdout carries output records (`flag, length, data`); flag 0 is ordinary
//!   output and flag 1 is an error report,
//! - stdin carries input records (`length, data`).
//!
//! Every `send` flushes immediately. The server tails stdout from a file and
//! only sees what has been flushed.

use std::fs::File;
use std::io::Read;
use std::io::Stdout;
use std::io::Write;
use std::os::fd::AsFd;
use std::os::fd::AsRawFd;

use bentowire::ExecPayload;
use bentowire::INPUT_HEADER_LEN;
use bentowire::InputRecord;
use bentowire::OutputRecord;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Wire(bentowire::Error),
    /// The process was started without a payload argument.
    MissingPayload,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Wire(e) => write!(f, "Wire error: {}", e),
            Self::MissingPayload => write!(f, "No execution payload argument"),
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
        Self::Wire(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Decodes the execution payload from the process's last argument.
pub fn payload() -> Result<ExecPayload> {
    payload_from(std::env::args())
}

pub fn payload_from(args: impl IntoIterator<Item = String>) -> Result<ExecPayload> {
    // args[0] is the program itself
    let arg = args.into_iter().skip(1).last().ok_or(Error::MissingPayload)?;
    Ok(ExecPayload::decode(&arg)?)
}

pub struct Api<R, W> {
    input: R,
    output: W,
}

impl Api<File, Stdout> {
    /// An api over the process's own stdin and stdout.
    ///
    /// Stdin is read through a duplicated descriptor so no bytes sit in a
    /// userspace buffer where `poll` cannot see them.
    pub fn stdio() -> Result<Self> {
        let input = File::from(std::io::stdin().as_fd().try_clone_to_owned()?);
        Ok(Self::new(input, std::io::stdout()))
    }
}

impl<R, W> Api<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_parts(self) -> (R, W) {
        (self.input, self.output)
    }
}

impl<R, W: Write> Api<R, W> {
    /// Sends `data` to the client as output.
    pub fn send(&mut self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.write_record(OutputRecord::stdout(data))
    }

    /// Sends `data` to the client as an error report.
    pub fn send_error(&mut self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.write_record(OutputRecord::stderr(data))
    }

    fn write_record(&mut self, record: OutputRecord) -> Result<()> {
        self.output.write_all(&record.encode()?)?;
        self.output.flush()?;
        Ok(())
    }
}

impl<R: Read, W> Api<R, W> {
    /// Blocks for the next input record. Returns `None` once the input closes.
    pub fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        let mut header = [0u8; INPUT_HEADER_LEN];
        if !read_exact_or_eof(&mut self.input, &mut header)? {
            return Ok(None);
        }
        let mut data = vec![0u8; InputRecord::decode_len(&header)?];
        self.input.read_exact(&mut data)?;
        Ok(Some(data))
    }
}

impl<R: AsFd, W> Api<R, W> {
    /// Whether `recv` would return without blocking.
    pub fn poll(&self) -> Result<bool> {
        let mut fds = libc::pollfd { fd: self.input.as_fd().as_raw_fd(), events: libc::POLLIN, revents: 0 };
        // SAFETY: `fds` is a single valid pollfd for the duration of the call and
        // the descriptor is kept open by `self.input`.
        let ready = unsafe { libc::poll(&mut fds, 1, 0) };
        if ready < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(ready > 0 && fds.revents & (libc::POLLIN | libc::POLLHUP) != 0)
    }
}

/// Fills `buf`, or returns false if the stream ends before the first byte.
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<bool> {
    let mut off = 0;
    while off < buf.len() {
        let n = reader.read(&mut buf[off..])?;
        if n == 0 {
            if off == 0 {
                return Ok(false);
            }
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "input closed mid-record"));
        }
        off += n;
    }
    Ok(true)
}
