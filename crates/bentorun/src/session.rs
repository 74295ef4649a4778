//! # Communication Phase
//!
//! The per-connection reactor that runs while a client is attached to an
//! instance. One task multiplexes four event sources:
//!
//! - the client socket, carrying input and close frames,
//! - the instance's output log, tailed into an outbound queue,
//! - the instance's error log, drained into the server log,
//! - the socket's write side, which takes the front of the outbound queue.
//!
//! Logs are regular files and never signal readiness, so both are polled on a
//! short interval.
//!
//! ## Invariants
//! - **Delivered Cursor**: the instance's output cursor only ever covers records
//!   that were completely written to the client. Records read from the log but
//!   still queued are rewound on every exit path, including errors, so the next
//!   attachment re-reads them.
//! - **Ordered Output**: records leave the queue in log order.
//! - **Bounded Queue**: at most `OUTBOX_CAPACITY` records are read ahead of the
//!   socket.
//! - **Non-blocking Writes**: every byte to the client goes through the queue
//!   and the `select!`, so a slow reader never stalls the other sources. Close
//!   and "function dead" take effect once the queue has drained far enough.
//! - **Frame Ownership**: frames after a Close stay buffered for the request
//!   phase.

use std::collections::VecDeque;
use std::time::Duration;

use bentowire::FunctionId;
use bentowire::FunctionMessage;
use bentowire::MessageKind;
use bentowire::SessionFrame;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::warn;

use crate::instance::Attachment;
use crate::instance::InputError;
use crate::log::ErrorTail;
use crate::log::LogReader;
use crate::transport::Frame;
use crate::transport::FrameReader;
use crate::transport::Result;

/// How often the logs are checked for new data.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Log records read ahead of the client socket.
pub const OUTBOX_CAPACITY: usize = 64;

/// Error text drained per poll.
const ERROR_CHUNK: usize = 64 * 1024;

pub const FUNCTION_DEAD: &str = "function dead";
pub const INVALID_MSG_TYPE: &str = "invalid msg type";
pub const INVALID_OUTPUT_RECORD: &str = "invalid output record";
pub const INPUT_QUEUE_FULL: &str = "input queue full";

/// How an attachment ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The client sent Close for the attached instance.
    Closed,
    /// The instance exited and all of its output was delivered.
    Finished,
    /// The client went away.
    Disconnected,
}

struct Outgoing {
    bytes: Vec<u8>,
    /// Log bytes this message was read from; zero for server-generated messages.
    log_len: u64,
}

pub(crate) struct Session<'a, R, W> {
    frames: &'a mut FrameReader<R>,
    writer: &'a mut W,
    attachment: Attachment,
    function_id: FunctionId,
    log: Option<LogReader>,
    errors: Option<ErrorTail>,
    outbox: VecDeque<Outgoing>,
    /// Bytes of the front message already written.
    offset: usize,
    /// Log bytes held by queued messages.
    queued: u64,
    /// The last log read found no complete record.
    log_drained: bool,
    /// Close arrived mid-message; end once the front message is out.
    closing: bool,
    /// "function dead" is queued; end once the queue is empty.
    finishing: bool,
}

impl<'a, R, W> Session<'a, R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub(crate) fn new(frames: &'a mut FrameReader<R>, writer: &'a mut W, attachment: Attachment) -> Self {
        let function_id = attachment.function_id().clone();
        let log = match LogReader::open(attachment.output_path(), attachment.output_cursor()) {
            Ok(log) => Some(log),
            Err(e) => {
                warn!(function_id = %function_id, error = %e, "output log unavailable");
                None
            }
        };
        let errors = match ErrorTail::open(attachment.error_path(), attachment.error_cursor()) {
            Ok(tail) => Some(tail),
            Err(e) => {
                debug!(function_id = %function_id, error = %e, "error log unavailable");
                None
            }
        };
        Self {
            frames,
            writer,
            attachment,
            function_id,
            log,
            errors,
            outbox: VecDeque::new(),
            offset: 0,
            queued: 0,
            log_drained: false,
            closing: false,
            finishing: false,
        }
    }

    /// Runs until the attachment ends, then releases it.
    pub(crate) async fn run(mut self) -> Result<Outcome> {
        debug!(function_id = %self.function_id, cursor = self.attachment.output_cursor(), "attached");
        let result = self.pump().await;
        self.rewind();
        debug!(
            function_id = %self.function_id,
            cursor = self.attachment.output_cursor(),
            outcome = ?result.as_ref().ok(),
            "detached"
        );
        result
    }

    async fn pump(&mut self) -> Result<Outcome> {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // frames that arrived together with the Open
        if let Some(outcome) = self.handle_buffered()? {
            return Ok(outcome);
        }

        loop {
            tokio::select! {
                read = self.frames.fill(), if !self.closing => {
                    if read? == 0 {
                        return Ok(Outcome::Disconnected);
                    }
                    if let Some(outcome) = self.handle_buffered()? {
                        return Ok(outcome);
                    }
                }
                written = write_front(&mut *self.writer, &self.outbox, self.offset), if !self.outbox.is_empty() => {
                    self.advance(written?)?;
                    if self.closing && self.offset == 0 {
                        return Ok(Outcome::Closed);
                    }
                    if self.finishing && self.outbox.is_empty() {
                        return Ok(Outcome::Finished);
                    }
                }
                _ = ticker.tick(), if !self.closing && !self.finishing => {
                    if self.poll_instance() {
                        self.queue_err(FUNCTION_DEAD);
                        self.finishing = true;
                    }
                }
            }
        }
    }

    /// Handles every whole frame in the read buffer, stopping at a Close.
    fn handle_buffered(&mut self) -> Result<Option<Outcome>> {
        while !self.closing {
            let Some(frame) = self.frames.take_frame()? else { break };
            if let Some(outcome) = self.handle_frame(frame)? {
                return Ok(Some(outcome));
            }
        }
        Ok(None)
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<Option<Outcome>> {
        match SessionFrame::decode(frame.kind, &frame.payload) {
            Ok(SessionFrame::Message(msg)) if msg.kind == MessageKind::Input => {
                if msg.function_id != self.function_id {
                    self.queue_err(&format!("no open instance with id: {}", msg.function_id));
                    return Ok(None);
                }
                match self.attachment.write_input(&msg.data) {
                    Ok(()) => {}
                    Err(InputError::Backlogged) => {
                        debug!(function_id = %self.function_id, len = msg.data.len(), "input queue full");
                        self.queue_err(INPUT_QUEUE_FULL);
                    }
                    Err(e) => {
                        debug!(function_id = %self.function_id, len = msg.data.len(), error = %e, "dropping input");
                    }
                }
            }
            Ok(SessionFrame::Close { function_id }) => {
                if function_id != self.function_id.as_str() {
                    self.queue_err(&format!("no open instance with id: {}", function_id));
                } else if self.offset == 0 {
                    return Ok(Some(Outcome::Closed));
                } else {
                    // the client has part of a message; finish it to stay on a frame boundary
                    self.closing = true;
                }
            }
            Ok(SessionFrame::Message(_)) | Err(bentowire::Error::UnknownKind(_)) => {
                self.queue_err(INVALID_MSG_TYPE);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(None)
    }

    /// Moves new log data into the queue. Returns true once the instance is
    /// dead and everything it wrote has been delivered.
    fn poll_instance(&mut self) -> bool {
        // sampled before reading so records written just before exit are seen
        let alive = self.attachment.alive();
        self.fill_outbox();
        self.drain_errors();
        !alive && self.log_drained && self.outbox.is_empty()
    }

    fn fill_outbox(&mut self) {
        let Some(log) = self.log.as_mut() else {
            self.log_drained = true;
            return;
        };
        self.log_drained = false;
        while self.outbox.len() < OUTBOX_CAPACITY {
            match log.next_record() {
                Ok(Some(entry)) => {
                    let msg = entry.record.into_message(self.function_id.clone());
                    match msg.encode() {
                        Ok(bytes) => {
                            self.queued += entry.framed_len;
                            self.outbox.push_back(Outgoing { bytes, log_len: entry.framed_len });
                        }
                        Err(e) => {
                            self.corrupt_log(e.to_string());
                            return;
                        }
                    }
                }
                Ok(None) => {
                    self.log_drained = true;
                    return;
                }
                Err(e) => {
                    self.corrupt_log(e.to_string());
                    return;
                }
            }
        }
    }

    /// Stops tailing an output log that can no longer be parsed.
    fn corrupt_log(&mut self, error: String) {
        warn!(function_id = %self.function_id, error = %error, "abandoning output log");
        self.commit();
        self.log = None;
        self.log_drained = true;
        self.queue_err(INVALID_OUTPUT_RECORD);
    }

    fn drain_errors(&mut self) {
        let Some(tail) = self.errors.as_mut() else { return };
        match tail.drain(ERROR_CHUNK) {
            Ok(text) if !text.is_empty() => {
                self.attachment.set_error_cursor(tail.position());
                warn!(
                    function_id = %self.function_id,
                    stderr = %String::from_utf8_lossy(&text).trim_end(),
                    "execution error"
                );
            }
            Ok(_) => {}
            Err(e) => {
                debug!(function_id = %self.function_id, error = %e, "error log unreadable");
                self.errors = None;
            }
        }
    }

    fn queue_err(&mut self, reason: &str) {
        match FunctionMessage::function_err(self.function_id.clone(), reason).encode() {
            Ok(bytes) => self.outbox.push_back(Outgoing { bytes, log_len: 0 }),
            Err(e) => warn!(function_id = %self.function_id, error = %e, "failed to encode function error"),
        }
    }

    /// Accounts for `n` bytes of the front message reaching the socket.
    fn advance(&mut self, n: usize) -> Result<()> {
        if n == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into());
        }
        self.offset += n;
        let done = self.outbox.front().is_some_and(|front| self.offset >= front.bytes.len());
        if done {
            if let Some(sent) = self.outbox.pop_front() {
                self.queued -= sent.log_len;
            }
            self.offset = 0;
            self.commit();
        }
        Ok(())
    }

    /// Publishes the delivered position to the instance.
    fn commit(&mut self) {
        if let Some(log) = &self.log {
            self.attachment.set_output_cursor(log.position() - self.queued);
        }
    }

    /// Puts every queued log record back so the next attachment reads it again.
    fn rewind(&mut self) {
        if let Some(log) = self.log.as_mut() {
            if let Err(e) = log.rewind(self.queued) {
                warn!(function_id = %self.function_id, error = %e, "failed to rewind output log");
                return;
            }
            if self.queued > 0 {
                debug!(function_id = %self.function_id, bytes = self.queued, "rewound undelivered output");
            }
            self.queued = 0;
            self.attachment.set_output_cursor(log.position());
        }
        self.outbox.clear();
        self.offset = 0;
    }
}

async fn write_front<W>(writer: &mut W, outbox: &VecDeque<Outgoing>, offset: usize) -> std::io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    match outbox.front() {
        Some(front) => writer.write(&front.bytes[offset..]).await,
        None => std::future::pending().await,
    }
}
