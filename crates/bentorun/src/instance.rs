//! # Instance
//!
//! One running invocation of stored code: a child process, the append-only logs
//! its stdout and stderr are redirected into, and the cursor marking how much of
//! the output log has been delivered to a client.
//!
//! Two background tasks serve each process. The reaper owns the `Child`, waits
//! for it to exit (or kills it on request) and publishes the outcome on a watch
//! channel, so liveness checks never block. The input pump owns the process's
//! stdin and writes queued input records in order, so a process that stops
//! reading cannot stall the connection feeding it. At most `INPUT_QUEUE`
//! records wait for the pump; further input is refused until it catches up.

use std::ops::Deref;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use bentowire::ExecPayload;
use bentowire::FunctionId;
use bentowire::InputRecord;
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::process::ChildStdin;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::Launcher;

/// Input records buffered ahead of a process's stdin.
pub const INPUT_QUEUE: usize = 16;

/// Why input was not queued for a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputError {
    /// The process has terminated or its stdin is closed.
    Dead,
    /// `INPUT_QUEUE` records are already waiting for the process to read them.
    Backlogged,
    /// The data does not fit in one input record.
    TooLarge,
}

impl std::fmt::Display for InputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dead => write!(f, "Process no longer accepts input"),
            Self::Backlogged => write!(f, "Input queue full"),
            Self::TooLarge => write!(f, "Input too large"),
        }
    }
}

impl std::error::Error for InputError {}

/// Lifecycle of the process behind an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// Exit code, or `None` when the process was ended by a signal.
    Exited(Option<i32>),
    /// The process could not be spawned; the instance was dead from the start.
    FailedToStart,
}

pub struct Instance {
    function_id: FunctionId,
    output_path: PathBuf,
    error_path: PathBuf,
    state: watch::Receiver<ProcessState>,
    input: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
    /// Whether the output log was created at spawn.
    log_created: bool,
    output_cursor: AtomicU64,
    error_cursor: AtomicU64,
    attached: AtomicBool,
    cleaned: AtomicBool,
}

impl Instance {
    /// Starts the execution process for `payload`.
    ///
    /// Never fails: a process that cannot be spawned yields an instance whose
    /// state is already `FailedToStart`, so callers only ever branch on liveness.
    /// Must be called from within a tokio runtime.
    pub fn spawn(function_id: FunctionId, payload: &ExecPayload, launcher: &Launcher) -> Arc<Self> {
        let output_path = launcher.instances_dir.join(format!("{}.out", function_id));
        let error_path = launcher.instances_dir.join(format!("{}.err", function_id));

        let (state_tx, state_rx) = watch::channel(ProcessState::Running);
        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE);
        let (kill_tx, kill_rx) = oneshot::channel();

        let stdout = append_only(&output_path);
        let log_created = stdout.is_ok();
        match stdout.and_then(|stdout| start(payload, launcher, stdout, &error_path)) {
            Ok(mut child) => {
                info!(function_id = %function_id, pid = ?child.id(), "instance started");
                let stdin = child.stdin.take();
                tokio::spawn(pump_input(function_id.clone(), stdin, input_rx));
                tokio::spawn(reap(function_id.clone(), child, kill_rx, state_tx));
            }
            Err(e) => {
                warn!(function_id = %function_id, error = %e, "failed to start instance");
                state_tx.send_replace(ProcessState::FailedToStart);
            }
        }

        Arc::new(Self {
            function_id,
            output_path,
            error_path,
            state: state_rx,
            input: Mutex::new(Some(input_tx)),
            kill: Mutex::new(Some(kill_tx)),
            log_created,
            output_cursor: AtomicU64::new(0),
            error_cursor: AtomicU64::new(0),
            attached: AtomicBool::new(false),
            cleaned: AtomicBool::new(false),
        })
    }

    pub fn function_id(&self) -> &FunctionId {
        &self.function_id
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn error_path(&self) -> &Path {
        &self.error_path
    }

    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    /// True until the process has terminated. Never blocks.
    pub fn alive(&self) -> bool {
        self.state() == ProcessState::Running
    }

    /// Waits for the process to terminate.
    pub async fn exited(&self) -> ProcessState {
        let mut state = self.state.clone();
        let done = state.wait_for(|s| *s != ProcessState::Running).await.map(|s| *s);
        match done {
            Ok(s) => s,
            // the reaper is gone, so the last published state is final
            Err(_) => *state.borrow(),
        }
    }

    /// Queues `data` as one input record for the process.
    ///
    /// Never waits: when the process is dead or not keeping up the data is
    /// handed back as an error and dropped.
    pub fn write_input(&self, data: &[u8]) -> Result<(), InputError> {
        if !self.alive() {
            return Err(InputError::Dead);
        }
        let bytes = InputRecord::new(data).encode().map_err(|e| {
            warn!(function_id = %self.function_id, error = %e, "dropping input");
            InputError::TooLarge
        })?;
        let input = lock(&self.input);
        let tx = input.as_ref().ok_or(InputError::Dead)?;
        tx.try_send(bytes).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => InputError::Backlogged,
            mpsc::error::TrySendError::Closed(_) => InputError::Dead,
        })
    }

    /// Tears down the instance if its process has terminated.
    ///
    /// Returns whether the process had terminated. Repeated calls after a
    /// successful clean return true and release nothing twice.
    pub fn clean(&self) -> bool {
        if self.alive() {
            return false;
        }
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return true;
        }
        // dropping the sender ends the input pump, which closes stdin
        lock(&self.input).take();
        lock(&self.kill).take();
        debug!(function_id = %self.function_id, state = ?self.state(), "instance cleaned");
        true
    }

    /// Requests forceful termination, then attempts `clean`.
    ///
    /// Termination is asynchronous: wait on `exited` to observe it.
    pub fn kill(&self) {
        if self.alive() {
            if let Some(tx) = lock(&self.kill).take() {
                info!(function_id = %self.function_id, "killing instance");
                if tx.send(()).is_err() {
                    warn!(function_id = %self.function_id, "reaper already gone");
                }
            }
        }
        self.clean();
    }

    /// Offset in the output log up to which records have been delivered.
    pub fn output_cursor(&self) -> u64 {
        self.output_cursor.load(Ordering::SeqCst)
    }

    pub(crate) fn set_output_cursor(&self, position: u64) {
        self.output_cursor.store(position, Ordering::SeqCst);
    }

    /// Offset in the error log up to which text has been reported.
    pub fn error_cursor(&self) -> u64 {
        self.error_cursor.load(Ordering::SeqCst)
    }

    pub(crate) fn set_error_cursor(&self, position: u64) {
        self.error_cursor.store(position, Ordering::SeqCst);
    }

    /// Whether every record in the output log has been delivered.
    ///
    /// A log that cannot be inspected counts as undelivered, unless it was
    /// never created and so never held anything.
    pub fn fully_delivered(&self) -> bool {
        match std::fs::metadata(&self.output_path) {
            Ok(meta) => self.output_cursor() >= meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => !self.log_created,
            Err(_) => false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    /// Binds the instance to the caller. At most one attachment exists at a time.
    pub fn attach(self: &Arc<Self>) -> Option<Attachment> {
        self.attached
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Attachment { instance: self.clone() })
    }

    /// Deletes the output and error logs.
    pub(crate) fn remove_logs(&self) -> std::io::Result<()> {
        for path in [&self.output_path, &self.error_path] {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("function_id", &self.function_id)
            .field("state", &self.state())
            .field("output_cursor", &self.output_cursor())
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Exclusive binding between one connection and one instance.
///
/// Dropping it releases the instance for the next attachment; it never ends the
/// process.
#[derive(Debug)]
pub struct Attachment {
    instance: Arc<Instance>,
}

impl Attachment {
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }
}

impl Deref for Attachment {
    type Target = Instance;

    fn deref(&self) -> &Instance {
        &self.instance
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.instance.attached.store(false, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn start(payload: &ExecPayload, launcher: &Launcher, stdout: std::fs::File, error_path: &Path) -> std::io::Result<Child> {
    let encoded = payload.encode().map_err(std::io::Error::other)?;
    let stderr = append_only(error_path)?;

    Command::new(&launcher.program)
        .args(&launcher.args)
        .arg(&launcher.entrypoint)
        .arg(encoded)
        .stdin(Stdio::piped())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .spawn()
}

fn append_only(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}

async fn reap(
    function_id: FunctionId,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    state: watch::Sender<ProcessState>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = kill_rx => {
            if let Err(e) = child.kill().await {
                warn!(function_id = %function_id, error = %e, "failed to kill instance");
            }
            child.wait().await
        }
    };

    let next = match status {
        Ok(status) => {
            info!(function_id = %function_id, code = ?status.code(), "instance exited");
            ProcessState::Exited(status.code())
        }
        Err(e) => {
            warn!(function_id = %function_id, error = %e, "failed to wait on instance");
            ProcessState::Exited(None)
        }
    };
    state.send_replace(next);
}

async fn pump_input(function_id: FunctionId, stdin: Option<ChildStdin>, mut rx: mpsc::Receiver<Vec<u8>>) {
    let Some(mut stdin) = stdin else { return };
    while let Some(bytes) = rx.recv().await {
        if let Err(e) = stdin.write_all(&bytes).await {
            debug!(function_id = %function_id, error = %e, "input pipe closed");
            break;
        }
        if let Err(e) = stdin.flush().await {
            debug!(function_id = %function_id, error = %e, "input pipe closed");
            break;
        }
    }
}
