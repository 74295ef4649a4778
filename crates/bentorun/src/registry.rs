//! # Instance Registry
//!
//! The set of live and finished-but-unreclaimed instances, keyed by function id.
//!
//! The map is the only state shared between connections. Every operation takes
//! the lock for the map mutation alone: process spawn, waiting for exit and log
//! removal all happen outside it.
//!
//! ## Invariants
//! - **Unique Ids**: `create` allocates a fresh function id per instance.
//! - **Finished Before Removal**: `destroy` refuses an instance whose process is
//!   still running. `kill` terminates first, then destroys.
//! - **Detached Before Removal**: `destroy` refuses an instance a connection is
//!   attached to. That connection reclaims it once its output is delivered.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bentowire::ExecPayload;
use bentowire::FunctionId;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::Launcher;
use crate::instance::Instance;

/// How long `kill` waits for a terminated process to be reaped.
const KILL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum Error {
    NotFound(FunctionId),
    StillRunning(FunctionId),
    Attached(FunctionId),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "Instance not found: {}", id),
            Self::StillRunning(id) => write!(f, "Instance still running: {}", id),
            Self::Attached(id) => write!(f, "Instance attached to a connection: {}", id),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct Registry {
    instances: Mutex<HashMap<FunctionId, Arc<Instance>>>,
    launcher: Launcher,
}

impl Registry {
    pub fn new(launcher: Launcher) -> Self {
        Self { instances: Mutex::new(HashMap::new()), launcher }
    }

    pub fn launcher(&self) -> &Launcher {
        &self.launcher
    }

    /// Starts a new instance for `payload` and registers it.
    ///
    /// A process that fails to spawn is still registered, already dead.
    pub async fn create(&self, payload: &ExecPayload) -> Arc<Instance> {
        let function_id = FunctionId::generate();
        let instance = Instance::spawn(function_id.clone(), payload, &self.launcher);
        self.instances.lock().await.insert(function_id, instance.clone());
        instance
    }

    /// Looks up an instance. The returned handle may outlive its registration.
    pub async fn get(&self, function_id: &FunctionId) -> Option<Arc<Instance>> {
        self.instances.lock().await.get(function_id).cloned()
    }

    /// Removes a finished instance and deletes its logs.
    pub async fn destroy(&self, function_id: &FunctionId) -> Result<()> {
        let instance = {
            let mut instances = self.instances.lock().await;
            let instance = instances.get(function_id).ok_or_else(|| Error::NotFound(function_id.clone()))?;
            if !instance.clean() {
                return Err(Error::StillRunning(function_id.clone()));
            }
            if instance.is_attached() {
                return Err(Error::Attached(function_id.clone()));
            }
            instances.remove(function_id)
        };

        if let Some(instance) = instance {
            if let Err(e) = instance.remove_logs() {
                warn!(function_id = %function_id, error = %e, "failed to remove instance logs");
            }
            debug!(function_id = %function_id, "instance destroyed");
        }
        Ok(())
    }

    /// Terminates an instance's process, waits for it to exit and destroys it.
    ///
    /// An attached instance is left registered for its connection to reclaim.
    pub async fn kill(&self, function_id: &FunctionId) -> Result<()> {
        let instance = self.get(function_id).await.ok_or_else(|| Error::NotFound(function_id.clone()))?;
        instance.kill();
        if tokio::time::timeout(KILL_TIMEOUT, instance.exited()).await.is_err() {
            warn!(function_id = %function_id, "instance did not exit after kill");
            return Err(Error::StillRunning(function_id.clone()));
        }
        match self.destroy(function_id).await {
            // a concurrent destroy already reclaimed it
            Err(Error::NotFound(_)) => Ok(()),
            Err(Error::Attached(_)) => {
                debug!(function_id = %function_id, "killed instance left to its connection");
                Ok(())
            }
            other => other,
        }
    }

    /// Kills and destroys every registered instance.
    pub async fn kill_all(&self) {
        let ids: Vec<FunctionId> = self.instances.lock().await.keys().cloned().collect();
        info!(count = ids.len(), "killing all instances");
        for id in ids {
            if let Err(e) = self.kill(&id).await {
                warn!(function_id = %id, error = %e, "failed to kill instance");
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.instances.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.lock().await.is_empty()
    }
}
