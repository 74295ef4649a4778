//! # Function Store
//!
//! Persisted mapping from an opaque token to a function's name and source.
//!
//! Records are immutable once created and looked up by token only. The server
//! needs nothing beyond read-your-writes within one process.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Mutex;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Function store I/O error: {}", e),
            Self::Json(e) => write!(f, "Function store encoding error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A stored function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub name: String,
    pub code: String,
}

/// Allocates a fresh token for a Store request.
pub fn generate_token() -> String {
    uuid::Uuid::new_v4().hyphenated().to_string()
}

/// Tokens are UUIDs; anything else cannot name a record.
fn is_token(token: &str) -> bool {
    token.len() == 36 && uuid::Uuid::try_parse(token).is_ok()
}

#[async_trait::async_trait]
pub trait FunctionStore: Send + Sync + 'static {
    async fn create_function(&self, token: &str, name: &str, code: &str) -> Result<()>;

    /// Returns `Ok(None)` when no function was stored under `token`.
    async fn get_function(&self, token: &str) -> Result<Option<FunctionRecord>>;
}

/// One `<token>.json` file per function under a directory.
#[derive(Debug, Clone)]
pub struct FsFunctionStore {
    dir: PathBuf,
}

impl FsFunctionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, token: &str) -> PathBuf {
        self.dir.join(format!("{}.json", token))
    }
}

#[async_trait::async_trait]
impl FunctionStore for FsFunctionStore {
    async fn create_function(&self, token: &str, name: &str, code: &str) -> Result<()> {
        if !is_token(token) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid token {:?}", token),
            )));
        }
        let record = FunctionRecord { name: name.to_string(), code: code.to_string() };
        let json = serde_json::to_vec(&record)?;
        tokio::fs::write(self.path(token), json).await?;
        Ok(())
    }

    async fn get_function(&self, token: &str) -> Result<Option<FunctionRecord>> {
        if !is_token(token) {
            return Ok(None);
        }
        match tokio::fs::read(self.path(token)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keeps functions in memory. Used by tests and embedders without a disk.
#[derive(Debug, Default)]
pub struct MemoryFunctionStore {
    functions: Mutex<HashMap<String, FunctionRecord>>,
}

impl MemoryFunctionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl FunctionStore for MemoryFunctionStore {
    async fn create_function(&self, token: &str, name: &str, code: &str) -> Result<()> {
        let record = FunctionRecord { name: name.to_string(), code: code.to_string() };
        self.functions.lock().await.insert(token.to_string(), record);
        Ok(())
    }

    async fn get_function(&self, token: &str) -> Result<Option<FunctionRecord>> {
        Ok(self.functions.lock().await.get(token).cloned())
    }
}
