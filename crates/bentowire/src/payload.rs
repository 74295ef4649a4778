//! # Execution Payload
//!
//! The opaque argument a driver entrypoint receives: URL-safe base64 (padded)
//! of the JSON object `{"call": ..., "code": ...}`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecPayload {
    pub call: String,
    pub code: String,
}

impl ExecPayload {
    pub fn new(call: impl Into<String>, code: impl Into<String>) -> Self {
        Self { call: call.into(), code: code.into() }
    }

    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self).map_err(|e| Error::InvalidPayload(e.to_string()))?;
        Ok(URL_SAFE.encode(json))
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        let json = URL_SAFE
            .decode(encoded.trim())
            .map_err(|e| Error::InvalidPayload(format!("base64: {}", e)))?;
        serde_json::from_slice(&json).map_err(|e| Error::InvalidPayload(format!("json: {}", e)))
    }
}
