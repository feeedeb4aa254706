//! The job-outcome envelope transported end-to-end

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::messaging::handler::HandlerError;

/// Outcome record of one background job run.
///
/// Exactly one of `data` / `error_message` is populated: the two
/// constructors are the only way this crate builds an envelope, so
/// `success == true` iff `data` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    pub job_name: String,
    pub job_type: String,
    pub completed_at: DateTime<Utc>,
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub source: String,
}

impl JobEnvelope {
    /// Envelope for a job that completed with a result.
    pub fn succeeded(job_name: &str, job_type: &str, source: &str, data: Value) -> Self {
        Self {
            job_name: job_name.to_string(),
            job_type: job_type.to_string(),
            completed_at: Utc::now(),
            success: true,
            data: Some(data),
            error_message: None,
            source: source.to_string(),
        }
    }

    /// Envelope for a job that failed, with a human-readable summary.
    pub fn failed(job_name: &str, job_type: &str, source: &str, error_message: String) -> Self {
        Self {
            job_name: job_name.to_string(),
            job_type: job_type.to_string(),
            completed_at: Utc::now(),
            success: false,
            data: None,
            error_message: Some(error_message),
            source: source.to_string(),
        }
    }

    /// Decode the payload into the consumer's expected type.
    ///
    /// The payload is opaque to the broker and may arrive either as a
    /// structured value or as a raw JSON-encoded string; both forms are
    /// accepted. `Ok(None)` means the envelope carries no data.
    pub fn decode_data<T: DeserializeOwned>(&self) -> Result<Option<T>, HandlerError> {
        match &self.data {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(raw)) => serde_json::from_str(raw)
                .map(Some)
                .map_err(|e| HandlerError::Deserialization(e.to_string())),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| HandlerError::Deserialization(e.to_string())),
        }
    }
}
