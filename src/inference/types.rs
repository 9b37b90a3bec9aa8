use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceResult {
    pub frame_id: String,
    pub prompt_version: u64,
    pub model: String,
    pub model_digest: Option<String>,
    pub latency_ms: u64,
    /// Only ever true when `confidence` cleared the configured threshold.
    pub risk: bool,
    pub confidence: f64,
    pub explanation: String,
    /// Latency exceeded the configured ceiling.
    pub degraded: bool,
    /// Unparsed model output.
    #[serde(skip)]
    pub raw_text: Option<String>,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QARequest {
    pub id: String,
    pub question: String,
    /// `None` when the caller supplied its own image.
    pub frame_id: Option<String>,
    pub answer: String,
    pub latency_ms: u64,
    pub model: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl QARequest {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
