use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TickOutcome {
    /// Camera offline; alert forced to monitoring.
    SourceFault,
    /// No frame this tick (cadence governor or transient capture failure).
    Skipped,
    Safe,
    Risk,
    InferenceFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickMetrics {
    pub timestamp: DateTime<Utc>,
    pub outcome: TickOutcome,
    pub frame_id: Option<String>,
    pub prompt_version: Option<u64>,
    pub acquire_ms: u64,
    pub inference_ms: Option<u64>,
    pub total_ms: u64,
    pub confidence: Option<f64>,
    pub degraded: bool,
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub system: SystemMetrics,
    pub recent_ticks: Vec<TickMetrics>,
    pub tick_count: u64,
    pub analyzed_count: u64,
    pub risk_count: u64,
    pub skipped_count: u64,
    pub fault_count: u64,
    pub degraded_count: u64,
}
