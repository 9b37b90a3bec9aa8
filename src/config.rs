use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};

/// Runtime configuration for a monitoring session.
///
/// Loaded from the JSON file named by `LLM_MONITOR_CONFIG` when present, then patched
/// with environment overrides. Every field falls back to the value in `Default`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Interval between monitor loop ticks
    pub cadence_interval_ms: u64,
    /// Minimum spacing between frames accepted by the cadence governor
    pub min_frame_spacing_ms: u64,
    /// Upper bound on a single frame acquisition
    pub acquire_timeout_ms: u64,
    /// Consecutive acquisition failures before the source reports offline
    pub offline_after_failures: u32,

    pub confidence_threshold: f64,
    /// Results slower than this are flagged degraded
    pub latency_ceiling_ms: u64,
    pub inference_timeout_ms: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_ms: u64,

    /// Minimum spacing between accepted QA requests
    pub qa_min_interval_ms: u64,
    /// Analyzed frames retained for QA reuse
    pub recent_frames: usize,

    pub preview_max_dimension: u32,
    pub preview_jpeg_quality: u8,

    pub prompt_path: PathBuf,
    /// Prompt versions kept in the persisted history
    pub prompt_history_limit: usize,
    pub prompt_reload_interval_ms: u64,

    pub health_poll_interval_ms: u64,

    pub backend_url: String,
    pub model: String,

    /// Device path, stream URL or HTTP snapshot URL
    pub camera: String,
    pub use_mock_camera: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cadence_interval_ms: 1000,
            min_frame_spacing_ms: 100,
            acquire_timeout_ms: 3000,
            offline_after_failures: 3,
            confidence_threshold: 0.5,
            latency_ceiling_ms: 5000,
            inference_timeout_ms: 5000,
            breaker_failure_threshold: 3,
            breaker_cooldown_ms: 30_000,
            qa_min_interval_ms: 1000,
            recent_frames: 5,
            preview_max_dimension: 640,
            preview_jpeg_quality: 80,
            prompt_path: PathBuf::from("data/risk_prompt.json"),
            prompt_history_limit: 20,
            prompt_reload_interval_ms: 2000,
            health_poll_interval_ms: 10_000,
            backend_url: "http://localhost:11434".into(),
            model: "minicpm-v:8b".into(),
            camera: "/dev/video0".into(),
            use_mock_camera: false,
        }
    }
}

impl MonitorConfig {
    /// Resolve the configuration for this process: file, then environment, then checks.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("LLM_MONITOR_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(PathBuf::from(path))?,
            _ => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: PathBuf) -> Result<Self> {
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Malformed config in {}", path.display()))
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("OLLAMA_URL") {
            self.backend_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = lookup("OLLAMA_MODEL") {
            self.model = model;
        }
        if let Some(camera) = lookup("CAMERA_SOURCE") {
            self.camera = camera;
        }
        if let Some(flag) = lookup("USE_MOCK_CAMERA") {
            self.use_mock_camera = is_truthy(&flag);
        }
        if let Some(path) = lookup("PROMPT_PATH") {
            self.prompt_path = PathBuf::from(path);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            bail!(
                "confidence_threshold must be within 0..=1, got {}",
                self.confidence_threshold
            );
        }
        if self.cadence_interval_ms == 0 {
            bail!("cadence_interval_ms must be greater than zero");
        }
        if self.inference_timeout_ms == 0 || self.acquire_timeout_ms == 0 {
            bail!("timeouts must be greater than zero");
        }
        if self.breaker_failure_threshold == 0 || self.offline_after_failures == 0 {
            bail!("failure thresholds must be at least 1");
        }
        if self.recent_frames == 0 {
            bail!("recent_frames must be at least 1");
        }
        if self.preview_max_dimension == 0 || !(1..=100).contains(&self.preview_jpeg_quality) {
            bail!("preview settings out of range");
        }
        if self.backend_url.trim().is_empty() {
            bail!("backend_url must not be empty");
        }
        Ok(())
    }

    pub fn cadence_interval(&self) -> Duration {
        Duration::from_millis(self.cadence_interval_ms)
    }

    pub fn min_frame_spacing(&self) -> Duration {
        Duration::from_millis(self.min_frame_spacing_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn latency_ceiling(&self) -> Duration {
        Duration::from_millis(self.latency_ceiling_ms)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_millis(self.breaker_cooldown_ms)
    }

    pub fn qa_min_interval(&self) -> Duration {
        Duration::from_millis(self.qa_min_interval_ms)
    }

    pub fn prompt_reload_interval(&self) -> Duration {
        Duration::from_millis(self.prompt_reload_interval_ms)
    }

    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_millis(self.health_poll_interval_ms)
    }
}

pub fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
}
