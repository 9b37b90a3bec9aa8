use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::config::MonitorConfig;
use crate::error::{MonitorError, MonitorResult};

use super::governor::{CadenceGovernor, HealthTracker};
use super::preview::encode_preview;
use super::transport::{CameraTransport, FfmpegTransport, MockTransport, SnapshotTransport};
use super::{Frame, RawFrame, SourceHealth, SourceTag};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub min_frame_spacing: Duration,
    pub acquire_timeout: Duration,
    pub offline_after_failures: u32,
    pub preview_max_dimension: u32,
    pub preview_jpeg_quality: u8,
}

impl SourceSettings {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            min_frame_spacing: config.min_frame_spacing(),
            acquire_timeout: config.acquire_timeout(),
            offline_after_failures: config.offline_after_failures,
            preview_max_dimension: config.preview_max_dimension,
            preview_jpeg_quality: config.preview_jpeg_quality,
        }
    }
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

struct Capture {
    raw: RawFrame,
    preview: Vec<u8>,
    captured_mono: Instant,
    captured_at: DateTime<Utc>,
}

/// Cadence-governed, health-tracked wrapper around a camera transport.
///
/// Live and mock variants differ only in the transport they wrap.
pub struct FrameSource {
    transport: Box<dyn CameraTransport>,
    tag: SourceTag,
    governor: CadenceGovernor,
    tracker: HealthTracker,
    health_tx: watch::Sender<SourceHealth>,
    settings: SourceSettings,
}

impl FrameSource {
    pub fn live(transport: Box<dyn CameraTransport>, settings: SourceSettings) -> Self {
        Self::with_transport(transport, SourceTag::Live, settings)
    }

    pub fn mock(transport: MockTransport, settings: SourceSettings) -> Self {
        Self::with_transport(Box::new(transport), SourceTag::Mock, settings)
    }

    fn with_transport(
        transport: Box<dyn CameraTransport>,
        tag: SourceTag,
        settings: SourceSettings,
    ) -> Self {
        let (health_tx, _) = watch::channel(SourceHealth::Ok);
        Self {
            transport,
            tag,
            governor: CadenceGovernor::new(settings.min_frame_spacing),
            tracker: HealthTracker::new(settings.offline_after_failures),
            health_tx,
            settings,
        }
    }

    /// Pick the transport named by the configuration.
    pub fn from_config(config: &MonitorConfig) -> Result<Self> {
        let settings = SourceSettings::from_config(config);
        if config.use_mock_camera {
            let transport = MockTransport::gradient(640, 480, 30)
                .context("failed to render mock camera frames")?;
            log_info!("Using mock camera");
            return Ok(Self::mock(transport, settings));
        }

        let camera = config.camera.trim();
        let transport: Box<dyn CameraTransport> =
            if camera.starts_with("http://") || camera.starts_with("https://") {
                Box::new(SnapshotTransport::new(camera, settings.acquire_timeout)?)
            } else {
                Box::new(FfmpegTransport::new(camera))
            };
        log_info!("Using live camera via {}", transport.describe());
        Ok(Self::live(transport, settings))
    }

    pub fn describe(&self) -> String {
        self.transport.describe()
    }

    #[cfg(test)]
    pub fn health(&self) -> SourceHealth {
        self.tracker.health()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<SourceHealth> {
        self.health_tx.subscribe()
    }

    /// Pull one frame.
    ///
    /// `Ok(None)` means no frame this call: either too soon after the last accepted frame,
    /// or a transient capture failure below the offline threshold. Once offline, failures
    /// surface as `SourceUnavailable`.
    pub async fn acquire(&mut self) -> MonitorResult<Option<Frame>> {
        if !self.governor.ready(Instant::now()) {
            log_debug!("frame dropped by cadence governor");
            return Ok(None);
        }

        match self.capture().await {
            Ok(Capture {
                raw,
                preview,
                captured_mono,
                captured_at,
            }) => {
                self.governor.mark_accepted(captured_mono);
                let health = self.tracker.record_success();
                self.publish_health(health);
                Ok(Some(Frame::new(self.tag, raw, preview, captured_at)))
            }
            Err(err) => {
                let detail = format!("{err:#}");
                let health = self.tracker.record_failure();
                self.publish_health(health);
                match health {
                    SourceHealth::Offline => {
                        log_warn!(
                            "{} offline after {} consecutive failures: {}",
                            self.transport.describe(),
                            self.tracker.consecutive_failures(),
                            detail
                        );
                        Err(MonitorError::SourceUnavailable(detail))
                    }
                    _ => {
                        log_warn!("frame capture failed ({}): {}", self.transport.describe(), detail);
                        Ok(None)
                    }
                }
            }
        }
    }

    async fn capture(&mut self) -> Result<Capture> {
        let budget = self.settings.acquire_timeout;
        let bytes = tokio::time::timeout(budget, self.transport.next_frame())
            .await
            .map_err(|_| anyhow!("capture exceeded {}ms", budget.as_millis()))??;
        let captured_mono = Instant::now();
        let captured_at = Utc::now();

        let bytes = Arc::new(bytes);
        let max_dimension = self.settings.preview_max_dimension;
        let quality = self.settings.preview_jpeg_quality;
        let preview = tokio::task::spawn_blocking({
            let bytes = Arc::clone(&bytes);
            move || encode_preview(&bytes, max_dimension, quality)
        })
        .await
        .context("preview worker join failed")??;

        Ok(Capture {
            raw: RawFrame { bytes },
            preview,
            captured_mono,
            captured_at,
        })
    }

    fn publish_health(&self, health: SourceHealth) {
        let changed = self.health_tx.send_if_modified(|current| {
            if *current != health {
                *current = health;
                true
            } else {
                false
            }
        });
        if changed {
            log_info!("{} health is now {:?}", self.transport.describe(), health);
        }
    }
}
